use std::time::{Duration, Instant};

#[cfg(not(target_arch = "wasm32"))]
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
#[cfg(not(target_arch = "wasm32"))]
use std::thread;

#[cfg(not(target_arch = "wasm32"))]
use sysinfo::{get_current_pid, ProcessRefreshKind, RefreshKind, System};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Wall-clock and memory figures for one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMeasurement {
    /// Elapsed wall-clock time
    pub wall_time: Duration,
    /// Peak resident set size observed while the run was in flight
    pub peak_rss_bytes: Option<u64>,
}

/// Measures wall-clock duration and, when requested, peak RSS.
pub(crate) struct RunTimer {
    start: Instant,
    #[cfg(not(target_arch = "wasm32"))]
    sampler: Option<MemorySampler>,
}

impl RunTimer {
    /// Start timing. Memory sampling runs on a background thread only when
    /// `sample_memory` is set.
    pub(crate) fn start(sample_memory: bool) -> Self {
        #[cfg(target_arch = "wasm32")]
        let _ = sample_memory;

        Self {
            start: Instant::now(),
            #[cfg(not(target_arch = "wasm32"))]
            sampler: if sample_memory {
                MemorySampler::spawn(SAMPLE_INTERVAL)
            } else {
                None
            },
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timing and sampling.
    pub(crate) fn finish(mut self) -> RunMeasurement {
        #[cfg(not(target_arch = "wasm32"))]
        let peak_rss_bytes = self
            .sampler
            .as_mut()
            .map(|sampler| {
                sampler.stop();
                sampler.peak_bytes()
            })
            .filter(|bytes| *bytes > 0);

        #[cfg(target_arch = "wasm32")]
        let peak_rss_bytes = None;

        RunMeasurement {
            wall_time: self.start.elapsed(),
            peak_rss_bytes,
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct MemorySampler {
    stop_flag: Arc<AtomicBool>,
    peak_bytes: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

#[cfg(not(target_arch = "wasm32"))]
impl MemorySampler {
    fn spawn(interval: Duration) -> Option<Self> {
        let pid = get_current_pid().ok()?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let peak_bytes = Arc::new(AtomicU64::new(0));

        let thread_stop = Arc::clone(&stop_flag);
        let thread_peak = Arc::clone(&peak_bytes);

        let handle = thread::Builder::new()
            .name("cfgsnap-memory-sampler".to_string())
            .spawn(move || {
                let mut system = System::new_with_specifics(
                    RefreshKind::new().with_processes(ProcessRefreshKind::new()),
                );
                let refresh_kind = ProcessRefreshKind::new().with_memory();

                while !thread_stop.load(Ordering::Relaxed) {
                    if !system.refresh_process_specifics(pid, refresh_kind) {
                        system.refresh_process(pid);
                    }

                    if let Some(process) = system.process(pid) {
                        // sysinfo 0.30 reports bytes
                        thread_peak.fetch_max(process.memory(), Ordering::Relaxed);
                    }

                    thread::park_timeout(interval);
                }
            })
            .ok()?;

        Some(Self {
            stop_flag,
            peak_bytes,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }

    fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.stop();
    }
}
