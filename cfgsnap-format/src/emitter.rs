//! JSON-Lines emission of scanned array elements

use crate::cancel::CancelToken;
use crate::error::{Result, SnapError};
use crate::scanner::ArrayScanner;
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Line terminator written after every element
pub const LINE_TERMINATOR: u8 = b'\n';

/// Writes each element of an [`ArrayScanner`] as one line
pub struct LineEmitter<W> {
    out: W,
    written: u64,
    bytes_written: u64,
}

impl<W: Write> LineEmitter<W> {
    /// Create an emitter writing to `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            bytes_written: 0,
        }
    }

    /// Elements fully written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes written so far, terminators included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write one element followed by the line terminator
    pub fn write_element(&mut self, element: &[u8]) -> Result<()> {
        self.out.write_all(element)?;
        self.out.write_all(&[LINE_TERMINATOR])?;
        self.written += 1;
        self.bytes_written += element.len() as u64 + 1;
        Ok(())
    }

    /// Drain `scanner`, writing every element in order.
    ///
    /// `cancel` is checked before each element. Returns the number of
    /// elements written by this call.
    pub fn emit_all<R: Read>(
        &mut self,
        scanner: &mut ArrayScanner<R>,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let before = self.written;
        let outcome = self.drain(scanner, cancel);
        let count = self.written - before;

        match &outcome {
            Ok(()) => debug!(elements = count, bytes = self.bytes_written, "emitted lines"),
            Err(err) => warn!(written = count, error = %err, "line emission stopped"),
        }
        outcome.map(|()| count)
    }

    fn drain<R: Read>(&mut self, scanner: &mut ArrayScanner<R>, cancel: &CancelToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(SnapError::Cancelled);
            }
            match scanner.next_element()? {
                Some(element) => self.write_element(element.bytes())?,
                None => return Ok(()),
            }
        }
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Mutable access to the underlying writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    /// Consume the emitter, returning the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}
