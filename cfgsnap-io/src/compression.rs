//! gzip adapters for the input and output sides of the pipeline

use cfgsnap_format::{Result, StreamFault};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Reader that transparently gunzips `R`.
///
/// Concatenated gzip members are decoded as one stream. Decoder failures are
/// tagged with [`StreamFault::Corrupt`] so they surface as
/// `SnapError::Decompression` once they reach the scanner.
pub struct GzipReader<R: Read> {
    decoder: MultiGzDecoder<R>,
}

impl<R: Read> GzipReader<R> {
    /// Wrap a compressed reader
    pub fn new(inner: R) -> Self {
        Self {
            decoder: MultiGzDecoder::new(inner),
        }
    }

    /// Consume the adapter, returning the compressed reader
    pub fn into_inner(self) -> R {
        self.decoder.into_inner()
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf).map_err(|err| {
            if err.kind() == io::ErrorKind::Interrupted || StreamFault::from_io(&err).is_some() {
                err
            } else {
                let kind = err.kind();
                StreamFault::Corrupt(err.to_string()).into_io(kind)
            }
        })
    }
}

/// Writer that gzips everything written to it before passing it to `W`.
///
/// [`GzipWriter::finish`] consumes the adapter, so the trailer is written
/// exactly once and the inner writer only comes back after it.
pub struct GzipWriter<W: Write> {
    encoder: GzEncoder<W>,
    accepted: u64,
}

impl<W: Write> GzipWriter<W> {
    /// Wrap `inner` with the given compression level (0-9)
    pub fn new(inner: W, level: u32) -> Self {
        Self {
            encoder: GzEncoder::new(inner, Compression::new(level.min(9))),
            accepted: 0,
        }
    }

    /// Uncompressed bytes accepted so far
    pub fn total_in(&self) -> u64 {
        self.accepted
    }

    /// Write the gzip trailer and return the inner writer
    pub fn finish(self) -> Result<W> {
        Ok(self.encoder.finish()?)
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.accepted += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsnap_format::SnapError;
    use std::io::Cursor;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut writer = GzipWriter::new(Vec::new(), 6);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn gunzip(data: &[u8]) -> std::result::Result<Vec<u8>, SnapError> {
        let mut out = Vec::new();
        GzipReader::new(Cursor::new(data))
            .read_to_end(&mut out)
            .map_err(SnapError::from)?;
        Ok(out)
    }

    #[test]
    fn writer_output_is_readable() {
        let payload = b"{\"a\":1}\n{\"a\":2}\n".repeat(100);
        assert_eq!(gunzip(&gzip(&payload)).unwrap(), payload);
    }

    #[test]
    fn concatenated_members_decode_as_one_stream() {
        let mut data = gzip(b"first\n");
        data.extend(gzip(b"second\n"));
        assert_eq!(gunzip(&data).unwrap(), b"first\nsecond\n".to_vec());
    }

    #[test]
    fn truncated_stream_is_a_decompression_error() {
        let data = gzip(&b"x".repeat(10_000));
        let truncated = &data[..data.len() / 2];
        assert!(matches!(gunzip(truncated), Err(SnapError::Decompression(_))));
    }

    #[test]
    fn garbage_is_a_decompression_error() {
        let garbage = b"this is not gzip at all";
        assert!(matches!(gunzip(garbage), Err(SnapError::Decompression(_))));
    }

    #[test]
    fn unfinished_writer_is_not_a_complete_stream() {
        let mut out = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            encoder.write_all(&b"payload".repeat(1_000)).unwrap();
            encoder.flush().unwrap();
            std::mem::forget(encoder);
        }
        assert!(matches!(gunzip(&out), Err(SnapError::Decompression(_))));
    }

    #[test]
    fn tracks_uncompressed_input() {
        let mut writer = GzipWriter::new(Vec::new(), 1);
        assert_eq!(writer.total_in(), 0);
        writer.write_all(b"12345").unwrap();
        writer.write_all(&b"x".repeat(70_000)).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.total_in(), 70_005);
        let compressed = writer.finish().unwrap();
        assert_eq!(gunzip(&compressed).unwrap().len(), 70_005);
    }
}
