use core::fmt::Write;

use heapless::{String, Vec};

use crate::hw::{ByteSink, RecordSink};
use crate::Sample;

/// Longest record line, "65535\n".
pub const MAX_LINE: usize = 6;

/// One SD block.
pub const BLOCK_SIZE: usize = 512;

/// Buffers records as ASCII decimal lines and writes them out a block at a time.
///
/// Every write but the last is exactly `N` bytes, so file offsets stay on
/// block boundaries. A record is durable once all of its bytes were written,
/// or once `close` returns `Ok`. When a block write fails, the record being
/// appended is refused and the buffered ones are kept so `close` can retry
/// them. The retry relies on a failed `ByteSink::write` leaving the file as
/// it was.
pub struct LineWriter<W, const N: usize = BLOCK_SIZE> {
    inner: W,
    buffer: Vec<u8, N>,
}

impl<W, const N: usize> LineWriter<W, N>
where
    W: ByteSink,
{
    const FITS_A_LINE: () = assert!(N >= MAX_LINE, "buffer shorter than one record line");

    pub fn new(inner: W) -> Self {
        let () = Self::FITS_A_LINE;
        LineWriter {
            inner,
            buffer: Vec::new(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) -> Result<(), W::Error> {
        if !self.buffer.is_empty() {
            self.inner.write(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl<W, const N: usize> RecordSink for LineWriter<W, N>
where
    W: ByteSink,
{
    type Error = W::Error;

    fn append(&mut self, sample: Sample) -> Result<(), Self::Error> {
        let mut line = String::<MAX_LINE>::new();
        // u16 plus newline always fits
        let _ = writeln!(line, "{}", sample);
        let mark = self.buffer.len();
        let split = line.len().min(N - mark);
        let (head, tail) = line.as_bytes().split_at(split);
        let _ = self.buffer.extend_from_slice(head);
        // blocks go out full, a line may straddle two of them
        if self.buffer.is_full() {
            if let Err(error) = self.flush() {
                self.buffer.truncate(mark);
                return Err(error);
            }
        }
        let _ = self.buffer.extend_from_slice(tail);
        Ok(())
    }

    fn close(mut self) -> Result<(), Self::Error> {
        let flushed = self.flush();
        let committed = self.inner.commit();
        flushed.and(committed)
    }
}
