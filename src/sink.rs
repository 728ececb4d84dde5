//! Result sinks: where a finished job's output records go.

use std::io::Write;

use anyhow::Result;

/// Receives output records one at a time. Formatting is up to the sink.
pub trait ResultSink {
    fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
}

impl<F> ResultSink for F
where
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self(key, value)
    }
}

/// Writes `key<TAB>value` lines, the Hadoop streaming output format.
pub struct LineSink<W: Write> {
    writer: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ResultSink for LineSink<W> {
    fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer.write_all(key)?;
        self.writer.write_all(b"\t")?;
        self.writer.write_all(value)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}
