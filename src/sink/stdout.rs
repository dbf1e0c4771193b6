use std::io::Write;
use std::sync::Mutex;

use anyhow::Result;

use super::{LogRecord, Sink};

/// Line-delimited JSON on stdout: one record per line, flushed immediately.
/// A `Mutex` serialises writes so concurrent workers never interleave
/// partial lines.
pub struct StdoutSink {
    lock: Mutex<()>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Sink for StdoutSink {
    async fn store(&self, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.lock.lock().unwrap();
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(line.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
        Ok(())
    }
}
