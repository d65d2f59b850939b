//! Child-process log tee
//!
//! While the proxy child starts up, its merged stdout/stderr is useful in
//! the foreground; once ready (or when quiet operation is wanted) the
//! foreground copy stops but every line keeps flowing to the log file.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

/// A line sink that always writes to a log file and optionally mirrors to a
/// foreground writer until [`HeadWriter::stop_out`] is called.
#[derive(Clone)]
pub struct HeadWriter {
    inner: Arc<Inner>,
}

struct Inner {
    file: Mutex<Box<dyn Write + Send>>,
    foreground: Mutex<Box<dyn Write + Send>>,
    mirroring: AtomicBool,
    prefix: String,
}

impl HeadWriter {
    /// Create a writer teeing to `file` and mirroring to `foreground`
    /// with a line prefix.
    pub fn new(
        file: impl Write + Send + 'static,
        foreground: impl Write + Send + 'static,
        prefix: &str,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                file: Mutex::new(Box::new(file)),
                foreground: Mutex::new(Box::new(foreground)),
                mirroring: AtomicBool::new(true),
                prefix: prefix.to_string(),
            }),
        }
    }

    /// Write one line to the log file, and to the foreground while
    /// mirroring is on.
    pub fn write_line(&self, line: &str) {
        if let Ok(mut file) = self.inner.file.lock() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!(error = %e, "failed to write child log line");
            }
        }

        if self.inner.mirroring.load(Ordering::Relaxed) {
            if let Ok(mut foreground) = self.inner.foreground.lock() {
                let _ = writeln!(foreground, "{}{line}", self.inner.prefix);
            }
        }
    }

    /// Stop mirroring to the foreground; the log file keeps receiving
    /// everything.
    pub fn stop_out(&self) {
        self.inner.mirroring.store(false, Ordering::Relaxed);
    }

    /// Pump lines from an async reader (a child's stdout or stderr) into
    /// this writer until EOF.
    pub async fn pump(self, reader: impl AsyncRead + Unpin) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            self.write_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A Write handle into a shared byte buffer.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lines_go_to_both_sinks_while_mirroring() {
        let file = SharedBuf::default();
        let foreground = SharedBuf::default();
        let writer = HeadWriter::new(file.clone(), foreground.clone(), "[proxy] ");

        writer.write_line("starting up");

        assert_eq!(file.contents(), "starting up\n");
        assert_eq!(foreground.contents(), "[proxy] starting up\n");
    }

    #[test]
    fn test_stop_out_keeps_file_only() {
        let file = SharedBuf::default();
        let foreground = SharedBuf::default();
        let writer = HeadWriter::new(file.clone(), foreground.clone(), "[proxy] ");

        writer.write_line("before");
        writer.stop_out();
        writer.write_line("after");

        assert_eq!(file.contents(), "before\nafter\n");
        assert_eq!(foreground.contents(), "[proxy] before\n");
    }

    #[tokio::test]
    async fn test_pump_reads_until_eof() {
        let file = SharedBuf::default();
        let foreground = SharedBuf::default();
        let writer = HeadWriter::new(file.clone(), foreground.clone(), "");

        let data: &[u8] = b"line one\nline two\n";
        writer.clone().pump(data).await;

        assert_eq!(file.contents(), "line one\nline two\n");
    }
}
