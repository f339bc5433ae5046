//! Line capture from a service's output pipes

use crate::runtime::process::ServiceHandle;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    /// Primary output (stdout)
    Stdout,
    /// Error output (stderr)
    Stderr,
    /// Notice emitted by the supervisor itself
    Supervisor,
}

impl StreamTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamTag::Stdout => "out",
            StreamTag::Stderr => "err",
            StreamTag::Supervisor => "panel",
        }
    }
}

/// One captured line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub service: String,
    pub stream: StreamTag,
    pub text: String,
}

impl LogLine {
    pub fn new(service: impl Into<String>, stream: StreamTag, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            service: service.into(),
            stream,
            text: text.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} {}] {}",
            self.service,
            self.timestamp.format("%H:%M:%S"),
            self.stream.as_str(),
            self.text
        )
    }
}

/// Receives captured lines. Called from reader tasks, so it must not block.
pub trait LogSink: Send + Sync {
    fn on_line(&self, line: LogLine);
}

impl<F> LogSink for F
where
    F: Fn(LogLine) + Send + Sync,
{
    fn on_line(&self, line: LogLine) {
        self(line)
    }
}

/// How a detach finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// Every reader finished; total lines delivered
    Drained { lines: u64 },
    /// At least one reader was stuck and its pipe was closed forcibly
    ForcedClose,
}

/// Reader tasks attached to one service's output streams
pub struct LogStreamer {
    service: String,
    cancel: watch::Sender<()>,
    readers: Vec<JoinHandle<u64>>,
}

impl LogStreamer {
    /// Start one reader per output stream of `handle`
    pub fn attach(handle: &mut ServiceHandle, sink: Arc<dyn LogSink>) -> Self {
        let stdout = handle.take_stdout();
        let stderr = handle.take_stderr();
        Self::from_readers(handle.service.clone(), stdout, stderr, sink)
    }

    /// Start readers over arbitrary byte streams
    pub fn from_readers<O, E>(
        service: impl Into<String>,
        stdout: Option<O>,
        stderr: Option<E>,
        sink: Arc<dyn LogSink>,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let service = service.into();
        let (cancel, cancel_rx) = watch::channel(());
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(pump(
                service.clone(),
                StreamTag::Stdout,
                stdout,
                sink.clone(),
                cancel_rx.clone(),
            )));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(pump(
                service.clone(),
                StreamTag::Stderr,
                stderr,
                sink,
                cancel_rx,
            )));
        }

        Self {
            service,
            cancel,
            readers,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// All readers have reached end-of-file
    pub fn is_finished(&self) -> bool {
        self.readers.iter().all(|r| r.is_finished())
    }

    /// Stop the readers.
    ///
    /// Bytes already sitting in a pipe are still delivered. Readers that do not
    /// finish within `timeout` are aborted, which drops and closes their pipe.
    pub async fn detach(mut self, timeout: Duration) -> DetachOutcome {
        let _ = self.cancel.send(());

        let deadline = tokio::time::Instant::now() + timeout;
        let mut lines = 0;
        let mut forced = false;

        for mut reader in std::mem::take(&mut self.readers) {
            match tokio::time::timeout_at(deadline, &mut reader).await {
                Ok(Ok(count)) => lines += count,
                Ok(Err(e)) => log::debug!("[{}] Log reader ended abnormally: {}", self.service, e),
                Err(_) => {
                    log::warn!(
                        "[{}] Log reader unresponsive after {:?}, closing pipe",
                        self.service,
                        timeout
                    );
                    reader.abort();
                    forced = true;
                }
            }
        }

        if forced {
            DetachOutcome::ForcedClose
        } else {
            DetachOutcome::Drained { lines }
        }
    }
}

/// Forward lines from one stream until end-of-file or cancellation
async fn pump<R>(
    service: String,
    stream: StreamTag,
    reader: R,
    sink: Arc<dyn LogSink>,
    mut cancel: watch::Receiver<()>,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        tokio::select! {
            // pending data wins over cancellation so trailing output is drained
            biased;
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    sink.on_line(LogLine::new(&service, stream, decode_line(&buf)));
                    count += 1;
                }
                Err(e) => {
                    log::debug!("[{}] {} read error: {}", service, stream.as_str(), e);
                    break;
                }
            },
            _ = cancel.changed() => break,
        }
    }

    log::debug!("[{}] {} reader finished after {} lines", service, stream.as_str(), count);
    count
}

fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    type Collected = Arc<Mutex<Vec<LogLine>>>;

    fn collector() -> (Collected, Arc<dyn LogSink>) {
        let lines: Collected = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let sink: Arc<dyn LogSink> =
            Arc::new(move |line: LogLine| sink_lines.lock().unwrap().push(line));
        (lines, sink)
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\xffbad\n"), "\u{fffd}bad");
    }

    #[tokio::test]
    async fn test_lines_in_order_and_partial_tail() {
        let (lines, sink) = collector();
        let (mut writer, reader) = tokio::io::duplex(64);
        let streamer =
            LogStreamer::from_readers("agent", Some(reader), None::<tokio::io::Empty>, sink);

        for i in 0..200 {
            writer.write_all(format!("line {}\n", i).as_bytes()).await.unwrap();
        }
        writer.write_all(b"no newline").await.unwrap();
        drop(writer);

        let outcome = streamer.detach(Duration::from_secs(5)).await;
        assert_eq!(outcome, DetachOutcome::Drained { lines: 201 });

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 201);
        for (i, line) in lines.iter().take(200).enumerate() {
            assert_eq!(line.text, format!("line {}", i));
            assert_eq!(line.stream, StreamTag::Stdout);
            assert_eq!(line.service, "agent");
        }
        assert_eq!(lines[200].text, "no newline");
    }

    #[tokio::test]
    async fn test_detach_stuck_reader_is_bounded() {
        let (_lines, sink) = collector();
        // Writer stays open, so the reader never sees end-of-file
        let (_writer, reader) = tokio::io::duplex(64);
        let streamer =
            LogStreamer::from_readers("store", None::<tokio::io::Empty>, Some(reader), sink);
        assert!(!streamer.is_finished());

        let started = std::time::Instant::now();
        let outcome = streamer.detach(Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        // cancellation reaches an idle reader well before the deadline
        assert_eq!(outcome, DetachOutcome::Drained { lines: 0 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detach_forces_close_on_busy_reader() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        // a sink that holds the reader inside on_line well past the deadline
        let sink: Arc<dyn LogSink> = Arc::new(move |_line: LogLine| {
            let _ = entered_tx.lock().unwrap().send(());
            std::thread::sleep(Duration::from_millis(800));
        });
        let (mut writer, reader) = tokio::io::duplex(64);
        let streamer =
            LogStreamer::from_readers("store", Some(reader), None::<tokio::io::Empty>, sink);

        writer.write_all(b"first\n").await.unwrap();
        tokio::task::spawn_blocking(move || entered_rx.recv().unwrap())
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let outcome = streamer.detach(Duration::from_millis(100)).await;
        assert_eq!(outcome, DetachOutcome::ForcedClose);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn test_display() {
        let line = LogLine::new("store", StreamTag::Stderr, "ready");
        let text = line.to_string();
        assert!(text.starts_with("[store "));
        assert!(text.ends_with(" err] ready"));
    }
}
