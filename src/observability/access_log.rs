//! Access log.
//!
//! Every connection produces exactly one [`LogEntry`]. Entries travel over a
//! small bounded channel to a single writer task, so lines are appended in
//! the order connections finish. A full channel makes the finishing
//! connection task wait; the accept loop never blocks on logging.

use chrono::{DateTime, SecondsFormat, Utc};
use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::schema::LogDestination;

/// Capacity of the entry queue.
pub const QUEUE_CAPACITY: usize = 10;

/// One access log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub remote_addr: IpAddr,
    /// Request line, or "-" when none was read.
    pub request: String,
    /// Status code sent, 0 when none was sent.
    pub status: u8,
}

impl LogEntry {
    pub fn new(remote_addr: IpAddr) -> Self {
        Self {
            time: Utc::now(),
            remote_addr,
            request: "-".to_string(),
            status: 0,
        }
    }

    /// Tab-separated line, newline terminated.
    pub fn format_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\n",
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.remote_addr,
            self.request,
            self.status
        )
    }
}

/// Producer handle shared by all connection tasks.
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    tx: Option<mpsc::Sender<LogEntry>>,
}

impl AccessLog {
    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Open `destination` and start its writer task.
    pub async fn open(destination: &LogDestination) -> io::Result<(Self, Option<JoinHandle<()>>)> {
        match destination {
            LogDestination::Disabled => Ok((Self::disabled(), None)),
            LogDestination::Stdout => {
                let (log, task) = Self::spawn_writer(tokio::io::stdout());
                Ok((log, Some(task)))
            }
            LogDestination::Stderr => {
                let (log, task) = Self::spawn_writer(tokio::io::stderr());
                Ok((log, Some(task)))
            }
            LogDestination::File(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                let (log, task) = Self::spawn_writer(file);
                Ok((log, Some(task)))
            }
        }
    }

    /// Start a writer task draining entries into `writer`.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn_writer<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(write_entries(rx, writer));
        (Self { tx: Some(tx) }, task)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `entry`, waiting while the queue is full.
    pub async fn record(&self, entry: LogEntry) {
        if let Some(tx) = &self.tx {
            if tx.send(entry).await.is_err() {
                tracing::warn!("Access log writer has stopped; entry dropped");
            }
        }
    }
}

async fn write_entries<W>(mut rx: mpsc::Receiver<LogEntry>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(entry) = rx.recv().await {
        let line = entry.format_line();
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!(error = %e, "Failed to write access log entry");
            continue;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!(error = %e, "Failed to flush access log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    #[test]
    fn formats_tab_separated_line() {
        let entry = LogEntry {
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            remote_addr: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            request: "gemini://example.org/".into(),
            status: 20,
        };
        assert_eq!(
            entry.format_line(),
            "2024-05-01T12:30:00Z\t192.0.2.1\tgemini://example.org/\t20\n"
        );
    }

    #[test]
    fn new_entries_start_unread() {
        let entry = LogEntry::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(entry.request, "-");
        assert_eq!(entry.status, 0);
    }

    #[tokio::test]
    async fn writes_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let (log, task) = AccessLog::open(&LogDestination::File(path.clone()))
            .await
            .unwrap();

        for status in [20, 51, 31] {
            let mut entry = LogEntry::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
            entry.status = status;
            log.record(entry).await;
        }
        drop(log);
        task.unwrap().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let statuses: Vec<&str> = content
            .lines()
            .map(|l| l.rsplit('\t').next().unwrap())
            .collect();
        assert_eq!(statuses, vec!["20", "51", "31"]);
    }

    #[tokio::test]
    async fn disabled_log_discards() {
        let log = AccessLog::disabled();
        assert!(!log.is_enabled());
        log.record(LogEntry::new(IpAddr::V4(Ipv4Addr::LOCALHOST))).await;
    }
}
