//! One accepted connection: read a single message, close, process, report.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::{HostError, Result};
use crate::host::codec::read_message;
use crate::host::pipeline::{ConnectionState, Pipeline, ProcessingContext};
use crate::host::placement::ensure_root_dir;
use crate::host::remote::RemoteClient;

/// Counters over the lifetime of a host.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostStats {
    /// Files written to disk
    pub files_ok: u64,

    /// Files a validator said no to
    pub files_rejected: u64,

    /// Files that failed after the message was read
    pub files_failed: u64,

    /// Connections that ended before a file name was known
    pub protocol_errors: u64,

    /// Total bytes written
    pub bytes_written: u64,
}

impl HostStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: &FileOutcome) {
        match &outcome.result {
            Ok(_) => {
                self.files_ok += 1;
                self.bytes_written += outcome.bytes_written;
            }
            Err(e) if e.is_rejection() => self.files_rejected += 1,
            Err(_) if outcome.name.is_none() => self.protocol_errors += 1,
            Err(_) => self.files_failed += 1,
        }
    }
}

/// What happened to one connection.
#[derive(Debug)]
pub struct FileOutcome {
    pub remote: RemoteClient,
    /// File name, once the envelope was parsed
    pub name: Option<String>,
    pub nr: Option<u64>,
    pub total_count: Option<u64>,
    pub session: Option<String>,
    /// Last state reached before completion
    pub state: ConnectionState,
    pub bytes_written: u64,
    /// Where the file was written
    pub result: std::result::Result<PathBuf, HostError>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    fn label(&self) -> String {
        let progress = match (self.nr, self.total_count) {
            (Some(nr), Some(total)) => format!(" ({}/{})", nr, total),
            (Some(nr), None) => format!(" (#{})", nr),
            _ => String::new(),
        };
        match &self.name {
            Some(name) => format!("'{}'{} from {}", name, progress, self.remote),
            None => format!("connection from {}", self.remote),
        }
    }
}

/// Shared by every connection of a running host.
pub struct ConnectionHandler {
    pipeline: Pipeline,
    max_message_size: u32,
    stats: Arc<Mutex<HostStats>>,
    outcomes: Option<mpsc::UnboundedSender<FileOutcome>>,
}

impl ConnectionHandler {
    pub fn new(
        pipeline: Pipeline,
        max_message_size: u32,
        stats: Arc<Mutex<HostStats>>,
        outcomes: Option<mpsc::UnboundedSender<FileOutcome>>,
    ) -> Self {
        Self {
            pipeline,
            max_message_size,
            stats,
            outcomes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.pipeline.root
    }

    /// Handle one connection from accept to completion.
    pub async fn handle<S>(&self, stream: S, remote: RemoteClient)
    where
        S: AsyncRead + Unpin,
    {
        let outcome = self.process(stream, remote).await;
        self.complete(outcome);
    }

    pub async fn process<S>(&self, stream: S, remote: RemoteClient) -> FileOutcome
    where
        S: AsyncRead + Unpin,
    {
        let mut ctx = ProcessingContext::new(&remote);
        let result = self.receive(stream, &mut ctx).await;

        let file = ctx.file.as_ref();
        FileOutcome {
            remote: remote.clone(),
            name: file.map(|f| f.name.clone()),
            nr: file.and_then(|f| f.nr),
            total_count: file.and_then(|f| f.total_count),
            session: file.and_then(|f| f.session.clone()),
            state: ctx.state,
            bytes_written: ctx.bytes_written,
            result: result.and_then(|()| {
                ctx.target
                    .clone()
                    .ok_or_else(|| HostError::Protocol("no target resolved".to_string()))
            }),
        }
    }

    async fn receive<S>(&self, mut stream: S, ctx: &mut ProcessingContext<'_>) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        // Not cached: the directory may vanish between connections
        ensure_root_dir(&self.pipeline.root).await?;
        ctx.state = ConnectionState::DirectoryChecked;

        let message = read_message(&mut stream, self.max_message_size).await?;
        ctx.state = ConnectionState::FrameRead;

        // One message per connection; close before the slow part
        drop(stream);

        ctx.message = message.to_vec();
        ctx.state = ConnectionState::MessageDecoded;

        self.pipeline.run(ctx).await
    }

    fn complete(&self, mut outcome: FileOutcome) {
        let label = outcome.label();
        match &outcome.result {
            Ok(target) => tracing::info!("{}: deployed to {}", label, target.display()),
            Err(e) if e.is_rejection() => tracing::warn!("{}: {}", label, e),
            Err(e) => tracing::warn!("{}: failed at {}: {}", label, outcome.state, e),
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.record(&outcome);
        }

        outcome.state = ConnectionState::Completed;
        if let Some(tx) = &self.outcomes {
            // Receiver gone just means nobody is listening any more
            let _ = tx.send(outcome);
        }
    }
}
