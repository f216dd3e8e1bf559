//! Deploy host: receives files pushed by remote senders over raw TCP.
//!
//! # Architecture
//!
//! ```text
//! +-----------+     +--------------+     +-----------------------------+
//! |  Listener | --> |  Connection  | --> |  Pipeline                   |
//! | (accept)  |     | (read, close)|     | (restore, parse, gunzip,    |
//! +-----------+     +--------------+     |  restore, validate, place)  |
//!                                        +-----------------------------+
//! ```
//!
//! # Wire format
//!
//! `len:u32 (little-endian) | body`, one message per connection. The body is
//! a JSON envelope describing one [`RemoteFile`]. The host never answers;
//! outcomes are only visible locally (logs, [`FileOutcome`] channel).

pub mod codec;
pub mod connection;
pub mod frame;
pub mod pipeline;
pub mod placement;
pub mod registry;
pub mod remote;
pub mod transform;
pub mod validator;

pub use codec::{encode_message, read_message, DEFAULT_MAX_MESSAGE_SIZE};
pub use connection::{ConnectionHandler, FileOutcome, HostStats};
pub use pipeline::{ConnectionState, Pipeline, ProcessingContext, Stage, STAGES};
pub use registry::ModuleRegistry;
pub use remote::{
    Globals, RemoteClient, RemoteFile, TransformContext, TransformMode, ValidatorContext,
};
pub use transform::DataTransformer;
pub use validator::FileValidator;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::HostConfig;
use crate::error::{HostError, Result};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct RunningHost {
    local_addr: SocketAddr,
    root: PathBuf,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Listens for deployed files and writes them below a root directory.
///
/// Configuration is captured when [`start`](Self::start) runs; changes made
/// with [`set_config`](Self::set_config) apply on the next start.
pub struct DeployHost {
    config: Mutex<HostConfig>,
    workspace: PathBuf,
    registry: ModuleRegistry,
    globals: Globals,
    outcomes: Option<mpsc::UnboundedSender<FileOutcome>>,
    stats: Arc<Mutex<HostStats>>,
    running: tokio::sync::Mutex<Option<RunningHost>>,
}

impl DeployHost {
    pub fn new(config: HostConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config: Mutex::new(config),
            workspace: workspace.into(),
            registry: ModuleRegistry::with_builtins(),
            globals: Globals::new(),
            outcomes: None,
            stats: Arc::new(Mutex::new(HostStats::new())),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Extra global variables; they win over `[globals]` from the config.
    pub fn with_globals(mut self, globals: Globals) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Receive a [`FileOutcome`] for every finished connection.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<FileOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Replace the configuration used by the next `start()`.
    pub fn set_config(&self, config: HostConfig) -> Result<()> {
        *self.config.lock().map_err(config_poisoned)? = config;
        Ok(())
    }

    pub fn config(&self) -> Result<HostConfig> {
        Ok(self.config.lock().map_err(config_poisoned)?.clone())
    }

    pub fn stats(&self) -> HostStats {
        // Counters stay meaningful even if a recorder panicked
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Address actually bound (useful with port 0).
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Root directory of the running host.
    pub async fn root_dir(&self) -> Option<PathBuf> {
        self.running.lock().await.as_ref().map(|r| r.root.clone())
    }

    /// Start listening. Returns once the socket is bound; a no-op when
    /// already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let config = self.config()?;
        config.validate()?;

        let handler = self.build_handler(&config)?;
        let root = handler.root().to_path_buf();

        let address = config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| HostError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| HostError::Bind {
            address: address.clone(),
            source,
        })?;

        tracing::info!(
            "Deploy host listening on {} (root {})",
            local_addr,
            root.display()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, Arc::new(handler), shutdown_rx));

        *running = Some(RunningHost {
            local_addr,
            root,
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Stop listening. In-flight connections finish on their own; a no-op
    /// when not running.
    pub async fn stop(&self) -> Result<()> {
        let Some(host) = self.running.lock().await.take() else {
            return Ok(());
        };

        let _ = host.shutdown.send(());
        host.task
            .await
            .map_err(|e| HostError::Shutdown(e.to_string()))?;

        tracing::info!("Deploy host on {} stopped", host.local_addr);
        Ok(())
    }

    fn build_handler(&self, config: &HostConfig) -> Result<ConnectionHandler> {
        let mut globals = config.globals.clone();
        globals.extend(self.globals.clone());

        let pipeline = Pipeline {
            root: config.resolve_dir(&self.workspace),
            workspace: self.workspace.clone(),
            message_transformer: self
                .registry
                .transformer(config.message_transformer.as_ref())?,
            file_transformer: self.registry.transformer(config.transformer.as_ref())?,
            validator: self.registry.validator(config.validator.as_ref())?,
            globals: Arc::new(globals),
            max_decompressed_size: config.max_decompressed_size,
        };

        Ok(ConnectionHandler::new(
            pipeline,
            config.max_message_size,
            Arc::clone(&self.stats),
            self.outcomes.clone(),
        ))
    }
}

fn config_poisoned<T>(_: PoisonError<T>) -> HostError {
    HostError::Config("configuration lock poisoned".to_string())
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Connection from {}", peer);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handler.handle(stream, RemoteClient::from(peer)).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}
