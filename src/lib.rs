//! deploy-host: receiving end of workspace file deployment.
//!
//! A [`DeployHost`] listens on a TCP port, reads one length-prefixed message
//! per connection and writes the file it carries below a root directory.

pub mod cli;
pub mod config;
pub mod error;
pub mod host;

pub use config::{HostConfig, ModuleConfig, DEFAULT_PORT};
pub use error::{ErrorKind, HostError, Result};
pub use host::{DeployHost, FileOutcome, HostStats, ModuleRegistry};
