//! Command-line options for the `deploy-host` binary.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::HostConfig;
use crate::error::Result;

/// Receive deployed files on a TCP port and write them below a directory
#[derive(Clone, Debug, Parser)]
#[command(name = "deploy-host", version)]
pub struct HostOpts {
    /// TOML configuration file
    #[arg(short, long, env = "DEPLOY_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on [default: 23979]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind [default: 0.0.0.0]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory for received files [default: ./]
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Largest accepted message in bytes [default: 16777215]
    #[arg(long)]
    pub max_message_size: Option<u32>,

    /// Largest gunzipped payload in bytes [default: 268435456]
    #[arg(long)]
    pub max_decompressed_size: Option<u64>,

    /// Workspace root relative paths resolve against [default: current dir]
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl HostOpts {
    /// Config file (or defaults) with command-line flags applied on top.
    pub fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(dir) = &self.dir {
            config.dir = dir.clone();
        }
        if let Some(max) = self.max_message_size {
            config.max_message_size = max;
        }
        if let Some(max) = self.max_decompressed_size {
            config.max_decompressed_size = max;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "deploy_host=info",
            1 => "deploy_host=debug",
            _ => "deploy_host=trace",
        }
    }
}
