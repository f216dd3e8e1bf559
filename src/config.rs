//! Host configuration.
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! port = 23979
//! dir = "./incoming"
//! max_message_size = 16777215
//! max_decompressed_size = 268435456
//!
//! [transformer]
//! name = "xor"
//! options = { key = "secret" }
//!
//! [validator]
//! name = "glob"
//! options = { allow = ["*.txt"] }
//!
//! [globals]
//! environment = "staging"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{HostError, Result};
use crate::host::codec::DEFAULT_MAX_MESSAGE_SIZE;
use crate::host::placement::normalize_path;
use crate::host::remote::Globals;
use crate::host::transform::DEFAULT_MAX_DECOMPRESSED_SIZE;

/// Default listening port
pub const DEFAULT_PORT: u16 = 23979;

/// Default bind address (all interfaces)
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// A transformer or validator reference: registry name plus its options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub port: u16,
    pub bind_address: String,
    /// Root directory for received files; relative paths resolve against
    /// the workspace root
    pub dir: PathBuf,
    pub max_message_size: u32,
    /// Cap on gunzipped payload size
    pub max_decompressed_size: u64,
    /// Restores file payload bytes
    pub transformer: Option<ModuleConfig>,
    /// Restores the whole JSON envelope
    pub message_transformer: Option<ModuleConfig>,
    pub validator: Option<ModuleConfig>,
    pub globals: Globals,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            dir: PathBuf::from("./"),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
            transformer: None,
            message_transformer: None,
            validator: None,
            globals: Globals::new(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: HostConfig =
            toml::from_str(text).map_err(|e| HostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(HostError::Config(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.max_decompressed_size == 0 {
            return Err(HostError::Config(
                "max_decompressed_size must be greater than zero".to_string(),
            ));
        }
        if self.bind_address.trim().is_empty() {
            return Err(HostError::Config("bind_address is empty".to_string()));
        }
        Ok(())
    }

    /// Absolute root directory: `~` expanded, relative paths joined onto
    /// `workspace`.
    pub fn resolve_dir(&self, workspace: &Path) -> PathBuf {
        let dir = expand_tilde(&self.dir);
        if dir.is_absolute() {
            normalize_path(&dir)
        } else {
            normalize_path(&workspace.join(dir))
        }
    }

    pub fn listen_address(&self) -> String {
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, self.port)
        } else {
            format!("{}:{}", self.bind_address, self.port)
        }
    }
}

/// `~` or a leading `~/` component becomes the home directory. `~user`
/// forms are left alone.
fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) if rest.as_os_str().is_empty() => home,
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::from_toml("").unwrap();
        assert_eq!(config.port, 23979);
        assert_eq!(config.max_message_size, 16_777_215);
        assert_eq!(config.max_decompressed_size, 256 * 1024 * 1024);
        assert_eq!(config.dir, PathBuf::from("./"));
        assert!(config.transformer.is_none());
        assert!(config.validator.is_none());
        assert_eq!(config.listen_address(), "0.0.0.0:23979");
    }

    #[test]
    fn test_full_config() {
        let config = HostConfig::from_toml(
            r#"
            port = 5000
            bind_address = "::1"
            dir = "incoming"
            max_message_size = 1024

            [transformer]
            name = "xor"
            options = { key = "secret" }

            [message_transformer]
            name = "base64"

            [validator]
            name = "glob"
            options = { allow = ["*.txt"], deny = ["tmp/**"] }

            [globals]
            stage = "prod"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.listen_address(), "[::1]:5000");
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(
            config.transformer,
            Some(ModuleConfig::new("xor").with_options(serde_json::json!({"key": "secret"})))
        );
        assert_eq!(config.message_transformer, Some(ModuleConfig::new("base64")));
        assert_eq!(
            config.validator.as_ref().unwrap().options["allow"],
            serde_json::json!(["*.txt"])
        );
        assert_eq!(config.globals["stage"], serde_json::json!("prod"));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            HostConfig::from_toml("max_message_size = 0"),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            HostConfig::from_toml("max_decompressed_size = 0"),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            HostConfig::from_toml("port = \"not a number\""),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            HostConfig::from_toml("unknown_key = 1"),
            Err(HostError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_dir() {
        let workspace = Path::new("/work/space");
        let mut config = HostConfig::default();
        assert_eq!(config.resolve_dir(workspace), PathBuf::from("/work/space"));

        config.dir = PathBuf::from("out/../deploy");
        assert_eq!(
            config.resolve_dir(workspace),
            PathBuf::from("/work/space/deploy")
        );

        config.dir = PathBuf::from("/abs/dir");
        assert_eq!(config.resolve_dir(workspace), PathBuf::from("/abs/dir"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = match dirs::home_dir() {
            Some(home) => home,
            None => return,
        };
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(expand_tilde(Path::new("~/deploy")), home.join("deploy"));
        assert_eq!(expand_tilde(Path::new("~other/x")), Path::new("~other/x"));
        assert_eq!(expand_tilde(Path::new("/srv/~/x")), Path::new("/srv/~/x"));
    }
}
