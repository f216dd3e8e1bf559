//! Accept/reject hooks run before a received file is written.

use anyhow::{bail, Context};
use async_trait::async_trait;
use glob::Pattern;
use std::path::PathBuf;

use crate::host::remote::{RemoteFile, ValidatorContext};

#[async_trait]
pub trait FileValidator: Send + Sync {
    /// Return `false` to drop the file. `ctx.target` may be reassigned to
    /// write the file somewhere else.
    async fn validate(&self, file: &RemoteFile, ctx: &mut ValidatorContext<'_>)
        -> anyhow::Result<bool>;
}

/// Default validator: every file is accepted where it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl FileValidator for AcceptAll {
    async fn validate(
        &self,
        _file: &RemoteFile,
        _ctx: &mut ValidatorContext<'_>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Allow/deny lists of glob patterns matched against the file name.
///
/// Deny wins. An empty allow list allows everything that is not denied.
#[derive(Debug, Clone, Default)]
pub struct GlobValidator {
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
}

impl GlobValidator {
    pub fn new(allow: &[&str], deny: &[&str]) -> anyhow::Result<Self> {
        Ok(Self {
            allow: compile(allow.iter().copied())?,
            deny: compile(deny.iter().copied())?,
        })
    }

    /// Options: `{ "allow": ["*.txt"], "deny": ["secret/**"] }`
    pub fn from_options(options: &serde_json::Value) -> anyhow::Result<Self> {
        let allow = string_list(options, "allow")?;
        let deny = string_list(options, "deny")?;
        Ok(Self {
            allow: compile(allow.iter().map(String::as_str))?,
            deny: compile(deny.iter().map(String::as_str))?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.deny.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|p| p.matches(name))
    }
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> anyhow::Result<Vec<Pattern>> {
    patterns
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid glob pattern '{}'", p)))
        .collect()
}

fn string_list(options: &serde_json::Value, key: &str) -> anyhow::Result<Vec<String>> {
    match options.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .with_context(|| format!("'{}' entries must be strings", key))
            })
            .collect(),
        Some(_) => bail!("'{}' must be a string or a list of strings", key),
    }
}

#[async_trait]
impl FileValidator for GlobValidator {
    async fn validate(
        &self,
        file: &RemoteFile,
        _ctx: &mut ValidatorContext<'_>,
    ) -> anyhow::Result<bool> {
        Ok(self.matches(&file.name))
    }
}

/// Accepts everything but writes it below another directory.
#[derive(Debug, Clone)]
pub struct RedirectValidator {
    dir: PathBuf,
}

impl RedirectValidator {
    /// `dir` may be relative; the pipeline resolves relative targets against
    /// the workspace root.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Options: `{ "dir": "incoming" }`
    pub fn from_options(options: &serde_json::Value) -> anyhow::Result<Self> {
        let dir = options
            .get("dir")
            .and_then(|d| d.as_str())
            .context("redirect validator requires a string 'dir' option")?;
        Ok(Self::new(dir))
    }
}

#[async_trait]
impl FileValidator for RedirectValidator {
    async fn validate(
        &self,
        file: &RemoteFile,
        ctx: &mut ValidatorContext<'_>,
    ) -> anyhow::Result<bool> {
        ctx.target = self.dir.join(&file.name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::remote::{Globals, RemoteClient};
    use std::path::Path;

    fn file(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            data: Vec::new(),
            is_compressed: false,
            nr: None,
            total_count: None,
            session: None,
            tag: None,
        }
    }

    #[test]
    fn test_glob_matching() {
        let v = GlobValidator::new(&["*.txt", "docs/**"], &["docs/private/**"]).unwrap();
        assert!(v.matches("a.txt"));
        assert!(v.matches("docs/readme.md"));
        assert!(!v.matches("docs/private/key.pem"));
        assert!(!v.matches("image.png"));

        let deny_only = GlobValidator::new(&[], &["*.exe"]).unwrap();
        assert!(deny_only.matches("tool.sh"));
        assert!(!deny_only.matches("tool.exe"));
    }

    #[test]
    fn test_glob_options() {
        let v = GlobValidator::from_options(&serde_json::json!({"allow": "*.rs"})).unwrap();
        assert!(v.matches("main.rs"));
        assert!(!v.matches("main.c"));

        assert!(GlobValidator::from_options(&serde_json::json!({"allow": 5})).is_err());
        assert!(GlobValidator::from_options(&serde_json::json!({"deny": ["[" ]})).is_err());
    }

    #[tokio::test]
    async fn test_redirect_rewrites_target() {
        let remote = RemoteClient {
            address: "10.0.0.2".to_string(),
            port: 9000,
        };
        let globals = Globals::new();
        let mut ctx = ValidatorContext {
            target: PathBuf::from("/root/a/b.txt"),
            remote: &remote,
            globals: &globals,
        };

        let v = RedirectValidator::new("/srv/incoming");
        assert!(v.validate(&file("a/b.txt"), &mut ctx).await.unwrap());
        assert_eq!(ctx.target, Path::new("/srv/incoming/a/b.txt"));
    }

    #[tokio::test]
    async fn test_accept_all_keeps_target() {
        let remote = RemoteClient {
            address: "10.0.0.2".to_string(),
            port: 9000,
        };
        let globals = Globals::new();
        let mut ctx = ValidatorContext {
            target: PathBuf::from("/root/x"),
            remote: &remote,
            globals: &globals,
        };
        assert!(AcceptAll.validate(&file("x"), &mut ctx).await.unwrap());
        assert_eq!(ctx.target, Path::new("/root/x"));
    }
}
