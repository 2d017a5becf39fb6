//! File transport over `scp`.
//!
//! Every node keeps its replicas in the same store directory, so a file's
//! remote path is the store directory joined with its catalog name.

use async_trait::async_trait;
use ring_core::file_transport::{FileTransport, FileTransportError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Options for the `scp` invocations.
#[derive(Debug, Clone, Default)]
pub struct ScpOptions {
    /// Remote login user (defaults to the local user)
    pub user: Option<String>,
    /// Private key passed with `-i`
    pub identity: Option<PathBuf>,
}

/// Copies files to and from peers' store directories with `scp`.
pub struct ScpTransport {
    store_dir: PathBuf,
    options: ScpOptions,
}

impl ScpTransport {
    pub fn new(store_dir: impl Into<PathBuf>, options: ScpOptions) -> Self {
        Self {
            store_dir: store_dir.into(),
            options,
        }
    }

    /// `[user@]host:path` for a remote file. Drops any port from `ip:port` hosts.
    fn remote(&self, host: &str, path: &str) -> String {
        let host = match host.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => host.to_string(),
        };
        match &self.options.user {
            Some(user) => format!("{}@{}:{}", user, host, path),
            None => format!("{}:{}", host, path),
        }
    }

    fn stored(&self, name: &str) -> String {
        self.store_dir.join(name).display().to_string()
    }

    /// Arguments for `scp` copying `from` to `to`.
    fn args(&self, from: String, to: String) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(identity) = &self.options.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(from);
        args.push(to);
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        debug!("scp {}", args.join(" "));
        let output = Command::new("scp")
            .args(&args)
            .output()
            .await
            .map_err(|e| FileTransportError::CopyFailed(format!("cannot run scp: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(FileTransportError::CopyFailed(format!(
                "scp exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl FileTransport for ScpTransport {
    async fn copy(&self, name: &str, target: &str) -> Result<()> {
        let local = self.stored(name);
        let remote = self.remote(target, &local);
        self.run(self.args(local, remote)).await
    }

    async fn fetch(&self, source: &str, name: &str, dest: &str) -> Result<()> {
        let remote = self.remote(source, &self.stored(name));
        self.run(self.args(remote, dest.to_string())).await
    }
}
