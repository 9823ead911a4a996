//! Local sandbox provider.
//!
//! Each sandbox is a working directory under a root path; commands run as
//! child processes inside it.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LogEvent, LogStream};
use crate::domain::ports::{SandboxCommand, SandboxProvider};

/// Name of the marker file recording the snapshot a sandbox came from.
const SNAPSHOT_MARKER: &str = ".snapshot";

pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sandbox_dir(&self, provider_ref: &str) -> DomainResult<PathBuf> {
        // Refs are generated by `create`; refuse anything that could escape the root
        if provider_ref.is_empty() || provider_ref.contains(['/', '\\']) || provider_ref.starts_with('.') {
            return Err(DomainError::ProviderError(format!(
                "Invalid sandbox reference: {provider_ref}"
            )));
        }
        Ok(self.root.join(provider_ref))
    }
}

/// Drain one buffered line, lossily decoded and without its line ending.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Some(line)
}

/// The receiver went away: nobody is listening, so stop the child.
async fn abandon(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill abandoned sandbox command");
    } else {
        tracing::debug!("sandbox command killed after its receiver was dropped");
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn is_available(&self) -> DomainResult<bool> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DomainError::ConfigError(format!("Sandbox root {} unusable: {e}", self.root.display())))?;
        Ok(true)
    }

    async fn create(&self, snapshot: &str) -> DomainResult<String> {
        let provider_ref = format!("sb-{}", Uuid::new_v4().simple());
        let dir = self.sandbox_dir(&provider_ref)?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DomainError::ProvisionFailed(format!("{}: {e}", dir.display())))?;
        tokio::fs::write(dir.join(SNAPSHOT_MARKER), snapshot)
            .await
            .map_err(|e| DomainError::ProvisionFailed(format!("{}: {e}", dir.display())))?;

        tracing::debug!(provider_ref = %provider_ref, snapshot, "local sandbox created");
        Ok(provider_ref)
    }

    async fn execute(
        &self,
        provider_ref: &str,
        command: &SandboxCommand,
    ) -> DomainResult<mpsc::Receiver<LogEvent>> {
        let dir = self.sandbox_dir(provider_ref)?;
        if !dir.is_dir() {
            return Err(DomainError::ProviderError(format!(
                "Sandbox {provider_ref} does not exist"
            )));
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DomainError::ProviderError(format!("Failed to spawn {}: {e}", command.program))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::ProviderError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::ProviderError("Failed to capture stderr".to_string()))?;

        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            let mut stderr = BufReader::new(stderr);
            // Partial lines survive a lost select race; read_until keeps appending
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                let read = tokio::select! {
                    n = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                        Some((LogStream::Stdout, matches!(n, Ok(n) if n > 0)))
                    }
                    n = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                        Some((LogStream::Stderr, matches!(n, Ok(n) if n > 0)))
                    }
                    () = tx.closed() => None,
                };

                let Some((stream, open)) = read else {
                    abandon(&mut child).await;
                    return;
                };
                let buf = if stream == LogStream::Stdout {
                    stdout_open = open;
                    &mut stdout_buf
                } else {
                    stderr_open = open;
                    &mut stderr_buf
                };

                if let Some(line) = take_line(buf) {
                    if tx.send(LogEvent::Line { stream, line }).await.is_err() {
                        abandon(&mut child).await;
                        return;
                    }
                }
            }

            let status = tokio::select! {
                status = child.wait() => Some(status),
                () = tx.closed() => None,
            };
            let code = match status {
                Some(Ok(status)) => status.code().unwrap_or(-1),
                Some(Err(e)) => {
                    let _ = tx
                        .send(LogEvent::Line { stream: LogStream::System, line: e.to_string() })
                        .await;
                    -1
                }
                None => {
                    abandon(&mut child).await;
                    return;
                }
            };
            let _ = tx.send(LogEvent::Exit { code }).await;
        });

        Ok(rx)
    }

    async fn destroy(&self, provider_ref: &str) -> DomainResult<()> {
        let dir = self.sandbox_dir(provider_ref)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::ProviderError(format!("{}: {e}", dir.display()))),
        }
    }
}
