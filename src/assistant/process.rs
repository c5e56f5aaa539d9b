//! Assistant subprocess lifecycle management.
//!
//! Handles spawning the assistant CLI, decoding the NDJSON event stream
//! from stdout, writing commands to stdin, capturing stderr for
//! diagnostics, and graceful/forceful shutdown.

use crate::assistant::{AssistantCommand, AssistantEvent};
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Maximum bytes to capture from the assistant's stderr stream.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Options for one session's assistant launch.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub working_dir: PathBuf,
    /// Server-side session id to continue, set when resuming.
    pub resume_session_id: Option<String>,
    pub skip_permissions: bool,
    pub force_interactive: bool,
}

/// A running assistant subprocess with piped I/O handles.
pub struct AssistantProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    /// Background task capturing stderr (capped at [`MAX_STDERR_BYTES`]).
    stderr_task: JoinHandle<String>,
    reader_task: JoinHandle<()>,
}

impl AssistantProcess {
    /// Spawn the assistant CLI and return the process plus its decoded
    /// event stream.
    pub fn spawn(
        config: &AssistantConfig,
        options: &SpawnOptions,
    ) -> Result<(Self, mpsc::Receiver<AssistantEvent>)> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if options.working_dir.as_os_str().is_empty() {
            cmd.current_dir(Path::new("."));
        } else {
            cmd.current_dir(&options.working_dir);
        }
        if let Some(session_id) = &options.resume_session_id {
            cmd.arg("--resume").arg(session_id);
        }
        if options.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        if options.force_interactive {
            cmd.arg("--permission-mode").arg("interactive");
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| AssistantError::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Capture stderr in a background task for diagnostics on failure.
        let stderr_task = tokio::spawn(async move {
            let Some(stderr) = stderr else {
                return String::new();
            };
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::with_capacity(4096);
            loop {
                let mut chunk = [0u8; 4096];
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let remaining = MAX_STDERR_BYTES.saturating_sub(buf.len());
                        if remaining == 0 {
                            continue; // drain but don't store
                        }
                        buf.extend_from_slice(&chunk[..n.min(remaining)]);
                    }
                    Err(_) => break,
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let (event_tx, event_rx) = mpsc::channel(256);
        let reader_task = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AssistantEvent>(line) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, "skipping undecodable assistant line");
                    }
                }
            }
        });

        Ok((
            Self {
                child,
                stdin,
                stderr_task,
                reader_task,
            },
            event_rx,
        ))
    }

    /// Write a command to the assistant's stdin as one JSON line.
    pub async fn send(&mut self, command: &AssistantCommand) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(AssistantError::StdinClosed)?;
        let mut line = serde_json::to_string(command)
            .map_err(|e| AssistantError::Other(e.into()))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| AssistantError::StdinClosed)?;
        stdin.flush().await.map_err(|_| AssistantError::StdinClosed)?;
        Ok(())
    }

    /// Send SIGINT to interrupt the current turn without ending the session.
    pub fn interrupt(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGINT);
            }
        }
    }

    /// Send SIGTERM to the assistant, wait briefly, then SIGKILL if needed.
    pub async fn kill(&mut self) {
        self.reader_task.abort();

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(std::time::Duration::from_secs(3), self.child.wait()).await {
            Ok(_) => (),
            Err(_) => {
                let _ = self.child.kill().await;
            }
        }
    }

    /// Collect captured stderr output. Useful for error diagnostics.
    ///
    /// This consumes the stderr task handle. Returns an empty string if
    /// stderr capture has already been consumed or the task panicked.
    pub async fn stderr_output(&mut self) -> String {
        (&mut self.stderr_task).await.unwrap_or_default()
    }

    /// Check if the subprocess has exited.
    pub fn try_wait(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::{AssistantProcess, SpawnOptions};
    use crate::assistant::AssistantEvent;
    use crate::config::AssistantConfig;

    fn echo_config(script: &str) -> AssistantConfig {
        AssistantConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..AssistantConfig::default()
        }
    }

    #[tokio::test]
    async fn decodes_events_and_skips_garbage() {
        let config = echo_config(
            r#"printf '%s\n' '{"type":"assistant","text":"hi"}' 'not json' '{"type":"result"}'"#,
        );
        let options = SpawnOptions {
            working_dir: std::env::temp_dir(),
            ..SpawnOptions::default()
        };
        let (_process, mut events) = AssistantProcess::spawn(&config, &options).unwrap();

        assert_eq!(
            events.recv().await,
            Some(AssistantEvent::Assistant { text: "hi".into() })
        );
        assert_eq!(
            events.recv().await,
            Some(AssistantEvent::Result { duration_ms: None })
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn kill_reaps_the_child() {
        let config = echo_config("sleep 30");
        let options = SpawnOptions {
            working_dir: std::env::temp_dir(),
            ..SpawnOptions::default()
        };
        let (mut process, _events) = AssistantProcess::spawn(&config, &options).unwrap();
        process.kill().await;
        assert!(process.try_wait().is_some());
    }
}
