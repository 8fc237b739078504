//! Starts the game client once a download has finished.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use hearth_lib::game::installer::{GameState, LaunchHandoff, LaunchRequest, ProgressSink};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

pub const USER_DIR_ARG: &str = "--user-dir";

#[derive(Default)]
pub struct ProcessLauncher {
    running: Arc<AtomicBool>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn spawn(&self, request: LaunchRequest, sink: Arc<dyn ProgressSink>) -> Result<()> {
        let executable = request.layout.executable();
        if !executable.is_file() {
            anyhow::bail!("client executable missing at {:?}", executable);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            anyhow::bail!("the game is already running");
        }

        let user_dir = request.layout.user_data_dir();
        let result = Command::new(&executable)
            .arg(USER_DIR_ARG)
            .arg(&user_dir)
            .current_dir(request.layout.client_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {:?}", executable));
        let mut child = match result {
            Ok(child) => child,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let started_at = chrono::Utc::now();
        log::info!(
            "[launch] Started instance {} (pid {:?}) with user dir {:?}",
            request.instance.id,
            child.id(),
            user_dir
        );
        sink.state_changed(GameState::Running, None);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let running = self.running.clone();
        let instance_id = request.instance.id;
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    log::error!("[launch] Lost track of instance {}: {}", instance_id, e);
                    None
                }
            };
            let played = chrono::Utc::now().signed_duration_since(started_at);
            log::info!(
                "[launch] Instance {} exited with {:?} after {} min",
                instance_id,
                exit_code,
                played.num_minutes()
            );
            running.store(false, Ordering::SeqCst);
            sink.state_changed(GameState::Stopped, exit_code);
        });
        Ok(())
    }
}

impl LaunchHandoff for ProcessLauncher {
    fn launch<'a>(
        &'a self,
        request: LaunchRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> BoxFuture<'a, Result<()>> {
        self.spawn(request, sink).boxed()
    }
}

/// Client output never reaches our stdout, which belongs to the bridge.
async fn forward_output<R>(stream: R, label: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::debug!("[game:{}] {}", label, line),
            Ok(None) => break,
            Err(e) => {
                log::debug!("[game:{}] output closed: {}", label, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_lib::game::installer::SilentSink;
    use hearth_lib::game::instance::{InstanceLayout, InstanceMeta};
    use hearth_lib::Branch;

    #[tokio::test]
    async fn missing_executable_is_an_error_and_leaves_launcher_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new();
        let request = LaunchRequest {
            instance: InstanceMeta {
                id: "abc".into(),
                branch: Branch::Release,
                version: 1,
                installed_version: Some(1),
                custom_name: None,
                created_at: chrono::Utc::now(),
                is_latest: false,
                installed: true,
            },
            layout: InstanceLayout::new(tmp.path().join("abc")),
        };

        let err = launcher.launch(request, Arc::new(SilentSink)).await.unwrap_err();
        assert!(err.to_string().contains("executable missing"));
        assert!(!launcher.is_running());
    }
}
