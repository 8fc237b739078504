//! JSON-lines bridge to the UI process.
//!
//! One request per stdin line, one response or event per stdout line. Requests
//! are handled concurrently; responses carry the request id.

use crate::commands::{self, CommandError};
use crate::setup::AppState;
use hearth_lib::game::installer::{ErrorEvent, GameState, ProgressEvent, ProgressSink};
use hearth_lib::game::instance::MoveProgress;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Deserialize, Debug, Clone)]
pub struct Request {
    pub id: u64,
    pub channel: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Everything written to stdout.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outgoing {
    Response(Response),
    Progress(ProgressEvent),
    #[serde(rename_all = "camelCase")]
    State {
        state: GameState,
        exit_code: Option<i32>,
    },
    /// Nested: the event has its own `type` field.
    Error { error: ErrorEvent },
    MoveProgress(MoveProgress),
}

#[derive(Serialize, Debug, Clone)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    pub fn from_result(id: u64, result: Result<serde_json::Value, CommandError>) -> Self {
        match result {
            Ok(data) => Self {
                id,
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

/// Cloneable handle that queues lines for the stdout writer.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Outgoing) {
        // Closed only during shutdown; nothing left to tell.
        let _ = self.tx.send(message);
    }
}

impl ProgressSink for Outbox {
    fn progress(&self, event: &ProgressEvent) {
        self.send(Outgoing::Progress(event.clone()));
    }

    fn state_changed(&self, state: GameState, exit_code: Option<i32>) {
        self.send(Outgoing::State { state, exit_code });
    }

    fn error(&self, event: &ErrorEvent) {
        self.send(Outgoing::Error {
            error: event.clone(),
        });
    }
}

/// Drain queued messages into `writer`, one JSON document per line.
pub async fn write_loop<W>(mut rx: mpsc::UnboundedReceiver<Outgoing>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                log::error!("[bridge] Could not serialise outgoing message: {}", e);
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            log::error!("[bridge] Output closed: {}", e);
            break;
        }
    }
}

/// Serve requests from `reader` until it closes.
pub async fn read_loop<R>(reader: R, state: Arc<AppState>, outbox: Outbox)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("[bridge] Input closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[bridge] Ignoring malformed request: {}", e);
                continue;
            }
        };
        log::debug!("[bridge] -> {} #{}", request.channel, request.id);

        let state = state.clone();
        let outbox = outbox.clone();
        tokio::spawn(async move {
            let result = commands::dispatch(&state, &outbox, &request.channel, request.payload).await;
            if let Err(e) = &result {
                log::warn!("[bridge] {} #{} failed: {}", request.channel, request.id, e.message);
            }
            outbox.send(Outgoing::Response(Response::from_result(request.id, result)));
        });
    }
    log::info!("[bridge] Input closed, shutting down");
}
