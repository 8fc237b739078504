use crate::game::installer::types::ProgressSink;
use crate::game::instance::{InstanceLayout, InstanceMeta};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// What the launch step needs to start the client.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance: InstanceMeta,
    pub layout: InstanceLayout,
}

/// Hand-off from a finished install to whatever starts the game.
/// The returned future completes once the process is started, not when it exits;
/// the implementation reports `Running`/`Stopped` through the sink.
pub trait LaunchHandoff: Send + Sync {
    fn launch<'a>(
        &'a self,
        request: LaunchRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> BoxFuture<'a, Result<()>>;
}
