use hearth_launcher::bridge::{self, Outbox};
use hearth_launcher::{setup, utils};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|e| {
        eprintln!("Hearth Launcher closed unexpectedly: {e:?}");
    }));

    let app_dir = match utils::config::get_app_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve application directory: {:#}", e);
            std::process::exit(1);
        }
    };
    // Early read of the debug logging setting, before the store exists.
    utils::logging::init(utils::config::peek_config(&app_dir).debug_logging);
    log::info!(
        "Hearth Launcher {} starting in {:?}",
        env!("CARGO_PKG_VERSION"),
        app_dir
    );

    let (outbox, rx) = Outbox::channel();
    let writer = tokio::spawn(bridge::write_loop(rx, tokio::io::stdout()));

    let state = match setup::init(&app_dir, outbox.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            log::error!("Startup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    bridge::read_loop(BufReader::new(tokio::io::stdin()), state, outbox).await;
    // A detached download may still hold an outbox; give the writer a moment to flush.
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
}
