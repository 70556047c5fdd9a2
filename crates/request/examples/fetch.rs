//! Fetches a URL on the engine's worker thread and prints the response.
//!
//! ```sh
//! cargo run --example fetch -- http://127.0.0.1:3000/
//! ```

use std::sync::Arc;
use std::time::Duration;

use micro_request::config::EngineConfig;
use micro_request::engine::{RequestController, RequestOptions};
use micro_request::transport::TcpConnector;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let url = std::env::args().nth(1).unwrap_or_else(|| "http://127.0.0.1:3000/".to_owned());

    let config = EngineConfig::default().with_collect_headers(true).with_max_response_size(64 * 1024);
    let mut controller = RequestController::new(config, Arc::new(TcpConnector));

    info!(url = %url, "fetching");
    if let Err(e) = controller.start(RequestOptions::get(url, Duration::from_secs(10))) {
        error!(cause = %e, "failed to start request");
        return;
    }

    while !controller.finished() {
        std::thread::sleep(Duration::from_millis(10));
    }

    let result = controller.result();
    info!(status = ?controller.status_code(), "request finished");
    for (name, value) in controller.response_headers() {
        info!("{}: {:?}", name, value);
    }

    match result {
        Ok(()) => println!("{}", String::from_utf8_lossy(controller.buffer())),
        Err(e) => error!(cause = %e, "request failed"),
    }
}
