//! Ruleway runner
//!
//! Loads the definitions file named by `RULEWAY_DEFINITIONS` (default
//! `ruleway.json`), registers its flows, starts its inputs and runs until
//! Ctrl-C. Log filtering follows `RULEWAY_LOG` (default `info`).

use ruleway::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    start_server(config).await
}
