use anyhow::Result;
use fylle::api::{CgsApi, HttpCgsClient};
use fylle::config::Config;
use fylle::console;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with the CGS backend settings.");
            return Err(e);
        }
    };

    let api: Arc<dyn CgsApi> = Arc::new(HttpCgsClient::new(&config)?);

    console::run(&config, api).await
}
