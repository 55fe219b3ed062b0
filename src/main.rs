mod api;
mod auth;
mod capture;
mod config;
mod error;
mod pipeline;
mod upload;

use std::sync::Arc;

use anyhow::Result;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = config::Config::from_env()?;
    let http = reqwest::Client::new();

    let store = Arc::new(auth::CredentialStore::new(http.clone(), &config));
    let pipeline = pipeline::ClipPipeline::new(
        store.clone(),
        capture::CaptureEngine::new(&config),
        upload::DriveUploader::new(http, &config),
    );

    info!("listening on {}", config.bind_addr);
    api::run_api_server(api::AppState {
        config,
        store,
        pipeline,
    })
    .await?;
    Ok(())
}
