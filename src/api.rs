use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use log::error;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, CredentialStore};
use crate::config::Config;
use crate::error::ClipError;
use crate::pipeline::ClipPipeline;

/// One clip job: where to capture from, how long, and where it goes.
#[derive(Debug, Deserialize)]
pub struct ClipRequest {
    pub url: String,
    /// Seconds of stream to keep. Defaults to 30; zero is rejected.
    #[serde(default = "default_duration")]
    pub duration: u32,
    pub folder_id: String,
}

fn default_duration() -> u32 {
    30
}

pub struct AppState {
    pub config: Config,
    pub store: Arc<CredentialStore>,
    pub pipeline: ClipPipeline,
}

#[get("/")]
async fn home() -> impl Responder {
    "drive_clipper is running. Open /api/login to authorize Google Drive."
}

/// Send the user to Google's consent screen.
#[get("/api/login")]
async fn login(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Found()
        .insert_header(("Location", auth::authorization_url(&state.config)))
        .finish()
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// OAuth callback: exchange the authorization code and keep the credential.
#[get("/api/oauth2callback")]
async fn oauth2callback(
    state: web::Data<AppState>,
    query: web::Query<CallbackQuery>,
) -> Result<HttpResponse, ClipError> {
    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ClipError::AuthRequired("callback carried no authorization code".to_string()))?;
    state
        .store
        .exchange_and_store(code, &state.config.redirect_uri)
        .await?;
    Ok(HttpResponse::Ok().body("Authorized. POST to /api/clip to record and upload."))
}

/// Record a clip from a stream and upload it to Drive.
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:8080/api/clip \
///   -H 'Content-Type: application/json' \
///   -d '{"url": "https://example.com/stream", "duration": 30, "folder_id": "F1"}'
/// ```
///
/// # Returns
/// ```json
/// {
///     "message": "clip recorded and uploaded",
///     "file_id": "abc123",
///     "link": "https://drive.google.com/..."
/// }
/// ```
#[post("/api/clip")]
async fn clip(
    state: web::Data<AppState>,
    body: web::Json<ClipRequest>,
) -> Result<HttpResponse, ClipError> {
    let request = body.into_inner();
    if request.duration == 0 {
        return Err(ClipError::InvalidRequest(
            "duration must be at least 1 second".to_string(),
        ));
    }

    let result = state.pipeline.run(&request).await.map_err(|err| {
        error!("clip request failed at {} stage: {err}", err.stage());
        err
    })?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "clip recorded and uploaded",
        "file_id": result.file_id,
        "link": result.link,
    })))
}

/// Run the API server until shutdown.
pub async fn run_api_server(state: AppState) -> std::io::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(home)
            .service(login)
            .service(oauth2callback)
            .service(clip)
    })
    .bind(bind_addr)?
    .run()
    .await
}
