use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// OAuth scope granting per-file Drive access, the narrowest scope that
/// still lets us create files.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub bind_addr: String,
    /// Directory clip artifacts are written to while a request is in flight.
    pub work_dir: PathBuf,
    /// Upper bound on the whole extractor/transcoder pipeline.
    pub capture_timeout: Duration,
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub auth_url: String,
    /// Token endpoint; overridable so a local stand-in can take Google's place.
    pub token_url: String,
    /// Drive upload endpoint, overridable the same way.
    pub drive_upload_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            client_id: env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID is not set")?,
            client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET is not set")?,
            redirect_uri: env::var("GOOGLE_REDIRECT_URI")
                .context("GOOGLE_REDIRECT_URI is not set")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            work_dir: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            capture_timeout: Duration::from_secs(
                env::var("CAPTURE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            ytdlp_bin: env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            auth_url: env::var("AUTH_URL").unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string()),
            token_url: env::var("TOKEN_URL").unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            drive_upload_url: env::var("DRIVE_UPLOAD_URL")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_URL.to_string()),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Configuration pointing at nothing real, for handler-level tests.
    pub fn for_tests(work_dir: PathBuf) -> Self {
        Config {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            redirect_uri: "http://localhost:8080/api/oauth2callback".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            work_dir,
            capture_timeout: Duration::from_secs(5),
            ytdlp_bin: "/nonexistent/yt-dlp".to_string(),
            ffmpeg_bin: "/nonexistent/ffmpeg".to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: "http://127.0.0.1:9/token".to_string(),
            drive_upload_url: "http://127.0.0.1:9/upload".to_string(),
        }
    }
}
