use bytes::Bytes;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::auth::Credential;
use crate::capture::ClipArtifact;
use crate::config::Config;
use crate::error::{ClipError, ClipResult};

/// Drive requires resumable chunks to be multiples of 256 KiB.
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Remote file created by a completed upload. Two uploads of the same local
/// file create two of these with distinct ids; nothing deduplicates.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub file_id: String,
    pub link: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: String,
}

enum ChunkOutcome {
    Complete(UploadResult),
    /// More chunks expected; next byte offset to send.
    Continue(u64),
}

/// Streams a local artifact into Google Drive with the v3 resumable upload
/// protocol: an initiation POST carrying the file metadata yields a session
/// URL, then the bytes go up in `Content-Range` chunks. A transport error
/// mid-transfer is resumed once from the last byte the session acknowledges;
/// a remote refusal is surfaced as-is and never retried.
pub struct DriveUploader {
    http: reqwest::Client,
    /// Endpoint base; overridable so a local stand-in can take Drive's place.
    upload_url: String,
    chunk_size: usize,
}

impl DriveUploader {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        DriveUploader {
            http,
            upload_url: config.drive_upload_url.clone(),
            chunk_size: CHUNK_SIZE,
        }
    }

    pub async fn upload(
        &self,
        artifact: &ClipArtifact,
        folder_id: &str,
        credential: &Credential,
    ) -> ClipResult<UploadResult> {
        let total = artifact.size;
        if total == 0 {
            return Err(upload_failed("artifact is empty".to_string()));
        }
        let session_url = self.initiate_session(artifact, folder_id, credential).await?;
        debug!("resumable session opened for {}", artifact.path.display());

        let mut file = tokio::fs::File::open(&artifact.path)
            .await
            .map_err(|e| upload_failed(format!("could not open artifact: {e}")))?;

        let mut offset: u64 = 0;
        let mut resumed = false;
        loop {
            let len = (total - offset).min(self.chunk_size as u64) as usize;
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| upload_failed(format!("could not seek artifact: {e}")))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| upload_failed(format!("could not read artifact: {e}")))?;

            let range = format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total);
            match self.put_chunk(&session_url, Bytes::from(buf), &range).await {
                Ok(ChunkOutcome::Complete(result)) => {
                    info!("uploaded {} as {}", artifact.path.display(), result.file_id);
                    return Ok(result);
                }
                Ok(ChunkOutcome::Continue(next)) => {
                    offset = next;
                    resumed = false;
                }
                // A transport error (no response) gets one resume: ask the
                // session how far it got and continue from there.
                Err(ClipError::UploadRejected { status: None, cause }) if !resumed => {
                    warn!("transfer interrupted ({cause}), probing session for resume");
                    match self.probe_session(&session_url, total).await? {
                        ChunkOutcome::Complete(result) => return Ok(result),
                        ChunkOutcome::Continue(next) => {
                            offset = next;
                            resumed = true;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn initiate_session(
        &self,
        artifact: &ClipArtifact,
        folder_id: &str,
        credential: &Credential,
    ) -> ClipResult<String> {
        let name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());
        let metadata = json!({ "name": name, "parents": [folder_id] });

        let response = self
            .http
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("fields", "id,webViewLink")])
            .bearer_auth(&credential.access_token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", artifact.size.to_string())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| upload_failed(format!("could not reach storage service: {e}")))?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| upload_failed("initiation response carried no session URL".to_string()))
    }

    async fn put_chunk(
        &self,
        session_url: &str,
        chunk: Bytes,
        content_range: &str,
    ) -> ClipResult<ChunkOutcome> {
        debug!("uploading {content_range}");
        let response = self
            .http
            .put(session_url)
            .header("Content-Range", content_range)
            .header("Content-Type", "video/mp4")
            .body(chunk)
            .send()
            .await
            .map_err(|e| upload_failed(format!("transfer interrupted: {e}")))?;

        self.chunk_outcome(response).await
    }

    /// Ask the session which bytes it has; used to resume after a broken
    /// transfer instead of restarting from byte zero.
    async fn probe_session(&self, session_url: &str, total: u64) -> ClipResult<ChunkOutcome> {
        let response = self
            .http
            .put(session_url)
            .header("Content-Range", format!("bytes */{total}"))
            .send()
            .await
            .map_err(|e| upload_failed(format!("resume probe failed: {e}")))?;

        self.chunk_outcome(response).await
    }

    async fn chunk_outcome(&self, response: reqwest::Response) -> ClipResult<ChunkOutcome> {
        let status = response.status();

        // 308 Resume Incomplete: the Range header acknowledges what arrived.
        if status.as_u16() == 308 {
            let next = match response.headers().get("Range").and_then(|v| v.to_str().ok()) {
                Some(range) => parse_range_end(range)? + 1,
                // No Range header: the session has stored nothing yet.
                None => 0,
            };
            return Ok(ChunkOutcome::Continue(next));
        }

        if status.is_success() {
            let file: DriveFile = response
                .json()
                .await
                .map_err(|e| upload_failed(format!("malformed completion body: {e}")))?;
            return Ok(ChunkOutcome::Complete(UploadResult {
                file_id: file.id,
                link: file.web_view_link,
            }));
        }

        Err(rejected(response).await)
    }
}

/// Transport-level failure: no status to report.
fn upload_failed(cause: String) -> ClipError {
    ClipError::UploadRejected { status: None, cause }
}

/// The service answered with a refusal; carry its status and body.
async fn rejected(response: reqwest::Response) -> ClipError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ClipError::UploadRejected {
        status: Some(status.as_u16()),
        cause: format!("storage service returned {status}: {}", body.trim()),
    }
}

/// `bytes=0-12345` → 12345.
fn parse_range_end(range: &str) -> ClipResult<u64> {
    range
        .rsplit('-')
        .next()
        .and_then(|end| end.parse().ok())
        .ok_or_else(|| upload_failed(format!("unparseable session range {range:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn artifact_with(dir: &tempfile::TempDir, bytes: &[u8]) -> ClipArtifact {
        let path = dir.path().join("clip_2024-01-01_00-00-00_deadbeef.mp4");
        tokio::fs::write(&path, bytes).await.unwrap();
        ClipArtifact {
            path,
            size: bytes.len() as u64,
            created_at: Utc::now(),
        }
    }

    fn credential() -> Credential {
        Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            scopes: vec![],
        }
    }

    fn uploader_against(server_uri: &str, chunk_size: usize) -> DriveUploader {
        let mut config = Config::for_tests(std::env::temp_dir());
        config.drive_upload_url = format!("{server_uri}/upload/drive/v3/files");
        let mut uploader = DriveUploader::new(reqwest::Client::new(), &config);
        uploader.chunk_size = chunk_size;
        uploader
    }

    async fn mount_initiation(server: &MockServer, session: &str) {
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "resumable"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}{}", server.uri(), session).as_str()),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn single_chunk_upload_returns_id_and_link() {
        let server = MockServer::start().await;
        mount_initiation(&server, "/session-1").await;
        Mock::given(method("PUT"))
            .and(path("/session-1"))
            .and(header("Content-Range", "bytes 0-14/15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc123",
                "webViewLink": "https://drive.example/abc123",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with(&dir, b"fifteen bytes!!").await;
        let uploader = uploader_against(&server.uri(), CHUNK_SIZE);

        let result = uploader.upload(&artifact, "F1", &credential()).await.unwrap();
        assert_eq!(result.file_id, "abc123");
        assert_eq!(result.link, "https://drive.example/abc123");
    }

    #[tokio::test]
    async fn large_file_goes_up_in_ranged_chunks() {
        let server = MockServer::start().await;
        mount_initiation(&server, "/session-2").await;
        Mock::given(method("PUT"))
            .and(path("/session-2"))
            .and(header("Content-Range", "bytes 0-3/8"))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-3"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session-2"))
            .and(header("Content-Range", "bytes 4-7/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chunked1",
                "webViewLink": "https://drive.example/chunked1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with(&dir, b"eightby!").await;
        let uploader = uploader_against(&server.uri(), 4);

        let result = uploader.upload(&artifact, "F1", &credential()).await.unwrap();
        assert_eq!(result.file_id, "chunked1");
    }

    #[tokio::test]
    async fn uploading_twice_creates_two_distinct_remote_files() {
        let server = MockServer::start().await;
        mount_initiation(&server, "/session-3").await;
        Mock::given(method("PUT"))
            .and(path("/session-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc123",
                "webViewLink": "https://drive.example/abc123",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "def456",
                "webViewLink": "https://drive.example/def456",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with(&dir, b"same local bytes").await;
        let uploader = uploader_against(&server.uri(), CHUNK_SIZE);

        let first = uploader.upload(&artifact, "F1", &credential()).await.unwrap();
        let second = uploader.upload(&artifact, "F1", &credential()).await.unwrap();
        assert_ne!(first.file_id, second.file_id);
    }

    #[tokio::test]
    async fn forbidden_folder_is_rejected_with_remote_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(403).set_body_string("folder not writable"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with(&dir, b"bytes").await;
        let uploader = uploader_against(&server.uri(), CHUNK_SIZE);

        let err = uploader
            .upload(&artifact, "not-mine", &credential())
            .await
            .unwrap_err();
        match err {
            ClipError::UploadRejected { status, cause } => {
                assert_eq!(status, Some(403));
                assert!(cause.contains("folder not writable"));
            }
            other => panic!("expected UploadRejected, got {other:?}"),
        }
    }

    #[test]
    fn session_range_header_parses_to_last_byte() {
        assert_eq!(parse_range_end("bytes=0-12345").unwrap(), 12345);
        assert_eq!(parse_range_end("bytes=0-0").unwrap(), 0);
        assert!(parse_range_end("bytes=?").is_err());
    }
}
