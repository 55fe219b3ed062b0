use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ClipError, ClipResult};

/// Local media file produced by one capture. Owned by a single request;
/// the orchestrator removes it before the request completes.
#[derive(Debug)]
pub struct ClipArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl ClipArtifact {
    /// Delete the local file. The caller logs failures; cleanup never
    /// changes a request's reported outcome.
    pub async fn remove(self) -> ClipResult<()> {
        tokio::fs::remove_file(&self.path)
            .await
            .map_err(|source| ClipError::Cleanup {
                path: self.path,
                source,
            })
    }
}

/// `clip_<YYYY-MM-DD_HH-MM-SS>_<token>.mp4`. The random token keeps two
/// requests inside the same second from colliding.
fn artifact_name(now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("clip_{}_{}.mp4", now.format("%Y-%m-%d_%H-%M-%S"), &token[..8])
}

/// Composes the stream extractor and the transcoder into one piped pipeline:
/// the extractor writes the raw media stream to stdout, the transcoder reads
/// it from stdin, trims to the requested duration and writes the container
/// file. Explicit argument vectors and a real OS pipe; the source URL never
/// touches a shell.
pub struct CaptureEngine {
    extractor_bin: String,
    transcoder_bin: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CaptureEngine {
    pub fn new(config: &Config) -> Self {
        CaptureEngine {
            extractor_bin: config.ytdlp_bin.clone(),
            transcoder_bin: config.ffmpeg_bin.clone(),
            work_dir: config.work_dir.clone(),
            timeout: config.capture_timeout,
        }
    }

    /// Produce a local file holding at most `duration_secs` seconds of the
    /// source stream. A shorter source simply yields a shorter file.
    pub async fn capture(&self, source_url: &str, duration_secs: u32) -> ClipResult<ClipArtifact> {
        let path = self.work_dir.join(artifact_name(Utc::now()));
        debug!("capturing {source_url} for {duration_secs}s into {}", path.display());

        let outcome = tokio::time::timeout(
            self.timeout,
            self.run_pipeline(source_url, duration_secs, &path),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // Dropping the pipeline future killed both children
                // (kill_on_drop); only the partial file may remain.
                discard_partial(&path).await;
                Err(ClipError::CaptureFailed(format!(
                    "pipeline timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn run_pipeline(
        &self,
        source_url: &str,
        duration_secs: u32,
        path: &Path,
    ) -> ClipResult<ClipArtifact> {
        let mut extractor = Command::new(&self.extractor_bin)
            .args(["--no-playlist", "-o", "-", source_url])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClipError::CaptureFailed(format!("failed to spawn {}: {e}", self.extractor_bin))
            })?;

        let stream = extractor
            .stdout
            .take()
            .ok_or_else(|| ClipError::CaptureFailed("extractor stdout was not captured".to_string()))?;
        let stream: Stdio = stream.try_into().map_err(|_| {
            ClipError::CaptureFailed("extractor stdout could not be wired as a pipe".to_string())
        })?;

        let transcoder = Command::new(&self.transcoder_bin)
            .args(["-y", "-i", "-", "-t", &duration_secs.to_string(), "-c", "copy"])
            .arg(path)
            .stdin(stream)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClipError::CaptureFailed(format!("failed to spawn {}: {e}", self.transcoder_bin))
            })?;

        // The transcoder stops reading once it has trimmed enough input,
        // which closes the pipe, so it finishes first.
        let output = transcoder.wait_with_output().await.map_err(|e| {
            ClipError::CaptureFailed(format!("waiting on {} failed: {e}", self.transcoder_bin))
        })?;
        let extractor_status = extractor.wait().await.map_err(|e| {
            ClipError::CaptureFailed(format!("waiting on {} failed: {e}", self.extractor_bin))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            discard_partial(path).await;
            return Err(ClipError::CaptureFailed(format!(
                "transcoder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        // A trimmed run normally kills the extractor with SIGPIPE (no exit
        // code); only a real non-zero code counts as failure.
        if let Some(code) = extractor_status.code() {
            if code != 0 {
                discard_partial(path).await;
                return Err(ClipError::CaptureFailed(format!(
                    "extractor exited with code {code}"
                )));
            }
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ClipError::CaptureFailed(format!("transcoder produced no output file: {e}"))
        })?;
        if metadata.len() == 0 {
            discard_partial(path).await;
            return Err(ClipError::CaptureFailed(
                "transcoder produced an empty file".to_string(),
            ));
        }

        Ok(ClipArtifact {
            path: path.to_path_buf(),
            size: metadata.len(),
            created_at: Utc::now(),
        })
    }
}

/// A failed capture leaves nothing usable behind.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("discarded partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not discard partial file {}: {e}", path.display()),
    }
}
