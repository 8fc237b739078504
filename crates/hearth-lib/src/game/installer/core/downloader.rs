use crate::error::DownloadError;
use crate::game::installer::config::{HASH_BUFFER_SIZE, MAX_ATTEMPTS, PART_SUFFIX, RETRY_BASE_DELAY_MS};
use crate::game::installer::types::CancelToken;
use crate::game::sources::Artifact;
use crate::utils::http::STALL_TIMEOUT;
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{create_dir_all, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One artifact to stage.
pub struct StageRequest<'a> {
    pub artifact: &'a Artifact,
    /// Final file name inside the staging directory
    pub staged_name: String,
    pub headers: &'a HeaderMap,
}

/// Download an artifact into `staging_dir`, resuming a previous `.part` file
/// when the server honours ranges. Returns the path of the completed file.
///
/// `on_bytes(done, total)` is called as data arrives for this artifact.
pub async fn stage_artifact(
    client: &Client,
    staging_dir: &Path,
    request: &StageRequest<'_>,
    cancel: &CancelToken,
    on_bytes: &mut (dyn FnMut(u64, Option<u64>) + Send),
) -> Result<PathBuf, DownloadError> {
    let artifact = request.artifact;
    let path = staging_dir.join(&request.staged_name);
    log::debug!("[download] Staging {} -> {:?}", artifact.url, path);

    create_dir_all(staging_dir)
        .await
        .map_err(|e| DownloadError::TransferFailed(format!("create {:?}: {}", staging_dir, e)))?;

    if path.exists() {
        match staged_file_is_complete(&path, artifact).await {
            Ok(true) => {
                log::info!("[download] Reusing staged file {:?}", path);
                let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                on_bytes(size, Some(size));
                return Ok(path);
            }
            Ok(false) => {
                log::info!("[download] Staged file {:?} is stale, re-downloading", path);
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(e) => {
                log::warn!("[download] Could not check staged file {:?}: {:#}", path, e);
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match download_attempt(client, &path, request, cancel, on_bytes).await {
            Ok(()) => return Ok(path),
            Err(e) => {
                // Transports report an aborted body as a plain I/O error.
                if cancel.is_cancelled() || is_cancellation(&e) {
                    log::info!("[download] Cancelled while fetching {}", artifact.file_name);
                    return Err(DownloadError::Cancelled);
                }
                if attempt >= MAX_ATTEMPTS {
                    log::error!("[download] Failed after {} attempts: {:#}", MAX_ATTEMPTS, e);
                    return Err(DownloadError::TransferFailed(format!(
                        "{} after {} attempts: {:#}",
                        artifact.url, MAX_ATTEMPTS, e
                    )));
                }
                log::warn!(
                    "[download] Attempt {}/{} for {} failed: {:#}. Retrying...",
                    attempt,
                    MAX_ATTEMPTS,
                    artifact.file_name,
                    e
                );
                let delay = tokio::time::sleep(std::time::Duration::from_millis(
                    RETRY_BASE_DELAY_MS * attempt as u64,
                ));
                tokio::select! {
                    _ = delay => {}
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                }
            }
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    path.with_file_name(format!("{}.{}", name, PART_SUFFIX))
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DownloadError>(), Some(DownloadError::Cancelled))
}

async fn download_attempt(
    client: &Client,
    path: &Path,
    request: &StageRequest<'_>,
    cancel: &CancelToken,
    on_bytes: &mut (dyn FnMut(u64, Option<u64>) + Send),
) -> Result<()> {
    let artifact = request.artifact;
    let start = Instant::now();
    let tmp_path = part_path(path);

    let resume_from = match tokio::fs::metadata(&tmp_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let mut builder = client.get(&artifact.url).headers(request.headers.clone());
    if resume_from > 0 {
        builder = builder.header(RANGE, format!("bytes={}-", resume_from));
    }

    let response = tokio::select! {
        response = builder.send() => response.with_context(|| format!("request {}", artifact.url))?,
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled.into()),
    };

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        // Stale part larger than the file; start over on the next attempt.
        let _ = tokio::fs::remove_file(&tmp_path).await;
        anyhow::bail!("server rejected resume offset {} for {}", resume_from, artifact.url);
    }
    if !status.is_success() {
        anyhow::bail!("HTTP error {}: {}", status, artifact.url);
    }

    let resumed = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
    let mut file = if resumed {
        log::info!(
            "[download] Resuming {} at {} bytes",
            artifact.file_name,
            resume_from
        );
        OpenOptions::new().append(true).open(&tmp_path).await?
    } else {
        if resume_from > 0 {
            log::debug!("[download] Server ignored range request, restarting {}", artifact.file_name);
        }
        File::create(&tmp_path).await?
    };

    let offset = if resumed { resume_from } else { 0 };
    let total_size = response
        .content_length()
        .map(|len| len + offset)
        .or(artifact.size);
    log::debug!("[download] Size: {:?} bytes", total_size);

    let mut downloaded = offset;
    let mut chunk_count: u64 = 0;
    on_bytes(downloaded, total_size);

    let mut stream = response.bytes_stream();
    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(STALL_TIMEOUT, stream.next()) => next,
            _ = cancel.cancelled() => {
                file.flush().await.ok();
                return Err(DownloadError::Cancelled.into());
            }
        };
        let chunk = match next {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => anyhow::bail!(
                "no data for {}s from {}",
                STALL_TIMEOUT.as_secs(),
                artifact.url
            ),
        };
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        chunk_count += 1;
        on_bytes(downloaded, total_size);
    }
    file.flush().await?;
    // Ensure data is flushed to disk
    file.sync_all().await?;
    drop(file);

    if let Some(expected) = artifact.size {
        if downloaded != expected {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!(
                "size mismatch for {}: expected {} bytes, got {}",
                artifact.url,
                expected,
                downloaded
            );
        }
    }

    if let Some(expected) = artifact.sha256.as_deref() {
        let computed = sha256_file(&tmp_path).await?;
        if !computed.eq_ignore_ascii_case(expected) {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!(
                "SHA256 mismatch for {}: expected {}, got {}",
                artifact.url,
                expected,
                computed
            );
        }
        log::debug!("[download] SHA256 validated: {}", computed);
    }

    tokio::fs::rename(&tmp_path, path).await?;

    let elapsed = start.elapsed();
    let fetched = downloaded - offset;
    if fetched > 0 {
        let secs = elapsed.as_secs_f64();
        let throughput = (fetched as f64 / 1024.0 / 1024.0) / secs.max(0.001); // MB/s
        log::info!(
            "[download] Stats: url={}, size={} bytes, resumed_at={}, chunks={}, time={:.2}s, throughput={:.2} MB/s",
            artifact.url,
            downloaded,
            offset,
            chunk_count,
            secs,
            throughput
        );
    } else {
        log::info!(
            "[download] Completed with no new bytes (url={}), elapsed={:.2}s",
            artifact.url,
            elapsed.as_secs_f64()
        );
    }

    Ok(())
}

/// A staged file is reusable when its hash (or, lacking one, its size) matches.
/// Completed files are only ever produced by rename, so with neither known the
/// file is trusted.
async fn staged_file_is_complete(path: &Path, artifact: &Artifact) -> Result<bool> {
    if let Some(expected) = artifact.sha256.as_deref() {
        let computed = sha256_file(path).await?;
        return Ok(computed.eq_ignore_ascii_case(expected));
    }
    if let Some(expected) = artifact.size {
        let len = tokio::fs::metadata(path).await?.len();
        return Ok(len == expected);
    }
    Ok(true)
}

pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("open {:?} for hashing", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
