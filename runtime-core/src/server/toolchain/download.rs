//! Component F — Artifact Downloader.
//!
//! A resumable streaming `GET` built on the same `ureq` transport
//! [`super::zip::download_zip`] already uses for a one-shot fetch,
//! generalised here with `Range` resume, a `.part` scratch file, and a
//! caller-supplied progress callback — the "callback over channel" shape the
//! toolchain builder already uses for its own progress reporting
//! (`server::toolchain::builder`).

use std::{
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{LmcppError, LmcppResult};

/// A leading byte sequence that marks a small file as a Git LFS pointer
/// rather than the real payload — seen when an ONNX Runtime release asset
/// was configured for Git LFS and the caller fetched the pointer text
/// instead of the binary blob.
const LFS_POINTER_SIGNATURE: &[u8] = b"version https://git-lfs.github.com/spec/v1";
const LFS_POINTER_SIGNATURE_STR: &str = "version https://git-lfs.github.com/spec/v1";
/// Payloads at or above this size are never mistaken for an LFS pointer —
/// real pointer files are a few hundred bytes.
const LFS_POINTER_MAX_SIZE: u64 = 1024;

/// Default `User-Agent` for [`Downloader`] instances created without a
/// product-specific override, e.g. the cached-archive fetch in
/// [`super::zip::download_zip`].
pub const USER_AGENT: &str = concat!("runtime-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Preparing,
    Downloading,
    Extracting,
    Verifying,
    Finalizing,
    Complete,
}

/// One progress tick. Reported best-effort — a slow or dropped consumer
/// never blocks the transfer; see [`Downloader::download`].
#[derive(Debug, Clone)]
pub struct Progress {
    pub filename: String,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub phase: ProgressPhase,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Lmcpp(#[from] LmcppError),
}

/// Thin wrapper around a single `ureq::Agent` configured with the product's
/// `User-Agent`; matches the one-client-per-concern idiom used elsewhere for
/// this crate's own HTTP transport (`server::ipc::http`).
pub struct Downloader {
    agent: ureq::Agent,
    user_agent: String,
}

impl Downloader {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let agent = ureq::Agent::new_with_config(ureq::Agent::config_builder().timeout_global(Some(Duration::from_secs(30))).build());
        Self {
            agent,
            user_agent: user_agent.into(),
        }
    }

    /// Streams `url` into `dest`, resuming from a prior `.part` file if one
    /// exists. Publication is atomic: the `.part` file is only renamed onto
    /// `dest` once the transfer completes (or a `416` confirms it already
    /// had). `progress` is invoked best-effort; failures in the callback are
    /// never propagated.
    pub fn download(&self, url: &str, dest: &Path, mut progress: impl FnMut(Progress)) -> LmcppResult<()> {
        let filename = dest.file_name().and_then(|n| n.to_str()).unwrap_or("artifact").to_string();
        progress(Progress {
            filename: filename.clone(),
            bytes_downloaded: 0,
            total_bytes: None,
            phase: ProgressPhase::Preparing,
        });

        let part_path = part_path(dest);
        let already = part_path.exists().then(|| std::fs::metadata(&part_path).ok()).flatten().map(|m| m.len()).unwrap_or(0);

        let mut request = self.agent.get(url).header("User-Agent", &self.user_agent);
        if already > 0 {
            request = request.header("Range", &format!("bytes={already}-"));
        }

        let response = request.call().map_err(|e| LmcppError::DownloadFailed(format!("GET {url}: {e}")));
        let (mut reader, total_bytes, resumed) = match response {
            Ok(resp) if resp.status() == 206 => {
                let total = content_range_total(&resp);
                (resp.into_body().into_reader(), total, true)
            }
            Ok(resp) if resp.status() == 200 => {
                // Server ignored our Range request (or there was nothing to
                // resume) — start the `.part` file over from zero.
                let total = content_length(&resp);
                (resp.into_body().into_reader(), total, false)
            }
            Ok(resp) if resp.status() == 416 && part_path.exists() => {
                // Requested range not satisfiable: our `.part` is already
                // the full file. Skip straight to publication.
                finalize(&part_path, dest)?;
                progress(Progress {
                    filename,
                    bytes_downloaded: already,
                    total_bytes: Some(already),
                    phase: ProgressPhase::Complete,
                });
                return Ok(());
            }
            Ok(resp) => return Err(LmcppError::DownloadFailed(format!("GET {url}: unexpected status {}", resp.status()))),
            Err(e) => return Err(e),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(!resumed)
            .open(&part_path)
            .map_err(|e| LmcppError::file_system("open .part scratch file", part_path.clone(), e))?;
        if resumed {
            file.seek(SeekFrom::End(0)).map_err(|e| LmcppError::file_system("seek .part scratch file", part_path.clone(), e))?;
        }

        let mut downloaded = if resumed { already } else { 0 };
        let mut buf = [0u8; 64 * 1024];
        progress(Progress {
            filename: filename.clone(),
            bytes_downloaded: downloaded,
            total_bytes,
            phase: ProgressPhase::Downloading,
        });
        loop {
            let n = reader.read(&mut buf).map_err(|e| LmcppError::file_system("read download stream", dest.to_path_buf(), e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(|e| LmcppError::file_system("write .part scratch file", part_path.clone(), e))?;
            downloaded += n as u64;
            progress(Progress {
                filename: filename.clone(),
                bytes_downloaded: downloaded,
                total_bytes,
                phase: ProgressPhase::Downloading,
            });
        }
        drop(file);

        reject_if_lfs_pointer(&part_path, url)?;

        progress(Progress {
            filename: filename.clone(),
            bytes_downloaded: downloaded,
            total_bytes,
            phase: ProgressPhase::Finalizing,
        });
        finalize(&part_path, dest)?;
        progress(Progress {
            filename,
            bytes_downloaded: downloaded,
            total_bytes,
            phase: ProgressPhase::Complete,
        });
        Ok(())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("artifact").to_string();
    name.push_str(".part");
    dest.with_file_name(name)
}

fn finalize(part_path: &Path, dest: &Path) -> LmcppResult<()> {
    std::fs::rename(part_path, dest).map_err(|e| LmcppError::file_system("publish downloaded artifact", dest.to_path_buf(), e))
}

fn content_length(resp: &ureq::http::Response<ureq::Body>) -> Option<u64> {
    resp.headers().get("content-length").and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok())
}

/// Parses `Content-Range: bytes <start>-<end>/<total>` to recover the full
/// artifact size when resuming a partial download.
fn content_range_total(resp: &ureq::http::Response<ureq::Body>) -> Option<u64> {
    resp.headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit_once('/'))
        .and_then(|(_, total)| total.parse().ok())
}

/// Rejects small ONNX-style payloads whose leading bytes match the Git LFS
/// pointer-file signature — the archive never extracts into anything usable
/// and failing fast here avoids a confusing downstream extraction error.
fn reject_if_lfs_pointer(path: &Path, url: &str) -> LmcppResult<()> {
    let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(u64::MAX);
    if len >= LFS_POINTER_MAX_SIZE {
        return Ok(());
    }
    let mut buf = vec![0u8; len as usize];
    let mut file = std::fs::File::open(path).map_err(|e| LmcppError::file_system("read candidate LFS pointer", path.to_path_buf(), e))?;
    file.read_exact(&mut buf).map_err(|e| LmcppError::file_system("read candidate LFS pointer", path.to_path_buf(), e))?;
    if buf.starts_with(LFS_POINTER_SIGNATURE) {
        let _ = std::fs::remove_file(path);
        return Err(LmcppError::LfsPointer { url: url.to_string() });
    }
    Ok(())
}
