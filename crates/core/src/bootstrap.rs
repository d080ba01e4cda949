use crate::stores::INDEX_FILE_NAME;
use crate::BootstrapError;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Where to fetch the packaged index from when it is not on disk yet.
#[derive(Debug, Clone, Default)]
pub struct IndexSource {
    pub archive_url: Option<String>,
    /// Hex sha256 the downloaded archive must match.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    AlreadyPresent,
    Downloaded { bytes: usize, entries: usize },
}

/// Makes sure `dir` holds an unpacked index, downloading it once if needed.
///
/// The archive is unpacked into a sibling staging directory and renamed into
/// place, so `dir` either does not exist or is complete.
pub async fn ensure_index(
    dir: &Path,
    source: &IndexSource,
) -> Result<BootstrapOutcome, BootstrapError> {
    if tokio::fs::try_exists(dir).await? {
        info!(dir = %dir.display(), "index directory present, skipping download");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    let url = source.archive_url.as_deref().ok_or_else(|| {
        BootstrapError::IndexUnavailable(format!(
            "{} does not exist and no archive url is configured",
            dir.display()
        ))
    })?;

    info!(url, dir = %dir.display(), "downloading index archive");
    let archive = download_archive(url).await?;
    if let Some(expected) = &source.sha256 {
        verify_checksum(&archive, expected)?;
    }

    let bytes = archive.len();
    let target = dir.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || install_archive(archive, &target))
        .await
        .map_err(|error| BootstrapError::Io(std::io::Error::other(error)))??;

    info!(dir = %dir.display(), bytes, entries, "index archive installed");
    Ok(BootstrapOutcome::Downloaded { bytes, entries })
}

async fn download_archive(url: &str) -> Result<Vec<u8>, BootstrapError> {
    let response = Client::new().get(url).send().await?;
    if !response.status().is_success() {
        return Err(BootstrapError::DownloadStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}

pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), BootstrapError> {
    let actual = format!("{:x}", Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(BootstrapError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

fn install_archive(archive: Vec<u8>, dir: &Path) -> Result<usize, BootstrapError> {
    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let staging = parent.join(format!(".{name}.staging-{}", Uuid::new_v4()));

    let result = unpack_archive(Cursor::new(archive), &staging).and_then(|entries| {
        let root = locate_index_root(&staging)?;
        fs::rename(&root, dir)?;
        Ok(entries)
    });

    if staging.exists() {
        if let Err(error) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), %error, "failed to clean up staging directory");
        }
    }
    result
}

/// Extracts every entry under `destination`, refusing entries that escape it.
pub fn unpack_archive<R: Read + Seek>(
    reader: R,
    destination: &Path,
) -> Result<usize, BootstrapError> {
    let mut zip = zip::ZipArchive::new(reader)?;
    fs::create_dir_all(destination)?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(BootstrapError::UnsafeEntry(entry.name().to_string()));
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut output = fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut output)?;
            files += 1;
        }
    }
    Ok(files)
}

/// The shallowest directory under `root` holding the index file.
fn locate_index_root(root: &Path) -> Result<PathBuf, BootstrapError> {
    WalkDir::new(root)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == INDEX_FILE_NAME)
        .min_by_key(|entry| entry.depth())
        .and_then(|entry| entry.path().parent().map(Path::to_path_buf))
        .ok_or_else(|| {
            BootstrapError::IndexUnavailable(format!("archive does not contain {INDEX_FILE_NAME}"))
        })
}
