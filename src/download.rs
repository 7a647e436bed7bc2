use crate::error::{HttpError, Result, SyncError};
use crate::session::Session;
use futures_util::TryStreamExt;
use reqwest::Response;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirBuilder, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use url::Url;

pub const CHUNK_SIZE: usize = 16384;
pub const DEFAULT_MODE: u32 = 0o775;

/// Parse octal permission bits such as "775" or "0o644".
pub fn parse_mode(value: &str) -> Result<u32> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| SyncError::Configuration(format!("Invalid octal mode: {value}")))
}

/// Local mirror of a remote file: `<directory>/<parent segment>/<file name>`.
pub fn local_path(directory: &Path, remote_file: &str) -> Result<PathBuf> {
    let url = Url::parse(remote_file).map_err(|e| SyncError::parse("granule url", e))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    match segments[..] {
        [.., parent, file_name] => Ok(directory.join(parent).join(file_name)),
        _ => Err(SyncError::parse(
            "granule url",
            format!("{remote_file} has fewer than two path segments"),
        )),
    }
}

/// Create `directory` and any missing parents with permission `mode`.
pub async fn create_dir(directory: &Path, mode: u32) -> Result<()> {
    if fs::try_exists(directory).await.unwrap_or(false) {
        return Ok(());
    }
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(directory)
        .await
        .map_err(|e| SyncError::io(directory, e))
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| SyncError::io(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Stream `remote_file` into `local_file` and return a description of the transfer.
/// The body is written verbatim in chunks to a `.partial` sibling which is renamed
/// into place once complete.
pub async fn from_remote(
    session: &Session,
    remote_file: &str,
    local_file: &Path,
    mode: u32,
) -> Result<String> {
    let transfer_error = |source: HttpError| SyncError::TransferFailed {
        url: remote_file.to_string(),
        source,
    };

    // Make parent directories as necessary
    if let Some(parent) = local_file.parent() {
        create_dir(parent, mode).await?;
    }

    let response = session.get(remote_file).await.map_err(transfer_error)?;
    let output = format!("{} -->\n\t{}\n", remote_file, local_file.display());
    debug!("{output}");

    let mut partial = local_file.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let byte_count = match write_partial(response, remote_file, &partial).await {
        Ok(byte_count) => byte_count,
        Err(e) => {
            // Best effort, the next run recreates the file anyway
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "Unable to remove partial download");
                }
            }
            return Err(e);
        }
    };

    // Rename the file to remove .partial suffix
    fs::rename(&partial, local_file)
        .await
        .map_err(|e| SyncError::io(local_file, e))?;
    set_mode(local_file, mode).await?;

    debug!(bytes = byte_count, path = %local_file.display(), "Download complete");
    Ok(output)
}

async fn write_partial(response: Response, remote_file: &str, partial: &Path) -> Result<u64> {
    let file = File::create(partial)
        .await
        .map_err(|e| SyncError::io(partial, e))?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    let mut stream = response.bytes_stream();
    let mut byte_count = 0_u64;
    while let Some(bytes) = stream.try_next().await.map_err(|e| SyncError::TransferFailed {
        url: remote_file.to_string(),
        source: HttpError::from(e),
    })? {
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| SyncError::io(partial, e))?;
        byte_count += bytes.len() as u64;
    }
    writer.flush().await.map_err(|e| SyncError::io(partial, e))?;
    Ok(byte_count)
}
