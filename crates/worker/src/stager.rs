//! Asset staging: fetch the job's input asset and make it readable by the
//! engine, either through its upload endpoint or by writing into a local
//! directory.

use std::path::{Path, PathBuf};

use relay_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use relay_core::media_type::content_type_for;
use tokio::io::AsyncWriteExt;

/// Filename used when the URL does not yield a usable one.
pub const DEFAULT_FILENAME: &str = "downloaded_image.png";

/// Extension for engine uploads whose source name has none.
const DEFAULT_EXTENSION: &str = "png";

/// Errors from staging an input asset.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Error downloading image: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Error downloading image: {0}")]
    Write(#[from] std::io::Error),

    #[error("Error uploading image: {0}")]
    Upload(#[source] ComfyUIApiError),

    #[error("No image data provided")]
    NoData,
}

/// A downloaded asset held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Derive a local filename from the URL path.
///
/// Takes the last non-empty path segment with query and fragment
/// stripped. Falls back to [`DEFAULT_FILENAME`] when there is no segment or
/// the segment has no extension.
pub fn filename_from_url(url: &str) -> String {
    let clean = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);

    let path = match clean.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    match path.rsplit('/').find(|s| !s.is_empty()) {
        Some(name) if has_extension(name) => name.to_string(),
        _ => DEFAULT_FILENAME.to_string(),
    }
}

fn has_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| !ext.is_empty())
}

/// Download `url` into memory.
pub async fn download_asset(
    client: &reqwest::Client,
    url: &str,
) -> Result<StagedAsset, StageError> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?.to_vec();

    let filename = filename_from_url(url);
    tracing::info!(filename, size = bytes.len(), "Downloaded input asset");
    Ok(StagedAsset { filename, bytes })
}

/// A random `<uuid>.<ext>` name keeping the extension of `source`.
pub fn random_filename(source: &str) -> String {
    let extension = Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);
    format!("{}.{extension}", uuid::Uuid::new_v4())
}

/// Stream `url` into `dir` under its URL-derived name, returning the final
/// path.
pub async fn download_to_path(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
) -> Result<PathBuf, StageError> {
    download_to_path_as(client, url, dir, &filename_from_url(url)).await
}

/// Stream `url` into `dir/filename`, returning the final path.
///
/// The body is written to a hidden `.part` file that is renamed into place
/// only after the last byte arrives, so a failed download never leaves a
/// truncated file under the final name.
pub async fn download_to_path_as(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    filename: &str,
) -> Result<PathBuf, StageError> {
    tokio::fs::create_dir_all(dir).await?;

    let target = dir.join(filename);
    let partial = dir.join(format!(".{filename}.part"));

    if let Err(e) = stream_to_file(client, url, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    tokio::fs::rename(&partial, &target).await?;

    tracing::info!(path = %target.display(), "Downloaded input asset");
    Ok(target)
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), StageError> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Push a staged asset into the engine's input directory.
///
/// The asset is stored under a random `<uuid>.<ext>` name (overwriting any
/// previous file of that name), which is returned for recipe injection.
pub async fn upload_to_engine(
    api: &ComfyUIApi,
    asset: Option<StagedAsset>,
) -> Result<String, StageError> {
    let asset = asset.ok_or(StageError::NoData)?;

    let filename = random_filename(&asset.filename);
    let content_type = content_type_for(Path::new(&filename));

    api.upload_image(&filename, asset.bytes, content_type)
        .await
        .map_err(StageError::Upload)?;

    tracing::info!(filename, "Uploaded input asset to ComfyUI");
    Ok(filename)
}
