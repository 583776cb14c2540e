use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use reqwest::Client;
use tracing::{debug, warn};

use crate::feedback::image::ImageRef;
use crate::utils::text::{summarize_error_body, truncate_for_log};

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" || brand == b"mif1" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" | "image/heif" => Some("heic"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

/// The URL the chat model receives for an image.
///
/// Local files become `data:` URLs when `inline_local` is set; otherwise their public
/// URL is used, and a local file without one is an error.
pub async fn attachment_url(image: &ImageRef, inline_local: bool) -> Result<String> {
    match image {
        ImageRef::Remote(url) => Ok(url.to_string()),
        ImageRef::Local { path, public_url } => {
            if inline_local {
                return encode_data_url(path).await;
            }
            public_url.clone().ok_or_else(|| {
                anyhow!(
                    "{} is a local file; enable INLINE_LOCAL_IMAGES or use a public URL",
                    path.display()
                )
            })
        }
    }
}

async fn encode_data_url(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        return Err(anyhow!("Image {} is empty", path.display()));
    }
    let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
    let encoded = general_purpose::STANDARD.encode(&bytes);
    debug!(
        "Inlining {} as {} ({} bytes)",
        path.display(),
        mime_type,
        bytes.len()
    );
    Ok(format!("data:{};base64,{}", mime_type, encoded))
}

pub async fn download_media(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await.map_err(|err| {
        warn!(
            "Failed to fetch media {url}: {err} (timeout={}, connect={}, status={:?})",
            err.is_timeout(),
            err.is_connect(),
            err.status()
        );
        anyhow!("Failed to fetch {}: {}", url, err)
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        warn!(
            "Media download failed for {url} with status {}: {}",
            status,
            truncate_for_log(&body_summary, 800)
        );
        return Err(anyhow!(
            "Download of {} failed with status {}: {}",
            url,
            status,
            message.unwrap_or(body_summary)
        ));
    }

    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

/// Writes generated image bytes to `path`, re-encoding to the format its extension names.
///
/// Bytes the `image` crate cannot decode are written unchanged.
pub async fn write_generated_image(bytes: Vec<u8>, path: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let target_format = ImageFormat::from_path(&path).ok();
        match (target_format, image::load_from_memory(&bytes)) {
            (Some(ImageFormat::Jpeg), Ok(decoded)) => {
                decoded
                    .to_rgb8()
                    .save_with_format(&path, ImageFormat::Jpeg)
                    .with_context(|| format!("Failed to encode {}", path.display()))?;
            }
            (Some(format), Ok(decoded)) => {
                decoded
                    .save_with_format(&path, format)
                    .with_context(|| format!("Failed to encode {}", path.display()))?;
            }
            (_, decoded) => {
                if let Err(err) = decoded {
                    debug!("Writing generated image without re-encoding: {err}");
                }
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Ok(path)
    })
    .await
    .map_err(|err| anyhow!("Image writer task failed: {err}"))?
}
