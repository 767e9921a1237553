use std::path::Path as FsPath;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use courier_types::api::{Claims, MediaUploadResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// 25 MB upload limit for media attachments
pub const MAX_MEDIA_SIZE: usize = 25 * 1024 * 1024;

const MEDIA_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/webm", "webm"),
    ("audio/mp4", "m4a"),
];

/// POST /media: raw bytes with a Content-Type from `MEDIA_TYPES`. Stored
/// under the SHA-256 of the content, so re-uploads are free.
pub async fn upload_media(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    if bytes.len() > MAX_MEDIA_SIZE {
        return Err(ApiError::PayloadTooLarge(MAX_MEDIA_SIZE));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let extension = extension_for(content_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported media type '{}'", content_type)))?;

    let name = format!("{}.{}", hex::encode(Sha256::digest(&bytes)), extension);

    if store_media(&state.media_dir, &name, &bytes).await? {
        info!("{} uploaded media {} ({} bytes)", claims.sub, name, bytes.len());
    } else {
        debug!("Media {} already stored", name);
    }

    Ok((
        StatusCode::CREATED,
        Json(MediaUploadResponse {
            media_url: state.media_url(&name),
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /media/{name}
pub async fn download_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Only names this server produced; rules out path traversal.
    let content_type = content_type_for(&name).ok_or_else(|| ApiError::NotFound(format!("media {}", name)))?;

    let bytes = match tokio::fs::read(state.media_dir.join(&name)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("media {}", name)));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}

/// Write `bytes` under `dir/name` unless it is already there. Returns `false`
/// when another upload stored the same content first.
async fn store_media(dir: &FsPath, name: &str, bytes: &[u8]) -> std::io::Result<bool> {
    let path = dir.join(name);
    if tokio::fs::try_exists(&path).await? {
        return Ok(false);
    }
    tokio::fs::create_dir_all(dir).await?;

    // Readers only ever see the final name, fully written.
    let tmp = dir.join(format!("{}.{}.part", name, Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    match tokio::fs::rename(&tmp, &path).await {
        Ok(()) => Ok(true),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            if tokio::fs::try_exists(&path).await? {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    MEDIA_TYPES
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
}

/// Content type for a stored name of the form `<64 hex>.<ext>`.
fn content_type_for(name: &str) -> Option<&'static str> {
    let (digest, ext) = name.split_once('.')?;
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return None;
    }
    MEDIA_TYPES.iter().find(|(_, e)| *e == ext).map(|(mime, _)| *mime)
}
