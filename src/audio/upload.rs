//! Reading an uploaded audio file out of a multipart request.

use crate::config::UploadConfig;
use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;

/// Raw bytes of one uploaded file, buffered fully in memory.
///
/// Lives for the duration of a single request.
#[derive(Debug, Clone)]
pub struct UploadedAudio {
    pub bytes: Vec<u8>,
    /// Filename the client reported, if any
    pub filename: Option<String>,
    /// Content type the client reported, if any
    pub content_type: Option<String>,
}

impl UploadedAudio {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Pull the audio field out of a multipart body.
///
/// ## Rules:
/// - The file must arrive in the field named `config.field_name`
/// - Other fields are drained and ignored
/// - The upload is rejected as soon as it grows past `config.max_bytes`
/// - A zero-byte file is rejected
pub async fn read_upload(payload: &mut Multipart, config: &UploadConfig) -> AppResult<UploadedAudio> {
    let mut upload: Option<UploadedAudio> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let is_audio_field = field.name() == Some(config.field_name.as_str());
        if !is_audio_field || upload.is_some() {
            drain(&mut field).await?;
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|s| s.to_string());
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > config.max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "File too large: more than {} bytes",
                    config.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        upload = Some(UploadedAudio {
            bytes,
            filename,
            content_type,
        });
    }

    let upload = upload.ok_or_else(|| {
        AppError::BadRequest(format!("No file provided in field '{}'", config.field_name))
    })?;

    if upload.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    Ok(upload)
}

async fn drain(field: &mut Field) -> AppResult<()> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
    }
    Ok(())
}
