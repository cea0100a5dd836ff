//! Image artifacts exchanged with the pixel editor and game surface.
//!
//! The editor rasterizes a 32×32 cell grid at 2 device pixels per cell into a
//! PNG with a transparent background and ships it as a base64 data URI.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("not a data URI")]
    NotDataUri,
    #[error("data URI is not base64 encoded")]
    NotBase64,
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("invalid base64 payload: {0}")]
    Decode(String),
    #[error("payload is empty")]
    Empty,
}

/// A decoded image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    media_type: String,
    bytes: Vec<u8>,
}

impl ImageArtifact {
    /// Parse `data:image/<subtype>;base64,<payload>`.
    pub fn parse(data_uri: &str) -> Result<Self, ImageError> {
        let rest = data_uri.trim().strip_prefix("data:").ok_or(ImageError::NotDataUri)?;
        let (media_type, payload) = rest.split_once(";base64,").ok_or(ImageError::NotBase64)?;
        if !media_type.starts_with("image/") {
            return Err(ImageError::UnsupportedMediaType(media_type.to_owned()));
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { media_type: media_type.to_owned(), bytes })
    }

    pub fn from_png_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if !bytes.starts_with(&PNG_SIGNATURE) {
            return Err(ImageError::UnsupportedMediaType("application/octet-stream".into()));
        }
        Ok(Self { media_type: "image/png".into(), bytes })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_png(&self) -> bool {
        self.bytes.starts_with(&PNG_SIGNATURE)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

/// Truncated form of a data URI for log lines: first 30 chars plus total size.
pub fn log_preview(data_uri: &str) -> String {
    let head: String = data_uri.chars().take(30).collect();
    format!("{head}... ({} bytes)", data_uri.len())
}
