//! Inline image payloads attached to a submission.
//!
//! On the wire each image is a base64 string, either bare or wrapped in a
//! `data:<mime>;base64,` URL. Decoded payloads keep their bytes and a mime
//! type, which is taken from the data URL when it names an `image/` type,
//! otherwise sniffed from magic bytes or defaulted to PNG.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG image format.
    Png,
    /// JPEG image format.
    Jpeg,
    /// GIF image format.
    Gif,
    /// WebP image format.
    Webp,
}

impl ImageFormat {
    /// Attempts to detect the format from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Attempts to detect the format from a file path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Sniffs the format from the leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF8") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    /// The IANA mime type.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Gif => write!(f, "gif"),
            Self::Webp => write!(f, "webp"),
        }
    }
}

/// Limits applied when decoding images from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    /// Maximum number of images per submission.
    pub max_images: usize,
    /// Maximum decoded size of a single image in bytes.
    pub max_image_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_images: 8,
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

/// A decoded inline image: mime type plus raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Mime type, e.g. `image/jpeg`.
    pub mime_type: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImagePayload {
    /// Wraps raw bytes, sniffing the mime type.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = ImageFormat::sniff(&bytes)
            .unwrap_or(ImageFormat::Png)
            .mime_type()
            .to_string();
        Self { mime_type, bytes }
    }

    /// Decodes a wire payload: bare base64 or a `data:` URL.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ValidationError` if the payload is not valid base64
    /// or decodes to nothing.
    pub fn decode(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let (declared_mime, data) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let Some((header, data)) = rest.split_once(',') else {
                    return Err(TutorError::validation("image data URL has no payload"));
                };
                let Some(mime) = header.strip_suffix(";base64") else {
                    return Err(TutorError::validation("image data URL must be base64-encoded"));
                };
                (Some(mime.to_string()), data)
            }
            None => (None, encoded),
        };

        let bytes = STANDARD
            .decode(data)
            .map_err(|e| TutorError::validation(format!("image is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(TutorError::validation("image is empty"));
        }

        let declared_mime = declared_mime.filter(|m| {
            m.get(..6)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
                && m.len() > 6
        });
        Ok(match declared_mime {
            Some(mime_type) => Self { mime_type, bytes },
            None => Self::from_bytes(bytes),
        })
    }

    /// Decodes every wire payload in order, enforcing `limits`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ValidationError` for too many images, an invalid
    /// payload, or an image above the size limit.
    pub fn decode_all(encoded: &[String], limits: ImageLimits) -> Result<Vec<Self>> {
        if encoded.len() > limits.max_images {
            return Err(TutorError::validation(format!(
                "too many images: {} attached, at most {} allowed",
                encoded.len(),
                limits.max_images
            )));
        }
        encoded
            .iter()
            .enumerate()
            .map(|(index, payload)| {
                let image = Self::decode(payload)?;
                if image.bytes.len() > limits.max_image_bytes {
                    return Err(TutorError::validation(format!(
                        "image {} is {} bytes, larger than the {} byte limit",
                        index + 1,
                        image.bytes.len(),
                        limits.max_image_bytes
                    )));
                }
                Ok(image)
            })
            .collect()
    }

    /// Loads an image from disk, detecting the format from the extension and
    /// then the magic bytes.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Io` if the file cannot be read and
    /// `TutorError::ValidationError` if it is empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(TutorError::validation(format!(
                "image '{}' is empty",
                path.display()
            )));
        }
        let format = ImageFormat::from_path(path)
            .or_else(|| ImageFormat::sniff(&bytes))
            .unwrap_or(ImageFormat::Png);
        Ok(Self {
            mime_type: format.mime_type().to_string(),
            bytes,
        })
    }

    /// Encodes the bytes as bare base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Encodes the payload as a `data:` URL, the form sent by clients.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}
