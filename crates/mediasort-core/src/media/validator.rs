//! Header validation for media files.
//!
//! Checks the magic signature of each supported format using at most [`HEADER_PROBE_LEN`] bytes.
//! A damaged file is rejected here so the decoder never sees it. Unknown extensions pass: the
//! decoder gets a chance and fails downstream if it must.

use log::debug;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::config::{BMP_SIZE_TOLERANCE_BYTES, HEADER_PROBE_LEN};
use crate::media::kind::extension_of;
use crate::model::{ValidationErrorType, ValidationResult};

const JPEG_SOI: &[u8] = &[0xFF, 0xD8];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF87A: &[u8] = b"GIF87a";
const GIF89A: &[u8] = b"GIF89a";
const BMP_MAGIC: &[u8] = b"BM";
const RIFF: &[u8] = b"RIFF";
const WEBP: &[u8] = b"WEBP";
const FTYP: &[u8] = b"ftyp";
const EBML: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];

/// Container formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Jpeg,
    Png,
    Gif,
    Bmp,
    WebP,
    IsoBmff,
    Matroska,
}

impl Format {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "webp" => Some(Self::WebP),
            "mp4" | "m4v" | "mov" | "3gp" => Some(Self::IsoBmff),
            "mkv" | "webm" => Some(Self::Matroska),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Gif => "GIF",
            Self::Bmp => "BMP",
            Self::WebP => "WebP",
            Self::IsoBmff => "MP4/MOV",
            Self::Matroska => "MKV/WebM",
        }
    }

    /// Bytes needed before the signature can be judged.
    fn min_header_len(self) -> usize {
        match self {
            Self::Jpeg => 2,
            Self::Png => 8,
            Self::Gif => 6,
            Self::Bmp => 6,
            Self::WebP => 12,
            Self::IsoBmff => 8,
            Self::Matroska => 4,
        }
    }
}

/// Validates a file from its leading bytes and real size.
///
/// Only the first [`HEADER_PROBE_LEN`] bytes of `header` are looked at.
pub fn validate(name: &str, header: &[u8], actual_size: u64) -> ValidationResult {
    let Some(format) = extension_of(name).as_deref().and_then(Format::from_extension) else {
        return ValidationResult::valid();
    };

    if actual_size == 0 {
        return ValidationResult::invalid(
            ValidationErrorType::EmptyFile,
            format!("{} is empty (0 bytes)", name),
            "Re-copy the file from its original source",
        );
    }

    let header = &header[..header.len().min(HEADER_PROBE_LEN)];
    if header.len() < format.min_header_len() {
        return ValidationResult::invalid(
            ValidationErrorType::Truncated,
            format!(
                "{} header is {} bytes, {} needs at least {}",
                name,
                header.len(),
                format.label(),
                format.min_header_len()
            ),
            "The file was probably cut off during transfer",
        );
    }

    let result = match format {
        Format::Jpeg => check_prefix(header, JPEG_SOI, format),
        Format::Png => check_prefix(header, PNG_SIGNATURE, format),
        Format::Gif => {
            if header.starts_with(GIF87A) || header.starts_with(GIF89A) {
                ValidationResult::valid()
            } else {
                bad_signature(format)
            }
        }
        Format::Bmp => check_bmp(header, actual_size),
        Format::WebP => {
            if &header[0..4] == RIFF && &header[8..12] == WEBP {
                ValidationResult::valid()
            } else {
                bad_signature(format)
            }
        }
        Format::IsoBmff => {
            if &header[4..8] == FTYP {
                ValidationResult::valid()
            } else {
                bad_signature(format)
            }
        }
        Format::Matroska => check_prefix(header, EBML, format),
    };

    if !result.is_valid {
        debug!("validate: {} rejected ({:?})", name, result.error_type);
    }
    result
}

/// Validates an in-memory file, such as a finished download.
pub fn validate_bytes(name: &str, bytes: &[u8]) -> ValidationResult {
    validate(name, bytes, bytes.len() as u64)
}

/// Validates a local file, reading only its header.
pub async fn validate_file(path: &Path) -> std::io::Result<ValidationResult> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let size = tokio::fs::metadata(path).await?.len();

    let mut file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN);
    (&mut file).take(HEADER_PROBE_LEN as u64).read_to_end(&mut header).await?;

    Ok(validate(&name, &header, size))
}

fn check_prefix(header: &[u8], signature: &[u8], format: Format) -> ValidationResult {
    if header.starts_with(signature) {
        ValidationResult::valid()
    } else {
        bad_signature(format)
    }
}

fn check_bmp(header: &[u8], actual_size: u64) -> ValidationResult {
    if !header.starts_with(BMP_MAGIC) {
        return bad_signature(Format::Bmp);
    }
    let declared = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as u64;
    if declared.abs_diff(actual_size) > BMP_SIZE_TOLERANCE_BYTES {
        return ValidationResult::invalid(
            ValidationErrorType::SizeMismatch,
            format!("BMP header declares {} bytes but the file has {}", declared, actual_size),
            "The file was probably cut off during transfer",
        );
    }
    ValidationResult::valid()
}

fn bad_signature(format: Format) -> ValidationResult {
    ValidationResult::invalid(
        ValidationErrorType::InvalidSignature,
        format!("Not a valid {} file (signature mismatch)", format.label()),
        "The file may be corrupt or have the wrong extension",
    )
}
