//! Media type classification by file extension.

use serde::{Deserialize, Serialize};

/// Image extensions that are always listed.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Video extensions listed when video is enabled and the file is under the size cap.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "3gp", "mkv", "webm"];

/// Containers never listed, whatever the settings say.
///
/// AVI keeps its index at the end of the file, and range reads over a share can't seek it
/// reliably, so playback stalls.
pub const EXCLUDED_EXTENSIONS: &[&str] = &["avi"];

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Lowercased extension of `name`, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classifies a file name. Returns `None` for unknown and excluded extensions.
pub fn media_kind(name: &str) -> Option<MediaKind> {
    let ext = extension_of(name)?;
    let ext = ext.as_str();
    if EXCLUDED_EXTENSIONS.contains(&ext) {
        None
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Which files a listing keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFilter {
    pub include_video: bool,
    pub max_video_size_mb: u64,
}

impl MediaFilter {
    pub fn images_only() -> Self {
        Self {
            include_video: false,
            max_video_size_mb: 0,
        }
    }

    pub fn max_video_bytes(&self) -> u64 {
        self.max_video_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Whether a file with this name and size belongs in a listing.
    pub fn accepts(&self, name: &str, size: u64) -> bool {
        match media_kind(name) {
            Some(MediaKind::Image) => true,
            Some(MediaKind::Video) => self.include_video && size <= self.max_video_bytes(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("IMG_0001.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
    }

    #[test]
    fn dotfiles_and_bare_names_have_no_extension() {
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn classifies_known_kinds() {
        assert_eq!(media_kind("a.jpeg"), Some(MediaKind::Image));
        assert_eq!(media_kind("b.MP4"), Some(MediaKind::Video));
        assert_eq!(media_kind("c.txt"), None);
    }

    #[test]
    fn avi_is_never_accepted() {
        let filter = MediaFilter {
            include_video: true,
            max_video_size_mb: u64::MAX,
        };
        assert_eq!(media_kind("clip.avi"), None);
        assert!(!filter.accepts("clip.avi", 1));
        assert!(!filter.accepts("CLIP.AVI", 0));
    }

    #[test]
    fn images_ignore_size_cap() {
        let filter = MediaFilter::images_only();
        assert!(filter.accepts("huge.png", 500 * MB));
    }

    #[test]
    fn video_needs_flag_and_size() {
        let filter = MediaFilter {
            include_video: true,
            max_video_size_mb: 10,
        };
        assert!(filter.accepts("b.mp4", 5 * MB));
        assert!(filter.accepts("edge.mp4", 10 * MB));
        assert!(!filter.accepts("big.mp4", 10 * MB + 1));
        assert!(!MediaFilter::images_only().accepts("b.mp4", 1));
    }
}
