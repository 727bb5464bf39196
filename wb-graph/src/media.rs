use crate::error::{GraphError, Result};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Fixed(u64),
    /// Stickers: animated and static webp files have different caps.
    Webp { animated: u64, still: u64 },
}

impl SizeLimit {
    pub fn bytes(self, animated: bool) -> u64 {
        match self {
            Self::Fixed(limit) => limit,
            Self::Webp { animated: cap, .. } if animated => cap,
            Self::Webp { still, .. } => still,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedMedia {
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub limit: SizeLimit,
}

impl SupportedMedia {
    pub fn check_size(&self, size: u64, animated: bool) -> Result<()> {
        let limit = self.limit.bytes(animated);
        if size > limit {
            return Err(GraphError::MediaTooLarge {
                mime_type: self.mime_type.to_string(),
                limit,
                size,
            });
        }
        Ok(())
    }
}

const fn media(
    extension: &'static str,
    mime_type: &'static str,
    limit: SizeLimit,
) -> SupportedMedia {
    SupportedMedia {
        extension,
        mime_type,
        limit,
    }
}

const SUPPORTED_MEDIA: &[SupportedMedia] = &[
    media("aac", "audio/aac", SizeLimit::Fixed(16 * MB)),
    media("amr", "audio/amr", SizeLimit::Fixed(16 * MB)),
    media("mp3", "audio/mpeg", SizeLimit::Fixed(16 * MB)),
    media("m4a", "audio/mp4", SizeLimit::Fixed(16 * MB)),
    media("ogg", "audio/ogg", SizeLimit::Fixed(16 * MB)),
    media("txt", "text/plain", SizeLimit::Fixed(100 * MB)),
    media("xls", "application/vnd.ms-excel", SizeLimit::Fixed(100 * MB)),
    media(
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        SizeLimit::Fixed(100 * MB),
    ),
    media("doc", "application/msword", SizeLimit::Fixed(100 * MB)),
    media(
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        SizeLimit::Fixed(100 * MB),
    ),
    media("ppt", "application/vnd.ms-powerpoint", SizeLimit::Fixed(100 * MB)),
    media(
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        SizeLimit::Fixed(100 * MB),
    ),
    media("pdf", "application/pdf", SizeLimit::Fixed(100 * MB)),
    media("jpeg", "image/jpeg", SizeLimit::Fixed(5 * MB)),
    media("png", "image/png", SizeLimit::Fixed(5 * MB)),
    media(
        "webp",
        "image/webp",
        SizeLimit::Webp {
            animated: 500 * KB,
            still: 100 * KB,
        },
    ),
    media("3gp", "video/3gpp", SizeLimit::Fixed(16 * MB)),
    media("mp4", "video/mp4", SizeLimit::Fixed(16 * MB)),
];

/// Finds the upload rules for a file extension (case-insensitive, leading dot
/// optional). `jpg` is treated as `jpeg`.
pub fn lookup_media(extension: &str) -> Result<SupportedMedia> {
    let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    let normalized = if normalized == "jpg" {
        "jpeg".to_string()
    } else {
        normalized
    };
    SUPPORTED_MEDIA
        .iter()
        .find(|media| media.extension == normalized)
        .copied()
        .ok_or_else(|| GraphError::UnsupportedMedia(extension.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpg_resolves_to_jpeg() {
        let media = lookup_media(".JPG").expect("jpg");
        assert_eq!(media.extension, "jpeg");
        assert_eq!(media.mime_type, "image/jpeg");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            lookup_media("exe"),
            Err(GraphError::UnsupportedMedia(ext)) if ext == "exe"
        ));
    }

    #[test]
    fn webp_limit_depends_on_animation() {
        let webp = lookup_media("webp").expect("webp");
        assert!(webp.check_size(200 * KB, true).is_ok());
        assert!(matches!(
            webp.check_size(200 * KB, false),
            Err(GraphError::MediaTooLarge { limit, .. }) if limit == 100 * KB
        ));
    }

    #[test]
    fn documents_allow_up_to_one_hundred_megabytes() {
        let pdf = lookup_media("pdf").expect("pdf");
        assert!(pdf.check_size(100 * MB, false).is_ok());
        assert!(pdf.check_size(100 * MB + 1, false).is_err());
    }
}
