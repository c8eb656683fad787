//! Extension-based content-type lookup for uploaded outputs.

use std::path::Path;

/// Fallback for extensions not in [`CONTENT_TYPES`].
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Known extensions (lower-case, without the dot) and their media types.
const CONTENT_TYPES: &[(&str, &str)] = &[
    // Images
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("psd", "image/vnd.adobe.photoshop"),
    ("svg", "image/svg+xml"),
    // Video
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    // Documents and text
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("json", "application/json"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Media type for a file path, decided by its extension alone.
pub fn content_type_for(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, media_type)| *media_type)
        .unwrap_or(OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psd_is_an_image_type() {
        let first = content_type_for(Path::new("psd_output/result.psd"));
        let second = content_type_for(Path::new("psd_output/result.psd"));
        assert_eq!(first, "image/vnd.adobe.photoshop");
        assert_eq!(first, second);
        assert!(first.starts_with("image/"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(content_type_for(Path::new("A.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("b.JpEg")), "image/jpeg");
    }

    #[test]
    fn report_files_are_text() {
        assert_eq!(
            content_type_for(Path::new("psd_saver_report.txt")),
            "text/plain"
        );
    }

    #[test]
    fn unknown_or_missing_extension_falls_back() {
        assert_eq!(content_type_for(Path::new("blob.xyz")), OCTET_STREAM);
        assert_eq!(content_type_for(Path::new("README")), OCTET_STREAM);
    }
}
