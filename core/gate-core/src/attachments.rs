//! Image attachments queued for the next response.

use std::path::Path;

use base64::Engine as _;
use review_gate_protocol::Attachment;

use crate::error::{GateError, Result};

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Maps a file extension to an image MIME type. Non-images return `None`.
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Reads an image file and encodes it for a response.
pub fn load_attachment(path: &Path) -> Result<Attachment> {
    let rejected = |reason: String| GateError::AttachmentRejected {
        path: path.to_path_buf(),
        reason,
    };

    let mime_type = image_mime_type(path).ok_or_else(|| rejected("not an image".to_string()))?;

    let metadata = fs_err::metadata(path).map_err(|e| rejected(e.to_string()))?;
    if !metadata.is_file() {
        return Err(rejected("not a regular file".to_string()));
    }
    if metadata.len() > MAX_ATTACHMENT_BYTES {
        return Err(rejected(format!(
            "{} bytes exceeds the {} byte limit",
            metadata.len(),
            MAX_ATTACHMENT_BYTES
        )));
    }

    let bytes = fs_err::read(path).map_err(|e| rejected(e.to_string()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());

    Ok(Attachment {
        id: ulid::Ulid::new().to_string(),
        file_name,
        mime_type: mime_type.to_string(),
        size: bytes.len() as u64,
        base64_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mime_type_is_case_insensitive() {
        assert_eq!(image_mime_type(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(image_mime_type(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime_type(Path::new("notes.txt")), None);
        assert_eq!(image_mime_type(Path::new("Makefile")), None);
    }

    #[test]
    fn load_encodes_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let attachment = load_attachment(&path).unwrap();
        assert_eq!(attachment.file_name, "shot.png");
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.size, 3);
        assert_eq!(attachment.base64_data, "AQID");
    }

    #[test]
    fn non_image_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            load_attachment(&path),
            Err(GateError::AttachmentRejected { .. })
        ));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(load_attachment(&dir.path().join("gone.png")).is_err());
    }
}
