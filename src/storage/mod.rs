//! Slip file storage.
//!
//! Files are written before the database transaction opens, so a failed
//! upload must delete what it stored. References are opaque strings the
//! store hands back (`/uploads/slips/<name>` for disk).

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED: &[(&str, &[&str])] = &[
    (".jpg", &["image/jpeg", "image/jpg"]),
    (".jpeg", &["image/jpeg", "image/jpg"]),
    (".png", &["image/png"]),
    (".webp", &["image/webp"]),
    (".heic", &["image/heic", "image/heif"]),
    (".heif", &["image/heic", "image/heif"]),
    (".pdf", &["application/pdf"]),
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("injected storage failure")]
    Injected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadRejected {
    #[error("slip file is empty")]
    Empty,
    #[error("slip file exceeds {0} bytes")]
    TooLarge(usize),
    #[error("slip must be JPG/PNG/WEBP/HEIC/PDF")]
    UnsupportedType,
}

/// An uploaded proof as received from the client.
#[derive(Clone, Debug)]
pub struct SlipUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SlipStorage: Send + Sync + 'static {
    /// Persists the file and returns its reference.
    async fn store(&self, upload: &SlipUpload) -> Result<String, StorageError>;

    /// Removes a stored file. Missing files are not an error.
    async fn delete(&self, reference: &str) -> Result<(), StorageError>;
}

impl SlipUpload {
    /// Lower-cased extension including the dot, or empty.
    pub fn extension(&self) -> String {
        Path::new(&self.file_name).extension().and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase())).unwrap_or_default()
    }

    pub fn check(&self, max_bytes: usize) -> Result<(), UploadRejected> {
        if self.bytes.is_empty() { return Err(UploadRejected::Empty); }
        if self.bytes.len() > max_bytes { return Err(UploadRejected::TooLarge(max_bytes)); }
        let ext = self.extension();
        let mime = self.content_type.trim().to_ascii_lowercase();
        let ok = ALLOWED.iter().any(|(e, mimes)| *e == ext && mimes.contains(&mime.as_str()));
        if ok { Ok(()) } else { Err(UploadRejected::UnsupportedType) }
    }

    /// `<millis>-<uuid fragment>-<sanitized base><ext>`, base capped at 40 chars.
    pub fn stored_name(&self) -> String {
        let ext = self.extension();
        let stem = Path::new(&self.file_name).file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let mut base: String = stem.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' }).take(40).collect();
        if base.is_empty() { base.push_str("slip"); }
        let unique = Uuid::now_v7().simple().to_string();
        format!("{}-{}-{base}{ext}", chrono::Utc::now().timestamp_millis(), &unique[unique.len() - 12..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, mime: &str, len: usize) -> SlipUpload {
        SlipUpload { file_name: name.into(), content_type: mime.into(), bytes: vec![1; len] }
    }

    #[test]
    fn test_check_accepts_images_and_pdf() {
        assert_eq!(upload("a.JPG", "image/jpeg", 10).check(100), Ok(()));
        assert_eq!(upload("scan.pdf", "application/pdf", 10).check(100), Ok(()));
    }

    #[test]
    fn test_check_rejects() {
        assert_eq!(upload("a.jpg", "image/jpeg", 0).check(100), Err(UploadRejected::Empty));
        assert_eq!(upload("a.jpg", "image/jpeg", 101).check(100), Err(UploadRejected::TooLarge(100)));
        assert_eq!(upload("a.exe", "application/octet-stream", 1).check(100), Err(UploadRejected::UnsupportedType));
        assert_eq!(upload("a.png", "image/jpeg", 1).check(100), Err(UploadRejected::UnsupportedType));
    }

    #[test]
    fn test_stored_name_is_sanitized() {
        let name = upload("../../my slip (1).png", "image/png", 1).stored_name();
        assert!(name.ends_with("-my_slip__1_.png"), "{name}");
        assert!(!name.contains('/'));
        assert!(upload("", "image/png", 1).stored_name().ends_with("-slip"));
    }
}
