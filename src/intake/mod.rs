//! File Intake
//!
//! Turns a user-selected file into the forms the pipelines consume: a data
//! URL for previews and a decoded image for inference and canvas drawing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// A selected image file held in memory
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// File name as shown to the user
    pub name: String,
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// MIME type sniffed from the contents
    pub mime: String,
}

impl UploadedFile {
    /// Build an upload from raw bytes, rejecting anything that is not an image
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> PipelineResult<Self> {
        let name = name.into();
        let format = image::guess_format(&bytes)
            .map_err(|_| PipelineError::UnsupportedFile(name.clone()))?;

        Ok(Self {
            name,
            bytes,
            mime: format.to_mime_type().to_string(),
        })
    }

    /// Encode the file as a `data:` URL usable as an image source
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    /// Decode the image contents
    pub fn decode(&self) -> PipelineResult<DynamicImage> {
        Ok(image::load_from_memory(&self.bytes)?)
    }

    /// Decode on a blocking worker
    pub async fn decode_async(&self) -> PipelineResult<DynamicImage> {
        let bytes = self.bytes.clone();
        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(std::io::Error::other)?
            .map_err(PipelineError::from)
    }

    /// Read the file into a preview on a blocking worker
    pub async fn read_preview(&self) -> PipelineResult<PreviewImage> {
        let file = self.clone();
        tokio::task::spawn_blocking(move || PreviewImage::from_upload(&file))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Decoded preview of the most recently selected file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    /// Inline `data:` URL of the original bytes
    pub data_url: String,
    /// Natural width in pixels
    pub width: u32,
    /// Natural height in pixels
    pub height: u32,
}

impl PreviewImage {
    /// Build a preview from an upload
    pub fn from_upload(file: &UploadedFile) -> PipelineResult<Self> {
        let image = file.decode()?;
        Ok(Self {
            data_url: file.to_data_url(),
            width: image.width(),
            height: image.height(),
        })
    }
}

/// Reads user selections from disk
pub struct FileIntake;

impl FileIntake {
    /// Read the selected file, if any
    ///
    /// `None` means nothing was chosen and is not an error.
    pub async fn read(path: Option<&Path>) -> PipelineResult<Option<UploadedFile>> {
        let Some(path) = path else {
            return Ok(None);
        };

        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file = UploadedFile::from_bytes(name, bytes)?;
        debug!("Read {} ({}, {} bytes)", file.name, file.mime, file.bytes.len());
        Ok(Some(file))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode a solid-colour PNG for tests
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub(crate) fn png_upload(name: &str, width: u32, height: u32) -> UploadedFile {
        UploadedFile::from_bytes(name, png_bytes(width, height)).unwrap()
    }

    #[test]
    fn test_mime_is_sniffed() {
        let file = png_upload("a.png", 2, 2);
        assert_eq!(file.mime, "image/png");
    }

    #[test]
    fn test_non_image_rejected() {
        let result = UploadedFile::from_bytes("notes.txt", b"hello world".to_vec());
        assert!(matches!(result, Err(PipelineError::UnsupportedFile(name)) if name == "notes.txt"));
    }

    #[test]
    fn test_data_url() {
        let file = png_upload("a.png", 1, 1);
        let url = file.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));

        let payload = url.trim_start_matches("data:image/png;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), file.bytes);
    }

    #[test]
    fn test_preview_dimensions() {
        let file = png_upload("wide.png", 7, 3);
        let preview = PreviewImage::from_upload(&file).unwrap();
        assert_eq!((preview.width, preview.height), (7, 3));
    }

    #[tokio::test]
    async fn test_read_none_is_noop() {
        let result = FileIntake::read(None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, png_bytes(4, 4)).unwrap();

        let file = FileIntake::read(Some(&path)).await.unwrap().unwrap();
        assert_eq!(file.name, "shot.png");
        assert_eq!(file.decode().unwrap().width(), 4);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let result = FileIntake::read(Some(Path::new("/nonexistent/shot.png"))).await;
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }
}
