use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use monet_model::Metadata;
use serde_json::{Map, Value, json};
use std::io::Cursor;
use tracing::trace;

use super::{ExtractError, ExtractSource, MetadataExtractor};

pub const IMAGE_EXTRACTOR_VERSION: u32 = 2;

/// Preview heights stored under `metadata.scaled`, keyed by name.
const PREVIEW_HEIGHTS: &[(&str, u32)] = &[("thumbnail", 32), ("180", 180)];

/// Dimensions and small PNG previews for raster images.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataExtractor for ImageExtractor {
    fn name(&self) -> &'static str {
        "image"
    }

    fn version(&self) -> u32 {
        IMAGE_EXTRACTOR_VERSION
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &[
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "image/bmp",
            "image/tiff",
        ]
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg", "jpe", "png", "gif", "webp", "bmp", "tif", "tiff"]
    }

    async fn extract(&self, source: ExtractSource<'_>) -> Result<Metadata, ExtractError> {
        trace!(target: "catalog::extract", path = %source.path.display(), "identifying image");
        let bytes = source.read_all().await?;

        tokio::task::spawn_blocking(move || describe_image(&bytes))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))?
    }
}

fn describe_image(data: &[u8]) -> Result<Metadata, ExtractError> {
    let img = image::load_from_memory(data)
        .map_err(|e| ExtractError::Decode(format!("Failed to decode image: {e}")))?;
    let (width, height) = img.dimensions();

    let mut scaled = Map::new();
    for (name, target_height) in PREVIEW_HEIGHTS {
        scaled.insert(
            (*name).to_string(),
            Value::String(preview_data_uri(&img, *target_height)?),
        );
    }

    let mut metadata = Metadata::new();
    metadata.insert("dimensions", json!({ "width": width, "height": height }));
    metadata.insert("scaled", Value::Object(scaled));
    Ok(metadata)
}

/// Scale to `target_height` keeping the aspect ratio. Never upscales.
fn preview_data_uri(img: &DynamicImage, target_height: u32) -> Result<String, ExtractError> {
    let preview = if img.height() > target_height {
        img.resize(u32::MAX, target_height, FilterType::Triangle)
    } else {
        img.clone()
    };

    let mut buf = Vec::new();
    preview
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ExtractError::Decode(format!("Failed to encode preview: {e}")))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs};
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[tokio::test]
    async fn records_dimensions_and_previews() {
        let fs = InMemoryFs::new();
        fs.add_file("/photos/wide.png", png_bytes(400, 200));
        let path = Path::new("/photos/wide.png");
        let stat = fs.stat(path).await.expect("stat");

        let metadata = ImageExtractor::new()
            .extract(ExtractSource {
                path,
                stat: &stat,
                fs: &fs,
            })
            .await
            .expect("extract");

        assert_eq!(
            metadata.get("dimensions"),
            Some(&json!({"width": 400, "height": 200}))
        );
        let scaled = metadata.get("scaled").and_then(Value::as_object).expect("scaled");
        let thumb = scaled["thumbnail"].as_str().expect("thumbnail uri");
        assert!(thumb.starts_with("data:image/png;base64,"));

        let encoded = thumb.trim_start_matches("data:image/png;base64,");
        let decoded = image::load_from_memory(&STANDARD.decode(encoded).expect("base64"))
            .expect("decode thumbnail");
        assert_eq!(decoded.height(), 32);
        assert_eq!(decoded.width(), 64);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let img = image::load_from_memory(&png_bytes(10, 20)).expect("decode");
        let uri = preview_data_uri(&img, 180).expect("preview");
        let encoded = uri.trim_start_matches("data:image/png;base64,");
        let decoded = image::load_from_memory(&STANDARD.decode(encoded).expect("base64"))
            .expect("decode preview");
        assert_eq!(decoded.dimensions(), (10, 20));
    }

    #[tokio::test]
    async fn garbage_bytes_fail_to_decode() {
        let fs = InMemoryFs::new();
        fs.add_file("/broken.jpg", "not an image");
        let path = Path::new("/broken.jpg");
        let stat = fs.stat(path).await.expect("stat");

        let err = ImageExtractor::new()
            .extract(ExtractSource {
                path,
                stat: &stat,
                fs: &fs,
            })
            .await
            .expect_err("decode failure");
        assert!(matches!(err, ExtractError::Decode(_)));
    }
}
