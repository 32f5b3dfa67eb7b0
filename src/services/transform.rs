//! Resize stage: encoded image in, encoded derivative out.
//!
//! The `image` decoders need `Seek`, so the encoded source is collected
//! before decoding. Collection stops as soon as `max_source_bytes` is
//! crossed, and the header is checked against `max_pixels` before any pixel
//! buffer is allocated. The derivative keeps the source container.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

use crate::config::ResizeConfig;
use crate::services::error::PipelineError;
use crate::services::storage::{ChunkStream, ObjectWriter};

/// An encoded derivative.
#[derive(Debug, Clone)]
pub struct Resized {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

#[derive(Debug, Clone)]
pub struct ResizeTransform {
    target_width: u32,
    jpeg_quality: u8,
    max_source_bytes: usize,
    max_pixels: u64,
    chunk_size: usize,
}

impl ResizeTransform {
    pub fn new(config: &ResizeConfig) -> Self {
        Self {
            target_width: config.target_width.max(1),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            max_source_bytes: config.max_source_bytes,
            max_pixels: config.max_pixels,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Resize `input` and emit the encoded derivative in `chunk_size` pieces.
    ///
    /// `hint` is used only when the container cannot be sniffed from the
    /// bytes. Any failure is emitted as the single error item of the stream.
    pub fn transform(&self, input: ChunkStream, hint: Option<ImageFormat>) -> ChunkStream {
        let this = self.clone();
        let chunk_size = self.chunk_size;

        let output = futures::stream::once(async move {
            let data = this.collect_source(input).await?;
            let resized = this.resize_blocking(data, hint).await?;
            Ok::<_, PipelineError>(resized.data)
        })
        .flat_map(move |result| {
            let items: Vec<Result<Bytes, PipelineError>> = match result {
                Ok(data) => split_chunks(data, chunk_size).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(items)
        });

        Box::pin(output)
    }

    /// Drive [`transform`](Self::transform) into a sink writer.
    ///
    /// The writer is finished only after the last chunk was accepted; on
    /// failure it is dropped unfinished, which aborts the upload.
    pub async fn run(
        &self,
        input: ChunkStream,
        hint: Option<ImageFormat>,
        mut writer: ObjectWriter,
    ) -> Result<u64, PipelineError> {
        let mut output = self.transform(input, hint);
        let mut written = 0u64;

        while let Some(chunk) = output.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            writer.write(chunk).await?;
        }

        writer.finish().await?;
        Ok(written)
    }

    async fn collect_source(&self, mut input: ChunkStream) -> Result<Bytes, PipelineError> {
        let mut buffer = BytesMut::new();

        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > self.max_source_bytes {
                return Err(PipelineError::SourceTooLarge {
                    limit: self.max_source_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }

    async fn resize_blocking(
        &self,
        data: Bytes,
        hint: Option<ImageFormat>,
    ) -> Result<Resized, PipelineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.resize(&data, hint))
            .await
            .map_err(|e| PipelineError::Decode(format!("resize task failed: {}", e)))?
    }

    /// Decode, scale to the target width and re-encode in the source format.
    pub fn resize(&self, data: &[u8], hint: Option<ImageFormat>) -> Result<Resized, PipelineError> {
        if data.is_empty() {
            return Err(PipelineError::Decode("source object is empty".to_string()));
        }

        let format = image::io::Reader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(e.to_string()))?
            .format()
            .or(hint)
            .ok_or_else(|| PipelineError::Decode("unrecognized image format".to_string()))?;

        let (width, height) = reader_for(data, format)
            .into_dimensions()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::Decode("image has no pixels".to_string()));
        }

        let (new_width, new_height) = target_dimensions(width, height, self.target_width);
        let largest = (width as u64 * height as u64).max(new_width as u64 * new_height as u64);
        if largest > self.max_pixels {
            return Err(PipelineError::Decode(format!(
                "{}x{} image exceeds the {} pixel limit",
                width, height, self.max_pixels
            )));
        }

        let img = reader_for(data, format)
            .decode()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;

        debug!(
            original_width = width,
            original_height = height,
            width = new_width,
            height = new_height,
            format = ?format,
            "Resizing image"
        );

        let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);
        let data = self.encode(&resized, format)?;
        let (width, height) = resized.dimensions();

        Ok(Resized {
            data,
            width,
            height,
            format,
        })
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> Result<Bytes, PipelineError> {
        let mut out = Vec::new();
        let mut cursor = Cursor::new(&mut out);

        let result = match format {
            // JPEG has no alpha and no 16-bit samples.
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut cursor, ImageOutputFormat::Jpeg(self.jpeg_quality)),
            other => img.write_to(&mut cursor, other),
        };

        result.map_err(|e| PipelineError::Encode(format!("{:?}: {}", format, e)))?;
        Ok(Bytes::from(out))
    }
}

fn reader_for(data: &[u8], format: ImageFormat) -> image::io::Reader<Cursor<&[u8]>> {
    let mut reader = image::io::Reader::new(Cursor::new(data));
    reader.set_format(format);
    reader
}

/// Width is fixed; height keeps the aspect ratio, rounded, at least 1.
pub fn target_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    let ratio = target_width as f64 / width as f64;
    let target_height = (height as f64 * ratio).round().max(1.0) as u32;
    (target_width, target_height)
}

fn split_chunks(data: Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), format).unwrap();
        out
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 90]));
        encode(DynamicImage::ImageRgb8(img), ImageOutputFormat::Jpeg(90))
    }

    fn png_rgba(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128]));
        encode(DynamicImage::ImageRgba8(img), ImageOutputFormat::Png)
    }

    fn transform(width: u32) -> ResizeTransform {
        ResizeTransform::new(&ResizeConfig::with_width(width))
    }

    fn stream_of(data: Vec<u8>, chunk: usize) -> ChunkStream {
        let chunks: Vec<Result<Bytes, PipelineError>> =
            split_chunks(Bytes::from(data), chunk).into_iter().map(Ok).collect();
        Box::pin(futures::stream::iter(chunks))
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(1000, 800, 500), (500, 400));
        assert_eq!(target_dimensions(800, 1200, 500), (500, 750));
        assert_eq!(target_dimensions(250, 100, 500), (500, 200));
        assert_eq!(target_dimensions(3000, 1, 500), (500, 1));
        assert_eq!(target_dimensions(999, 333, 500), (500, 167));
    }

    #[test]
    fn test_resize_jpeg_keeps_aspect_and_format() {
        let resized = transform(500).resize(&jpeg(1000, 800), None).unwrap();
        assert_eq!((resized.width, resized.height), (500, 400));
        assert_eq!(resized.format, ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&resized.data).unwrap();
        assert_eq!(decoded.dimensions(), (500, 400));
        assert_eq!(image::guess_format(&resized.data).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_resize_png_keeps_alpha() {
        let resized = transform(100).resize(&png_rgba(400, 200), None).unwrap();
        assert_eq!(resized.format, ImageFormat::Png);

        let decoded = image::load_from_memory(&resized.data).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_resize_upscales_narrow_images() {
        let resized = transform(500).resize(&png_rgba(50, 20), None).unwrap();
        assert_eq!((resized.width, resized.height), (500, 200));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = transform(500)
            .resize(b"definitely not an image", Some(ImageFormat::Png))
            .unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn test_unknown_bytes_without_hint_is_decode_error() {
        let err = transform(500).resize(b"plain text", None).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_empty_source_is_decode_error() {
        let err = transform(500).resize(&[], None).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_pixel_limit_checked_before_decode() {
        let mut config = ResizeConfig::with_width(10);
        config.max_pixels = 1_000;
        let err = ResizeTransform::new(&config)
            .resize(&png_rgba(100, 100), None)
            .unwrap_err();
        assert!(err.to_string().contains("pixel limit"));
    }

    #[tokio::test]
    async fn test_transform_emits_bounded_chunks() {
        let mut config = ResizeConfig::with_width(300);
        config.chunk_size = 256;
        let transform = ResizeTransform::new(&config);

        let chunks: Vec<Bytes> = transform
            .transform(stream_of(jpeg(600, 600), 100), None)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 256));

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let decoded = image::load_from_memory(&joined).unwrap();
        assert_eq!(decoded.dimensions(), (300, 300));
    }

    #[tokio::test]
    async fn test_oversized_source_stops_reading_early() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut config = ResizeConfig::with_width(500);
        config.max_source_bytes = 64 * 1024;
        let transform = ResizeTransform::new(&config);

        // 1 GB worth of 16 KB chunks, produced lazily.
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source: ChunkStream = Box::pin(
            futures::stream::repeat_with(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(Bytes::from(vec![0u8; 16 * 1024]))
            })
            .take(64 * 1024),
        );

        let items: Vec<_> = transform.transform(source, None).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(PipelineError::SourceTooLarge { limit: 65536 })
        ));
        assert!(pulled.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let source: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"\x89PNG")),
            Err(PipelineError::Transient("connection reset".into())),
        ]));

        let items: Vec<_> = transform(500).transform(source, None).collect().await;
        assert!(matches!(items.as_slice(), [Err(PipelineError::Transient(_))]));
    }
}
