use std::path::Path;

use anyhow::{Context, anyhow};
use image::{ColorType, DynamicImage, ImageFormat};

use crate::canvas::grid::PixelBuffer;
use crate::canvas::session::EditHistory;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    PNG,
    JPEG,
    TIFF,
}

impl ExportFormat {
    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::PNG => "PNG",
            ExportFormat::JPEG => "JPEG",
            ExportFormat::TIFF => "TIFF",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::PNG => "png",
            ExportFormat::JPEG => "jpg",
            ExportFormat::TIFF => "tiff",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(ExportFormat::PNG),
            "jpg" | "jpeg" => Some(ExportFormat::JPEG),
            "tif" | "tiff" => Some(ExportFormat::TIFF),
            _ => None,
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            ExportFormat::PNG => ImageFormat::Png,
            ExportFormat::JPEG => ImageFormat::Jpeg,
            ExportFormat::TIFF => ImageFormat::Tiff,
        }
    }
}

/// Convert a decoded image into the flat shape the block grid loads.
/// Gray sources stay single-channel and opaque colour sources stay RGB; the
/// grid expands both to RGBA.
pub fn pixel_buffer_from_image(image: DynamicImage) -> PixelBuffer {
    let (width, height) = (image.width(), image.height());
    match image.color() {
        ColorType::L8 | ColorType::L16 => {
            PixelBuffer::new(width, height, 1, image.into_luma8().into_raw())
        }
        color if color.has_alpha() => {
            PixelBuffer::new(width, height, 4, image.into_rgba8().into_raw())
        }
        _ => PixelBuffer::new(width, height, 3, image.into_rgb8().into_raw()),
    }
}

/// Decode an image file into a [`PixelBuffer`].
pub fn load_pixel_buffer(path: &Path) -> anyhow::Result<PixelBuffer> {
    let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let buffer = pixel_buffer_from_image(image);
    log::info!(
        "[exporter] loaded {} ({}x{}, {} channels)",
        path.display(),
        buffer.width,
        buffer.height,
        buffer.channels
    );
    Ok(buffer)
}

/// Encode an RGBA pixel buffer to disk.
pub fn save_pixel_buffer(
    buffer: &PixelBuffer,
    path: &Path,
    format: ExportFormat,
) -> anyhow::Result<()> {
    if buffer.channels != 4 {
        return Err(anyhow!(
            "expected an RGBA buffer, got {} channels",
            buffer.channels
        ));
    }
    let rgba = image::RgbaImage::from_raw(buffer.width, buffer.height, buffer.pixels.clone())
        .ok_or_else(|| {
            anyhow!(
                "failed to build {}x{} RGBA image",
                buffer.width,
                buffer.height
            )
        })?;

    // JPEG has no alpha channel
    let image = match format {
        ExportFormat::JPEG => {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).into_rgb8())
        }
        _ => DynamicImage::ImageRgba8(rgba),
    };
    image
        .save_with_format(path, format.image_format())
        .with_context(|| {
            format!(
                "failed to write {} as {}",
                path.display(),
                format.label()
            )
        })?;
    log::info!("[exporter] wrote {}", path.display());
    Ok(())
}

/// Export the live image of an edit history.
pub fn export_history(
    history: &EditHistory,
    path: &Path,
    format: ExportFormat,
) -> anyhow::Result<()> {
    if !history.is_valid() {
        return Err(anyhow!("no image loaded"));
    }
    save_pixel_buffer(&history.to_pixel_buffer(), path, format)
}
