//! Preview rendering
//!
//! The cache treats rendering as an opaque capability behind
//! [`PreviewGenerator`]. [`TilePreviewGenerator`] is the stock renderer:
//! it composites provider artwork and icons with the `image` crate.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::state::data::{PreviewSize, PreviewSource, ShortcutActivity, WidgetProvider};

/// Icon inset around the placeholder tile icon, as a share of the icon size
const ICON_PADDING: f32 = 0.25;

/// Opacity of the desaturated shortcut watermark
const WATERMARK_ALPHA: f32 = 0.06;

const TILE_FILL: Rgba<u8> = Rgba([255, 255, 255, 48]);
const TILE_EDGE: Rgba<u8> = Rgba([255, 255, 255, 96]);

/// Renders one preview. Called on a blocking worker.
///
/// `reuse` is a recycled buffer of the requested size when the pool had one;
/// implementations should draw into it instead of allocating.
pub trait PreviewGenerator: Send + Sync {
    fn render(
        &self,
        source: &PreviewSource,
        size: PreviewSize,
        reuse: Option<RgbaImage>,
    ) -> Result<RgbaImage, RenderError>;
}

/// Default renderer driven by device metrics from [`RenderConfig`]
#[derive(Debug, Clone, Default)]
pub struct TilePreviewGenerator {
    config: RenderConfig,
}

impl TilePreviewGenerator {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Widget artwork is scaled to fit the width only and clipped vertically.
    /// Providers without artwork get a span_x x span_y grid of tiles with
    /// the icon centered in the first one.
    fn render_widget(
        &self,
        info: &WidgetProvider,
        size: PreviewSize,
        reuse: Option<RgbaImage>,
    ) -> Result<RgbaImage, RenderError> {
        let span_x = info.span_x.max(1);
        let span_y = info.span_y.max(1);
        let max_width = size
            .width
            .min(span_x.saturating_mul(self.config.cell_width_px))
            .max(1);

        let tile = self.config.tile_px.max(1);
        let (mut width, mut height) = match &info.preview {
            Some(art) => art.dimensions(),
            None => (tile * span_x, tile * span_y),
        };

        let mut scale = 1.0f32;
        if width > max_width {
            scale = max_width as f32 / width as f32;
            width = ((width as f32 * scale) as u32).max(1);
            height = ((height as f32 * scale) as u32).max(1);
        }

        let mut canvas = blank_canvas(reuse, size);
        let x = canvas.width().saturating_sub(width) / 2;

        if let Some(art) = &info.preview {
            let scaled = imageops::resize(&**art, width, height, FilterType::Triangle);
            imageops::overlay(&mut canvas, &scaled, x as i64, 0);
            return Ok(canvas);
        }

        let tile_w = ((tile as f32 * scale) as u32).max(1);
        let tile_h = ((tile as f32 * scale) as u32).max(1);
        let tile_image = placeholder_tile(tile_w, tile_h);
        for i in 0..span_x {
            for j in 0..span_y {
                imageops::overlay(
                    &mut canvas,
                    &tile_image,
                    (x + i * tile_w) as i64,
                    (j * tile_h) as i64,
                );
            }
        }

        let icon_size = self.config.icon_size_px.max(1);
        let min_offset = (icon_size as f32 * ICON_PADDING) as u32;
        let smallest_side = width.min(height) as f32;
        let icon_scale = (smallest_side / (icon_size + 2 * min_offset) as f32).min(scale);
        let icon_px = ((icon_size as f32 * icon_scale) as u32).max(1);

        let icon = icon_or_fallback(info.icon.as_deref(), &info.provider.package);
        let scaled = imageops::resize(&icon, icon_px, icon_px, FilterType::Triangle);
        let h_offset = tile_w.saturating_sub(icon_px) / 2 + x;
        let v_offset = tile_h.saturating_sub(icon_px) / 2;
        imageops::overlay(&mut canvas, &scaled, h_offset as i64, v_offset as i64);

        Ok(canvas)
    }

    /// A faint desaturated copy of the icon fills the preview as a watermark,
    /// the icon itself sits in the top left corner.
    fn render_shortcut(
        &self,
        info: &ShortcutActivity,
        size: PreviewSize,
        reuse: Option<RgbaImage>,
    ) -> Result<RgbaImage, RenderError> {
        if let Some(buffer) = &reuse {
            if buffer.dimensions() != (size.width, size.height) {
                return Err(RenderError::new(format!(
                    "improperly sized buffer {}x{} for a {} shortcut preview",
                    buffer.width(),
                    buffer.height(),
                    size
                )));
            }
        }
        let mut canvas = blank_canvas(reuse, size);

        let icon = icon_or_fallback(info.icon.as_deref(), &info.component.package);

        let cfg = &self.config;
        let watermark_side = size
            .width
            .saturating_sub(cfg.shortcut_padding_left + cfg.shortcut_padding_right)
            .max(1);
        let mut watermark =
            imageops::resize(&icon, watermark_side, watermark_side, FilterType::Triangle);
        desaturate(&mut watermark, WATERMARK_ALPHA);
        imageops::overlay(
            &mut canvas,
            &watermark,
            cfg.shortcut_padding_left as i64,
            cfg.shortcut_padding_top as i64,
        );

        let icon_px = cfg.icon_size_px.max(1);
        let scaled = imageops::resize(&icon, icon_px, icon_px, FilterType::Triangle);
        imageops::overlay(&mut canvas, &scaled, 0, 0);

        Ok(canvas)
    }
}

impl PreviewGenerator for TilePreviewGenerator {
    fn render(
        &self,
        source: &PreviewSource,
        size: PreviewSize,
        reuse: Option<RgbaImage>,
    ) -> Result<RgbaImage, RenderError> {
        match source {
            PreviewSource::Widget(info) => self.render_widget(info, size, reuse),
            PreviewSource::Shortcut(info) => self.render_shortcut(info, size, reuse),
        }
    }
}

/// Clear a recycled buffer of the right size, or allocate a new one
fn blank_canvas(reuse: Option<RgbaImage>, size: PreviewSize) -> RgbaImage {
    match reuse {
        Some(mut buffer) if buffer.dimensions() == (size.width, size.height) => {
            for px in buffer.pixels_mut() {
                *px = Rgba([0, 0, 0, 0]);
            }
            buffer
        }
        _ => RgbaImage::new(size.width, size.height),
    }
}

fn placeholder_tile(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            TILE_EDGE
        } else {
            TILE_FILL
        }
    })
}

fn icon_or_fallback(icon: Option<&RgbaImage>, package: &str) -> RgbaImage {
    match icon {
        Some(icon) => icon.clone(),
        None => fallback_icon(package),
    }
}

/// Solid square in a color derived from the package name
fn fallback_icon(package: &str) -> RgbaImage {
    let hash = package
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let [r, g, b, _] = hash.to_le_bytes();
    RgbaImage::from_pixel(16, 16, Rgba([r, g, b, 255]))
}

/// Grayscale in place and scale alpha by `alpha`
fn desaturate(image: &mut RgbaImage, alpha: f32) {
    for px in image.pixels_mut() {
        let [r, g, b, a] = px.0;
        let luma = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8;
        *px = Rgba([luma, luma, luma, (a as f32 * alpha) as u8]);
    }
}
