use crate::error::{CompositeError, ConfigError};
use crate::placement::{PartInstance, PlacementSet, build_instances};
use crate::selection::Selection;
use crate::theme::Theme;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A scaled layer may be at most this many canvas widths on either side.
const MAX_LAYER_FACTOR: u64 = 8;

/// One flattened compositor pass and the inputs that produced it.
#[derive(Debug, Clone)]
pub struct CompositeImage {
    image: RgbImage,
    placements: PlacementSet,
    instances: Vec<PartInstance>,
    skipped: Vec<CompositeError>,
}

impl CompositeImage {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn placements(&self) -> &PlacementSet {
        &self.placements
    }

    pub fn instances(&self) -> &[PartInstance] {
        &self.instances
    }

    /// Layers that could not be drawn.
    pub fn skipped(&self) -> &[CompositeError] {
        &self.skipped
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }
}

/// Draws part instances onto a square canvas in z-order.
///
/// Decoded assets are cached for the lifetime of the compositor, so a
/// refinement run pays for decoding once.
pub struct Compositor {
    canvas_size: u32,
    background: [u8; 3],
    cache: Mutex<HashMap<PathBuf, Arc<RgbaImage>>>,
}

impl Compositor {
    pub fn new(canvas_size: u32, theme: &Theme) -> Self {
        Self {
            canvas_size,
            background: theme.background_rgb(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    /// Resolves `selections` against `placements` and composes them.
    pub fn compose_selections(
        &self,
        selections: &[Selection],
        placements: &PlacementSet,
    ) -> Result<CompositeImage, ConfigError> {
        if self.canvas_size == 0 {
            return Err(ConfigError::EmptyCanvas);
        }
        let instances = build_instances(selections, placements, self.canvas_size)?;
        Ok(self.compose(instances, placements))
    }

    pub fn compose(
        &self,
        instances: Vec<PartInstance>,
        placements: &PlacementSet,
    ) -> CompositeImage {
        let mut canvas =
            RgbImage::from_pixel(self.canvas_size, self.canvas_size, Rgb(self.background));
        let mut skipped = Vec::new();

        let mut order: Vec<usize> = (0..instances.len()).collect();
        order.sort_by_key(|&idx| {
            let instance = &instances[idx];
            (instance.category.z_rank(), instance.side, idx)
        });

        for idx in order {
            let instance = &instances[idx];
            let asset = match self.load_asset(instance) {
                Ok(asset) => asset,
                Err(err) => {
                    tracing::warn!(part = %instance.key(), error = %err, "skipping layer");
                    skipped.push(err);
                    continue;
                }
            };
            let (width, height) = match self.layer_size(instance, &asset) {
                Ok(size) => size,
                Err(err) => {
                    tracing::warn!(part = %instance.key(), error = %err, "skipping layer");
                    skipped.push(err);
                    continue;
                }
            };
            let layer = transform_layer(&asset, width, height, instance.mirrored);
            let left = instance.placement.x.round() as i64 - i64::from(layer.width() / 2);
            let top = instance.placement.y.round() as i64 - i64::from(layer.height() / 2);
            tracing::debug!(
                part = %instance.key(),
                x = instance.placement.x,
                y = instance.placement.y,
                scale = instance.placement.scale,
                width = layer.width(),
                height = layer.height(),
                "drawing layer"
            );
            blend_over(&mut canvas, &layer, left, top);
        }

        CompositeImage {
            image: canvas,
            placements: placements.clone(),
            instances,
            skipped,
        }
    }

    fn layer_size(
        &self,
        instance: &PartInstance,
        asset: &RgbaImage,
    ) -> Result<(u32, u32), CompositeError> {
        let width = scaled_dimension(asset.width(), instance.placement.scale);
        let height = scaled_dimension(asset.height(), instance.placement.scale);
        let limit = u64::from(self.canvas_size) * MAX_LAYER_FACTOR;
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) if width <= limit && height <= limit => Ok((w, h)),
            _ => Err(CompositeError::LayerTooLarge {
                category: instance.category,
                side: instance.side,
                width,
                height,
                limit,
            }),
        }
    }

    fn load_asset(&self, instance: &PartInstance) -> Result<Arc<RgbaImage>, CompositeError> {
        if let Some(cached) = self
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&instance.asset).cloned())
        {
            return Ok(cached);
        }

        if !instance.asset.is_file() {
            return Err(CompositeError::AssetNotFound {
                category: instance.category,
                side: instance.side,
                path: instance.asset.clone(),
            });
        }
        let decoded = image::open(&instance.asset)
            .map_err(|err| CompositeError::AssetDecode {
                category: instance.category,
                side: instance.side,
                path: instance.asset.clone(),
                message: err.to_string(),
            })?
            .to_rgba8();
        let decoded = Arc::new(decoded);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(instance.asset.clone(), decoded.clone());
        }
        Ok(decoded)
    }
}

/// Resamples to `width x height` with Lanczos3 and mirrors when asked.
fn transform_layer(asset: &RgbaImage, width: u32, height: u32, mirrored: bool) -> RgbaImage {
    let resized = if width == asset.width() && height == asset.height() {
        asset.clone()
    } else {
        imageops::resize(asset, width, height, FilterType::Lanczos3)
    };
    if mirrored {
        imageops::flip_horizontal(&resized)
    } else {
        resized
    }
}

/// `round(native * scale)`, at least 1 px. Saturates instead of wrapping.
fn scaled_dimension(native: u32, scale: f32) -> u64 {
    (f64::from(native) * f64::from(scale)).round().max(1.0) as u64
}

/// `out = bg * (1 - a) + fg * a` using the layer's own alpha channel.
fn blend_over(canvas: &mut RgbImage, layer: &RgbaImage, left: i64, top: i64) {
    let canvas_w = i64::from(canvas.width());
    let canvas_h = i64::from(canvas.height());
    let x_start = left.max(0);
    let y_start = top.max(0);
    let x_end = (left + i64::from(layer.width())).min(canvas_w);
    let y_end = (top + i64::from(layer.height())).min(canvas_h);
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    for y in y_start..y_end {
        for x in x_start..x_end {
            let src = layer.get_pixel((x - left) as u32, (y - top) as u32);
            let alpha = src[3];
            if alpha == 0 {
                continue;
            }
            let dst = canvas.get_pixel_mut(x as u32, y as u32);
            if alpha == u8::MAX {
                *dst = Rgb([src[0], src[1], src[2]]);
                continue;
            }
            let a = f32::from(alpha) / 255.0;
            for channel in 0..3 {
                let blended = f32::from(dst[channel]) * (1.0 - a) + f32::from(src[channel]) * a;
                dst[channel] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
