use crate::placement::PartInstance;
use crate::theme::Theme;
use anyhow::Result;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use std::path::Path;

const DIVIDER_WIDTH: u32 = 2;
const MARKER_ARM: f32 = 6.0;

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Always writes PNG, whatever the extension says.
pub fn write_output_png(image: &RgbImage, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, encode_png(image)?)?;
    Ok(())
}

pub fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Reference on the left, composite on the right, each `panel` pixels square.
pub fn side_by_side(
    reference: &RgbImage,
    composite: &RgbImage,
    panel: u32,
    theme: &Theme,
) -> RgbImage {
    let panel = panel.max(1);
    let mut out = RgbImage::from_pixel(panel * 2, panel, Rgb(theme.background_rgb()));
    let left = fit_panel(reference, panel);
    let right = fit_panel(composite, panel);
    imageops::replace(&mut out, &left, 0, 0);
    imageops::replace(&mut out, &right, i64::from(panel), 0);

    let divider = Rgb(theme.divider_rgb());
    let start = panel.saturating_sub(DIVIDER_WIDTH / 2);
    for x in start..(start + DIVIDER_WIDTH).min(panel * 2) {
        for y in 0..panel {
            out.put_pixel(x, y, divider);
        }
    }
    out
}

fn fit_panel(image: &RgbImage, panel: u32) -> RgbImage {
    if image.width() == panel && image.height() == panel {
        image.clone()
    } else {
        imageops::resize(image, panel, panel, FilterType::Lanczos3)
    }
}

/// Grid lines, centre axes and a cross per instance centre.
pub fn grid_overlay_svg(canvas_size: u32, instances: &[PartInstance], theme: &Theme) -> String {
    let size = canvas_size as f32;
    let center = size / 2.0;
    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{size}\" height=\"{size}\" viewBox=\"0 0 {size} {size}\">",
    ));

    let spacing = theme.grid_spacing.max(1) as usize;
    for offset in (0..=canvas_size).step_by(spacing) {
        let pos = offset as f32;
        svg.push_str(&format!(
            "<line x1=\"{pos}\" y1=\"0\" x2=\"{pos}\" y2=\"{size}\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"1\"/>",
            theme.grid_color, theme.grid_opacity
        ));
        svg.push_str(&format!(
            "<line x1=\"0\" y1=\"{pos}\" x2=\"{size}\" y2=\"{pos}\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"1\"/>",
            theme.grid_color, theme.grid_opacity
        ));
    }

    svg.push_str(&format!(
        "<line x1=\"{center}\" y1=\"0\" x2=\"{center}\" y2=\"{size}\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"2\"/>",
        theme.axis_color, theme.axis_opacity
    ));
    svg.push_str(&format!(
        "<line x1=\"0\" y1=\"{center}\" x2=\"{size}\" y2=\"{center}\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"2\"/>",
        theme.axis_color, theme.axis_opacity
    ));
    svg.push_str(&format!(
        "<circle cx=\"{center}\" cy=\"{center}\" r=\"4\" fill=\"{}\"/>",
        theme.center_color
    ));

    for instance in instances {
        let x = instance.placement.x;
        let y = instance.placement.y;
        svg.push_str(&format!(
            "<path d=\"M {:.2} {y:.2} L {:.2} {y:.2} M {x:.2} {:.2} L {x:.2} {:.2}\" stroke=\"{}\" stroke-width=\"1.5\" fill=\"none\"/>",
            x - MARKER_ARM,
            x + MARKER_ARM,
            y - MARKER_ARM,
            y + MARKER_ARM,
            theme.marker_color
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Rasterizes `svg` at the image's size and blends it over a copy.
#[cfg(feature = "grid")]
pub fn apply_overlay(image: &RgbImage, svg: &str) -> Result<RgbImage> {
    let opt = usvg::Options::default();
    let tree = usvg::Tree::from_str(svg, &opt)?;
    let mut pixmap = resvg::tiny_skia::Pixmap::new(image.width(), image.height())
        .ok_or_else(|| anyhow::anyhow!("Failed to allocate pixmap"))?;

    let mut pixmap_mut = pixmap.as_mut();
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap_mut);

    let mut out = image.clone();
    let width = image.width() as usize;
    for (idx, px) in pixmap.pixels().iter().enumerate() {
        let color = px.demultiply();
        let alpha = color.alpha();
        if alpha == 0 {
            continue;
        }
        let x = (idx % width) as u32;
        let y = (idx / width) as u32;
        let a = f32::from(alpha) / 255.0;
        let dst = out.get_pixel_mut(x, y);
        let src = [color.red(), color.green(), color.blue()];
        for channel in 0..3 {
            let blended = f32::from(dst[channel]) * (1.0 - a) + f32::from(src[channel]) * a;
            dst[channel] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}
