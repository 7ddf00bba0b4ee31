//! Badge renderer: a tier-colored disc carrying the admission rate.
//!
//! Each badge is written as a tiny SVG and rasterized with `resvg`. The
//! label font is compiled into the binary, so the output never depends on
//! installed fonts and the same `(tier, rate)` always produces the same
//! pixels.

use std::{
    io::Cursor,
    sync::{Arc, OnceLock},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbaImage};
use resvg::{tiny_skia, usvg};

use crate::{
    config::{tier_color, Color, BADGE_RADIUS, BADGE_SIZE},
    error::{Error, Result},
    record::Tier,
};

/// Shown when the rate text has no leading number.
pub const RATE_FALLBACK: &str = "0";

const FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");
const FONT_FAMILY: &str = "DejaVu Sans";
const FONT_SIZE: f64 = 12.0;

// Baseline drop that puts the digits' vertical middle on the center.
const BASELINE_SHIFT: f64 = FONT_SIZE * 0.36;

// ---------------------------------------------------------------------------
// Rate text
// ---------------------------------------------------------------------------

/// Turn a rate such as `"7.04%"` into the badge label (`"7.0"`).
///
/// `"100.00"` and `"0.00"` are shortened to `"100"` and `"0"`; everything
/// else gets exactly one fractional digit.
pub fn format_rate(rate: &str) -> String {
    let stripped = rate.replace('%', "");
    match stripped.as_str() {
        "100.00" => return "100".to_string(),
        "0.00" => return "0".to_string(),
        _ => {}
    }
    match parse_float_prefix(&stripped) {
        Some(value) if value.is_finite() => to_fixed_1(value).replace('%', ""),
        _ => RATE_FALLBACK.to_string(),
    }
}

/// Parse the longest numeric prefix, ignoring leading whitespace and any
/// trailing garbage (`"7.5 pct"` is 7.5).
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse().ok()
}

/// One fractional digit. Values sitting exactly halfway between two tenths
/// (only multiples of 0.25 can) round away from zero.
fn to_fixed_1(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    let quarters = value * 4.0;
    if quarters.fract() == 0.0 && quarters.rem_euclid(2.0) == 1.0 {
        let tenths = (value.abs() * 10.0).ceil();
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{sign}{:.1}", tenths / 10.0);
    }
    format!("{value:.1}")
}

// ---------------------------------------------------------------------------
// Badge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    image: RgbaImage,
    label: String,
    color: Color,
}

impl Badge {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    pub fn to_data_uri(&self) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(self.to_png()?)))
    }
}

/// Badge at the default 50×50 size.
pub fn render(tier: &Tier, rate: &str) -> Result<Badge> {
    render_sized(tier, rate, BADGE_SIZE, BADGE_RADIUS)
}

pub fn render_sized(tier: &Tier, rate: &str, size: u32, radius: f64) -> Result<Badge> {
    let color = tier_color(tier);
    let label = format_rate(rate);
    let svg = badge_svg(size, radius, color, &label);
    let image = rasterize(&svg, size)?;
    Ok(Badge { image, label, color })
}

/// `label` comes from [`format_rate`], so it never needs escaping.
fn badge_svg(size: u32, radius: f64, color: Color, label: &str) -> String {
    let c = size as f64 / 2.0;
    format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='{size}' height='{size}' viewBox='0 0 {size} {size}'>\
         <circle cx='{c}' cy='{c}' r='{radius}' fill='{fill}'/>\
         <text x='{c}' y='{y:.2}' text-anchor='middle' fill='#000000' \
         font-family='{FONT_FAMILY}' font-weight='bold' font-size='{FONT_SIZE}'>{label}</text>\
         </svg>",
        fill = color.hex(),
        y = c + BASELINE_SHIFT,
    )
}

fn fonts() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_font_data(FONT_BYTES.to_vec());
            db.set_sans_serif_family(FONT_FAMILY);
            Arc::new(db)
        })
        .clone()
}

fn rasterize(svg: &str, size: u32) -> Result<RgbaImage> {
    let mut opt = usvg::Options::default();
    opt.font_family = FONT_FAMILY.to_string();
    opt.fontdb = fonts();
    let tree = usvg::Tree::from_str(svg, &opt).map_err(|e| Error::Raster(e.to_string()))?;

    let mut pixmap = tiny_skia::Pixmap::new(size, size)
        .ok_or_else(|| Error::Raster(format!("cannot allocate {size}x{size} pixmap")))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    // tiny-skia keeps premultiplied alpha
    let rgba = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(size, size, rgba)
        .ok_or_else(|| Error::Raster("pixel buffer size mismatch".into()))
}
