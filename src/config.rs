//! Fixed map configuration and the tier color table.

use std::time::Duration;

use image::Rgba;

use crate::record::{Coordinate, Tier};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Haidian district center.
pub const DEFAULT_CENTER: Coordinate = Coordinate::new(116.298056, 39.959912);

pub const DEFAULT_ZOOM: f64 = 12.0;
pub const ZOOM_RANGE: (f64, f64) = (9.0, 18.0);

pub const BADGE_SIZE: u32 = 50;
pub const BADGE_RADIUS: f64 = 23.0;

pub const MARKER_OFFSET: (i32, i32) = (-25, -25);
pub const LABEL_OFFSET: (i32, i32) = (0, -15);
pub const POPUP_OFFSET: (i32, i32) = (0, -30);
pub const BASE_Z_INDEX: i32 = 100;

pub const SEARCH_CITY: &str = "北京";
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }

    pub fn rgba(&self, alpha: u8) -> Rgba<u8> {
        Rgba([self.0, self.1, self.2, alpha])
    }
}

pub const DEFAULT_TIER_COLOR: Color = Color(0x80, 0x80, 0x80);

/// One color per known tier. Unknown tiers fall back to [`DEFAULT_TIER_COLOR`].
pub fn tier_color(tier: &Tier) -> Color {
    match tier {
        Tier::First => Color(0xFF, 0x00, 0x00),   // red
        Tier::Second => Color(0xFF, 0x7F, 0x00),  // orange
        Tier::Third => Color(0xFF, 0xFF, 0x00),   // yellow
        Tier::Fourth => Color(0x00, 0xFF, 0x00),  // green
        Tier::Fifth => Color(0x00, 0xFF, 0xFF),   // cyan
        Tier::Sixth => Color(0x00, 0x00, 0xFF),   // blue
        Tier::Seventh => Color(0x8B, 0x00, 0xFF), // purple
        Tier::Eighth => Color(0x80, 0x80, 0x80),  // gray
        Tier::Unknown(_) => DEFAULT_TIER_COLOR,
    }
}

/// Viewport and marker layout settings. Not user supplied; `Default`
/// is the only constructor the binary uses.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub center: Coordinate,
    pub zoom: f64,
    pub zoom_range: (f64, f64),
    pub badge_size: u32,
    pub badge_radius: f64,
    pub marker_offset: (i32, i32),
    pub label_offset: (i32, i32),
    pub popup_offset: (i32, i32),
    pub base_z_index: i32,
    pub search_city: String,
    pub search_timeout: Duration,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            zoom_range: ZOOM_RANGE,
            badge_size: BADGE_SIZE,
            badge_radius: BADGE_RADIUS,
            marker_offset: MARKER_OFFSET,
            label_offset: LABEL_OFFSET,
            popup_offset: POPUP_OFFSET,
            base_z_index: BASE_Z_INDEX,
            search_city: SEARCH_CITY.to_string(),
            search_timeout: SEARCH_TIMEOUT,
        }
    }
}

impl MapConfig {
    pub fn clamped_zoom(&self) -> f64 {
        self.zoom.clamp(self.zoom_range.0, self.zoom_range.1)
    }
}
