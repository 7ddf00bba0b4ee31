//! svg.rs — headless map capability that renders a viewport as SVG.
//!
//! Keeps viewports, markers and popups in memory and draws a viewport on
//! demand as a self-contained SVG (local equirectangular projection around
//! the viewport center):
//!
//!   background → graticule → badges (z-order) → labels → open popup →
//!   tier legend → footer

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io,
    path::Path,
};

use maud::html;

use crate::{
    capability::{
        CapResult, EventSource, MapCapability, MarkerHandle, MarkerSpec, PopupHandle, PopupSpec,
        SdkHandle, ViewportHandle,
    },
    config::{tier_color, MapConfig},
    error::CapabilityError,
    record::{Coordinate, Tier},
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const W: f64 = 1200.0;
const H: f64 = 800.0;

const TILE_SIZE: f64 = 256.0;
const GRATICULE_STEP: f64 = 0.05;

const POPUP_W: f64 = 320.0;
const POPUP_H: f64 = 300.0;

const LABEL_CHAR_W: f64 = 12.0;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ViewportState {
    container: String,
    center: Coordinate,
    zoom: f64,
    loading: bool,
    subscribed: bool,
}

#[derive(Debug)]
struct MarkerState {
    spec: MarkerSpec,
    viewport: Option<ViewportHandle>,
    subscribed: bool,
}

#[derive(Debug)]
struct PopupState {
    spec: PopupSpec,
    open_at: Option<(ViewportHandle, Coordinate)>,
}

#[derive(Debug, Default)]
pub struct SvgMap {
    next_id: u64,
    sdk: BTreeSet<SdkHandle>,
    viewports: BTreeMap<ViewportHandle, ViewportState>,
    markers: BTreeMap<MarkerHandle, MarkerState>,
    popups: BTreeMap<PopupHandle, PopupState>,
}

fn unknown(kind: &'static str, id: u64) -> CapabilityError {
    CapabilityError::UnknownHandle { kind, id }
}

fn check(at: Coordinate) -> CapResult<Coordinate> {
    if at.is_valid() {
        Ok(at)
    } else {
        Err(CapabilityError::InvalidCoordinate { lng: at.lng, lat: at.lat })
    }
}

impl SvgMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn sdk_loaded(&self) -> bool {
        !self.sdk.is_empty()
    }

    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    pub fn is_loading(&self, viewport: ViewportHandle) -> bool {
        self.viewports.get(&viewport).is_some_and(|v| v.loading)
    }

    pub fn container(&self, viewport: ViewportHandle) -> Option<&str> {
        self.viewports.get(&viewport).map(|v| v.container.as_str())
    }

    /// Markers currently attached to `viewport`, bottom to top.
    pub fn markers_on(&self, viewport: ViewportHandle) -> Vec<&MarkerSpec> {
        let mut specs: Vec<&MarkerSpec> = self
            .markers
            .values()
            .filter(|m| m.viewport == Some(viewport))
            .map(|m| &m.spec)
            .collect();
        specs.sort_by_key(|s| s.z_index);
        specs
    }

    pub fn is_listening(&self, source: EventSource) -> bool {
        match source {
            EventSource::Viewport(v) => self.viewports.get(&v).is_some_and(|v| v.subscribed),
            EventSource::Marker(m) => self.markers.get(&m).is_some_and(|m| m.subscribed),
        }
    }

    /// Markers and popups still held, attached or not.
    pub fn object_count(&self) -> (usize, usize) {
        (self.markers.len(), self.popups.len())
    }

    pub fn open_popups(&self) -> Vec<PopupHandle> {
        self.popups
            .iter()
            .filter(|(_, p)| p.open_at.is_some())
            .map(|(h, _)| *h)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Draw `viewport` as a complete SVG document.
    pub fn render(&self, viewport: ViewportHandle) -> CapResult<String> {
        let vp = self
            .viewports
            .get(&viewport)
            .ok_or(unknown("viewport", viewport.0))?;
        let proj = Projection::new(vp.center, vp.zoom);
        let mut s = String::with_capacity(1 << 16);

        // header
        s.push_str(&format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{W}" height="{H}" viewBox="0 0 {W} {H}">
  <title>{}</title>
"#,
            escape(&vp.container)
        ));

        // background
        s.push_str(&format!("  <rect width='{W}' height='{H}' fill='#f5f3ef'/>\n"));

        // graticule
        let (west, north) = proj.unproject(0.0, 0.0);
        let (east, south) = proj.unproject(W, H);
        s.push_str("  <g stroke='#dcd8d0' stroke-width='0.5'>\n");
        for lng in grid_lines(west, east) {
            let (x, _) = proj.project(Coordinate::new(lng, vp.center.lat));
            s.push_str(&format!("    <line x1='{x:.1}' y1='0' x2='{x:.1}' y2='{H}'/>\n"));
        }
        for lat in grid_lines(south, north) {
            let (_, y) = proj.project(Coordinate::new(vp.center.lng, lat));
            s.push_str(&format!("    <line x1='0' y1='{y:.1}' x2='{W}' y2='{y:.1}'/>\n"));
        }
        s.push_str("  </g>\n");

        let markers = self.markers_on(viewport);

        // badges, lowest z-index first so later schools sit on top
        s.push_str("  <g>\n");
        for m in &markers {
            let (x, y) = proj.project(m.position);
            let (w, h) = m.icon_size;
            s.push_str(&format!(
                "    <image x='{:.1}' y='{:.1}' width='{w}' height='{h}' href='{}'><title>{}</title></image>\n",
                x + m.offset.0 as f64,
                y + m.offset.1 as f64,
                m.icon,
                escape(&m.title)
            ));
        }
        s.push_str("  </g>\n");

        // labels above each badge
        s.push_str("  <g font-family='sans-serif' font-size='12' font-weight='bold' fill='#333'>\n");
        for m in &markers {
            let (x, y) = proj.project(m.position);
            let label = &m.label;
            let baseline = y + m.offset.1 as f64 + label.offset.1 as f64;
            let width = label.text.chars().count() as f64 * LABEL_CHAR_W + 8.0;
            let left = x + label.offset.0 as f64 - width / 2.0;
            s.push_str(&format!(
                "    <rect x='{left:.1}' y='{:.1}' width='{width:.1}' height='18' rx='2' fill='#fff' stroke='{}'/>\n",
                baseline - 14.0,
                label.border_color
            ));
            s.push_str(&format!(
                "    <text x='{:.1}' y='{baseline:.1}' text-anchor='middle'>{}</text>\n",
                x + label.offset.0 as f64,
                escape(&label.text)
            ));
        }
        s.push_str("  </g>\n");

        // open popup
        for popup in self.popups.values() {
            let Some((on, at)) = popup.open_at else { continue };
            if on != viewport {
                continue;
            }
            let (x, y) = proj.project(at);
            let left = x + popup.spec.offset.0 as f64 - POPUP_W / 2.0;
            let top = y + popup.spec.offset.1 as f64 - POPUP_H;
            s.push_str(&format!(
                "  <foreignObject x='{left:.1}' y='{top:.1}' width='{POPUP_W}' height='{POPUP_H}'>\n\
                 \x20   <div xmlns='http://www.w3.org/1999/xhtml' style='background: #fff; border-radius: 4px; box-shadow: 0 2px 6px rgba(0,0,0,0.2);'>{}</div>\n\
                 \x20 </foreignObject>\n",
                popup.spec.content
            ));
        }

        if vp.loading {
            s.push_str(&format!(
                "  <text x='{:.1}' y='{:.1}' font-size='16' text-anchor='middle' fill='#333'>正在加载地图...</text>\n",
                W / 2.0,
                H / 2.0
            ));
        }

        // legend
        let lx = 16.0_f64;
        let mut ly = H - 16.0 * (Tier::ALL.len() as f64) - 30.0;
        s.push_str("  <g font-family='sans-serif' font-size='12' fill='#333'>\n");
        for tier in &Tier::ALL {
            let color = tier_color(tier).hex();
            s.push_str(&format!(
                "    <circle cx='{:.1}' cy='{ly:.1}' r='6' fill='{color}' stroke='#333' stroke-width='0.5'/>\n",
                lx + 6.0
            ));
            s.push_str(&format!(
                "    <text x='{:.1}' y='{:.1}'>{}</text>\n",
                lx + 16.0,
                ly + 4.5,
                tier.label()
            ));
            ly += 16.0;
        }
        let open = self.open_popups().len();
        s.push_str(&format!(
            "    <text x='{lx:.1}' y='{:.1}' font-size='10' fill='#666'>markers: {}  open: {open}  zoom: {}</text>\n",
            H - 8.0,
            markers.len(),
            vp.zoom
        ));
        s.push_str("  </g>\n");

        s.push_str("</svg>\n");
        Ok(s)
    }
}

/// Write `svg` next to `path` and move it into place.
pub fn write_svg(path: &Path, svg: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, svg)?;
    fs::rename(&tmp, path)
}

fn escape(text: &str) -> String {
    html! { (text) }.into_string()
}

fn grid_lines(from: f64, to: f64) -> impl Iterator<Item = f64> {
    let first = (from / GRATICULE_STEP).ceil() as i64;
    let last = (to / GRATICULE_STEP).floor() as i64;
    (first..=last).map(|i| i as f64 * GRATICULE_STEP)
}

// ---------------------------------------------------------------------------
// Projection (local equirectangular)
// ---------------------------------------------------------------------------

struct Projection {
    center: Coordinate,
    px_per_deg: f64,
}

impl Projection {
    fn new(center: Coordinate, zoom: f64) -> Self {
        Self {
            center,
            px_per_deg: TILE_SIZE * zoom.exp2() / 360.0,
        }
    }

    #[inline]
    fn project(&self, c: Coordinate) -> (f64, f64) {
        (
            W / 2.0 + (c.lng - self.center.lng) * self.px_per_deg,
            H / 2.0 - (c.lat - self.center.lat) * self.px_per_deg,
        )
    }

    #[inline]
    fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.center.lng + (x - W / 2.0) / self.px_per_deg,
            self.center.lat - (y - H / 2.0) / self.px_per_deg,
        )
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

impl MapCapability for SvgMap {
    fn load_sdk(&mut self) -> CapResult<SdkHandle> {
        let h = SdkHandle(self.next());
        self.sdk.insert(h);
        Ok(h)
    }

    fn release_sdk(&mut self, sdk: SdkHandle) -> CapResult<()> {
        if self.sdk.remove(&sdk) {
            Ok(())
        } else {
            Err(unknown("sdk", sdk.0))
        }
    }

    fn create_viewport(&mut self, container: &str, config: &MapConfig) -> CapResult<ViewportHandle> {
        if self.sdk.is_empty() {
            return Err(CapabilityError::Unavailable("map SDK not loaded".into()));
        }
        let center = check(config.center)?;
        let h = ViewportHandle(self.next());
        self.viewports.insert(
            h,
            ViewportState {
                container: container.to_string(),
                center,
                zoom: config.clamped_zoom(),
                loading: false,
                subscribed: false,
            },
        );
        Ok(h)
    }

    fn clear_viewport(&mut self, viewport: ViewportHandle) -> CapResult<()> {
        if !self.viewports.contains_key(&viewport) {
            return Err(unknown("viewport", viewport.0));
        }
        for m in self.markers.values_mut().filter(|m| m.viewport == Some(viewport)) {
            m.viewport = None;
        }
        for p in self.popups.values_mut() {
            if p.open_at.is_some_and(|(on, _)| on == viewport) {
                p.open_at = None;
            }
        }
        Ok(())
    }

    fn destroy_viewport(&mut self, viewport: ViewportHandle) -> CapResult<()> {
        self.clear_viewport(viewport)?;
        self.viewports.remove(&viewport);
        Ok(())
    }

    fn show_loading(&mut self, viewport: ViewportHandle) -> CapResult<()> {
        let vp = self
            .viewports
            .get_mut(&viewport)
            .ok_or(unknown("viewport", viewport.0))?;
        vp.loading = true;
        Ok(())
    }

    fn hide_loading(&mut self, viewport: ViewportHandle) -> CapResult<()> {
        let vp = self
            .viewports
            .get_mut(&viewport)
            .ok_or(unknown("viewport", viewport.0))?;
        vp.loading = false;
        Ok(())
    }

    fn subscribe(&mut self, source: EventSource) -> CapResult<()> {
        self.set_listening(source, true)
    }

    fn unsubscribe(&mut self, source: EventSource) -> CapResult<()> {
        self.set_listening(source, false)
    }

    fn create_marker(&mut self, spec: MarkerSpec) -> CapResult<MarkerHandle> {
        check(spec.position)?;
        let h = MarkerHandle(self.next());
        self.markers.insert(
            h,
            MarkerState {
                spec,
                viewport: None,
                subscribed: false,
            },
        );
        Ok(h)
    }

    fn set_marker_map(&mut self, marker: MarkerHandle, viewport: Option<ViewportHandle>) -> CapResult<()> {
        if let Some(v) = viewport {
            if !self.viewports.contains_key(&v) {
                return Err(unknown("viewport", v.0));
            }
        }
        let m = self
            .markers
            .get_mut(&marker)
            .ok_or(unknown("marker", marker.0))?;
        m.viewport = viewport;
        Ok(())
    }

    fn marker_position(&self, marker: MarkerHandle) -> Option<Coordinate> {
        self.markers.get(&marker).map(|m| m.spec.position)
    }

    fn remove_marker(&mut self, marker: MarkerHandle) -> CapResult<()> {
        self.markers
            .remove(&marker)
            .map(|_| ())
            .ok_or(unknown("marker", marker.0))
    }

    fn create_popup(&mut self, spec: PopupSpec) -> CapResult<PopupHandle> {
        let h = PopupHandle(self.next());
        self.popups.insert(h, PopupState { spec, open_at: None });
        Ok(h)
    }

    fn open_popup(&mut self, popup: PopupHandle, viewport: ViewportHandle, at: Coordinate) -> CapResult<()> {
        if !self.viewports.contains_key(&viewport) {
            return Err(unknown("viewport", viewport.0));
        }
        let at = check(at)?;
        let p = self
            .popups
            .get_mut(&popup)
            .ok_or(unknown("popup", popup.0))?;
        p.open_at = Some((viewport, at));
        Ok(())
    }

    fn close_popup(&mut self, popup: PopupHandle) -> CapResult<()> {
        let p = self
            .popups
            .get_mut(&popup)
            .ok_or(unknown("popup", popup.0))?;
        p.open_at = None;
        Ok(())
    }

    fn remove_popup(&mut self, popup: PopupHandle) -> CapResult<()> {
        self.popups
            .remove(&popup)
            .map(|_| ())
            .ok_or(unknown("popup", popup.0))
    }
}

impl SvgMap {
    fn set_listening(&mut self, source: EventSource, on: bool) -> CapResult<()> {
        let flag = match source {
            EventSource::Viewport(v) => {
                &mut self.viewports.get_mut(&v).ok_or(unknown("viewport", v.0))?.subscribed
            }
            EventSource::Marker(m) => {
                &mut self.markers.get_mut(&m).ok_or(unknown("marker", m.0))?.subscribed
            }
        };
        *flag = on;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MarkerLabel;

    fn marker(title: &str, at: Coordinate, z_index: i32) -> MarkerSpec {
        MarkerSpec {
            position: at,
            icon: "data:image/png;base64,AAAA".into(),
            icon_size: (50, 50),
            offset: (-25, -25),
            title: title.into(),
            label: MarkerLabel {
                text: title.into(),
                offset: (0, -15),
                border_color: "#FF0000".into(),
            },
            z_index,
        }
    }

    fn with_viewport() -> (SvgMap, ViewportHandle) {
        let mut map = SvgMap::new();
        map.load_sdk().unwrap();
        let vp = map.create_viewport("map", &MapConfig::default()).unwrap();
        (map, vp)
    }

    #[test]
    fn viewport_needs_sdk() {
        let mut map = SvgMap::new();
        let err = map.create_viewport("map", &MapConfig::default()).unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[test]
    fn invalid_marker_position_rejected() {
        let (mut map, _) = with_viewport();
        let err = map
            .create_marker(marker("x", Coordinate::new(116.0, 95.0), 100))
            .unwrap_err();
        assert_eq!(err, CapabilityError::InvalidCoordinate { lng: 116.0, lat: 95.0 });
    }

    #[test]
    fn markers_render_in_z_order() {
        let (mut map, vp) = with_viewport();
        let center = MapConfig::default().center;
        for (title, z) in [("top", 102), ("bottom", 100), ("middle", 101)] {
            let m = map.create_marker(marker(title, center, z)).unwrap();
            map.set_marker_map(m, Some(vp)).unwrap();
        }
        let svg = map.render(vp).unwrap();
        assert_eq!(svg.matches("<image ").count(), 3);
        let pos = |t: &str| svg.find(&format!("<title>{t}</title>")).unwrap();
        assert!(pos("bottom") < pos("middle") && pos("middle") < pos("top"));
        // the center projects to the middle of the canvas
        assert!(svg.contains("<image x='575.0' y='375.0'"));
    }

    #[test]
    fn detached_markers_are_not_drawn() {
        let (mut map, vp) = with_viewport();
        let m = map
            .create_marker(marker("gone", MapConfig::default().center, 100))
            .unwrap();
        map.set_marker_map(m, Some(vp)).unwrap();
        map.set_marker_map(m, None).unwrap();
        assert!(!map.render(vp).unwrap().contains("<image "));
    }

    #[test]
    fn removed_objects_are_forgotten() {
        let (mut map, vp) = with_viewport();
        let m = map
            .create_marker(marker("freed", MapConfig::default().center, 100))
            .unwrap();
        let p = map
            .create_popup(PopupSpec {
                content: "<p>x</p>".into(),
                offset: (0, -30),
                close_on_map_click: true,
            })
            .unwrap();
        assert_eq!(map.object_count(), (1, 1));

        map.remove_popup(p).unwrap();
        map.remove_marker(m).unwrap();
        assert_eq!(map.object_count(), (0, 0));
        assert!(map.set_marker_map(m, Some(vp)).is_err());
        assert!(map.remove_marker(m).is_err());
    }

    #[test]
    fn open_popup_is_embedded() {
        let (mut map, vp) = with_viewport();
        let p = map
            .create_popup(PopupSpec {
                content: "<h3>北京市十一学校</h3>".into(),
                offset: (0, -30),
                close_on_map_click: true,
            })
            .unwrap();
        assert!(!map.render(vp).unwrap().contains("foreignObject"));
        map.open_popup(p, vp, MapConfig::default().center).unwrap();
        let svg = map.render(vp).unwrap();
        assert!(svg.contains("<foreignObject"));
        assert!(svg.contains("<h3>北京市十一学校</h3>"));
        map.close_popup(p).unwrap();
        assert!(map.open_popups().is_empty());
    }

    #[test]
    fn label_text_is_escaped() {
        let (mut map, vp) = with_viewport();
        let m = map
            .create_marker(marker("A & <B>", MapConfig::default().center, 100))
            .unwrap();
        map.set_marker_map(m, Some(vp)).unwrap();
        let svg = map.render(vp).unwrap();
        assert!(svg.contains("A &amp; &lt;B&gt;"));
        assert!(!svg.contains("<B>"));
    }

    #[test]
    fn destroy_detaches_everything() {
        let (mut map, vp) = with_viewport();
        let m = map
            .create_marker(marker("x", MapConfig::default().center, 100))
            .unwrap();
        map.set_marker_map(m, Some(vp)).unwrap();
        map.subscribe(EventSource::Viewport(vp)).unwrap();
        assert!(map.is_listening(EventSource::Viewport(vp)));
        map.destroy_viewport(vp).unwrap();
        assert_eq!(map.viewport_count(), 0);
        assert!(map.render(vp).is_err());
        assert!(map.destroy_viewport(vp).is_err());
    }

    #[test]
    fn loading_indicator_drawn_until_hidden() {
        let (mut map, vp) = with_viewport();
        map.show_loading(vp).unwrap();
        assert!(map.render(vp).unwrap().contains("正在加载地图"));
        map.hide_loading(vp).unwrap();
        assert!(!map.is_loading(vp));
        assert!(!map.render(vp).unwrap().contains("正在加载地图"));
    }

    #[test]
    fn write_svg_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.svg");
        write_svg(&path, "<svg/>").unwrap();
        write_svg(&path, "<svg></svg>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<svg></svg>");
        assert!(!dir.path().join("map.svg.tmp").exists());
    }
}
