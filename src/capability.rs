//! The map engine as seen by the marker code.
//!
//! A [`MapCapability`] owns every live object (SDK bootstrap, viewports,
//! markers, popups) and hands out opaque copyable handles. Events the
//! engine produces are delivered by the host to
//! [`MapSession::handle_event`](crate::session::MapSession::handle_event)
//! as [`MapEvent`] values, one at a time.

use crate::{config::MapConfig, error::CapabilityError, record::Coordinate};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(
    /// Loaded map SDK (script, plugin set, API key).
    SdkHandle
);
handle!(ViewportHandle);
handle!(MarkerHandle);
handle!(PopupHandle);

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerLabel {
    pub text: String,
    /// Pixel offset from the marker anchor; the label sits above the badge.
    pub offset: (i32, i32),
    pub border_color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub position: Coordinate,
    /// Badge image as a `data:` URI.
    pub icon: String,
    pub icon_size: (u32, u32),
    pub offset: (i32, i32),
    pub title: String,
    pub label: MarkerLabel,
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopupSpec {
    /// HTML fragment.
    pub content: String,
    pub offset: (i32, i32),
    pub close_on_map_click: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Viewport(ViewportHandle),
    Marker(MarkerHandle),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapEvent {
    /// The viewport finished loading.
    Ready,
    /// The map surface itself was clicked.
    Click(Coordinate),
    MarkerClick(MarkerHandle),
}

pub type CapResult<T> = Result<T, CapabilityError>;

pub trait MapCapability {
    fn load_sdk(&mut self) -> CapResult<SdkHandle>;
    fn release_sdk(&mut self, sdk: SdkHandle) -> CapResult<()>;

    fn create_viewport(&mut self, container: &str, config: &MapConfig) -> CapResult<ViewportHandle>;
    /// Remove every overlay still attached to the viewport.
    fn clear_viewport(&mut self, viewport: ViewportHandle) -> CapResult<()>;
    fn destroy_viewport(&mut self, viewport: ViewportHandle) -> CapResult<()>;
    fn show_loading(&mut self, viewport: ViewportHandle) -> CapResult<()>;
    fn hide_loading(&mut self, viewport: ViewportHandle) -> CapResult<()>;

    fn subscribe(&mut self, source: EventSource) -> CapResult<()>;
    fn unsubscribe(&mut self, source: EventSource) -> CapResult<()>;

    fn create_marker(&mut self, spec: MarkerSpec) -> CapResult<MarkerHandle>;
    /// Attach the marker to `viewport`, or detach it with `None`.
    fn set_marker_map(&mut self, marker: MarkerHandle, viewport: Option<ViewportHandle>) -> CapResult<()>;
    fn marker_position(&self, marker: MarkerHandle) -> Option<Coordinate>;
    /// Free a detached marker; its handle is invalid afterwards.
    fn remove_marker(&mut self, marker: MarkerHandle) -> CapResult<()>;

    fn create_popup(&mut self, spec: PopupSpec) -> CapResult<PopupHandle>;
    fn open_popup(&mut self, popup: PopupHandle, viewport: ViewportHandle, at: Coordinate) -> CapResult<()>;
    fn close_popup(&mut self, popup: PopupHandle) -> CapResult<()>;
    fn remove_popup(&mut self, popup: PopupHandle) -> CapResult<()>;
}
