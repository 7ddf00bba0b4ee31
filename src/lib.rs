//! Tiered school markers for an interactive map.
//!
//! Records go through [`locate`] for a position, [`badge`] for the marker
//! icon and [`popup`] for the detail panel; the [`registry`] turns them into
//! marker + popup pairs on a viewport, and a [`session`] drives the viewport
//! lifecycle over any [`MapCapability`](capability::MapCapability).

pub mod badge;
pub mod capability;
pub mod config;
pub mod error;
pub mod locate;
pub mod popup;
pub mod record;
pub mod registry;
pub mod session;
pub mod svg;

pub use capability::{MapCapability, MapEvent};
pub use config::MapConfig;
pub use error::{Error, Result};
pub use record::{Coordinate, SchoolRecord, Tier};
pub use registry::MarkerRegistry;
pub use session::{MapSession, SessionState};
pub use svg::SvgMap;
