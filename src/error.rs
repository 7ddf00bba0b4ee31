//! Error types for the marker pipeline.
//!
//! Only [`Error::Configuration`] ever reaches the caller of
//! [`MapSession::mount`](crate::session::MapSession::mount); the other
//! variants are built so they can be logged with full context and then
//! absorbed where they happen.

use thiserror::Error;

/// Failure reported by a [`MapCapability`](crate::capability::MapCapability)
/// implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("map SDK unavailable: {0}")]
    Unavailable(String),

    #[error("invalid coordinate ({lng}, {lat})")]
    InvalidCoordinate { lng: f64, lat: f64 },

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("{0}")]
    Backend(String),
}

/// Failure of a single place-search query.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("place search transport failed: {0}")]
    Transport(#[from] Box<ureq::Error>),

    #[error("place search response unreadable: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("place search rejected the query: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("map container '{0}' is missing or invalid")]
    Configuration(String),

    #[error("viewport failed to initialize: {0}")]
    ViewportInit(#[source] CapabilityError),

    #[error("marker for '{name}' could not be created: {source}")]
    MarkerCreation {
        name: String,
        #[source]
        source: CapabilityError,
    },

    #[error("no place found for '{name}' (address: {address:?})")]
    PlaceNotFound {
        name: String,
        address: Option<String>,
    },

    #[error("teardown step '{step}' failed: {source}")]
    Teardown {
        step: &'static str,
        #[source]
        source: CapabilityError,
    },

    #[error("badge rasterization failed: {0}")]
    Raster(String),

    #[error("badge encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
