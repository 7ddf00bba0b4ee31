//! Location resolver.
//!
//! The everyday path is [`resolve`]: a record's own coordinate, or the map's
//! default center when the record has none. For records whose coordinates
//! are unknown, [`resolve_by_name`] asks a [`PlaceSearch`] backend, first by
//! school name and then by street address:
//!
//! ```ignore
//! let search = AmapPlaceSearch::new(key, &MapConfig::default());
//! let at = locate::resolve_by_name(&search, &record.name, record.address.as_deref())?;
//! ```

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::MapConfig,
    error::{Error, Result, SearchError},
    record::{Coordinate, SchoolRecord},
};

const PLACE_TEXT_URL: &str = "https://restapi.amap.com/v3/place/text";

/// Coordinate the marker for `record` is drawn at.
pub fn resolve(record: &SchoolRecord, config: &MapConfig) -> Coordinate {
    match record.location {
        Some(c) if !c.is_unset() => c,
        _ => {
            debug!(school = %record.name, "no coordinate, using default center");
            config.center
        }
    }
}

/// Text search returning the single best match inside a fixed city.
pub trait PlaceSearch {
    fn search(&self, query: &str) -> std::result::Result<Option<Coordinate>, SearchError>;
}

/// Look up a place by `name`, then by `address`. The first hit wins and no
/// further source is tried.
pub fn resolve_by_name<S: PlaceSearch + ?Sized>(
    search: &S,
    name: &str,
    address: Option<&str>,
) -> Result<Coordinate> {
    if let Some(c) = first_match(search, name) {
        info!(%name, at = %c, "place found by name");
        return Ok(c);
    }
    if let Some(addr) = address.filter(|a| !a.trim().is_empty()) {
        if let Some(c) = first_match(search, addr) {
            info!(%name, address = %addr, at = %c, "place found by address");
            return Ok(c);
        }
    }
    Err(Error::PlaceNotFound {
        name: name.to_string(),
        address: address.map(str::to_string),
    })
}

fn first_match<S: PlaceSearch + ?Sized>(search: &S, query: &str) -> Option<Coordinate> {
    match search.search(query) {
        Ok(Some(c)) if c.is_valid() => Some(c),
        Ok(Some(c)) => {
            warn!(%query, at = %c, "place search returned an invalid coordinate");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(%query, error = %e, "place search failed");
            None
        }
    }
}

/// Give every record without a usable coordinate one from `search`.
/// Records that cannot be found keep their sentinel. Returns how many
/// records were patched.
pub fn fill_missing<S: PlaceSearch + ?Sized>(records: &mut [SchoolRecord], search: &S) -> usize {
    let mut patched = 0;
    for record in records.iter_mut().filter(|r| r.needs_location()) {
        match resolve_by_name(search, &record.name, record.address.as_deref()) {
            Ok(c) => {
                record.location = Some(c);
                patched += 1;
            }
            Err(e) => warn!(error = %e, "keeping default center"),
        }
    }
    patched
}

// ---------------------------------------------------------------------------
// AMap web service
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlaceTextResponse {
    status: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    pois: Vec<Poi>,
}

#[derive(Debug, Deserialize)]
struct Poi {
    #[serde(default)]
    name: String,
    // "lng,lat", or an empty array when the POI has no position
    #[serde(default)]
    location: Value,
}

/// [`PlaceSearch`] over the AMap `place/text` endpoint.
pub struct AmapPlaceSearch {
    agent: ureq::Agent,
    key: String,
    city: String,
}

impl AmapPlaceSearch {
    pub fn new(key: impl Into<String>, config: &MapConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.search_timeout)
            .build();
        Self {
            agent,
            key: key.into(),
            city: config.search_city.clone(),
        }
    }
}

impl PlaceSearch for AmapPlaceSearch {
    fn search(&self, query: &str) -> std::result::Result<Option<Coordinate>, SearchError> {
        let resp = self
            .agent
            .get(PLACE_TEXT_URL)
            .query("key", &self.key)
            .query("keywords", query)
            .query("city", &self.city)
            .query("citylimit", "true")
            .query("offset", "1")
            .query("page", "1")
            .query("output", "json")
            .call()
            .map_err(Box::new)?;
        let body: PlaceTextResponse = serde_json::from_reader(resp.into_reader())?;
        first_poi(body)
    }
}

fn parse_place_text(json: &str) -> std::result::Result<Option<Coordinate>, SearchError> {
    first_poi(serde_json::from_str(json)?)
}

fn first_poi(resp: PlaceTextResponse) -> std::result::Result<Option<Coordinate>, SearchError> {
    if resp.status != "1" {
        return Err(SearchError::Rejected(resp.info));
    }
    let Some(poi) = resp.pois.into_iter().next() else {
        return Ok(None);
    };
    let at = poi.location.as_str().and_then(parse_lng_lat);
    debug!(poi = %poi.name, ?at, "place search hit");
    Ok(at)
}

fn parse_lng_lat(s: &str) -> Option<Coordinate> {
    let (lng, lat) = s.split_once(',')?;
    Some(Coordinate::new(lng.trim().parse().ok()?, lat.trim().parse().ok()?))
}
