//! Marker registry: the live marker + popup pairs on one viewport.
//!
//! Pairs are kept in record order, which is also their stacking order.
//! `open` is the only record of which popup is showing, so at most one
//! popup can be open at a time.

use tracing::{debug, info, warn};

use crate::{
    badge::{self, Badge},
    capability::{
        EventSource, MapCapability, MarkerHandle, MarkerLabel, MarkerSpec, PopupHandle,
        PopupSpec, ViewportHandle,
    },
    config::{tier_color, MapConfig},
    error::{CapabilityError, Error, Result},
    locate, popup,
    record::{Coordinate, SchoolRecord},
};

/// Everything derived from one record for the current rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMarker {
    pub record: SchoolRecord,
    pub coordinate: Coordinate,
    pub badge: Badge,
    pub popup_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPair {
    pub marker: MarkerHandle,
    pub popup: PopupHandle,
    pub resolved: ResolvedMarker,
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    pairs: Vec<MarkerPair>,
    open: Option<usize>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[MarkerPair] {
        &self.pairs
    }

    pub fn find(&self, marker: MarkerHandle) -> Option<&MarkerPair> {
        self.pairs.iter().find(|p| p.marker == marker)
    }

    /// The pair whose popup is currently open.
    pub fn open_pair(&self) -> Option<&MarkerPair> {
        self.open.and_then(|i| self.pairs.get(i))
    }

    /// Replace every tracked pair with fresh ones for `records`.
    ///
    /// A record whose marker cannot be created is logged and skipped; the
    /// rest still get theirs. Returns the number of pairs now tracked.
    pub fn rebuild<M: MapCapability + ?Sized>(
        &mut self,
        map: &mut M,
        viewport: ViewportHandle,
        records: &[SchoolRecord],
        config: &MapConfig,
    ) -> usize {
        self.clear(map);
        for record in records {
            match self.place(map, viewport, record, config) {
                Ok(pair) => {
                    info!(school = %record.name, at = %pair.resolved.coordinate, "marker created");
                    self.pairs.push(pair);
                }
                Err(e) => warn!(error = %e, "skipping school"),
            }
        }
        info!(created = self.pairs.len(), requested = records.len(), "markers rebuilt");
        self.pairs.len()
    }

    fn place<M: MapCapability + ?Sized>(
        &self,
        map: &mut M,
        viewport: ViewportHandle,
        record: &SchoolRecord,
        config: &MapConfig,
    ) -> Result<MarkerPair> {
        let coordinate = locate::resolve(record, config);
        let badge = badge::render_sized(
            &record.tier,
            record.badge_rate(),
            config.badge_size,
            config.badge_radius,
        )?;
        let popup_content = popup::format(record);

        let spec = MarkerSpec {
            position: coordinate,
            icon: badge.to_data_uri()?,
            icon_size: badge.size(),
            offset: config.marker_offset,
            title: record.name.clone(),
            label: MarkerLabel {
                text: record.name.clone(),
                offset: config.label_offset,
                border_color: tier_color(&record.tier).hex(),
            },
            z_index: config
                .base_z_index
                .saturating_add(i32::try_from(self.pairs.len()).unwrap_or(i32::MAX)),
        };
        let popup_spec = PopupSpec {
            content: popup_content.clone(),
            offset: config.popup_offset,
            close_on_map_click: true,
        };

        let creation_failed = |source: CapabilityError| Error::MarkerCreation {
            name: record.name.clone(),
            source,
        };
        let marker = map.create_marker(spec).map_err(creation_failed)?;
        let popup = match map
            .set_marker_map(marker, Some(viewport))
            .and_then(|()| map.create_popup(popup_spec))
        {
            Ok(popup) => popup,
            Err(e) => {
                release(map, &record.name, marker, None);
                return Err(creation_failed(e));
            }
        };
        if let Err(e) = map.subscribe(EventSource::Marker(marker)) {
            release(map, &record.name, marker, Some(popup));
            return Err(creation_failed(e));
        }

        Ok(MarkerPair {
            marker,
            popup,
            resolved: ResolvedMarker {
                record: record.clone(),
                coordinate,
                badge,
                popup_content,
            },
        })
    }

    /// Close every popup, then detach and free every marker and popup.
    /// Calling it on an empty registry does nothing.
    pub fn clear<M: MapCapability + ?Sized>(&mut self, map: &mut M) {
        self.open = None;
        if self.pairs.is_empty() {
            return;
        }
        for pair in self.pairs.drain(..) {
            let name = &pair.resolved.record.name;
            if let Err(e) = map.close_popup(pair.popup) {
                warn!(school = %name, error = %e, "failed to close popup");
            }
            if let Err(e) = map.unsubscribe(EventSource::Marker(pair.marker)) {
                warn!(school = %name, error = %e, "failed to remove click handler");
            }
            release(map, name, pair.marker, Some(pair.popup));
        }
        debug!("marker registry cleared");
    }

    /// Show the popup belonging to `marker`, closing whichever popup was
    /// open before. Returns `false` for a marker this registry does not own,
    /// and when the previous popup refuses to close.
    pub fn select<M: MapCapability + ?Sized>(
        &mut self,
        map: &mut M,
        viewport: ViewportHandle,
        marker: MarkerHandle,
    ) -> bool {
        let Some(index) = self.pairs.iter().position(|p| p.marker == marker) else {
            debug!(?marker, "click on untracked marker");
            return false;
        };
        if !self.close_open(map) {
            warn!(?marker, "previous popup still open, not opening another");
            return false;
        }

        let pair = &self.pairs[index];
        let at = map
            .marker_position(marker)
            .unwrap_or(pair.resolved.coordinate);
        match map.open_popup(pair.popup, viewport, at) {
            Ok(()) => {
                debug!(school = %pair.resolved.record.name, "popup opened");
                self.open = Some(index);
                true
            }
            Err(e) => {
                warn!(school = %pair.resolved.record.name, error = %e, "failed to open popup");
                false
            }
        }
    }

    /// Close the open popup, if any. A popup the engine refuses to close
    /// stays recorded as open and `false` is returned.
    pub fn close_open<M: MapCapability + ?Sized>(&mut self, map: &mut M) -> bool {
        let Some(pair) = self.open.and_then(|i| self.pairs.get(i)) else {
            self.open = None;
            return true;
        };
        match map.close_popup(pair.popup) {
            Ok(()) => {
                self.open = None;
                true
            }
            Err(e) => {
                warn!(school = %pair.resolved.record.name, error = %e, "failed to close popup");
                false
            }
        }
    }
}

/// Take a marker off the map and free it together with its popup.
fn release<M: MapCapability + ?Sized>(
    map: &mut M,
    name: &str,
    marker: MarkerHandle,
    popup: Option<PopupHandle>,
) {
    if let Err(e) = map.set_marker_map(marker, None) {
        warn!(school = %name, error = %e, "failed to detach marker");
    }
    if let Some(popup) = popup {
        if let Err(e) = map.remove_popup(popup) {
            warn!(school = %name, error = %e, "failed to free popup");
        }
    }
    if let Err(e) = map.remove_marker(marker) {
        warn!(school = %name, error = %e, "failed to free marker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::RecordingMap;

    fn setup() -> (RecordingMap, ViewportHandle) {
        let mut map = RecordingMap::default();
        let vp = map.create_viewport("map", &MapConfig::default()).unwrap();
        (map, vp)
    }

    fn school(name: &str, lng: f64, lat: f64) -> SchoolRecord {
        SchoolRecord::new(name, "第三梯队")
            .with_location(Coordinate::new(lng, lat))
            .with_rate_2025("40.5%")
    }

    fn three() -> Vec<SchoolRecord> {
        vec![
            school("alpha", 116.1, 39.9),
            school("beta", 116.2, 39.9),
            school("gamma", 116.3, 39.9),
        ]
    }

    #[test]
    fn rebuild_tracks_records_in_order() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        assert_eq!(reg.rebuild(&mut map, vp, &three(), &MapConfig::default()), 3);

        let names: Vec<_> = reg.pairs().iter().map(|p| p.resolved.record.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "gamma"]);
        let z: Vec<_> = reg
            .pairs()
            .iter()
            .map(|p| map.markers[&p.marker].0.z_index)
            .collect();
        assert_eq!(z, [100, 101, 102]);

        let spec = &map.markers[&reg.pairs()[0].marker].0;
        assert_eq!(spec.label.text, "alpha");
        assert_eq!(spec.label.offset, (0, -15));
        assert_eq!(spec.label.border_color, "#FFFF00");
        assert!(spec.icon.starts_with("data:image/png;base64,"));

        assert_eq!(map.attached_markers(), 3);
        assert!(map.open_popups().is_empty());
        assert_eq!(map.subscriptions.len(), 3);
        assert!(reg.open_pair().is_none());
    }

    #[test]
    fn rebuild_replaces_previous_pairs() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        let config = MapConfig::default();
        for _ in 0..10 {
            reg.rebuild(&mut map, vp, &three(), &config);
        }
        assert_eq!(reg.len(), 3);
        // earlier generations are freed, not just detached
        assert_eq!(map.markers.len(), 3);
        assert_eq!(map.popups.len(), 3);
        assert_eq!(map.attached_markers(), 3);
        assert_eq!(map.subscriptions.len(), 3);
    }

    #[test]
    fn failed_record_is_skipped() {
        let (mut map, vp) = setup();
        map.fail_popup_for.push("beta".into());
        let mut records = three();
        records.push(school("broken", 250.0, 39.9));
        let mut reg = MarkerRegistry::new();

        assert_eq!(reg.rebuild(&mut map, vp, &records, &MapConfig::default()), 2);
        let names: Vec<_> = reg.pairs().iter().map(|p| p.resolved.record.name.as_str()).collect();
        assert_eq!(names, ["alpha", "gamma"]);
        // beta's marker was created, then taken off the map and freed
        assert_eq!(map.attached_markers(), 2);
        assert_eq!(map.markers.len(), 2);
        assert_eq!(map.subscriptions.len(), 2);
    }

    #[test]
    fn failed_subscription_frees_marker_and_popup() {
        let (mut map, vp) = setup();
        map.fail_subscribe_for.push("beta".into());
        let mut reg = MarkerRegistry::new();

        assert_eq!(reg.rebuild(&mut map, vp, &three(), &MapConfig::default()), 2);
        assert_eq!(map.markers.len(), 2);
        assert_eq!(map.popups.len(), 2);
        assert!(map.calls.iter().any(|c| c.starts_with("remove_popup")));
    }

    #[test]
    fn unset_coordinate_uses_center() {
        let (mut map, vp) = setup();
        let config = MapConfig::default();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &[school("z", 0.0, 0.0)], &config);
        assert_eq!(reg.pairs()[0].resolved.coordinate, config.center);
        assert_eq!(map.markers[&reg.pairs()[0].marker].0.position, config.center);
    }

    #[test]
    fn one_popup_open_at_a_time() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &MapConfig::default());
        let (a, b) = (reg.pairs()[0].clone(), reg.pairs()[1].clone());

        assert!(reg.select(&mut map, vp, a.marker));
        assert_eq!(map.open_popups(), vec![a.popup]);

        map.calls.clear();
        assert!(reg.select(&mut map, vp, b.marker));
        assert_eq!(map.open_popups(), vec![b.popup]);
        assert_eq!(
            map.calls,
            [format!("close_popup {}", a.popup.0), format!("open_popup {}", b.popup.0)]
        );
        assert_eq!(reg.open_pair().map(|p| p.marker), Some(b.marker));
    }

    #[test]
    fn refused_close_keeps_the_popup_tracked() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &MapConfig::default());
        let (a, b) = (reg.pairs()[0].clone(), reg.pairs()[1].clone());
        assert!(reg.select(&mut map, vp, a.marker));

        map.fail_closes = 1;
        assert!(!reg.select(&mut map, vp, b.marker));
        assert_eq!(map.open_popups(), vec![a.popup]);
        assert_eq!(reg.open_pair().map(|p| p.marker), Some(a.marker));

        // the next attempt gets through
        assert!(reg.select(&mut map, vp, b.marker));
        assert_eq!(map.open_popups(), vec![b.popup]);
    }

    #[test]
    fn clear_closes_every_popup() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &MapConfig::default());
        let popups: Vec<_> = reg.pairs().iter().map(|p| p.popup).collect();
        let c = reg.pairs()[2].marker;
        reg.select(&mut map, vp, c);

        map.calls.clear();
        reg.clear(&mut map);
        for popup in popups {
            assert!(map.calls.contains(&format!("close_popup {}", popup.0)));
            assert!(map.calls.contains(&format!("remove_popup {}", popup.0)));
        }
        assert!(map.popups.is_empty());
        assert!(map.markers.is_empty());
    }

    #[test]
    fn z_index_saturates() {
        let (mut map, vp) = setup();
        let config = MapConfig {
            base_z_index: i32::MAX - 1,
            ..MapConfig::default()
        };
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &config);
        let z: Vec<_> = reg
            .pairs()
            .iter()
            .map(|p| map.markers[&p.marker].0.z_index)
            .collect();
        assert_eq!(z, [i32::MAX - 1, i32::MAX, i32::MAX]);
    }

    #[test]
    fn selecting_unknown_marker_changes_nothing() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &MapConfig::default());
        let a = reg.pairs()[0].clone();
        reg.select(&mut map, vp, a.marker);
        assert!(!reg.select(&mut map, vp, MarkerHandle(9999)));
        assert_eq!(map.open_popups(), vec![a.popup]);
    }

    #[test]
    fn clear_is_idempotent() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        reg.rebuild(&mut map, vp, &three(), &MapConfig::default());
        let b = reg.pairs()[1].marker;
        reg.select(&mut map, vp, b);

        reg.clear(&mut map);
        assert!(reg.is_empty());
        assert!(reg.open_pair().is_none());
        assert!(map.open_popups().is_empty());
        assert_eq!(map.attached_markers(), 0);
        assert!(map.subscriptions.is_empty());

        map.calls.clear();
        reg.clear(&mut map);
        assert!(map.calls.is_empty());
    }

    #[test]
    fn empty_rebuild() {
        let (mut map, vp) = setup();
        let mut reg = MarkerRegistry::new();
        assert_eq!(reg.rebuild(&mut map, vp, &[], &MapConfig::default()), 0);
        assert!(map.markers.is_empty());
    }
}
