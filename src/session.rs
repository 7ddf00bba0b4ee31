//! Map session controller.
//!
//! Drives one viewport through `Uninitialized → Loading → Ready →
//! Destroyed` and keeps the marker registry in step with the record set.
//! Every entry point takes `&mut self`, so a rebuild always runs to
//! completion before the next event is looked at.

use tracing::{debug, error, info, warn};

use crate::{
    capability::{CapResult, EventSource, MapCapability, MapEvent, SdkHandle, ViewportHandle},
    config::MapConfig,
    error::{Error, Result},
    record::{Coordinate, SchoolRecord},
    registry::MarkerRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Destroyed,
}

pub struct MapSession<M: MapCapability> {
    map: M,
    config: MapConfig,
    state: SessionState,
    container: Option<String>,
    records: Vec<SchoolRecord>,
    sdk: Option<SdkHandle>,
    viewport: Option<ViewportHandle>,
    registry: MarkerRegistry,
    last_click: Option<Coordinate>,
}

impl<M: MapCapability> MapSession<M> {
    pub fn new(map: M) -> Self {
        Self::with_config(map, MapConfig::default())
    }

    pub fn with_config(map: M, config: MapConfig) -> Self {
        Self {
            map,
            config,
            state: SessionState::Uninitialized,
            container: None,
            records: Vec::new(),
            sdk: None,
            viewport: None,
            registry: MarkerRegistry::new(),
            last_click: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &MarkerRegistry {
        &self.registry
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn viewport(&self) -> Option<ViewportHandle> {
        self.viewport
    }

    /// Most recent click on the map surface.
    pub fn last_click(&self) -> Option<Coordinate> {
        self.last_click
    }

    /// Start a session in `container` for `records`.
    ///
    /// Only a blank container is reported as an error. A map that fails to
    /// load is logged and leaves the session `Uninitialized`; call `mount`
    /// again to retry. An empty record set defers viewport creation until
    /// [`set_records`](Self::set_records) supplies schools.
    pub fn mount(&mut self, container: &str, records: Vec<SchoolRecord>) -> Result<()> {
        if container.trim().is_empty() {
            return Err(Error::Configuration(container.to_string()));
        }
        if matches!(self.state, SessionState::Loading | SessionState::Ready) {
            self.unmount();
        }
        self.state = SessionState::Uninitialized;
        self.container = Some(container.to_string());
        self.records = records;
        self.initialize();
        Ok(())
    }

    /// Replace the record set. A ready map is rebuilt from scratch.
    pub fn set_records(&mut self, records: Vec<SchoolRecord>) {
        self.records = records;
        match self.state {
            SessionState::Ready => self.rebuild(),
            SessionState::Uninitialized => self.initialize(),
            SessionState::Loading => debug!("records kept until the map is ready"),
            SessionState::Destroyed => debug!("records set on a destroyed session"),
        }
    }

    pub fn handle_event(&mut self, event: MapEvent) {
        match (self.state, event) {
            (SessionState::Loading, MapEvent::Ready) => self.on_ready(),
            (SessionState::Ready, MapEvent::Click(at)) => {
                info!(%at, "map clicked");
                self.last_click = Some(at);
                self.registry.close_open(&mut self.map);
            }
            (SessionState::Ready, MapEvent::MarkerClick(marker)) => {
                if let Some(viewport) = self.viewport {
                    self.registry.select(&mut self.map, viewport, marker);
                }
            }
            (state, event) => debug!(?state, ?event, "event ignored"),
        }
    }

    /// Release markers, popups, the viewport and the SDK. Safe to call in
    /// any state, any number of times.
    pub fn unmount(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        info!(state = ?self.state, "cleaning up map resources");
        self.release_all();
        self.state = SessionState::Destroyed;
    }

    fn initialize(&mut self) {
        let Some(container) = self.container.clone() else {
            return;
        };
        if self.records.is_empty() {
            info!(%container, "no schools yet, map creation deferred");
            return;
        }
        match self.open_viewport(&container) {
            Ok(()) => {
                info!(%container, schools = self.records.len(), "map loading");
                self.state = SessionState::Loading;
            }
            Err(e) => {
                error!(error = %e, "error initializing map");
                self.release_all();
                self.state = SessionState::Uninitialized;
            }
        }
    }

    fn open_viewport(&mut self, container: &str) -> Result<()> {
        let sdk = self.map.load_sdk().map_err(Error::ViewportInit)?;
        self.sdk = Some(sdk);
        let viewport = self
            .map
            .create_viewport(container, &self.config)
            .map_err(Error::ViewportInit)?;
        self.viewport = Some(viewport);
        if let Err(e) = self.map.show_loading(viewport) {
            warn!(error = %e, "loading indicator unavailable");
        }
        self.map
            .subscribe(EventSource::Viewport(viewport))
            .map_err(Error::ViewportInit)
    }

    fn on_ready(&mut self) {
        let Some(viewport) = self.viewport else {
            return;
        };
        info!("map loaded");
        if let Err(e) = self.map.hide_loading(viewport) {
            warn!(error = %e, "failed to remove loading indicator");
        }
        self.state = SessionState::Ready;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let Some(viewport) = self.viewport else {
            return;
        };
        self.registry
            .rebuild(&mut self.map, viewport, &self.records, &self.config);
    }

    fn release_all(&mut self) {
        self.registry.clear(&mut self.map);
        if let Some(viewport) = self.viewport.take() {
            let map = &mut self.map;
            teardown_step("unsubscribe", map.unsubscribe(EventSource::Viewport(viewport)));
            teardown_step("clear_viewport", map.clear_viewport(viewport));
            teardown_step("destroy_viewport", map.destroy_viewport(viewport));
        }
        if let Some(sdk) = self.sdk.take() {
            teardown_step("release_sdk", self.map.release_sdk(sdk));
        }
    }
}

impl<M: MapCapability> Drop for MapSession<M> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn teardown_step(step: &'static str, result: CapResult<()>) {
    if let Err(source) = result {
        let e = Error::Teardown { step, source };
        warn!(error = %e, "continuing teardown");
    }
}
