//! Store-backed POI cache with a periodic refresher.
//!
//! Readers only ever see the `pois` table. The refresher replaces its
//! contents wholesale after each successful fetch; a failed fetch leaves
//! the previous contents in place. Pushed records are also broadcast to
//! every connected session as a `building_update` notification.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use poolgrid_core::{Notification, Notifier};
use poolgrid_state::{PointOfInterest, StateStore};

use crate::error::PoiResult;
use crate::source::PoiSource;

#[derive(Clone)]
pub struct PoiCache {
    store: StateStore,
    source: Option<Arc<dyn PoiSource>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PoiCache {
    /// A cache fed by `source`. Without a source the cache only holds
    /// pushed records.
    pub fn new(store: StateStore, source: Option<Arc<dyn PoiSource>>) -> Self {
        Self {
            store,
            source,
            notifier: None,
        }
    }

    /// Broadcast pushed records through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Populate the cache from the source if it holds nothing yet.
    /// Returns how many records were loaded.
    pub async fn seed_if_empty(&self) -> PoiResult<usize> {
        if self.store.count_pois()? > 0 {
            debug!("poi cache already populated, skipping seed");
            return Ok(0);
        }
        info!("poi cache empty, fetching initial data");
        self.refresh().await
    }

    /// Replace the cache contents with a fresh fetch.
    pub async fn refresh(&self) -> PoiResult<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };
        let pois = source.fetch_all().await?;
        self.store.replace_pois(&pois)?;
        info!(count = pois.len(), "poi cache refreshed");
        Ok(pois.len())
    }

    /// Insert or overwrite one record pushed by the content system.
    pub fn upsert(&self, poi: &PointOfInterest) -> PoiResult<()> {
        self.store.put_poi(poi)?;
        info!(poi = poi.id, "poi updated");
        self.broadcast(poi);
        Ok(())
    }

    /// Tell connected clients about a pushed record. Failures are logged;
    /// the record is already stored.
    fn broadcast(&self, poi: &PointOfInterest) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let data = match serde_json::to_value(poi) {
            Ok(data) => data,
            Err(e) => {
                error!(poi = poi.id, error = %e, "could not encode poi for broadcast");
                return;
            }
        };
        match notifier.notify_all(Notification::building_update(data)) {
            Ok(sessions) => debug!(poi = poi.id, sessions, "poi update broadcast"),
            Err(e) => error!(poi = poi.id, error = %e, "poi update broadcast failed"),
        }
    }

    /// Every cached record, ordered by id.
    pub fn list(&self) -> PoiResult<Vec<PointOfInterest>> {
        Ok(self.store.list_pois()?)
    }

    /// Refresh every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if self.source.is_none() {
            debug!("no poi source configured, refresher idle");
            return;
        }
        debug!(?interval, "poi refresher starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.refresh().await {
                        error!(error = %e, "poi refresh failed, keeping cached data");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("poi refresher shutting down");
                    break;
                }
            }
        }
    }
}
