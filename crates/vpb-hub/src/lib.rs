//! `vpb-hub`: the central broker between the backend adapter and the domain
//! services that consume it.
//!
//! # Why
//! Every domain service (power, HVAC, the generic property service, ...) needs
//! the same three things from the backend: exclusive ownership of the propIds
//! it handles, a place to route incoming backend events, and a single
//! authoritative view of "what is currently subscribed and at what rate". The
//! Hub concentrates that bookkeeping behind one lock so services never have to
//! coordinate subscription changes with each other directly.

mod event_loop;
mod service;
mod state;

pub use event_loop::AsyncResultSink;
pub use service::{ServiceId, ServiceRef};

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use vpb_backend::{BackendAdapter, BackendEventReceiver, RetryDriver, RetryPolicy, SubscribeOption};
use vpb_core::{
    Access, AreaId, ChangeMode, PropertyConfig, PropertyId, PropertyValue, RateInfo, VpbError,
    VpbResult,
};

use state::HubState;

/// Owns the backend connection, the property-ownership map, and the
/// authoritative `(propId, areaId) -> RateInfo` subscription table.
///
/// The entire state lives behind one [`tokio::sync::Mutex`]: every public
/// method that touches the backend holds it for the full duration of the
/// backend call (including any retry sleeps), so at most one subscribe,
/// unsubscribe, get, or set is ever in flight against the backend at a time.
/// This is deliberately coarser than it needs to be for throughput, but it is
/// the only way to uphold the invariant that the in-memory rate table and the
/// backend's actual subscription state never observably diverge.
pub struct Hub {
    backend: Arc<dyn BackendAdapter>,
    retry: RetryDriver,
    state: Mutex<HubState>,
}

impl Hub {
    /// Builds a Hub around a backend adapter. Call [`Hub::priority_init`]
    /// before using it for anything else.
    pub fn new(backend: Arc<dyn BackendAdapter>, retry_policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            backend,
            retry: RetryDriver::new(retry_policy),
            state: Mutex::new(HubState::default()),
        })
    }

    /// Registers a service in init order and returns the handle it must pass
    /// to every subsequent `subscribe`/`unsubscribe` call.
    pub async fn register_service(&self, service: Arc<dyn ServiceRef>) -> ServiceId {
        let mut state = self.state.lock().await;
        state.register_service(service)
    }

    /// Fetches all property configs from the backend, assigns ownership to
    /// registered services, then calls `take_properties`/`init` on each in
    /// registration order.
    pub async fn priority_init(&self) -> VpbResult<()> {
        let configs = self
            .backend
            .poll_all_configs()
            .await
            .map_err(|backend| VpbError::BackendPermanent { backend })?;
        if configs.is_empty() {
            return Err(VpbError::internal(
                "backend returned no property configs during priority_init",
            ));
        }

        let mut state = self.state.lock().await;
        state.populate_properties(configs);
        state.assign_ownership();
        state.init_services();
        Ok(())
    }

    /// Unsubscribes everything still in the rate table in reverse
    /// service-registration order, then clears all tables.
    ///
    /// `ServiceRef` has no release/teardown hook of its own, so this does not
    /// give each service a chance to run shutdown logic — it only orders the
    /// `backend.unsubscribe` calls by the reverse of the owning service's
    /// registration index, so the last service registered is the first one
    /// torn down. PropIds owned by the same service are ordered by raw id as
    /// a stable tie-break.
    pub async fn shutdown(&self) -> VpbResult<()> {
        let mut state = self.state.lock().await;
        let mut remaining: Vec<PropertyId> = state
            .rate_info
            .keys()
            .map(|(p, _)| *p)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        remaining.sort_by_key(|prop_id| {
            let registration_index = state
                .property_handlers
                .get(prop_id)
                .map(|id| id.0)
                .unwrap_or(usize::MAX);
            (std::cmp::Reverse(registration_index), prop_id.raw())
        });
        for prop_id in remaining {
            if let Err(err) = self.backend.unsubscribe(prop_id).await {
                warn!(?prop_id, ?err, "unsubscribe during shutdown failed, continuing");
            }
        }
        state.clear();
        Ok(())
    }

    /// Looks up the static config for a property. A read-only convenience
    /// accessor for services that only need to inspect bounds or change mode
    /// without going through the full subscribe contract.
    pub async fn property_config(&self, prop_id: PropertyId) -> Option<PropertyConfig> {
        self.state.lock().await.all_properties.get(&prop_id).cloned()
    }

    /// The effective access for a `(propId, areaId)` pair, inheriting from the
    /// property level when the area has no override.
    pub async fn access_for(&self, prop_id: PropertyId, area_id: AreaId) -> Option<Access> {
        self.state
            .lock()
            .await
            .access_by_propid_areaid
            .get(&(prop_id, area_id))
            .copied()
    }

    /// Spawns the background task that drains the backend's event channel and
    /// dispatches `PropertyChanged`/`PropertySetError` batches to their owning
    /// services. `Async*` results are forwarded to `sink` instead, since only
    /// request-issuing services (the property service) care about those.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        rx: BackendEventReceiver,
        sink: Arc<dyn AsyncResultSink>,
    ) -> tokio::task::JoinHandle<()> {
        event_loop::spawn(Arc::clone(self), rx, sink)
    }

    /// Validates a batch of subscribe options from `service`, then applies
    /// and invokes the backend, rolling back the in-memory rate table if the
    /// backend call fails.
    ///
    /// Validation of every option/area in the batch runs to completion
    /// before anything is written to `rate_info`: an invalid option partway
    /// through the batch must not leave earlier options' changes applied
    /// with no corresponding `backend.subscribe` call behind them.
    pub async fn subscribe(&self, service: ServiceId, options: &[SubscribeOption]) -> VpbResult<()> {
        let mut state = self.state.lock().await;

        struct PendingChange {
            key: (PropertyId, AreaId),
            previous: Option<RateInfo>,
            new_rate: RateInfo,
        }

        let mut pending: Vec<PendingChange> = Vec::new();

        for option in options {
            let config = state
                .all_properties
                .get(&option.prop_id)
                .cloned()
                .ok_or_else(|| {
                    VpbError::argument_for(option.prop_id, None, "unknown propId")
                })?;
            if state.property_handlers.get(&option.prop_id) != Some(&service) {
                return Err(VpbError::argument_for(
                    option.prop_id,
                    None,
                    "service does not own this propId",
                ));
            }
            if !config.change_mode.is_subscribable() {
                warn!(prop_id = ?option.prop_id, "ignoring subscribe request for STATIC property");
                continue;
            }

            let area_ids = if option.area_ids.is_empty() {
                config.area_ids()
            } else {
                option.area_ids.clone()
            };
            for area_id in area_ids {
                let access = config.effective_access(area_id);
                if !access.is_readable() {
                    return Err(VpbError::argument_for(
                        option.prop_id,
                        Some(area_id),
                        "area is not readable",
                    ));
                }
                let forced_continuous = config.change_mode == ChangeMode::Continuous;
                let new_rate = RateInfo::new(
                    config.clamp_rate_hz(option.sample_rate_hz),
                    option.variable_update_rate && forced_continuous,
                    if forced_continuous { option.resolution } else { 0.0 },
                );
                let key = (option.prop_id, area_id);
                let previous = state.rate_info.get(&key).copied();
                if previous.is_some_and(|existing| existing.approximately_equals(&new_rate)) {
                    continue;
                }
                pending.push(PendingChange { key, previous, new_rate });
            }
        }

        if pending.is_empty() {
            debug!("subscribe resolved to no-op, all options already matched");
            return Ok(());
        }

        for change in &pending {
            state.rate_info.insert(change.key, change.new_rate);
        }
        let changed: Vec<SubscribeOption> = pending
            .iter()
            .map(|change| SubscribeOption {
                prop_id: change.key.0,
                area_ids: vec![change.key.1],
                sample_rate_hz: change.new_rate.update_rate_hz,
                variable_update_rate: change.new_rate.variable_update_rate,
                resolution: change.new_rate.resolution,
            })
            .collect();

        if let Err(backend) = self.backend.subscribe(&changed).await {
            for change in pending {
                match change.previous {
                    Some(rate) => {
                        state.rate_info.insert(change.key, rate);
                    }
                    None => {
                        state.rate_info.remove(&change.key);
                    }
                }
            }
            return Err(VpbError::BackendPermanent { backend });
        }
        Ok(())
    }

    /// Removes every readable `(propId, areaId)` owned by `service` from the
    /// rate table and calls `backend.unsubscribe` if anything was removed.
    pub async fn unsubscribe(&self, service: ServiceId, prop_id: PropertyId) -> VpbResult<()> {
        let mut state = self.state.lock().await;
        let Some(config) = state.all_properties.get(&prop_id).cloned() else {
            warn!(?prop_id, "unsubscribe for unknown propId, ignoring");
            return Ok(());
        };
        if state.property_handlers.get(&prop_id) != Some(&service) {
            warn!(?prop_id, "unsubscribe from non-owning service, ignoring");
            return Ok(());
        }

        let mut removed = Vec::new();
        for area_id in config.area_ids() {
            if !config.effective_access(area_id).is_readable() {
                continue;
            }
            if let Some(rate) = state.rate_info.remove(&(prop_id, area_id)) {
                removed.push((area_id, rate));
            }
        }
        if removed.is_empty() {
            return Ok(());
        }

        if let Err(backend) = self.backend.unsubscribe(prop_id).await {
            for (area_id, rate) in removed {
                state.rate_info.insert((prop_id, area_id), rate);
            }
            return Err(VpbError::BackendPermanent { backend });
        }
        Ok(())
    }

    /// Synchronous read, passed through the retry driver.
    pub async fn get(&self, request: PropertyValue) -> VpbResult<PropertyValue> {
        let _state = self.state.lock().await;
        self.retry
            .run_get(|| self.backend.get(request.clone()))
            .await
    }

    /// Synchronous write, passed through the retry driver.
    pub async fn set(&self, value: PropertyValue) -> VpbResult<()> {
        let _state = self.state.lock().await;
        self.retry.run(|| self.backend.set(value.clone())).await
    }

    /// The current rate info for a `(propId, areaId)` pair, if subscribed.
    /// Exposed for tests asserting against universal invariant 1 in the
    /// testable-properties list: the stored `RateInfo` must always equal the
    /// last value the Hub handed to `backend.subscribe`.
    pub async fn rate_info(&self, prop_id: PropertyId, area_id: AreaId) -> Option<RateInfo> {
        self.state.lock().await.rate_info.get(&(prop_id, area_id)).copied()
    }
}
