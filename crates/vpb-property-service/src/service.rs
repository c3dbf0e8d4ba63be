//! The generic property service (C7): async get/set orchestration, the
//! wait-for-update protocol, and subscription reference counting on top of a
//! [`Hub`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};
use vpb_backend::{
    AsyncValueRequest as BackendAsyncValueRequest, BackendAdapter, SubscribeOption,
};
use vpb_core::{
    translate_backend_status, AreaId, BackendError, BackendStatus, ClientErrorCode,
    PropertyConfig, PropertyId, PropertyStatus, PropertyValue, ServiceRequestId, VpbError,
    VpbResult,
};
use vpb_hub::{AsyncResultSink, Hub, ServiceId, ServiceRef};

use crate::callback::{AsyncResult, AsyncValueRequest, ClientCallback, PropertyEventListener};
use crate::ids::ClientId;
use crate::request::{AsyncRequest, RequestKind};
use crate::state::PropertyServiceState;

/// Fixed retry delay for TRY_AGAIN on the async path (≈100ms per the sync
/// retry driver's default).
const RETRY_DELAY_MS: u64 = 100;

enum InternalEvent {
    PropertyChanged(Vec<PropertyValue>),
    PropertySetError(Vec<(PropertyId, AreaId, BackendError)>),
    AsyncGetResult(ServiceRequestId, Result<PropertyValue, BackendError>),
    AsyncSetResult(ServiceRequestId, Result<(), BackendError>),
}

/// Async get/set orchestration on top of a [`Hub`]: request-id minting,
/// the pending-request pool, the wait-for-update completion protocol, and
/// reference-counted subscriptions shared between external clients and
/// in-flight SET requests.
pub struct PropertyService {
    hub: Arc<Hub>,
    backend: Arc<dyn BackendAdapter>,
    service_id: OnceLock<ServiceId>,
    owned_properties: OnceLock<HashMap<PropertyId, PropertyConfig>>,
    state: Mutex<PropertyServiceState>,
    event_tx: mpsc::UnboundedSender<InternalEvent>,
    scheduler_notify: Arc<Notify>,
}

impl PropertyService {
    /// Builds a property service and starts its two background tasks: the
    /// ordered event-processing loop and the pending-request timeout
    /// scheduler. Call [`PropertyService::register`] before using it.
    pub fn new(hub: Arc<Hub>, backend: Arc<dyn BackendAdapter>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            hub,
            backend,
            service_id: OnceLock::new(),
            owned_properties: OnceLock::new(),
            state: Mutex::new(PropertyServiceState::default()),
            event_tx,
            scheduler_notify: Arc::new(Notify::new()),
        });

        let event_worker = Arc::clone(&service);
        tokio::spawn(async move { event_worker.run_event_loop(event_rx).await });

        let scheduler_worker = Arc::clone(&service);
        tokio::spawn(async move { scheduler_worker.run_scheduler().await });

        service
    }

    /// Registers this service with the Hub, claiming whatever propIds no
    /// other service has already claimed.
    pub async fn register(self: &Arc<Self>) {
        let id = self.hub.register_service(self.clone() as Arc<dyn ServiceRef>).await;
        let _ = self.service_id.set(id);
    }

    /// Registers a client's result callback and returns the handle it must
    /// present on every subsequent call.
    pub async fn register_client(&self, callback: Arc<dyn ClientCallback>) -> ClientId {
        let mut state = self.state.lock().await;
        let id = state.client_id_gen.next();
        state.clients.insert(id, callback);
        id
    }

    pub async fn set_listener(&self, listener: Arc<dyn PropertyEventListener>) {
        self.state.lock().await.listener = Some(listener);
    }

    fn require_service_id(&self) -> VpbResult<ServiceId> {
        self.service_id
            .get()
            .copied()
            .ok_or_else(|| VpbError::internal("PropertyService used before Hub registration"))
    }

    fn owned_config(&self, prop_id: PropertyId) -> Option<PropertyConfig> {
        self.owned_properties.get().and_then(|m| m.get(&prop_id).cloned())
    }

    // ---- public async get/set -------------------------------------------

    /// One malformed request in a batch (e.g. an unsupported propId) fails
    /// only that request's own callback delivery; its siblings in the same
    /// call are unaffected.
    pub async fn get_property_values_async(&self, client: ClientId, requests: Vec<AsyncValueRequest>, timeout_ms: u64) {
        let mut batch = Vec::with_capacity(requests.len());
        let mut rejected = Vec::new();
        {
            let mut state = self.state.lock().await;
            for req in &requests {
                if self.owned_config(req.prop_id).is_none() {
                    rejected.push(req.manager_request_id);
                    continue;
                }
                let service_request_id = state.id_gen.next();
                let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                state.pool.add(AsyncRequest {
                    service_request_id,
                    manager_request_id: req.manager_request_id,
                    client,
                    kind: RequestKind::Get,
                    prop_id: req.prop_id,
                    area_id: req.area_id,
                    target_value: None,
                    update_rate_hz: 0.0,
                    wait_for_property_update: false,
                    deadline,
                    set_request_sent: false,
                    value_updated_at: None,
                    associated_request: None,
                });
                batch.push(BackendAsyncValueRequest {
                    service_request_id,
                    value: PropertyValue::request_shell(req.prop_id, req.area_id),
                });
            }
        }
        for manager_request_id in rejected {
            self.deliver(
                client,
                AsyncResult::Error {
                    manager_request_id,
                    error_code: ClientErrorCode::InvalidArg,
                    vendor_error_code: 0,
                },
            )
            .await;
        }
        if !batch.is_empty() {
            self.scheduler_notify.notify_one();
            self.backend.get_async(batch);
        }
    }

    /// Same per-request error isolation as [`PropertyService::get_property_values_async`].
    pub async fn set_property_values_async(&self, client: ClientId, requests: Vec<AsyncValueRequest>, timeout_ms: u64) {
        for req in requests {
            let manager_request_id = req.manager_request_id;
            if let Err(err) = self.dispatch_set(client, req, timeout_ms).await {
                self.deliver(
                    client,
                    AsyncResult::Error {
                        manager_request_id,
                        error_code: err.client_error_code(),
                        vendor_error_code: 0,
                    },
                )
                .await;
            }
        }
    }

    async fn dispatch_set(&self, client: ClientId, req: AsyncValueRequest, timeout_ms: u64) -> VpbResult<()> {
        let target_value = req
            .value
            .clone()
            .ok_or_else(|| VpbError::argument_for(req.prop_id, Some(req.area_id), "SET request missing a value"))?;
        let config = self
            .owned_config(req.prop_id)
            .ok_or_else(|| VpbError::argument_for(req.prop_id, Some(req.area_id), "unsupported propId"))?;
        if req.update_rate_hz < 0.0 {
            return Err(VpbError::argument_for(req.prop_id, Some(req.area_id), "updateRateHz must be >= 0"));
        }

        let effective_rate = config.clamp_rate_hz(req.update_rate_hz);
        let wait = req.wait_for_property_update;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        let (set_id, get_id) = {
            let mut state = self.state.lock().await;
            let set_id = state.id_gen.next();
            let get_id = state.id_gen.next();

            state.pool.add(AsyncRequest {
                service_request_id: set_id,
                manager_request_id: req.manager_request_id,
                client,
                kind: RequestKind::Set,
                prop_id: req.prop_id,
                area_id: req.area_id,
                target_value: Some(target_value.clone()),
                update_rate_hz: effective_rate,
                wait_for_property_update: wait,
                deadline,
                set_request_sent: false,
                value_updated_at: None,
                associated_request: Some(get_id),
            });
            state.pool.add(AsyncRequest {
                service_request_id: get_id,
                manager_request_id: req.manager_request_id,
                client,
                kind: RequestKind::GetInitialValueForSet,
                prop_id: req.prop_id,
                area_id: req.area_id,
                target_value: Some(target_value.clone()),
                update_rate_hz: 0.0,
                wait_for_property_update: false,
                deadline,
                set_request_sent: false,
                value_updated_at: None,
                associated_request: Some(set_id),
            });
            if wait {
                state.waiters.entry(req.prop_id).or_default().push(set_id);
            }
            (set_id, get_id)
        };
        self.scheduler_notify.notify_one();

        if wait {
            self.recompute_subscription(req.prop_id).await?;
        }

        // The initial-value read is dispatched before the SET: it races the
        // SET and both outcomes are monitored for completion.
        self.backend.get_async(vec![BackendAsyncValueRequest {
            service_request_id: get_id,
            value: PropertyValue::request_shell(req.prop_id, req.area_id),
        }]);
        self.backend.set_async(vec![BackendAsyncValueRequest {
            service_request_id: set_id,
            value: target_value,
        }]);
        Ok(())
    }

    pub async fn cancel_requests(&self, manager_request_ids: &[u64]) {
        let mgr_set: HashSet<u64> = manager_request_ids.iter().copied().collect();
        self.cancel_matching(|req| mgr_set.contains(&req.manager_request_id)).await;
    }

    async fn cancel_matching(&self, predicate: impl Fn(&AsyncRequest) -> bool) {
        let mut removed = Vec::new();
        let mut props_to_recompute = Vec::new();
        {
            let mut state = self.state.lock().await;
            let ids = state.pool.ids_matching(&predicate);
            for id in ids {
                if let Some(req) = state.pool.remove(id) {
                    if req.wait_for_property_update {
                        if let Some(waiters) = state.waiters.get_mut(&req.prop_id) {
                            waiters.retain(|w| *w != id);
                        }
                        props_to_recompute.push(req.prop_id);
                    }
                    removed.push(req);
                }
            }
        }
        let ids: Vec<ServiceRequestId> = removed.iter().map(|r| r.service_request_id).collect();
        if !ids.is_empty() {
            self.backend.cancel(&ids);
        }
        for prop_id in dedup_prop_ids(props_to_recompute) {
            let _ = self.recompute_subscription(prop_id).await;
        }
    }

    /// Cancels every pending request tied to a client whose channel has
    /// died, and drops its external subscriptions.
    pub async fn on_client_channel_death(&self, client: ClientId) {
        self.cancel_matching(|req| req.client == client).await;
        let affected = {
            let mut state = self.state.lock().await;
            state.clients.remove(&client);
            let affected: Vec<PropertyId> = state
                .external_subscriptions
                .iter()
                .filter(|(_, subs)| subs.contains_key(&client))
                .map(|(prop_id, _)| *prop_id)
                .collect();
            for subs in state.external_subscriptions.values_mut() {
                subs.remove(&client);
            }
            state.external_subscriptions.retain(|_, subs| !subs.is_empty());
            affected
        };
        for prop_id in affected {
            let _ = self.recompute_subscription(prop_id).await;
        }
    }

    // ---- external subscriptions -------------------------------------------

    pub async fn subscribe_property(&self, client: ClientId, prop_id: PropertyId, rate_hz: f32) -> VpbResult<()> {
        if rate_hz < 0.0 {
            return Err(VpbError::argument_for(prop_id, None, "updateRateHz must be >= 0"));
        }
        if self.owned_config(prop_id).is_none() {
            return Err(VpbError::argument_for(prop_id, None, "unsupported propId"));
        }
        {
            let mut state = self.state.lock().await;
            state
                .external_subscriptions
                .entry(prop_id)
                .or_default()
                .insert(client, rate_hz);
        }
        self.recompute_subscription(prop_id).await
    }

    pub async fn unsubscribe_property(&self, client: ClientId, prop_id: PropertyId) -> VpbResult<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(subs) = state.external_subscriptions.get_mut(&prop_id) {
                subs.remove(&client);
                if subs.is_empty() {
                    state.external_subscriptions.remove(&prop_id);
                }
            }
        }
        self.recompute_subscription(prop_id).await
    }

    /// Recomputes `max(external subscribed rate, max over live waiters)` for
    /// `prop_id` and issues the corresponding Hub subscribe/unsubscribe call.
    /// This is the single most subtle concurrency invariant in the core: the
    /// recomputation and the Hub call happen while this service's own lock is
    /// held, so two concurrent triggers for the same propId can't compute
    /// stale rates against each other.
    async fn recompute_subscription(&self, prop_id: PropertyId) -> VpbResult<()> {
        let service_id = self.require_service_id()?;
        let new_rate = {
            let state = self.state.lock().await;
            match (state.max_external_rate(prop_id), state.max_waiter_rate(prop_id)) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.max(b)),
            }
        };
        match new_rate {
            Some(hz) => {
                self.hub
                    .subscribe(
                        service_id,
                        &[SubscribeOption {
                            prop_id,
                            area_ids: vec![],
                            sample_rate_hz: hz,
                            variable_update_rate: false,
                            resolution: 0.0,
                        }],
                    )
                    .await
            }
            None => self.hub.unsubscribe(service_id, prop_id).await,
        }
    }

    // ---- synchronous passthrough ------------------------------------------

    pub async fn get_property_sync(&self, prop_id: PropertyId, area_id: AreaId) -> VpbResult<PropertyValue> {
        self.hub.get(PropertyValue::request_shell(prop_id, area_id)).await
    }

    pub async fn set_property_sync(&self, value: PropertyValue) -> VpbResult<()> {
        self.hub.set(value).await
    }

    // ---- delivery ----------------------------------------------------------

    async fn deliver(&self, client: ClientId, result: AsyncResult) {
        let callback = self.state.lock().await.clients.get(&client).cloned();
        match callback {
            Some(cb) => cb.on_result(result),
            None => warn!(%client, "no callback registered for client, dropping result"),
        }
    }

    // ---- ordered event processing ------------------------------------------

    async fn run_event_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<InternalEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                InternalEvent::PropertyChanged(batch) => self.handle_property_events(batch).await,
                InternalEvent::PropertySetError(errors) => self.handle_set_errors(errors).await,
                InternalEvent::AsyncGetResult(id, result) => self.handle_async_get_result(id, result).await,
                InternalEvent::AsyncSetResult(id, result) => self.handle_async_set_result(id, result).await,
            }
        }
    }

    async fn handle_property_events(&self, batch: Vec<PropertyValue>) {
        let listener = self.state.lock().await.listener.clone();
        if let Some(listener) = &listener {
            for value in &batch {
                listener.on_property_event(value.clone());
            }
        }
        for value in batch {
            self.match_waiters_to_event(value).await;
        }
    }

    /// On a property-update event matching a waiter's target value, marks it
    /// updated; if the SET callback already landed too, the waiter is
    /// complete.
    async fn match_waiters_to_event(&self, value: PropertyValue) {
        let completed: Vec<(AsyncRequest, u64)> = {
            let mut state = self.state.lock().await;
            let Some(waiter_ids) = state.waiters.get(&value.prop_id).cloned() else {
                return;
            };
            let mut completed = Vec::new();
            for set_id in waiter_ids {
                let matches = state
                    .pool
                    .get(set_id)
                    .is_some_and(|req| req.target_value.as_ref().is_some_and(|target| value.payload_matches(target)));
                if !matches {
                    continue;
                }
                if let Some(req) = state.pool.get_mut(set_id) {
                    req.value_updated_at = Some(value.timestamp_ns);
                }
                let is_complete = state.pool.get(set_id).is_some_and(|r| r.is_complete_set());
                if !is_complete {
                    continue;
                }
                if let Some(req) = state.pool.remove(set_id) {
                    if let Some(waiters) = state.waiters.get_mut(&value.prop_id) {
                        waiters.retain(|id| *id != set_id);
                    }
                    if let Some(get_id) = req.associated_request {
                        state.pool.remove(get_id);
                    }
                    completed.push((req, value.timestamp_ns));
                }
            }
            completed
        };
        for (req, ts) in completed {
            self.deliver(
                req.client,
                AsyncResult::SetOk {
                    manager_request_id: req.manager_request_id,
                    update_timestamp_nanos: ts,
                },
            )
            .await;
            let _ = self.recompute_subscription(req.prop_id).await;
        }
    }

    async fn handle_set_errors(&self, errors: Vec<(PropertyId, AreaId, BackendError)>) {
        let listener = self.state.lock().await.listener.clone();
        if let Some(listener) = &listener {
            for (prop_id, area_id, err) in &errors {
                listener.on_property_set_error(*prop_id, *area_id, translate_backend_status(err.status));
            }
        }
        let completed: Vec<(AsyncRequest, BackendError)> = {
            let mut state = self.state.lock().await;
            let mut completed = Vec::new();
            for (prop_id, area_id, err) in errors {
                let Some(waiter_ids) = state.waiters.get(&prop_id).cloned() else {
                    continue;
                };
                for set_id in waiter_ids {
                    let matches = state.pool.get(set_id).is_some_and(|r| r.area_id == area_id);
                    if !matches {
                        continue;
                    }
                    if let Some(req) = state.pool.remove(set_id) {
                        if let Some(waiters) = state.waiters.get_mut(&prop_id) {
                            waiters.retain(|id| *id != set_id);
                        }
                        if let Some(get_id) = req.associated_request {
                            state.pool.remove(get_id);
                        }
                        completed.push((req, err));
                    }
                }
            }
            completed
        };
        for (req, err) in completed {
            self.deliver(
                req.client,
                AsyncResult::Error {
                    manager_request_id: req.manager_request_id,
                    error_code: translate_backend_status(err.status),
                    vendor_error_code: err.vendor_code,
                },
            )
            .await;
            let _ = self.recompute_subscription(req.prop_id).await;
        }
    }

    async fn handle_async_get_result(&self, id: ServiceRequestId, result: Result<PropertyValue, BackendError>) {
        let request = {
            let mut state = self.state.lock().await;
            state.pool.remove(id)
        };
        let Some(request) = request else {
            return; // already cancelled or timed out
        };
        match request.kind {
            RequestKind::Get => self.complete_plain_get(request, result).await,
            RequestKind::GetInitialValueForSet => self.complete_initial_value_get(request, result).await,
            RequestKind::Set => {
                warn!("SET result arrived on the get-result channel, ignoring");
            }
        }
    }

    async fn complete_plain_get(&self, request: AsyncRequest, result: Result<PropertyValue, BackendError>) {
        match result {
            Ok(value) => match value.status {
                PropertyStatus::Available => {
                    self.deliver(
                        request.client,
                        AsyncResult::GetOk {
                            manager_request_id: request.manager_request_id,
                            value,
                        },
                    )
                    .await
                }
                PropertyStatus::Unavailable => {
                    self.deliver(
                        request.client,
                        AsyncResult::Error {
                            manager_request_id: request.manager_request_id,
                            error_code: ClientErrorCode::PropertyNotAvailable,
                            vendor_error_code: 0,
                        },
                    )
                    .await
                }
                PropertyStatus::Error => {
                    self.deliver(
                        request.client,
                        AsyncResult::Error {
                            manager_request_id: request.manager_request_id,
                            error_code: ClientErrorCode::Unknown,
                            vendor_error_code: 0,
                        },
                    )
                    .await
                }
            },
            Err(err) if err.status == BackendStatus::TryAgain => {
                if Instant::now() >= request.deadline {
                    self.deliver(
                        request.client,
                        AsyncResult::Error {
                            manager_request_id: request.manager_request_id,
                            error_code: ClientErrorCode::Timeout,
                            vendor_error_code: 0,
                        },
                    )
                    .await;
                } else {
                    self.schedule_get_retry(request).await;
                }
            }
            Err(err) => {
                self.deliver(
                    request.client,
                    AsyncResult::Error {
                        manager_request_id: request.manager_request_id,
                        error_code: translate_backend_status(err.status),
                        vendor_error_code: err.vendor_code,
                    },
                )
                .await
            }
        }
    }

    async fn schedule_get_retry(&self, request: AsyncRequest) {
        let new_id = {
            let mut state = self.state.lock().await;
            let new_id = state.id_gen.next();
            let mut new_request = request.clone();
            new_request.service_request_id = new_id;
            state.pool.add(new_request);
            new_id
        };
        self.scheduler_notify.notify_one();
        let backend = Arc::clone(&self.backend);
        let prop_id = request.prop_id;
        let area_id = request.area_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            backend.get_async(vec![BackendAsyncValueRequest {
                service_request_id: new_id,
                value: PropertyValue::request_shell(prop_id, area_id),
            }]);
        });
    }

    /// A GET_INITIAL_VALUE_FOR_SET that matches the target completes its
    /// linked SET immediately; if the SET already completed via a
    /// property-update event, the linked entry is already gone and this is a
    /// silent no-op.
    async fn complete_initial_value_get(&self, request: AsyncRequest, result: Result<PropertyValue, BackendError>) {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                debug!(?err, "initial-value read for SET failed, discarding");
                return;
            }
        };
        let matches_target = value.status == PropertyStatus::Available
            && request
                .target_value
                .as_ref()
                .is_some_and(|target| value.payload_matches(target));
        if !matches_target {
            return;
        }
        let Some(set_id) = request.associated_request else {
            return;
        };
        let completed = {
            let mut state = self.state.lock().await;
            let completed = state.pool.remove(set_id);
            if completed.is_some() {
                if let Some(waiters) = state.waiters.get_mut(&request.prop_id) {
                    waiters.retain(|id| *id != set_id);
                }
            }
            completed
        };
        if let Some(set_req) = completed {
            self.deliver(
                set_req.client,
                AsyncResult::SetOk {
                    manager_request_id: set_req.manager_request_id,
                    update_timestamp_nanos: value.timestamp_ns,
                },
            )
            .await;
            let _ = self.recompute_subscription(set_req.prop_id).await;
        }
    }

    async fn handle_async_set_result(&self, id: ServiceRequestId, result: Result<(), BackendError>) {
        match result {
            Ok(()) => self.complete_set_ack(id).await,
            Err(err) if err.status == BackendStatus::TryAgain => self.schedule_set_retry(id).await,
            Err(err) => self.fail_set(id, err).await,
        }
    }

    async fn complete_set_ack(&self, id: ServiceRequestId) {
        let outcome = {
            let mut state = self.state.lock().await;
            let Some(req) = state.pool.get_mut(id) else {
                return;
            };
            req.set_request_sent = true;
            if !req.is_complete_set() {
                None
            } else {
                let ts = if req.wait_for_property_update {
                    req.value_updated_at.unwrap_or(0)
                } else {
                    now_ns()
                };
                let completed = state.pool.remove(id).expect("just checked present");
                if let Some(waiters) = state.waiters.get_mut(&completed.prop_id) {
                    waiters.retain(|w| *w != id);
                }
                if let Some(get_id) = completed.associated_request {
                    state.pool.remove(get_id);
                }
                Some((completed, ts))
            }
        };
        if let Some((req, ts)) = outcome {
            self.deliver(
                req.client,
                AsyncResult::SetOk {
                    manager_request_id: req.manager_request_id,
                    update_timestamp_nanos: ts,
                },
            )
            .await;
            let _ = self.recompute_subscription(req.prop_id).await;
        }
    }

    async fn fail_set(&self, id: ServiceRequestId, err: BackendError) {
        let request = {
            let mut state = self.state.lock().await;
            let Some(req) = state.pool.remove(id) else {
                return;
            };
            if let Some(waiters) = state.waiters.get_mut(&req.prop_id) {
                waiters.retain(|w| *w != id);
            }
            req
        };
        if let Some(get_id) = request.associated_request {
            self.backend.cancel(&[get_id]);
            self.state.lock().await.pool.remove(get_id);
        }
        self.deliver(
            request.client,
            AsyncResult::Error {
                manager_request_id: request.manager_request_id,
                error_code: translate_backend_status(err.status),
                vendor_error_code: err.vendor_code,
            },
        )
        .await;
        if request.wait_for_property_update {
            let _ = self.recompute_subscription(request.prop_id).await;
        }
    }

    async fn schedule_set_retry(&self, id: ServiceRequestId) {
        enum Outcome {
            TimedOut(AsyncRequest),
            Retry(ServiceRequestId, PropertyValue),
        }

        let outcome = {
            let mut state = self.state.lock().await;
            let Some(old) = state.pool.remove(id) else {
                return;
            };
            if Instant::now() >= old.deadline {
                if let Some(waiters) = state.waiters.get_mut(&old.prop_id) {
                    waiters.retain(|x| *x != id);
                }
                Outcome::TimedOut(old)
            } else {
                let new_id = state.id_gen.next();
                let mut new_request = old.clone();
                new_request.service_request_id = new_id;
                let target = new_request
                    .target_value
                    .clone()
                    .expect("SET requests always carry a target value");
                if let Some(waiters) = state.waiters.get_mut(&old.prop_id) {
                    for slot in waiters.iter_mut() {
                        if *slot == id {
                            *slot = new_id;
                        }
                    }
                }
                if let Some(get_id) = new_request.associated_request {
                    if let Some(companion) = state.pool.get_mut(get_id) {
                        companion.associated_request = Some(new_id);
                    }
                }
                state.pool.add(new_request);
                Outcome::Retry(new_id, target)
            }
        };

        match outcome {
            Outcome::TimedOut(old) => {
                self.deliver(
                    old.client,
                    AsyncResult::Error {
                        manager_request_id: old.manager_request_id,
                        error_code: ClientErrorCode::Timeout,
                        vendor_error_code: 0,
                    },
                )
                .await;
                let _ = self.recompute_subscription(old.prop_id).await;
            }
            Outcome::Retry(new_id, value) => {
                self.scheduler_notify.notify_one();
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    backend.set_async(vec![BackendAsyncValueRequest {
                        service_request_id: new_id,
                        value,
                    }]);
                });
            }
        }
    }

    // ---- timeout scheduler --------------------------------------------------

    async fn run_scheduler(self: Arc<Self>) {
        loop {
            let sleep_until = self.state.lock().await.pool.next_deadline();
            let fire = match sleep_until {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => true,
                        _ = self.scheduler_notify.notified() => false,
                    }
                }
                None => {
                    self.scheduler_notify.notified().await;
                    false
                }
            };
            if fire {
                self.fire_due_timeouts().await;
            }
        }
    }

    async fn fire_due_timeouts(&self) {
        let due = {
            let mut state = self.state.lock().await;
            let due = state.pool.take_due(Instant::now());
            for req in &due {
                if let Some(waiters) = state.waiters.get_mut(&req.prop_id) {
                    waiters.retain(|id| *id != req.service_request_id);
                }
            }
            due
        };
        let mut props_to_recompute = Vec::new();
        for req in due {
            if req.kind != RequestKind::GetInitialValueForSet {
                self.deliver(
                    req.client,
                    AsyncResult::Error {
                        manager_request_id: req.manager_request_id,
                        error_code: ClientErrorCode::Timeout,
                        vendor_error_code: 0,
                    },
                )
                .await;
            }
            if req.wait_for_property_update {
                props_to_recompute.push(req.prop_id);
            }
        }
        for prop_id in dedup_prop_ids(props_to_recompute) {
            let _ = self.recompute_subscription(prop_id).await;
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn dedup_prop_ids(mut ids: Vec<PropertyId>) -> Vec<PropertyId> {
    ids.sort_by_key(|id| id.raw());
    ids.dedup();
    ids
}

impl ServiceRef for PropertyService {
    fn supported_properties(&self) -> Vec<PropertyId> {
        Vec::new()
    }

    fn take_properties(&self, configs: &[PropertyConfig]) {
        let map = configs.iter().map(|c| (c.prop_id, c.clone())).collect();
        let _ = self.owned_properties.set(map);
    }

    fn init(&self) {
        debug!("property service ready");
    }

    fn on_events(&self, batch: Vec<PropertyValue>) {
        let _ = self.event_tx.send(InternalEvent::PropertyChanged(batch));
    }

    fn on_set_error(&self, errors: Vec<(PropertyId, AreaId, BackendError)>) {
        let _ = self.event_tx.send(InternalEvent::PropertySetError(errors));
    }
}

impl AsyncResultSink for PropertyService {
    fn on_async_get_result(&self, id: ServiceRequestId, result: Result<PropertyValue, BackendError>) {
        let _ = self.event_tx.send(InternalEvent::AsyncGetResult(id, result));
    }

    fn on_async_set_result(&self, id: ServiceRequestId, result: Result<(), BackendError>) {
        let _ = self.event_tx.send(InternalEvent::AsyncSetResult(id, result));
    }
}
