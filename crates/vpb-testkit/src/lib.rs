//! `vpb-testkit`: a scriptable, in-process [`BackendAdapter`] double.
//!
//! # Why
//! Hub and PropertyService tests need a backend that behaves predictably: canned
//! responses for `get`/`set`, recorded `subscribe`/`unsubscribe` calls, and the
//! ability to push `BackendEvent`s on demand to simulate property-change
//! notifications or async-result delivery. A real backend adapter would talk to
//! a vendor HAL on its own thread; this one just lets test code drive both sides
//! of that boundary directly from the same task.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use vpb_backend::{
    AsyncValueRequest, BackendAdapter, BackendEvent, BackendEventReceiver, BackendEventSender,
    SubscribeOption, backend_event_channel,
};
use vpb_core::{AreaId, BackendError, BackendStatus, PropertyConfig, PropertyId, PropertyValue};

type SlotKey = (PropertyId, AreaId);

/// An in-memory backend whose responses are scripted ahead of time by test code.
///
/// Unscripted `get`/`set` calls succeed against whatever was last recorded via
/// [`FakeBackend::seed_value`] (or, for `get`, an `UNAVAILABLE` shell if nothing
/// was seeded) rather than panicking — most tests only care about scripting the
/// one call under test and want everything else to behave like a healthy
/// backend.
pub struct FakeBackend {
    configs: Vec<PropertyConfig>,
    values: Mutex<HashMap<SlotKey, PropertyValue>>,
    get_script: Mutex<HashMap<SlotKey, VecDeque<Result<PropertyValue, BackendError>>>>,
    set_script: Mutex<HashMap<SlotKey, VecDeque<Result<(), BackendError>>>>,
    subscribe_calls: Mutex<Vec<Vec<SubscribeOption>>>,
    unsubscribe_calls: Mutex<Vec<PropertyId>>,
    active_subscriptions: Mutex<HashMap<PropertyId, SubscribeOption>>,
    events: BackendEventSender,
}

impl FakeBackend {
    /// Builds a fake backend seeded with the given static configs and returns it
    /// alongside the receiving end of its event channel (the end a Hub would
    /// normally hold).
    pub fn new(configs: Vec<PropertyConfig>) -> (Self, BackendEventReceiver) {
        let (tx, rx) = backend_event_channel();
        let backend = Self {
            configs,
            values: Mutex::new(HashMap::new()),
            get_script: Mutex::new(HashMap::new()),
            set_script: Mutex::new(HashMap::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            active_subscriptions: Mutex::new(HashMap::new()),
            events: tx,
        };
        (backend, rx)
    }

    /// Clones the sender half so test code can push [`BackendEvent`]s directly,
    /// as if they had arrived from the backend's own thread.
    pub fn event_sender(&self) -> BackendEventSender {
        self.events.clone()
    }

    /// Seeds the value a plain (unscripted) `get` should return for a slot.
    pub fn seed_value(&self, value: PropertyValue) {
        self.values
            .lock()
            .insert((value.prop_id, value.area_id), value);
    }

    /// Queues one scripted response for the next `get` call on this slot.
    /// Multiple calls queue in FIFO order, letting a test express "fails twice,
    /// then succeeds".
    pub fn push_get_response(
        &self,
        prop_id: PropertyId,
        area_id: AreaId,
        response: Result<PropertyValue, BackendError>,
    ) {
        self.get_script
            .lock()
            .entry((prop_id, area_id))
            .or_default()
            .push_back(response);
    }

    /// Queues one scripted response for the next `set` call on this slot.
    pub fn push_set_response(
        &self,
        prop_id: PropertyId,
        area_id: AreaId,
        response: Result<(), BackendError>,
    ) {
        self.set_script
            .lock()
            .entry((prop_id, area_id))
            .or_default()
            .push_back(response);
    }

    /// Pushes a `PropertyChanged` event as if the backend had observed it.
    pub fn emit_property_changed(&self, values: Vec<PropertyValue>) {
        for v in &values {
            self.values.lock().insert((v.prop_id, v.area_id), v.clone());
        }
        let _ = self.events.send(BackendEvent::PropertyChanged(values));
    }

    /// Pushes a `PropertySetError` event.
    pub fn emit_set_error(&self, errors: Vec<(PropertyId, AreaId, BackendError)>) {
        let _ = self.events.send(BackendEvent::PropertySetError(errors));
    }

    /// All `subscribe` calls observed so far, in order.
    pub fn subscribe_calls(&self) -> Vec<Vec<SubscribeOption>> {
        self.subscribe_calls.lock().clone()
    }

    /// All `unsubscribe` calls observed so far, in order.
    pub fn unsubscribe_calls(&self) -> Vec<PropertyId> {
        self.unsubscribe_calls.lock().clone()
    }

    /// The currently active subscription option for a property, if any.
    pub fn active_subscription(&self, prop_id: PropertyId) -> Option<SubscribeOption> {
        self.active_subscriptions.lock().get(&prop_id).cloned()
    }

    fn next_get_response(
        &self,
        prop_id: PropertyId,
        area_id: AreaId,
    ) -> Result<PropertyValue, BackendError> {
        let scripted = self
            .get_script
            .lock()
            .get_mut(&(prop_id, area_id))
            .and_then(|queue| queue.pop_front());
        if let Some(scripted) = scripted {
            return scripted;
        }
        Ok(self
            .values
            .lock()
            .get(&(prop_id, area_id))
            .cloned()
            .unwrap_or_else(|| PropertyValue::request_shell(prop_id, area_id)))
    }

    fn next_set_response(&self, prop_id: PropertyId, area_id: AreaId) -> Result<(), BackendError> {
        let scripted = self
            .set_script
            .lock()
            .get_mut(&(prop_id, area_id))
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or(Ok(()))
    }
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    async fn get(&self, request: PropertyValue) -> Result<PropertyValue, BackendError> {
        self.next_get_response(request.prop_id, request.area_id)
    }

    async fn set(&self, value: PropertyValue) -> Result<(), BackendError> {
        let result = self.next_set_response(value.prop_id, value.area_id);
        if result.is_ok() {
            self.values
                .lock()
                .insert((value.prop_id, value.area_id), value);
        }
        result
    }

    async fn subscribe(&self, options: &[SubscribeOption]) -> Result<(), BackendError> {
        self.subscribe_calls.lock().push(options.to_vec());
        let mut active = self.active_subscriptions.lock();
        for option in options {
            active.insert(option.prop_id, option.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, prop_id: PropertyId) -> Result<(), BackendError> {
        self.unsubscribe_calls.lock().push(prop_id);
        self.active_subscriptions.lock().remove(&prop_id);
        Ok(())
    }

    fn get_async(&self, batch: Vec<AsyncValueRequest>) {
        for request in batch {
            let response = self.next_get_response(request.value.prop_id, request.value.area_id);
            let _ = self.events.send(BackendEvent::AsyncGetResult(
                request.service_request_id,
                response,
            ));
        }
    }

    fn set_async(&self, batch: Vec<AsyncValueRequest>) {
        for request in batch {
            let response = self.next_set_response(request.value.prop_id, request.value.area_id);
            if response.is_ok() {
                self.values.lock().insert(
                    (request.value.prop_id, request.value.area_id),
                    request.value,
                );
            }
            let _ = self.events.send(BackendEvent::AsyncSetResult(
                request.service_request_id,
                response,
            ));
        }
    }

    fn cancel(&self, _ids: &[vpb_core::ServiceRequestId]) {
        // A fake backend resolves requests synchronously, so by the time a
        // cancel would arrive there is nothing left in flight to cancel.
    }

    async fn poll_all_configs(&self) -> Result<Vec<PropertyConfig>, BackendError> {
        Ok(self.configs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpb_core::{Access, ChangeMode, Payload, PropertyStatus};

    fn config(prop_id: PropertyId) -> PropertyConfig {
        PropertyConfig {
            prop_id,
            access: Access::ReadWrite,
            change_mode: ChangeMode::Continuous,
            area_configs: Vec::new(),
            config_array: Vec::new(),
            config_string: String::new(),
            min_sample_rate_hz: 1.0,
            max_sample_rate_hz: 10.0,
        }
    }

    #[tokio::test]
    async fn unscripted_get_returns_seeded_value() {
        let prop_id = PropertyId::new(1);
        let (backend, _rx) = FakeBackend::new(vec![config(prop_id)]);
        backend.seed_value(PropertyValue::new(
            prop_id,
            AreaId::GLOBAL,
            10,
            PropertyStatus::Available,
            Payload::Int32(vec![5]),
        ));
        let got = backend
            .get(PropertyValue::request_shell(prop_id, AreaId::GLOBAL))
            .await
            .unwrap();
        assert_eq!(got.payload.as_i32(), Some(5));
    }

    #[tokio::test]
    async fn scripted_get_responses_drain_in_order() {
        let prop_id = PropertyId::new(1);
        let (backend, _rx) = FakeBackend::new(vec![config(prop_id)]);
        backend.push_get_response(
            prop_id,
            AreaId::GLOBAL,
            Err(BackendError::new(BackendStatus::TryAgain, 0)),
        );
        backend.push_get_response(
            prop_id,
            AreaId::GLOBAL,
            Ok(PropertyValue::new(
                prop_id,
                AreaId::GLOBAL,
                1,
                PropertyStatus::Available,
                Payload::Int32(vec![9]),
            )),
        );
        let first = backend
            .get(PropertyValue::request_shell(prop_id, AreaId::GLOBAL))
            .await;
        assert!(first.is_err());
        let second = backend
            .get(PropertyValue::request_shell(prop_id, AreaId::GLOBAL))
            .await
            .unwrap();
        assert_eq!(second.payload.as_i32(), Some(9));
    }

    #[tokio::test]
    async fn subscribe_calls_are_recorded_and_replace_prior_options() {
        let prop_id = PropertyId::new(1);
        let (backend, _rx) = FakeBackend::new(vec![config(prop_id)]);
        let first = SubscribeOption {
            prop_id,
            area_ids: vec![AreaId::GLOBAL],
            sample_rate_hz: 5.0,
            variable_update_rate: false,
            resolution: 0.0,
        };
        let second = SubscribeOption {
            sample_rate_hz: 10.0,
            ..first.clone()
        };
        backend.subscribe(&[first]).await.unwrap();
        backend.subscribe(&[second.clone()]).await.unwrap();
        assert_eq!(backend.subscribe_calls().len(), 2);
        assert_eq!(backend.active_subscription(prop_id), Some(second));
    }

    #[tokio::test]
    async fn async_get_delivers_event_on_channel() {
        let prop_id = PropertyId::new(1);
        let (backend, mut rx) = FakeBackend::new(vec![config(prop_id)]);
        backend.seed_value(PropertyValue::new(
            prop_id,
            AreaId::GLOBAL,
            1,
            PropertyStatus::Available,
            Payload::Int32(vec![3]),
        ));
        backend.get_async(vec![AsyncValueRequest {
            service_request_id: vpb_core::ServiceRequestId(1),
            value: PropertyValue::request_shell(prop_id, AreaId::GLOBAL),
        }]);
        match rx.recv().await {
            Some(BackendEvent::AsyncGetResult(id, Ok(value))) => {
                assert_eq!(id, vpb_core::ServiceRequestId(1));
                assert_eq!(value.payload.as_i32(), Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
