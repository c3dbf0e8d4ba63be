use std::sync::{Arc, Mutex};
use std::time::Duration;

use vpb_backend::{BackendAdapter, RetryPolicy};
use vpb_core::{
    Access, AreaConfig, AreaId, BackendError, BackendStatus, ChangeMode, ClientErrorCode, Payload,
    PropertyConfig, PropertyId, PropertyStatus, PropertyValue,
};
use vpb_hub::{AsyncResultSink, Hub};
use vpb_property_service::{AsyncResult, AsyncValueRequest, ClientCallback, PropertyService};
use vpb_testkit::FakeBackend;

#[derive(Default)]
struct RecordingCallback {
    results: Mutex<Vec<AsyncResult>>,
}

impl ClientCallback for RecordingCallback {
    fn on_result(&self, result: AsyncResult) {
        self.results.lock().unwrap().push(result);
    }
}

fn continuous_config(prop_id: PropertyId) -> PropertyConfig {
    PropertyConfig {
        prop_id,
        access: Access::ReadWrite,
        change_mode: ChangeMode::Continuous,
        area_configs: vec![AreaConfig::new(AreaId::GLOBAL, Access::None)],
        config_array: Vec::new(),
        config_string: String::new(),
        min_sample_rate_hz: 1.0,
        max_sample_rate_hz: 20.0,
    }
}

async fn init_property_service(configs: Vec<PropertyConfig>) -> (Arc<PropertyService>, Arc<FakeBackend>) {
    let (fake, rx) = FakeBackend::new(configs);
    let fake = Arc::new(fake);
    let hub = Hub::new(fake.clone() as Arc<dyn BackendAdapter>, RetryPolicy::default_duration());
    let service = PropertyService::new(hub.clone(), fake.clone() as Arc<dyn BackendAdapter>);
    service.register().await;
    hub.priority_init().await.unwrap();
    hub.spawn_event_loop(rx, service.clone() as Arc<dyn AsyncResultSink>);
    (service, fake)
}

fn get_request(manager_request_id: u64, prop_id: PropertyId) -> AsyncValueRequest {
    AsyncValueRequest {
        manager_request_id,
        prop_id,
        area_id: AreaId::GLOBAL,
        value: None,
        update_rate_hz: 0.0,
        wait_for_property_update: false,
    }
}

fn set_request(manager_request_id: u64, prop_id: PropertyId, value: PropertyValue, wait: bool) -> AsyncValueRequest {
    AsyncValueRequest {
        manager_request_id,
        prop_id,
        area_id: AreaId::GLOBAL,
        value: Some(value),
        update_rate_hz: 5.0,
        wait_for_property_update: wait,
    }
}

#[tokio::test]
async fn async_get_delivers_value_to_client_callback() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    fake.seed_value(PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        1,
        PropertyStatus::Available,
        Payload::Int32(vec![42]),
    ));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .get_property_values_async(client, vec![get_request(7, prop_id)], 1000)
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    match &results[0] {
        AsyncResult::GetOk { manager_request_id, value } => {
            assert_eq!(*manager_request_id, 7);
            assert_eq!(value.payload.as_i32(), Some(42));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn async_get_retries_after_try_again_then_succeeds() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    fake.push_get_response(prop_id, AreaId::GLOBAL, Err(BackendError::new(BackendStatus::TryAgain, 0)));
    fake.seed_value(PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        1,
        PropertyStatus::Available,
        Payload::Int32(vec![9]),
    ));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .get_property_values_async(client, vec![get_request(1, prop_id)], 1000)
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], AsyncResult::GetOk { value, .. } if value.payload.as_i32() == Some(9)));
}

#[tokio::test]
async fn async_set_with_wait_completes_immediately_when_value_already_matches() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    let target = PropertyValue::new(prop_id, AreaId::GLOBAL, 0, PropertyStatus::Available, Payload::Int32(vec![5]));
    fake.seed_value(target.clone());
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .set_property_values_async(client, vec![set_request(3, prop_id, target, true)], 1000)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], AsyncResult::SetOk { manager_request_id, .. } if *manager_request_id == 3));
}

#[tokio::test]
async fn async_set_with_wait_completes_on_matching_property_event() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    fake.seed_value(PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        0,
        PropertyStatus::Available,
        Payload::Int32(vec![1]),
    ));
    let target = PropertyValue::new(prop_id, AreaId::GLOBAL, 0, PropertyStatus::Available, Payload::Int32(vec![5]));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .set_property_values_async(client, vec![set_request(4, prop_id, target, true)], 1000)
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(
        callback.results.lock().unwrap().is_empty(),
        "should still be waiting on the matching property-update event"
    );

    fake.emit_property_changed(vec![PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        99,
        PropertyStatus::Available,
        Payload::Int32(vec![5]),
    )]);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], AsyncResult::SetOk { manager_request_id, .. } if *manager_request_id == 4));
}

#[tokio::test]
async fn async_set_with_wait_times_out_when_value_never_updates() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    fake.seed_value(PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        0,
        PropertyStatus::Available,
        Payload::Int32(vec![1]),
    ));
    let target = PropertyValue::new(prop_id, AreaId::GLOBAL, 0, PropertyStatus::Available, Payload::Int32(vec![5]));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .set_property_values_async(client, vec![set_request(5, prop_id, target, true)], 80)
        .await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        &results[0],
        AsyncResult::Error { error_code: ClientErrorCode::Timeout, .. }
    ));
}

#[tokio::test]
async fn subscription_rate_merges_across_external_clients_and_unwinds() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    let client_a = service.register_client(Arc::new(RecordingCallback::default())).await;
    let client_b = service.register_client(Arc::new(RecordingCallback::default())).await;

    service.subscribe_property(client_a, prop_id, 10.0).await.unwrap();
    assert_eq!(fake.active_subscription(prop_id).unwrap().sample_rate_hz, 10.0);
    assert_eq!(fake.subscribe_calls().len(), 1);

    // B's rate (5Hz) doesn't exceed A's (10Hz): the merged rate is unchanged,
    // so the Hub dedupes this into a no-op and never calls the backend again.
    service.subscribe_property(client_b, prop_id, 5.0).await.unwrap();
    assert_eq!(fake.active_subscription(prop_id).unwrap().sample_rate_hz, 10.0);
    assert_eq!(fake.subscribe_calls().len(), 1);

    service.unsubscribe_property(client_a, prop_id).await.unwrap();
    assert_eq!(fake.active_subscription(prop_id).unwrap().sample_rate_hz, 5.0);
    assert_eq!(fake.subscribe_calls().len(), 2);

    service.unsubscribe_property(client_b, prop_id).await.unwrap();
    assert!(fake.active_subscription(prop_id).is_none());
    assert_eq!(fake.unsubscribe_calls(), vec![prop_id]);
}

#[tokio::test]
async fn cancelled_request_produces_no_client_notification() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    fake.seed_value(PropertyValue::new(
        prop_id,
        AreaId::GLOBAL,
        1,
        PropertyStatus::Available,
        Payload::Int32(vec![1]),
    ));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .get_property_values_async(client, vec![get_request(11, prop_id)], 1000)
        .await;
    service.cancel_requests(&[11]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(callback.results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn channel_death_cancels_pending_requests_and_subscriptions() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service.subscribe_property(client, prop_id, 10.0).await.unwrap();
    assert!(fake.active_subscription(prop_id).is_some());

    service
        .get_property_values_async(client, vec![get_request(20, prop_id)], 1000)
        .await;
    service.on_client_channel_death(client).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(callback.results.lock().unwrap().is_empty());
    assert!(fake.active_subscription(prop_id).is_none());
}

#[tokio::test]
async fn subscribe_property_rejects_negative_rate() {
    let prop_id = PropertyId::new(1);
    let (service, fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    let client = service.register_client(Arc::new(RecordingCallback::default())).await;

    let err = service.subscribe_property(client, prop_id, -5.0).await.unwrap_err();
    assert_eq!(err.client_error_code(), ClientErrorCode::InvalidArg);
    assert!(fake.active_subscription(prop_id).is_none());
}

#[tokio::test]
async fn async_set_with_negative_update_rate_reports_error_for_that_request_only() {
    let prop_id = PropertyId::new(1);
    let (service, _fake) = init_property_service(vec![continuous_config(prop_id)]).await;
    let target = PropertyValue::new(prop_id, AreaId::GLOBAL, 0, PropertyStatus::Available, Payload::Int32(vec![5]));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    let mut bad_request = set_request(6, prop_id, target, false);
    bad_request.update_rate_hz = -1.0;

    service.set_property_values_async(client, vec![bad_request], 1000).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        &results[0],
        AsyncResult::Error { manager_request_id: 6, error_code: ClientErrorCode::InvalidArg, .. }
    ));
}

#[tokio::test]
async fn one_malformed_request_in_a_batch_does_not_fail_its_siblings() {
    let good_prop = PropertyId::new(1);
    let bad_prop = PropertyId::new(99);
    let (service, fake) = init_property_service(vec![continuous_config(good_prop)]).await;
    fake.seed_value(PropertyValue::new(
        good_prop,
        AreaId::GLOBAL,
        1,
        PropertyStatus::Available,
        Payload::Int32(vec![7]),
    ));
    let callback = Arc::new(RecordingCallback::default());
    let client = service.register_client(callback.clone()).await;

    service
        .get_property_values_async(client, vec![get_request(1, bad_prop), get_request(2, good_prop)], 1000)
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = callback.results.lock().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(
        |r| matches!(r, AsyncResult::Error { manager_request_id: 1, error_code: ClientErrorCode::InvalidArg, .. })
    ));
    assert!(results
        .iter()
        .any(|r| matches!(r, AsyncResult::GetOk { manager_request_id: 2, value } if value.payload.as_i32() == Some(7))));
}
