//! Northbound contract: the request/result shapes a client sends and
//! receives, and the listener interface for translated property events.

use vpb_core::{ClientErrorCode, PropertyValue};

/// One element of a `get_property_values_async`/`set_property_values_async`
/// batch.
#[derive(Clone, Debug)]
pub struct AsyncValueRequest {
    pub manager_request_id: u64,
    pub prop_id: vpb_core::PropertyId,
    pub area_id: vpb_core::AreaId,
    /// SET only.
    pub value: Option<PropertyValue>,
    /// SET only; `0` means "use the property's max sample rate".
    pub update_rate_hz: f32,
    /// SET only; defaults to `true`.
    pub wait_for_property_update: bool,
}

/// The outcome delivered to a client callback for one `managerRequestId`.
#[derive(Clone, Debug)]
pub enum AsyncResult {
    GetOk {
        manager_request_id: u64,
        value: PropertyValue,
    },
    SetOk {
        manager_request_id: u64,
        update_timestamp_nanos: u64,
    },
    Error {
        manager_request_id: u64,
        error_code: ClientErrorCode,
        vendor_error_code: i32,
    },
}

impl AsyncResult {
    pub fn manager_request_id(&self) -> u64 {
        match self {
            AsyncResult::GetOk { manager_request_id, .. }
            | AsyncResult::SetOk { manager_request_id, .. }
            | AsyncResult::Error { manager_request_id, .. } => *manager_request_id,
        }
    }
}

/// A client's callback sink for async get/set results. One implementor per
/// connected client; its identity (via [`ClientId`]) is how pending requests
/// are grouped for cancellation and channel-death cleanup.
pub trait ClientCallback: Send + Sync {
    fn on_result(&self, result: AsyncResult);
}

/// Receives translated property-change and property-set-error events,
/// independent of any particular pending request.
pub trait PropertyEventListener: Send + Sync {
    fn on_property_event(&self, value: PropertyValue);
    fn on_property_set_error(
        &self,
        prop_id: vpb_core::PropertyId,
        area_id: vpb_core::AreaId,
        error_code: ClientErrorCode,
    );
}
