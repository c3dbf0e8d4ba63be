//! The async request record tracked by the pending-request pool for the
//! lifetime of one in-flight get/set.

use tokio::time::Instant;
use vpb_core::{AreaId, PropertyId, PropertyValue, ServiceRequestId};

use crate::ids::ClientId;

/// What an [`AsyncRequest`] is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
    /// The companion read dispatched alongside a SET with
    /// `wait_for_property_update=true`, used to detect "the value was
    /// already at the target before the SET was even issued".
    GetInitialValueForSet,
}

/// One outstanding async get/set, tracked from dispatch to completion.
#[derive(Clone, Debug)]
pub struct AsyncRequest {
    pub service_request_id: ServiceRequestId,
    pub manager_request_id: u64,
    pub client: ClientId,
    pub kind: RequestKind,
    pub prop_id: PropertyId,
    pub area_id: AreaId,
    /// Present for SET and its companion GET_INITIAL_VALUE_FOR_SET.
    pub target_value: Option<PropertyValue>,
    pub update_rate_hz: f32,
    pub wait_for_property_update: bool,
    pub deadline: Instant,
    /// True once the backend has ack'd the SET call itself (distinct from the
    /// property-update event that confirms the value actually landed).
    pub set_request_sent: bool,
    /// Set once a matching property-update event has been observed; carries
    /// the event's timestamp.
    pub value_updated_at: Option<u64>,
    /// The paired SET <-> GET_INITIAL_VALUE_FOR_SET request, referenced by id
    /// rather than directly so the pool can own both without a cycle.
    pub associated_request: Option<ServiceRequestId>,
}

impl AsyncRequest {
    pub fn is_complete_set(&self) -> bool {
        self.kind == RequestKind::Set
            && self.set_request_sent
            && (!self.wait_for_property_update || self.value_updated_at.is_some())
    }
}
