//! The PropertyService's single coarse-grained unit of state.

use std::collections::HashMap;
use std::sync::Arc;

use vpb_core::{PropertyId, ServiceRequestIdGenerator};

use crate::callback::{ClientCallback, PropertyEventListener};
use crate::ids::{ClientId, ClientIdGenerator};
use crate::pool::PendingRequestPool;

/// All state a [`crate::service::PropertyService`] guards with its single
/// lock. `owned_properties` lives outside this struct in a `OnceLock`: it is
/// written exactly once, synchronously, from `ServiceRef::take_properties`,
/// and read-only afterwards.
#[derive(Default)]
pub(crate) struct PropertyServiceState {
    pub(crate) pool: PendingRequestPool,
    /// SET requests with `wait_for_property_update=true`, keyed by the propId
    /// they target; a request appears here for exactly as long as it holds a
    /// subscription intent.
    pub(crate) waiters: HashMap<PropertyId, Vec<vpb_core::ServiceRequestId>>,
    /// External client subscriptions: propId -> (client -> requested rate).
    pub(crate) external_subscriptions: HashMap<PropertyId, HashMap<ClientId, f32>>,
    pub(crate) clients: HashMap<ClientId, Arc<dyn ClientCallback>>,
    pub(crate) listener: Option<Arc<dyn PropertyEventListener>>,
    pub(crate) id_gen: ServiceRequestIdGenerator,
    pub(crate) client_id_gen: ClientIdGenerator,
}

impl PropertyServiceState {
    pub(crate) fn max_waiter_rate(&self, prop_id: PropertyId) -> Option<f32> {
        self.waiters.get(&prop_id).and_then(|ids| {
            ids.iter()
                .filter_map(|id| self.pool.get(*id))
                .map(|req| req.update_rate_hz)
                .fold(None, |acc, hz| Some(acc.map_or(hz, |m: f32| m.max(hz))))
        })
    }

    pub(crate) fn max_external_rate(&self, prop_id: PropertyId) -> Option<f32> {
        self.external_subscriptions
            .get(&prop_id)
            .and_then(|subs| subs.values().copied().fold(None, |acc, hz| Some(acc.map_or(hz, |m: f32| m.max(hz)))))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ids::ClientId;

    #[test]
    fn empty_external_subscriptions_merge_to_none() {
        let state = PropertyServiceState::default();
        assert_eq!(state.max_external_rate(PropertyId::new(1)), None);
    }

    proptest! {
        #[test]
        fn merged_external_rate_is_the_max_of_all_live_subscribers(rates in prop::collection::vec(0.1f32..200.0, 1..8)) {
            let mut state = PropertyServiceState::default();
            let prop_id = PropertyId::new(1);
            let mut subs = HashMap::new();
            let mut expected = f32::MIN;
            for (index, hz) in rates.iter().enumerate() {
                subs.insert(ClientId(index as u64), *hz);
                expected = expected.max(*hz);
            }
            state.external_subscriptions.insert(prop_id, subs);
            prop_assert_eq!(state.max_external_rate(prop_id), Some(expected));
        }
    }
}
