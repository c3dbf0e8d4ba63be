//! Time-ordered pool of outstanding async requests (C6).
//!
//! Kept as a plain, unsynchronized collection: its only caller is
//! `PropertyService`, which always holds its own single coarse lock before
//! touching the pool, so the pool does not need synchronization of its own.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;
use vpb_core::ServiceRequestId;

use crate::request::AsyncRequest;

#[derive(Default)]
pub(crate) struct PendingRequestPool {
    by_id: HashMap<ServiceRequestId, AsyncRequest>,
    by_deadline: BTreeMap<(Instant, ServiceRequestId), ()>,
}

impl PendingRequestPool {
    pub(crate) fn add(&mut self, request: AsyncRequest) {
        self.by_deadline
            .insert((request.deadline, request.service_request_id), ());
        self.by_id.insert(request.service_request_id, request);
    }

    /// Removes a request, dropping its pending timeout along with it.
    pub(crate) fn remove(&mut self, id: ServiceRequestId) -> Option<AsyncRequest> {
        let request = self.by_id.remove(&id)?;
        self.by_deadline.remove(&(request.deadline, id));
        Some(request)
    }

    pub(crate) fn get(&self, id: ServiceRequestId) -> Option<&AsyncRequest> {
        self.by_id.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ServiceRequestId) -> Option<&mut AsyncRequest> {
        self.by_id.get_mut(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Removes and returns every request whose deadline has elapsed as of
    /// `now`, in deadline order — these are reported via a single batched
    /// timeout callback rather than one call per request.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<AsyncRequest> {
        let due_keys: Vec<(Instant, ServiceRequestId)> = self
            .by_deadline
            .range(..=(now, ServiceRequestId(u64::MAX)))
            .map(|(key, _)| *key)
            .collect();
        let mut due = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            self.by_deadline.remove(&key);
            if let Some(request) = self.by_id.remove(&key.1) {
                due.push(request);
            }
        }
        due
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Collects the ids of every request for which `predicate` holds, used to
    /// drive bulk cancellation (by manager-request-id set, or by client).
    pub(crate) fn ids_matching(&self, predicate: impl Fn(&AsyncRequest) -> bool) -> Vec<ServiceRequestId> {
        self.by_id
            .values()
            .filter(|req| predicate(req))
            .map(|req| req.service_request_id)
            .collect()
    }
}
