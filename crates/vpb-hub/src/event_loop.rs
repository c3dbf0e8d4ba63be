//! Drains the backend's event channel and fans batches out to owning
//! services.
//!
//! The backend may deliver callbacks from any thread; this task is the single
//! place where that hand-off happens, so recomputation of subscription state
//! (driven by the services this dispatches to) always completes before the
//! next backend call is issued.

use std::sync::Arc;

use tracing::{trace, warn};
use vpb_backend::{BackendEvent, BackendEventReceiver};
use vpb_core::{AreaId, BackendError, PropertyId, PropertyValue, ServiceRequestId};

use crate::Hub;

/// Receives the results of async get/set requests the backend completed.
/// Only a request-issuing service (the property service) needs this; other
/// domain services only ever see `ServiceRef::on_events`/`on_set_error`.
pub trait AsyncResultSink: Send + Sync {
    fn on_async_get_result(&self, id: ServiceRequestId, result: Result<PropertyValue, BackendError>);
    fn on_async_set_result(&self, id: ServiceRequestId, result: Result<(), BackendError>);
}

pub(crate) fn spawn(
    hub: Arc<Hub>,
    mut rx: BackendEventReceiver,
    sink: Arc<dyn AsyncResultSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                BackendEvent::PropertyChanged(values) => dispatch_events(&hub, values).await,
                BackendEvent::PropertySetError(errors) => dispatch_set_errors(&hub, errors).await,
                BackendEvent::AsyncGetResult(id, result) => sink.on_async_get_result(id, result),
                BackendEvent::AsyncSetResult(id, result) => sink.on_async_set_result(id, result),
            }
        }
        trace!("backend event channel closed, event loop exiting");
    })
}

async fn dispatch_events(hub: &Arc<Hub>, batch: Vec<PropertyValue>) {
    let mut grouped: Vec<(Arc<dyn crate::ServiceRef>, Vec<PropertyValue>)> = Vec::new();
    {
        let state = hub.state.lock().await;
        for value in batch {
            let Some(owner) = state.owning_service(value.prop_id) else {
                warn!(prop_id = ?value.prop_id, "property event for unowned propId, dropping");
                continue;
            };
            let Some(service) = state.service_at(owner) else {
                continue;
            };
            match grouped.iter_mut().find(|(s, _)| Arc::ptr_eq(s, &service)) {
                Some((_, values)) => values.push(value),
                None => grouped.push((service, vec![value])),
            }
        }
    }
    for (service, values) in grouped {
        service.on_events(values);
    }
}

async fn dispatch_set_errors(hub: &Arc<Hub>, batch: Vec<(PropertyId, AreaId, BackendError)>) {
    let mut grouped: Vec<(
        Arc<dyn crate::ServiceRef>,
        Vec<(PropertyId, AreaId, BackendError)>,
    )> = Vec::new();
    {
        let state = hub.state.lock().await;
        for error in batch {
            let Some(owner) = state.owning_service(error.0) else {
                warn!(prop_id = ?error.0, "set-error for unowned propId, dropping");
                continue;
            };
            let Some(service) = state.service_at(owner) else {
                continue;
            };
            match grouped.iter_mut().find(|(s, _)| Arc::ptr_eq(s, &service)) {
                Some((_, errors)) => errors.push(error),
                None => grouped.push((service, vec![error])),
            }
        }
    }
    for (service, errors) in grouped {
        service.on_set_error(errors);
    }
}
