//! The contract a domain service must satisfy to be registered with the Hub.

use vpb_core::{AreaId, BackendError, PropertyConfig, PropertyId, PropertyValue};

/// Opaque handle a service uses to prove ownership when calling
/// `Hub::subscribe`/`Hub::unsubscribe`. Assigned by `Hub::register_service` in
/// registration order; comparing two handles for equality is how the Hub
/// checks "does this caller own this propId" without needing trait-object
/// identity comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) usize);

/// A domain service the Hub can route backend events to.
///
/// Implementors translate propIds/values into their own domain events; the
/// Hub only needs enough of a contract to assign ownership at init time and
/// to hand it events once it owns the relevant propIds.
pub trait ServiceRef: Send + Sync {
    /// The propIds this service wants to own. An empty list means "offer me
    /// everything the Hub hasn't already assigned" — used by catch-all
    /// services such as the generic property service.
    fn supported_properties(&self) -> Vec<PropertyId>;

    /// Called once, after ownership assignment, with the full set of configs
    /// for the propIds this service ended up owning.
    fn take_properties(&self, configs: &[PropertyConfig]);

    /// Called once after `take_properties`, in registration order.
    fn init(&self);

    /// A batch of property-change events for propIds this service owns, in
    /// backend-delivered order.
    fn on_events(&self, batch: Vec<PropertyValue>);

    /// A batch of property-set-error events for propIds this service owns.
    fn on_set_error(&self, errors: Vec<(PropertyId, AreaId, BackendError)>);
}
