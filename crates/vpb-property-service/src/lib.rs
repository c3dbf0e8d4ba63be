//! `vpb-property-service`: the generic, catch-all domain service that turns
//! client-facing async get/set/subscribe calls into Hub traffic.
//!
//! # Why
//! Every vehicle property, unless some more specialized domain service has
//! already claimed it, needs the same machinery: a manager-request-id to
//! service-request-id translation, a pending-request pool with timeouts, the
//! wait-for-property-update completion protocol for SET, and reference-counted
//! subscriptions shared between external client subscriptions and in-flight
//! waiters. This crate is that machinery, built once against [`vpb_hub::Hub`]
//! instead of duplicated in every domain service.
//!
//! # What
//! - [`ids`]: client handles ([`ids::ClientId`]) and their generator;
//! - [`request`]/[`pool`]: the pending-request record and its time-ordered pool;
//! - [`callback`]: the client-facing request/result/listener contract;
//! - [`state`]: the single coarse-grained state block the service locks;
//! - [`service::PropertyService`]: the service itself.

mod callback;
mod ids;
mod pool;
mod request;
mod service;
mod state;

pub use callback::{AsyncResult, AsyncValueRequest, ClientCallback, PropertyEventListener};
pub use ids::ClientId;
pub use service::PropertyService;
