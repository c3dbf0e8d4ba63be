//! Client identity for reference-counted external subscriptions and for
//! routing cancellation/death notifications to the right set of requests.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identifies one client connection for the lifetime of the PropertyService.
/// Not related to `managerRequestId`, which identifies a single request; a
/// `ClientId` identifies the channel the client is making requests over, the
/// unit that "dies" when the client disconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    next: AtomicU64,
}

impl ClientIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
