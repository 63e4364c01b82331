//! Identity types for Ripple entities
//!
//! Identifiers are process-unique 64-bit counters. They never leave the
//! process, so there is no wire representation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTEN_ID: AtomicU64 = AtomicU64::new(1);

/// Client id - identifies a model before (and after) the server assigns an id
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(pub u64);

impl Cid {
    /// Allocate the next unused client id
    pub fn next() -> Self {
        Cid(NEXT_CID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid(c{})", self.0)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Listen id - identifies an emitter in listening relations and serves as
/// the invocation context token for handlers
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenId(pub u64);

impl ListenId {
    /// Allocate the next unused listen id
    pub fn next() -> Self {
        ListenId(NEXT_LISTEN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ListenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listen(l{})", self.0)
    }
}

impl fmt::Display for ListenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}
