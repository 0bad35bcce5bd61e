//! LociX Engine Library
//!
//! The view-synchronization and tile-coordinate engine: lock
//! propagation, deduplicated tile fetching, and gesture orchestration
//! over the transforms and pyramid index from `locix-core`.
//!
//! ## Architecture
//!
//! A gesture flows through one pipeline:
//! gesture → transform update → lock propagation → visible-tile
//! derivation → deduplicated fetch → settle. All transform and lock work
//! is synchronous per gesture; only tile fetches suspend, and the
//! embedder drives them from its event loop via
//! [`SyncCoordinator::drive`].

pub mod cache;
pub mod coordinator;
pub mod events;
pub mod fetcher;
pub mod lock;
pub mod registry;
pub mod transition;

// Re-export commonly used types and functions
pub use cache::{CacheStats, EntryState, TileFetchCache, TileFuture};
pub use coordinator::{GestureDelta, GestureError, GesturePhase, SyncCoordinator};
pub use events::{EventChannels, SubscriptionId};
pub use fetcher::{FetchError, TileData, TileFetcher, TilePayload};
pub use lock::{
    track_member_uid, LockError, LockGroup, LockKind, LockRegistry, LockState, LockUid, MemberUid,
    PropagationContext,
};
pub use registry::{Registry, RegistryError, View};

/// Version information for the LociX engine library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
