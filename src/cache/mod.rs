//! Content-addressed cache of built scripts
//!
//! Each script maps to one directory under the cache root, named by a hash
//! of everything that affects the build. Entries are never rewritten in
//! place for different content: a changed script gets a new key and a new
//! directory.
//!
//! # Entry States
//!
//! | State | On disk | Next step |
//! |-------|---------|-----------|
//! | Empty | no directory | write sources |
//! | Materialized | sources, no once marker | run `build_once_cmd` |
//! | OnceDone | once marker (or no setup declared) | run `build_cmd` |
//! | Built | built marker and artifact | dispatch |
//!
//! Transitions only happen while holding the entry's [`EntryLock`].

pub mod entry;
pub mod key;
pub mod lock;

pub use entry::{
    format_bytes, BuiltMarker, CacheEntry, EntryState, BUILT_MARKER, LOCK_FILE, ONCE_MARKER,
};
pub use key::CacheKey;
pub use lock::EntryLock;
