//! Collection aliases shared across the crate.
//!
//! Hash-based containers use `FxHasher`; ordered maps use `IndexMap` with the
//! same hasher so property order is insertion order.

pub use rustc_hash::{FxHashMap, FxHashSet};

pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, core::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Create an empty IndexMap
#[inline]
pub fn index_map_new<K, V>() -> IndexMap<K, V> {
    IndexMap::with_hasher(Default::default())
}
