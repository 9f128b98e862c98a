//! Collection helper used by the Loader's within-batch dedup.

use std::collections::HashMap;
use std::hash::Hash;

/// Reduce a `Vec` to a `HashMap` keyed by `key_fn`, keeping the last
/// occurrence of each key. This is the within-batch dedup the Loader runs
/// before dispatch: building a map keyed by conflict key and draining the
/// values *is* "keep the last occurrence per conflict key".
#[inline]
pub fn vec_to_map<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    items.into_iter().map(|item| (key_fn(&item), item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_occurrence_per_key() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let map = vec_to_map(items, |(k, _)| *k);
        assert_eq!(map.get("a"), Some(&("a", 3)));
        assert_eq!(map.len(), 2);
    }
}
