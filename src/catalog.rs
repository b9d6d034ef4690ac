//! The layer catalogue: an ordered table of layer descriptors built once
//! at graph preparation time from the side-channel offset map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::CatalogError;

/// A `[start, end)` byte range into the weights file. `start < end`;
/// offsets need not be page-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFragment {
    pub start_offset: u64,
    pub end_offset: u64,
}

/// One layer's catalogue entry: its fragments, classification, and
/// readiness handshake with the scheduler.
#[derive(Debug)]
pub struct LayerDescriptor {
    pub name: String,

    /// Index assigned by the catalogue builder; `-1` for non-`blk` layers
    /// that the builder could not number. If a layer has fragments with
    /// inconsistent indices, the *last* fragment processed wins (matches
    /// the original catalogue builder, which overwrites a single scalar
    /// field once per fragment).
    pub layer_index: i32,

    /// Fragments in the order the builder received them.
    pub fragments: Vec<LayerFragment>,

    /// True iff `layer_index >= K`. Set once, at classification time.
    pub is_dynamic: bool,

    /// True iff the layer's pages have been requested and not yet told
    /// to evict. Written by exactly one side per transition: the
    /// scheduler sets it true (release), the compute thread sets it
    /// false (release); both read with acquire.
    pub ready: AtomicBool,
}

impl LayerDescriptor {
    fn new(layer_index: i32, fragments: Vec<LayerFragment>) -> Self {
        Self {
            name: String::new(),
            layer_index,
            fragments,
            is_dynamic: false,
            ready: AtomicBool::new(false),
        }
    }
}

/// Canonical sort rank used for `Catalog::order`: `token_embd` first, then
/// `blk.N` ascending by `N`, then `output_norm`, then `output_weight`.
/// Unknown names sort last.
fn rank(name: &str) -> (u8, i64) {
    if name == "token_embd" {
        (0, 0)
    } else if let Some(rest) = name.strip_prefix("blk.") {
        (1, rest.parse::<i64>().unwrap_or(i64::MAX))
    } else if name == "output_norm" {
        (2, 0)
    } else if name == "output_weight" {
        (3, 0)
    } else {
        (4, 0)
    }
}

/// The ordered catalogue of layer descriptors.
pub struct Catalog {
    pub by_name: HashMap<String, LayerDescriptor>,
    pub order: Vec<String>,

    /// First dynamic layer index: `layer_index >= k_dynamic_entrance`
    /// marks a layer dynamic.
    pub k_dynamic_entrance: i32,

    /// Prefetch window size.
    pub w_window: i32,

    /// Whether the layer carrying `layer_index == -1` should be prefetched
    /// at startup (if false, that layer's startup prefetch is skipped).
    pub prefetch_input: bool,

    /// Worker fan-out passed to every `prefetch_range` call issued against
    /// this catalogue's layers (spec.md §4.5's "1..K workers splitting the
    /// range on page-aligned chunk boundaries").
    pub prefetch_workers: usize,
}

impl Catalog {
    /// Build a catalogue from the side-channel offset map.
    ///
    /// `offsets` maps layer name to its list of `(start, end, layer_index)`
    /// fragments, in the order the graph-prep step produced them.
    pub fn build(
        offsets: &HashMap<String, Vec<(u64, u64, i32)>>,
        k_dynamic_entrance: i32,
        w_window: i32,
        prefetch_input: bool,
        prefetch_workers: usize,
    ) -> Result<Self, CatalogError> {
        let mut by_name = HashMap::with_capacity(offsets.len());
        let mut order = Vec::with_capacity(offsets.len());

        for (name, frags) in offsets {
            if frags.is_empty() {
                return Err(CatalogError::EmptyFragments(name.clone()));
            }
            let mut layer_index = -1;
            let mut fragments = Vec::with_capacity(frags.len());
            for &(start, end, idx) in frags {
                fragments.push(LayerFragment {
                    start_offset: start,
                    end_offset: end,
                });
                layer_index = idx;
            }
            let mut descriptor = LayerDescriptor::new(layer_index, fragments);
            descriptor.name = name.clone();
            by_name.insert(name.clone(), descriptor);
            order.push(name.clone());
        }

        order.sort_by_key(|name| rank(name));

        let mut catalog = Self {
            by_name,
            order,
            k_dynamic_entrance,
            w_window,
            prefetch_input,
            prefetch_workers: prefetch_workers.max(1),
        };
        catalog.classify();

        info!(
            layers = catalog.order.len(),
            k = k_dynamic_entrance,
            w = w_window,
            "catalogue built"
        );

        Ok(catalog)
    }

    /// Classify every descriptor as dynamic or resident.
    fn classify(&mut self) {
        for descriptor in self.by_name.values_mut() {
            descriptor.is_dynamic = descriptor.layer_index >= self.k_dynamic_entrance;
        }
    }

    pub fn get(&self, name: &str) -> Option<&LayerDescriptor> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Convenience: read a descriptor's `ready` flag with acquire ordering.
pub fn is_ready(descriptor: &LayerDescriptor) -> bool {
    descriptor.ready.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offsets() -> HashMap<String, Vec<(u64, u64, i32)>> {
        let mut m = HashMap::new();
        m.insert("token_embd".to_string(), vec![(0, 100, -1)]);
        m.insert("blk.1".to_string(), vec![(100, 200, 1)]);
        m.insert("blk.0".to_string(), vec![(200, 300, 0)]);
        m.insert("output_norm".to_string(), vec![(300, 310, -1)]);
        m.insert("output_weight".to_string(), vec![(310, 400, -1)]);
        m
    }

    #[test]
    fn order_follows_canonical_rank_s1() {
        let catalog = Catalog::build(&sample_offsets(), 999, 1, true, 1).unwrap();
        assert_eq!(
            catalog.order,
            vec!["token_embd", "blk.0", "blk.1", "output_norm", "output_weight"]
        );
    }

    #[test]
    fn classification_uses_k_threshold() {
        let catalog = Catalog::build(&sample_offsets(), 1, 1, true, 1).unwrap();
        assert!(!catalog.get("blk.0").unwrap().is_dynamic);
        assert!(catalog.get("blk.1").unwrap().is_dynamic);
        // layer_index == -1 with K > -1 is resident (spec open question).
        assert!(!catalog.get("token_embd").unwrap().is_dynamic);
    }

    #[test]
    fn empty_fragments_is_rejected() {
        let mut offsets = HashMap::new();
        offsets.insert("blk.0".to_string(), vec![]);
        let err = Catalog::build(&offsets, 0, 1, true, 1).unwrap_err();
        assert!(matches!(err, CatalogError::EmptyFragments(_)));
    }

    #[test]
    fn prefetch_workers_is_recorded_and_clamped_to_at_least_one() {
        let catalog = Catalog::build(&sample_offsets(), 999, 1, true, 4).unwrap();
        assert_eq!(catalog.prefetch_workers, 4);

        let catalog = Catalog::build(&sample_offsets(), 999, 1, true, 0).unwrap();
        assert_eq!(catalog.prefetch_workers, 1);
    }

    #[test]
    fn last_fragment_index_wins_on_conflict() {
        let mut offsets = HashMap::new();
        offsets.insert("blk.0".to_string(), vec![(0, 10, 0), (10, 20, 7)]);
        let catalog = Catalog::build(&offsets, 100, 1, true, 1).unwrap();
        assert_eq!(catalog.get("blk.0").unwrap().layer_index, 7);
    }

    #[test]
    fn unknown_name_sorts_last() {
        let mut offsets = sample_offsets();
        offsets.insert("weird_tensor".to_string(), vec![(400, 410, -1)]);
        let catalog = Catalog::build(&offsets, 999, 1, true, 1).unwrap();
        assert_eq!(catalog.order.last().unwrap(), "weird_tensor");
    }
}
