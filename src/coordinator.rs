//! Compute-side coordination API: the entry points the graph execution
//! loop calls around each node, plus startup pinning of resident layers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::info;

use crate::catalog::{Catalog, LayerDescriptor};
use crate::graph::GraphView;
use crate::region::FileBackedRegion;
use crate::resolver::resolve_layer_name;
use crate::telemetry::TelemetrySink;

/// Resolve the layer a forward walk from node `n` targets, by trying nodes
/// `n, n+1, ..` until the resolver returns a non-empty name.
///
/// Panics if the resolver names a layer absent from the catalogue — per
/// the source design this is a precondition violation, not a runtime error.
fn locate_forward<'c, G: GraphView>(
    catalog: &'c Catalog,
    graph: &G,
    n: usize,
) -> Option<&'c LayerDescriptor> {
    for idx in n..graph.len() {
        let name = resolve_layer_name(graph.node(idx));
        if name.is_empty() {
            continue;
        }
        return Some(
            catalog
                .get(&name)
                .unwrap_or_else(|| panic!("resolved layer `{name}` absent from catalogue")),
        );
    }
    None
}

/// Resolve the layer a backward walk from node `n` targets: nodes
/// `n, n-1, .., 0`.
fn locate_backward<'c, G: GraphView>(
    catalog: &'c Catalog,
    graph: &G,
    n: usize,
) -> Option<&'c LayerDescriptor> {
    for idx in (0..=n).rev() {
        let name = resolve_layer_name(graph.node(idx));
        if name.is_empty() {
            continue;
        }
        return Some(
            catalog
                .get(&name)
                .unwrap_or_else(|| panic!("resolved layer `{name}` absent from catalogue")),
        );
    }
    None
}

/// Spin until the layer targeted by a forward walk from `n` is ready.
/// A no-op if no layer is found walking forward from `n`.
pub fn wait_ready<G: GraphView>(catalog: &Catalog, graph: &G, n: usize) {
    if let Some(descriptor) = locate_forward(catalog, graph, n) {
        while !descriptor.ready.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }
}

/// Release the layer targeted by a backward walk from `n`.
pub fn notify_done<G: GraphView>(catalog: &Catalog, graph: &G, n: usize) {
    if let Some(descriptor) = locate_backward(catalog, graph, n) {
        descriptor.ready.store(false, Ordering::Release);
    }
}

/// Synchronously prefetch the layer targeted by a forward walk from `n`.
pub fn sync_prefetch<G: GraphView>(
    catalog: &Catalog,
    region: &FileBackedRegion,
    telemetry: &TelemetrySink,
    graph: &G,
    n: usize,
) {
    let Some(descriptor) = locate_forward(catalog, graph, n) else {
        return;
    };
    let start = Instant::now();
    let mut bytes = 0u64;
    for frag in &descriptor.fragments {
        region.prefetch_range(frag.start_offset, frag.end_offset, catalog.prefetch_workers);
        bytes += frag.end_offset - frag.start_offset;
    }
    telemetry.log(&format!(
        "sync_prefetch layer={} bytes={bytes} us={}",
        descriptor.name,
        start.elapsed().as_micros()
    ));
}

/// Synchronously evict the layer targeted by a backward walk from `n`.
pub fn sync_evict<G: GraphView>(
    catalog: &Catalog,
    region: &FileBackedRegion,
    telemetry: &TelemetrySink,
    graph: &G,
    n: usize,
) {
    let Some(descriptor) = locate_backward(catalog, graph, n) else {
        return;
    };
    for frag in &descriptor.fragments {
        region.evict_range(frag.start_offset, frag.end_offset);
    }
    telemetry.log(&format!("sync_evict layer={}", descriptor.name));
}

/// Whether the layer targeted by a forward walk from `n` is dynamic. A
/// missing target (no layer found walking forward) is treated as `false`.
pub fn is_dynamic<G: GraphView>(catalog: &Catalog, graph: &G, n: usize) -> bool {
    locate_forward(catalog, graph, n)
        .map(|d| d.is_dynamic)
        .unwrap_or(false)
}

/// Pin every resident layer at startup. Idempotent: a one-shot latch
/// ensures the pinning loop runs at most once per `latch`.
pub fn prefetch_resident(
    catalog: &Catalog,
    region: &FileBackedRegion,
    telemetry: &TelemetrySink,
    latch: &AtomicBool,
) {
    if latch
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let mut pinned = 0usize;
    for name in &catalog.order {
        let descriptor = catalog.get(name).expect("catalogue order/by_name mismatch");
        if descriptor.is_dynamic {
            continue;
        }
        if descriptor.layer_index == -1 && !catalog.prefetch_input {
            continue;
        }
        for frag in &descriptor.fragments {
            region.prefetch_range(frag.start_offset, frag.end_offset, catalog.prefetch_workers);
        }
        // Relaxed: no scheduler thread observes this path, it runs once on
        // the compute thread before execution begins.
        descriptor.ready.store(true, Ordering::Relaxed);
        telemetry.log(&format!("prefetch_resident layer={name}"));
        pinned += 1;
    }
    info!(pinned, "resident layers pinned");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SimpleGraph;
    use crate::graph::SimpleNode;
    use std::collections::HashMap;
    use std::io::Write;

    fn make_region(bytes: usize) -> (tempfile::NamedTempFile, FileBackedRegion) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0xEFu8; bytes]).unwrap();
        f.flush().unwrap();
        let region = FileBackedRegion::open(f.path()).unwrap();
        (f, region)
    }

    fn sample_graph() -> SimpleGraph {
        SimpleGraph {
            nodes: vec![
                SimpleNode::new(["token_embd.weight"]),
                SimpleNode::new(["blk.0.attn_q.weight"]),
                SimpleNode::new(["blk.0.attn_k.weight"]),
                SimpleNode::new(["output_norm.weight"]),
                SimpleNode::new(["output.weight"]),
            ],
        }
    }

    #[test]
    fn resident_only_startup_pin_avoids_wait_ready_block_s1() {
        let mut offsets = HashMap::new();
        offsets.insert("token_embd".to_string(), vec![(0u64, 100u64, -1i32)]);
        offsets.insert("blk.0".to_string(), vec![(100, 200, 0)]);
        offsets.insert("output_norm".to_string(), vec![(200, 300, -1)]);
        offsets.insert("output_weight".to_string(), vec![(300, 400, -1)]);
        let catalog = Catalog::build(&offsets, 999, 1, true, 1).unwrap();
        let (_f, region) = make_region(4096);
        let telemetry = TelemetrySink::discard();
        let latch = AtomicBool::new(false);

        prefetch_resident(&catalog, &region, &telemetry, &latch);

        let graph = sample_graph();
        // blk.0 is resident, pinned at startup: wait_ready must not block.
        wait_ready(&catalog, &graph, 1);
        assert!(catalog.get("blk.0").unwrap().ready.load(Ordering::Acquire));
    }

    #[test]
    fn prefetch_resident_is_idempotent() {
        let mut offsets = HashMap::new();
        offsets.insert("blk.0".to_string(), vec![(0u64, 100u64, -1i32)]);
        let catalog = Catalog::build(&offsets, 999, 1, true, 1).unwrap();
        let (_f, region) = make_region(4096);
        let telemetry = TelemetrySink::discard();
        let latch = AtomicBool::new(false);

        prefetch_resident(&catalog, &region, &telemetry, &latch);
        catalog
            .get("blk.0")
            .unwrap()
            .ready
            .store(false, Ordering::Relaxed);
        // Second call is a no-op: ready stays false this time.
        prefetch_resident(&catalog, &region, &telemetry, &latch);
        assert!(!catalog.get("blk.0").unwrap().ready.load(Ordering::Relaxed));
    }

    #[test]
    fn notify_done_walks_backward_and_is_dynamic_walks_forward() {
        let mut offsets = HashMap::new();
        offsets.insert("blk.0".to_string(), vec![(0u64, 100u64, 0i32)]);
        offsets.insert("output_weight".to_string(), vec![(100, 200, -1)]);
        let catalog = Catalog::build(&offsets, 0, 1, true, 1).unwrap();
        let graph = sample_graph();

        catalog
            .get("blk.0")
            .unwrap()
            .ready
            .store(true, Ordering::Release);
        notify_done(&catalog, &graph, 2);
        assert!(!catalog.get("blk.0").unwrap().ready.load(Ordering::Acquire));

        assert!(is_dynamic(&catalog, &graph, 1));
        assert!(!is_dynamic(&catalog, &graph, 4));
    }

    #[test]
    fn sync_prefetch_and_sync_evict_round_trip() {
        let mut offsets = HashMap::new();
        offsets.insert("blk.0".to_string(), vec![(0u64, 100u64, 0i32)]);
        let catalog = Catalog::build(&offsets, 0, 1, true, 1).unwrap();
        let (_f, region) = make_region(4096);
        let telemetry = TelemetrySink::discard();
        let graph = sample_graph();

        sync_prefetch(&catalog, &region, &telemetry, &graph, 1);
        sync_evict(&catalog, &region, &telemetry, &graph, 2);
    }
}
