//! weight-prefetch-engine: layered weight prefetch and eviction for a
//! memory-mapped CPU tensor-inference backend.
//!
//! A large model's parameter file is memory-mapped from disk; only a small
//! subset of its layers fits comfortably in resident memory. As a
//! computation graph executes layer by layer, [`PrefetchEngine`] eagerly
//! pages in weights for upcoming dynamic layers, evicts weights of layers
//! already consumed, and keeps a pinned ("resident") set of layers
//! permanently in memory — overlapping disk I/O with compute so the
//! execution thread never stalls on a cold page fault, bounded by a
//! configurable window size `W`.
//!
//! This crate does not allocate tensor storage, decode or transform
//! weights, or manage GPU/remote memory: it moves residency, not content.
//! The tensor-graph execution loop and node representation belong to the
//! host backend; see [`graph`] for the minimal trait surface this crate
//! needs from it.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod page;
pub mod region;
pub mod resolver;
pub mod scheduler;
pub mod telemetry;

use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use catalog::Catalog;
use config::PrefetchConfig;
use error::CatalogError;
use graph::GraphView;
use region::FileBackedRegion;
use scheduler::SchedulerHandle;
use telemetry::TelemetrySink;

/// The runtime handle wiring the catalogue, the file-backed region, and
/// telemetry together, and owning the startup-pinning latch.
///
/// Corresponds to the opaque context returned by `create_prefetch_ctx` in
/// the backend control surface; the scheduler thread is spawned separately
/// via [`PrefetchEngine::spawn_scheduler`] so the caller can choose when
/// prefetching starts relative to startup pinning.
pub struct PrefetchEngine {
    catalog: Arc<Catalog>,
    region: Arc<FileBackedRegion>,
    telemetry: Arc<TelemetrySink>,
    pinned: AtomicBool,
}

impl PrefetchEngine {
    /// Build the engine: map the weights file, then build the layer
    /// catalogue from the side-channel offset map and the loaded config.
    pub fn new(
        weights_path: impl AsRef<Path>,
        offsets: &std::collections::HashMap<String, Vec<(u64, u64, i32)>>,
        config: PrefetchConfig,
        telemetry_fd: Option<File>,
    ) -> Result<Self, CatalogError> {
        let region = FileBackedRegion::open(weights_path)?;
        let catalog = Catalog::build(
            offsets,
            config.k_dynamic_entrance,
            config.w_window,
            config.prefetch_input,
            config.prefetch_workers,
        )?;
        let telemetry = match telemetry_fd {
            Some(fd) => TelemetrySink::new(fd),
            None => TelemetrySink::discard(),
        };

        Ok(Self {
            catalog: Arc::new(catalog),
            region: Arc::new(region),
            telemetry: Arc::new(telemetry),
            pinned: AtomicBool::new(false),
        })
    }

    /// Pin all resident (non-dynamic) layers. Idempotent; safe to call
    /// more than once — only the first call does any work.
    pub fn prefetch_resident(&self) {
        coordinator::prefetch_resident(&self.catalog, &self.region, &self.telemetry, &self.pinned);
    }

    /// Spawn the background prefetch scheduler over the dynamic layers.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        info!("spawning prefetch scheduler");
        scheduler::spawn(
            Arc::clone(&self.catalog),
            Arc::clone(&self.region),
            Arc::clone(&self.telemetry),
        )
    }

    pub fn wait_ready<G: GraphView>(&self, graph: &G, node_n: usize) {
        coordinator::wait_ready(&self.catalog, graph, node_n);
    }

    pub fn notify_done<G: GraphView>(&self, graph: &G, node_n: usize) {
        coordinator::notify_done(&self.catalog, graph, node_n);
    }

    pub fn sync_prefetch<G: GraphView>(&self, graph: &G, node_n: usize) {
        coordinator::sync_prefetch(&self.catalog, &self.region, &self.telemetry, graph, node_n);
    }

    pub fn sync_evict<G: GraphView>(&self, graph: &G, node_n: usize) {
        coordinator::sync_evict(&self.catalog, &self.region, &self.telemetry, graph, node_n);
    }

    pub fn is_dynamic<G: GraphView>(&self, graph: &G, node_n: usize) -> bool {
        coordinator::is_dynamic(&self.catalog, graph, node_n)
    }

    /// Number of layers in the catalogue.
    pub fn layer_count(&self) -> usize {
        self.catalog.len()
    }
}
