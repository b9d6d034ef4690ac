//! The background prefetch scheduler: a single producer thread that walks
//! dynamic layers in catalogue order, keeping at most `W` of them
//! simultaneously prefetched-but-unconsumed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::region::FileBackedRegion;
use crate::telemetry::TelemetrySink;

/// Owns the scheduler thread and the flag used to ask it to stop.
///
/// Dropping the handle does not stop the thread (the scheduler is meant to
/// run to completion); call [`SchedulerHandle::shutdown`] first if an early
/// stop is required, then [`SchedulerHandle::join`].
pub struct SchedulerHandle {
    thread: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop at its next loop iteration. Addresses the
    /// "compute thread aborted, scheduler spins forever" case called out as
    /// an open question in the source design.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Block until the scheduler thread exits.
    pub fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Spawn the scheduler thread over `catalog`, issuing prefetch/evict calls
/// against `region` and writing timing lines to `telemetry`.
pub fn spawn(
    catalog: Arc<Catalog>,
    region: Arc<FileBackedRegion>,
    telemetry: Arc<TelemetrySink>,
) -> SchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);

    let thread = std::thread::spawn(move || {
        run(&catalog, &region, &telemetry, &thread_shutdown);
    });

    SchedulerHandle {
        thread: Some(thread),
        shutdown,
    }
}

fn run(
    catalog: &Catalog,
    region: &FileBackedRegion,
    telemetry: &TelemetrySink,
    shutdown: &AtomicBool,
) {
    info!(layers = catalog.len(), w = catalog.w_window, "scheduler started");

    let w = catalog.w_window.max(0) as usize;
    let mut in_flight: Vec<String> = Vec::with_capacity(w.max(1));
    let mut i = 0usize;

    'outer: loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if i >= catalog.order.len() {
            break;
        }

        let name = &catalog.order[i];
        let descriptor = catalog
            .get(name)
            .expect("catalogue order entry missing from by_name");

        if !descriptor.is_dynamic {
            i += 1;
            continue;
        }

        if in_flight.len() < w {
            let start = Instant::now();
            let mut bytes = 0u64;
            for frag in &descriptor.fragments {
                region.prefetch_range(frag.start_offset, frag.end_offset, catalog.prefetch_workers);
                bytes += frag.end_offset - frag.start_offset;
            }
            descriptor.ready.store(true, Ordering::Release);
            in_flight.push(name.clone());

            let elapsed = start.elapsed();
            let mbps = if elapsed.as_secs_f64() > 0.0 {
                (bytes as f64 / 1_000_000.0) / elapsed.as_secs_f64()
            } else {
                0.0
            };
            telemetry.log(&format!(
                "prefetch layer={name} bytes={bytes} us={} mbps={mbps:.2}",
                elapsed.as_micros()
            ));
            i += 1;
        } else {
            // Window full: scan in_flight for layers the consumer released.
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break 'outer;
                }
                let mut j = 0;
                while j < in_flight.len() {
                    let released_name = &in_flight[j];
                    let released = catalog
                        .get(released_name)
                        .expect("in_flight entry missing from by_name");
                    if !released.ready.load(Ordering::Acquire) {
                        for frag in &released.fragments {
                            region.evict_range(frag.start_offset, frag.end_offset);
                        }
                        telemetry.log(&format!("evict layer={released_name}"));
                        in_flight.remove(j);
                    } else {
                        j += 1;
                    }
                }
                if in_flight.len() < w {
                    break;
                }
                std::hint::spin_loop();
            }
        }
    }

    // Drain phase: keep evicting released layers until the window empties.
    while !in_flight.is_empty() {
        if shutdown.load(Ordering::Relaxed) {
            warn!(remaining = in_flight.len(), "scheduler shut down mid-drain");
            break;
        }
        let mut j = 0;
        while j < in_flight.len() {
            let name = &in_flight[j];
            let descriptor = catalog
                .get(name)
                .expect("in_flight entry missing from by_name");
            if !descriptor.ready.load(Ordering::Acquire) {
                for frag in &descriptor.fragments {
                    region.evict_range(frag.start_offset, frag.end_offset);
                }
                telemetry.log(&format!("evict layer={name}"));
                in_flight.remove(j);
            } else {
                j += 1;
            }
        }
        if !in_flight.is_empty() {
            std::hint::spin_loop();
        }
    }

    info!("scheduler drained and exiting");
}
