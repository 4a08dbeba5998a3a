//! Four typed worker pools bounding concurrency per stage weight (spec
//! §4.5 "Execution model", §5 "Suspension/blocking").
//!
//! Rather than OS thread pools, each "pool" here is a
//! [`tokio::sync::Semaphore`] guarding a stage function: CPU-bound PDF work
//! runs inside `spawn_blocking` gated by `pool1`, HTTP calls are gated by
//! `pool3` (sized to `max_workers`), and so on. A slow LLM call holding a
//! `pool3` permit cannot starve `pool1`/`pool2` permits, satisfying the
//! independent-sizing requirement in spec §5.

use std::sync::Arc;
use tokio::sync::Semaphore;

/// Owns the four (plus optional detector) semaphores for one pipeline run.
#[derive(Clone)]
pub struct PagePools {
    /// pool1: CPU-light PDF operations (page handle, text extraction, render).
    pub pdf: Arc<Semaphore>,
    /// pool2: image encoding (enhance + base64 encode).
    pub encode: Arc<Semaphore>,
    /// pool3: HTTP calls to the LLM, sized to `max_workers`.
    pub llm: Arc<Semaphore>,
    /// pool4: response parse/merge.
    pub parse: Arc<Semaphore>,
    /// pool_yolo: optional object-detector inference.
    pub detect: Arc<Semaphore>,
}

impl PagePools {
    pub fn new(max_workers: usize) -> Self {
        let cpu_parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            pdf: Arc::new(Semaphore::new(cpu_parallelism.max(2))),
            encode: Arc::new(Semaphore::new(cpu_parallelism.max(2))),
            llm: Arc::new(Semaphore::new(max_workers.max(1))),
            parse: Arc::new(Semaphore::new(cpu_parallelism.max(2) * 2)),
            detect: Arc::new(Semaphore::new(2)),
        }
    }
}
