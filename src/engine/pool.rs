// src/engine/pool.rs
//
// Global rayon pool for the CPU-bound per-pixel passes (analysis and
// compositing).
//
// One pool for the whole process instead of one per image: the passes are
// short and frequent (every quality edit recomposites), so pool creation
// would dominate. The pool is built lazily on first use; thread count
// changes after that have no effect.
//
// Thread count:
// - LAYERED_IMAGE_THREADS if set to a positive integer
// - otherwise std::thread::available_parallelism() (respects cgroup quota)
// - MIN_POOL_THREADS when detection fails

use rayon::ThreadPool;
use std::sync::OnceLock;

/// Environment override for the pool size.
pub const THREADS_ENV: &str = "LAYERED_IMAGE_THREADS";

const MIN_POOL_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// The shared pool, or None when no pool could be built at all. Callers
/// then run the pass on the current thread.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let num_threads = configured_threads();
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("layered-image-{i}"))
                .build()
                .or_else(|e| {
                    tracing::warn!(num_threads, error = %e, "thread pool build failed, retrying minimal");
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(MIN_POOL_THREADS)
                        .build()
                })
                .map_err(|e| tracing::error!(error = %e, "no analysis thread pool available"))
                .ok()
        })
        .as_ref()
}

/// Run `op` inside the shared pool when available.
pub fn install<OP, R>(op: OP) -> R
where
    OP: FnOnce() -> R + Send,
    R: Send,
{
    match get_pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

fn configured_threads() -> usize {
    parse_threads(std::env::var(THREADS_ENV).ok().as_deref()).unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_POOL_THREADS)
    })
}

fn parse_threads(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n >= MIN_POOL_THREADS)
}
