//! Thread-pool selection for batch operations.

use crate::error::{Result, RetrievalError};

/// Run `f` on a dedicated rayon pool of `num_threads` workers, or on the
/// global pool when `num_threads <= 0` (the "auto" sentinel).
///
/// Parallel sections inside `f` must be order-preserving maps so that the
/// thread count never changes results.
pub(crate) fn with_thread_pool<T: Send>(
    num_threads: i32,
    f: impl FnOnce() -> Result<T> + Send,
) -> Result<T> {
    if num_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads as usize)
            .build()
            .map_err(|e| RetrievalError::invalid_option("num_threads", e.to_string()))?;
        pool.install(f)
    } else {
        f()
    }
}
