// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_core::ExecutionContext;

#[cfg(feature = "rayon")]
pub(crate) fn can_use_parallel(exec: &ExecutionContext<'_>) -> bool {
    exec.allows_parallel()
}

#[cfg(not(feature = "rayon"))]
#[allow(dead_code)]
pub(crate) fn can_use_parallel(_exec: &ExecutionContext<'_>) -> bool {
    false
}

pub(crate) fn thread_count(exec: &ExecutionContext<'_>) -> Option<usize> {
    #[cfg(feature = "rayon")]
    if can_use_parallel(exec) {
        return Some(rayon::current_num_threads());
    }

    #[cfg(not(feature = "rayon"))]
    let _ = exec;

    None
}
