//! Monotonic time for benchmarking emitted pipelines.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process.
#[no_mangle]
pub extern "C" fn weft_current_time_ns() -> i64 {
    let start = START.get_or_init(Instant::now);
    i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_monotonic() {
        let a = weft_current_time_ns();
        let b = weft_current_time_ns();
        assert!(b >= a);
    }
}
