/// Remaining countdown after `since..now` has elapsed.
///
/// Returns `max(0, nominal_remaining_ms - (now_ms - since_ms))`. A clock that
/// moved backwards (`now_ms < since_ms`) counts as zero elapsed time.
pub fn compute_remaining(nominal_remaining_ms: u64, since_ms: u64, now_ms: u64) -> u64 {
    let elapsed = now_ms.saturating_sub(since_ms);
    nominal_remaining_ms.saturating_sub(elapsed)
}

/// Whole seconds left on the display, rounding partial seconds up.
pub fn display_secs(remaining_ms: u64) -> u64 {
    remaining_ms.div_ceil(1000)
}
