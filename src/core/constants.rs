// ============================================================================
// reactive-core - Flag constants
// Bitflag positions for Cell and Subscription state words.
// ============================================================================

// =============================================================================
// CELL FLAGS
// =============================================================================

/// Cell participates in the graph. Cleared only by dispose; distinct from
/// Effect's separate enable/disable (which gates re-running, not disposal).
pub const ENABLED: u32 = 1 << 0;

/// Cell has been disposed; terminal, never cleared.
pub const DISPOSED: u32 = 1 << 1;

/// Cached value may be stale; must validate on next read.
pub const DIRTY: u32 = 1 << 2;

/// Scheduled for flush-deferred recomputation. Implies DIRTY.
pub const QUEUED: u32 = 1 << 3;

/// Incoming object values are stored as-is, not auto-wrapped in a reactive
/// object facade (see SPEC_FULL.md 4.2 "Object auto-wrap").
pub const SHALLOW: u32 = 1 << 4;

// =============================================================================
// EFFECT-ONLY FLAGS
// =============================================================================

/// Effect runs on dirty; cleared by `disable()`. A disabled effect still
/// accumulates DIRTY but does not re-run until re-enabled.
pub const EFFECT_ENABLED: u32 = 1 << 5;

/// Effect has executed its recipe at least once.
pub const EFFECT_RAN: u32 = 1 << 6;

// =============================================================================
// STATUS MASK
// =============================================================================

/// Mask to clear the transient status bits (DIRTY, QUEUED) while preserving
/// identity/lifecycle bits (ENABLED, DISPOSED, SHALLOW, EFFECT_*).
pub const STATUS_MASK: u32 = !(DIRTY | QUEUED);

// =============================================================================
// SUBSCRIPTION FLAGS
// =============================================================================

pub const SUB_ENABLED: u32 = 1 << 0;
pub const SUB_DISPOSED: u32 = 1 << 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_flags_are_distinct() {
        let all = [ENABLED, DISPOSED, DIRTY, QUEUED, SHALLOW, EFFECT_ENABLED, EFFECT_RAN];
        for (i, &a) in all.iter().enumerate() {
            for (j, &b) in all.iter().enumerate() {
                if i != j {
                    assert_eq!(a & b, 0, "flags {i} and {j} overlap");
                }
            }
        }
    }

    #[test]
    fn status_mask_clears_only_dirty_and_queued() {
        let flags = ENABLED | DIRTY | QUEUED | SHALLOW;
        let cleared = flags & STATUS_MASK;
        assert_eq!(cleared & DIRTY, 0);
        assert_eq!(cleared & QUEUED, 0);
        assert_ne!(cleared & ENABLED, 0);
        assert_ne!(cleared & SHALLOW, 0);
    }

    #[test]
    fn subscription_flags_are_distinct() {
        assert_eq!(SUB_ENABLED & SUB_DISPOSED, 0);
    }
}
