//! Flush-size alignment.
//!
//! Every flush boundary is a multiple of the alignment unit so that neither a
//! swap group nor a sample of the widest supported kind (8 bytes) is split
//! between two pushes.

/// Width of the widest supported sample kind.
pub const BASE_ALIGNMENT: usize = 8;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// Computes the alignment unit for a set of configured swap widths.
///
/// Widths of 0 and 1 do not widen the unit; any other width `N` makes the
/// unit `lcm(unit, N)`.
pub fn alignment_unit<I>(swap_widths: I) -> usize
where
    I: IntoIterator<Item = u16>,
{
    swap_widths
        .into_iter()
        .filter(|w| *w > 1)
        .fold(BASE_ALIGNMENT, |unit, w| lcm(unit, usize::from(w)))
}

/// Min/max flush thresholds clamped to an alignment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferBounds {
    /// Alignment unit every threshold is a multiple of.
    pub unit: usize,
    /// Size of the fixed chunks flushed when the buffer grows large.
    pub max_bytes: usize,
    /// Buffer level at which an aligned residual is flushed.
    pub min_bytes: usize,
}

impl TransferBounds {
    /// Clamps requested thresholds to `unit`.
    pub fn compute(unit: usize, max_bytes: usize, min_bytes: usize) -> Self {
        let unit = unit.max(1);
        let max_bytes = max_bytes.max(unit);
        let max_bytes = max_bytes - max_bytes % unit;
        let min_bytes = min_bytes.max(1);

        // max_bytes is a multiple of unit, so rounding min up cannot pass it.
        let min_bytes = if min_bytes > max_bytes {
            max_bytes
        } else {
            min_bytes.div_ceil(unit) * unit
        };

        Self {
            unit,
            max_bytes,
            min_bytes,
        }
    }

    /// Number of leading bytes of a `len`-byte buffer that form whole units.
    pub fn aligned_len(&self, len: usize) -> usize {
        len - len % self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_defaults_to_eight() {
        assert_eq!(alignment_unit(Vec::<u16>::new()), 8);
        assert_eq!(alignment_unit([0]), 8);
        assert_eq!(alignment_unit([1]), 8);
    }

    #[test]
    fn test_unit_is_lcm_with_swap_width() {
        assert_eq!(alignment_unit([2]), 8);
        assert_eq!(alignment_unit([3]), 24);
        assert_eq!(alignment_unit([6]), 24);
        assert_eq!(alignment_unit([16]), 16);
        assert_eq!(alignment_unit([3, 5]), 120);
    }

    #[test]
    fn test_max_rounds_down() {
        let bounds = TransferBounds::compute(8, 100, 1);
        assert_eq!(bounds.max_bytes, 96);
        assert_eq!(bounds.min_bytes, 8);
    }

    #[test]
    fn test_max_clamped_up_to_unit() {
        let bounds = TransferBounds::compute(24, 5, 0);
        assert_eq!(bounds.max_bytes, 24);
        assert_eq!(bounds.min_bytes, 24);
    }

    #[test]
    fn test_min_capped_at_max() {
        let bounds = TransferBounds::compute(8, 64, 1000);
        assert_eq!(bounds.max_bytes, 64);
        assert_eq!(bounds.min_bytes, 64);
    }

    #[test]
    fn test_default_thresholds_unchanged() {
        let bounds = TransferBounds::compute(8, 16384, 16384);
        assert_eq!(bounds.max_bytes, 16384);
        assert_eq!(bounds.min_bytes, 16384);
    }

    #[test]
    fn test_bounds_invariants_hold() {
        for swap in 0u16..=20 {
            let unit = alignment_unit([swap]);
            for max in [0usize, 1, 7, 8, 9, 100, 1000, 16384, usize::MAX] {
                for min in [0usize, 1, 5, 8, 33, 999, 20000, usize::MAX - 15, usize::MAX] {
                    let b = TransferBounds::compute(unit, max, min);
                    assert_eq!(b.max_bytes % b.unit, 0);
                    assert_eq!(b.min_bytes % b.unit, 0);
                    assert!(b.min_bytes <= b.max_bytes);
                    assert!(b.min_bytes >= 1);
                }
            }
        }
    }

    #[test]
    fn test_min_near_usize_max_rounds_without_overflow() {
        let bounds = TransferBounds::compute(24, usize::MAX, usize::MAX - 15);
        assert_eq!(bounds.max_bytes, usize::MAX - usize::MAX % 24);
        assert_eq!(bounds.min_bytes, bounds.max_bytes);
    }

    #[test]
    fn test_aligned_len() {
        let bounds = TransferBounds::compute(8, 64, 8);
        assert_eq!(bounds.aligned_len(0), 0);
        assert_eq!(bounds.aligned_len(7), 0);
        assert_eq!(bounds.aligned_len(20), 16);
    }
}
