//! Group-wise byte reversal.
//!
//! A swap width of `N` reverses the byte order inside every complete group of
//! `N` bytes. Bytes past the last complete group are left untouched.

/// Reverses bytes in place within each complete group of `width` bytes.
///
/// Widths of 0 and 1 leave the span unchanged.
pub fn swap_in_place(data: &mut [u8], width: usize) {
    if width < 2 {
        return;
    }

    for group in data.chunks_exact_mut(width) {
        group.reverse();
    }
}

/// Returns a swapped copy of `data`.
pub fn swapped(data: &[u8], width: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    swap_in_place(&mut out, width);
    out
}

/// Resolves a configured swap value against an element width.
///
/// `1` means "use the natural width of the sample", every other value is
/// taken literally.
pub fn effective_width(byte_swap: u16, bytes_per_sample: usize) -> usize {
    match byte_swap {
        1 => bytes_per_sample,
        n => usize::from(n),
    }
}
