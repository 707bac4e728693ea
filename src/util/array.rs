//! Growth policy for arrays that are resized in steps.

/// Returns the size an array should grow to so that it can hold at least
/// `min_target_size` entries.
///
/// The growth is roughly 1/8th of the target plus a small constant, which
/// keeps repeated growth amortized O(1) without doubling large arrays.
pub fn oversize(min_target_size: usize) -> usize {
    let extra = if min_target_size < 9 { 3 } else { 6 };
    (min_target_size >> 3) + extra + min_target_size
}

/// Grows `vec` with `fill` values so that `vec.len() >= min_len`.
pub fn grow_to<T: Clone>(vec: &mut Vec<T>, min_len: usize, fill: T) {
    if vec.len() < min_len {
        vec.resize(oversize(min_len), fill);
    }
}
