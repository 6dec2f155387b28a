//! Splitting of work lists into contiguous batches.

/// Splits `items` into `ceil(len / batch_size)` contiguous batches, preserving order.
///
/// A `batch_size` of zero is treated as one so every item still lands in a batch.
pub fn split_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
