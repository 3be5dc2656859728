pub const DEFAULT_BATCH_SIZE: usize = 15;

/// A contiguous run of text units sent in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    pub index: usize,
    /// Position of the first unit in the full sequence.
    pub offset: usize,
    pub units: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Splits `units` into order-preserving batches of at most `batch_size`
/// units. A size of zero is treated as one.
pub fn split<T>(units: &[T], batch_size: usize) -> Vec<Batch<'_, T>> {
    let size = batch_size.max(1);
    units
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            offset: index * size,
            units: chunk,
        })
        .collect()
}
