//! Subset copies in and out of dense arrays stored fastest varying axis first.
//!
//! A buffer with logical dimensions `d` and element size `e` is viewed as a row-major [`ndarray`] array of shape `reverse(d) + [e]`.

use std::ops::Range;

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn, Slice};
use zarrs::array_subset::ArraySubset;

use super::BackendError;

fn view_shape(shape: &[u64], element_size: usize) -> Result<Vec<usize>, BackendError> {
    shape
        .iter()
        .rev()
        .map(|&length| {
            usize::try_from(length).map_err(|_| BackendError::InvalidSubset(format!("{shape:?}")))
        })
        .chain(std::iter::once(Ok(element_size)))
        .collect()
}

fn subset_ranges(
    dimensions: &[u64],
    subset: &ArraySubset,
    element_size: usize,
) -> Result<Vec<Range<usize>>, BackendError> {
    let out_of_bounds = || {
        BackendError::InvalidSubset(format!(
            "{subset:?} is out of bounds of an array with dimensions {dimensions:?}"
        ))
    };
    if subset.dimensionality() != dimensions.len() {
        return Err(out_of_bounds());
    }
    let mut ranges = Vec::with_capacity(dimensions.len() + 1);
    for ((start, length), dimension) in subset
        .start()
        .iter()
        .zip(subset.shape())
        .zip(dimensions)
        .rev()
    {
        let end = start.checked_add(*length).ok_or_else(out_of_bounds)?;
        if end > *dimension {
            return Err(out_of_bounds());
        }
        let start = usize::try_from(*start).map_err(|_| out_of_bounds())?;
        let end = usize::try_from(end).map_err(|_| out_of_bounds())?;
        ranges.push(start..end);
    }
    ranges.push(0..element_size);
    Ok(ranges)
}

/// Copy the elements of `subset` out of `buffer`.
///
/// # Errors
/// Returns an error if `buffer` does not match `dimensions` or `subset` is out of bounds.
pub fn read_subset(
    buffer: &[u8],
    dimensions: &[u64],
    element_size: usize,
    subset: &ArraySubset,
) -> Result<Vec<u8>, BackendError> {
    let ranges = subset_ranges(dimensions, subset, element_size)?;
    let array = ArrayViewD::from_shape(IxDyn(&view_shape(dimensions, element_size)?), buffer)?;
    let view = array.slice_each_axis(|axis| Slice::from(ranges[axis.axis.index()].clone()));
    Ok(view.iter().copied().collect())
}

/// Copy `bytes` holding the elements of `subset` into `buffer`.
///
/// # Errors
/// Returns an error if `buffer` does not match `dimensions`, `subset` is out of bounds or `bytes` does not match `subset`.
pub fn write_subset(
    buffer: &mut [u8],
    dimensions: &[u64],
    element_size: usize,
    subset: &ArraySubset,
    bytes: &[u8],
) -> Result<(), BackendError> {
    let ranges = subset_ranges(dimensions, subset, element_size)?;
    let expected = ranges
        .iter()
        .map(|range| range.end - range.start)
        .product::<usize>();
    if bytes.len() != expected {
        return Err(BackendError::InvalidBlockLength {
            expected,
            actual: bytes.len(),
        });
    }
    let block = ArrayViewD::from_shape(IxDyn(&view_shape(subset.shape(), element_size)?), bytes)?;
    let mut array =
        ArrayViewMutD::from_shape(IxDyn(&view_shape(dimensions, element_size)?), buffer)?;
    array
        .slice_each_axis_mut(|axis| Slice::from(ranges[axis.axis.index()].clone()))
        .assign(&block);
    Ok(())
}
