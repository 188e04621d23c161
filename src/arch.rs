use crate::result::*;

/// A checked cast from u64 to usize
///
/// Sizes in a table header are 32-bit, but multiplying them out
/// (rows times columns, say) gets us 64-bit values
/// that a 32-bit target can't necessarily address.
pub fn usize<I: Into<u64>>(i: I) -> ZoneResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZoneError::InsufficientAddressSpace)
}
