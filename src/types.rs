//! Core identifier types shared across the storage engine.

use std::fmt;

use crate::error::{Result, StoreError};

/// Number of disk files a store is striped across.
pub const DISK_COUNT: usize = 4;

const DISK_MASK: u64 = 0x6000_0000_0000_0000;
const DISK_SHIFT: u32 = 61;
const OFFSET_MASK: u64 = 0x1FFF_FFFF_FFFF_FFFF;

/// Largest byte offset representable inside a [`Pid`].
pub const MAX_OFFSET: u64 = OFFSET_MASK;

/// Persistent identifier of a node.
///
/// Packs the owning disk's index (bits 61-62) and the node's byte offset
/// within that disk (bits 0-60) into one 64-bit value. Bit 63 is reserved
/// and always zero. All masking lives here; the rest of the engine only
/// goes through the accessors.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Pid(u64);

impl Pid {
    /// Sentinel for "no node". Config validation keeps disk 0's node region
    /// above offset 0, so no live node ever encodes to raw 0.
    pub const NULL: Pid = Pid(0);

    /// Builds an identifier from a disk index and a byte offset.
    pub fn new(disk: usize, offset: u64) -> Result<Self> {
        if disk >= DISK_COUNT {
            return Err(StoreError::Capacity("disk index out of range"));
        }
        if offset > OFFSET_MASK {
            return Err(StoreError::Capacity("node offset exceeds 61 bits"));
        }
        Ok(Pid(((disk as u64) << DISK_SHIFT) | offset))
    }

    /// Reinterprets a raw 64-bit value as an identifier.
    pub fn from_raw(raw: u64) -> Self {
        Pid(raw)
    }

    /// The raw 64-bit wire value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Index of the disk holding the node.
    pub fn disk_index(self) -> usize {
        ((self.0 & DISK_MASK) >> DISK_SHIFT) as usize
    }

    /// Byte offset of the node within its disk.
    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    /// The same offset re-homed onto another disk.
    pub fn with_disk(self, disk: usize) -> Result<Self> {
        Pid::new(disk, self.offset())
    }

    /// True for the [`Pid::NULL`] sentinel.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.disk_index(), self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn packs_and_unpacks_fields() {
        let pid = Pid::new(3, 0x1234_5678).unwrap();
        assert_eq!(pid.disk_index(), 3);
        assert_eq!(pid.offset(), 0x1234_5678);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(Pid::new(4, 0).is_err());
        assert!(Pid::new(0, MAX_OFFSET + 1).is_err());
        assert!(Pid::new(3, MAX_OFFSET).is_ok());
    }

    #[test]
    fn with_disk_keeps_offset() {
        let pid = Pid::new(0, 99).unwrap();
        let moved = pid.with_disk(2).unwrap();
        assert_eq!(moved.disk_index(), 2);
        assert_eq!(moved.offset(), 99);
    }

    #[test]
    fn null_is_disk_zero_offset_zero() {
        assert_eq!(Pid::NULL.disk_index(), 0);
        assert_eq!(Pid::NULL.offset(), 0);
        assert!(Pid::NULL.is_null());
        assert!(!Pid::new(1, 0).unwrap().is_null());
    }

    proptest! {
        #[test]
        fn roundtrip_any_disk_and_offset(disk in 0usize..DISK_COUNT, offset in 0u64..=MAX_OFFSET) {
            let pid = Pid::new(disk, offset).unwrap();
            prop_assert_eq!(pid.disk_index(), disk);
            prop_assert_eq!(pid.offset(), offset);
            prop_assert_eq!(Pid::from_raw(pid.raw()), pid);
        }
    }
}
