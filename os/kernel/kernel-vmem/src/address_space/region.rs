use alloc::collections::BTreeMap;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegionKind {
    /// Address space that may never be mapped.
    Reserved,
    /// Address space backed by a mapping.
    Mapped,
}

/// A page-aligned span `[start, start + len)` of virtual address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Region {
    pub start: VirtualAddress,
    pub len: u64,
    pub kind: RegionKind,
}

impl Region {
    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64() + self.len
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        self.start.as_u64() <= va.as_u64() && va.as_u64() < self.end()
    }

    #[inline]
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.kind, RegionKind::Reserved)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:#x}..{:#x}",
            self.kind,
            self.start.as_u64(),
            self.end()
        )
    }
}

/// Non-overlapping regions keyed by start address.
#[derive(Default)]
pub(super) struct RegionSet {
    by_start: BTreeMap<u64, Region>,
}

impl RegionSet {
    pub const fn new() -> Self {
        Self {
            by_start: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.by_start.values()
    }

    /// Regions intersecting `[start, end)`, highest first.
    pub fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &Region> {
        self.by_start
            .range(..end)
            .rev()
            .map(|(_, r)| r)
            .take_while(move |r| r.end() > start)
    }

    pub fn covering(&self, va: VirtualAddress) -> Option<&Region> {
        self.by_start
            .range(..=va.as_u64())
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(va))
    }

    pub fn get(&self, start: VirtualAddress) -> Option<&Region> {
        self.by_start.get(&start.as_u64())
    }

    /// Callers check for overlap first.
    pub fn insert(&mut self, region: Region) {
        debug_assert!(
            self.overlapping(region.start.as_u64(), region.end())
                .next()
                .is_none()
        );
        self.by_start.insert(region.start.as_u64(), region);
    }

    pub fn remove(&mut self, start: VirtualAddress) -> Option<Region> {
        self.by_start.remove(&start.as_u64())
    }

    pub fn clear(&mut self) {
        self.by_start.clear();
    }
}
