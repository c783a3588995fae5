use {
    crate::graphics::vulkan_api::AllocatorError,
    std::{collections::BTreeMap, fmt},
};

/// A contiguous `[offset, offset + size)` interval of a linear resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub offset: u32,
    pub size: u32,
    pub allocated: bool,
}

impl Range {
    /// The first byte past the end of the range.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "[{}, {}) {}",
            self.offset,
            self.end(),
            if self.allocated { "allocated" } else { "free" }
        ))
    }
}

/// An ordered set of disjoint ranges which always covers `[0, capacity)`.
///
/// Adjacent free ranges are merged as soon as a range is freed, so no two
/// neighbors are ever both free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    capacity: u32,

    /// Ranges keyed by offset. Ranges never overlap so the offset is unique.
    ranges: BTreeMap<u32, Range>,
}

impl RangeSet {
    /// Create a set with a single free range spanning the capacity.
    pub fn new(capacity: u32) -> Self {
        let mut set = Self {
            capacity,
            ranges: BTreeMap::new(),
        };
        set.reset();
        set
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Iterate over every range in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = &Range> + '_ {
        self.ranges.values()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Claim the first free range, in offset order, which can hold `size`
    /// bytes.
    ///
    /// # Returns
    ///
    /// The allocated range, or None when no free range is large enough.
    pub fn allocate(&mut self, size: u32) -> Option<Range> {
        debug_assert!(size > 0, "zero sized allocations are not supported");

        let free = *self
            .ranges
            .values()
            .find(|range| !range.allocated && range.size >= size)?;

        let allocated = Range {
            offset: free.offset,
            size,
            allocated: true,
        };
        self.ranges.insert(allocated.offset, allocated);

        if free.size > size {
            let remainder = Range {
                offset: free.offset + size,
                size: free.size - size,
                allocated: false,
            };
            self.ranges.insert(remainder.offset, remainder);
        }

        Some(allocated)
    }

    /// Release the allocated range which exactly matches offset and size,
    /// then merge it with any free neighbors.
    pub fn free(&mut self, offset: u32, size: u32) -> Result<(), AllocatorError> {
        let range = match self.ranges.get_mut(&offset) {
            Some(range) if range.allocated && range.size == size => range,
            _ => return Err(AllocatorError::RangeNotFound { offset, size }),
        };
        range.allocated = false;

        let mut merged = *range;

        let next = self.ranges.range(merged.end()..).next().map(|(_, r)| *r);
        if let Some(next) = next.filter(|next| !next.allocated) {
            self.ranges.remove(&next.offset);
            merged.size += next.size;
        }

        let previous = self.ranges.range(..merged.offset).next_back().map(|(_, r)| *r);
        if let Some(previous) = previous.filter(|previous| !previous.allocated) {
            self.ranges.remove(&merged.offset);
            merged = Range {
                offset: previous.offset,
                size: previous.size + merged.size,
                allocated: false,
            };
        }

        self.ranges.insert(merged.offset, merged);
        Ok(())
    }

    /// Extend the set to cover `[0, new_capacity)`.
    ///
    /// The trailing range grows if it is free, otherwise a new free range is
    /// appended for the difference.
    pub fn extend(&mut self, new_capacity: u32) {
        debug_assert!(new_capacity > self.capacity);

        let delta = new_capacity - self.capacity;
        match self.ranges.values_mut().next_back() {
            Some(last) if !last.allocated => last.size += delta,
            _ => {
                self.ranges.insert(
                    self.capacity,
                    Range {
                        offset: self.capacity,
                        size: delta,
                        allocated: false,
                    },
                );
            }
        }
        self.capacity = new_capacity;
    }

    /// Forget every allocation, leaving one free range over the capacity.
    pub fn reset(&mut self) {
        self.ranges.clear();
        if self.capacity > 0 {
            self.ranges.insert(
                0,
                Range {
                    offset: 0,
                    size: self.capacity,
                    allocated: false,
                },
            );
        }
    }

    /// Collect the ranges, used for logging.
    pub fn to_vec(&self) -> Vec<Range> {
        self.ranges.values().copied().collect()
    }
}
