//! Block arena for fixed-size index elements
//!
//! - Allocation lifetime is explicit: elements live until `clear()` (or
//!   `deallocate()` on a recycling arena)
//! - Handles stay valid across later allocations; blocks never reallocate
//! - Block `n` holds `64 << min(6, n)` elements
//!
//! Bulk `clear()` is the baseline every arena supports. Point-wise
//! `deallocate()` with slot reuse is only available on arenas created with
//! `Arena::with_recycling()`.
//!
//! Allocation is not thread-safe; bulk loads allocate on one thread and
//! share the arena read-only afterwards.

use crate::index::{IndexError, IndexResult};

/// Number of elements in the first block
const FIRST_BLOCK_SIZE: usize = 64;

/// Blocks stop growing after this many doublings
const MAX_BLOCK_SHIFT: usize = 6;

/// Stable handle to an element stored in an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementRef {
    block: u32,
    slot: u32,
}

impl ElementRef {
    /// Block number of this handle
    pub fn block(&self) -> usize {
        self.block as usize
    }

    /// Slot inside the block
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// Growing block arena.
#[derive(Debug)]
pub struct Arena<T> {
    /// Blocks; a block is never pushed beyond its reserved capacity.
    blocks: Vec<Vec<Option<T>>>,
    /// Free slots, present only when point-wise deallocation is enabled.
    free: Option<Vec<ElementRef>>,
    /// Number of live elements.
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an arena supporting bulk clear only.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free: None,
            live: 0,
        }
    }

    /// Create an arena that also supports point-wise deallocation.
    pub fn with_recycling() -> Self {
        Self {
            blocks: Vec::new(),
            free: Some(Vec::new()),
            live: 0,
        }
    }

    /// Whether `deallocate` is supported
    pub fn supports_deallocate(&self) -> bool {
        self.free.is_some()
    }

    /// Capacity of the block with the given number
    pub fn block_size(block_number: usize) -> usize {
        FIRST_BLOCK_SIZE << block_number.min(MAX_BLOCK_SHIFT)
    }

    /// Allocate a new element and return its handle.
    ///
    /// Fails only when a new block cannot be reserved.
    pub fn allocate(&mut self, item: T) -> IndexResult<ElementRef> {
        if let Some(handle) = self.free.as_mut().and_then(|free| free.pop()) {
            self.blocks[handle.block()][handle.slot()] = Some(item);
            self.live += 1;
            return Ok(handle);
        }

        let needs_block = match self.blocks.last() {
            Some(block) => block.len() == block.capacity(),
            None => true,
        };
        if needs_block {
            self.grow()?;
        }

        let block_number = self.blocks.len() - 1;
        let block = &mut self.blocks[block_number];
        let slot = block.len();
        block.push(Some(item));
        self.live += 1;

        Ok(ElementRef {
            block: block_number as u32,
            slot: slot as u32,
        })
    }

    fn grow(&mut self) -> IndexResult<()> {
        let size = Self::block_size(self.blocks.len());
        let mut block: Vec<Option<T>> = Vec::new();
        block
            .try_reserve_exact(size)
            .map_err(|e| {
                IndexError::out_of_memory(format!("arena block of {} elements: {}", size, e))
            })?;
        self.blocks
            .try_reserve(1)
            .map_err(|e| IndexError::out_of_memory(format!("arena block list: {}", e)))?;
        self.blocks.push(block);
        Ok(())
    }

    /// Free a single element; its slot is reused by a later allocation.
    ///
    /// Returns the element. Fails on a bulk-only arena or a dead handle.
    pub fn deallocate(&mut self, handle: ElementRef) -> IndexResult<T> {
        let Some(free) = self.free.as_mut() else {
            return Err(IndexError::bad_parameter(
                "arena supports bulk clear only, point-wise deallocation is disabled",
            ));
        };
        let item = self
            .blocks
            .get_mut(handle.block())
            .and_then(|block| block.get_mut(handle.slot()))
            .and_then(Option::take)
            .ok_or_else(|| IndexError::bad_parameter(format!("dead arena handle {:?}", handle)))?;
        free.push(handle);
        self.live -= 1;
        Ok(item)
    }

    /// Get a reference to an element.
    pub fn get(&self, handle: ElementRef) -> Option<&T> {
        self.blocks
            .get(handle.block())
            .and_then(|block| block.get(handle.slot()))
            .and_then(Option::as_ref)
    }

    /// Get a mutable reference to an element.
    pub fn get_mut(&mut self, handle: ElementRef) -> Option<&mut T> {
        self.blocks
            .get_mut(handle.block())
            .and_then(|block| block.get_mut(handle.slot()))
            .and_then(Option::as_mut)
    }

    /// Number of live elements
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of blocks allocated so far
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reserved slot storage in bytes
    pub fn memory_usage(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.capacity() * std::mem::size_of::<Option<T>>())
            .sum()
    }

    /// Drop every element and release all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
        if let Some(free) = self.free.as_mut() {
            free.clear();
        }
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(Arena::<u8>::block_size(0), 64);
        assert_eq!(Arena::<u8>::block_size(1), 128);
        assert_eq!(Arena::<u8>::block_size(6), 64 << 6);
        assert_eq!(Arena::<u8>::block_size(20), 64 << 6);
    }

    #[test]
    fn test_allocate_and_get() {
        let mut arena = Arena::new();
        let a = arena.allocate("first").unwrap();
        let b = arena.allocate("second").unwrap();

        assert_eq!(arena.get(a), Some(&"first"));
        assert_eq!(arena.get(b), Some(&"second"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_handles_stable_across_blocks() {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..1000u32).map(|i| arena.allocate(i).unwrap()).collect();

        // 64 + 128 + 256 + 512 >= 1000
        assert_eq!(arena.block_count(), 4);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(arena.get(*handle), Some(&(i as u32)));
        }
    }

    #[test]
    fn test_bulk_only_rejects_deallocate() {
        let mut arena = Arena::new();
        let a = arena.allocate(1).unwrap();
        let err = arena.deallocate(a).unwrap_err();
        assert_eq!(err.code().code(), "AERO_INDEX_BAD_PARAMETER");
        assert_eq!(arena.get(a), Some(&1));
    }

    #[test]
    fn test_recycling_reuses_slot() {
        let mut arena = Arena::with_recycling();
        let a = arena.allocate(1).unwrap();
        let _b = arena.allocate(2).unwrap();

        assert_eq!(arena.deallocate(a).unwrap(), 1);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.len(), 1);

        let c = arena.allocate(3).unwrap();
        assert_eq!(c, a);
        assert_eq!(arena.get(c), Some(&3));
    }

    #[test]
    fn test_double_deallocate_fails() {
        let mut arena = Arena::with_recycling();
        let a = arena.allocate(1).unwrap();
        arena.deallocate(a).unwrap();
        assert!(arena.deallocate(a).is_err());
    }

    #[test]
    fn test_clear() {
        let mut arena = Arena::new();
        let a = arena.allocate(1).unwrap();
        arena.allocate(2).unwrap();

        arena.clear();

        assert!(arena.is_empty());
        assert_eq!(arena.block_count(), 0);
        assert!(arena.get(a).is_none());
    }
}
