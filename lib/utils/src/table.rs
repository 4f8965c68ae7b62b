//! Fixed-capacity arena tables.
//!
//! A [FixedTable] only ever grows up to the capacity chosen at construction time.
//! Entries are addressed by the index returned from [FixedTable::push] and are never
//! removed, so an index stays valid for the lifetime of the table.
use alloc::vec::Vec;
use core::{
    fmt::Debug,
    ops::{Index, IndexMut},
};

/// Returned by [FixedTable::push] when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

pub struct FixedTable<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> FixedTable<T> {
    pub fn with_capacity(capacity: usize) -> FixedTable<T> {
        FixedTable {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `value` and return its index.
    pub fn push(&mut self, value: T) -> Result<usize, TableFull> {
        if self.items.len() >= self.capacity {
            return Err(TableFull);
        }
        let index = self.items.len();
        self.items.push(value);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> Index<usize> for FixedTable<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IndexMut<usize> for FixedTable<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.items[index]
    }
}

impl<T: Debug> Debug for FixedTable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_until_full() {
        let mut table = FixedTable::with_capacity(2);
        assert_eq!(table.push('a'), Ok(0));
        assert_eq!(table.push('b'), Ok(1));
        assert_eq!(table.push('c'), Err(TableFull));
        assert_eq!(table.len(), 2);
        assert_eq!(table[1], 'b');
    }

    #[test]
    fn indices_stay_stable() {
        let mut table = FixedTable::with_capacity(4);
        let first = table.push(10u32).unwrap();
        table.push(20).unwrap();
        table[first] += 1;
        assert_eq!(table.get(first), Some(&11));
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), [11, 20]);
        assert_eq!(table.get(7), None);
    }
}
