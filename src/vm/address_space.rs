//! Address Space - per-process page table and backing store
//!
//! The page table has one `TranslationEntry` per virtual page, all
//! non-resident at creation. The backing store is a flat byte region of
//! `num_pages * page_size` bytes holding the canonical copy of every page
//! that is not resident in a frame.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{VmError, VmResult};
use crate::types::{AddressSpaceId, FrameNumber, VirtualPage};
use crate::vm::translation::TranslationEntry;

// ============================================================================
// Backing Store
// ============================================================================

/// Private swap region of one address space
#[derive(Debug, Clone)]
pub struct BackingStore {
    bytes: Vec<u8>,
}

impl BackingStore {
    /// Zero-filled store of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow `length` bytes at `offset`
    pub fn read_bytes(&self, offset: usize, length: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(length)?)
    }

    /// Overwrite bytes at `offset`; refuses writes past the end
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        match self.bytes.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Address Space
// ============================================================================

/// Page table plus backing store of one process
#[derive(Debug, Clone)]
pub struct AddressSpace {
    pub id: AddressSpaceId,
    page_size: usize,
    page_table: Vec<TranslationEntry>,
    backing: BackingStore,
}

impl AddressSpace {
    /// Space of `num_pages` pages, nothing resident
    pub fn new(id: AddressSpaceId, num_pages: usize, page_size: usize) -> Self {
        let page_table = (0..num_pages)
            .map(|vpn| TranslationEntry::absent(VirtualPage(vpn)))
            .collect();
        Self {
            id,
            page_size,
            page_table,
            backing: BackingStore::new(num_pages * page_size),
        }
    }

    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Page-table entry for `vpn`
    pub fn entry(&self, vpn: VirtualPage) -> Option<&TranslationEntry> {
        self.page_table.get(vpn.0)
    }

    pub fn entry_mut(&mut self, vpn: VirtualPage) -> Option<&mut TranslationEntry> {
        self.page_table.get_mut(vpn.0)
    }

    /// Whole page table, indexed by virtual page number
    pub fn page_table(&self) -> &[TranslationEntry] {
        &self.page_table
    }

    /// Page for a faulting address, bounds-checked against the page table
    pub fn page_for(&self, vaddr: u64) -> VmResult<VirtualPage> {
        let vpn = VirtualPage::containing(vaddr, self.page_size);
        if vpn.0 < self.page_table.len() {
            Ok(vpn)
        } else {
            Err(VmError::AddressOutOfRange {
                space: self.id,
                vaddr,
            })
        }
    }

    /// Frames this space currently occupies
    pub fn resident_frames(&self) -> impl Iterator<Item = (VirtualPage, FrameNumber)> + '_ {
        self.page_table
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| (entry.virtual_page, entry.physical_page))
    }

    /// Set the read-only attribute of a page
    pub fn set_read_only(&mut self, vpn: VirtualPage, read_only: bool) -> bool {
        match self.page_table.get_mut(vpn.0) {
            Some(entry) => {
                entry.read_only = read_only;
                true
            }
            None => false,
        }
    }

    pub fn backing(&self) -> &BackingStore {
        &self.backing
    }

    pub fn backing_mut(&mut self) -> &mut BackingStore {
        &mut self.backing
    }

    /// Canonical copy of `vpn` in the backing store
    pub fn page_bytes(&self, vpn: VirtualPage) -> Option<&[u8]> {
        self.backing
            .read_bytes(vpn.byte_offset(self.page_size), self.page_size)
    }

    /// Replace the canonical copy of `vpn`
    pub fn store_page(&mut self, vpn: VirtualPage, data: &[u8]) -> bool {
        data.len() == self.page_size
            && self
                .backing
                .write_bytes(vpn.byte_offset(self.page_size), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_space_not_resident() {
        let space = AddressSpace::new(AddressSpaceId(1), 3, 16);
        assert_eq!(space.num_pages(), 3);
        assert_eq!(space.backing().len(), 48);
        assert!(space.page_table().iter().all(|e| !e.valid));
        assert_eq!(space.resident_frames().count(), 0);
        assert_eq!(
            space.entry(VirtualPage(2)).map(|e| e.virtual_page),
            Some(VirtualPage(2))
        );
    }

    #[test]
    fn test_page_for_bounds() {
        let space = AddressSpace::new(AddressSpaceId(1), 2, 16);
        assert_eq!(space.page_for(17), Ok(VirtualPage(1)));
        assert_eq!(
            space.page_for(32),
            Err(VmError::AddressOutOfRange {
                space: AddressSpaceId(1),
                vaddr: 32
            })
        );
    }

    #[test]
    fn test_backing_store_io() {
        let mut space = AddressSpace::new(AddressSpaceId(1), 2, 4);
        assert!(space.store_page(VirtualPage(1), &[1, 2, 3, 4]));
        assert_eq!(space.page_bytes(VirtualPage(1)), Some(&[1, 2, 3, 4][..]));
        assert_eq!(space.page_bytes(VirtualPage(0)), Some(&[0, 0, 0, 0][..]));
        assert!(!space.store_page(VirtualPage(2), &[0; 4]));
        assert!(!space.store_page(VirtualPage(0), &[0; 3]));
        assert!(!space.backing_mut().write_bytes(7, &[1, 2]));
        assert_eq!(space.backing().read_bytes(6, 4), None);
    }
}
