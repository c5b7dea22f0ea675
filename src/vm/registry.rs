//! Address Space Registry
//!
//! Owns every live address space and resolves the `(space, vpn)` pairs
//! the frame table keeps as reverse mappings. Also tracks which space is
//! currently scheduled.

use alloc::collections::BTreeMap;

use crate::error::{VmError, VmResult};
use crate::types::{AddressSpaceId, VirtualPage};
use crate::vm::address_space::AddressSpace;
use crate::vm::translation::TranslationEntry;

/// Table of live address spaces
#[derive(Debug)]
pub struct AddressSpaceRegistry {
    spaces: BTreeMap<AddressSpaceId, AddressSpace>,
    current: Option<AddressSpaceId>,
    next_id: u64,
}

impl AddressSpaceRegistry {
    pub fn new() -> Self {
        Self {
            spaces: BTreeMap::new(),
            current: None,
            next_id: 1,
        }
    }

    /// Register a fresh space of `num_pages` pages
    pub fn create(&mut self, num_pages: usize, page_size: usize) -> AddressSpaceId {
        let id = AddressSpaceId(self.next_id);
        self.next_id += 1;
        self.spaces
            .insert(id, AddressSpace::new(id, num_pages, page_size));
        id
    }

    /// Unregister a space; clears `current` if it was scheduled
    pub fn remove(&mut self, id: AddressSpaceId) -> VmResult<AddressSpace> {
        let space = self
            .spaces
            .remove(&id)
            .ok_or(VmError::UnknownAddressSpace(id))?;
        if self.current == Some(id) {
            self.current = None;
        }
        Ok(space)
    }

    pub fn get(&self, id: AddressSpaceId) -> VmResult<&AddressSpace> {
        self.spaces.get(&id).ok_or(VmError::UnknownAddressSpace(id))
    }

    pub fn get_mut(&mut self, id: AddressSpaceId) -> VmResult<&mut AddressSpace> {
        self.spaces
            .get_mut(&id)
            .ok_or(VmError::UnknownAddressSpace(id))
    }

    pub fn contains(&self, id: AddressSpaceId) -> bool {
        self.spaces.contains_key(&id)
    }

    /// Resolve a reverse mapping to its page-table entry
    pub fn entry(&self, id: AddressSpaceId, vpn: VirtualPage) -> Option<&TranslationEntry> {
        self.spaces.get(&id)?.entry(vpn)
    }

    pub fn entry_mut(
        &mut self,
        id: AddressSpaceId,
        vpn: VirtualPage,
    ) -> Option<&mut TranslationEntry> {
        self.spaces.get_mut(&id)?.entry_mut(vpn)
    }

    pub fn current_id(&self) -> Option<AddressSpaceId> {
        self.current
    }

    pub fn set_current(&mut self, id: Option<AddressSpaceId>) -> VmResult<()> {
        if let Some(id) = id {
            if !self.spaces.contains_key(&id) {
                return Err(VmError::UnknownAddressSpace(id));
            }
        }
        self.current = id;
        Ok(())
    }

    /// The scheduled space
    pub fn current(&self) -> VmResult<&AddressSpace> {
        let id = self.current.ok_or(VmError::NoCurrentSpace)?;
        self.get(id)
    }

    pub fn current_mut(&mut self) -> VmResult<&mut AddressSpace> {
        let id = self.current.ok_or(VmError::NoCurrentSpace)?;
        self.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressSpace> {
        self.spaces.values()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl Default for AddressSpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
