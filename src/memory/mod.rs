//! Paged virtual memory with two address spaces.
//!
//! The address space is a sequence of 4 MiB pages demand-loaded from a
//! [`store::PageStore`]. Addresses below 4 GiB form the ephemeral RAM space,
//! addresses from 4 GiB to 64 GiB the persistent FLASH space. Each space has
//! its own first-fit free list threaded through 16-byte block headers.
//!
//! - [`store`]: page persistence trait plus file-backed and in-memory stores
//! - [`paging`]: demand paging, dirty tracking, parallel flush
//! - [`alloc`]: free-list allocation over the paged raw byte access

pub mod alloc;
pub mod paging;
pub mod store;

use crate::errors::VmError;
use paging::Pager;
use store::PageStore;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * 1024 * 1024;

pub const PAGE_SIZE: u64 = 4 * MB;
pub const PAGE_COUNT: usize = 16384;
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;
pub const PDE_OFF: u32 = 22;

/// Pages below this index are RAM resident and never persisted.
pub const RAM_PAGE_COUNT: u32 = 1024;
pub const RAM_LIMIT: u64 = 4 * GB;
pub const FLASH_LIMIT: u64 = 64 * GB;

pub const MEM_HEADER_SIZE: u64 = 16;

/// The two disjoint address ranges of the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// Ephemeral, per-invocation.
    Ram,
    /// Persisted across invocations.
    Flash,
}

/// Classifies an address by the space it falls in.
pub fn space_of(address: u64) -> Result<Space, VmError> {
    if address < RAM_LIMIT {
        Ok(Space::Ram)
    } else if address <= FLASH_LIMIT {
        Ok(Space::Flash)
    } else {
        Err(VmError::IllegalAddress(address))
    }
}

/// Bootstrap image for a fresh FLASH space: a zero-size list head followed by
/// one free block covering the rest of the 60 GiB range.
pub fn flash_sentry() -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(&(RAM_LIMIT + MEM_HEADER_SIZE).to_le_bytes());
    buf[8..16].copy_from_slice(&0u64.to_le_bytes());
    buf[16..24].copy_from_slice(&0u64.to_le_bytes());
    buf[24..32].copy_from_slice(&(FLASH_LIMIT - RAM_LIMIT - 2 * MEM_HEADER_SIZE).to_le_bytes());
    buf
}

/// Facade over paging and allocation for one contract's address space.
pub struct Memory {
    pager: Pager,
    /// Byte length of the reserved region at the bottom of RAM.
    reserved: u64,
}

impl Memory {
    /// Opens a contract address space, seeding RAM with `reserved` (the data
    /// section of the loaded object) followed by a fresh RAM free list.
    pub fn open(store: Box<dyn PageStore>, reserved: &[u8]) -> Result<Self, VmError> {
        let mut pager = Pager::new(store);
        let reserved_len = reserved.len() as u64;

        let mut image = Vec::with_capacity(reserved.len() + 2 * MEM_HEADER_SIZE as usize);
        image.extend_from_slice(reserved);
        // list head: zero size, chained to the single free block behind it
        image.extend_from_slice(&(reserved_len + MEM_HEADER_SIZE).to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&(RAM_LIMIT - reserved_len - 2 * MEM_HEADER_SIZE).to_le_bytes());

        let mut pn = 0u32;
        let mut rest = image.as_slice();
        while !rest.is_empty() {
            let take = rest.len().min(PAGE_SIZE as usize);
            let mut page = rest[..take].to_vec();
            page.resize(PAGE_SIZE as usize, 0);
            pager.set_page(pn, page)?;
            rest = &rest[take..];
            pn += 1;
        }
        Ok(Self {
            pager,
            reserved: reserved_len,
        })
    }

    /// Creates the address space of a brand-new contract: empty RAM plus the
    /// FLASH bootstrap sentry on the first persistent page.
    pub fn create(store: Box<dyn PageStore>) -> Result<Self, VmError> {
        let mut mem = Self::open(store, &[])?;
        let mut page = vec![0u8; PAGE_SIZE as usize];
        page[..32].copy_from_slice(&flash_sentry());
        mem.pager.set_page(RAM_PAGE_COUNT, page)?;
        Ok(mem)
    }

    pub fn alloc(&mut self, space: Space, size: u64) -> Result<u64, VmError> {
        alloc::alloc(&mut self.pager, self.reserved, space, size)
    }

    pub fn free(&mut self, address: u64) -> Result<(), VmError> {
        alloc::free(&mut self.pager, self.reserved, address)
    }

    pub fn realloc(&mut self, address: u64, old_size: u64, new_size: u64) -> Result<u64, VmError> {
        alloc::realloc(&mut self.pager, self.reserved, address, old_size, new_size)
    }

    pub fn read_raw(&mut self, address: u64, length: u64) -> Result<Vec<u8>, VmError> {
        self.pager.read_raw(address, length)
    }

    pub fn write_raw(&mut self, address: u64, data: &[u8]) -> Result<(), VmError> {
        self.pager.write_raw(address, data)
    }

    pub fn set_page(&mut self, pn: u32, page: Vec<u8>) -> Result<(), VmError> {
        self.pager.set_page(pn, page)
    }

    /// Bytes currently resident.
    pub fn size(&self) -> u64 {
        self.pager.resident() as u64 * PAGE_SIZE
    }

    /// Writes dirty persistent pages back to the store and drops all resident
    /// pages. RAM pages are discarded, never persisted.
    pub fn flush(&mut self) -> Result<(), VmError> {
        self.pager.flush()
    }

    pub fn store(&self) -> &dyn PageStore {
        self.pager.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemStore;

    #[test]
    fn space_classification() {
        assert_eq!(space_of(0).unwrap(), Space::Ram);
        assert_eq!(space_of(RAM_LIMIT - 1).unwrap(), Space::Ram);
        assert_eq!(space_of(RAM_LIMIT).unwrap(), Space::Flash);
        assert!(space_of(FLASH_LIMIT + 1).is_err());
    }

    #[test]
    fn sentry_layout() {
        let s = flash_sentry();
        let next = u64::from_le_bytes(s[..8].try_into().unwrap());
        let tail_size = u64::from_le_bytes(s[24..32].try_into().unwrap());
        assert_eq!(next, RAM_LIMIT + 16);
        assert_eq!(tail_size, 60 * GB - 32);
    }

    #[test]
    fn raw_io_round_trip() {
        let mut mem = Memory::create(Box::new(MemStore::new())).unwrap();
        let addr = mem.alloc(Space::Ram, 100).unwrap();
        mem.write_raw(addr, &[7u8; 100]).unwrap();
        assert_eq!(mem.read_raw(addr, 100).unwrap(), vec![7u8; 100]);
    }

    #[test]
    fn raw_io_spans_pages() {
        let mut mem = Memory::create(Box::new(MemStore::new())).unwrap();
        let addr = PAGE_SIZE - 10;
        let data: Vec<u8> = (0..20).collect();
        mem.write_raw(addr, &data).unwrap();
        assert_eq!(mem.read_raw(addr, 20).unwrap(), data);
    }
}
