//! Demand paging over a [`PageStore`].

use crate::errors::VmError;
use crate::memory::store::PageStore;
use crate::memory::{PAGE_COUNT, PAGE_MASK, PAGE_SIZE, PDE_OFF, RAM_PAGE_COUNT};

const PRESENT: u8 = 0x01;
const ACCESSED: u8 = 0x02;
const DIRTY: u8 = 0x04;

/// Page number of an address.
pub fn pde(address: u64) -> u32 {
    ((address >> PDE_OFF) & 0x3FFF) as u32
}

struct Page {
    flags: u8,
    data: Vec<u8>,
}

/// Demand-paged address space. Pages are loaded from the store on first
/// touch (persistent range only), tracked with present/accessed/dirty flags,
/// and written back on [`Pager::flush`].
pub struct Pager {
    pages: Vec<Page>,
    resident: usize,
    store: Box<dyn PageStore>,
}

impl Pager {
    pub fn new(store: Box<dyn PageStore>) -> Self {
        let mut pages = Vec::with_capacity(PAGE_COUNT);
        for _ in 0..PAGE_COUNT {
            pages.push(Page {
                flags: 0,
                data: Vec::new(),
            });
        }
        Self {
            pages,
            resident: 0,
            store,
        }
    }

    pub fn resident(&self) -> usize {
        self.resident
    }

    pub fn store(&self) -> &dyn PageStore {
        self.store.as_ref()
    }

    /// Makes a page resident, loading persistent pages from the store.
    fn touch(&mut self, pn: u32) -> Result<(), VmError> {
        let idx = pn as usize;
        if idx >= PAGE_COUNT {
            return Err(VmError::IllegalAddress((pn as u64) << PDE_OFF));
        }
        if self.pages[idx].flags & PRESENT == 0 {
            let data = if pn >= RAM_PAGE_COUNT {
                match self.store.get(pn)? {
                    Some(page) => page,
                    None => vec![0u8; PAGE_SIZE as usize],
                }
            } else {
                vec![0u8; PAGE_SIZE as usize]
            };
            self.pages[idx].data = data;
            self.pages[idx].flags = PRESENT;
            self.resident += 1;
        }
        self.pages[idx].flags |= ACCESSED;
        Ok(())
    }

    /// Installs a page image directly, marking it dirty.
    pub fn set_page(&mut self, pn: u32, page: Vec<u8>) -> Result<(), VmError> {
        let idx = pn as usize;
        if idx >= PAGE_COUNT || page.len() != PAGE_SIZE as usize {
            return Err(VmError::IllegalAddress((pn as u64) << PDE_OFF));
        }
        if self.pages[idx].flags & PRESENT == 0 {
            self.resident += 1;
            self.pages[idx].flags = PRESENT;
        }
        self.pages[idx].flags |= DIRTY;
        self.pages[idx].data = page;
        Ok(())
    }

    /// Reads `length` bytes starting at `address`, crossing page boundaries
    /// as needed.
    pub fn read_raw(&mut self, address: u64, length: u64) -> Result<Vec<u8>, VmError> {
        let mut buf = Vec::with_capacity(length as usize);
        let mut pn = pde(address);
        let mut off = (address & PAGE_MASK) as usize;
        let mut remaining = length as usize;
        while remaining > 0 {
            self.touch(pn)?;
            let page = &self.pages[pn as usize].data;
            let take = remaining.min(PAGE_SIZE as usize - off);
            buf.extend_from_slice(&page[off..off + take]);
            remaining -= take;
            off = 0;
            pn += 1;
        }
        Ok(buf)
    }

    /// Writes `data` starting at `address`, marking touched pages dirty.
    pub fn write_raw(&mut self, address: u64, data: &[u8]) -> Result<(), VmError> {
        let mut pn = pde(address);
        let mut off = (address & PAGE_MASK) as usize;
        let mut src = data;
        while !src.is_empty() {
            self.touch(pn)?;
            let page = &mut self.pages[pn as usize].data;
            let take = src.len().min(PAGE_SIZE as usize - off);
            page[off..off + take].copy_from_slice(&src[..take]);
            self.pages[pn as usize].flags |= DIRTY;
            src = &src[take..];
            off = 0;
            pn += 1;
        }
        Ok(())
    }

    /// Writes dirty persistent pages back to the store, in parallel, then
    /// drops every resident page. RAM pages are discarded unwritten.
    pub fn flush(&mut self) -> Result<(), VmError> {
        let store = self.store.as_ref();
        let dirty: Vec<u32> = (0..PAGE_COUNT as u32)
            .filter(|&pn| pn >= RAM_PAGE_COUNT && self.pages[pn as usize].flags & DIRTY != 0)
            .collect();
        let pages = &self.pages;
        let results: Vec<Result<(), VmError>> = std::thread::scope(|scope| {
            dirty
                .iter()
                .map(|&pn| scope.spawn(move || store.set(pn, &pages[pn as usize].data)))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().expect("flush worker panicked"))
                .collect()
        });
        for result in results {
            result?;
        }
        for page in self.pages.iter_mut() {
            if page.flags & PRESENT != 0 {
                page.flags = 0;
                page.data = Vec::new();
                self.resident -= 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::MemStore;
    use crate::memory::RAM_LIMIT;

    #[test]
    fn pde_boundaries() {
        assert_eq!(pde(0), 0);
        assert_eq!(pde(PAGE_SIZE - 1), 0);
        assert_eq!(pde(PAGE_SIZE), 1);
        assert_eq!(pde(RAM_LIMIT), RAM_PAGE_COUNT);
    }

    #[test]
    fn flush_persists_flash_not_ram() {
        let mut pager = Pager::new(Box::new(MemStore::new()));
        pager.write_raw(100, b"ram bytes").unwrap();
        pager.write_raw(RAM_LIMIT + 100, b"flash bytes").unwrap();
        pager.flush().unwrap();
        assert_eq!(pager.resident(), 0);
        // flash round-trips through the store, ram comes back zeroed
        assert_eq!(
            pager.read_raw(RAM_LIMIT + 100, 11).unwrap(),
            b"flash bytes"
        );
        assert_eq!(pager.read_raw(100, 9).unwrap(), vec![0u8; 9]);
    }

    #[test]
    fn dirty_only_after_write() {
        let mut pager = Pager::new(Box::new(MemStore::new()));
        pager.read_raw(RAM_LIMIT + 5, 1).unwrap();
        assert_eq!(pager.resident(), 1);
        pager.flush().unwrap();
        assert!(pager.store().get(RAM_PAGE_COUNT).unwrap().is_none());
    }
}
