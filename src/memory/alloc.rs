//! First-fit free-list allocation.
//!
//! Each space threads a singly-linked list of free blocks through 16-byte
//! headers `{next, size}` stored in front of each block's data region. The
//! RAM list head sits just past the reserved region; the FLASH list head is
//! the sentry at the bottom of the FLASH range.

use crate::errors::VmError;
use crate::memory::paging::Pager;
use crate::memory::{Space, MEM_HEADER_SIZE, RAM_LIMIT};

#[derive(Debug, Clone, Copy, Default)]
struct BlockHeader {
    next: u64,
    size: u64,
}

impl BlockHeader {
    fn decode(buf: &[u8]) -> Result<Self, VmError> {
        if buf.len() < MEM_HEADER_SIZE as usize {
            return Err(VmError::BadValue("short block header".into()));
        }
        Ok(Self {
            next: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }

    fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.next.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }
}

fn read_header(pager: &mut Pager, offset: u64) -> Result<BlockHeader, VmError> {
    BlockHeader::decode(&pager.read_raw(offset, MEM_HEADER_SIZE)?)
}

fn write_header(pager: &mut Pager, offset: u64, h: &BlockHeader) -> Result<(), VmError> {
    pager.write_raw(offset, &h.encode())
}

/// Offset of a space's free-list head header.
fn list_head(reserved: u64, space: Space) -> u64 {
    match space {
        Space::Ram => reserved,
        Space::Flash => RAM_LIMIT,
    }
}

/// First-fit allocation. A free block within one header of the requested
/// size is consumed whole; larger blocks are split from their tail.
pub fn alloc(pager: &mut Pager, reserved: u64, space: Space, size: u64) -> Result<u64, VmError> {
    if size == 0 {
        return Ok(0);
    }
    let mut offset = list_head(reserved, space);
    let mut prev_offset;
    let mut prev = BlockHeader::default();
    let mut h = BlockHeader::default();
    loop {
        prev = h;
        prev_offset = offset;
        h = read_header(pager, offset)?;
        if h.size >= size && h.size <= size + MEM_HEADER_SIZE {
            // close enough: unlink the whole block
            prev.next = h.next;
            write_header(pager, prev_offset, &prev)?;
            return Ok(offset + MEM_HEADER_SIZE);
        }
        if h.size > size + MEM_HEADER_SIZE {
            h.size -= size + MEM_HEADER_SIZE;
            write_header(pager, offset, &h)?;
            let block = offset + h.size + MEM_HEADER_SIZE;
            write_header(pager, block, &BlockHeader { next: 0, size })?;
            return Ok(block + MEM_HEADER_SIZE);
        }
        offset = h.next;
        if offset == 0 {
            return Err(VmError::OutOfMemory);
        }
    }
}

/// Returns a block to its space's free list, coalescing with the preceding
/// free block when adjacent and with the following one when contiguous.
pub fn free(pager: &mut Pager, reserved: u64, address: u64) -> Result<(), VmError> {
    let head = if address >= RAM_LIMIT {
        list_head(reserved, Space::Flash)
    } else {
        list_head(reserved, Space::Ram)
    };

    // find the free block preceding the address
    let mut offset = head;
    let mut h;
    loop {
        h = read_header(pager, offset)?;
        if address >= offset + MEM_HEADER_SIZE + h.size && (h.next == 0 || address < h.next) {
            break;
        }
        offset = h.next;
        if offset == 0 {
            return Err(VmError::IllegalAddress(address));
        }
    }

    let mut freed = read_header(pager, address - MEM_HEADER_SIZE)?;
    if offset != head && offset + h.size + MEM_HEADER_SIZE == address - MEM_HEADER_SIZE {
        // merge into the adjacent predecessor
        if address + freed.size == h.next {
            let next = read_header(pager, h.next)?;
            h.next = next.next;
            h.size += MEM_HEADER_SIZE + freed.size + next.size + MEM_HEADER_SIZE;
        } else {
            h.size += MEM_HEADER_SIZE + freed.size;
        }
        write_header(pager, offset, &h)?;
    } else {
        if address + freed.size == h.next {
            let next = read_header(pager, h.next)?;
            freed.next = next.next;
            freed.size += next.size + MEM_HEADER_SIZE;
        } else {
            freed.next = h.next;
        }
        h.next = address - MEM_HEADER_SIZE;
        write_header(pager, offset, &h)?;
        write_header(pager, address - MEM_HEADER_SIZE, &freed)?;
    }
    Ok(())
}

/// Grows (or keeps) an allocation. A block already large enough is kept in
/// place; otherwise a fresh block is allocated in the same space, the first
/// `old_size` bytes copied over, and the old block freed.
pub fn realloc(
    pager: &mut Pager,
    reserved: u64,
    address: u64,
    old_size: u64,
    new_size: u64,
) -> Result<u64, VmError> {
    let h = read_header(pager, address - MEM_HEADER_SIZE)?;
    if h.size >= new_size {
        return Ok(address);
    }
    let mut data = pager.read_raw(address, old_size)?;
    let space = if address >= RAM_LIMIT {
        Space::Flash
    } else {
        Space::Ram
    };
    let new_addr = alloc(pager, reserved, space, new_size)?;
    data.resize(new_size as usize, 0);
    pager.write_raw(new_addr, &data)?;
    free(pager, reserved, address)?;
    Ok(new_addr)
}

#[cfg(test)]
mod tests {
    use crate::memory::store::MemStore;
    use crate::memory::{Memory, Space, RAM_LIMIT};

    fn fresh() -> Memory {
        Memory::create(Box::new(MemStore::new())).unwrap()
    }

    #[test]
    fn alloc_zero_is_null() {
        let mut mem = fresh();
        assert_eq!(mem.alloc(Space::Ram, 0).unwrap(), 0);
    }

    #[test]
    fn alloc_spaces_are_disjoint() {
        let mut mem = fresh();
        let ram = mem.alloc(Space::Ram, 64).unwrap();
        let flash = mem.alloc(Space::Flash, 64).unwrap();
        assert!(ram < RAM_LIMIT);
        assert!(flash >= RAM_LIMIT);
    }

    #[test]
    fn free_then_realloc_reuses_space() {
        let mut mem = fresh();
        let a = mem.alloc(Space::Ram, 128).unwrap();
        mem.free(a).unwrap();
        let b = mem.alloc(Space::Ram, 128).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn free_coalesces_neighbors() {
        let mut mem = fresh();
        let a = mem.alloc(Space::Ram, 100).unwrap();
        let b = mem.alloc(Space::Ram, 100).unwrap();
        let c = mem.alloc(Space::Ram, 100).unwrap();
        mem.free(b).unwrap();
        mem.free(a).unwrap();
        mem.free(c).unwrap();
        // after full coalescing a request larger than any single fragment fits
        let big = mem.alloc(Space::Ram, 280).unwrap();
        assert!(big > 0);
    }

    #[test]
    fn free_unknown_address_fails() {
        let mut mem = fresh();
        mem.alloc(Space::Ram, 64).unwrap();
        assert!(mem.free(3).is_err());
    }

    #[test]
    fn realloc_preserves_contents() {
        let mut mem = fresh();
        let a = mem.alloc(Space::Ram, 32).unwrap();
        mem.write_raw(a, &[9u8; 32]).unwrap();
        let b = mem.realloc(a, 32, 256).unwrap();
        assert_eq!(mem.read_raw(b, 32).unwrap(), vec![9u8; 32]);
    }

    #[test]
    fn realloc_in_place_when_big_enough() {
        let mut mem = fresh();
        let a = mem.alloc(Space::Ram, 64).unwrap();
        assert_eq!(mem.realloc(a, 64, 32).unwrap(), a);
    }
}
