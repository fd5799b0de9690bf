//! String values.
//!
//! A string header points at an out-of-line array of character cells,
//! each one a full 36-byte char header so indexing can hand out the
//! cell address as an ordinary value. The header's length field packs
//! the character count in the low half and the cell capacity in the
//! high half. Capacity grows in increments of [`DEFAULT_LENGTH`] cells.

use crate::errors::VmError;
use crate::memory::{Memory, Space};

use super::data::{self, Header, Tag, FLAG_EQ, FLAG_GR, FLAG_LE, HEADER_SIZE};

/// Capacity growth increment, in cells.
pub const DEFAULT_LENGTH: u64 = 10;

/// Character count of a string header.
pub fn count(h: &Header) -> u64 {
    h.length & 0xFFFF_FFFF
}

/// Cell capacity of a string header.
pub fn capacity(h: &Header) -> u64 {
    h.length >> 32
}

pub fn pack_length(count: u64, capacity: u64) -> u64 {
    count & 0xFFFF_FFFF | capacity << 32
}

fn cell_address(h: &Header, index: u64) -> u64 {
    h.words[0] + index * HEADER_SIZE
}

fn round_capacity(need: u64) -> u64 {
    need.div_ceil(DEFAULT_LENGTH).max(1) * DEFAULT_LENGTH
}

/// Zeroed char-cell image for `cells` cells.
fn cell_template(cells: u64) -> Vec<u8> {
    let cell = Header::zeroed(Tag::Char).encode();
    let mut out = Vec::with_capacity((cells * HEADER_SIZE) as usize);
    for _ in 0..cells {
        out.extend_from_slice(&cell);
    }
    out
}

/// Allocates a fresh string holding `text` in `space`.
pub fn new_string(mem: &mut Memory, space: Space, text: &str) -> Result<u64, VmError> {
    let address = mem.alloc(space, HEADER_SIZE)?;
    let cap = round_capacity(text.len() as u64);
    let payload = mem.alloc(space, cap * HEADER_SIZE)?;
    mem.write_raw(payload, &cell_template(cap))?;

    let h = Header {
        tag: Tag::String,
        length: pack_length(text.len() as u64, cap),
        words: [payload, 0, 0],
    };
    for (i, byte) in text.bytes().enumerate() {
        let mut cell = Header::zeroed(Tag::Char);
        cell.set_byte(byte);
        data::write_header(mem, cell_address(&h, i as u64), &cell)?;
    }
    data::write_header(mem, address, &h)?;
    Ok(address)
}

/// Reads the textual content of the string at `address`.
pub fn text(mem: &mut Memory, address: u64) -> Result<String, VmError> {
    let h = data::read_header(mem, address)?;
    if !h.tag.is_string() {
        return Err(VmError::TypeError(h.tag.name()));
    }
    let mut out = String::with_capacity(count(&h) as usize);
    for i in 0..count(&h) {
        let cell = data::read_header(mem, cell_address(&h, i))?;
        out.push(cell.byte() as char);
    }
    Ok(out)
}

/// Grows the payload of the string at `address` to hold `need` cells,
/// returning its refreshed header.
fn ensure_capacity(mem: &mut Memory, address: u64, need: u64) -> Result<Header, VmError> {
    let mut h = data::read_header(mem, address)?;
    let cap = capacity(&h);
    if need <= cap && h.words[0] != 0 {
        return Ok(h);
    }
    let new_cap = round_capacity(need);
    let payload = if h.words[0] == 0 {
        mem.alloc(crate::memory::space_of(address)?, new_cap * HEADER_SIZE)?
    } else {
        mem.realloc(h.words[0], cap * HEADER_SIZE, new_cap * HEADER_SIZE)?
    };
    // fresh cells past the old capacity start as zero chars
    let template = cell_template(new_cap - cap);
    mem.write_raw(payload + cap * HEADER_SIZE, &template)?;
    h.words[0] = payload;
    h.length = pack_length(count(&h), new_cap);
    data::write_header(mem, address, &h)?;
    Ok(h)
}

/// Overwrites the string at `dst` with the content of `src`.
pub fn copy(mem: &mut Memory, dst: u64, src: u64) -> Result<(), VmError> {
    let s = data::read_header(mem, src)?;
    let n = count(&s);
    let mut d = ensure_capacity(mem, dst, n)?;
    for i in 0..n {
        let cell = data::read_header(mem, cell_address(&s, i))?;
        data::write_header(mem, cell_address(&d, i), &cell)?;
    }
    d.length = pack_length(n, capacity(&d));
    data::write_header(mem, dst, &d)
}

/// Deep-copies the string at `src` into a fresh allocation in `space`.
pub fn dup(mem: &mut Memory, space: Space, src: u64) -> Result<u64, VmError> {
    let content = text(mem, src)?;
    new_string(mem, space, &content)
}

/// Appends one character to the string at `dst`.
pub fn push_char(mem: &mut Memory, dst: u64, byte: u8) -> Result<(), VmError> {
    let d0 = data::read_header(mem, dst)?;
    let base = count(&d0);
    let mut d = ensure_capacity(mem, dst, base + 1)?;
    let mut cell = Header::zeroed(Tag::Char);
    cell.set_byte(byte);
    data::write_header(mem, cell_address(&d, base), &cell)?;
    d.length = pack_length(base + 1, capacity(&d));
    data::write_header(mem, dst, &d)
}

/// Appends the content of `src` (a char or a string) to the string at `dst`.
pub fn concat(mem: &mut Memory, dst: u64, src: u64) -> Result<(), VmError> {
    let s = data::read_header(mem, src)?;
    if s.tag.is_char() {
        return push_char(mem, dst, s.byte());
    }
    if !s.tag.is_string() {
        return Err(VmError::TypeError(s.tag.name()));
    }
    let extra = count(&s);
    let d0 = data::read_header(mem, dst)?;
    let base = count(&d0);
    let mut d = ensure_capacity(mem, dst, base + extra)?;
    for i in 0..extra {
        let cell = data::read_header(mem, cell_address(&s, i))?;
        data::write_header(mem, cell_address(&d, base + i), &cell)?;
    }
    d.length = pack_length(base + extra, capacity(&d));
    data::write_header(mem, dst, &d)
}

/// Overwrites the string at `dst` with the byte string `s`.
pub fn set_text(mem: &mut Memory, dst: u64, s: &str) -> Result<(), VmError> {
    let mut d = ensure_capacity(mem, dst, s.len() as u64)?;
    for (i, byte) in s.bytes().enumerate() {
        let mut cell = Header::zeroed(Tag::Char);
        cell.set_byte(byte);
        data::write_header(mem, cell_address(&d, i as u64), &cell)?;
    }
    d.length = pack_length(s.len() as u64, capacity(&d));
    data::write_header(mem, dst, &d)
}

/// Truncates the string at `address` to its first `length` characters.
pub fn cut(mem: &mut Memory, address: u64, length: u64) -> Result<(), VmError> {
    let mut h = data::read_header(mem, address)?;
    if !h.tag.is_string() {
        return Err(VmError::TypeError(h.tag.name()));
    }
    if length > count(&h) {
        return Err(VmError::ArgumentError(format!(
            "cut length {} exceeds string of {}",
            length,
            count(&h)
        )));
    }
    h.length = pack_length(length, capacity(&h));
    data::write_header(mem, address, &h)
}

/// Address of the character cell at `index`, usable as a char value.
pub fn char_at(mem: &mut Memory, address: u64, index: u64) -> Result<u64, VmError> {
    let h = data::read_header(mem, address)?;
    if !h.tag.is_string() {
        return Err(VmError::TypeError(h.tag.name()));
    }
    if index >= count(&h) {
        return Err(VmError::ArgumentError(format!(
            "index {} out of {} characters",
            index,
            count(&h)
        )));
    }
    Ok(cell_address(&h, index))
}

/// String comparison: shorter strings order first, equal lengths compare
/// character by character.
pub fn compare(mem: &mut Memory, a: u64, b: u64) -> Result<u64, VmError> {
    let ta = text(mem, a)?;
    let tb = text(mem, b)?;
    let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(&tb));
    Ok(match ord {
        std::cmp::Ordering::Equal => FLAG_EQ,
        std::cmp::Ordering::Less => FLAG_LE,
        std::cmp::Ordering::Greater => FLAG_GR,
    })
}

/// Frees the payload and header of the string at `address`.
pub fn remove(mem: &mut Memory, address: u64) -> Result<(), VmError> {
    clear(mem, address)?;
    mem.free(address)
}

/// Frees the character payload, leaving the header behind.
pub fn clear(mem: &mut Memory, address: u64) -> Result<(), VmError> {
    let h = data::read_header(mem, address)?;
    if h.words[0] != 0 {
        mem.free(h.words[0])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::MemStore;

    fn ram() -> Memory {
        Memory::create(Box::new(MemStore::new())).unwrap()
    }

    #[test]
    fn text_round_trip() {
        let mut mem = ram();
        let s = new_string(&mut mem, Space::Ram, "hello").unwrap();
        assert_eq!(text(&mut mem, s).unwrap(), "hello");
        let h = data::read_header(&mut mem, s).unwrap();
        assert_eq!(count(&h), 5);
        assert_eq!(capacity(&h), DEFAULT_LENGTH);
    }

    #[test]
    fn concat_grows_capacity() {
        let mut mem = ram();
        let a = new_string(&mut mem, Space::Ram, "hello ").unwrap();
        let b = new_string(&mut mem, Space::Ram, "world!").unwrap();
        concat(&mut mem, a, b).unwrap();
        assert_eq!(text(&mut mem, a).unwrap(), "hello world!");
        let h = data::read_header(&mut mem, a).unwrap();
        assert_eq!(count(&h), 12);
        assert_eq!(capacity(&h), 2 * DEFAULT_LENGTH);
    }

    #[test]
    fn cut_truncates_to_prefix() {
        let mut mem = ram();
        let s = new_string(&mut mem, Space::Ram, "contract").unwrap();
        cut(&mut mem, s, 3).unwrap();
        assert_eq!(text(&mut mem, s).unwrap(), "con");
        let h = data::read_header(&mut mem, s).unwrap();
        assert_eq!(count(&h), 3);
        assert!(cut(&mut mem, s, 99).is_err());
    }

    #[test]
    fn push_char_appends() {
        let mut mem = ram();
        let s = new_string(&mut mem, Space::Ram, "ab").unwrap();
        push_char(&mut mem, s, b'c').unwrap();
        assert_eq!(text(&mut mem, s).unwrap(), "abc");
    }

    #[test]
    fn set_text_replaces_content() {
        let mut mem = ram();
        let s = new_string(&mut mem, Space::Ram, "old").unwrap();
        set_text(&mut mem, s, "a considerably longer value").unwrap();
        assert_eq!(text(&mut mem, s).unwrap(), "a considerably longer value");
    }

    #[test]
    fn char_cells_are_values() {
        let mut mem = ram();
        let s = new_string(&mut mem, Space::Ram, "abc").unwrap();
        let cell = char_at(&mut mem, s, 1).unwrap();
        let h = data::read_header(&mut mem, cell).unwrap();
        assert_eq!(h.tag, Tag::Char);
        assert_eq!(h.byte(), b'b');
        assert!(char_at(&mut mem, s, 3).is_err());
    }

    #[test]
    fn compare_orders_by_length_then_chars() {
        let mut mem = ram();
        let a = new_string(&mut mem, Space::Ram, "abc").unwrap();
        let b = new_string(&mut mem, Space::Ram, "abd").unwrap();
        assert_eq!(compare(&mut mem, a, b).unwrap(), FLAG_LE);
        assert_eq!(compare(&mut mem, b, a).unwrap(), FLAG_GR);
        assert_eq!(compare(&mut mem, a, a).unwrap(), FLAG_EQ);

        let z = new_string(&mut mem, Space::Ram, "z").unwrap();
        assert_eq!(compare(&mut mem, z, a).unwrap(), FLAG_LE);
    }

    #[test]
    fn copy_overwrites_longer_content() {
        let mut mem = ram();
        let a = new_string(&mut mem, Space::Ram, "a long starting value").unwrap();
        let b = new_string(&mut mem, Space::Ram, "shorter").unwrap();
        copy(&mut mem, a, b).unwrap();
        assert_eq!(text(&mut mem, a).unwrap(), "shorter");
    }
}
