//! Map values.
//!
//! A map header points at an out-of-line bucket: a 12-byte bucket header
//! (slot count, key type, value type) followed by one u64 chain head per
//! slot. Each chain cell is a 24-byte slot `{next, key, value}` whose key
//! and value are ordinary values owned by the map. The map header's
//! length field is the entry count.
//!
//! Keys hash by summing a fixed byte-permutation table over the key's
//! canonical payload bytes. When the load factor passes four entries per
//! slot the bucket steps to the next prime size and the existing chain
//! cells are relinked in place.

use crate::errors::VmError;
use crate::memory::{space_of, Memory, Space};

use super::data::{self, Header, Tag, FLAG_EQ, HEADER_SIZE};
use super::string;

pub const SLOT_SIZE: u64 = 24;
pub const BUCKET_HEADER_SIZE: u64 = 12;
/// Entries per slot tolerated before growing the bucket.
pub const DEFAULT_CHAIN_LENGTH: u64 = 4;
/// Byte size of a freshly allocated bucket at the smallest prime.
pub const DEFAULT_BUCKET_LENGTH: u64 = BUCKET_HEADER_SIZE + PRIMES[0] as u64 * 8;

/// Bucket sizes, stepped through in order as the map grows.
pub const PRIMES: [u32; 10] = [31, 71, 127, 233, 419, 811, 1597, 3001, 6067, 10007];

/// Byte permutation used by the key hash.
const HASH_TABLE: [u8; 256] = [
    98, 6, 85, 150, 36, 23, 112, 164, 135, 207, 169, 5, 26, 64, 165, 219, //
    61, 20, 68, 89, 130, 63, 52, 102, 24, 229, 132, 245, 80, 216, 195, 115, //
    90, 168, 156, 203, 177, 120, 2, 190, 188, 7, 100, 185, 174, 243, 162, 10, //
    237, 18, 253, 225, 8, 208, 172, 244, 255, 126, 101, 79, 145, 235, 228, 121, //
    123, 251, 67, 250, 161, 0, 107, 97, 241, 111, 181, 82, 249, 33, 69, 55, //
    59, 153, 29, 9, 213, 167, 84, 93, 30, 46, 94, 75, 151, 114, 73, 222, //
    197, 96, 210, 45, 16, 227, 248, 202, 51, 152, 252, 125, 81, 206, 215, 186, //
    39, 158, 178, 187, 131, 136, 1, 49, 50, 17, 141, 91, 47, 129, 60, 99, //
    154, 35, 86, 171, 105, 34, 38, 200, 147, 58, 77, 118, 173, 246, 76, 254, //
    133, 232, 196, 144, 198, 124, 53, 4, 108, 74, 223, 234, 134, 230, 157, 139, //
    189, 205, 199, 128, 176, 19, 211, 236, 127, 192, 231, 70, 233, 88, 146, 44, //
    183, 201, 22, 83, 13, 214, 116, 109, 159, 32, 95, 226, 140, 220, 57, 12, //
    221, 31, 209, 182, 143, 92, 149, 184, 148, 62, 113, 65, 37, 27, 106, 166, //
    3, 14, 204, 72, 21, 41, 56, 66, 28, 193, 40, 217, 25, 54, 179, 117, //
    238, 87, 240, 155, 180, 170, 242, 212, 191, 163, 78, 218, 137, 194, 175, 110, //
    43, 119, 224, 71, 122, 142, 42, 160, 104, 48, 247, 103, 15, 11, 138, 239, //
];

fn hash(bytes: &[u8]) -> u64 {
    bytes.iter().map(|&b| HASH_TABLE[b as usize] as u64).sum()
}

/// In-core image of a map's bucket.
pub struct Bucket {
    pub ktag: Tag,
    pub vtag: Tag,
    pub slots: Vec<u64>,
}

struct Slot {
    next: u64,
    key: u64,
    value: u64,
}

fn read_slot(mem: &mut Memory, off: u64) -> Result<Slot, VmError> {
    let raw = mem.read_raw(off, SLOT_SIZE)?;
    Ok(Slot {
        next: u64::from_le_bytes(raw[0..8].try_into().unwrap()),
        key: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
        value: u64::from_le_bytes(raw[16..24].try_into().unwrap()),
    })
}

fn write_slot(mem: &mut Memory, off: u64, s: &Slot) -> Result<(), VmError> {
    let mut raw = [0u8; SLOT_SIZE as usize];
    raw[0..8].copy_from_slice(&s.next.to_le_bytes());
    raw[8..16].copy_from_slice(&s.key.to_le_bytes());
    raw[16..24].copy_from_slice(&s.value.to_le_bytes());
    mem.write_raw(off, &raw)
}

pub fn read_bucket(mem: &mut Memory, off: u64) -> Result<Bucket, VmError> {
    let head = mem.read_raw(off, BUCKET_HEADER_SIZE)?;
    let size = u32::from_le_bytes(head[0..4].try_into().unwrap());
    let ktag = Tag::try_from(u32::from_le_bytes(head[4..8].try_into().unwrap()))?;
    let vtag = Tag::try_from(u32::from_le_bytes(head[8..12].try_into().unwrap()))?;
    let raw = mem.read_raw(off + BUCKET_HEADER_SIZE, size as u64 * 8)?;
    let slots = raw
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok(Bucket { ktag, vtag, slots })
}

pub fn write_bucket(mem: &mut Memory, off: u64, bk: &Bucket) -> Result<(), VmError> {
    let mut raw = Vec::with_capacity((BUCKET_HEADER_SIZE + bk.slots.len() as u64 * 8) as usize);
    raw.extend_from_slice(&(bk.slots.len() as u32).to_le_bytes());
    raw.extend_from_slice(&(bk.ktag as u32).to_le_bytes());
    raw.extend_from_slice(&(bk.vtag as u32).to_le_bytes());
    for s in &bk.slots {
        raw.extend_from_slice(&s.to_le_bytes());
    }
    mem.write_raw(off, &raw)
}

/// Allocates a fresh empty map in `space` keyed and valued as given.
///
/// Maps may not nest; both types must be scalar or string.
pub fn new_map(mem: &mut Memory, space: Space, ktag: Tag, vtag: Tag) -> Result<u64, VmError> {
    if ktag == Tag::Map || vtag == Tag::Map {
        return Err(VmError::TypeError("map"));
    }
    let address = mem.alloc(space, HEADER_SIZE)?;
    let bucket = mem.alloc(space, DEFAULT_BUCKET_LENGTH)?;
    write_bucket(
        mem,
        bucket,
        &Bucket {
            ktag,
            vtag,
            slots: vec![0; PRIMES[0] as usize],
        },
    )?;
    data::write_header(
        mem,
        address,
        &Header {
            tag: Tag::Map,
            length: 0,
            words: [bucket, 0, 0],
        },
    )?;
    Ok(address)
}

/// Canonical payload bytes of a key, identical for literal and concrete
/// forms of the same value.
fn key_bytes(mem: &mut Memory, key: u64) -> Result<Vec<u8>, VmError> {
    let h = data::read_header(mem, key)?;
    Ok(match h.tag {
        t if t.is_string() => string::text(mem, key)?.into_bytes(),
        t if t.is_integer() => h.int().to_le_bytes().to_vec(),
        t if t.is_float() => h.float().to_bits().to_le_bytes().to_vec(),
        Tag::Map => return Err(VmError::TypeError("map")),
        _ => vec![h.byte()],
    })
}

/// Looks up `key`, returning the address of the stored value.
pub fn find(mem: &mut Memory, address: u64, key: u64) -> Result<Option<u64>, VmError> {
    let h = data::read_header(mem, address)?;
    let bk = read_bucket(mem, h.words[0])?;
    let kb = key_bytes(mem, key)?;
    let mut off = bk.slots[(hash(&kb) % bk.slots.len() as u64) as usize];
    while off != 0 {
        let slot = read_slot(mem, off)?;
        if data::compare(mem, key, slot.key)? == FLAG_EQ {
            return Ok(Some(slot.value));
        }
        off = slot.next;
    }
    Ok(None)
}

/// The `index`-th entry in bucket traversal order, as (key, value).
pub fn find_by_index(mem: &mut Memory, address: u64, index: u64) -> Result<(u64, u64), VmError> {
    let h = data::read_header(mem, address)?;
    if index >= h.length {
        return Err(VmError::NotFound);
    }
    let bk = read_bucket(mem, h.words[0])?;
    let mut count = 0u64;
    for i in 0..bk.slots.len() {
        let mut off = bk.slots[i];
        while off != 0 {
            let slot = read_slot(mem, off)?;
            if count == index {
                return Ok((slot.key, slot.value));
            }
            count += 1;
            off = slot.next;
        }
    }
    Err(VmError::NotFound)
}

/// Deep-copies the value at `src` into a fresh allocation carrying the
/// map's declared concrete tag.
fn dup_as(mem: &mut Memory, space: Space, src: u64, tag: Tag) -> Result<u64, VmError> {
    let s = data::read_header(mem, src)?;
    if tag.is_string() {
        return string::dup(mem, space, src);
    }
    let mut out = Header::zeroed(tag);
    if tag.is_integer() {
        let v = s.int();
        data::check_int(tag, v)?;
        out.set_int(v);
    } else if tag.is_float() {
        let v = s.float();
        data::check_float(tag, v)?;
        out.set_float(v);
    } else {
        out.set_byte(s.byte());
    }
    let address = mem.alloc(space, HEADER_SIZE)?;
    data::write_header(mem, address, &out)?;
    Ok(address)
}

/// Grows the bucket to `size` slots, relinking the existing chain cells.
fn rehash(mem: &mut Memory, address: u64, size: u32) -> Result<(), VmError> {
    let mut h = data::read_header(mem, address)?;
    let old = read_bucket(mem, h.words[0])?;
    if size as usize <= old.slots.len() {
        return Ok(());
    }
    let space = space_of(h.words[0])?;
    let bucket = mem.alloc(space, BUCKET_HEADER_SIZE + size as u64 * 8)?;
    let mut bk = Bucket {
        ktag: old.ktag,
        vtag: old.vtag,
        slots: vec![0; size as usize],
    };
    for i in 0..old.slots.len() {
        let mut off = old.slots[i];
        while off != 0 {
            let mut slot = read_slot(mem, off)?;
            let next = slot.next;
            let kb = key_bytes(mem, slot.key)?;
            let si = (hash(&kb) % size as u64) as usize;
            slot.next = bk.slots[si];
            bk.slots[si] = off;
            write_slot(mem, off, &slot)?;
            off = next;
        }
    }
    write_bucket(mem, bucket, &bk)?;
    mem.free(h.words[0])?;
    h.words[0] = bucket;
    data::write_header(mem, address, &h)
}

/// Binds `key` to `value`, overwriting the stored value when the key is
/// already present. Key and value are deep-copied into the map's space.
pub fn insert(mem: &mut Memory, address: u64, key: u64, value: u64) -> Result<(), VmError> {
    if let Some(existing) = find(mem, address, key)? {
        return data::move_value(mem, existing, value);
    }
    let mut h = data::read_header(mem, address)?;
    let mut bk = read_bucket(mem, h.words[0])?;
    let k = data::read_header(mem, key)?;
    let v = data::read_header(mem, value)?;
    if !data::assignable(bk.ktag, k.tag) {
        return Err(VmError::TypeError(bk.ktag.name()));
    }
    if !data::assignable(bk.vtag, v.tag) {
        return Err(VmError::TypeError(bk.vtag.name()));
    }

    if h.length / (bk.slots.len() as u64 * DEFAULT_CHAIN_LENGTH) > 1 {
        let current = bk.slots.len() as u32;
        if let Some(i) = PRIMES.iter().position(|&p| p == current) {
            if i + 1 < PRIMES.len() {
                rehash(mem, address, PRIMES[i + 1])?;
                h = data::read_header(mem, address)?;
                bk = read_bucket(mem, h.words[0])?;
            }
        }
    }

    let space = space_of(h.words[0])?;
    let nk = dup_as(mem, space, key, bk.ktag)?;
    let nv = match dup_as(mem, space, value, bk.vtag) {
        Ok(nv) => nv,
        Err(e) => {
            data::remove(mem, nk)?;
            return Err(e);
        }
    };
    let off = mem.alloc(space, SLOT_SIZE)?;
    let kb = key_bytes(mem, key)?;
    let si = (hash(&kb) % bk.slots.len() as u64) as usize;
    write_slot(
        mem,
        off,
        &Slot {
            next: bk.slots[si],
            key: nk,
            value: nv,
        },
    )?;
    bk.slots[si] = off;
    write_bucket(mem, h.words[0], &bk)?;
    h.length += 1;
    data::write_header(mem, address, &h)
}

/// Removes the entry for `key`, failing when it is absent.
pub fn delete(mem: &mut Memory, address: u64, key: u64) -> Result<(), VmError> {
    let mut h = data::read_header(mem, address)?;
    let mut bk = read_bucket(mem, h.words[0])?;
    let kb = key_bytes(mem, key)?;
    let si = (hash(&kb) % bk.slots.len() as u64) as usize;
    let mut prev: Option<(u64, Slot)> = None;
    let mut off = bk.slots[si];
    while off != 0 {
        let slot = read_slot(mem, off)?;
        if data::compare(mem, key, slot.key)? == FLAG_EQ {
            data::remove(mem, slot.key)?;
            data::remove(mem, slot.value)?;
            mem.free(off)?;
            match prev {
                Some((poff, mut pslot)) => {
                    pslot.next = slot.next;
                    write_slot(mem, poff, &pslot)?;
                }
                None => {
                    bk.slots[si] = slot.next;
                    write_bucket(mem, h.words[0], &bk)?;
                }
            }
            h.length -= 1;
            return data::write_header(mem, address, &h);
        }
        let next = slot.next;
        prev = Some((off, slot));
        off = next;
    }
    Err(VmError::NotFound)
}

/// Order-independent equality of two maps.
pub fn equal(mem: &mut Memory, a: u64, b: u64) -> Result<bool, VmError> {
    let ha = data::read_header(mem, a)?;
    let hb = data::read_header(mem, b)?;
    let ba = read_bucket(mem, ha.words[0])?;
    let bb = read_bucket(mem, hb.words[0])?;
    if ba.ktag != bb.ktag || ba.vtag != bb.vtag || ha.length != hb.length {
        return Ok(false);
    }
    for i in 0..ha.length {
        let (k, v) = find_by_index(mem, a, i)?;
        match find(mem, b, k)? {
            Some(other) => {
                if data::compare(mem, v, other)? != FLAG_EQ {
                    return Ok(false);
                }
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Frees every entry and the bucket, leaving the header untouched.
pub fn clear(mem: &mut Memory, address: u64) -> Result<(), VmError> {
    let h = data::read_header(mem, address)?;
    let bk = read_bucket(mem, h.words[0])?;
    for i in 0..bk.slots.len() {
        let mut off = bk.slots[i];
        while off != 0 {
            let slot = read_slot(mem, off)?;
            data::remove(mem, slot.key)?;
            data::remove(mem, slot.value)?;
            mem.free(off)?;
            off = slot.next;
        }
    }
    mem.free(h.words[0])
}

/// Overwrites the map at `dst` with deep copies of the entries of `src`.
pub fn copy(mem: &mut Memory, dst: u64, src: u64) -> Result<(), VmError> {
    let hd = data::read_header(mem, dst)?;
    let hs = data::read_header(mem, src)?;
    let bd = read_bucket(mem, hd.words[0])?;
    let bs = read_bucket(mem, hs.words[0])?;
    if bd.ktag != bs.ktag || bd.vtag != bs.vtag {
        return Err(VmError::TypeError(bd.ktag.name()));
    }
    clear(mem, dst)?;
    let space = space_of(dst)?;
    let bucket = mem.alloc(space, DEFAULT_BUCKET_LENGTH)?;
    write_bucket(
        mem,
        bucket,
        &Bucket {
            ktag: bd.ktag,
            vtag: bd.vtag,
            slots: vec![0; PRIMES[0] as usize],
        },
    )?;
    data::write_header(
        mem,
        dst,
        &Header {
            tag: Tag::Map,
            length: 0,
            words: [bucket, 0, 0],
        },
    )?;
    for i in 0..hs.length {
        let (k, v) = find_by_index(mem, src, i)?;
        insert(mem, dst, k, v)?;
    }
    Ok(())
}

/// Deep-copies the map at `src` into a fresh allocation in `space`.
pub fn dup(mem: &mut Memory, space: Space, src: u64) -> Result<u64, VmError> {
    let h = data::read_header(mem, src)?;
    let bk = read_bucket(mem, h.words[0])?;
    let address = new_map(mem, space, bk.ktag, bk.vtag)?;
    for i in 0..h.length {
        let (k, v) = find_by_index(mem, src, i)?;
        insert(mem, address, k, v)?;
    }
    Ok(address)
}

/// Frees the map's entries, bucket and header.
pub fn remove(mem: &mut Memory, address: u64) -> Result<(), VmError> {
    clear(mem, address)?;
    mem.free(address)
}

/// Renders a map as `{key: value, ...}` in traversal order.
pub fn render(mem: &mut Memory, address: u64) -> Result<String, VmError> {
    let h = data::read_header(mem, address)?;
    let mut out = String::from("{");
    for i in 0..h.length {
        let (k, v) = find_by_index(mem, address, i)?;
        let hk = data::read_header(mem, k)?;
        let hv = data::read_header(mem, v)?;
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&data::render_bare(mem, k, &hk)?);
        out.push_str(": ");
        out.push_str(&data::render_bare(mem, v, &hv)?);
    }
    out.push('}');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::MemStore;

    fn ram() -> Memory {
        Memory::create(Box::new(MemStore::new())).unwrap()
    }

    fn int_value(mem: &mut Memory, tag: Tag, v: i128) -> u64 {
        let address = data::new_scalar(mem, Space::Ram, tag).unwrap();
        let mut h = data::read_header(mem, address).unwrap();
        h.set_int(v);
        data::write_header(mem, address, &h).unwrap();
        address
    }

    #[test]
    fn insert_find_delete() {
        let mut mem = ram();
        let m = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int64).unwrap();
        let k = int_value(&mut mem, Tag::Int32, 7);
        let v = int_value(&mut mem, Tag::Int64, 700);
        insert(&mut mem, m, k, v).unwrap();

        let got = find(&mut mem, m, k).unwrap().unwrap();
        assert_eq!(data::read_header(&mut mem, got).unwrap().int(), 700);
        assert_eq!(data::read_header(&mut mem, m).unwrap().length, 1);

        delete(&mut mem, m, k).unwrap();
        assert!(find(&mut mem, m, k).unwrap().is_none());
        assert!(matches!(delete(&mut mem, m, k), Err(VmError::NotFound)));
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let mut mem = ram();
        let m = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int64).unwrap();
        let k = int_value(&mut mem, Tag::Int32, 1);
        let v1 = int_value(&mut mem, Tag::Int64, 10);
        let v2 = int_value(&mut mem, Tag::Int64, 20);
        insert(&mut mem, m, k, v1).unwrap();
        insert(&mut mem, m, k, v2).unwrap();
        assert_eq!(data::read_header(&mut mem, m).unwrap().length, 1);
        let got = find(&mut mem, m, k).unwrap().unwrap();
        assert_eq!(data::read_header(&mut mem, got).unwrap().int(), 20);
    }

    #[test]
    fn literal_keys_match_concrete_keys() {
        let mut mem = ram();
        let m = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        let k = int_value(&mut mem, Tag::Int32, 9);
        let v = int_value(&mut mem, Tag::Int32, 90);
        insert(&mut mem, m, k, v).unwrap();

        let lit = int_value(&mut mem, Tag::ConstInt, 9);
        let got = find(&mut mem, m, lit).unwrap().unwrap();
        assert_eq!(data::read_header(&mut mem, got).unwrap().int(), 90);
    }

    #[test]
    fn insert_rejects_wrong_types() {
        let mut mem = ram();
        let m = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        let k = data::new_scalar(&mut mem, Space::Ram, Tag::Bool).unwrap();
        let v = int_value(&mut mem, Tag::Int32, 1);
        assert!(matches!(
            insert(&mut mem, m, k, v),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn rehash_retains_entries() {
        let mut mem = ram();
        let m = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        // past two full chains per slot at the smallest bucket size
        let n = PRIMES[0] as i128 * 2 * DEFAULT_CHAIN_LENGTH as i128 + 10;
        for i in 0..n {
            let k = int_value(&mut mem, Tag::Int32, i);
            let v = int_value(&mut mem, Tag::Int32, i * 2);
            insert(&mut mem, m, k, v).unwrap();
        }
        let h = data::read_header(&mut mem, m).unwrap();
        assert_eq!(h.length, n as u64);
        let bk = read_bucket(&mut mem, h.words[0]).unwrap();
        assert_eq!(bk.slots.len(), PRIMES[1] as usize);
        for i in 0..n {
            let k = int_value(&mut mem, Tag::Int32, i);
            let got = find(&mut mem, m, k).unwrap().unwrap();
            assert_eq!(data::read_header(&mut mem, got).unwrap().int(), i * 2);
        }
    }

    #[test]
    fn equality_ignores_order() {
        let mut mem = ram();
        let a = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        let b = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        for i in 0..5 {
            let k = int_value(&mut mem, Tag::Int32, i);
            let v = int_value(&mut mem, Tag::Int32, i + 100);
            insert(&mut mem, a, k, v).unwrap();
        }
        for i in (0..5).rev() {
            let k = int_value(&mut mem, Tag::Int32, i);
            let v = int_value(&mut mem, Tag::Int32, i + 100);
            insert(&mut mem, b, k, v).unwrap();
        }
        assert!(equal(&mut mem, a, b).unwrap());

        let k = int_value(&mut mem, Tag::Int32, 3);
        delete(&mut mem, a, k).unwrap();
        assert!(!equal(&mut mem, a, b).unwrap());
    }

    #[test]
    fn copy_replaces_content() {
        let mut mem = ram();
        let a = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        let b = new_map(&mut mem, Space::Ram, Tag::Int32, Tag::Int32).unwrap();
        for i in 0..3 {
            let k = int_value(&mut mem, Tag::Int32, i);
            let v = int_value(&mut mem, Tag::Int32, i * 10);
            insert(&mut mem, b, k, v).unwrap();
        }
        let stale_k = int_value(&mut mem, Tag::Int32, 99);
        let stale_v = int_value(&mut mem, Tag::Int32, 1);
        insert(&mut mem, a, stale_k, stale_v).unwrap();

        copy(&mut mem, a, b).unwrap();
        assert!(equal(&mut mem, a, b).unwrap());
        assert!(find(&mut mem, a, stale_k).unwrap().is_none());
    }
}
