//! Typed values.
//!
//! Every runtime value is a 36-byte header stored in managed memory:
//! a type tag, a length field and three payload words. Scalars live
//! entirely inside the payload words; strings and maps keep their
//! payload out of line and store its address in word 0.
//!
//! Integers are held as two's-complement 128-bit numbers spread over the
//! payload words, floats as IEEE 754 double bits in word 0. Width limits
//! are enforced when a value is written, not when it is read.

use crate::errors::VmError;
use crate::memory::{space_of, Memory, Space};

use super::{map, string};

/// Size of a value header in bytes.
pub const HEADER_SIZE: u64 = 36;

/// Comparison flag: operands were equal.
pub const FLAG_EQ: u64 = 0x01;
/// Comparison flag: left operand was smaller.
pub const FLAG_LE: u64 = 0x02;
/// Comparison flag: left operand was greater.
pub const FLAG_GR: u64 = 0x04;

/// Value type tags as stored in headers and object files.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Tag {
    Map = 0,
    Bool = 1,
    Char = 2,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Uint8 = 7,
    Uint16 = 8,
    Uint32 = 9,
    Uint64 = 10,
    String = 11,
    Float32 = 12,
    Float64 = 13,
    ConstInt = 14,
    ConstChar = 15,
    ConstBool = 16,
    ConstFloat = 17,
    ConstString = 18,
}

impl TryFrom<u32> for Tag {
    type Error = VmError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Tag::Map,
            1 => Tag::Bool,
            2 => Tag::Char,
            3 => Tag::Int8,
            4 => Tag::Int16,
            5 => Tag::Int32,
            6 => Tag::Int64,
            7 => Tag::Uint8,
            8 => Tag::Uint16,
            9 => Tag::Uint32,
            10 => Tag::Uint64,
            11 => Tag::String,
            12 => Tag::Float32,
            13 => Tag::Float64,
            14 => Tag::ConstInt,
            15 => Tag::ConstChar,
            16 => Tag::ConstBool,
            17 => Tag::ConstFloat,
            18 => Tag::ConstString,
            _ => return Err(VmError::BadValue(format!("type tag {}", value))),
        })
    }
}

impl Tag {
    /// Payload byte width of a scalar, 0 for out-of-line payloads.
    pub const fn scalar_size(&self) -> u64 {
        match self {
            Tag::Map | Tag::String | Tag::ConstString => 0,
            Tag::Bool | Tag::Char | Tag::Int8 | Tag::Uint8 => 1,
            Tag::ConstChar | Tag::ConstBool => 1,
            Tag::Int16 | Tag::Uint16 => 2,
            Tag::Int32 | Tag::Uint32 | Tag::Float32 => 4,
            Tag::Int64 | Tag::Uint64 | Tag::Float64 => 8,
            Tag::ConstInt | Tag::ConstFloat => 8,
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Tag::Int8
                | Tag::Int16
                | Tag::Int32
                | Tag::Int64
                | Tag::Uint8
                | Tag::Uint16
                | Tag::Uint32
                | Tag::Uint64
                | Tag::ConstInt
        )
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Tag::Float32 | Tag::Float64 | Tag::ConstFloat)
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Tag::String | Tag::ConstString)
    }

    pub const fn is_char(&self) -> bool {
        matches!(self, Tag::Char | Tag::ConstChar)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Tag::Bool | Tag::ConstBool)
    }

    pub const fn is_const(&self) -> bool {
        matches!(
            self,
            Tag::ConstInt | Tag::ConstChar | Tag::ConstBool | Tag::ConstFloat | Tag::ConstString
        )
    }

    /// Inclusive value range of an integer tag.
    pub const fn int_bounds(&self) -> (i128, i128) {
        match self {
            Tag::Int8 => (i8::MIN as i128, i8::MAX as i128),
            Tag::Int16 => (i16::MIN as i128, i16::MAX as i128),
            Tag::Int32 => (i32::MIN as i128, i32::MAX as i128),
            Tag::Int64 => (i64::MIN as i128, i64::MAX as i128),
            Tag::Uint8 => (0, u8::MAX as i128),
            Tag::Uint16 => (0, u16::MAX as i128),
            Tag::Uint32 => (0, u32::MAX as i128),
            Tag::Uint64 => (0, u64::MAX as i128),
            // Literals cover the full span of both signed and unsigned
            // 64-bit values until they are bound to a concrete width.
            _ => (i64::MIN as i128, u64::MAX as i128),
        }
    }

    /// Name used when rendering values and reporting type errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Tag::Map => "map",
            Tag::Bool | Tag::ConstBool => "bool",
            Tag::Char | Tag::ConstChar => "char",
            Tag::Int8 => "int8",
            Tag::Int16 => "int16",
            Tag::Int32 => "int32",
            Tag::Int64 => "int64",
            Tag::Uint8 => "uint8",
            Tag::Uint16 => "uint16",
            Tag::Uint32 => "uint32",
            Tag::Uint64 => "uint64",
            Tag::String | Tag::ConstString => "string",
            Tag::Float32 => "float32",
            Tag::Float64 => "float64",
            Tag::ConstInt => "int",
            Tag::ConstFloat => "float",
        }
    }
}

/// A decoded value header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub tag: Tag,
    pub length: u64,
    pub words: [u64; 3],
}

impl Header {
    /// Fresh zero value of a scalar type.
    pub fn zeroed(tag: Tag) -> Self {
        Header {
            tag,
            length: tag.scalar_size(),
            words: [0; 3],
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&(self.tag as u32).to_le_bytes());
        out[4..12].copy_from_slice(&self.length.to_le_bytes());
        out[12..20].copy_from_slice(&self.words[0].to_le_bytes());
        out[20..28].copy_from_slice(&self.words[1].to_le_bytes());
        out[28..36].copy_from_slice(&self.words[2].to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, VmError> {
        if raw.len() < HEADER_SIZE as usize {
            return Err(VmError::BadValue(format!("header of {} bytes", raw.len())));
        }
        let tag = Tag::try_from(u32::from_le_bytes(raw[0..4].try_into().unwrap()))?;
        Ok(Header {
            tag,
            length: u64::from_le_bytes(raw[4..12].try_into().unwrap()),
            words: [
                u64::from_le_bytes(raw[12..20].try_into().unwrap()),
                u64::from_le_bytes(raw[20..28].try_into().unwrap()),
                u64::from_le_bytes(raw[28..36].try_into().unwrap()),
            ],
        })
    }

    /// Integer payload as a two's-complement 128-bit number.
    pub fn int(&self) -> i128 {
        (self.words[0] as u128 | (self.words[1] as u128) << 64) as i128
    }

    pub fn set_int(&mut self, v: i128) {
        self.words[0] = v as u64;
        self.words[1] = (v >> 64) as u64;
        self.words[2] = if v < 0 { u64::MAX } else { 0 };
    }

    /// Float payload held as IEEE 754 double bits in word 0.
    pub fn float(&self) -> f64 {
        f64::from_bits(self.words[0])
    }

    pub fn set_float(&mut self, v: f64) {
        self.words[0] = v.to_bits();
        self.words[1] = 0;
        self.words[2] = 0;
    }

    /// Single-byte payload of bool and char values.
    pub fn byte(&self) -> u8 {
        self.words[0] as u8
    }

    pub fn set_byte(&mut self, v: u8) {
        self.words = [v as u64, 0, 0];
    }
}

/// Rejects an integer outside the range of `tag`.
pub fn check_int(tag: Tag, v: i128) -> Result<(), VmError> {
    let (lo, hi) = tag.int_bounds();
    if v < lo || v > hi {
        return Err(VmError::Overflow(tag.name()));
    }
    Ok(())
}

/// Rejects a float outside the range of `tag`.
pub fn check_float(tag: Tag, v: f64) -> Result<(), VmError> {
    if !v.is_finite() {
        return Err(VmError::Overflow(tag.name()));
    }
    if tag == Tag::Float32 && v.abs() > f32::MAX as f64 {
        return Err(VmError::Overflow(tag.name()));
    }
    Ok(())
}

pub fn read_header(mem: &mut Memory, address: u64) -> Result<Header, VmError> {
    let raw = mem.read_raw(address, HEADER_SIZE)?;
    Header::decode(&raw)
}

pub fn write_header(mem: &mut Memory, address: u64, header: &Header) -> Result<(), VmError> {
    mem.write_raw(address, &header.encode())
}

/// Allocates a fresh zero scalar of `tag` in `space`.
pub fn new_scalar(mem: &mut Memory, space: Space, tag: Tag) -> Result<u64, VmError> {
    let address = mem.alloc(space, HEADER_SIZE)?;
    write_header(mem, address, &Header::zeroed(tag))?;
    Ok(address)
}

/// Whether a value of `src` may be assigned into a slot of `dst`.
///
/// Assignment requires identical tags, except that a literal may flow
/// into any concrete type of its family and vice versa.
pub fn assignable(dst: Tag, src: Tag) -> bool {
    if dst == src {
        return true;
    }
    let loose = dst.is_const() || src.is_const();
    loose
        && ((dst.is_integer() && src.is_integer())
            || (dst.is_float() && src.is_float())
            || (dst.is_char() && src.is_char())
            || (dst.is_bool() && src.is_bool())
            || (dst.is_string() && src.is_string()))
}

/// Whether values of the two tags may be compared.
pub fn comparable(a: Tag, b: Tag) -> bool {
    (a.is_integer() && b.is_integer())
        || (a.is_float() && b.is_float())
        || (a.is_char() && b.is_char())
        || (a.is_bool() && b.is_bool())
        || (a.is_string() && b.is_string())
        || (a == Tag::Map && b == Tag::Map)
}

/// Assigns the value at `src` into the value at `dst`.
///
/// Scalar payloads are range-checked against the destination type;
/// string and map payloads are deep-copied.
pub fn move_value(mem: &mut Memory, dst: u64, src: u64) -> Result<(), VmError> {
    if dst == src {
        return Ok(());
    }
    let d = read_header(mem, dst)?;
    let s = read_header(mem, src)?;
    if !assignable(d.tag, s.tag) {
        return Err(VmError::TypeError(d.tag.name()));
    }
    if d.tag.is_string() {
        return string::copy(mem, dst, src);
    }
    match d.tag {
        Tag::Map => map::copy(mem, dst, src),
        _ => {
            let mut out = d;
            if d.tag.is_integer() {
                let v = s.int();
                check_int(d.tag, v)?;
                out.set_int(v);
            } else if d.tag.is_float() {
                let v = s.float();
                check_float(d.tag, v)?;
                out.set_float(v);
            } else {
                out.set_byte(s.byte());
            }
            write_header(mem, dst, &out)
        }
    }
}

/// Compares the values at `a` and `b`, yielding a flag word.
pub fn compare(mem: &mut Memory, a: u64, b: u64) -> Result<u64, VmError> {
    let ha = read_header(mem, a)?;
    let hb = read_header(mem, b)?;
    if !comparable(ha.tag, hb.tag) {
        return Err(VmError::TypeError(ha.tag.name()));
    }
    if ha.tag == Tag::Map {
        return Ok(if map::equal(mem, a, b)? { FLAG_EQ } else { FLAG_GR });
    }
    if ha.tag.is_string() {
        return string::compare(mem, a, b);
    }
    let ord = if ha.tag.is_integer() {
        ha.int().cmp(&hb.int())
    } else if ha.tag.is_float() {
        ha.float()
            .partial_cmp(&hb.float())
            .ok_or_else(|| VmError::BadValue("float comparison with nan".into()))?
    } else {
        ha.byte().cmp(&hb.byte())
    };
    Ok(match ord {
        std::cmp::Ordering::Equal => FLAG_EQ,
        std::cmp::Ordering::Less => FLAG_LE,
        std::cmp::Ordering::Greater => FLAG_GR,
    })
}

/// Element count of strings and maps, byte width of scalars.
pub fn size_of(mem: &mut Memory, address: u64) -> Result<u64, VmError> {
    let h = read_header(mem, address)?;
    Ok(match h.tag {
        Tag::Map => h.length,
        t if t.is_string() => string::count(&h),
        t => t.scalar_size(),
    })
}

/// Deep-copies the value at `src` into a fresh allocation in the space
/// of `src` unless a `space` override is given.
pub fn dup(mem: &mut Memory, space: Option<Space>, src: u64) -> Result<u64, VmError> {
    let h = read_header(mem, src)?;
    let space = match space {
        Some(s) => s,
        None => space_of(src)?,
    };
    if h.tag.is_string() {
        return string::dup(mem, space, src);
    }
    match h.tag {
        Tag::Map => map::dup(mem, space, src),
        _ => {
            let address = mem.alloc(space, HEADER_SIZE)?;
            write_header(mem, address, &h)?;
            Ok(address)
        }
    }
}

/// Frees the value at `address` along with any out-of-line payload.
pub fn remove(mem: &mut Memory, address: u64) -> Result<(), VmError> {
    let h = read_header(mem, address)?;
    if h.tag.is_string() {
        return string::remove(mem, address);
    }
    match h.tag {
        Tag::Map => map::remove(mem, address),
        _ => mem.free(address),
    }
}

/// Renders a value as `type: text` for invocation results.
pub fn render(mem: &mut Memory, address: u64) -> Result<String, VmError> {
    let h = read_header(mem, address)?;
    let body = render_bare(mem, address, &h)?;
    Ok(format!("{}: {}", h.tag.name(), body))
}

/// Renders just the textual payload of a value.
pub fn render_bare(mem: &mut Memory, address: u64, h: &Header) -> Result<String, VmError> {
    Ok(match h.tag {
        Tag::Map => map::render(mem, address)?,
        t if t.is_string() => string::text(mem, address)?,
        t if t.is_integer() => h.int().to_string(),
        t if t.is_float() => h.float().to_string(),
        t if t.is_bool() => (h.byte() != 0).to_string(),
        _ => (h.byte() as char).to_string(),
    })
}
