//! FSCE binary object container.
//!
//! Layout: `magic(4) | strs-len(4) | text-len(4) | syms-len(4) | data-len(4)
//! | strings | text | symbols | data`. `strings` holds NUL-terminated names,
//! `text` fixed-width u64 instruction words, `symbols` 40-byte records
//! referencing names by offset into `strings`, and `data` the 36-byte value
//! headers forming the reserved region at the bottom of RAM at load time.

use crate::errors::VmError;

pub const MAGIC: u32 = 0x4554_4146; // "FATE"
pub const HEADER_SIZE: usize = 20;
pub const SYMBOL_SIZE: usize = 40;

/// Which section a symbol describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Data,
}

impl Section {
    fn from_u32(v: u32) -> Result<Self, VmError> {
        match v {
            1 => Ok(Section::Text),
            2 => Ok(Section::Data),
            other => Err(VmError::MalformedObject(format!(
                "symbol section {}",
                other
            ))),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Section::Text => 1,
            Section::Data => 2,
        }
    }
}

/// Storage class of a data symbol. TEXT symbols carry [`Class::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    None,
    /// Deduplicated literal; initialized once, never written back.
    Constant,
    /// Ephemeral variable; reset from its compile-time image on first touch.
    RamVar,
    /// Persistent variable with an ephemeral mirror during execution.
    FlashVar,
}

impl Class {
    fn from_u32(v: u32) -> Result<Self, VmError> {
        match v {
            0 => Ok(Class::None),
            1 => Ok(Class::Constant),
            2 => Ok(Class::RamVar),
            3 => Ok(Class::FlashVar),
            other => Err(VmError::MalformedObject(format!("symbol class {}", other))),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Class::None => 0,
            Class::Constant => 1,
            Class::RamVar => 2,
            Class::FlashVar => 3,
        }
    }
}

/// A resolved symbol.
///
/// TEXT symbols: `value` is the entry instruction index, `size` the
/// function's register count, `extra` its arity. DATA symbols: `address` is
/// the data-section offset (constants, RAM vars) or the persistent FLASH
/// address (FLASH vars); `raddress` the counterpart in the other space.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub section: Section,
    pub class: Class,
    pub size: u32,
    pub value: u32,
    pub extra: u32,
    pub address: u64,
    pub raddress: u64,
}

/// A decoded object: instruction stream, resolved symbols, data section.
#[derive(Debug, Clone)]
pub struct Object {
    pub text: Vec<u64>,
    pub symbols: Vec<Symbol>,
    pub data: Vec<u8>,
}

impl Object {
    /// Finds the TEXT symbol for a function name.
    pub fn function(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|s| s.section == Section::Text && s.name == name)
    }

    /// Finds the TEXT symbol whose entry is the given instruction index.
    pub fn function_at(&self, entry: u64) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|s| s.section == Section::Text && s.value as u64 == entry)
    }

    /// Serializes the object, rebuilding the string table from symbol names.
    pub fn encode(&self) -> Vec<u8> {
        let mut strings = Vec::new();
        let mut offsets = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            offsets.push(strings.len() as u32);
            strings.extend_from_slice(sym.name.as_bytes());
            strings.push(0);
        }

        let mut text = Vec::with_capacity(self.text.len() * 8);
        for word in &self.text {
            text.extend_from_slice(&word.to_le_bytes());
        }

        let mut syms = Vec::with_capacity(self.symbols.len() * SYMBOL_SIZE);
        for (sym, &name_off) in self.symbols.iter().zip(&offsets) {
            syms.extend_from_slice(&name_off.to_le_bytes());
            syms.extend_from_slice(&sym.section.as_u32().to_le_bytes());
            syms.extend_from_slice(&sym.class.as_u32().to_le_bytes());
            syms.extend_from_slice(&sym.size.to_le_bytes());
            syms.extend_from_slice(&sym.value.to_le_bytes());
            syms.extend_from_slice(&sym.extra.to_le_bytes());
            syms.extend_from_slice(&sym.address.to_le_bytes());
            syms.extend_from_slice(&sym.raddress.to_le_bytes());
        }

        let mut out = Vec::with_capacity(
            HEADER_SIZE + strings.len() + text.len() + syms.len() + self.data.len(),
        );
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        out.extend_from_slice(&(text.len() as u32).to_le_bytes());
        out.extend_from_slice(&(syms.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&strings);
        out.extend_from_slice(&text);
        out.extend_from_slice(&syms);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses and validates an object blob.
    pub fn decode(mut buf: &[u8]) -> Result<Self, VmError> {
        if buf.len() < HEADER_SIZE {
            return Err(VmError::MalformedObject("truncated header".into()));
        }
        let magic = read_u32(buf, 0);
        if magic != MAGIC {
            return Err(VmError::MalformedObject(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let strs_len = read_u32(buf, 4) as usize;
        let text_len = read_u32(buf, 8) as usize;
        let syms_len = read_u32(buf, 12) as usize;
        let data_len = read_u32(buf, 16) as usize;
        buf = &buf[HEADER_SIZE..];

        let strings = take(&mut buf, strs_len, "strings")?;
        let text_seg = take(&mut buf, text_len, "text")?;
        let syms_seg = take(&mut buf, syms_len, "symbols")?;
        let data = take(&mut buf, data_len, "data")?;

        let mut text = Vec::with_capacity(text_seg.len() / 8);
        for chunk in text_seg.chunks_exact(8) {
            text.push(u64::from_le_bytes(chunk.try_into().unwrap()));
        }

        let mut symbols = Vec::with_capacity(syms_seg.len() / SYMBOL_SIZE);
        for rec in syms_seg.chunks_exact(SYMBOL_SIZE) {
            let name_off = read_u32(rec, 0) as usize;
            symbols.push(Symbol {
                name: find_string(strings, name_off),
                section: Section::from_u32(read_u32(rec, 4))?,
                class: Class::from_u32(read_u32(rec, 8))?,
                size: read_u32(rec, 12),
                value: read_u32(rec, 16),
                extra: read_u32(rec, 20),
                address: u64::from_le_bytes(rec[24..32].try_into().unwrap()),
                raddress: u64::from_le_bytes(rec[32..40].try_into().unwrap()),
            });
        }

        Ok(Object {
            text,
            symbols,
            data: data.to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn take<'a>(buf: &mut &'a [u8], len: usize, section: &str) -> Result<&'a [u8], VmError> {
    if buf.len() < len {
        return Err(VmError::MalformedObject(format!(
            "{} section exceeds buffer",
            section
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Reads the NUL-terminated name at `pos` inside the string table. An
/// offset past the end of the table yields the empty string.
fn find_string(strings: &[u8], pos: usize) -> String {
    let pos = pos.min(strings.len());
    let end = strings[pos..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| pos + i)
        .unwrap_or(strings.len());
    String::from_utf8_lossy(&strings[pos..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Object {
        Object {
            text: vec![0x0102_0304_0506_0708, 42],
            symbols: vec![
                Symbol {
                    name: "main".into(),
                    section: Section::Text,
                    class: Class::None,
                    size: 3,
                    value: 0,
                    extra: 2,
                    address: 0,
                    raddress: 0,
                },
                Symbol {
                    name: "counter".into(),
                    section: Section::Data,
                    class: Class::FlashVar,
                    size: 0,
                    value: 0,
                    extra: 0,
                    address: 0x1_0000_0010,
                    raddress: 36,
                },
            ],
            data: vec![0u8; 72],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let obj = sample();
        let decoded = Object::decode(&obj.encode()).unwrap();
        assert_eq!(decoded.text, obj.text);
        assert_eq!(decoded.data, obj.data);
        assert_eq!(decoded.symbols.len(), 2);
        assert_eq!(decoded.symbols[0].name, "main");
        assert_eq!(decoded.symbols[1].class, Class::FlashVar);
        assert_eq!(decoded.symbols[1].address, 0x1_0000_0010);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = sample().encode();
        blob[0] ^= 0xFF;
        assert!(Object::decode(&blob).is_err());
    }

    #[test]
    fn rejects_truncated_sections() {
        let blob = sample().encode();
        assert!(Object::decode(&blob[..blob.len() - 10]).is_err());
        assert!(Object::decode(&blob[..10]).is_err());
    }

    #[test]
    fn name_offset_past_string_table() {
        let obj = sample();
        let mut blob = obj.encode();
        // first symbol record sits after the header, string table and text
        let strs_len = obj.symbols.iter().map(|s| s.name.len() + 1).sum::<usize>();
        let rec = HEADER_SIZE + strs_len + obj.text.len() * 8;
        blob[rec..rec + 4].copy_from_slice(&1000u32.to_le_bytes());
        let decoded = Object::decode(&blob).unwrap();
        assert_eq!(decoded.symbols[0].name, "");
        assert_eq!(decoded.symbols[1].name, "counter");
    }

    #[test]
    fn function_lookup() {
        let obj = sample();
        assert!(obj.function("main").is_some());
        assert!(obj.function("counter").is_none());
        assert_eq!(obj.function_at(0).unwrap().name, "main");
    }
}
