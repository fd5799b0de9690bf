//! Pooled literal constants.
//!
//! Every literal in the source shares one data entry per distinct value,
//! with a populated FLASH master the run-time `LOAD` copies in from. The
//! pools are pre-seeded with the values the generator itself leans on:
//! the booleans for branch lowering, the step units, and the zero of each
//! family for fallback returns.

use std::collections::HashMap;

use crate::engine::data::{self, Tag};
use crate::engine::string;
use crate::errors::CompileError;
use crate::memory::Space;
use crate::object::{Class, Section, Symbol};

use super::{layout, Generator};

#[derive(Default)]
pub(super) struct Pools {
    ints: HashMap<i128, u32>,
    floats: HashMap<u64, u32>,
    chars: HashMap<u8, u32>,
    bools: HashMap<bool, u32>,
    strings: HashMap<String, u32>,
}

impl Generator<'_> {
    pub(super) fn seed_pools(&mut self) -> Result<(), CompileError> {
        self.bool_entry(false)?;
        self.bool_entry(true)?;
        self.int_entry(0)?;
        self.int_entry(1)?;
        self.int_entry(-1)?;
        self.char_entry(0)?;
        self.char_entry(1)?;
        self.float_entry(0.0)?;
        self.float_entry(1.0)?;
        self.str_entry("")?;
        Ok(())
    }

    /// Appends the data image and object symbol of one pooled constant.
    fn pooled(&mut self, tag: Tag, master: u64) -> u32 {
        let idx = self.new_entry(tag);
        self.symbols.push(Symbol {
            name: format!("$c{}", idx),
            section: Section::Data,
            class: Class::Constant,
            size: 0,
            value: 0,
            extra: 0,
            address: Generator::entry_offset(idx),
            raddress: master,
        });
        idx
    }

    fn scalar_master(&mut self, tag: Tag, fill: impl FnOnce(&mut data::Header)) -> Result<u64, CompileError> {
        let master = data::new_scalar(self.mem, Space::Flash, tag).map_err(layout)?;
        let mut h = data::read_header(self.mem, master).map_err(layout)?;
        fill(&mut h);
        data::write_header(self.mem, master, &h).map_err(layout)?;
        Ok(master)
    }

    pub(super) fn int_entry(&mut self, v: i128) -> Result<u32, CompileError> {
        if let Some(&idx) = self.pools.ints.get(&v) {
            return Ok(idx);
        }
        let master = self.scalar_master(Tag::ConstInt, |h| h.set_int(v))?;
        let idx = self.pooled(Tag::ConstInt, master);
        self.pools.ints.insert(v, idx);
        Ok(idx)
    }

    pub(super) fn float_entry(&mut self, v: f64) -> Result<u32, CompileError> {
        if let Some(&idx) = self.pools.floats.get(&v.to_bits()) {
            return Ok(idx);
        }
        let master = self.scalar_master(Tag::ConstFloat, |h| h.set_float(v))?;
        let idx = self.pooled(Tag::ConstFloat, master);
        self.pools.floats.insert(v.to_bits(), idx);
        Ok(idx)
    }

    pub(super) fn char_entry(&mut self, v: u8) -> Result<u32, CompileError> {
        if let Some(&idx) = self.pools.chars.get(&v) {
            return Ok(idx);
        }
        let master = self.scalar_master(Tag::ConstChar, |h| h.set_byte(v))?;
        let idx = self.pooled(Tag::ConstChar, master);
        self.pools.chars.insert(v, idx);
        Ok(idx)
    }

    pub(super) fn bool_entry(&mut self, v: bool) -> Result<u32, CompileError> {
        if let Some(&idx) = self.pools.bools.get(&v) {
            return Ok(idx);
        }
        let master = self.scalar_master(Tag::ConstBool, |h| h.set_byte(v as u8))?;
        let idx = self.pooled(Tag::ConstBool, master);
        self.pools.bools.insert(v, idx);
        Ok(idx)
    }

    pub(super) fn str_entry(&mut self, v: &str) -> Result<u32, CompileError> {
        if let Some(&idx) = self.pools.strings.get(v) {
            return Ok(idx);
        }
        let master = string::new_string(self.mem, Space::Flash, v).map_err(layout)?;
        let idx = self.pooled(Tag::ConstString, master);
        self.pools.strings.insert(v.to_owned(), idx);
        Ok(idx)
    }

    /// The pooled zero of a value family, used for fallback returns.
    pub(super) fn zero_entry(&mut self, tag: Tag) -> Result<u32, CompileError> {
        if tag.is_bool() {
            self.bool_entry(false)
        } else if tag.is_char() {
            self.char_entry(0)
        } else if tag.is_string() {
            self.str_entry("")
        } else if tag.is_float() {
            self.float_entry(0.0)
        } else {
            self.int_entry(0)
        }
    }
}
