//! The built-in function library.
//!
//! Six functions are assembled by hand at the front of the text section
//! before any user code, using the same calling convention the generator
//! gives user functions: callers push arguments right to left, the callee
//! pops its return address into register 1 and its arguments into the
//! registers past it, and `RET` hands a value back in register 0. Their
//! result cells are ordinary scratch variables in the data section, so
//! the hoisted `LOAD` machinery covers them too.

use crate::engine::data::{self, Tag};
use crate::engine::isa::{self, Opcode, SIGN_BIT};
use crate::engine::string;
use crate::errors::CompileError;
use crate::memory::Space;
use crate::object::{Class, Section, Symbol};

use super::{layout, Generator};

/// Data entry indices of the library's scratch variables.
#[derive(Default)]
pub(super) struct Lib {
    pub verdict: u32,
    pub i: u32,
    pub j: u32,
    pub joined: u32,
    pub digest: u32,
    pub clock: u32,
    pub held: u32,
}

fn load(reg: u16, idx: u32) -> u64 {
    isa::make_op_addr(Opcode::Load, reg, Generator::entry_offset(idx))
}

impl Generator<'_> {
    pub(super) fn install_library(&mut self) -> Result<(), CompileError> {
        self.lib = Lib {
            verdict: self.scratch("$r", Tag::Bool)?,
            i: self.scratch("$i", Tag::Uint64)?,
            j: self.scratch("$j", Tag::Uint64)?,
            joined: self.scratch("$c", Tag::String)?,
            digest: self.scratch("$h", Tag::String)?,
            clock: self.scratch("$t", Tag::String)?,
            held: self.scratch("$s", Tag::Bool)?,
        };
        self.lib_time()?;
        self.lib_delete()?;
        self.lib_elem();
        self.lib_sm3();
        self.lib_sm2();
        self.lib_append()?;
        Ok(())
    }

    /// An unnamed-in-source variable the library keeps results in.
    fn scratch(&mut self, name: &str, tag: Tag) -> Result<u32, CompileError> {
        let master = if tag.is_string() {
            string::new_string(self.mem, Space::Flash, "").map_err(layout)?
        } else {
            data::new_scalar(self.mem, Space::Flash, tag).map_err(layout)?
        };
        let idx = self.new_entry(tag);
        self.symbols.push(Symbol {
            name: name.to_owned(),
            section: Section::Data,
            class: Class::RamVar,
            size: 0,
            value: 0,
            extra: 0,
            address: Generator::entry_offset(idx),
            raddress: master,
        });
        Ok(idx)
    }

    /// Appends an assembled library function and links its table entry.
    fn lib_entry(&mut self, name: &str, ops: &[u64], size: u32, arity: u32) {
        let entry = self.text.len() as u32;
        self.text.extend_from_slice(ops);
        self.symbols.push(Symbol {
            name: name.to_owned(),
            section: Section::Text,
            class: Class::None,
            size,
            value: entry,
            extra: arity,
            address: 0,
            raddress: 0,
        });
        if let Some(id) = self.table.resolve(name) {
            self.table.info_mut(id).slot = Some((self.symbols.len() - 1) as u32);
        }
    }

    /// time() string
    fn lib_time(&mut self) -> Result<(), CompileError> {
        let ops = [
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(2, self.lib.clock),
            isa::make_op(Opcode::Time, 2, 0, 0),
            isa::make_op(Opcode::Ret, 2, 0, 0),
        ];
        self.lib_entry("time", &ops, 3, 0);
        Ok(())
    }

    /// delete(m map, k any) bool, always true
    fn lib_delete(&mut self) -> Result<(), CompileError> {
        let yes = self.bool_entry(true)?;
        let ops = [
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Pop, 2, 0, 0),
            isa::make_op(Opcode::Pop, 3, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(4, yes),
            isa::make_op(Opcode::Delete, 2, 3, 0),
            isa::make_op(Opcode::Ret, 4, 0, 0),
        ];
        self.lib_entry("delete", &ops, 5, 2);
        Ok(())
    }

    /// elem(m map, k any) bool
    fn lib_elem(&mut self) {
        let ops = [
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Pop, 2, 0, 0),
            isa::make_op(Opcode::Pop, 3, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(4, self.lib.held),
            isa::make_op(Opcode::Elem, 4, 2, 3),
            isa::make_op(Opcode::Ret, 4, 0, 0),
        ];
        self.lib_entry("elem", &ops, 5, 2);
    }

    /// sm3Hash(text string) string
    fn lib_sm3(&mut self) {
        let ops = [
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Pop, 2, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(3, self.lib.digest),
            isa::make_op(Opcode::Sm3, 2, 0, 0),
            isa::make_op(Opcode::Move, 3, 0, 0),
            isa::make_op(Opcode::Ret, 3, 0, 0),
        ];
        self.lib_entry("sm3Hash", &ops, 4, 1);
    }

    /// sm2Verify(sig string, data string, key string) bool
    fn lib_sm2(&mut self) {
        let ops = [
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Pop, 2, 0, 0),
            isa::make_op(Opcode::Pop, 3, 0, 0),
            isa::make_op(Opcode::Pop, 4, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(5, self.lib.verdict),
            isa::make_op(Opcode::Sm2, 2, 3, 4),
            isa::make_op(Opcode::Move, 5, 0, 0),
            isa::make_op(Opcode::Ret, 5, 0, 0),
        ];
        self.lib_entry("sm2Verify", &ops, 6, 3);
    }

    /// append(a string, b string) string
    ///
    /// Clears the scratch result by walking both operands character by
    /// character into it, so the operands themselves stay untouched.
    fn lib_append(&mut self) -> Result<(), CompileError> {
        let zero = self.int_entry(0)?;
        let one = self.int_entry(1)?;
        let copy_loop = |src: u16, cell: u16| {
            [
                isa::make_op(Opcode::Move, 5, 7, 0),
                isa::make_op(Opcode::Sizeof, 6, src, 0),
                isa::make_op(Opcode::Cmp, 5, 6, 0),
                isa::make_op(Opcode::Jae, 5, 0, 0),
                isa::make_op(Opcode::Index, cell, src, 5),
                isa::make_op(Opcode::Concat, 4, cell, 0),
                isa::make_op(Opcode::Add, 5, 5, 8),
                isa::make_op(Opcode::Jmp, SIGN_BIT | 5, 0, 0),
            ]
        };
        let mut ops = vec![
            isa::make_op(Opcode::Pop, 0, 0, 0),
            isa::make_op(Opcode::Pop, 2, 0, 0),
            isa::make_op(Opcode::Pop, 3, 0, 0),
            isa::make_op(Opcode::Push, 0, 0, 0),
            load(4, self.lib.joined),
            load(5, self.lib.i),
            load(6, self.lib.j),
            load(7, zero),
            load(8, one),
            isa::make_op(Opcode::Cut, 4, 7, 0),
        ];
        ops.extend_from_slice(&copy_loop(2, 9));
        ops.extend_from_slice(&copy_loop(3, 10));
        ops.push(isa::make_op(Opcode::Ret, 4, 0, 0));
        self.lib_entry("append", &ops, 11, 2);
        Ok(())
    }
}
