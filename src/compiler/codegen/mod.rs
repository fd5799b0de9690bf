//! Bytecode generation.
//!
//! Walks the resolved tree one function at a time and emits instruction
//! words, object symbols, and the data section. Register allocation is a
//! bump counter per function: registers 0 and 1 belong to the machine,
//! arguments take the next slots, and every variable, pooled constant, or
//! temporary past those gets the next free index. Variable and constant
//! `LOAD`s are hoisted to a preamble between the argument pops and the
//! body, so a loop body never re-binds its registers.
//!
//! Persistent layout happens at compile time: every variable and pooled
//! literal gets a 36-byte image in the object's data section (its RAM
//! address at load time) and a master copy allocated in FLASH through the
//! live memory manager, which the run-time `LOAD` remaps against.

mod constants;
mod expr;
mod intrinsics;
mod stmt;

use std::collections::HashMap;

use crate::engine::data::{self, Header, Tag};
use crate::engine::isa::{self, Opcode, DATA_BIT};
use crate::engine::{map, string};
use crate::errors::{CompileError, VmError};
use crate::memory::{Memory, Space};
use crate::object::{Class, Object, Section, Symbol};

use super::ast::{Function, Item, Unit};
use super::symbols::{SymbolId, SymbolKind, SymbolTable, VarType};

pub(super) fn layout(e: VmError) -> CompileError {
    CompileError::Layout(e.to_string())
}

/// Encodes a jump distance, rejecting one that cannot fit in operand A.
pub(super) fn distance(d: i64) -> Result<u16, CompileError> {
    if d.unsigned_abs() > DATA_BIT as u64 {
        return Err(CompileError::Layout(format!("jump distance {}", d)));
    }
    Ok(isa::encode_distance(d))
}

/// Build state of the function currently being lowered.
pub(super) struct FuncBuild {
    /// Declared return type.
    pub ret: Tag,
    /// Count of registers handed out past the two machine slots.
    pub regs: u16,
    /// Hoisted `LOAD` preamble.
    pub loads: Vec<u64>,
    /// Registers already bound to pooled constants, by data entry.
    pub pooled: HashMap<u32, u16>,
    /// Symbols with a register bound, unbound when the function ends.
    pub bound: Vec<SymbolId>,
}

impl FuncBuild {
    fn new(ret: Tag) -> Self {
        FuncBuild {
            ret,
            regs: 0,
            loads: Vec::new(),
            pooled: HashMap::new(),
            bound: Vec::new(),
        }
    }
}

pub struct Generator<'m> {
    pub(super) mem: &'m mut Memory,
    pub(super) table: SymbolTable,
    pub(super) text: Vec<u64>,
    pub(super) symbols: Vec<Symbol>,
    pub(super) data: Vec<u8>,
    pub(super) pools: constants::Pools,
    pub(super) lib: intrinsics::Lib,
    pub(super) cur: FuncBuild,
}

impl<'m> Generator<'m> {
    /// Seeds the constant pools and assembles the intrinsic library ahead
    /// of any user code. Entry zero of the data section stays reserved.
    pub fn new(table: SymbolTable, mem: &'m mut Memory) -> Result<Self, CompileError> {
        let mut gen = Generator {
            mem,
            table,
            text: Vec::new(),
            symbols: Vec::new(),
            data: vec![0; data::HEADER_SIZE as usize],
            pools: constants::Pools::default(),
            lib: intrinsics::Lib::default(),
            cur: FuncBuild::new(Tag::Bool),
        };
        gen.seed_pools()?;
        gen.install_library()?;
        Ok(gen)
    }

    /// Lowers the whole unit and seals the object. FLASH masters written
    /// during generation are flushed so the contract directory holds them
    /// before the first invocation.
    pub fn run(mut self, unit: &Unit) -> Result<Object, CompileError> {
        for item in &unit.items {
            match item {
                Item::Declare(id) => {
                    self.storage(*id)?;
                }
                Item::Function(f) => self.add_function(f)?,
            }
        }
        self.mem.flush().map_err(layout)?;
        Ok(Object {
            text: self.text,
            symbols: self.symbols,
            data: self.data,
        })
    }

    /// RAM address of a data entry at load time.
    pub(super) fn entry_offset(idx: u32) -> u64 {
        idx as u64 * data::HEADER_SIZE
    }

    pub(super) fn alloc_reg(&mut self) -> u16 {
        self.cur.regs += 1;
        self.cur.regs + 1
    }

    /// Appends a zeroed value image to the data section.
    pub(super) fn new_entry(&mut self, tag: Tag) -> u32 {
        let idx = (self.data.len() as u64 / data::HEADER_SIZE) as u32;
        self.data.extend_from_slice(&Header::zeroed(tag).encode());
        idx
    }

    /// Ensures a declared variable has its data entry, FLASH master, and
    /// object symbol. Idempotent.
    pub(super) fn storage(&mut self, id: SymbolId) -> Result<u32, CompileError> {
        if let Some(idx) = self.table.info(id).slot {
            return Ok(idx);
        }
        let (class, ty) = match &self.table.info(id).kind {
            SymbolKind::Var { class, ty } => (*class, *ty),
            _ => {
                return Err(CompileError::TypeMismatch(format!(
                    "'{}' is not a variable",
                    self.table.info(id).name
                )))
            }
        };
        let (tag, master) = match ty {
            VarType::Scalar(t) if t.is_string() => (
                t,
                string::new_string(self.mem, Space::Flash, "").map_err(layout)?,
            ),
            VarType::Scalar(t) => (t, data::new_scalar(self.mem, Space::Flash, t).map_err(layout)?),
            VarType::Map { key, value } => (
                Tag::Map,
                map::new_map(self.mem, Space::Flash, key, value).map_err(layout)?,
            ),
        };
        let idx = self.new_entry(tag);
        let offset = Self::entry_offset(idx);
        // Persistent variables keep their FLASH master as the canonical
        // address; ephemeral ones live at their RAM image.
        let (address, raddress) = match class {
            Class::FlashVar => (master, offset),
            _ => (offset, master),
        };
        self.symbols.push(Symbol {
            name: self.table.info(id).name.clone(),
            section: Section::Data,
            class,
            size: 0,
            value: 0,
            extra: 0,
            address,
            raddress,
        });
        self.table.info_mut(id).slot = Some(idx);
        Ok(idx)
    }

    /// Binds a variable to a register within the current function and
    /// hoists its `LOAD` into the preamble.
    pub(super) fn bind_var(&mut self, id: SymbolId) -> Result<u16, CompileError> {
        if self.table.info(id).reg != 0 {
            return Ok(self.table.info(id).reg);
        }
        let idx = self.storage(id)?;
        let reg = self.alloc_reg();
        self.cur
            .loads
            .push(isa::make_op_addr(Opcode::Load, reg, Self::entry_offset(idx)));
        self.table.info_mut(id).reg = reg;
        self.cur.bound.push(id);
        Ok(reg)
    }

    /// Register of a pooled constant, `LOAD` hoisted on first use.
    pub(super) fn entry_reg(&mut self, idx: u32) -> u16 {
        if let Some(&reg) = self.cur.pooled.get(&idx) {
            return reg;
        }
        let reg = self.alloc_reg();
        self.cur
            .loads
            .push(isa::make_op_addr(Opcode::Load, reg, Self::entry_offset(idx)));
        self.cur.pooled.insert(idx, reg);
        reg
    }

    /// Allocates a fresh zero temporary of `tag` in a new register.
    pub(super) fn temp(&mut self, buf: &mut Vec<u64>, tag: Tag) -> u16 {
        let reg = self.alloc_reg();
        buf.push(isa::make_op(Opcode::Tmp, reg, tag as u16, 0));
        reg
    }

    /// Assembles one function: argument pops, hoisted loads, body, and a
    /// fallback return of the zero constant of the return type for bodies
    /// that run off the end.
    fn add_function(&mut self, f: &Function) -> Result<(), CompileError> {
        let (ret, arity) = match &self.table.info(f.id).kind {
            SymbolKind::Func { params, ret } => (*ret, params.len() as u16),
            _ => {
                return Err(CompileError::UnresolvedFunction(
                    self.table.info(f.id).name.clone(),
                ))
            }
        };
        self.cur = FuncBuild::new(ret);
        for &pid in &f.params {
            let reg = self.alloc_reg();
            self.table.info_mut(pid).reg = reg;
            self.cur.bound.push(pid);
        }
        let body = stmt::emit(self, &f.body)?;
        let zero = self.zero_entry(ret)?;
        let zreg = self.entry_reg(zero);

        let entry = self.text.len() as u32;
        self.text.push(isa::make_op(Opcode::Pop, 0, 0, 0));
        for i in 0..arity {
            self.text.push(isa::make_op(Opcode::Pop, 2 + i, 0, 0));
        }
        self.text.push(isa::make_op(Opcode::Push, 0, 0, 0));
        let done = std::mem::replace(&mut self.cur, FuncBuild::new(ret));
        self.text.extend_from_slice(&done.loads);
        self.text.extend_from_slice(&body);
        self.text.push(isa::make_op(Opcode::Ret, zreg, 0, 0));

        self.symbols.push(Symbol {
            name: self.table.info(f.id).name.clone(),
            section: Section::Text,
            class: Class::None,
            size: done.regs as u32 + 2,
            value: entry,
            extra: arity as u32,
            address: 0,
            raddress: 0,
        });
        self.table.info_mut(f.id).slot = Some((self.symbols.len() - 1) as u32);
        for id in done.bound {
            self.table.info_mut(id).reg = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::engine::isa;
    use crate::memory::store::MemStore;

    fn build(src: &str) -> Object {
        let mut mem = Memory::create(Box::new(MemStore::new())).unwrap();
        compile(src, &mut mem).unwrap()
    }

    fn build_err(src: &str) -> CompileError {
        let mut mem = Memory::create(Box::new(MemStore::new())).unwrap();
        compile(src, &mut mem).unwrap_err()
    }

    fn words(obj: &Object, name: &str) -> Vec<u64> {
        let sym = obj.function(name).unwrap();
        let start = sym.value as usize;
        // A function extends to the next entry point or the end of text.
        let end = obj
            .symbols
            .iter()
            .filter(|s| s.section == Section::Text && s.value > sym.value)
            .map(|s| s.value as usize)
            .min()
            .unwrap_or(obj.text.len());
        obj.text[start..end].to_vec()
    }

    #[test]
    fn intrinsics_precede_user_code() {
        let obj = build("func nothing() bool { return true; }");
        for name in ["time", "delete", "elem", "sm3Hash", "sm2Verify", "append"] {
            assert!(obj.function(name).is_some(), "missing {}", name);
        }
        let user = obj.function("nothing").unwrap();
        let lib_max = obj
            .symbols
            .iter()
            .filter(|s| s.section == Section::Text && s.name != "nothing")
            .map(|s| s.value)
            .max()
            .unwrap();
        assert!(user.value > lib_max);
    }

    #[test]
    fn function_symbol_shape() {
        let obj = build("func add(a uint32, b uint32) uint32 { return a + b; }");
        let sym = obj.function("add").unwrap();
        assert_eq!(sym.extra, 2);
        assert!(sym.size >= 4);
        let ops = words(&obj, "add");
        // POP 0, POP 2, POP 3, PUSH 0
        assert_eq!(isa::op(ops[0]), Opcode::Pop as u8);
        assert_eq!(isa::a(ops[1]), 2);
        assert_eq!(isa::a(ops[2]), 3);
        assert_eq!(isa::op(ops[3]), Opcode::Push as u8);
        // Ends with the fallback return.
        assert_eq!(isa::op(*ops.last().unwrap()), Opcode::Ret as u8);
        // The body adds into a temporary and returns it.
        assert!(ops.iter().any(|&w| isa::op(w) == Opcode::Add as u8));
    }

    #[test]
    fn loads_are_hoisted_before_the_body() {
        let obj = build(
            "set counter uint64;\n\
             func bump() uint64 {\n\
                 while (counter < 3) counter += 1;\n\
                 return counter;\n\
             }\n",
        );
        let ops = words(&obj, "bump");
        let first_load = ops
            .iter()
            .position(|&w| isa::op(w) == Opcode::Load as u8)
            .unwrap();
        let first_cmp = ops
            .iter()
            .position(|&w| isa::op(w) == Opcode::Cmp as u8)
            .unwrap();
        assert!(first_load < first_cmp);
        // No LOAD inside the loop body.
        assert!(ops[first_cmp..]
            .iter()
            .all(|&w| isa::op(w) != Opcode::Load as u8));
    }

    #[test]
    fn while_branches_close_the_loop() {
        let obj = build(
            "func spin(n uint32) uint32 {\n\
                 let i uint32;\n\
                 i = 0;\n\
                 while (i < n) i++;\n\
                 return i;\n\
             }\n",
        );
        let ops = words(&obj, "spin");
        let jz = ops
            .iter()
            .position(|&w| isa::op(w) == Opcode::Jz as u8)
            .unwrap();
        // The backward jump lands on the first word of the condition.
        let jmp = ops[jz..]
            .iter()
            .position(|&w| {
                isa::op(w) == Opcode::Jmp as u8 && (isa::a(w) & isa::SIGN_BIT) != 0
            })
            .map(|i| i + jz)
            .unwrap();
        let back = isa::jump_distance(isa::a(ops[jmp]));
        assert!(back < 0);
        let target = jmp as i64 + back;
        assert!(target >= 0 && (target as usize) < jz);
        // The word after the backward jump is the loop's NOP landing pad.
        assert_eq!(isa::op(ops[jmp + 1]), Opcode::Nop as u8);
    }

    #[test]
    fn calls_resolve_to_earlier_entries() {
        let obj = build(
            "func one() uint32 { return 1; }\n\
             func two() uint32 { return one() + one(); }\n",
        );
        let one = obj.function("one").unwrap().value as u64;
        let calls: Vec<u64> = words(&obj, "two")
            .iter()
            .copied()
            .filter(|&w| isa::op(w) == Opcode::Call as u8)
            .map(isa::bcr)
            .collect();
        assert_eq!(calls, vec![one, one]);
    }

    #[test]
    fn data_symbols_carry_both_addresses() {
        let obj = build("set total uint64;\nlet scratch string;\nfunc f() uint64 { scratch = \"x\"; return total; }");
        let total = obj
            .symbols
            .iter()
            .find(|s| s.name == "total")
            .unwrap();
        assert_eq!(total.class, Class::FlashVar);
        assert!(total.address >= crate::memory::RAM_LIMIT);
        assert_eq!(total.raddress % data::HEADER_SIZE, 0);
        let scratch = obj
            .symbols
            .iter()
            .find(|s| s.name == "scratch")
            .unwrap();
        assert_eq!(scratch.class, Class::RamVar);
        assert!(scratch.raddress >= crate::memory::RAM_LIMIT);
        assert_eq!(scratch.address % data::HEADER_SIZE, 0);
    }

    #[test]
    fn constants_are_pooled() {
        let obj = build(
            "func f(a uint32) uint32 { return a + 7 + 7; }\n\
             func g(a uint32) uint32 { return a - 7; }\n",
        );
        // One constant image serves every use of the literal 7.
        let sevens = obj
            .symbols
            .iter()
            .filter(|s| s.class == Class::Constant)
            .filter(|s| {
                let off = s.address as usize;
                let h = Header::decode(&obj.data[off..off + 36]).unwrap();
                h.tag == Tag::ConstInt
            })
            .count();
        // Pool pre-seeds 0, 1 and -1; the source adds only one more int.
        assert_eq!(sevens, 4);
    }

    #[test]
    fn type_mismatches_are_compile_errors() {
        assert!(matches!(
            build_err("func f(a uint32, b bool) uint32 { return a + b; }"),
            CompileError::TypeMismatch(_)
        ));
        assert!(matches!(
            build_err("func f() bool { return 3; }"),
            CompileError::TypeMismatch(_)
        ));
        assert!(matches!(
            build_err("func f(a uint32) bool { while (a) a--; return true; }"),
            CompileError::TypeMismatch(_)
        ));
    }

    #[test]
    fn call_checking() {
        assert!(matches!(
            build_err(
                "func one() uint32 { return 1; }\n\
                 func f() uint32 { return one(2); }\n"
            ),
            CompileError::ArityMismatch(name) if name == "one"
        ));
        assert!(matches!(
            build_err(
                "func half(x uint32) uint32 { return x / 2; }\n\
                 func f() uint32 { return half(true); }\n"
            ),
            CompileError::TypeMismatch(_)
        ));
        assert!(matches!(
            build_err("let m[string] uint64;\nfunc f() bool { return delete(m, m); }"),
            CompileError::TypeMismatch(_)
        ));
    }

    #[test]
    fn map_subscript_types() {
        assert!(matches!(
            build_err(
                "let m[string] uint64;\n\
                 func f() uint64 { return m[true]; }\n"
            ),
            CompileError::TypeMismatch(_)
        ));
        build(
            "let m[string] uint64;\n\
             func f() uint64 { m[\"k\"] = 9; return m[\"k\"]; }\n",
        );
    }
}
