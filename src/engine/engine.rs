//! Engine lifecycle: loading an object, binding call arguments, the fetch
//! and dispatch loop, and committing persistent state.

use crate::engine::data::{self, Tag};
use crate::engine::isa::{self, Opcode};
use crate::engine::string;
use crate::errors::VmError;
use crate::memory::store::PageStore;
use crate::memory::{Memory, Space};
use crate::object::{Object, Section, Symbol};

/// Registers allocated up front. [`isa::register_index`] past the current
/// allocation grows the file on demand.
pub const DEFAULT_REGISTER_COUNT: usize = 1024;

/// Hard ceiling on the register file, windows included.
pub const REGISTER_LIMIT: usize = 16384;

/// Initial operand stack depth. The stack grows in increments of this when a
/// deep call chain outruns it.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// One loaded contract bound to one entry function, ready to run.
///
/// The register file is windowed: registers 0 and 1 are absolute (return
/// value and link), every other operand index is taken relative to the
/// current window `offset`. CALL slides the window forward by the caller's
/// declared register count, RET slides it back.
pub struct Engine {
    pub(super) mem: Memory,
    pub(super) object: Object,
    pub(super) regs: Vec<u64>,
    pub(super) stack: Vec<u64>,
    pub(super) sp: usize,
    pub(super) pc: usize,
    pub(super) flags: u64,
    pub(super) offset: usize,
    pub(super) windows: Vec<u32>,
    pub(super) gas: i64,
    /// Entry instruction index and register count of the bound function.
    entry: usize,
    entry_size: u32,
    /// FLASH symbols touched by LOAD since the last commit, by persistent
    /// address, deduplicated.
    pub(super) loaded: Vec<u64>,
}

impl Engine {
    /// Opens a contract address space over `store`, seeds RAM with the
    /// object's data section, and binds `function` with its arguments.
    pub fn new(
        store: Box<dyn PageStore>,
        object: Object,
        function: &str,
        gas: i64,
        args: &[Vec<u8>],
    ) -> Result<Self, VmError> {
        let mem = Memory::open(store, &object.data)?;
        let mut engine = Engine {
            mem,
            object,
            regs: vec![0; DEFAULT_REGISTER_COUNT],
            stack: vec![0; DEFAULT_STACK_SIZE],
            sp: 0,
            pc: 0,
            flags: 0,
            offset: 0,
            windows: Vec::new(),
            gas: 0,
            entry: 0,
            entry_size: 0,
            loaded: Vec::new(),
        };
        engine.rebind(function, gas, args)?;
        Ok(engine)
    }

    /// Rebinds the engine to another entry point without reopening memory.
    /// Keeps the address space, so state already committed stays visible and
    /// RAM garbage from the previous run is simply never reached again.
    pub fn rebind(&mut self, function: &str, gas: i64, args: &[Vec<u8>]) -> Result<(), VmError> {
        let sym = self
            .object
            .function(function)
            .ok_or_else(|| VmError::UnknownFunction(function.to_string()))?;
        if args.len() != sym.extra as usize {
            return Err(VmError::ArgumentError(format!(
                "{} takes {} arguments, got {}",
                function, sym.extra, args.len()
            )));
        }
        self.entry = sym.value as usize;
        self.entry_size = sym.size;
        self.gas = gas;
        self.sp = 0;
        self.flags = 0;
        self.offset = 0;
        self.argument_init(args)
    }

    pub fn gas(&self) -> i64 {
        self.gas
    }

    pub fn memory(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Runs the bound function to completion and renders the value left in
    /// register 0. Gas is charged per instruction before dispatch; the run
    /// aborts with [`VmError::OutOfGas`] the moment the balance goes
    /// negative.
    pub fn run(&mut self) -> Result<String, VmError> {
        self.windows.clear();
        self.windows.push(self.entry_size);
        self.offset = 0;
        let mut i = self.entry;
        loop {
            let word = *self
                .object
                .text
                .get(i)
                .ok_or(VmError::IllegalAddress(i as u64))?;
            let op = Opcode::try_from(isa::op(word))?;
            self.gas -= op.gas();
            if self.gas < 0 {
                return Err(VmError::OutOfGas);
            }
            self.pc = i;
            self.execute(op, word)?;
            i = self.pc;
            if op == Opcode::Ret && self.sp == 0 {
                break;
            }
        }
        data::render(&mut self.mem, isa::bcr(self.regs[0]))
    }

    /// Copies every touched FLASH mirror back over its persistent value,
    /// flushes dirty pages to the store, and forgets the touched set.
    /// Calling it with nothing touched is a no-op, so a second commit after
    /// a clean run changes nothing.
    pub fn commit(&mut self) -> Result<(), VmError> {
        let touched = std::mem::take(&mut self.loaded);
        for address in &touched {
            let sym = self
                .object
                .symbols
                .iter()
                .find(|s| s.section == Section::Data && s.address == *address)
                .ok_or(VmError::IllegalAddress(*address))?;
            let (dst, src) = (sym.address, sym.raddress);
            data::move_value(&mut self.mem, dst, src)?;
        }
        self.mem.flush()
    }

    /// Resolves the TEXT symbol whose entry is the given instruction index.
    pub(super) fn function_at(&self, entry: u64) -> Result<&Symbol, VmError> {
        self.object
            .function_at(entry)
            .ok_or_else(|| VmError::UnknownFunction(format!("entry {}", entry)))
    }

    /// Maps a register operand to an index into the register file. Operands
    /// 0 and 1 are absolute; everything else is window-relative.
    pub(super) fn reg(&mut self, operand: u16) -> Result<usize, VmError> {
        let idx = isa::register_index(operand) as usize;
        let idx = if idx < 2 { idx } else { idx + self.offset };
        if idx >= REGISTER_LIMIT {
            return Err(VmError::BadRegister(idx));
        }
        if idx >= self.regs.len() {
            self.regs.resize(idx + 1, 0);
        }
        Ok(idx)
    }

    /// Reads the register named by an operand, applying the window.
    pub(super) fn reg_value(&mut self, operand: u16) -> Result<u64, VmError> {
        let idx = self.reg(operand)?;
        Ok(self.regs[idx])
    }

    pub(super) fn push(&mut self, value: u64) {
        if self.sp == self.stack.len() {
            self.stack.resize(self.stack.len() + DEFAULT_STACK_SIZE, 0);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
    }

    pub(super) fn pop(&mut self) -> Result<u64, VmError> {
        if self.sp == 0 {
            return Err(VmError::EmptyStack);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    /// Allocates a fresh zero value of `tag` in RAM and points `reg` at it.
    /// Maps have no zero value without key and value types, so they cannot
    /// be materialized this way.
    pub(super) fn tmp(&mut self, reg: usize, tag: Tag) -> Result<(), VmError> {
        let address = match tag {
            Tag::Map => return Err(VmError::TypeError("no map temporaries")),
            t if t.is_string() => string::new_string(&mut self.mem, Space::Ram, "")?,
            t => data::new_scalar(&mut self.mem, Space::Ram, t)?,
        };
        self.regs[reg] = address;
        Ok(())
    }

    /// Materializes one call argument in RAM. The wire form is a little
    /// endian u32 type tag followed by the payload: one byte for bool and
    /// char, raw bytes for strings, decimal text for numbers.
    fn argument_alloc(&mut self, raw: &[u8]) -> Result<u64, VmError> {
        if raw.len() < 5 {
            return Err(VmError::ArgumentError(format!(
                "argument blob of {} bytes",
                raw.len()
            )));
        }
        let tag = Tag::try_from(u32::from_le_bytes(raw[..4].try_into().unwrap()))?;
        let payload = &raw[4..];
        match tag {
            Tag::Bool | Tag::ConstBool | Tag::Char | Tag::ConstChar => {
                let address = data::new_scalar(&mut self.mem, Space::Ram, tag)?;
                let mut h = data::read_header(&mut self.mem, address)?;
                h.set_byte(payload[0]);
                data::write_header(&mut self.mem, address, &h)?;
                Ok(address)
            }
            t if t.is_integer() => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| VmError::ArgumentError("non-utf8 integer".into()))?;
                let v: i128 = text
                    .trim()
                    .parse()
                    .map_err(|_| VmError::ArgumentError(format!("bad integer {:?}", text)))?;
                data::check_int(t, v)?;
                let address = data::new_scalar(&mut self.mem, Space::Ram, t)?;
                let mut h = data::read_header(&mut self.mem, address)?;
                h.set_int(v);
                data::write_header(&mut self.mem, address, &h)?;
                Ok(address)
            }
            t if t.is_float() => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| VmError::ArgumentError("non-utf8 float".into()))?;
                let v: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| VmError::ArgumentError(format!("bad float {:?}", text)))?;
                data::check_float(t, v)?;
                let address = data::new_scalar(&mut self.mem, Space::Ram, t)?;
                let mut h = data::read_header(&mut self.mem, address)?;
                h.set_float(v);
                data::write_header(&mut self.mem, address, &h)?;
                Ok(address)
            }
            t if t.is_string() => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| VmError::ArgumentError("non-utf8 string".into()))?;
                string::new_string(&mut self.mem, Space::Ram, text)
            }
            _ => Err(VmError::ArgumentError(format!(
                "{} arguments are not supported",
                tag.name()
            ))),
        }
    }

    /// Pushes call arguments right to left, then a zero sentinel the final
    /// RET pops to end the run.
    fn argument_init(&mut self, args: &[Vec<u8>]) -> Result<(), VmError> {
        for raw in args.iter().rev() {
            let address = self.argument_alloc(raw)?;
            self.regs[0] = address;
            self.push(isa::bcr(self.regs[0]));
        }
        self.regs[0] = 0;
        self.push(0);
        Ok(())
    }
}
