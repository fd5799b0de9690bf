//! Expression lowering.
//!
//! Every expression evaluates into a register and reports the type tag it
//! carries, plus the key and value tags when the register holds a map.
//! Comparisons and the logical connectives lower to short `CMP`/branch
//! sequences that leave a boolean in a fresh temporary; arithmetic lowers
//! to a three-address instruction into a fresh temporary of the constant
//! variant of its operand family, which assigns into any concrete type of
//! that family later.

use crate::engine::data::{self, Tag};
use crate::engine::isa::{self, Opcode};
use crate::errors::CompileError;

use super::super::ast::{BinaryOp, Expr, Target, UnaryOp};
use super::super::symbols::{Param, SymbolId, SymbolKind, VarType};
use super::Generator;

/// The register an expression evaluated into and what it holds.
#[derive(Clone, Copy)]
pub(super) struct Operand {
    pub reg: u16,
    pub tag: Tag,
    pub map: Option<(Tag, Tag)>,
}

impl Operand {
    fn scalar(reg: u16, tag: Tag) -> Self {
        Operand { reg, tag, map: None }
    }
}

fn mismatch(what: impl Into<String>) -> CompileError {
    CompileError::TypeMismatch(what.into())
}

/// Operand family agreement for an arithmetic operator. Two concrete tags
/// must match exactly; a constant literal bends to either side.
fn arith_result(op: BinaryOp, a: Tag, b: Tag) -> Result<Tag, CompileError> {
    let bitwise = matches!(
        op,
        BinaryOp::Mod | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr
    );
    let family = if a.is_integer() && b.is_integer() {
        Tag::ConstInt
    } else if a.is_char() && b.is_char() {
        Tag::ConstChar
    } else if !bitwise && a.is_float() && b.is_float() {
        Tag::ConstFloat
    } else {
        return Err(mismatch(format!("{} with {}", a.name(), b.name())));
    };
    if a != b && !a.is_const() && !b.is_const() {
        return Err(mismatch(format!("{} with {}", a.name(), b.name())));
    }
    Ok(family)
}

fn unsigned(tag: Tag) -> bool {
    matches!(tag, Tag::Uint8 | Tag::Uint16 | Tag::Uint32 | Tag::Uint64)
}

impl Generator<'_> {
    /// Lowers `e`, appending its instructions to `buf`.
    pub(super) fn expr(&mut self, buf: &mut Vec<u64>, e: &Expr) -> Result<Operand, CompileError> {
        match e {
            Expr::Name(id) => self.name_operand(*id),
            Expr::Int(v) => {
                let idx = self.int_entry(*v)?;
                Ok(Operand::scalar(self.entry_reg(idx), Tag::ConstInt))
            }
            Expr::Float(v) => {
                let idx = self.float_entry(*v)?;
                Ok(Operand::scalar(self.entry_reg(idx), Tag::ConstFloat))
            }
            Expr::Char(v) => {
                let idx = self.char_entry(*v)?;
                Ok(Operand::scalar(self.entry_reg(idx), Tag::ConstChar))
            }
            Expr::Bool(v) => {
                let idx = self.bool_entry(*v)?;
                Ok(Operand::scalar(self.entry_reg(idx), Tag::ConstBool))
            }
            Expr::Str(v) => {
                let idx = self.str_entry(v)?;
                Ok(Operand::scalar(self.entry_reg(idx), Tag::ConstString))
            }
            Expr::Unary { op, operand } => self.unary(buf, *op, operand),
            Expr::Binary { op, lhs, rhs } => {
                let x = self.expr(buf, lhs)?;
                let y = self.expr(buf, rhs)?;
                self.binary(buf, *op, x, y)
            }
            Expr::Assign { target, op, value } => self.assign(buf, target, *op, value),
            Expr::Index { base, key } => self.subscript(buf, *base, key),
            Expr::Call { target, args } => self.call(buf, *target, args),
            Expr::Step { target, down } => self.step(buf, *target, *down),
            Expr::Comma(items) => {
                let mut last = None;
                for item in items {
                    last = Some(self.expr(buf, item)?);
                }
                last.ok_or_else(|| mismatch("empty expression"))
            }
        }
    }

    fn name_operand(&mut self, id: SymbolId) -> Result<Operand, CompileError> {
        let info = self.table.info(id);
        let ty = match info.kind {
            SymbolKind::Var { ty, .. } => ty,
            SymbolKind::Arg { tag } => return Ok(Operand::scalar(info.reg, tag)),
            SymbolKind::Func { .. } => {
                return Err(mismatch(format!("function '{}' used as a value", info.name)))
            }
        };
        match ty {
            VarType::Scalar(tag) => Ok(Operand::scalar(self.bind_var(id)?, tag)),
            VarType::Map { key, value } => Ok(Operand {
                reg: self.bind_var(id)?,
                tag: Tag::Map,
                map: Some((key, value)),
            }),
        }
    }

    fn unary(
        &mut self,
        buf: &mut Vec<u64>,
        op: UnaryOp,
        operand: &Expr,
    ) -> Result<Operand, CompileError> {
        let o = self.expr(buf, operand)?;
        match op {
            UnaryOp::Sizeof => {
                let z = self.temp(buf, Tag::ConstInt);
                buf.push(isa::make_op(Opcode::Sizeof, z, o.reg, 0));
                Ok(Operand::scalar(z, Tag::ConstInt))
            }
            UnaryOp::Plus => {
                if !(o.tag.is_integer() || o.tag.is_float() || o.tag.is_char()) {
                    return Err(mismatch(format!("unary plus on {}", o.tag.name())));
                }
                Ok(o)
            }
            UnaryOp::Minus => {
                if unsigned(o.tag) {
                    return Err(mismatch(format!("negate {}", o.tag.name())));
                }
                if !(o.tag.is_integer() || o.tag.is_float()) {
                    return Err(mismatch(format!("negate {}", o.tag.name())));
                }
                let z = self.temp(buf, o.tag);
                buf.push(isa::make_op(Opcode::Move, z, o.reg, 0));
                buf.push(isa::make_op(Opcode::Neg, z, z, 0));
                Ok(Operand::scalar(z, o.tag))
            }
            UnaryOp::Not => {
                if !o.tag.is_integer() {
                    return Err(mismatch(format!("complement of {}", o.tag.name())));
                }
                let z = self.temp(buf, o.tag);
                buf.push(isa::make_op(Opcode::Move, z, o.reg, 0));
                buf.push(isa::make_op(Opcode::Not, z, z, 0));
                Ok(Operand::scalar(z, o.tag))
            }
        }
    }

    /// Lowers a binary operator over already-evaluated operands. Shared
    /// with compound assignment.
    pub(super) fn binary(
        &mut self,
        buf: &mut Vec<u64>,
        op: BinaryOp,
        x: Operand,
        y: Operand,
    ) -> Result<Operand, CompileError> {
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => self.logical(buf, op, x, y),
            BinaryOp::Eq | BinaryOp::Ne => {
                if !data::comparable(x.tag, y.tag) {
                    return Err(mismatch(format!(
                        "compare {} with {}",
                        x.tag.name(),
                        y.tag.name()
                    )));
                }
                if x.tag == Tag::Map && x.map != y.map {
                    return Err(mismatch("compare maps of different shapes"));
                }
                self.flag_test(buf, Opcode::Jz, x, y, op == BinaryOp::Ne)
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                arith_result(BinaryOp::Add, x.tag, y.tag)?;
                let jump = match op {
                    BinaryOp::Lt => Opcode::Jb,
                    BinaryOp::Gt => Opcode::Ja,
                    BinaryOp::Le => Opcode::Jbe,
                    _ => Opcode::Jae,
                };
                self.flag_test(buf, jump, x, y, false)
            }
            _ => {
                let result = arith_result(op, x.tag, y.tag)?;
                if matches!(op, BinaryOp::Shl | BinaryOp::Shr)
                    && !y.tag.is_const()
                    && y.tag.is_integer()
                    && !unsigned(y.tag)
                {
                    return Err(mismatch(format!("shift count of {}", y.tag.name())));
                }
                let code = match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                    BinaryOp::Mod => Opcode::Mod,
                    BinaryOp::Shl => Opcode::Shl,
                    BinaryOp::Shr => Opcode::Shr,
                    BinaryOp::And => Opcode::And,
                    BinaryOp::Or => Opcode::Or,
                    BinaryOp::Xor => Opcode::Xor,
                    _ => unreachable!(),
                };
                let z = self.temp(buf, result);
                buf.push(isa::make_op(code, z, x.reg, y.reg));
                Ok(Operand::scalar(z, result))
            }
        }
    }

    /// `CMP x, y` followed by a conditional branch that picks `true` or
    /// `false` into a fresh boolean temporary.
    fn flag_test(
        &mut self,
        buf: &mut Vec<u64>,
        jump: Opcode,
        x: Operand,
        y: Operand,
        inverted: bool,
    ) -> Result<Operand, CompileError> {
        let t = self.bool_entry(true)?;
        let f = self.bool_entry(false)?;
        let (tr, fr) = (self.entry_reg(t), self.entry_reg(f));
        let (taken, missed) = if inverted { (fr, tr) } else { (tr, fr) };
        let z = self.temp(buf, Tag::ConstBool);
        buf.push(isa::make_op(Opcode::Cmp, x.reg, y.reg, 0));
        buf.push(isa::make_op(jump, 3, 0, 0));
        buf.push(isa::make_op(Opcode::Move, z, missed, 0));
        buf.push(isa::make_op(Opcode::Jmp, 2, 0, 0));
        buf.push(isa::make_op(Opcode::Move, z, taken, 0));
        buf.push(isa::make_op(Opcode::Nop, 0, 0, 0));
        Ok(Operand::scalar(z, Tag::ConstBool))
    }

    /// Both operands are always evaluated; only the branch web is short.
    fn logical(
        &mut self,
        buf: &mut Vec<u64>,
        op: BinaryOp,
        x: Operand,
        y: Operand,
    ) -> Result<Operand, CompileError> {
        if !x.tag.is_bool() || !y.tag.is_bool() {
            return Err(mismatch(format!(
                "logical operator on {} and {}",
                x.tag.name(),
                y.tag.name()
            )));
        }
        let t = self.bool_entry(true)?;
        let f = self.bool_entry(false)?;
        let (tr, fr) = (self.entry_reg(t), self.entry_reg(f));
        let z = self.temp(buf, Tag::ConstBool);
        if op == BinaryOp::LogicalOr {
            buf.push(isa::make_op(Opcode::Cmp, x.reg, tr, 0));
            buf.push(isa::make_op(Opcode::Jz, 5, 0, 0));
            buf.push(isa::make_op(Opcode::Cmp, y.reg, tr, 0));
            buf.push(isa::make_op(Opcode::Jz, 3, 0, 0));
            buf.push(isa::make_op(Opcode::Move, z, fr, 0));
            buf.push(isa::make_op(Opcode::Jmp, 2, 0, 0));
            buf.push(isa::make_op(Opcode::Move, z, tr, 0));
            buf.push(isa::make_op(Opcode::Nop, 0, 0, 0));
        } else {
            buf.push(isa::make_op(Opcode::Cmp, x.reg, tr, 0));
            buf.push(isa::make_op(Opcode::Jz, 3, 0, 0));
            buf.push(isa::make_op(Opcode::Move, z, fr, 0));
            buf.push(isa::make_op(Opcode::Jmp, 6, 0, 0));
            buf.push(isa::make_op(Opcode::Cmp, y.reg, tr, 0));
            buf.push(isa::make_op(Opcode::Jz, 3, 0, 0));
            buf.push(isa::make_op(Opcode::Move, z, fr, 0));
            buf.push(isa::make_op(Opcode::Jmp, 2, 0, 0));
            buf.push(isa::make_op(Opcode::Move, z, tr, 0));
            buf.push(isa::make_op(Opcode::Nop, 0, 0, 0));
        }
        Ok(Operand::scalar(z, Tag::ConstBool))
    }

    fn assign(
        &mut self,
        buf: &mut Vec<u64>,
        target: &Target,
        op: Option<BinaryOp>,
        value: &Expr,
    ) -> Result<Operand, CompileError> {
        let v = self.expr(buf, value)?;
        match target {
            Target::Name(id) => {
                let x = self.name_operand(*id)?;
                let stored = match op {
                    None => v,
                    Some(bop) => self.binary(buf, bop, x, v)?,
                };
                if x.tag == Tag::Map {
                    if stored.tag != Tag::Map || x.map != stored.map {
                        return Err(mismatch(format!(
                            "assign {} to map '{}'",
                            stored.tag.name(),
                            self.table.info(*id).name
                        )));
                    }
                } else if !data::assignable(x.tag, stored.tag) {
                    return Err(mismatch(format!(
                        "assign {} to {} '{}'",
                        stored.tag.name(),
                        x.tag.name(),
                        self.table.info(*id).name
                    )));
                }
                buf.push(isa::make_op(Opcode::Move, x.reg, stored.reg, 0));
                Ok(x)
            }
            Target::Slot { map, key } => {
                let m = self.name_operand(*map)?;
                let (kt, vt) = m
                    .map
                    .ok_or_else(|| mismatch(format!("subscript assignment to {}", m.tag.name())))?;
                let k = self.expr(buf, key)?;
                if !data::assignable(kt, k.tag) {
                    return Err(mismatch(format!(
                        "key {} in map of {}",
                        k.tag.name(),
                        kt.name()
                    )));
                }
                let stored = match op {
                    None => v,
                    Some(bop) => {
                        let cell = self.alloc_reg();
                        buf.push(isa::make_op(Opcode::Find, cell, m.reg, k.reg));
                        self.binary(buf, bop, Operand::scalar(cell, vt), v)?
                    }
                };
                if !data::assignable(vt, stored.tag) {
                    return Err(mismatch(format!(
                        "store {} in map of {}",
                        stored.tag.name(),
                        vt.name()
                    )));
                }
                buf.push(isa::make_op(Opcode::Insert, m.reg, k.reg, stored.reg));
                Ok(Operand::scalar(stored.reg, vt))
            }
        }
    }

    fn subscript(
        &mut self,
        buf: &mut Vec<u64>,
        base: SymbolId,
        key: &Expr,
    ) -> Result<Operand, CompileError> {
        let b = self.name_operand(base)?;
        let k = self.expr(buf, key)?;
        if let Some((kt, vt)) = b.map {
            if !data::assignable(kt, k.tag) {
                return Err(mismatch(format!(
                    "key {} in map of {}",
                    k.tag.name(),
                    kt.name()
                )));
            }
            let z = self.alloc_reg();
            buf.push(isa::make_op(Opcode::Find, z, b.reg, k.reg));
            return Ok(Operand::scalar(z, vt));
        }
        if b.tag.is_string() {
            if !k.tag.is_integer() {
                return Err(mismatch(format!("string index of {}", k.tag.name())));
            }
            let z = self.alloc_reg();
            buf.push(isa::make_op(Opcode::Index, z, b.reg, k.reg));
            return Ok(Operand::scalar(z, Tag::Char));
        }
        Err(mismatch(format!("subscript of {}", b.tag.name())))
    }

    /// Arguments evaluate left to right and push in reverse, so the
    /// callee pops them in declaration order after its return address.
    fn call(
        &mut self,
        buf: &mut Vec<u64>,
        target: SymbolId,
        args: &[Expr],
    ) -> Result<Operand, CompileError> {
        let (params, ret) = match &self.table.info(target).kind {
            SymbolKind::Func { params, ret } => (params.clone(), *ret),
            _ => {
                return Err(CompileError::UnresolvedFunction(
                    self.table.info(target).name.clone(),
                ))
            }
        };
        let name = self.table.info(target).name.clone();
        let sym = self
            .table
            .info(target)
            .slot
            .ok_or_else(|| CompileError::UnresolvedFunction(name.clone()))?;
        if args.len() != params.len() {
            return Err(CompileError::ArityMismatch(name));
        }
        let mut ops = Vec::with_capacity(args.len());
        for arg in args {
            ops.push(self.expr(buf, arg)?);
        }
        for (p, o) in params.iter().zip(&ops) {
            let ok = match p {
                Param::Map => o.tag == Tag::Map,
                Param::Any => o.tag != Tag::Map,
                Param::Value(t) => o.tag != Tag::Map && data::assignable(*t, o.tag),
            };
            if !ok {
                return Err(mismatch(format!(
                    "argument of {} to '{}'",
                    o.tag.name(),
                    name
                )));
            }
        }
        for o in ops.iter().rev() {
            buf.push(isa::make_op(Opcode::Push, o.reg, 0, 0));
        }
        let entry = self.symbols[sym as usize].value as u64;
        buf.push(isa::make_op_addr(Opcode::Call, 0, entry));
        // The callee's return value sits in register 0 of the restored
        // window; duplicate it before the next call clobbers it.
        let z = self.temp(buf, ret);
        buf.push(isa::make_op(Opcode::Move, z, 0, 0));
        Ok(Operand::scalar(z, ret))
    }

    fn step(
        &mut self,
        buf: &mut Vec<u64>,
        target: SymbolId,
        down: bool,
    ) -> Result<Operand, CompileError> {
        let x = self.name_operand(target)?;
        let one = if x.tag.is_integer() {
            self.int_entry(1)?
        } else if x.tag.is_char() {
            self.char_entry(1)?
        } else if x.tag.is_float() {
            self.float_entry(1.0)?
        } else {
            return Err(mismatch(format!("step of {}", x.tag.name())));
        };
        let unit = self.entry_reg(one);
        let code = if down { Opcode::Sub } else { Opcode::Add };
        buf.push(isa::make_op(code, x.reg, x.reg, unit));
        Ok(x)
    }
}
