//! Statement lowering.
//!
//! Statements assemble into relocatable word vectors; `if` and `while`
//! splice their pieces together and compute branch distances once the
//! piece lengths are known. `break` and `continue` leave marker jumps
//! (a nonzero C operand, which real jumps never carry) that the nearest
//! enclosing `while` patches while splicing its body.

use crate::engine::data::{self, Tag};
use crate::engine::isa::{self, Opcode};
use crate::errors::CompileError;

use super::super::ast::Stmt;
use super::{distance, Generator};

const BREAK_MARK: u16 = 2;
const CONTINUE_MARK: u16 = 1;

fn marker(mark: u16) -> u64 {
    isa::make_op(Opcode::Jmp, 1, 0, mark)
}

pub(super) fn emit(gen: &mut Generator, stmt: &Stmt) -> Result<Vec<u64>, CompileError> {
    match stmt {
        Stmt::Declare(id) => {
            gen.storage(*id)?;
            Ok(Vec::new())
        }
        Stmt::Expr(None) => Ok(Vec::new()),
        Stmt::Expr(Some(e)) => {
            let mut buf = Vec::new();
            gen.expr(&mut buf, e)?;
            Ok(buf)
        }
        Stmt::Block(items) => {
            let mut out = Vec::new();
            for s in items {
                out.extend(emit(gen, s)?);
            }
            Ok(out)
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            let (mut seq, c, f) = condition(gen, cond)?;
            let then_ops = emit(gen, then)?;
            let else_ops = match otherwise {
                Some(s) => emit(gen, s)?,
                None => Vec::new(),
            };
            seq.push(isa::make_op(Opcode::Cmp, c, f, 0));
            seq.push(isa::make_op(
                Opcode::Jz,
                distance(then_ops.len() as i64 + 2)?,
                0,
                0,
            ));
            seq.extend(then_ops);
            seq.push(isa::make_op(
                Opcode::Jmp,
                distance(else_ops.len() as i64 + 1)?,
                0,
                0,
            ));
            seq.extend(else_ops);
            seq.push(isa::make_op(Opcode::Nop, 0, 0, 0));
            Ok(seq)
        }
        Stmt::While { cond, body } => {
            let (cond_ops, c, f) = condition(gen, cond)?;
            let mut body_ops = emit(gen, body)?;
            let cl = cond_ops.len() as i64;
            let bl = body_ops.len() as i64;
            // Layout: cond, CMP, JZ, body, JMP back, NOP.
            let exit = cl + bl + 3;
            for (j, w) in body_ops.iter_mut().enumerate() {
                if isa::op(*w) == Opcode::Jmp as u8 && isa::c(*w) != 0 {
                    let at = cl + 2 + j as i64;
                    *w = match isa::c(*w) {
                        BREAK_MARK => isa::make_op(Opcode::Jmp, distance(exit - at)?, 0, 0),
                        _ => isa::make_op(Opcode::Jmp, distance(-at)?, 0, 0),
                    };
                }
            }
            let mut seq = cond_ops;
            seq.push(isa::make_op(Opcode::Cmp, c, f, 0));
            seq.push(isa::make_op(Opcode::Jz, distance(bl + 2)?, 0, 0));
            seq.extend(body_ops);
            seq.push(isa::make_op(Opcode::Jmp, distance(-(cl + bl + 2))?, 0, 0));
            seq.push(isa::make_op(Opcode::Nop, 0, 0, 0));
            Ok(seq)
        }
        Stmt::Break => Ok(vec![marker(BREAK_MARK)]),
        Stmt::Continue => Ok(vec![marker(CONTINUE_MARK)]),
        Stmt::Return(e) => {
            let mut buf = Vec::new();
            let o = gen.expr(&mut buf, e)?;
            if o.tag == Tag::Map {
                return Err(CompileError::TypeMismatch("return of a map".into()));
            }
            let ret = gen.cur.ret;
            if !data::assignable(ret, o.tag) {
                return Err(CompileError::TypeMismatch(format!(
                    "return of {} from a {} function",
                    o.tag.name(),
                    ret.name()
                )));
            }
            // A literal or expression temporary carries a constant tag;
            // returning it through a copy of the declared type makes the
            // rendered result honor the signature.
            let reg = if o.tag == ret {
                o.reg
            } else {
                let z = gen.temp(&mut buf, ret);
                buf.push(isa::make_op(Opcode::Move, z, o.reg, 0));
                z
            };
            buf.push(isa::make_op(Opcode::Ret, reg, 0, 0));
            Ok(buf)
        }
    }
}

/// Evaluates a controlling expression, yielding its instructions, the
/// condition register, and a register holding `false` to compare against.
fn condition(gen: &mut Generator, e: &super::super::ast::Expr) -> Result<(Vec<u64>, u16, u16), CompileError> {
    let mut buf = Vec::new();
    let o = gen.expr(&mut buf, e)?;
    if !o.tag.is_bool() {
        return Err(CompileError::TypeMismatch(format!(
            "condition of {}",
            o.tag.name()
        )));
    }
    let f = gen.bool_entry(false)?;
    let fr = gen.entry_reg(f);
    Ok((buf, o.reg, fr))
}
