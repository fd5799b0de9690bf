//! Opcode handlers.
//!
//! Every handler charges no gas itself (the run loop already has) and is
//! responsible for leaving `pc` at the next instruction. Arithmetic is
//! computed in `i128`/`f64` and bounded by the destination's type after the
//! fact, so a literal destination can carry any value the 64-bit families
//! can express while a concrete destination traps on overflow.

use sm2::dsa::signature::Verifier;
use sm2::dsa::{Signature, VerifyingKey};
use sm3::{Digest, Sm3};

use crate::errors::VmError;
use crate::memory::space_of;
use crate::object::{Class, Section};

use super::data::{self, Header, Tag, FLAG_EQ, FLAG_GR, FLAG_LE};
use super::engine::Engine;
use super::isa::{self, Opcode, GENERAL_REGISTER, ROUTE_REGISTER};
use super::{map, string};

/// Default distinguishing identifier of the SM2 signature scheme.
const SM2_IDENT: &str = "1234567812345678";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Or,
    And,
    Xor,
}

impl Engine {
    pub(super) fn execute(&mut self, op: Opcode, word: u64) -> Result<(), VmError> {
        match op {
            Opcode::Nop => {
                self.pc += 1;
                Ok(())
            }
            Opcode::Push => self.op_push(word),
            Opcode::Pop => self.op_pop(word),
            Opcode::Call => self.op_call(word),
            Opcode::Ret => self.op_ret(word),
            Opcode::Jmp => {
                self.pc = self.jump_target(word)?;
                Ok(())
            }
            Opcode::Jz => self.branch(word, self.flags & FLAG_EQ != 0),
            Opcode::Jb => self.branch(word, self.flags & FLAG_LE != 0),
            Opcode::Ja => self.branch(word, self.flags & FLAG_GR != 0),
            Opcode::Jae => self.branch(word, self.flags & (FLAG_EQ | FLAG_GR) != 0),
            Opcode::Jbe => self.branch(word, self.flags & (FLAG_EQ | FLAG_LE) != 0),
            Opcode::Load => self.op_load(word),
            Opcode::Move => self.op_move(word),
            Opcode::Cmp => self.op_cmp(word),
            Opcode::Time => self.op_time(word),
            Opcode::Add => self.arith(word, Arith::Add),
            Opcode::Sub => self.arith(word, Arith::Sub),
            Opcode::Mul => self.arith(word, Arith::Mul),
            Opcode::Div => self.arith(word, Arith::Div),
            Opcode::Mod => self.arith(word, Arith::Mod),
            Opcode::Shl => self.arith(word, Arith::Shl),
            Opcode::Shr => self.arith(word, Arith::Shr),
            Opcode::Neg => self.op_neg(word),
            Opcode::Not => self.op_not(word),
            Opcode::Or => self.arith(word, Arith::Or),
            Opcode::And => self.arith(word, Arith::And),
            Opcode::Xor => self.arith(word, Arith::Xor),
            Opcode::Sizeof => self.op_sizeof(word),
            Opcode::Cut => self.op_cut(word),
            Opcode::Index => self.op_index(word),
            Opcode::Concat => self.op_concat(word),
            Opcode::Find => self.op_find(word),
            Opcode::Insert => self.op_insert(word),
            Opcode::Delete => self.op_delete(word),
            Opcode::Sm3 => self.op_sm3(word),
            Opcode::Sm2 => self.op_sm2(word),
            Opcode::Tmp => self.op_tmp(word),
            Opcode::Elem => self.op_elem(word),
        }
    }

    /// Reads the value header the register named by `operand` points at.
    fn operand_header(&mut self, operand: u16) -> Result<(u64, Header), VmError> {
        let address = self.reg_value(operand)?;
        let h = data::read_header(&mut self.mem, address)?;
        Ok((address, h))
    }

    fn jump_target(&self, word: u64) -> Result<usize, VmError> {
        let target = self.pc as i64 + isa::jump_distance(isa::a(word));
        if target < 0 {
            return Err(VmError::IllegalAddress(word));
        }
        Ok(target as usize)
    }

    fn branch(&mut self, word: u64, take: bool) -> Result<(), VmError> {
        if take {
            self.pc = self.jump_target(word)?;
        } else {
            self.pc += 1;
        }
        Ok(())
    }

    fn op_push(&mut self, word: u64) -> Result<(), VmError> {
        let v = self.reg_value(isa::a(word))?;
        self.push(isa::bcr(v));
        self.pc += 1;
        Ok(())
    }

    fn op_pop(&mut self, word: u64) -> Result<(), VmError> {
        let v = self.pop()?;
        let idx = self.reg(isa::a(word))?;
        self.regs[idx] = v;
        self.pc += 1;
        Ok(())
    }

    /// Saves the return address in the link register and on the stack, then
    /// slides the register window forward by the caller's declared size.
    fn op_call(&mut self, word: u64) -> Result<(), VmError> {
        let target = isa::bcr(word);
        self.regs[1] = self.pc as u64 + 1;
        let link = isa::bcr(self.regs[1]);
        self.push(link);
        let size = self.function_at(target)?.size;
        let caller = self.windows.last().copied().unwrap_or(0);
        self.offset += caller as usize;
        self.windows.push(size);
        self.pc = target as usize;
        Ok(())
    }

    /// Pops the return address and copies the returned value into a fresh
    /// RAM temporary that register 0 then points at, so the value survives
    /// the callee's frame being reused.
    fn op_ret(&mut self, word: u64) -> Result<(), VmError> {
        self.regs[1] = self.pop()?;
        self.pc = isa::bcr(self.regs[1]) as usize;
        let ret = self.reg_value(isa::a(word))?;
        let src = isa::bcr(ret);
        let h = data::read_header(&mut self.mem, src)?;
        self.tmp(0, h.tag)?;
        let dst = self.regs[0];
        data::move_value(&mut self.mem, dst, src)?;
        if self.windows.len() > 1 {
            self.offset -= self.windows[self.windows.len() - 2] as usize;
            self.windows.pop();
        }
        Ok(())
    }

    /// Materializes the operand symbol's live copy, then hands its address
    /// to the destination register.
    ///
    /// Constants initialize once and are skipped afterwards. RAM variables
    /// are reset from their image on every touch. FLASH variables sync
    /// their ephemeral mirror from the persistent copy on first touch and
    /// are remembered for commit.
    fn op_load(&mut self, word: u64) -> Result<(), VmError> {
        let address = isa::bcr(word);
        let found = self
            .object
            .symbols
            .iter()
            .find(|s| {
                s.section == Section::Data && (s.address == address || s.raddress == address)
            })
            .map(|s| (s.class, s.address, s.raddress));
        if let Some((class, saddr, sraddr)) = found {
            let other = if saddr == address { sraddr } else { saddr };
            let mut dst = data::read_header(&mut self.mem, address)?;
            let populated = dst.words != [0, 0, 0];
            let mut remap = true;
            match class {
                Class::Constant => {
                    if populated {
                        remap = false;
                    }
                }
                Class::RamVar => {
                    if populated {
                        match dst.tag {
                            Tag::Map => map::clear(&mut self.mem, address)?,
                            t if t.is_string() => string::clear(&mut self.mem, address)?,
                            _ => {}
                        }
                        dst.words = [0, 0, 0];
                    }
                }
                Class::FlashVar => {
                    if self.loaded.contains(&other) {
                        remap = false;
                    } else {
                        self.loaded.push(other);
                    }
                }
                Class::None => {}
            }
            if remap {
                let src = data::read_header(&mut self.mem, other)?;
                match src.tag {
                    Tag::Map => {
                        let sbk = map::read_bucket(&mut self.mem, src.words[0])?;
                        let bucket = self.mem.alloc(
                            space_of(address)?,
                            map::BUCKET_HEADER_SIZE + sbk.slots.len() as u64 * 8,
                        )?;
                        map::write_bucket(
                            &mut self.mem,
                            bucket,
                            &map::Bucket {
                                ktag: sbk.ktag,
                                vtag: sbk.vtag,
                                slots: vec![0; sbk.slots.len()],
                            },
                        )?;
                        dst.length = 0;
                        dst.words = [bucket, 0, 0];
                    }
                    t if t.is_string() => {
                        dst.length = string::pack_length(0, 0);
                        dst.words = [0, 0, 0];
                    }
                    t => {
                        dst.length = t.scalar_size();
                    }
                }
                data::write_header(&mut self.mem, address, &dst)?;
                data::move_value(&mut self.mem, address, other)?;
            }
        }
        let a = isa::a(word);
        match isa::register_class(a) {
            ROUTE_REGISTER => {}
            GENERAL_REGISTER => {
                let idx = self.reg(a)?;
                self.regs[idx] = address;
            }
            other => return Err(VmError::BadRegister(other as usize)),
        }
        self.pc += 1;
        Ok(())
    }

    fn op_move(&mut self, word: u64) -> Result<(), VmError> {
        let a = isa::a(word);
        match isa::register_class(a) {
            ROUTE_REGISTER => {}
            GENERAL_REGISTER => {
                let dst = self.reg_value(a)?;
                let src = self.reg_value(isa::b(word))?;
                data::move_value(&mut self.mem, dst, src)?;
            }
            other => return Err(VmError::BadRegister(other as usize)),
        }
        self.pc += 1;
        Ok(())
    }

    fn op_cmp(&mut self, word: u64) -> Result<(), VmError> {
        let a = self.reg_value(isa::a(word))?;
        let b = self.reg_value(isa::b(word))?;
        self.flags = data::compare(&mut self.mem, a, b)?;
        self.pc += 1;
        Ok(())
    }

    /// Writes the current unix time, in seconds as decimal text, into the
    /// string the operand register points at.
    fn op_time(&mut self, word: u64) -> Result<(), VmError> {
        let (address, h) = self.operand_header(isa::a(word))?;
        if !h.tag.is_string() {
            return Err(VmError::TypeError(h.tag.name()));
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        string::set_text(&mut self.mem, address, &now.to_string())?;
        self.pc += 1;
        Ok(())
    }

    fn arith(&mut self, word: u64, op: Arith) -> Result<(), VmError> {
        let (address, mut ha) = self.operand_header(isa::a(word))?;
        let (_, hb) = self.operand_header(isa::b(word))?;
        let (_, hc) = self.operand_header(isa::c(word))?;
        if !operands_compatible(op, ha.tag, hb.tag, hc.tag) {
            return Err(VmError::TypeError(ha.tag.name()));
        }
        if ha.tag.is_char() {
            ha.set_byte(char_arith(op, hb.byte(), hc.byte())?);
        } else if ha.tag.is_float() {
            let v = float_arith(op, hb.float(), hc.float())?;
            data::check_float(ha.tag, v)?;
            ha.set_float(v);
        } else if ha.tag.is_integer() {
            let v = int_arith(op, hb.int(), hc.int())?;
            data::check_int(ha.tag, v)?;
            ha.set_int(v);
        } else {
            return Err(VmError::TypeError(ha.tag.name()));
        }
        data::write_header(&mut self.mem, address, &ha)?;
        self.pc += 1;
        Ok(())
    }

    fn op_neg(&mut self, word: u64) -> Result<(), VmError> {
        let (address, mut h) = self.operand_header(isa::a(word))?;
        match h.tag {
            t if t.is_float() => {
                let v = -h.float();
                data::check_float(t, v)?;
                h.set_float(v);
            }
            Tag::ConstInt | Tag::Int8 | Tag::Int16 | Tag::Int32 | Tag::Int64 => {
                let v = -h.int();
                data::check_int(h.tag, v)?;
                h.set_int(v);
            }
            t => return Err(VmError::TypeError(t.name())),
        }
        data::write_header(&mut self.mem, address, &h)?;
        self.pc += 1;
        Ok(())
    }

    /// Bitwise complement: two's complement on signed values, xor against
    /// the width's maximum on unsigned ones.
    fn op_not(&mut self, word: u64) -> Result<(), VmError> {
        let (address, mut h) = self.operand_header(isa::a(word))?;
        match h.tag {
            Tag::ConstInt | Tag::Int8 | Tag::Int16 | Tag::Int32 | Tag::Int64 => {
                let v = !h.int();
                data::check_int(h.tag, v)?;
                h.set_int(v);
            }
            Tag::Uint8 | Tag::Uint16 | Tag::Uint32 | Tag::Uint64 => {
                let (_, hi) = h.tag.int_bounds();
                h.set_int(h.int() ^ hi);
            }
            t => return Err(VmError::TypeError(t.name())),
        }
        data::write_header(&mut self.mem, address, &h)?;
        self.pc += 1;
        Ok(())
    }

    /// Writes the element count of operand B into the numeric destination.
    fn op_sizeof(&mut self, word: u64) -> Result<(), VmError> {
        let (address, mut ha) = self.operand_header(isa::a(word))?;
        let b = self.reg_value(isa::b(word))?;
        let n = data::size_of(&mut self.mem, b)?;
        if ha.tag.is_integer() {
            data::check_int(ha.tag, n as i128)?;
            ha.set_int(n as i128);
        } else if ha.tag.is_float() {
            ha.set_float(n as f64);
        } else {
            return Err(VmError::TypeError(ha.tag.name()));
        }
        data::write_header(&mut self.mem, address, &ha)?;
        self.pc += 1;
        Ok(())
    }

    /// Truncates the string to its first B characters.
    fn op_cut(&mut self, word: u64) -> Result<(), VmError> {
        let (address, ha) = self.operand_header(isa::a(word))?;
        if !ha.tag.is_string() {
            return Err(VmError::TypeError(ha.tag.name()));
        }
        let (_, hb) = self.operand_header(isa::b(word))?;
        if !hb.tag.is_integer() {
            return Err(VmError::TypeError(hb.tag.name()));
        }
        let n = hb.int();
        if n < 0 {
            return Err(VmError::ArgumentError(format!("cut length {}", n)));
        }
        string::cut(&mut self.mem, address, n as u64)?;
        self.pc += 1;
        Ok(())
    }

    /// Points the destination register at character cell C of string B.
    fn op_index(&mut self, word: u64) -> Result<(), VmError> {
        let (b, _) = self.operand_header(isa::b(word))?;
        let (_, hc) = self.operand_header(isa::c(word))?;
        if !hc.tag.is_integer() {
            return Err(VmError::TypeError(hc.tag.name()));
        }
        let index = hc.int();
        if index < 0 {
            return Err(VmError::ArgumentError(format!("index {}", index)));
        }
        let cell = string::char_at(&mut self.mem, b, index as u64)?;
        let idx = self.reg(isa::a(word))?;
        self.regs[idx] = cell;
        self.pc += 1;
        Ok(())
    }

    fn op_concat(&mut self, word: u64) -> Result<(), VmError> {
        let a = self.reg_value(isa::a(word))?;
        let b = self.reg_value(isa::b(word))?;
        string::concat(&mut self.mem, a, b)?;
        self.pc += 1;
        Ok(())
    }

    /// Points the destination register at map B's value for key C.
    fn op_find(&mut self, word: u64) -> Result<(), VmError> {
        let (m, hm) = self.operand_header(isa::b(word))?;
        if hm.tag != Tag::Map {
            return Err(VmError::TypeError(hm.tag.name()));
        }
        let key = self.reg_value(isa::c(word))?;
        let value = map::find(&mut self.mem, m, key)?.ok_or(VmError::NotFound)?;
        let idx = self.reg(isa::a(word))?;
        self.regs[idx] = value;
        self.pc += 1;
        Ok(())
    }

    fn op_insert(&mut self, word: u64) -> Result<(), VmError> {
        let m = self.reg_value(isa::a(word))?;
        let key = self.reg_value(isa::b(word))?;
        let value = self.reg_value(isa::c(word))?;
        map::insert(&mut self.mem, m, key, value)?;
        self.pc += 1;
        Ok(())
    }

    fn op_delete(&mut self, word: u64) -> Result<(), VmError> {
        let m = self.reg_value(isa::a(word))?;
        let key = self.reg_value(isa::b(word))?;
        map::delete(&mut self.mem, m, key)?;
        self.pc += 1;
        Ok(())
    }

    /// SM3 digest of the base58-decoded operand, re-encoded as base58 into
    /// a fresh string register 0 then points at.
    fn op_sm3(&mut self, word: u64) -> Result<(), VmError> {
        let a = self.reg_value(isa::a(word))?;
        let text = string::text(&mut self.mem, a)?;
        let raw = bs58::decode(&text)
            .into_vec()
            .map_err(|_| VmError::ArgumentError(format!("base58 {:?}", text)))?;
        let digest = Sm3::digest(&raw);
        let encoded = bs58::encode(digest.as_slice()).into_string();
        self.tmp(0, Tag::String)?;
        let dst = self.regs[0];
        string::set_text(&mut self.mem, dst, &encoded)?;
        self.pc += 1;
        Ok(())
    }

    /// SM2 signature check over the raw bytes of string B. The signature
    /// (A) and the 33-byte compressed public key (C) arrive base58
    /// encoded. A malformed key or signature is an argument error; a
    /// well-formed signature that does not verify yields false.
    fn op_sm2(&mut self, word: u64) -> Result<(), VmError> {
        let a = self.reg_value(isa::a(word))?;
        let b = self.reg_value(isa::b(word))?;
        let c = self.reg_value(isa::c(word))?;
        let sig_text = string::text(&mut self.mem, a)?;
        let message = string::text(&mut self.mem, b)?;
        let key_text = string::text(&mut self.mem, c)?;
        let sig = bs58::decode(&sig_text)
            .into_vec()
            .map_err(|_| VmError::ArgumentError("base58 signature".into()))?;
        let key = bs58::decode(&key_text)
            .into_vec()
            .map_err(|_| VmError::ArgumentError("base58 public key".into()))?;
        if key.len() != 33 {
            return Err(VmError::ArgumentError(format!(
                "public key of {} bytes",
                key.len()
            )));
        }
        let vk = VerifyingKey::from_sec1_bytes(SM2_IDENT, &key)
            .map_err(|_| VmError::ArgumentError("public key not on curve".into()))?;
        let sig = Signature::try_from(sig.as_slice())
            .map_err(|_| VmError::ArgumentError("malformed signature".into()))?;
        let ok = vk.verify(message.as_bytes(), &sig).is_ok();
        self.tmp(0, Tag::Bool)?;
        let dst = self.regs[0];
        let mut h = data::read_header(&mut self.mem, dst)?;
        h.set_byte(ok as u8);
        data::write_header(&mut self.mem, dst, &h)?;
        self.pc += 1;
        Ok(())
    }

    fn op_tmp(&mut self, word: u64) -> Result<(), VmError> {
        let tag = Tag::try_from(isa::b(word) as u32)?;
        let idx = self.reg(isa::a(word))?;
        self.tmp(idx, tag)?;
        self.pc += 1;
        Ok(())
    }

    /// Membership test: bool A := whether map B holds key C.
    fn op_elem(&mut self, word: u64) -> Result<(), VmError> {
        let (address, mut ha) = self.operand_header(isa::a(word))?;
        if !ha.tag.is_bool() {
            return Err(VmError::TypeError(ha.tag.name()));
        }
        let (m, hm) = self.operand_header(isa::b(word))?;
        if hm.tag != Tag::Map {
            return Err(VmError::TypeError(hm.tag.name()));
        }
        let key = self.reg_value(isa::c(word))?;
        let found = map::find(&mut self.mem, m, key)?.is_some();
        ha.set_byte(found as u8);
        data::write_header(&mut self.mem, address, &ha)?;
        self.pc += 1;
        Ok(())
    }
}

/// Operand typing shared by the three-register arithmetic group. Char
/// destinations take char operands, literal destinations take any family
/// member as long as two concrete sources agree, concrete destinations take
/// their own type or a literal. Shift counts on concrete integers must be
/// unsigned or literal.
fn operands_compatible(op: Arith, da: Tag, db: Tag, dc: Tag) -> bool {
    if da.is_char() {
        return db.is_char() && dc.is_char();
    }
    if da.is_float() {
        if !matches!(op, Arith::Add | Arith::Sub | Arith::Mul | Arith::Div) {
            return false;
        }
        if !(db.is_float() && dc.is_float()) {
            return false;
        }
        if da.is_const() {
            return db.is_const() || dc.is_const() || db == dc;
        }
        return (db == da || db.is_const()) && (dc == da || dc.is_const());
    }
    if da.is_integer() {
        if !(db.is_integer() && dc.is_integer()) {
            return false;
        }
        if da.is_const() {
            return db.is_const() || dc.is_const() || db == dc;
        }
        let db_ok = db == da || db.is_const();
        let dc_ok = if matches!(op, Arith::Shl | Arith::Shr) {
            matches!(
                dc,
                Tag::ConstInt | Tag::Uint8 | Tag::Uint16 | Tag::Uint32 | Tag::Uint64
            )
        } else {
            dc == da || dc.is_const()
        };
        return db_ok && dc_ok;
    }
    false
}

fn char_arith(op: Arith, b: u8, c: u8) -> Result<u8, VmError> {
    Ok(match op {
        Arith::Add => b.wrapping_add(c),
        Arith::Sub => b.wrapping_sub(c),
        Arith::Mul => b.wrapping_mul(c),
        Arith::Div => {
            if c == 0 {
                return Err(VmError::DivideByZero("char division"));
            }
            b / c
        }
        Arith::Mod => {
            if c == 0 {
                return Err(VmError::DivideByZero("char modulo"));
            }
            b % c
        }
        Arith::Shl => {
            if c >= 8 {
                0
            } else {
                b << c
            }
        }
        Arith::Shr => {
            if c >= 8 {
                0
            } else {
                b >> c
            }
        }
        Arith::Or => b | c,
        Arith::And => b & c,
        Arith::Xor => b ^ c,
    })
}

fn shift_count(c: i128) -> Result<u32, VmError> {
    if !(0..=127).contains(&c) {
        return Err(VmError::Overflow("shift count"));
    }
    Ok(c as u32)
}

fn int_arith(op: Arith, b: i128, c: i128) -> Result<i128, VmError> {
    match op {
        Arith::Add => b.checked_add(c).ok_or(VmError::Overflow("addition")),
        Arith::Sub => b.checked_sub(c).ok_or(VmError::Overflow("subtraction")),
        Arith::Mul => b.checked_mul(c).ok_or(VmError::Overflow("multiplication")),
        Arith::Div => {
            if c == 0 {
                return Err(VmError::DivideByZero("integer division"));
            }
            Ok(b.div_euclid(c))
        }
        Arith::Mod => {
            if c == 0 {
                return Err(VmError::DivideByZero("integer modulo"));
            }
            Ok(b.rem_euclid(c))
        }
        Arith::Shl => {
            let n = shift_count(c)?;
            let shifted = b.checked_shl(n).ok_or(VmError::Overflow("left shift"))?;
            if shifted >> n != b {
                return Err(VmError::Overflow("left shift"));
            }
            Ok(shifted)
        }
        Arith::Shr => {
            let n = shift_count(c)?;
            Ok(b >> n)
        }
        Arith::Or => Ok(b | c),
        Arith::And => Ok(b & c),
        Arith::Xor => Ok(b ^ c),
    }
}

fn float_arith(op: Arith, b: f64, c: f64) -> Result<f64, VmError> {
    match op {
        Arith::Add => Ok(b + c),
        Arith::Sub => Ok(b - c),
        Arith::Mul => Ok(b * c),
        Arith::Div => {
            if c == 0.0 {
                return Err(VmError::DivideByZero("float division"));
            }
            Ok(b / c)
        }
        _ => Err(VmError::TypeError("float")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_operand_typing() {
        assert!(operands_compatible(
            Arith::Shl,
            Tag::Int32,
            Tag::Int32,
            Tag::Uint8
        ));
        assert!(!operands_compatible(
            Arith::Shl,
            Tag::Int32,
            Tag::Int32,
            Tag::Int32
        ));
        assert!(operands_compatible(
            Arith::Add,
            Tag::Int32,
            Tag::Int32,
            Tag::Int32
        ));
    }

    #[test]
    fn literal_destination_needs_agreeing_sources() {
        assert!(operands_compatible(
            Arith::Add,
            Tag::ConstInt,
            Tag::Uint64,
            Tag::Uint64
        ));
        assert!(!operands_compatible(
            Arith::Add,
            Tag::ConstInt,
            Tag::Uint64,
            Tag::Int64
        ));
        assert!(operands_compatible(
            Arith::Add,
            Tag::ConstInt,
            Tag::Uint64,
            Tag::ConstInt
        ));
    }

    #[test]
    fn floats_reject_bitwise_group() {
        assert!(!operands_compatible(
            Arith::Mod,
            Tag::Float64,
            Tag::Float64,
            Tag::Float64
        ));
        assert!(!operands_compatible(
            Arith::Xor,
            Tag::Float64,
            Tag::Float64,
            Tag::Float64
        ));
    }

    #[test]
    fn euclidean_division() {
        assert_eq!(int_arith(Arith::Div, -7, 2).unwrap(), -4);
        assert_eq!(int_arith(Arith::Mod, -7, 2).unwrap(), 1);
        assert!(int_arith(Arith::Div, 1, 0).is_err());
    }

    #[test]
    fn char_arithmetic_wraps() {
        assert_eq!(char_arith(Arith::Add, 250, 10).unwrap(), 4);
        assert_eq!(char_arith(Arith::Shl, 1, 9).unwrap(), 0);
        assert!(char_arith(Arith::Div, 1, 0).is_err());
    }
}
