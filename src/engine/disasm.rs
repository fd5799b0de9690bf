//! Textual listing of a compiled object.

use std::fmt::Write;

use crate::engine::isa::{self, Opcode};
use crate::object::{Class, Object, Section};

/// Renders symbols and instructions as an assembly listing. CALL and LOAD
/// operands are resolved back to symbol names where possible, jump operands
/// are shown as signed distances.
pub fn disassemble(object: &Object) -> String {
    let mut out = String::new();
    let mut funcs: Vec<(u64, &str)> = Vec::new();
    let mut vars: Vec<(u64, &str)> = Vec::new();

    for sym in &object.symbols {
        match sym.section {
            Section::Text => {
                let _ = writeln!(out, "func {}:\t{}\t{:#x}", sym.name, sym.size, sym.value);
                funcs.push((sym.value as u64, &sym.name));
            }
            Section::Data => {
                let class = match sym.class {
                    Class::Constant => "constant",
                    Class::RamVar => "ram var",
                    Class::FlashVar => "flash var",
                    Class::None => "data",
                };
                let _ = writeln!(
                    out,
                    "data {}:\t{}\t{:#x}\t{:#x}",
                    sym.name, class, sym.address, sym.raddress
                );
                // the operand of a LOAD is always the RAM-side address
                let operand = match sym.class {
                    Class::FlashVar => sym.raddress,
                    _ => sym.address,
                };
                if sym.class != Class::Constant {
                    vars.push((operand, &sym.name));
                }
            }
        }
    }

    for (i, &word) in object.text.iter().enumerate() {
        if let Some((_, name)) = funcs.iter().find(|(entry, _)| *entry == i as u64) {
            let _ = writeln!(out, "{}:", name);
        }
        out.push('\t');
        out.push_str(&render_word(word, &funcs, &vars));
        out.push('\n');
    }
    out
}

fn render_word(word: u64, funcs: &[(u64, &str)], vars: &[(u64, &str)]) -> String {
    let code = match Opcode::try_from(isa::op(word)) {
        Ok(code) => code,
        Err(_) => return format!(".word {:#018x}", word),
    };
    let operands = match code {
        Opcode::Call => {
            let target = isa::bcr(word);
            match funcs.iter().find(|(entry, _)| *entry == target) {
                Some((_, name)) => name.to_string(),
                None => format!("{:#x}", target),
            }
        }
        Opcode::Load => {
            let address = isa::bcr(word);
            match vars.iter().find(|(operand, _)| *operand == address) {
                Some((_, name)) => format!("{}\t{}", isa::a(word), name),
                None => format!("{}\t{:#x}", isa::a(word), address),
            }
        }
        Opcode::Jmp | Opcode::Jz | Opcode::Jb | Opcode::Ja | Opcode::Jae | Opcode::Jbe => {
            format!("{}", isa::jump_distance(isa::a(word)))
        }
        _ => format!("{}\t{}\t{}", isa::a(word), isa::b(word), isa::c(word)),
    };
    format!("{}\t{}", code.mnemonic(), operands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::isa::{encode_distance, make_op, make_op_addr};
    use crate::object::Symbol;

    #[test]
    fn listing_resolves_symbols() {
        let object = Object {
            text: vec![
                make_op_addr(Opcode::Load, 2, 0x24),
                make_op_addr(Opcode::Call, 0, 3),
                make_op(Opcode::Ret, 2, 0, 0),
                make_op(Opcode::Jmp, encode_distance(-2), 0, 0),
            ],
            symbols: vec![
                Symbol {
                    name: "main".into(),
                    section: Section::Text,
                    class: Class::None,
                    size: 4,
                    value: 0,
                    extra: 0,
                    address: 0,
                    raddress: 0,
                },
                Symbol {
                    name: "helper".into(),
                    section: Section::Text,
                    class: Class::None,
                    size: 2,
                    value: 3,
                    extra: 0,
                    address: 0,
                    raddress: 0,
                },
                Symbol {
                    name: "total".into(),
                    section: Section::Data,
                    class: Class::RamVar,
                    size: 0,
                    value: 0,
                    extra: 0,
                    address: 0x24,
                    raddress: 0x48,
                },
            ],
            data: Vec::new(),
        };
        let listing = disassemble(&object);
        assert!(listing.contains("main:"));
        assert!(listing.contains("helper:"));
        assert!(listing.contains("LOAD\t2\ttotal"));
        assert!(listing.contains("CALL\thelper"));
        assert!(listing.contains("JMP\t-2"));
    }

    #[test]
    fn unknown_words_fall_back_to_raw() {
        let object = Object {
            text: vec![0xFF << 56],
            symbols: Vec::new(),
            data: Vec::new(),
        };
        assert!(disassemble(&object).contains(".word"));
    }
}
