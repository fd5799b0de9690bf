//! Instruction set definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode list and invokes a callback macro for code generation, so several
//! modules (dispatch, disassembly, code generation) can derive opcode-related
//! code without duplicating the table.
//!
//! This module generates:
//! - The [`Opcode`] enum with numeric values
//! - `TryFrom<u8>` for decoding opcodes
//! - [`Opcode::mnemonic`] and [`Opcode::gas`]
//!
//! # Instruction Format
//!
//! Every instruction is one 64-bit word:
//!
//! ```text
//! 63      56 55      40 39      16 15       0
//! [ opcode ][    A    ][    B    ][    C    ]
//! ```
//!
//! The opcode occupies the top 8 bits; A, B and C are 16-bit operands
//! (destination, first source, second source). `LOAD` and `CALL` instead
//! read the low 40 bits as a single address immediate ([`bcr`]). Relative
//! jumps carry their distance in A with the top bit as a sign flag.

use crate::errors::VmError;

/// Sign flag of a relative jump distance held in operand A.
pub const SIGN_BIT: u16 = 0x8000;
/// Magnitude mask of a relative jump distance held in operand A.
pub const DATA_BIT: u16 = 0x7FFF;

/// Register operand class: an ordinary window-relative register.
pub const GENERAL_REGISTER: u16 = 0;
/// Register operand class: a discard register, writes to it are dropped.
pub const ROUTE_REGISTER: u16 = 1;

/// Invokes a callback macro with the complete opcode definition list.
///
/// Entries are `Name = opcode, mnemonic, gas`.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack and control flow
            // =========================
            /// NOP ; no effect
            Nop = 0x00, "NOP", 1,
            /// PUSH a ; push regs[a] onto the value stack
            Push = 0x01, "PUSH", 32,
            /// POP a ; pop the value stack into regs[a]
            Pop = 0x02, "POP", 32,
            /// CALL addr ; save return pc, jump to function at instruction index addr
            Call = 0x03, "CALL", 32,
            /// RET a ; return regs[a] to the caller, restore pc and register window
            Ret = 0x04, "RET", 32,
            /// JMP a ; pc += ±a (relative, sign-magnitude)
            Jmp = 0x05, "JMP", 16,
            /// JZ a ; pc += ±a if the EQ flag is set
            Jz = 0x06, "JZ", 16,
            /// JB a ; pc += ±a if the LE flag is set
            Jb = 0x07, "JB", 16,
            /// JA a ; pc += ±a if the GR flag is set
            Ja = 0x08, "JA", 16,
            // =========================
            // Data movement
            // =========================
            /// LOAD a, addr ; bind the variable at addr to regs[a], remapping persistent storage
            Load = 0x09, "LOAD", 8,
            /// MOVE a, b ; assign the value of regs[b] into regs[a]
            Move = 0x0A, "MOVE", 64,
            /// CMP a, b ; compare regs[a] with regs[b], set EQ/LE/GR flags
            Cmp = 0x0B, "CMP", 64,
            /// TIME a ; write the current unix time into string regs[a]
            Time = 0x0C, "TIME", 32,
            // =========================
            // Arithmetic
            // =========================
            /// ADD a, b, c ; regs[a] = regs[b] + regs[c]
            Add = 0x0D, "ADD", 4,
            /// SUB a, b, c ; regs[a] = regs[b] - regs[c]
            Sub = 0x0E, "SUB", 4,
            /// MUL a, b, c ; regs[a] = regs[b] * regs[c]
            Mul = 0x0F, "MUL", 8,
            /// DIV a, b, c ; regs[a] = regs[b] / regs[c] (fails on zero divisor)
            Div = 0x10, "DIV", 8,
            /// MOD a, b, c ; regs[a] = regs[b] % regs[c] (fails on zero divisor)
            Mod = 0x11, "MOD", 8,
            /// SHL a, b, c ; regs[a] = regs[b] << regs[c]
            Shl = 0x12, "SHL", 4,
            /// SHR a, b, c ; regs[a] = regs[b] >> regs[c]
            Shr = 0x13, "SHR", 4,
            /// NEG a, b ; regs[a] = -regs[b]
            Neg = 0x14, "NEG", 4,
            /// NOT a, b ; regs[a] = !regs[b]
            Not = 0x15, "NOT", 4,
            /// OR a, b, c ; regs[a] = regs[b] | regs[c]
            Or = 0x16, "OR", 4,
            /// AND a, b, c ; regs[a] = regs[b] & regs[c]
            And = 0x17, "AND", 4,
            /// XOR a, b, c ; regs[a] = regs[b] ^ regs[c]
            Xor = 0x18, "XOR", 4,
            // =========================
            // Strings and maps
            // =========================
            /// SIZEOF a, b ; numeric regs[a] = element count of regs[b]
            Sizeof = 0x19, "SIZEOF", 4,
            /// CUT a, b ; truncate string regs[a] to its first regs[b] characters
            Cut = 0x1A, "CUT", 8,
            /// INDEX a, b, c ; regs[a] = address of character regs[c] of string regs[b]
            Index = 0x1B, "INDEX", 16,
            /// CONCAT a, b ; append char or string regs[b] to string regs[a]
            Concat = 0x1C, "CONCAT", 32,
            /// FIND a, b, c ; regs[a] = address of map regs[b]'s value for key regs[c]
            Find = 0x1D, "FIND", 32,
            /// INSERT a, b, c ; regs[a][regs[b]] = regs[c], inserting or overwriting
            Insert = 0x1E, "INSERT", 64,
            /// DELETE a, b ; remove key regs[b] from map regs[a]
            Delete = 0x1F, "DELETE", 32,
            // =========================
            // Host functions
            // =========================
            /// SM3 a ; reg0 = base58 sm3 digest of string regs[a]
            Sm3 = 0x20, "SM3", 512,
            /// SM2 a, b, c ; reg0 = signature regs[a] over data regs[b] verifies under key regs[c]
            Sm2 = 0x21, "SM2", 1024,
            /// TMP a, b ; regs[a] = fresh zero value of type regs[b]
            Tmp = 0x22, "TMP", 64,
            // =========================
            // Combined-flag jumps
            // =========================
            /// JAE a ; pc += ±a if EQ or GR is set
            Jae = 0x23, "JAE", 16,
            /// JBE a ; pc += ±a if EQ or LE is set
            Jbe = 0x24, "JBE", 16,
            /// ELEM a, b, c ; bool regs[a] = whether map regs[b] holds key regs[c]
            Elem = 0x25, "ELEM", 32,
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal, $gas:expr
        ),* $(,)?
    ) => {
        /// A decoded opcode.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VmError::UnknownOpcode(value)),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the gas cost charged before this opcode executes.
            pub const fn gas(&self) -> i64 {
                match self {
                    $( Opcode::$name => $gas, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// Assembles an instruction word from an opcode and three 16-bit operands.
pub const fn make_op(op: Opcode, a: u16, b: u16, c: u16) -> u64 {
    (op as u64) << 56 | (a as u64) << 40 | (b as u64) << 16 | c as u64
}

/// Assembles an instruction word from an opcode, operand A and a 40-bit
/// address immediate.
pub const fn make_op_addr(op: Opcode, a: u16, bcr: u64) -> u64 {
    (op as u64) << 56 | (a as u64) << 40 | (bcr & 0xFF_FFFF_FFFF)
}

/// Extracts the opcode byte of an instruction word.
pub const fn op(word: u64) -> u8 {
    (word >> 56) as u8
}

/// Extracts operand A.
pub const fn a(word: u64) -> u16 {
    (word >> 40) as u16
}

/// Extracts operand B.
pub const fn b(word: u64) -> u16 {
    (word >> 16) as u16
}

/// Extracts operand C.
pub const fn c(word: u64) -> u16 {
    word as u16
}

/// Extracts the low 40 bits as an address immediate.
pub const fn bcr(word: u64) -> u64 {
    word & 0xFF_FFFF_FFFF
}

/// Decodes a sign-magnitude jump distance from operand A.
pub const fn jump_distance(a: u16) -> i64 {
    let mag = (a & DATA_BIT) as i64;
    if a & SIGN_BIT != 0 {
        -mag
    } else {
        mag
    }
}

/// Encodes a signed jump distance into operand A.
pub const fn encode_distance(d: i64) -> u16 {
    if d < 0 {
        SIGN_BIT | (-d as u16 & DATA_BIT)
    } else {
        d as u16 & DATA_BIT
    }
}

/// Returns the class of a register operand. The top two payload bits
/// select between general and discard registers.
pub const fn register_class(r: u16) -> u16 {
    (r >> 14) & 0x3
}

/// Returns the register index of a register operand.
pub const fn register_index(r: u16) -> u16 {
    r & 0x3FFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from_invalid() {
        assert!(matches!(
            Opcode::try_from(0xFF),
            Err(VmError::UnknownOpcode(0xFF))
        ));
        assert!(matches!(
            Opcode::try_from(0x26),
            Err(VmError::UnknownOpcode(0x26))
        ));
    }

    #[test]
    fn word_field_round_trip() {
        let w = make_op(Opcode::Add, 3, 7, 11);
        assert_eq!(op(w), Opcode::Add as u8);
        assert_eq!(a(w), 3);
        assert_eq!(b(w), 7);
        assert_eq!(c(w), 11);
    }

    #[test]
    fn address_immediate_spans_low_forty_bits() {
        let w = make_op_addr(Opcode::Load, 2, 0xAB_CDEF_0123);
        assert_eq!(op(w), Opcode::Load as u8);
        assert_eq!(a(w), 2);
        assert_eq!(bcr(w), 0xAB_CDEF_0123);
    }

    #[test]
    fn jump_distance_sign_magnitude() {
        assert_eq!(jump_distance(encode_distance(5)), 5);
        assert_eq!(jump_distance(encode_distance(-12)), -12);
        assert_eq!(jump_distance(0), 0);
        assert_eq!(jump_distance(SIGN_BIT | 1), -1);
    }

    #[test]
    fn register_operand_classes() {
        assert_eq!(register_class(5), GENERAL_REGISTER);
        assert_eq!(register_class(1 << 14 | 5), ROUTE_REGISTER);
        assert_eq!(register_index(1 << 14 | 5), 5);
    }

    #[test]
    fn gas_table() {
        assert_eq!(Opcode::Nop.gas(), 1);
        assert_eq!(Opcode::Move.gas(), 64);
        assert_eq!(Opcode::Sm2.gas(), 1024);
        assert_eq!(Opcode::Elem.gas(), 32);
    }
}
