//! Token kinds and the character classification table.

use crate::engine::data::Tag;

/// Decimal digit.
pub const DIGIT: u8 = 1 << 0;
/// Hexadecimal digit.
pub const XDIGIT: u8 = 1 << 1;
/// Letter or underscore.
pub const ALPHA: u8 = 1 << 2;
/// Horizontal whitespace.
pub const SPACE: u8 = 1 << 3;
/// Line terminator.
pub const NEWLINE: u8 = 1 << 4;

const CLASSES: [u8; 256] = build_classes();

const fn build_classes() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        let mut c = 0u8;
        if b >= b'0' && b <= b'9' {
            c |= DIGIT | XDIGIT;
        }
        if (b >= b'a' && b <= b'f') || (b >= b'A' && b <= b'F') {
            c |= XDIGIT;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            c |= ALPHA;
        }
        if b == b' ' || b == b'\t' || b == b'\r' {
            c |= SPACE;
        }
        if b == b'\n' {
            c |= NEWLINE;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Returns the class bits of a byte.
pub const fn class_of(b: u8) -> u8 {
    CLASSES[b as usize]
}

pub const fn is_digit(b: u8) -> bool {
    class_of(b) & DIGIT != 0
}

pub const fn is_xdigit(b: u8) -> bool {
    class_of(b) & XDIGIT != 0
}

pub const fn is_alpha(b: u8) -> bool {
    class_of(b) & ALPHA != 0
}

pub const fn is_alnum(b: u8) -> bool {
    class_of(b) & (ALPHA | DIGIT) != 0
}

pub const fn is_space(b: u8) -> bool {
    class_of(b) & SPACE != 0
}

pub const fn is_newline(b: u8) -> bool {
    class_of(b) & NEWLINE != 0
}

/// A lexical token. Ambiguous operator spellings are resolved by maximal
/// munch, so `<<=` is one token, not three.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i128),
    Float(f64),
    Char(u8),
    Bool(bool),
    Str(String),

    If,
    Else,
    While,
    Break,
    Continue,
    Return,
    Sizeof,
    Let,
    Set,
    Func,
    Type(Tag),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,

    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Inc,
    Dec,

    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    AndAnd,
    OrOr,

    Eof,
}

impl Token {
    /// Looks a word up in the reserved-word registry.
    pub fn keyword(word: &str) -> Option<Token> {
        Some(match word {
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "return" => Token::Return,
            "sizeof" => Token::Sizeof,
            "let" => Token::Let,
            "set" => Token::Set,
            "func" => Token::Func,
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            "bool" => Token::Type(Tag::Bool),
            "char" => Token::Type(Tag::Char),
            "string" => Token::Type(Tag::String),
            "int8" => Token::Type(Tag::Int8),
            "int16" => Token::Type(Tag::Int16),
            "int32" => Token::Type(Tag::Int32),
            "int64" => Token::Type(Tag::Int64),
            "uint8" => Token::Type(Tag::Uint8),
            "uint16" => Token::Type(Tag::Uint16),
            "uint32" => Token::Type(Tag::Uint32),
            "uint64" => Token::Type(Tag::Uint64),
            "float32" => Token::Type(Tag::Float32),
            "float64" => Token::Type(Tag::Float64),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert!(is_digit(b'7') && is_xdigit(b'7'));
        assert!(is_xdigit(b'f') && is_xdigit(b'F') && !is_digit(b'f'));
        assert!(is_alpha(b'_') && is_alpha(b'z'));
        assert!(is_alnum(b'9') && is_alnum(b'a'));
        assert!(is_space(b'\t') && !is_space(b'\n'));
        assert!(is_newline(b'\n'));
        assert_eq!(class_of(b'#'), 0);
    }

    #[test]
    fn keywords() {
        assert_eq!(Token::keyword("while"), Some(Token::While));
        assert_eq!(Token::keyword("uint64"), Some(Token::Type(Tag::Uint64)));
        assert_eq!(Token::keyword("true"), Some(Token::Bool(true)));
        assert_eq!(Token::keyword("counter"), None);
    }
}
