//! Buffered lexer over an arbitrary byte stream.
//!
//! Reads in fixed-size chunks with a two-byte pushback buffer, which is
//! enough lookahead for the longest ambiguous operator (`<<=`, `>>=`).
//! `#` starts a comment running to the end of the line. String literals
//! are double quoted, character literals single quoted; neither form has
//! escape sequences, so a literal cannot span a line or contain its own
//! delimiter.

use std::io::Read;

use crate::errors::CompileError;

use super::token::{self, Token};

const BUFFER_SIZE: usize = 1024;
const ROLL_SIZE: usize = 2;

pub struct Lexer<R: Read> {
    input: R,
    buffer: [u8; BUFFER_SIZE],
    len: usize,
    pos: usize,
    roll: [u8; ROLL_SIZE],
    rolled: usize,
    line: usize,
}

impl<R: Read> Lexer<R> {
    pub fn new(input: R) -> Self {
        Lexer {
            input,
            buffer: [0; BUFFER_SIZE],
            len: 0,
            pos: 0,
            roll: [0; ROLL_SIZE],
            rolled: 0,
            line: 1,
        }
    }

    /// Line number of the most recently produced token.
    pub fn line(&self) -> usize {
        self.line
    }

    fn fetch(&mut self) -> Result<Option<u8>, CompileError> {
        if self.rolled > 0 {
            self.rolled -= 1;
            return Ok(Some(self.roll[self.rolled]));
        }
        if self.pos == self.len {
            self.len = self.input.read(&mut self.buffer)?;
            self.pos = 0;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let b = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn unfetch(&mut self, b: u8) {
        if self.rolled < ROLL_SIZE {
            self.roll[self.rolled] = b;
            self.rolled += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::Lex {
            line: self.line,
            msg: msg.into(),
        }
    }

    /// Produces the next token, or [`Token::Eof`] at the end of input.
    pub fn next(&mut self) -> Result<Token, CompileError> {
        loop {
            let b = match self.fetch()? {
                Some(b) => b,
                None => return Ok(Token::Eof),
            };
            match b {
                b'\n' => self.line += 1,
                b'#' => self.comment()?,
                b'\'' => return self.char_literal(),
                b'"' => return self.string_literal(),
                b if token::is_space(b) => {}
                b if token::is_alpha(b) => return self.word(b),
                b if token::is_digit(b) => return self.number(b),
                b => return self.symbol(b),
            }
        }
    }

    fn comment(&mut self) -> Result<(), CompileError> {
        loop {
            match self.fetch()? {
                None => return Ok(()),
                Some(b'\n') => {
                    self.line += 1;
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    fn word(&mut self, first: u8) -> Result<Token, CompileError> {
        let mut word = vec![first];
        loop {
            match self.fetch()? {
                Some(b) if token::is_alnum(b) => word.push(b),
                Some(b) => {
                    self.unfetch(b);
                    break;
                }
                None => break,
            }
        }
        let word = String::from_utf8(word).map_err(|_| self.err("non-ascii identifier"))?;
        Ok(Token::keyword(&word).unwrap_or(Token::Ident(word)))
    }

    fn char_literal(&mut self) -> Result<Token, CompileError> {
        let b = match self.fetch()? {
            None | Some(b'\n') | Some(b'\'') => {
                return Err(self.err("illegal character literal"))
            }
            Some(b) => b,
        };
        match self.fetch()? {
            Some(b'\'') => Ok(Token::Char(b)),
            _ => Err(self.err("illegal character literal")),
        }
    }

    fn string_literal(&mut self) -> Result<Token, CompileError> {
        let mut text = Vec::new();
        loop {
            match self.fetch()? {
                None | Some(b'\n') => return Err(self.err("unterminated string literal")),
                Some(b'"') => break,
                Some(b) => text.push(b),
            }
        }
        let text = String::from_utf8(text).map_err(|_| self.err("non-utf8 string literal"))?;
        Ok(Token::Str(text))
    }

    fn number(&mut self, first: u8) -> Result<Token, CompileError> {
        if first == b'0' {
            match self.fetch()? {
                Some(b'x') | Some(b'X') => return self.hex(),
                Some(b) => self.unfetch(b),
                None => return Ok(Token::Int(0)),
            }
        }
        let mut word = vec![first];
        let mut float = false;
        loop {
            match self.fetch()? {
                None => break,
                Some(b'.') if float => {
                    return Err(self.err("illegal digit format"));
                }
                Some(b'.') => {
                    float = true;
                    word.push(b'.');
                }
                Some(b @ (b'e' | b'E')) => {
                    float = true;
                    word.push(b);
                    match self.fetch()? {
                        Some(c @ (b'-' | b'+')) => word.push(c),
                        Some(c) if token::is_digit(c) => word.push(c),
                        _ => return Err(self.err("illegal exponent")),
                    }
                }
                Some(b) if token::is_digit(b) => word.push(b),
                Some(b) => {
                    self.unfetch(b);
                    break;
                }
            }
        }
        let word = String::from_utf8(word).expect("digits are ascii");
        if float {
            let v: f64 = word
                .parse()
                .map_err(|_| self.err("illegal digit format"))?;
            if !v.is_finite() {
                return Err(CompileError::DigitOverflow(self.line));
            }
            return Ok(Token::Float(v));
        }
        let v: i128 = word
            .parse()
            .map_err(|_| CompileError::DigitOverflow(self.line))?;
        if v > u64::MAX as i128 {
            return Err(CompileError::DigitOverflow(self.line));
        }
        Ok(Token::Int(v))
    }

    fn hex(&mut self) -> Result<Token, CompileError> {
        let mut word = String::new();
        loop {
            match self.fetch()? {
                Some(b) if token::is_xdigit(b) => word.push(b as char),
                Some(b) => {
                    self.unfetch(b);
                    break;
                }
                None => break,
            }
        }
        if word.is_empty() {
            return Err(self.err("illegal digit format"));
        }
        let v = i128::from_str_radix(&word, 16)
            .map_err(|_| CompileError::DigitOverflow(self.line))?;
        if v > u64::MAX as i128 {
            return Err(CompileError::DigitOverflow(self.line));
        }
        Ok(Token::Int(v))
    }

    /// One more byte of lookahead picking between two operator spellings.
    fn pick(&mut self, next: u8, long: Token, short: Token) -> Result<Token, CompileError> {
        match self.fetch()? {
            Some(b) if b == next => Ok(long),
            Some(b) => {
                self.unfetch(b);
                Ok(short)
            }
            None => Ok(short),
        }
    }

    fn symbol(&mut self, b: u8) -> Result<Token, CompileError> {
        Ok(match b {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b';' => Token::Semi,
            b'=' => self.pick(b'=', Token::Eq, Token::Assign)?,
            b'!' => match self.fetch()? {
                Some(b'=') => Token::Ne,
                _ => return Err(self.err("unexpected '!'")),
            },
            b'+' => match self.fetch()? {
                Some(b'+') => Token::Inc,
                Some(b'=') => Token::AddAssign,
                Some(c) => {
                    self.unfetch(c);
                    Token::Plus
                }
                None => Token::Plus,
            },
            b'-' => match self.fetch()? {
                Some(b'-') => Token::Dec,
                Some(b'=') => Token::SubAssign,
                Some(c) => {
                    self.unfetch(c);
                    Token::Minus
                }
                None => Token::Minus,
            },
            b'*' => self.pick(b'=', Token::MulAssign, Token::Star)?,
            b'/' => self.pick(b'=', Token::DivAssign, Token::Slash)?,
            b'%' => self.pick(b'=', Token::ModAssign, Token::Percent)?,
            b'^' => self.pick(b'=', Token::XorAssign, Token::Caret)?,
            b'<' => match self.fetch()? {
                Some(b'=') => Token::Le,
                Some(b'<') => self.pick(b'=', Token::ShlAssign, Token::Shl)?,
                Some(c) => {
                    self.unfetch(c);
                    Token::Lt
                }
                None => Token::Lt,
            },
            b'>' => match self.fetch()? {
                Some(b'=') => Token::Ge,
                Some(b'>') => self.pick(b'=', Token::ShrAssign, Token::Shr)?,
                Some(c) => {
                    self.unfetch(c);
                    Token::Gt
                }
                None => Token::Gt,
            },
            b'&' => match self.fetch()? {
                Some(b'&') => Token::AndAnd,
                Some(b'=') => Token::AndAssign,
                Some(c) => {
                    self.unfetch(c);
                    Token::Amp
                }
                None => Token::Amp,
            },
            b'|' => match self.fetch()? {
                Some(b'|') => Token::OrOr,
                Some(b'=') => Token::OrAssign,
                Some(c) => {
                    self.unfetch(c);
                    Token::Pipe
                }
                None => Token::Pipe,
            },
            b => return Err(self.err(format!("unexpected byte {:?}", b as char))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::data::Tag;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let tok = lexer.next().unwrap();
            if tok == Token::Eof {
                return out;
            }
            out.push(tok);
        }
    }

    #[test]
    fn words_and_keywords() {
        assert_eq!(
            tokens("let counter uint64"),
            vec![
                Token::Let,
                Token::Ident("counter".into()),
                Token::Type(Tag::Uint64)
            ]
        );
    }

    #[test]
    fn maximal_munch_operators() {
        assert_eq!(
            tokens("< << <<= <= >= >> >>= == != ++ += -- -= && &= || |= ^="),
            vec![
                Token::Lt,
                Token::Shl,
                Token::ShlAssign,
                Token::Le,
                Token::Ge,
                Token::Shr,
                Token::ShrAssign,
                Token::Eq,
                Token::Ne,
                Token::Inc,
                Token::AddAssign,
                Token::Dec,
                Token::SubAssign,
                Token::AndAnd,
                Token::AndAssign,
                Token::OrOr,
                Token::OrAssign,
                Token::XorAssign,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(tokens("0 42 0x1F"), vec![
            Token::Int(0),
            Token::Int(42),
            Token::Int(0x1F)
        ]);
        assert_eq!(tokens("3.5 1e3 2.5e-2"), vec![
            Token::Float(3.5),
            Token::Float(1000.0),
            Token::Float(0.025)
        ]);
    }

    #[test]
    fn integer_overflow() {
        let mut lexer = Lexer::new("18446744073709551616".as_bytes());
        assert!(matches!(lexer.next(), Err(CompileError::DigitOverflow(1))));
    }

    #[test]
    fn char_and_string_literals() {
        assert_eq!(tokens("'a' \"hi\""), vec![
            Token::Char(b'a'),
            Token::Str("hi".into())
        ]);
        let mut lexer = Lexer::new("\"open".as_bytes());
        assert!(matches!(lexer.next(), Err(CompileError::Lex { .. })));
        let mut lexer = Lexer::new("'ab'".as_bytes());
        assert!(matches!(lexer.next(), Err(CompileError::Lex { .. })));
    }

    #[test]
    fn comments_and_lines() {
        let mut lexer = Lexer::new("# header\nlet # trailing\nx".as_bytes());
        assert_eq!(lexer.next().unwrap(), Token::Let);
        assert_eq!(lexer.line(), 2);
        assert_eq!(lexer.next().unwrap(), Token::Ident("x".into()));
        assert_eq!(lexer.line(), 3);
        assert_eq!(lexer.next().unwrap(), Token::Eof);
    }

    #[test]
    fn rejects_stray_bytes() {
        let mut lexer = Lexer::new("@".as_bytes());
        assert!(matches!(lexer.next(), Err(CompileError::Lex { .. })));
    }
}
