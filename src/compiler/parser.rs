//! Recursive-descent parser.
//!
//! One method per grammar production. Names resolve against the symbol
//! table as they are read, so the tree carries symbol ids instead of
//! strings. A function's name is declared only after its body has been
//! parsed, which rules out recursion and forward calls; its parameters
//! live in a frame wrapped around the body's own scope.

use std::io::Read;

use crate::engine::data::Tag;
use crate::errors::CompileError;
use crate::object::Class;

use super::ast::{BinaryOp, Expr, Function, Item, Stmt, Target, UnaryOp, Unit};
use super::lexer::Lexer;
use super::symbols::{SymbolId, SymbolKind, SymbolTable, VarType};
use super::token::Token;

pub struct Parser<R: Read> {
    lexer: Lexer<R>,
    tok: Token,
    table: SymbolTable,
}

impl<R: Read> Parser<R> {
    pub fn new(input: R) -> Result<Self, CompileError> {
        let mut lexer = Lexer::new(input);
        let tok = lexer.next()?;
        Ok(Parser {
            lexer,
            tok,
            table: SymbolTable::new(),
        })
    }

    /// Parses a whole translation unit: variable definitions and function
    /// definitions, in any order.
    pub fn parse(mut self) -> Result<(Unit, SymbolTable), CompileError> {
        let mut unit = Unit::default();
        loop {
            match self.tok {
                Token::Eof => break,
                Token::Let | Token::Set => {
                    unit.items.push(Item::Declare(self.variable_definition()?));
                }
                Token::Func => {
                    unit.items.push(Item::Function(self.function_definition()?));
                }
                _ => return Err(self.syntax("expect definition")),
            }
        }
        Ok((unit, self.table))
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        let next = self.lexer.next()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), CompileError> {
        if self.tok == tok {
            self.advance()?;
            Ok(())
        } else {
            Err(self.syntax(format!("expect {}", what)))
        }
    }

    fn syntax(&self, msg: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            line: self.lexer.line(),
            msg: msg.into(),
        }
    }

    fn identifier(&mut self) -> Result<String, CompileError> {
        match self.advance()? {
            Token::Ident(name) => Ok(name),
            _ => Err(self.syntax("expect identifier")),
        }
    }

    fn type_specifier(&mut self) -> Result<Tag, CompileError> {
        match self.advance()? {
            Token::Type(tag) => Ok(tag),
            _ => Err(self.syntax("expect type specifier")),
        }
    }

    /// `let name type ;` or `let name[keytype] valuetype ;`, likewise for
    /// `set`. `let` declares an ephemeral variable, `set` a persistent one.
    fn variable_definition(&mut self) -> Result<SymbolId, CompileError> {
        let class = match self.advance()? {
            Token::Let => Class::RamVar,
            _ => Class::FlashVar,
        };
        let name = self.identifier()?;
        let ty = if self.tok == Token::LBracket {
            self.advance()?;
            let key = self.type_specifier()?;
            self.expect(Token::RBracket, "]")?;
            let value = self.type_specifier()?;
            VarType::Map { key, value }
        } else {
            VarType::Scalar(self.type_specifier()?)
        };
        self.expect(Token::Semi, ";")?;
        self.table.declare(name, SymbolKind::Var { class, ty })
    }

    /// `func name(param type, ...) rettype compound-statement`. The name
    /// goes into scope after the body, so a function can only call
    /// functions defined above it.
    fn function_definition(&mut self) -> Result<Function, CompileError> {
        self.advance()?;
        let name = self.identifier()?;
        self.expect(Token::LParen, "(")?;
        self.table.enter();
        let mut params = Vec::new();
        let mut shapes = Vec::new();
        if self.tok != Token::RParen {
            loop {
                let pname = self.identifier()?;
                if self.tok == Token::LBracket {
                    return Err(CompileError::TypeMismatch(format!(
                        "map parameter '{}'",
                        pname
                    )));
                }
                let tag = self.type_specifier()?;
                let id = self.table.declare(pname, SymbolKind::Arg { tag })?;
                params.push(id);
                shapes.push(super::symbols::Param::Value(tag));
                if self.tok != Token::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(Token::RParen, ")")?;
        let ret = self.type_specifier()?;
        let body = self.compound_statement()?;
        self.table.leave();
        let id = self.table.declare(
            name,
            SymbolKind::Func {
                params: shapes,
                ret,
            },
        )?;
        Ok(Function { id, params, body })
    }

    fn compound_statement(&mut self) -> Result<Stmt, CompileError> {
        self.expect(Token::LBrace, "{")?;
        self.table.enter();
        let mut items = Vec::new();
        while self.tok != Token::RBrace {
            if self.tok == Token::Eof {
                return Err(self.syntax("expect }"));
            }
            match self.tok {
                Token::Let | Token::Set => items.push(Stmt::Declare(self.variable_definition()?)),
                _ => items.push(self.statement()?),
            }
        }
        self.table.leave();
        self.advance()?;
        Ok(Stmt::Block(items))
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        match self.tok {
            Token::LBrace => self.compound_statement(),
            Token::If => self.selection_statement(),
            Token::While => self.iteration_statement(),
            Token::Break => {
                self.advance()?;
                self.expect(Token::Semi, ";")?;
                Ok(Stmt::Break)
            }
            Token::Continue => {
                self.advance()?;
                self.expect(Token::Semi, ";")?;
                Ok(Stmt::Continue)
            }
            Token::Return => {
                self.advance()?;
                let value = self.expression()?;
                self.expect(Token::Semi, ";")?;
                Ok(Stmt::Return(value))
            }
            Token::Func => Err(CompileError::NestedFunction),
            Token::Semi => {
                self.advance()?;
                Ok(Stmt::Expr(None))
            }
            _ => {
                let e = self.expression()?;
                self.expect(Token::Semi, ";")?;
                Ok(Stmt::Expr(Some(e)))
            }
        }
    }

    fn selection_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance()?;
        self.expect(Token::LParen, "(")?;
        let cond = self.expression()?;
        self.expect(Token::RParen, ")")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.tok == Token::Else {
            self.advance()?;
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn iteration_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance()?;
        self.expect(Token::LParen, "(")?;
        let cond = self.expression()?;
        self.expect(Token::RParen, ")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { cond, body })
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        let first = self.assignment_expression()?;
        if self.tok != Token::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.tok == Token::Comma {
            self.advance()?;
            items.push(self.assignment_expression()?);
        }
        Ok(Expr::Comma(items))
    }

    fn assignment_operator(&self) -> Option<Option<BinaryOp>> {
        Some(match self.tok {
            Token::Assign => None,
            Token::AddAssign => Some(BinaryOp::Add),
            Token::SubAssign => Some(BinaryOp::Sub),
            Token::MulAssign => Some(BinaryOp::Mul),
            Token::DivAssign => Some(BinaryOp::Div),
            Token::ModAssign => Some(BinaryOp::Mod),
            Token::ShlAssign => Some(BinaryOp::Shl),
            Token::ShrAssign => Some(BinaryOp::Shr),
            Token::AndAssign => Some(BinaryOp::And),
            Token::OrAssign => Some(BinaryOp::Or),
            Token::XorAssign => Some(BinaryOp::Xor),
            _ => return None,
        })
    }

    fn assignment_expression(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.logical_or_expression()?;
        let op = match self.assignment_operator() {
            Some(op) => op,
            None => return Ok(lhs),
        };
        self.advance()?;
        let target = match lhs {
            Expr::Name(id) => Target::Name(id),
            Expr::Index { base, key } => Target::Slot { map: base, key },
            _ => return Err(self.syntax("expect lvalue")),
        };
        let value = self.assignment_expression()?;
        Ok(Expr::Assign {
            target,
            op,
            value: Box::new(value),
        })
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, CompileError>,
        accept: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr, CompileError> {
        let mut lhs = next(self)?;
        while let Some(op) = accept(&self.tok) {
            self.advance()?;
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn logical_or_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::logical_and_expression, |t| match t {
            Token::OrOr => Some(BinaryOp::LogicalOr),
            _ => None,
        })
    }

    fn logical_and_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::inclusive_or_expression, |t| match t {
            Token::AndAnd => Some(BinaryOp::LogicalAnd),
            _ => None,
        })
    }

    fn inclusive_or_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::exclusive_or_expression, |t| match t {
            Token::Pipe => Some(BinaryOp::Or),
            _ => None,
        })
    }

    fn exclusive_or_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::and_expression, |t| match t {
            Token::Caret => Some(BinaryOp::Xor),
            _ => None,
        })
    }

    fn and_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::equality_expression, |t| match t {
            Token::Amp => Some(BinaryOp::And),
            _ => None,
        })
    }

    fn equality_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::relational_expression, |t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::Ne => Some(BinaryOp::Ne),
            _ => None,
        })
    }

    fn relational_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::shift_expression, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Le => Some(BinaryOp::Le),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn shift_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::additive_expression, |t| match t {
            Token::Shl => Some(BinaryOp::Shl),
            Token::Shr => Some(BinaryOp::Shr),
            _ => None,
        })
    }

    fn additive_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::multiplicative_expression, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn multiplicative_expression(&mut self) -> Result<Expr, CompileError> {
        self.binary_chain(Self::unary_expression, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Mod),
            _ => None,
        })
    }

    fn unary_expression(&mut self) -> Result<Expr, CompileError> {
        let op = match self.tok {
            Token::Sizeof => UnaryOp::Sizeof,
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            Token::Caret => UnaryOp::Not,
            _ => return self.postfix_expression(),
        };
        self.advance()?;
        let operand = self.unary_expression()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// A primary expression followed by at most one postfix: subscript,
    /// call, `++` or `--`. All four apply to names only.
    fn postfix_expression(&mut self) -> Result<Expr, CompileError> {
        let prim = self.primary_expression()?;
        match self.tok {
            Token::LBracket => {
                let base = self.named(prim, "subscript")?;
                self.advance()?;
                let key = self.expression()?;
                self.expect(Token::RBracket, "]")?;
                Ok(Expr::Index {
                    base,
                    key: Box::new(key),
                })
            }
            Token::LParen => {
                let target = self.named(prim, "call")?;
                if !matches!(self.table.info(target).kind, SymbolKind::Func { .. }) {
                    return Err(CompileError::UnresolvedFunction(
                        self.table.info(target).name.clone(),
                    ));
                }
                self.advance()?;
                let mut args = Vec::new();
                if self.tok != Token::RParen {
                    loop {
                        args.push(self.assignment_expression()?);
                        if self.tok != Token::Comma {
                            break;
                        }
                        self.advance()?;
                    }
                }
                self.expect(Token::RParen, ")")?;
                Ok(Expr::Call { target, args })
            }
            Token::Inc => {
                let target = self.named(prim, "++")?;
                self.advance()?;
                Ok(Expr::Step {
                    target,
                    down: false,
                })
            }
            Token::Dec => {
                let target = self.named(prim, "--")?;
                self.advance()?;
                Ok(Expr::Step { target, down: true })
            }
            _ => Ok(prim),
        }
    }

    fn named(&self, e: Expr, what: &str) -> Result<SymbolId, CompileError> {
        match e {
            Expr::Name(id) => Ok(id),
            _ => Err(self.syntax(format!("{} of a non-name", what))),
        }
    }

    fn primary_expression(&mut self) -> Result<Expr, CompileError> {
        match self.tok.clone() {
            Token::LParen => {
                self.advance()?;
                let e = self.expression()?;
                self.expect(Token::RParen, ")")?;
                Ok(e)
            }
            Token::Ident(name) => {
                self.advance()?;
                match self.table.resolve(&name) {
                    Some(id) => Ok(Expr::Name(id)),
                    None => {
                        // An unknown name followed by ( is a call to a
                        // function defined below or nowhere.
                        if self.tok == Token::LParen {
                            Err(CompileError::UnresolvedFunction(name))
                        } else {
                            Err(CompileError::Undeclared(name))
                        }
                    }
                }
            }
            Token::Int(v) => {
                self.advance()?;
                Ok(Expr::Int(v))
            }
            Token::Float(v) => {
                self.advance()?;
                Ok(Expr::Float(v))
            }
            Token::Char(v) => {
                self.advance()?;
                Ok(Expr::Char(v))
            }
            Token::Bool(v) => {
                self.advance()?;
                Ok(Expr::Bool(v))
            }
            Token::Str(v) => {
                self.advance()?;
                Ok(Expr::Str(v))
            }
            _ => Err(self.syntax("expect expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<(Unit, SymbolTable), CompileError> {
        Parser::new(src.as_bytes())?.parse()
    }

    #[test]
    fn counter_contract() {
        let (unit, table) = parse(
            "set counter uint64;\n\
             func bump() uint64 {\n\
                 counter = counter + 1;\n\
                 return counter;\n\
             }\n",
        )
        .unwrap();
        assert_eq!(unit.items.len(), 2);
        let id = table.resolve("bump").unwrap();
        assert!(matches!(
            table.info(id).kind,
            SymbolKind::Func { ref params, ret: Tag::Uint64 } if params.is_empty()
        ));
    }

    #[test]
    fn map_declarator() {
        let (_, table) = parse("let balances[string] uint64;").unwrap();
        let id = table.resolve("balances").unwrap();
        assert!(matches!(
            table.info(id).kind,
            SymbolKind::Var {
                class: Class::RamVar,
                ty: VarType::Map {
                    key: Tag::String,
                    value: Tag::Uint64
                }
            }
        ));
    }

    #[test]
    fn define_before_use() {
        let err = parse(
            "func a() bool { return b(); }\n\
             func b() bool { return true; }\n",
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedFunction(name) if name == "b"));
    }

    #[test]
    fn no_recursion() {
        let err = parse("func f() bool { return f(); }").unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedFunction(name) if name == "f"));
    }

    #[test]
    fn nested_function_rejected() {
        let err = parse("func f() bool { func g() bool { return true; } }").unwrap_err();
        assert!(matches!(err, CompileError::NestedFunction));
    }

    #[test]
    fn undeclared_name() {
        let err = parse("func f() bool { return x; }").unwrap_err();
        assert!(matches!(err, CompileError::Undeclared(name) if name == "x"));
    }

    #[test]
    fn redeclaration() {
        let err = parse("let x bool;\nlet x bool;").unwrap_err();
        assert!(matches!(err, CompileError::Redeclared(name) if name == "x"));
    }

    #[test]
    fn shadowing_across_scopes() {
        parse(
            "let x bool;\n\
             func f() bool {\n\
                 let x uint32;\n\
                 x = 1;\n\
                 return true;\n\
             }\n",
        )
        .unwrap();
    }

    #[test]
    fn lvalue_required() {
        let err = parse("func f(a uint32) uint32 { 1 = a; return a; }").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn map_parameter_rejected() {
        let err = parse("func f(m[string] uint64) bool { return true; }").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch(_)));
    }

    #[test]
    fn statement_forms() {
        parse(
            "func f(n uint32) uint32 {\n\
                 let total uint32;\n\
                 let i uint32;\n\
                 i = 0;\n\
                 while (i < n) {\n\
                     if (i == 3) { i++; continue; }\n\
                     if (i > 7) break;\n\
                     total += i, i++;\n\
                 }\n\
                 return total;\n\
             }\n",
        )
        .unwrap();
    }
}
