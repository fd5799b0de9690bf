//! Syntax tree with names already resolved to symbol ids.

use super::symbols::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Xor,
    Or,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Bitwise complement, spelled `^`.
    Not,
    Sizeof,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Name(SymbolId),
    Int(i128),
    Float(f64),
    Char(u8),
    Bool(bool),
    Str(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Plain or compound assignment; `op` is the arithmetic half of a
    /// compound spelling like `+=`.
    Assign {
        target: Target,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// Map or string subscript.
    Index {
        base: SymbolId,
        key: Box<Expr>,
    },
    Call {
        target: SymbolId,
        args: Vec<Expr>,
    },
    /// Postfix `++` or `--`.
    Step {
        target: SymbolId,
        down: bool,
    },
    /// Comma expression; the value is the last element's.
    Comma(Vec<Expr>),
}

/// The writable place on the left of an assignment.
#[derive(Debug, Clone)]
pub enum Target {
    Name(SymbolId),
    Slot { map: SymbolId, key: Box<Expr> },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Declare(SymbolId),
    Expr(Option<Expr>),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Expr),
}

#[derive(Debug)]
pub struct Function {
    pub id: SymbolId,
    pub params: Vec<SymbolId>,
    pub body: Stmt,
}

#[derive(Debug)]
pub enum Item {
    Declare(SymbolId),
    Function(Function),
}

/// A parsed translation unit.
#[derive(Debug, Default)]
pub struct Unit {
    pub items: Vec<Item>,
}
