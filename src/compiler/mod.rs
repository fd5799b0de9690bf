//! The contract compiler.
//!
//! Source goes through a pull [`lexer`], a recursive-descent [`parser`]
//! that resolves every name against the scoped [`symbols`] table as it
//! reads (functions must be defined before use, which rules out
//! recursion), and a code generation pass that lowers the tree to
//! instruction words and lays persistent storage out through the live
//! memory manager.

pub mod ast;
mod codegen;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod token;

pub use codegen::Generator;
pub use parser::Parser;

use crate::errors::CompileError;
use crate::memory::Memory;
use crate::object::Object;

/// Compiles a contract source into an object. Persistent storage for its
/// variables and constants is allocated in `mem` and flushed on success.
pub fn compile(source: &str, mem: &mut Memory) -> Result<Object, CompileError> {
    let (unit, table) = Parser::new(source.as_bytes())?.parse()?;
    Generator::new(table, mem)?.run(&unit)
}
