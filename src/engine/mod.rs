//! Bytecode execution engine.
//!
//! Executes the fixed-width instruction stream of a loaded object over the
//! paged memory manager. One engine instance runs one invocation to
//! completion on one thread; there is no internal suspension point.
//!
//! # Architecture
//!
//! - **Registers**: 1024 registers holding value addresses; register 0 is the
//!   argument/return channel, register 1 the return-address slot. Calls slide
//!   a register window by the caller's live-register count.
//! - **Instruction format**: one u64 per instruction,
//!   `op<<56 | a<<40 | b<<16 | c`; the low 40 bits double as the address
//!   immediate of `LOAD`/`CALL`; operand A's top bit is the sign flag of
//!   relative jumps.
//! - **Gas metering**: a fixed per-opcode cost is charged before dispatch;
//!   the run aborts once the budget goes negative.
//! - **Remap/commit**: the first `LOAD` of a persistent variable copies it
//!   into an ephemeral mirror; [`Engine::commit`] writes mirrors back and
//!   flushes dirty pages.
//!
//! # Modules
//!
//! - [`isa`]: instruction table, gas costs, word encode/decode
//! - [`data`]: typed value headers and scalar operations
//! - [`string`]: growable string values
//! - [`map`]: chained-bucket hash maps
//! - [`ops`]: per-opcode handlers
//! - [`disasm`]: object disassembly

pub mod data;
pub mod disasm;
pub mod isa;
pub mod map;
pub mod ops;
pub mod string;

mod engine;
#[cfg(test)]
mod tests;

pub use engine::{Engine, DEFAULT_REGISTER_COUNT, DEFAULT_STACK_SIZE};
