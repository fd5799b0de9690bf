//! Fate contract platform.
//!
//! A small typed language compiled to fixed-width bytecode and executed by a
//! gas-metered register virtual machine whose address space is backed by a
//! paged, two-tier (RAM/FLASH) persistent memory manager.

pub mod compiler;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod object;
pub mod runtime;
pub mod utils;
