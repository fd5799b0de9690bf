//! Error types for compilation and execution.

use fate_derive::Error;

/// Errors raised while turning source text into an object blob.
///
/// Compilation is non-recoverable: the first error aborts the whole unit.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed character, literal, or number in the source stream.
    #[error("line {line}: lexical error: {msg}")]
    Lex { line: usize, msg: String },
    /// Token stream does not match the grammar.
    #[error("line {line}: syntax error: {msg}")]
    Syntax { line: usize, msg: String },
    /// Numeric literal exceeds the language maxima.
    #[error("line {0}: digit overflows")]
    DigitOverflow(usize),
    /// Name declared twice in the same scope.
    #[error("symbol '{0}' already declared")]
    Redeclared(String),
    /// Name used before any declaration is visible.
    #[error("symbol '{0}' is not declared")]
    Undeclared(String),
    /// Function definition inside another function.
    #[error("nested function definition")]
    NestedFunction,
    /// Call target never defined anywhere in the unit.
    #[error("unresolved function '{0}'")]
    UnresolvedFunction(String),
    /// Call-site argument count differs from the declaration.
    #[error("function '{0}' called with wrong number of arguments")]
    ArityMismatch(String),
    /// Operand or argument type incompatible with its context.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Compile-time memory layout failed (data section allocation).
    #[error("layout error: {0}")]
    Layout(String),
    /// Source could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the memory manager, typed value layer, and engine.
#[derive(Debug, Error)]
pub enum VmError {
    /// Corrupt or truncated object container.
    #[error("malformed object: {0}")]
    MalformedObject(String),
    /// Gas budget went negative before an instruction could run.
    #[error("out of gas")]
    OutOfGas,
    /// Free list exhausted for the requested space.
    #[error("out of memory")]
    OutOfMemory,
    /// Address not traceable to a live allocation.
    #[error("illegal address {0:#x}")]
    IllegalAddress(u64),
    /// Operand type incompatible with the opcode or declared symbol type.
    #[error("{0}: type error")]
    TypeError(&'static str),
    /// Value exceeds the destination's declared width.
    #[error("{0}: overflows")]
    Overflow(&'static str),
    /// Integer or float division by zero.
    #[error("{0}: divide by zero")]
    DivideByZero(&'static str),
    /// Invocation argument shape mismatch.
    #[error("argument error: {0}")]
    ArgumentError(String),
    /// Opcode byte outside the instruction table.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// Named function has no TEXT symbol in the loaded object.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    /// POP or RET with nothing on the value stack.
    #[error("empty stack")]
    EmptyStack,
    /// Register index outside the register file.
    #[error("register {0} out of range")]
    BadRegister(usize),
    /// Stored bytes do not decode as the expected structure.
    #[error("bad value encoding: {0}")]
    BadValue(String),
    /// Key not present in a map.
    #[error("key not found")]
    NotFound,
    /// Page store or contract directory IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(VmError::OutOfGas.to_string(), "out of gas");
        assert_eq!(
            VmError::IllegalAddress(0x10).to_string(),
            "illegal address 0x10"
        );
        assert_eq!(
            CompileError::Undeclared("x".into()).to_string(),
            "symbol 'x' is not declared"
        );
    }

    #[test]
    fn io_conversion() {
        let err: VmError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, VmError::Io(_)));
    }
}
