//! Scoped symbol table shared by the parser and the code generator.
//!
//! Names resolve at parse time against a stack of lexical frames; every
//! declaration also lands in a flat arena so later passes can refer to a
//! symbol by index after its frame is gone. The root frame is preloaded
//! with the intrinsic library functions.

use std::collections::HashMap;

use crate::engine::data::Tag;
use crate::errors::CompileError;
use crate::object::Class;

/// Index of a declared symbol in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub usize);

/// Declared type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Scalar(Tag),
    Map { key: Tag, value: Tag },
}

/// Declared parameter shape of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Any map, whatever its key and value types.
    Map,
    /// Any scalar value. Used by the map intrinsics for keys and values.
    Any,
    /// A concrete scalar type, also accepting literals of its family.
    Value(Tag),
}

#[derive(Debug, Clone)]
pub enum SymbolKind {
    Var { class: Class, ty: VarType },
    Arg { tag: Tag },
    Func { params: Vec<Param>, ret: Tag },
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    /// Register bound by the generator within the function being built,
    /// zero while unbound.
    pub reg: u16,
    /// Data-section entry index for variables; object symbol index for
    /// functions. Assigned by the generator.
    pub slot: Option<u32>,
}

#[derive(Debug)]
pub struct SymbolTable {
    infos: Vec<SymbolInfo>,
    frames: Vec<HashMap<String, SymbolId>>,
}

impl SymbolTable {
    /// Builds a table whose root frame holds the intrinsic functions.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            infos: Vec::new(),
            frames: vec![HashMap::new()],
        };
        for (name, params, ret) in intrinsics() {
            table
                .declare(name.to_string(), SymbolKind::Func { params, ret })
                .expect("intrinsic names are distinct");
        }
        table
    }

    pub fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn leave(&mut self) {
        self.frames.pop();
    }

    /// Nesting depth, zero at the root frame.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Declares a name in the innermost frame.
    pub fn declare(&mut self, name: String, kind: SymbolKind) -> Result<SymbolId, CompileError> {
        let frame = self.frames.last_mut().expect("root frame always present");
        if frame.contains_key(&name) {
            return Err(CompileError::Redeclared(name));
        }
        let id = SymbolId(self.infos.len());
        frame.insert(name.clone(), id);
        self.infos.push(SymbolInfo {
            name,
            kind,
            reg: 0,
            slot: None,
        });
        Ok(id)
    }

    /// Resolves a name against the frame stack, innermost first.
    pub fn resolve(&self, name: &str) -> Option<SymbolId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }

    pub fn info(&self, id: SymbolId) -> &SymbolInfo {
        &self.infos[id.0]
    }

    pub fn info_mut(&mut self, id: SymbolId) -> &mut SymbolInfo {
        &mut self.infos[id.0]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

/// The intrinsic library surface: host-backed helpers every contract can
/// call without declaring them.
fn intrinsics() -> Vec<(&'static str, Vec<Param>, Tag)> {
    vec![
        ("time", vec![], Tag::String),
        ("delete", vec![Param::Map, Param::Any], Tag::Bool),
        ("elem", vec![Param::Map, Param::Any], Tag::Bool),
        ("sm3Hash", vec![Param::Value(Tag::String)], Tag::String),
        (
            "sm2Verify",
            vec![
                Param::Value(Tag::String),
                Param::Value(Tag::String),
                Param::Value(Tag::String),
            ],
            Tag::Bool,
        ),
        (
            "append",
            vec![Param::Value(Tag::String), Param::Value(Tag::String)],
            Tag::String,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_preloaded() {
        let table = SymbolTable::new();
        for name in ["time", "delete", "elem", "sm3Hash", "sm2Verify", "append"] {
            let id = table.resolve(name).unwrap();
            assert!(matches!(table.info(id).kind, SymbolKind::Func { .. }));
        }
    }

    #[test]
    fn shadowing_and_scope_exit() {
        let mut table = SymbolTable::new();
        let outer = table
            .declare(
                "x".into(),
                SymbolKind::Var {
                    class: Class::RamVar,
                    ty: VarType::Scalar(Tag::Int32),
                },
            )
            .unwrap();
        table.enter();
        let inner = table
            .declare(
                "x".into(),
                SymbolKind::Var {
                    class: Class::RamVar,
                    ty: VarType::Scalar(Tag::Bool),
                },
            )
            .unwrap();
        assert_eq!(table.resolve("x"), Some(inner));
        table.leave();
        assert_eq!(table.resolve("x"), Some(outer));
    }

    #[test]
    fn redeclaration_in_same_frame() {
        let mut table = SymbolTable::new();
        let kind = SymbolKind::Var {
            class: Class::RamVar,
            ty: VarType::Scalar(Tag::Int32),
        };
        table.declare("x".into(), kind.clone()).unwrap();
        assert!(matches!(
            table.declare("x".into(), kind),
            Err(CompileError::Redeclared(_))
        ));
    }
}
