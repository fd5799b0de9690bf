//! Contract deployment and invocation.
//!
//! Each deployed contract owns one directory under the runtime root,
//! named by the base58 SM3 digest of its source, holding the compiled
//! object (`ft`) next to the page files of its persistent memory. An
//! invocation opens the directory, runs one exported function on a fresh
//! engine, and commits the touched persistent variables back before
//! reporting the rendered result and the gas left over.

use std::fs;
use std::path::PathBuf;

use sm3::{Digest, Sm3};

use crate::compiler;
use crate::engine::data::Tag;
use crate::engine::Engine;
use crate::errors::{CompileError, VmError};
use crate::memory::store::FileStore;
use crate::memory::Memory;
use crate::object::Object;
use crate::{error, info};

/// File the compiled object is kept under inside a contract directory.
pub const OBJECT_FILE: &str = "ft";

/// The rendered result of one invocation.
#[derive(Debug)]
pub struct Invocation {
    /// `type: value` rendering of the returned value.
    pub output: String,
    /// Gas balance after the run.
    pub gas_left: i64,
}

pub struct Runtime {
    root: PathBuf,
}

impl Runtime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Runtime { root: root.into() }
    }

    pub fn contract_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Compiles `source` into a fresh contract directory and returns the
    /// contract id. Deploying identical source twice resets the earlier
    /// contract's storage.
    pub fn deploy(&self, source: &str) -> Result<String, CompileError> {
        let id = bs58::encode(Sm3::digest(source.as_bytes()).as_slice()).into_string();
        let dir = self.contract_dir(&id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        let store = FileStore::new(&dir).map_err(|e| CompileError::Layout(e.to_string()))?;
        let mut mem =
            Memory::create(Box::new(store)).map_err(|e| CompileError::Layout(e.to_string()))?;
        let object = match compiler::compile(source, &mut mem) {
            Ok(object) => object,
            Err(e) => {
                error!("deploy failed: {}", e);
                let _ = fs::remove_dir_all(&dir);
                return Err(e);
            }
        };
        fs::write(dir.join(OBJECT_FILE), object.encode())?;
        info!(
            "deployed {} ({} words, {} symbols)",
            id,
            object.text.len(),
            object.symbols.len()
        );
        Ok(id)
    }

    pub fn object(&self, id: &str) -> Result<Object, VmError> {
        let raw = fs::read(self.contract_dir(id).join(OBJECT_FILE))?;
        Object::decode(&raw)
    }

    /// Runs one function of a deployed contract. Persistent variables
    /// the run touched are committed before the result is returned, so a
    /// failed run leaves storage as the previous invocation left it.
    pub fn invoke(
        &self,
        id: &str,
        function: &str,
        gas: i64,
        args: &[Vec<u8>],
    ) -> Result<Invocation, VmError> {
        let dir = self.contract_dir(id);
        let object = self.object(id)?;
        let store = FileStore::new(&dir)?;
        let mut engine = Engine::new(Box::new(store), object, function, gas, args)?;
        let output = engine.run()?;
        engine.commit()?;
        let gas_left = engine.gas();
        info!("{}::{} -> {} (gas left {})", id, function, output, gas_left);
        Ok(Invocation { output, gas_left })
    }
}

/// Builds the wire form of one invocation argument: the type tag in
/// little-endian followed by the payload, textual for numbers and
/// strings, a single byte for booleans and characters.
pub fn encode_argument(tag: Tag, text: &str) -> Result<Vec<u8>, VmError> {
    let mut blob = (tag as u32).to_le_bytes().to_vec();
    match tag {
        Tag::Bool | Tag::ConstBool => match text {
            "true" => blob.push(1),
            "false" => blob.push(0),
            _ => return Err(VmError::ArgumentError(format!("bad bool {:?}", text))),
        },
        Tag::Char | Tag::ConstChar => {
            let b = *text
                .as_bytes()
                .first()
                .ok_or_else(|| VmError::ArgumentError("empty char".into()))?;
            blob.push(b);
        }
        Tag::Map => return Err(VmError::ArgumentError("map argument".into())),
        _ => blob.extend_from_slice(text.as_bytes()),
    }
    Ok(blob)
}

/// Parses a command-line `type:value` argument pair.
pub fn parse_argument(pair: &str) -> Result<Vec<u8>, VmError> {
    let (name, text) = pair
        .split_once(':')
        .ok_or_else(|| VmError::ArgumentError(format!("expected type:value, got {:?}", pair)))?;
    let tag = match name {
        "bool" => Tag::Bool,
        "char" => Tag::Char,
        "int8" => Tag::Int8,
        "int16" => Tag::Int16,
        "int32" => Tag::Int32,
        "int64" => Tag::Int64,
        "uint8" => Tag::Uint8,
        "uint16" => Tag::Uint16,
        "uint32" => Tag::Uint32,
        "uint64" => Tag::Uint64,
        "string" => Tag::String,
        "float32" => Tag::Float32,
        "float64" => Tag::Float64,
        _ => return Err(VmError::ArgumentError(format!("unknown type {:?}", name))),
    };
    encode_argument(tag, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const COUNTER: &str = "\
set count uint64;\n\
func bump(by uint64) uint64 {\n\
    count += by;\n\
    return count;\n\
}\n\
func peek() uint64 {\n\
    return count;\n\
}\n";

    #[test]
    fn deploy_and_invoke() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt.deploy("func add(a int32, b int32) int32 { return a + b; }").unwrap();
        let args = vec![
            parse_argument("int32:2").unwrap(),
            parse_argument("int32:3").unwrap(),
        ];
        let out = rt.invoke(&id, "add", 1_000_000, &args).unwrap();
        assert_eq!(out.output, "int32: 5");
        assert!(out.gas_left > 0 && out.gas_left < 1_000_000);
    }

    #[test]
    fn persistent_state_survives_invocations() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt.deploy(COUNTER).unwrap();
        let by = vec![parse_argument("uint64:5").unwrap()];
        assert_eq!(rt.invoke(&id, "bump", 1_000_000, &by).unwrap().output, "uint64: 5");
        assert_eq!(rt.invoke(&id, "bump", 1_000_000, &by).unwrap().output, "uint64: 10");
        // A fresh engine sees the committed value.
        assert_eq!(rt.invoke(&id, "peek", 1_000_000, &[]).unwrap().output, "uint64: 10");
    }

    #[test]
    fn out_of_gas_stops_the_run() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt.deploy(COUNTER).unwrap();
        let by = vec![parse_argument("uint64:1").unwrap()];
        assert!(matches!(
            rt.invoke(&id, "bump", 10, &by),
            Err(VmError::OutOfGas)
        ));
        // The aborted run committed nothing.
        assert_eq!(rt.invoke(&id, "peek", 1_000_000, &[]).unwrap().output, "uint64: 0");
    }

    #[test]
    fn unknown_function_and_arity() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt.deploy(COUNTER).unwrap();
        assert!(matches!(
            rt.invoke(&id, "missing", 1_000, &[]),
            Err(VmError::UnknownFunction(_))
        ));
        assert!(matches!(
            rt.invoke(&id, "bump", 1_000, &[]),
            Err(VmError::ArgumentError(_))
        ));
    }

    #[test]
    fn redeploy_resets_storage() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt.deploy(COUNTER).unwrap();
        let by = vec![parse_argument("uint64:7").unwrap()];
        rt.invoke(&id, "bump", 1_000_000, &by).unwrap();
        let again = rt.deploy(COUNTER).unwrap();
        assert_eq!(again, id);
        assert_eq!(rt.invoke(&id, "peek", 1_000_000, &[]).unwrap().output, "uint64: 0");
    }

    #[test]
    fn argument_encoding() {
        assert_eq!(parse_argument("bool:true").unwrap()[4..], [1]);
        assert_eq!(parse_argument("char:A").unwrap()[4..], [b'A']);
        assert_eq!(&parse_argument("uint64:42").unwrap()[4..], b"42");
        assert_eq!(&parse_argument("string:hi").unwrap()[4..], b"hi");
        assert!(parse_argument("uint64").is_err());
        assert!(parse_argument("list:1").is_err());
    }

    #[test]
    fn strings_and_library_functions() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt
            .deploy(
                "func greet(name string) string {\n\
                     return append(\"hello \", name);\n\
                 }\n",
            )
            .unwrap();
        let args = vec![parse_argument("string:fate").unwrap()];
        let out = rt.invoke(&id, "greet", 1_000_000, &args).unwrap();
        assert_eq!(out.output, "string: hello fate");
    }

    #[test]
    fn map_state_per_key() {
        let dir = tempdir().unwrap();
        let rt = Runtime::new(dir.path());
        let id = rt
            .deploy(
                "set held[string] uint64;\n\
                 func give(who string, n uint64) uint64 {\n\
                     if (elem(held, who)) held[who] += n;\n\
                     else held[who] = n;\n\
                     return held[who];\n\
                 }\n\
                 func holds(who string) bool {\n\
                     return elem(held, who);\n\
                 }\n",
            )
            .unwrap();
        let give = |who: &str, n: &str| {
            vec![
                parse_argument(&format!("string:{}", who)).unwrap(),
                parse_argument(&format!("uint64:{}", n)).unwrap(),
            ]
        };
        assert_eq!(rt.invoke(&id, "give", 1_000_000, &give("ann", "3")).unwrap().output, "uint64: 3");
        assert_eq!(rt.invoke(&id, "give", 1_000_000, &give("bob", "4")).unwrap().output, "uint64: 4");
        assert_eq!(rt.invoke(&id, "give", 1_000_000, &give("ann", "2")).unwrap().output, "uint64: 5");
        let ann = vec![parse_argument("string:ann").unwrap()];
        assert_eq!(rt.invoke(&id, "holds", 1_000_000, &ann).unwrap().output, "bool: true");
        let eve = vec![parse_argument("string:eve").unwrap()];
        assert_eq!(rt.invoke(&id, "holds", 1_000_000, &eve).unwrap().output, "bool: false");
    }
}
