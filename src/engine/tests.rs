//! End-to-end engine tests over hand-assembled objects.

use super::data::{self, Header, Tag};
use super::isa::{make_op, make_op_addr, Opcode};
use super::Engine;
use crate::errors::VmError;
use crate::memory::store::FileStore;
use crate::memory::{Memory, Space};
use crate::object::{Class, Object, Section, Symbol};

fn text_symbol(name: &str, size: u32, value: u32, extra: u32) -> Symbol {
    Symbol {
        name: name.into(),
        section: Section::Text,
        class: Class::None,
        size,
        value,
        extra,
        address: 0,
        raddress: 0,
    }
}

fn data_symbol(name: &str, class: Class, address: u64, raddress: u64) -> Symbol {
    Symbol {
        name: name.into(),
        section: Section::Data,
        class,
        size: 0,
        value: 0,
        extra: 0,
        address,
        raddress,
    }
}

fn const_int(v: i128) -> Header {
    let mut h = Header::zeroed(Tag::ConstInt);
    h.set_int(v);
    h
}

fn data_section(headers: &[Header]) -> Vec<u8> {
    let mut out = Vec::new();
    for h in headers {
        out.extend_from_slice(&h.encode());
    }
    out
}

fn int_argument(tag: Tag, v: i64) -> Vec<u8> {
    let mut raw = (tag as u32).to_le_bytes().to_vec();
    raw.extend_from_slice(v.to_string().as_bytes());
    raw
}

/// `main() { return 2 + 3; }` against a constant pool. Each constant is a
/// live slot plus its master image, the way compiled objects lay them out.
fn addition_object() -> Object {
    Object {
        text: vec![
            make_op(Opcode::Pop, 0, 0, 0),
            make_op_addr(Opcode::Load, 2, 0),
            make_op_addr(Opcode::Load, 3, 72),
            make_op(Opcode::Tmp, 4, Tag::ConstInt as u16, 0),
            make_op(Opcode::Add, 4, 2, 3),
            make_op(Opcode::Push, 0, 0, 0),
            make_op(Opcode::Ret, 4, 0, 0),
        ],
        symbols: vec![
            text_symbol("main", 8, 0, 0),
            data_symbol("$c2", Class::Constant, 0, 36),
            data_symbol("$c3", Class::Constant, 72, 108),
        ],
        data: data_section(&[
            Header::zeroed(Tag::ConstInt),
            const_int(2),
            Header::zeroed(Tag::ConstInt),
            const_int(3),
        ]),
    }
}

#[test]
fn adds_constants() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, addition_object(), "main", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int: 5");
}

#[test]
fn runs_out_of_gas_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, addition_object(), "main", 0, &[]).unwrap();
    assert!(matches!(engine.run(), Err(VmError::OutOfGas)));
}

#[test]
fn rejects_unknown_function() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    assert!(matches!(
        Engine::new(store, addition_object(), "absent", 10_000, &[]),
        Err(VmError::UnknownFunction(_))
    ));
}

#[test]
fn binds_arguments_through_the_stack() {
    // echo(v int64) { return v; }
    let object = Object {
        text: vec![
            make_op(Opcode::Pop, 0, 0, 0),
            make_op(Opcode::Pop, 2, 0, 0),
            make_op(Opcode::Push, 0, 0, 0),
            make_op(Opcode::Ret, 2, 0, 0),
        ],
        symbols: vec![text_symbol("echo", 4, 0, 1)],
        data: Vec::new(),
    };
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let args = vec![int_argument(Tag::Int64, 7)];
    let mut engine = Engine::new(store, object, "echo", 10_000, &args).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 7");
}

#[test]
fn arity_mismatch_is_an_argument_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    assert!(matches!(
        Engine::new(
            store,
            addition_object(),
            "main",
            10_000,
            &[int_argument(Tag::Int64, 1)]
        ),
        Err(VmError::ArgumentError(_))
    ));
}

#[test]
fn calls_shift_the_register_window() {
    // main() { return double(2); }  double(v) { return v + v; }
    let object = Object {
        text: vec![
            make_op(Opcode::Pop, 0, 0, 0),
            make_op(Opcode::Push, 0, 0, 0),
            make_op_addr(Opcode::Load, 2, 0),
            make_op(Opcode::Push, 2, 0, 0),
            make_op_addr(Opcode::Call, 0, 6),
            make_op(Opcode::Ret, 0, 0, 0),
            // double:
            make_op(Opcode::Pop, 0, 0, 0),
            make_op(Opcode::Pop, 2, 0, 0),
            make_op(Opcode::Push, 0, 0, 0),
            make_op(Opcode::Tmp, 3, Tag::ConstInt as u16, 0),
            make_op(Opcode::Add, 3, 2, 2),
            make_op(Opcode::Ret, 3, 0, 0),
        ],
        symbols: vec![
            text_symbol("main", 8, 0, 0),
            text_symbol("double", 6, 6, 1),
            data_symbol("$c2", Class::Constant, 0, 36),
        ],
        data: data_section(&[Header::zeroed(Tag::ConstInt), const_int(2)]),
    };
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, object, "main", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int: 4");
}

/// `bump() { counter = counter + 1; return counter; }` with a persistent
/// counter. The object references the counter's pre-allocated FLASH address.
fn counter_object(flash_address: u64) -> Object {
    Object {
        text: vec![
            make_op(Opcode::Pop, 0, 0, 0),
            make_op_addr(Opcode::Load, 2, 0),
            make_op_addr(Opcode::Load, 3, 36),
            make_op(Opcode::Add, 2, 2, 3),
            make_op(Opcode::Push, 0, 0, 0),
            make_op(Opcode::Ret, 2, 0, 0),
        ],
        symbols: vec![
            text_symbol("bump", 8, 0, 0),
            data_symbol("counter", Class::FlashVar, flash_address, 0),
            data_symbol("$c1", Class::Constant, 36, 72),
        ],
        data: data_section(&[
            Header::zeroed(Tag::Int64),
            Header::zeroed(Tag::ConstInt),
            const_int(1),
        ]),
    }
}

#[test]
fn flash_counter_survives_reload() {
    let dir = tempfile::tempdir().unwrap();

    // deploy time: reserve the persistent counter
    let mut mem = Memory::create(Box::new(FileStore::new(dir.path()).unwrap())).unwrap();
    let counter = data::new_scalar(&mut mem, Space::Flash, Tag::Int64).unwrap();
    mem.flush().unwrap();
    drop(mem);

    let object = counter_object(counter);

    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, object.clone(), "bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 1");
    engine.commit().unwrap();
    // nothing left to write back, so a second commit changes nothing
    engine.commit().unwrap();
    drop(engine);

    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, object, "bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 2");
}

#[test]
fn uncommitted_runs_leave_flash_untouched() {
    let dir = tempfile::tempdir().unwrap();

    let mut mem = Memory::create(Box::new(FileStore::new(dir.path()).unwrap())).unwrap();
    let counter = data::new_scalar(&mut mem, Space::Flash, Tag::Int64).unwrap();
    mem.flush().unwrap();
    drop(mem);

    let object = counter_object(counter);

    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, object.clone(), "bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 1");
    drop(engine); // no commit

    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, object, "bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 1");
}

#[test]
fn rebind_reuses_the_address_space() {
    let dir = tempfile::tempdir().unwrap();

    let mut mem = Memory::create(Box::new(FileStore::new(dir.path()).unwrap())).unwrap();
    let counter = data::new_scalar(&mut mem, Space::Flash, Tag::Int64).unwrap();
    mem.flush().unwrap();
    drop(mem);

    let store = Box::new(FileStore::new(dir.path()).unwrap());
    let mut engine = Engine::new(store, counter_object(counter), "bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 1");
    // same engine, fresh gas: the RAM mirror is already loaded and keeps
    // accumulating until a commit writes it back
    engine.rebind("bump", 10_000, &[]).unwrap();
    assert_eq!(engine.run().unwrap(), "int64: 2");
}
