//! The fate contract tool.
//!
//! Deploys contract sources into a local contract store and invokes
//! their functions.
//!
//! # Usage
//! ```text
//! fate build <source-file> [OPTIONS]
//! fate run <contract-id> <function> [type:value ...] [OPTIONS]
//! fate asm <contract-id> [OPTIONS]
//! ```

use std::env;
use std::fs;
use std::process;

use fate::engine::disasm;
use fate::runtime::{parse_argument, Runtime};
use fate::{error, info};

const DEFAULT_GAS: i64 = 1_000_000;
const DEFAULT_ROOT: &str = "contracts";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut root = env::var("FATE_ROOT").unwrap_or_else(|_| DEFAULT_ROOT.to_string());
    let mut gas = DEFAULT_GAS;
    let mut rest: Vec<&str> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--root" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--root requires an argument");
                    process::exit(1);
                }
                root = args[i].clone();
                i += 1;
            }
            "--gas" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--gas requires an argument");
                    process::exit(1);
                }
                gas = match args[i].parse() {
                    Ok(v) => v,
                    Err(_) => {
                        eprintln!("Invalid gas amount: {}", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            other => {
                rest.push(other);
                i += 1;
            }
        }
    }

    let rt = Runtime::new(root);
    match args[1].as_str() {
        "build" => build(&rt, &rest),
        "run" => run(&rt, &rest, gas),
        "asm" => asm(&rt, &rest),
        other => {
            eprintln!("Unknown command: {}\n", other);
            print_usage(&args[0]);
            process::exit(1);
        }
    }
}

fn build(rt: &Runtime, rest: &[&str]) {
    let [path] = rest else {
        eprintln!("build takes exactly one source file");
        process::exit(1);
    };
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot read {}: {}", path, e);
            process::exit(1);
        }
    };
    match rt.deploy(&source) {
        Ok(id) => {
            info!("Contract deployed");
            println!("{}", id);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

fn run(rt: &Runtime, rest: &[&str], gas: i64) {
    let [id, function, raw_args @ ..] = rest else {
        eprintln!("run takes a contract id and a function name");
        process::exit(1);
    };
    let mut call_args = Vec::with_capacity(raw_args.len());
    for pair in raw_args {
        match parse_argument(pair) {
            Ok(blob) => call_args.push(blob),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }
    match rt.invoke(id, function, gas, &call_args) {
        Ok(done) => {
            println!("{}", done.output);
            info!("Gas left: {}", done.gas_left);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

fn asm(rt: &Runtime, rest: &[&str]) {
    let [id] = rest else {
        eprintln!("asm takes exactly one contract id");
        process::exit(1);
    };
    match rt.object(id) {
        Ok(object) => print!("{}", disasm::disassemble(&object)),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

const USAGE: &str = "\
Fate contract tool

USAGE:
    {program} build <source-file> [OPTIONS]
    {program} run <contract-id> <function> [type:value ...] [OPTIONS]
    {program} asm <contract-id> [OPTIONS]

COMMANDS:
    build    Compile and deploy a contract, printing its id
    run      Invoke a function of a deployed contract
    asm      Disassemble a deployed contract

OPTIONS:
    --root <dir>    Contract store directory (default: contracts)
    --gas <n>       Gas budget for run (default: 1000000)
    -h, --help      Print this help message

ENVIRONMENT:
    FATE_ROOT    Contract store directory, overridden by --root

EXAMPLES:
    # Deploy a counter contract
    {program} build counter.ft

    # Bump it by five
    {program} run <contract-id> bump uint64:5

    # Inspect its bytecode
    {program} asm <contract-id>
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
