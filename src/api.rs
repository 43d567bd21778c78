//! The embedding surface: `new_vm`/`free_vm`/`interpret`, the three
//! entry points an embedder (or the shell binary in `main.rs`) needs.
//! Nothing outside this module should construct a `Compiler` or drive a
//! `Vm::run_chunk` directly.

use std::io::Write;

use super::compiler::Compiler;
use super::reporter::Reporter;
use super::vm::{InterpretResult, Vm};

pub fn new_vm() -> Vm {
    Vm::new()
}

pub fn free_vm(vm: Vm) {
    drop(vm)
}

/// Compiles and runs `source` against `vm`. A leading UTF-8 BOM is
/// stripped here rather than in the lexer, so a lexer fed a bare string
/// slice (as in every lexer test) never has to think about encoding
/// markers at all.
pub fn interpret(vm: &mut Vm, source: &str, reporter: &mut dyn Reporter, out: &mut dyn Write) -> InterpretResult {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let compiler = Compiler::new(source, reporter);
    match compiler.compile() {
        Err(()) => InterpretResult::CompileError,
        Ok(chunk) => vm.run_chunk(chunk, reporter, out),
    }
}
