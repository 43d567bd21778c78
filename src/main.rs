use std::{env, fs, io, process};

use oba::{free_vm, interpret, new_vm, CliReporter, InterpretResult};
use rustyline::error::ReadlineError;
use rustyline::Editor;

fn main() {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(path) => {
            if args.next().is_some() {
                eprintln!("Unexpected number of arguments.");
                process::exit(exitcode::USAGE);
            }
            run_file(&path);
        }
        None => run_repl(),
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Error reading file: {}", err);
        process::exit(exitcode::IOERR);
    });
    let mut vm = new_vm();
    let mut reporter = CliReporter::new();
    let mut stdout = io::stdout();
    let result = interpret(&mut vm, &source, &mut reporter, &mut stdout);
    free_vm(vm);
    process::exit(exit_code_for(result));
}

fn run_repl() {
    let mut vm = new_vm();
    let mut reporter = CliReporter::new();
    let mut stdout = io::stdout();
    let mut editor = Editor::<()>::new().expect("failed to initialize line editor");
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                interpret(&mut vm, &line, &mut reporter, &mut stdout);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error reading input: {}", err);
                break;
            }
        }
    }
    free_vm(vm);
}

fn exit_code_for(result: InterpretResult) -> i32 {
    match result {
        InterpretResult::Success => exitcode::OK,
        InterpretResult::CompileError => exitcode::DATAERR,
        InterpretResult::RuntimeError => exitcode::SOFTWARE,
    }
}
