use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use loxrs::arena::BumpArena;
use loxrs::env::Environment;
use loxrs::interp::Interpreter;
use loxrs::report;
use loxrs::{gc, parser, scanner};

const DEFAULT_HEAP_SIZE: usize = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(version, about = "A tree-walking Lox interpreter", long_about = None)]
struct Cli {
	/// Script to run; starts the interactive prompt when omitted.
	scripts: Vec<PathBuf>,

	/// Capacity of the garbage-collected heap, in bytes (rounded up to a
	/// page multiple).
	#[arg(long, default_value_t = DEFAULT_HEAP_SIZE)]
	heap_size: usize,
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	if cli.scripts.len() > 1 {
		eprintln!("Usage: loxrs [script]");
		return ExitCode::SUCCESS;
	}

	gc::init(cli.heap_size);
	let code = match cli.scripts.first() {
		Some(path) => run_file(path),
		None => run_prompt(),
	};
	// Everything the scripts allocated is unreachable by now; teardown
	// verifies the final collection empties the heap.
	gc::teardown();
	code
}

fn run_file(path: &Path) -> ExitCode {
	let source = match fs::read_to_string(path) {
		Ok(source) => source,
		Err(err) => {
			report::bare_error(&format!("Failed to open file \"{}\": {err}.", path.display()));
			return ExitCode::FAILURE;
		}
	};

	let arena = BumpArena::new();
	let scan = arena.alloc(scanner::scan(source));
	if scan.num_errors > 0 {
		return ExitCode::SUCCESS;
	}

	let parsed = parser::parse(&arena, scan);
	if parsed.num_errors > 0 {
		return ExitCode::SUCCESS;
	}

	let globals = match gc::allocate(Environment::root()) {
		Ok(globals) => globals,
		Err(oom) => {
			report::bare_error(&oom.to_string());
			return ExitCode::SUCCESS;
		}
	};

	let stdout = io::stdout();
	let mut out = stdout.lock();
	let mut interp = Interpreter::new(scan, globals, &mut out);
	// Runtime errors abort their own statement only; the exit code stays
	// zero either way.
	interp.run(&parsed.stmts, scan);

	// Drain the heap while the syntax tree is still alive: dropping the
	// evaluator releases the last root.
	drop(interp);
	gc::collect();

	ExitCode::SUCCESS
}

fn run_prompt() -> ExitCode {
	let mut editor = match DefaultEditor::new() {
		Ok(editor) => editor,
		Err(err) => {
			report::bare_error(&format!("Failed to start the prompt: {err}."));
			return ExitCode::FAILURE;
		}
	};

	// One arena for the whole session: functions defined on earlier lines
	// keep referencing their syntax trees and source fragments.
	let arena = BumpArena::new();

	let globals = match gc::allocate(Environment::root()) {
		Ok(globals) => globals,
		Err(oom) => {
			report::bare_error(&oom.to_string());
			return ExitCode::SUCCESS;
		}
	};

	let stdout = io::stdout();
	let mut out = stdout.lock();
	let prelude = arena.alloc(scanner::scan(String::new()));
	let mut interp = Interpreter::new(prelude, globals, &mut out);

	loop {
		match editor.readline("> ") {
			Ok(line) => {
				let _ = editor.add_history_entry(&line);

				let scan = arena.alloc(scanner::scan(line));
				if scan.num_errors > 0 {
					continue;
				}
				let parsed = parser::parse(&arena, scan);
				if parsed.num_errors > 0 {
					continue;
				}
				interp.run(&parsed.stmts, scan);
			}

			Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,

			Err(err) => {
				report::bare_error(&format!("Failed to read input: {err}."));
				break;
			}
		}
	}

	drop(interp);
	gc::collect();

	ExitCode::SUCCESS
}
