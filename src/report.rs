//! Diagnostic reporting: a red `[line:col] Error:` header, the offending
//! source line, and a caret pointing at the spot.

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::scanner::{ScanResult, SourceMap};
use crate::token::Token;

/// Reports `message` anchored at `token` within `scan`.
pub fn error_at(scan: &ScanResult, token: Token, message: &str) {
	error_at_offset(&scan.source, &scan.map, token.offset(), message);
}

/// Reports `message` anchored at a byte offset of `source`.
pub fn error_at_offset(source: &str, map: &SourceMap, offset: u32, message: &str) {
	let position = map.position(offset);
	let line_text = map.line_text(source, position.line);
	emit(position.line, position.column, Some(line_text), message);
}

/// Reports `message` with no source anchor at all.
pub fn bare_error(message: &str) {
	let mut stderr = StandardStream::stderr(ColorChoice::Auto);
	let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
	let _ = writeln!(stderr, "Error: {message}");
	let _ = stderr.reset();
}

fn emit(line: u32, column: u32, line_text: Option<&str>, message: &str) {
	let mut stderr = StandardStream::stderr(ColorChoice::Auto);

	let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
	if column > 0 {
		let _ = write!(stderr, "[{line}:{column}] Error: {message}");
	} else {
		let _ = write!(stderr, "[{line}] Error: {message}");
	}

	if let Some(text) = line_text {
		let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
		let _ = write!(stderr, "\n\n {line:5} | {text}\n");
		if column > 0 {
			// 9 columns of gutter, then spaces up to the offending column.
			let _ = write!(stderr, "         {:width$}", "", width = column as usize - 1);
			let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
			let _ = write!(stderr, "^--- Here.");
		}
	}

	let _ = stderr.reset();
	let _ = writeln!(stderr);
}
