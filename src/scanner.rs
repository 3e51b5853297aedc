//! The scanner: source text in, tokens and a line map out.

use crate::report;
use crate::token::{Token, TokenKind};

/// A line/column pair, both 1-indexed. Columns are byte columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
	pub line: u32,
	pub column: u32,
}

#[derive(Debug, Clone, Copy)]
struct LineStart {
	offset: u32,
	line: u32,
}

/// Maps byte offsets to source positions and lines back to offsets.
///
/// Internally an ascending list of the byte offsets at which each line
/// begins; line `n` is always the `n-1`th entry.
#[derive(Debug)]
pub struct SourceMap {
	starts: Vec<LineStart>,
}

impl SourceMap {
	fn new() -> Self {
		Self { starts: vec![LineStart { offset: 0, line: 1 }] }
	}

	fn push_line(&mut self, offset: u32) {
		let line = self.starts.len() as u32 + 1;
		self.starts.push(LineStart { offset, line });
	}

	/// The position of `offset`, attributed to the line containing it.
	pub fn position(&self, offset: u32) -> Position {
		debug_assert!(!self.starts.is_empty());

		let idx = self.starts.partition_point(|ls| ls.offset < offset);
		if let Some(ls) = self.starts.get(idx) {
			if ls.offset == offset {
				return Position { line: ls.line, column: 1 };
			}
		}
		let ls = self.starts[idx - 1];
		Position { line: ls.line, column: 1 + (offset - ls.offset) }
	}

	/// The byte offset at which `line` (1-indexed) begins.
	pub fn line_offset(&self, line: u32) -> u32 {
		self.starts[line as usize - 1].offset
	}

	/// The text of `line`, without its trailing newline.
	pub fn line_text<'s>(&self, source: &'s str, line: u32) -> &'s str {
		let start = self.line_offset(line) as usize;
		let rest = &source[start..];
		rest.split('\n').next().unwrap_or(rest)
	}
}

/// Everything the scanner produces for one program fragment.
///
/// The tokens reference `source` by offset, so a `ScanResult` must stay
/// alive for as long as anything derived from its tokens does. The driver
/// keeps scan results in the same bump arena as the syntax tree for exactly
/// that reason.
#[derive(Debug)]
pub struct ScanResult {
	pub source: String,
	pub tokens: Vec<Token>,
	pub map: SourceMap,
	pub num_errors: usize,
}

/// Scans `source` into tokens, reporting errors as it goes.
///
/// Scanning never stops early; every diagnostic is counted in
/// [`ScanResult::num_errors`] and the caller decides whether to go on.
pub fn scan(source: String) -> ScanResult {
	let mut scanner = Scanner {
		source: &source,
		pos: 0,
		tokens: Vec::new(),
		map: SourceMap::new(),
		num_errors: 0,
	};
	scanner.run();

	let Scanner { tokens, map, num_errors, .. } = scanner;
	ScanResult { source, tokens, map, num_errors }
}

struct Scanner<'s> {
	source: &'s str,
	pos: usize,
	tokens: Vec<Token>,
	map: SourceMap,
	num_errors: usize,
}

impl Scanner<'_> {
	fn run(&mut self) {
		while self.pos < self.source.len() {
			let start = self.pos;
			let Some(c) = self.advance() else { break };
			self.scan_one(c, start);
		}
		self.tokens.push(Token::new(TokenKind::Eof, self.source.len() as u32, 0));
	}

	fn scan_one(&mut self, c: char, start: usize) {
		use TokenKind::*;

		match c {
			'(' => self.push(LeftParen, start),
			')' => self.push(RightParen, start),
			'{' => self.push(LeftBrace, start),
			'}' => self.push(RightBrace, start),
			',' => self.push(Comma, start),
			'.' => self.push(Dot, start),
			'-' => self.push(Minus, start),
			'+' => self.push(Plus, start),
			';' => self.push(Semicolon, start),
			'*' => self.push(Star, start),

			'/' => {
				if self.advance_if('/') {
					// A comment runs to the end of the line.
					while self.peek().map_or(false, |c| c != '\n') {
						self.advance();
					}
				} else {
					self.push(Slash, start);
				}
			}

			'!' => {
				let kind = if self.advance_if('=') { BangEqual } else { Bang };
				self.push(kind, start);
			}
			'=' => {
				let kind = if self.advance_if('=') { EqualEqual } else { Equal };
				self.push(kind, start);
			}
			'<' => {
				let kind = if self.advance_if('=') { LessEqual } else { Less };
				self.push(kind, start);
			}
			'>' => {
				let kind = if self.advance_if('=') { GreaterEqual } else { Greater };
				self.push(kind, start);
			}

			' ' | '\t' | '\r' | '\n' => {}

			'"' => self.string(start),

			'0'..='9' => self.number(c, start),

			c if c.is_ascii_alphabetic() || c == '_' => self.identifier(start),

			c => self.error(start, &format!("Unexpected character '{c}'.")),
		}
	}

	fn string(&mut self, start: usize) {
		loop {
			match self.advance() {
				// The body is arbitrary UTF-8; no escape sequences exist.
				Some('"') => {
					self.push(TokenKind::String, start);
					return;
				}
				Some(_) => {}
				None => {
					self.error(start, "Unterminated string.");
					return;
				}
			}
		}
	}

	fn number(&mut self, first: char, start: usize) {
		let leading_zero = first == '0' && self.peek().map_or(false, |c| c.is_ascii_digit());

		while self.peek().map_or(false, |c| c.is_ascii_digit()) {
			self.advance();
		}
		if self.peek() == Some('.') && self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
			self.advance();
			while self.peek().map_or(false, |c| c.is_ascii_digit()) {
				self.advance();
			}
		}

		if leading_zero {
			self.error(start, "Numbers may not have a leading zero.");
			return;
		}
		self.push(TokenKind::Number, start);
	}

	fn identifier(&mut self, start: usize) {
		// Digits are not identifier characters here; `abc1` scans as an
		// identifier followed by a number.
		while self.peek().map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
			self.advance();
		}

		let lexeme = &self.source[start..self.pos];
		let kind = TokenKind::keyword(lexeme).unwrap_or(TokenKind::Identifier);
		self.push(kind, start);
	}

	fn push(&mut self, kind: TokenKind, start: usize) {
		self.tokens.push(Token::new(kind, start as u32, (self.pos - start) as u32));
	}

	fn error(&mut self, offset: usize, message: &str) {
		self.num_errors += 1;
		report::error_at_offset(self.source, &self.map, offset as u32, message);
	}

	fn peek(&self) -> Option<char> {
		self.source[self.pos..].chars().next()
	}

	fn peek_second(&self) -> Option<char> {
		let mut chars = self.source[self.pos..].chars();
		chars.next();
		chars.next()
	}

	fn advance(&mut self) -> Option<char> {
		let c = self.peek()?;
		self.pos += c.len_utf8();
		if c == '\n' {
			self.map.push_line(self.pos as u32);
		}
		Some(c)
	}

	fn advance_if(&mut self, want: char) -> bool {
		if self.peek() == Some(want) {
			self.advance();
			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use TokenKind::*;

	fn kinds(source: &str) -> Vec<TokenKind> {
		scan(source.to_string()).tokens.iter().map(Token::kind).collect()
	}

	#[test]
	fn scans_a_statement() {
		assert_eq!(
			kinds("var a = 1 + 2.5;"),
			[Var, Identifier, Equal, Number, Plus, Number, Semicolon, Eof]
		);
	}

	#[test]
	fn scans_operators() {
		assert_eq!(
			kinds("! != = == < <= > >= ( ) { } , ."),
			[
				Bang, BangEqual, Equal, EqualEqual, Less, LessEqual, Greater, GreaterEqual,
				LeftParen, RightParen, LeftBrace, RightBrace, Comma, Dot, Eof
			]
		);
	}

	#[test]
	fn comments_are_skipped() {
		assert_eq!(kinds("1 // the rest is ignored ;;;\n2"), [Number, Number, Eof]);
	}

	#[test]
	fn string_lexeme_includes_quotes() {
		let result = scan("\"héllo\"".to_string());
		assert_eq!(result.num_errors, 0);
		assert_eq!(result.tokens[0].kind(), String);
		assert_eq!(result.tokens[0].lexeme(&result.source), "\"héllo\"");
	}

	#[test]
	fn unterminated_string_is_an_error() {
		assert_eq!(scan("\"oops".to_string()).num_errors, 1);
	}

	#[test]
	fn leading_zero_is_an_error() {
		assert_eq!(scan("0123".to_string()).num_errors, 1);
		assert_eq!(scan("0".to_string()).num_errors, 0);
		assert_eq!(scan("0.5".to_string()).num_errors, 0);
	}

	// Digits after identifier characters start a fresh number token. This
	// diverges from canonical Lox and is intentional.
	#[test]
	fn identifiers_do_not_take_digits() {
		assert_eq!(kinds("abc1"), [Identifier, Number, Eof]);
	}

	#[test]
	fn position_mapping() {
		let result = scan("Hello world\n1234567890\nABCDEF".to_string());
		assert_eq!(result.map.position(0), Position { line: 1, column: 1 });
		assert_eq!(result.map.position(11), Position { line: 1, column: 12 });
		assert_eq!(result.map.position(12), Position { line: 2, column: 1 });
		assert_eq!(result.map.position(25), Position { line: 3, column: 3 });
	}

	#[test]
	fn line_text_strips_the_newline() {
		let result = scan("first\nsecond\n".to_string());
		assert_eq!(result.map.line_text(&result.source, 1), "first");
		assert_eq!(result.map.line_text(&result.source, 2), "second");
	}

	mod properties {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			#[test]
			fn never_panics(source in ".*") {
				scan(source);
			}

			#[test]
			fn line_starts_ascend(source in ".*") {
				let result = scan(source);
				let starts = &result.map.starts;
				for pair in starts.windows(2) {
					prop_assert!(pair[0].offset < pair[1].offset);
					prop_assert_eq!(pair[0].line + 1, pair[1].line);
				}
			}

			#[test]
			fn tokens_cover_valid_ranges(source in ".*") {
				let result = scan(source);
				for token in &result.tokens {
					let end = (token.offset() + token.length()) as usize;
					prop_assert!(end <= result.source.len());
				}
			}
		}
	}
}
