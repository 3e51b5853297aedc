//! The parser: a precedence climber for expressions and a recursive
//! descent pass for statements, allocating every node into the bump arena.
//!
//! Parsing is permissive: an error is reported, the offending token is
//! skipped, and parsing continues so one run surfaces as many diagnostics
//! as possible. Failed statements are left out of the result.

use crate::arena::BumpArena;
use crate::ast::{Expr, FunDecl, Stmt};
use crate::report;
use crate::scanner::ScanResult;
use crate::token::{Token, TokenKind, TRUE_TOKEN};

/// At most this many parameters or arguments; exceeding it is reported
/// but does not stop the parse.
pub const MAX_PARAMS: usize = 255;

/// The parsed statement list plus how many diagnostics were reported.
pub struct ParseOutcome<'a> {
	pub stmts: Vec<&'a Stmt<'a>>,
	pub num_errors: usize,
}

/// Parses the whole token stream of `scan` into statements.
pub fn parse<'a>(arena: &'a BumpArena, scan: &'a ScanResult) -> ParseOutcome<'a> {
	let mut parser = Parser { arena, scan, current: 0, num_errors: 0 };

	let mut stmts = Vec::new();
	while !parser.at_eof() {
		let before = parser.current;
		match parser.declaration() {
			Some(stmt) => stmts.push(stmt),
			None => {
				// Make progress past the token that broke the statement.
				if parser.current == before {
					parser.advance();
				}
			}
		}
	}

	ParseOutcome { stmts, num_errors: parser.num_errors }
}

// Binding priority of an infix operator; -1 for everything else.
fn binary_prio(kind: TokenKind) -> i32 {
	use TokenKind::*;

	match kind {
		Equal => 0,
		Or => 5,
		And => 6,
		EqualEqual | BangEqual => 10,
		Greater | GreaterEqual | Less | LessEqual => 20,
		Minus | Plus => 30,
		Slash | Star => 40,
		_ => -1,
	}
}

fn is_left_associative(kind: TokenKind) -> bool {
	kind != TokenKind::Equal
}

struct Parser<'a> {
	arena: &'a BumpArena,
	scan: &'a ScanResult,
	current: usize,
	num_errors: usize,
}

impl<'a> Parser<'a> {
	fn at_eof(&self) -> bool {
		self.peek().kind() == TokenKind::Eof
	}

	// The trailing Eof token makes both of these total.
	fn peek(&self) -> &'a Token {
		self.scan.tokens.get(self.current).unwrap_or_else(|| {
			self.scan.tokens.last().expect("scanner always emits an end-of-file token")
		})
	}

	fn advance(&mut self) -> &'a Token {
		let token = self.peek();
		if self.current < self.scan.tokens.len() {
			self.current += 1;
		}
		token
	}

	fn check(&self, kind: TokenKind) -> bool {
		self.peek().kind() == kind
	}

	fn matches(&mut self, kind: TokenKind) -> Option<&'a Token> {
		if self.check(kind) {
			Some(self.advance())
		} else {
			None
		}
	}

	fn consume(&mut self, kind: TokenKind, message: &str) -> Option<&'a Token> {
		match self.matches(kind) {
			Some(token) => Some(token),
			None => {
				self.error(self.peek(), message);
				None
			}
		}
	}

	fn error(&mut self, token: &Token, message: &str) {
		self.num_errors += 1;
		report::error_at(self.scan, *token, message);
	}

	// ----- statements -----

	fn declaration(&mut self) -> Option<&'a Stmt<'a>> {
		if self.matches(TokenKind::Var).is_some() {
			self.var_declaration()
		} else if self.matches(TokenKind::Fun).is_some() {
			self.fun_declaration()
		} else {
			self.statement()
		}
	}

	fn statement(&mut self) -> Option<&'a Stmt<'a>> {
		if self.matches(TokenKind::Print).is_some() {
			self.print_statement()
		} else if self.matches(TokenKind::LeftBrace).is_some() {
			let stmts = self.block_body()?;
			Some(self.arena.alloc(Stmt::Block { stmts }))
		} else if self.matches(TokenKind::If).is_some() {
			self.if_statement()
		} else if self.matches(TokenKind::While).is_some() {
			self.while_statement()
		} else if self.matches(TokenKind::For).is_some() {
			self.for_statement()
		} else if let Some(keyword) = self.matches(TokenKind::Return) {
			self.return_statement(keyword)
		} else {
			self.expr_statement()
		}
	}

	fn var_declaration(&mut self) -> Option<&'a Stmt<'a>> {
		let ident = self.consume(TokenKind::Identifier, "Expected variable name.")?;
		let initializer = if self.matches(TokenKind::Equal).is_some() {
			Some(self.expression()?)
		} else {
			None
		};
		self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.")?;
		Some(self.arena.alloc(Stmt::Var { ident, initializer }))
	}

	fn fun_declaration(&mut self) -> Option<&'a Stmt<'a>> {
		let name = self.consume(TokenKind::Identifier, "Expected function name.")?;
		self.consume(TokenKind::LeftParen, "Expected '(' after function name.")?;

		let mut params = Vec::new();
		if !self.check(TokenKind::RightParen) {
			loop {
				if params.len() == MAX_PARAMS {
					self.error(self.peek(), "Can't have more than 255 parameters.");
				}
				params.push(self.consume(TokenKind::Identifier, "Expected parameter name.")?);
				if self.matches(TokenKind::Comma).is_none() {
					break;
				}
			}
		}
		self.consume(TokenKind::RightParen, "Expected ')' after parameters.")?;

		self.consume(TokenKind::LeftBrace, "Expected '{' before function body.")?;
		let body = self.block_body()?;
		Some(self.arena.alloc(Stmt::Fun(FunDecl { name, params, body })))
	}

	// The statements of a block; the opening brace is already consumed.
	// Recovers inside the block so one bad statement doesn't eat the rest.
	fn block_body(&mut self) -> Option<Vec<&'a Stmt<'a>>> {
		let mut stmts = Vec::new();
		loop {
			if self.matches(TokenKind::RightBrace).is_some() {
				return Some(stmts);
			}
			if self.at_eof() {
				self.error(self.peek(), "Expected '}' after block.");
				return None;
			}

			let before = self.current;
			match self.declaration() {
				Some(stmt) => stmts.push(stmt),
				None => {
					if self.current == before {
						self.advance();
					}
				}
			}
		}
	}

	fn print_statement(&mut self) -> Option<&'a Stmt<'a>> {
		let expr = self.expression()?;
		self.consume(TokenKind::Semicolon, "Expected ';' after value.")?;
		Some(self.arena.alloc(Stmt::Print { expr }))
	}

	fn expr_statement(&mut self) -> Option<&'a Stmt<'a>> {
		let expr = self.expression()?;
		self.consume(TokenKind::Semicolon, "Expected ';' after expression.")?;
		Some(self.arena.alloc(Stmt::Expr { expr }))
	}

	fn if_statement(&mut self) -> Option<&'a Stmt<'a>> {
		self.consume(TokenKind::LeftParen, "Expected '(' after 'if'.")?;
		let cond = self.expression()?;
		self.consume(TokenKind::RightParen, "Expected ')' after condition.")?;

		let then_branch = self.statement()?;
		let else_branch = if self.matches(TokenKind::Else).is_some() {
			Some(self.statement()?)
		} else {
			None
		};
		Some(self.arena.alloc(Stmt::If { cond, then_branch, else_branch }))
	}

	fn while_statement(&mut self) -> Option<&'a Stmt<'a>> {
		self.consume(TokenKind::LeftParen, "Expected '(' after 'while'.")?;
		let cond = self.expression()?;
		self.consume(TokenKind::RightParen, "Expected ')' after condition.")?;
		let body = self.statement()?;
		Some(self.arena.alloc(Stmt::While { cond, body }))
	}

	// `for` is sugar: initializer and loop live in an enclosing block, the
	// increment becomes a trailing statement of the body block, and a
	// missing condition is a synthesized `true`.
	fn for_statement(&mut self) -> Option<&'a Stmt<'a>> {
		self.consume(TokenKind::LeftParen, "Expected '(' after 'for'.")?;

		let initializer = if self.matches(TokenKind::Semicolon).is_some() {
			None
		} else if self.matches(TokenKind::Var).is_some() {
			Some(self.var_declaration()?)
		} else {
			Some(self.expr_statement()?)
		};

		let cond = if self.check(TokenKind::Semicolon) {
			self.arena.alloc(Expr::Literal { value: &TRUE_TOKEN })
		} else {
			self.expression()?
		};
		self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.")?;

		let increment = if self.check(TokenKind::RightParen) {
			None
		} else {
			Some(self.expression()?)
		};
		self.consume(TokenKind::RightParen, "Expected ')' after for clauses.")?;

		let mut body = self.statement()?;
		if let Some(increment) = increment {
			let increment_stmt = self.arena.alloc(Stmt::Expr { expr: increment });
			body = self.arena.alloc(Stmt::Block { stmts: vec![body, increment_stmt] });
		}

		let loop_stmt: &'a Stmt<'a> = self.arena.alloc(Stmt::While { cond, body });
		let stmts = match initializer {
			Some(init) => vec![init, loop_stmt],
			None => vec![loop_stmt],
		};
		Some(self.arena.alloc(Stmt::Block { stmts }))
	}

	fn return_statement(&mut self, keyword: &'a Token) -> Option<&'a Stmt<'a>> {
		let expr = if self.check(TokenKind::Semicolon) {
			None
		} else {
			Some(self.expression()?)
		};
		self.consume(TokenKind::Semicolon, "Expected ';' after return value.")?;
		Some(self.arena.alloc(Stmt::Return { keyword, expr }))
	}

	// ----- expressions -----

	fn expression(&mut self) -> Option<&'a Expr<'a>> {
		let lhs = self.primary()?;
		self.expression_rec(lhs, 0)
	}

	// Precedence climbing. The inner loop folds tighter-binding (or
	// right-associative equal-binding) operators into the right-hand side
	// before the outer node is built.
	fn expression_rec(&mut self, mut lhs: &'a Expr<'a>, min_prio: i32) -> Option<&'a Expr<'a>> {
		loop {
			let prio = binary_prio(self.peek().kind());
			if prio < min_prio {
				break;
			}
			let op = self.advance();

			let mut rhs = self.primary()?;
			loop {
				let next = self.peek().kind();
				let next_prio = binary_prio(next);
				let climbs = if is_left_associative(next) {
					next_prio > prio
				} else {
					next_prio >= prio
				};
				if !climbs {
					break;
				}
				rhs = self.expression_rec(rhs, prio + i32::from(next_prio > prio))?;
			}

			lhs = self.combine(lhs, op, rhs)?;
		}
		Some(lhs)
	}

	fn combine(
		&mut self,
		lhs: &'a Expr<'a>,
		op: &'a Token,
		rhs: &'a Expr<'a>,
	) -> Option<&'a Expr<'a>> {
		match op.kind() {
			TokenKind::Equal => {
				let Expr::Var { ident } = lhs else {
					self.error(op, "Invalid assignment target.");
					return None;
				};
				Some(self.arena.alloc(Expr::Assign { ident, value: rhs }))
			}
			TokenKind::And | TokenKind::Or => {
				Some(self.arena.alloc(Expr::Logical { left: lhs, op, right: rhs }))
			}
			_ => Some(self.arena.alloc(Expr::Binary { left: lhs, op, right: rhs })),
		}
	}

	fn primary(&mut self) -> Option<&'a Expr<'a>> {
		use TokenKind::*;

		let token = self.advance();
		let expr = match token.kind() {
			LeftParen => {
				let inner = self.expression()?;
				let rparen = self.consume(RightParen, "Expected ')' after expression.")?;
				self.arena.alloc(Expr::Grouping { lparen: token, expr: inner, rparen })
			}

			Nil | True | False | String | Number => self.arena.alloc(Expr::Literal { value: token }),

			Identifier => self.arena.alloc(Expr::Var { ident: token }),

			Minus | Bang => {
				let right = self.primary()?;
				self.arena.alloc(Expr::Unary { op: token, right })
			}

			kind => {
				self.error(token, &format!("Unexpected token \"{kind}\"."));
				return None;
			}
		};

		self.call_suffix(expr)
	}

	fn call_suffix(&mut self, mut expr: &'a Expr<'a>) -> Option<&'a Expr<'a>> {
		while self.matches(TokenKind::LeftParen).is_some() {
			let mut args = Vec::new();
			if !self.check(TokenKind::RightParen) {
				loop {
					if args.len() == MAX_PARAMS {
						self.error(self.peek(), "Can't have more than 255 arguments.");
					}
					args.push(self.expression()?);
					if self.matches(TokenKind::Comma).is_none() {
						break;
					}
				}
			}
			let rparen = self.consume(TokenKind::RightParen, "Expected ')' after arguments.")?;
			expr = self.arena.alloc(Expr::Call { callee: expr, rparen, args });
		}
		Some(expr)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::AstRenderer;
	use crate::scanner;

	fn render(source: &str) -> (Vec<String>, usize) {
		let arena = BumpArena::new();
		let scan = arena.alloc(scanner::scan(source.to_string()));
		assert_eq!(scan.num_errors, 0, "scan errors in {source:?}");
		let outcome = parse(&arena, scan);
		let renderer = AstRenderer::new(&scan.source);
		let rendered = outcome.stmts.iter().map(|s| renderer.stmt(s)).collect();
		(rendered, outcome.num_errors)
	}

	fn render_one(source: &str) -> String {
		let (stmts, errors) = render(source);
		assert_eq!(errors, 0, "parse errors in {source:?}");
		assert_eq!(stmts.len(), 1);
		stmts.into_iter().next().unwrap()
	}

	#[test]
	fn priorities_match_the_table() {
		assert_eq!(
			render_one("5 * !6 + 7 * -8 * ((1 + 2) * 3);"),
			"(; (+ (* 5 (!6)) (* (* 7 (-8)) (group (* (group (+ 1 2)) 3)))))"
		);
	}

	#[test]
	fn comparison_binds_tighter_than_equality() {
		assert_eq!(render_one("1 < 2 == 3 >= 4;"), "(; (== (< 1 2) (>= 3 4)))");
	}

	#[test]
	fn logical_operators_bind_loosest() {
		assert_eq!(
			render_one("a or b and c == d;"),
			"(; (or a (and b (== c d))))"
		);
	}

	#[test]
	fn assignment_is_right_associative() {
		assert_eq!(render_one("a = b = 2;"), "(; (= a (= b 2)))");
	}

	// The bad target is reported, and the orphaned `;` cascades once more.
	#[test]
	fn invalid_assignment_target_is_reported() {
		let arena = BumpArena::new();
		let scan = arena.alloc(scanner::scan("a + b = 2;".to_string()));
		let outcome = parse(&arena, scan);
		assert_eq!(outcome.num_errors, 2);
		assert!(outcome.stmts.is_empty());
	}

	#[test]
	fn calls_chain_and_take_arguments() {
		assert_eq!(render_one("f(1, 2)(3);"), "(; (call (call f 1 2) 3))");
	}

	#[test]
	fn statements_render() {
		assert_eq!(render_one("var a = 1;"), "(var a 1)");
		assert_eq!(render_one("var b;"), "(var b)");
		assert_eq!(render_one("{ print 1; print 2; }"), "(block (print 1) (print 2))");
		assert_eq!(
			render_one("if (a) print 1; else print 2;"),
			"(if a (print 1) (print 2))"
		);
		assert_eq!(render_one("while (a) print 1;"), "(while a (print 1))");
		assert_eq!(
			render_one("fun add(a, b) { return a + b; }"),
			"(fun add (a b) (return (+ a b)))"
		);
	}

	#[test]
	fn for_desugars_to_a_while_in_a_block() {
		assert_eq!(
			render_one("for (var i = 0; i < 3; i = i + 1) print i;"),
			"(block (var i 0) (while (< i 3) (block (print i) (; (= i (+ i 1))))))"
		);
		assert_eq!(render_one("for (;;) print 1;"), "(block (while true (print 1)))");
	}

	// The stray `)` is reported, then the dangling `;`. Recovery is one
	// token at a time, so cascades are expected, but later statements
	// still parse.
	#[test]
	fn errors_do_not_stop_the_parse() {
		let arena = BumpArena::new();
		let scan = arena.alloc(scanner::scan("print 1; ); print 2;".to_string()));
		let outcome = parse(&arena, scan);
		assert_eq!(outcome.num_errors, 2);
		assert_eq!(outcome.stmts.len(), 2);
	}

	#[test]
	fn class_tokens_are_rejected() {
		let arena = BumpArena::new();
		let scan = arena.alloc(scanner::scan("class Foo {}".to_string()));
		let outcome = parse(&arena, scan);
		assert!(outcome.num_errors > 0);
	}

	// Formatting and comments don't change the tree.
	#[test]
	fn round_trip_is_structural() {
		let dense = render("var a=1;{a=a+2;print a;}").0;
		let airy = render("var a = 1; // init\n{\n  a = a + 2;\n  print a;\n}").0;
		assert_eq!(dense, airy);
	}
}
