//! The evaluator: a single pass over the syntax tree.
//!
//! Expressions push exactly one value onto the operand stack; statements
//! push nothing, except `return`, which pushes its value and signals
//! [`Flow::Return`] up through blocks and loops. Runtime errors report at
//! the throwing token, unwind via `Result`, and leave the stack truncated
//! back to its depth at the top-level statement.

use std::io::{self, Write};
use std::mem;
use std::rc::Rc;
use std::time::Instant;

use once_cell::sync::Lazy;

use crate::ast::{Expr, FunDecl, Stmt};
use crate::env::Environment;
use crate::error::{Result, RuntimeError, RuntimeErrorKind};
use crate::gc::{self, GcRef};
use crate::report;
use crate::scanner::ScanResult;
use crate::token::{Token, TokenKind};
use crate::value::{Callable, CallableBody, Value};

// What a statement tells its enclosing construct to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
	Normal,
	/// A `return` fired; its value is on top of the stack.
	Return,
}

/// The tree-walking evaluator.
///
/// Holds the operand stack, the active environment, and the scan result
/// errors are currently reported against; calls temporarily exchange the
/// latter two for the callee's captured ones.
pub struct Interpreter<'a, 'io> {
	stack: Vec<Value<'a>>,
	env: GcRef<Environment<'a>>,
	scan: &'a ScanResult,
	out: &'io mut dyn io::Write,
}

impl<'a, 'io> Interpreter<'a, 'io> {
	/// Creates an evaluator over `globals`, defining the built-ins there.
	pub fn new(
		scan: &'a ScanResult,
		globals: GcRef<Environment<'a>>,
		out: &'io mut dyn io::Write,
	) -> Self {
		globals.define("clock", Value::Callable(Callable::native(clock, 0, globals.clone())));
		Self { stack: Vec::new(), env: globals, scan, out }
	}

	/// Executes a statement list parsed from `scan`. Runtime errors abort
	/// only the statement they occur in; the return value reports whether
	/// every statement succeeded.
	pub fn run(&mut self, stmts: &[&'a Stmt<'a>], scan: &'a ScanResult) -> bool {
		self.scan = scan;
		let mut ok = true;
		for &stmt in stmts {
			ok &= self.execute(stmt);
		}
		ok
	}

	/// Executes one top-level statement.
	pub fn execute(&mut self, stmt: &'a Stmt<'a>) -> bool {
		debug_assert!(self.stack.is_empty());

		match self.exec_stmt(stmt) {
			Ok(Flow::Return) => {
				// A top-level `return` just discards its value.
				self.stack.pop();
				true
			}
			Ok(Flow::Normal) => true,
			Err(_) => {
				// Already reported at the throw site; restore the stack.
				self.stack.clear();
				false
			}
		}
	}

	// ----- statements -----

	fn exec_stmt(&mut self, stmt: &'a Stmt<'a>) -> Result<Flow> {
		match stmt {
			Stmt::Expr { expr } => {
				self.eval(expr)?;
				self.stack.pop();
				Ok(Flow::Normal)
			}

			Stmt::Print { expr } => {
				let value = self.eval_value(expr)?;
				let _ = writeln!(self.out, " :: {value}");
				Ok(Flow::Normal)
			}

			Stmt::Var { ident, initializer } => {
				let value = match initializer {
					Some(init) => self.eval_value(init)?,
					None => Value::Nil,
				};
				self.env.define(ident.lexeme(&self.scan.source), value);
				Ok(Flow::Normal)
			}

			Stmt::Block { stmts } => self.in_child_scope(None, |interp| {
				for &stmt in stmts {
					if let Flow::Return = interp.exec_stmt(stmt)? {
						return Ok(Flow::Return);
					}
				}
				Ok(Flow::Normal)
			}),

			Stmt::If { cond, then_branch, else_branch } => {
				if self.eval_value(cond)?.is_truthy() {
					self.exec_stmt(then_branch)
				} else if let Some(else_branch) = else_branch {
					self.exec_stmt(else_branch)
				} else {
					Ok(Flow::Normal)
				}
			}

			Stmt::While { cond, body } => {
				while self.eval_value(cond)?.is_truthy() {
					if let Flow::Return = self.exec_stmt(body)? {
						return Ok(Flow::Return);
					}
				}
				Ok(Flow::Normal)
			}

			Stmt::Fun(decl) => {
				// The binding exists before any call, so the body can
				// resolve the function's own name recursively.
				let callable = Callable::script(decl, self.scan, self.env.clone());
				self.env.define(decl.name.lexeme(&self.scan.source), Value::Callable(callable));
				Ok(Flow::Normal)
			}

			Stmt::Return { expr, .. } => {
				match expr {
					Some(expr) => self.eval(expr)?,
					None => self.stack.push(Value::Nil),
				}
				Ok(Flow::Return)
			}
		}
	}

	// ----- expressions -----

	// Evaluates `expr`, leaving exactly one value on the stack.
	fn eval(&mut self, expr: &'a Expr<'a>) -> Result<()> {
		match expr {
			Expr::Literal { value: token } => {
				let value = self.literal(token);
				self.stack.push(value);
			}

			Expr::Grouping { expr, .. } => self.eval(expr)?,

			Expr::Unary { op, right } => {
				let value = self.eval_value(right)?;
				let result = match op.kind() {
					TokenKind::Minus => Value::Number(-self.number_operand(value, right)?),
					TokenKind::Bang => Value::Bool(!value.is_truthy()),
					kind => unreachable!("unary operator {kind}"),
				};
				self.stack.push(result);
			}

			Expr::Binary { left, op, right } => {
				let lhs = self.eval_value(left)?;
				let rhs = self.eval_value(right)?;
				let result = self.binary(lhs, op, rhs, left, right)?;
				self.stack.push(result);
			}

			Expr::Logical { left, op, right } => {
				// Short-circuit: the left operand is the result when it
				// already decides, otherwise the right operand is.
				let lhs = self.eval_value(left)?;
				let take_right = match op.kind() {
					TokenKind::And => lhs.is_truthy(),
					TokenKind::Or => !lhs.is_truthy(),
					kind => unreachable!("logical operator {kind}"),
				};
				if take_right {
					self.eval(right)?;
				} else {
					self.stack.push(lhs);
				}
			}

			Expr::Var { ident } => {
				let name = ident.lexeme(&self.scan.source);
				match self.env.get(name) {
					Some(value) => self.stack.push(value),
					None => return Err(self.throw(ident, RuntimeErrorKind::IdentifierNotFound)),
				}
			}

			Expr::Assign { ident, value } => {
				let name = ident.lexeme(&self.scan.source);
				let value = self.eval_value(value)?;
				if !self.env.assign(name, value.clone()) {
					let kind = RuntimeErrorKind::UndefinedVariable(name.to_string());
					return Err(self.throw(ident, kind));
				}
				// The assignment itself evaluates to the assigned value.
				self.stack.push(value);
			}

			Expr::Call { callee, rparen, args } => {
				let callee_value = self.eval_value(callee)?;
				let Value::Callable(callable) = callee_value else {
					return Err(self.throw(callee.main_token(), RuntimeErrorKind::NotCallable));
				};

				if callable.arity() != args.len() {
					let kind = RuntimeErrorKind::ArityMismatch {
						expected: callable.arity(),
						got: args.len(),
					};
					return Err(self.throw(callee.main_token(), kind));
				}

				let mut argv = Vec::with_capacity(args.len());
				for &arg in args {
					argv.push(self.eval_value(arg)?);
				}

				let result = self.call(&callable, argv, rparen)?;
				self.stack.push(result);
			}
		}
		Ok(())
	}

	// Evaluates `expr` and pops its value off the stack.
	fn eval_value(&mut self, expr: &'a Expr<'a>) -> Result<Value<'a>> {
		self.eval(expr)?;
		Ok(self.stack.pop().expect("expression left no value on the operand stack"))
	}

	fn literal(&self, token: &'a Token) -> Value<'a> {
		let lexeme = token.lexeme(&self.scan.source);
		match token.kind() {
			TokenKind::String => {
				// Drop the surrounding quotes.
				debug_assert!(lexeme.len() >= 2);
				Value::String(Rc::from(&lexeme[1..lexeme.len() - 1]))
			}
			// The scanner only emits digits with an optional fraction.
			TokenKind::Number => Value::Number(lexeme.parse().expect("malformed number literal")),
			TokenKind::True => Value::Bool(true),
			TokenKind::False => Value::Bool(false),
			TokenKind::Nil => Value::Nil,
			kind => unreachable!("literal token {kind}"),
		}
	}

	fn binary(
		&self,
		lhs: Value<'a>,
		op: &'a Token,
		rhs: Value<'a>,
		left: &'a Expr<'a>,
		right: &'a Expr<'a>,
	) -> Result<Value<'a>> {
		use TokenKind::*;

		Ok(match op.kind() {
			Plus => match (&lhs, &rhs) {
				(Value::Number(l), Value::Number(r)) => Value::Number(l + r),
				(Value::String(l), Value::String(r)) => {
					let mut joined = std::string::String::with_capacity(l.len() + r.len());
					joined.push_str(l);
					joined.push_str(r);
					Value::String(Rc::from(joined))
				}
				_ => {
					let kind = RuntimeErrorKind::AddOperands {
						lhs: lhs.type_name(),
						rhs: rhs.type_name(),
					};
					return Err(self.throw(op, kind));
				}
			},

			Minus => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Number(l - r)
			}
			Star => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Number(l * r)
			}
			// IEEE-754 division; dividing by zero yields an infinity.
			Slash => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Number(l / r)
			}

			Greater => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Bool(l > r)
			}
			GreaterEqual => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Bool(l >= r)
			}
			Less => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Bool(l < r)
			}
			LessEqual => {
				let (l, r) = self.number_operands(lhs, rhs, left, right)?;
				Value::Bool(l <= r)
			}

			EqualEqual => Value::Bool(lhs == rhs),
			BangEqual => Value::Bool(lhs != rhs),

			kind => unreachable!("binary operator {kind}"),
		})
	}

	fn number_operand(&self, value: Value<'a>, expr: &'a Expr<'a>) -> Result<f64> {
		match value {
			Value::Number(n) => Ok(n),
			other => {
				let kind = RuntimeErrorKind::WrongOperandType {
					expected: "number",
					got: other.type_name(),
				};
				Err(self.throw(expr.main_token(), kind))
			}
		}
	}

	fn number_operands(
		&self,
		lhs: Value<'a>,
		rhs: Value<'a>,
		left: &'a Expr<'a>,
		right: &'a Expr<'a>,
	) -> Result<(f64, f64)> {
		Ok((self.number_operand(lhs, left)?, self.number_operand(rhs, right)?))
	}

	// ----- calls and scopes -----

	fn call(
		&mut self,
		callable: &Callable<'a>,
		args: Vec<Value<'a>>,
		rparen: &'a Token,
	) -> Result<Value<'a>> {
		match *callable.body() {
			CallableBody::Native(body) => Ok(body(&args)),

			CallableBody::Script(decl, scan) => {
				self.call_script(decl, scan, callable.env().clone(), args, rparen)
			}
		}
	}

	// Installs the callable's captured environment and source context,
	// binds the parameters in a fresh frame, and runs the body. Both are
	// restored on every exit path, error unwind included.
	fn call_script(
		&mut self,
		decl: &'a FunDecl<'a>,
		scan: &'a ScanResult,
		captured: GcRef<Environment<'a>>,
		args: Vec<Value<'a>>,
		rparen: &'a Token,
	) -> Result<Value<'a>> {
		debug_assert_eq!(decl.params.len(), args.len());

		let frame = self.new_frame(captured, Some(rparen))?;
		let prev_env = mem::replace(&mut self.env, frame);
		let prev_scan = mem::replace(&mut self.scan, scan);

		let result = (|| {
			for (&param, arg) in decl.params.iter().zip(args) {
				self.env.define(param.lexeme(&scan.source), arg);
			}

			for &stmt in &decl.body {
				if let Flow::Return = self.exec_stmt(stmt)? {
					let value =
						self.stack.pop().expect("return left no value on the operand stack");
					return Ok(value);
				}
			}
			Ok(Value::Nil)
		})();

		self.scan = prev_scan;
		self.env = prev_env;
		result
	}

	// Runs `body` inside a fresh child frame of the active environment,
	// restoring the previous frame on every exit path.
	fn in_child_scope<R>(
		&mut self,
		anchor: Option<&'a Token>,
		body: impl FnOnce(&mut Self) -> Result<R>,
	) -> Result<R> {
		let child = self.new_frame(self.env.clone(), anchor)?;
		let prev = mem::replace(&mut self.env, child);
		let result = body(self);
		self.env = prev;
		result
	}

	fn new_frame(
		&self,
		parent: GcRef<Environment<'a>>,
		anchor: Option<&'a Token>,
	) -> Result<GcRef<Environment<'a>>> {
		gc::allocate(Environment::with_parent(parent)).map_err(|oom| match anchor {
			Some(token) => self.throw(token, oom.into()),
			None => self.throw_unanchored(oom.into()),
		})
	}

	// ----- error plumbing -----

	// Reporting happens at the throw site, where the active scan result
	// still matches the token.
	fn throw(&self, token: &Token, kind: RuntimeErrorKind) -> RuntimeError {
		report::error_at(self.scan, *token, &kind.to_string());
		kind.error(token)
	}

	fn throw_unanchored(&self, kind: RuntimeErrorKind) -> RuntimeError {
		report::bare_error(&kind.to_string());
		kind.unanchored()
	}
}

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// The `clock()` built-in: seconds since a monotonic epoch.
fn clock<'v>(_args: &[Value<'v>]) -> Value<'v> {
	Value::Number(EPOCH.elapsed().as_secs_f64())
}
