//! Runtime errors.

use crate::gc::OutOfMemory;
use crate::token::Token;

/// Everything that can go wrong while the evaluator is running.
#[derive(Error, Debug)]
pub enum RuntimeErrorKind {
	#[error("Expected operand of type {expected}, got {got}.")]
	WrongOperandType { expected: &'static str, got: &'static str },

	#[error("Operands to (+) must be two numbers or two strings. Got {lhs} and {rhs}.")]
	AddOperands { lhs: &'static str, rhs: &'static str },

	/// A variable lookup found nothing in the whole chain.
	#[error("Identifier not found")]
	IdentifierNotFound,

	/// An assignment target is declared nowhere in the chain.
	#[error("Undefined variable '{0}'.")]
	UndefinedVariable(String),

	#[error("Value not callable")]
	NotCallable,

	#[error("Expected {expected} arguments but got {got}.")]
	ArityMismatch { expected: usize, got: usize },

	/// The GC heap is exhausted; unwinds the current top-level statement.
	#[error("{0}")]
	OutOfMemory(#[from] OutOfMemory),
}

impl RuntimeErrorKind {
	/// Anchors this kind at `token`.
	pub fn error(self, token: &Token) -> RuntimeError {
		RuntimeError { token: Some(*token), kind: self }
	}

	/// An error with no source anchor (out-of-memory from a block scope).
	pub fn unanchored(self) -> RuntimeError {
		RuntimeError { token: None, kind: self }
	}
}

/// A runtime error, possibly anchored to the token it is about.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct RuntimeError {
	pub token: Option<Token>,
	pub kind: RuntimeErrorKind,
}

/// The crate-wide result alias for evaluation.
pub type Result<T> = std::result::Result<T, RuntimeError>;
