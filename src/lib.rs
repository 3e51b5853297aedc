#![warn(unsafe_op_in_unsafe_fn)]

#[macro_use]
extern crate thiserror;

extern crate static_assertions as sa;

pub mod arena;
pub mod ast;
pub mod env;
pub mod error;
pub mod gc;
pub mod interp;
pub mod parser;
pub mod report;
pub mod scanner;
pub mod token;
pub mod value;

pub use arena::BumpArena;
pub use error::{Result, RuntimeError};
pub use interp::Interpreter;
pub use value::Value;
