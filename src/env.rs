//! The environment chain: one scope frame per block or call, linked to its
//! parent and allocated on the garbage-collected heap so closures can keep
//! frames alive after their creator has returned.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::gc::{GcRef, Marker, Trace};
use crate::value::Value;

/// A single scope frame.
///
/// Frames are only ever reached through [`GcRef`] handles, so mutation
/// goes through a `RefCell`. Storing a value is a write barrier: the
/// value's handles stop being roots and become edges owned by this frame.
#[derive(Debug)]
pub struct Environment<'a> {
	values: RefCell<HashMap<Rc<str>, Value<'a>>>,
	parent: Option<GcRef<Environment<'a>>>,
}

impl<'a> Environment<'a> {
	/// The distinguished root frame for globals.
	#[must_use]
	pub fn root() -> Self {
		Self { values: RefCell::new(HashMap::new()), parent: None }
	}

	/// A fresh child frame of `parent`.
	#[must_use]
	pub fn with_parent(parent: GcRef<Environment<'a>>) -> Self {
		Self { values: RefCell::new(HashMap::new()), parent: Some(parent) }
	}

	/// Inserts or overwrites `name` in this frame.
	pub fn define(&self, name: &str, value: Value<'a>) {
		// SAFETY: the value is moving into this managed frame.
		unsafe { value.unroot() };
		self.values.borrow_mut().insert(Rc::from(name), value);
	}

	/// Updates `name` in the nearest frame that defines it; reports
	/// whether any frame did.
	#[must_use]
	pub fn assign(&self, name: &str, value: Value<'a>) -> bool {
		if self.values.borrow().contains_key(name) {
			// SAFETY: the value is moving into this managed frame.
			unsafe { value.unroot() };
			self.values.borrow_mut().insert(Rc::from(name), value);
			return true;
		}
		match &self.parent {
			Some(parent) => parent.assign(name, value),
			None => false,
		}
	}

	/// Looks `name` up through the chain.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<Value<'a>> {
		if let Some(value) = self.values.borrow().get(name) {
			return Some(value.clone());
		}
		self.parent.as_ref().and_then(|parent| parent.get(name))
	}
}

// SAFETY: a frame's handles are its parent link and every stored value.
unsafe impl Trace for Environment<'_> {
	unsafe fn trace(&self, marker: &mut Marker) {
		if let Some(parent) = &self.parent {
			marker.mark(parent);
		}
		for value in self.values.borrow().values() {
			// SAFETY: forwarded collector call.
			unsafe { value.trace(marker) };
		}
	}

	unsafe fn unroot(&self) {
		if let Some(parent) = &self.parent {
			// SAFETY: forwarded barrier call.
			unsafe { parent.unroot() };
		}
		for value in self.values.borrow().values() {
			// SAFETY: forwarded barrier call.
			unsafe { value.unroot() };
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gc;

	#[test]
	fn define_get_and_shadowing() {
		gc::init(64 * 1024);
		{
			let globals = gc::allocate(Environment::root()).unwrap();
			globals.define("a", Value::Number(1.0));

			let child = gc::allocate(Environment::with_parent(globals.clone())).unwrap();
			assert_eq!(child.get("a"), Some(Value::Number(1.0)));

			child.define("a", Value::Number(2.0));
			assert_eq!(child.get("a"), Some(Value::Number(2.0)));
			assert_eq!(globals.get("a"), Some(Value::Number(1.0)));

			assert_eq!(child.get("missing"), None);
		}
		gc::collect();
		gc::teardown();
	}

	#[test]
	fn assign_walks_to_the_defining_frame() {
		gc::init(64 * 1024);
		{
			let globals = gc::allocate(Environment::root()).unwrap();
			globals.define("x", Value::Nil);

			let child = gc::allocate(Environment::with_parent(globals.clone())).unwrap();
			assert!(child.assign("x", Value::Number(3.0)));
			assert_eq!(globals.get("x"), Some(Value::Number(3.0)));

			assert!(!child.assign("undeclared", Value::Nil));
		}
		gc::collect();
		gc::teardown();
	}

	#[test]
	fn dropped_frames_are_collected() {
		gc::init(64 * 1024);
		{
			let globals = gc::allocate(Environment::root()).unwrap();
			{
				let _child = gc::allocate(Environment::with_parent(globals.clone())).unwrap();
				gc::collect();
				assert_eq!(gc::num_allocations(), 2);
			}
			gc::collect();
			assert_eq!(gc::num_allocations(), 1);
		}
		gc::collect();
		gc::teardown();
	}
}
