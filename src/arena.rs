//! A bump allocator for the syntax tree.
//!
//! Allocation is a pointer decrement inside a fixed-size block; everything
//! is freed at once, either wholesale or back to a saved [`State`]. Values
//! whose type needs dropping get a destructor node linked into a list that
//! lives inside the arena itself, immediately before the value, so a rewind
//! can run exactly the destructors for the region being discarded, newest
//! first, mirroring lexical nesting.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::{Cell, RefCell};
use std::mem;
use std::ptr;
use std::ptr::NonNull;

/// Size of each arena block. A single allocation may never exceed this.
pub const BLOCK_SIZE: u32 = 16 * 1024;

const MAX_ALIGN: usize = 16;
const NO_BLOCK: u32 = u32::MAX;

/// A snapshot of the bump pointer, for [`BumpArena::reset_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
	block: u32,
	offset: u32,
}

struct DtorNode {
	dtor: unsafe fn(*mut DtorNode),
	next: *mut DtorNode,
}

// The node must sit directly before the value so one allocation carries both.
#[repr(C)]
struct WithDtor<T> {
	node: DtorNode,
	value: T,
}

struct Block {
	ptr: NonNull<u8>,
}

impl Block {
	fn layout() -> Layout {
		// Infallible: both arguments are valid constants.
		Layout::from_size_align(BLOCK_SIZE as usize, MAX_ALIGN).unwrap()
	}

	fn new() -> Self {
		// SAFETY: the layout has non-zero size.
		let raw = unsafe { alloc(Self::layout()) };
		let Some(ptr) = NonNull::new(raw) else {
			handle_alloc_error(Self::layout());
		};
		Self { ptr }
	}
}

impl Drop for Block {
	fn drop(&mut self) {
		// SAFETY: allocated in `Block::new` with the same layout.
		unsafe { dealloc(self.ptr.as_ptr(), Self::layout()) };
	}
}

/// The arena. Offsets decrement from the end of the current block; a fresh
/// block is chained on when an allocation no longer fits.
pub struct BumpArena {
	state: Cell<State>,
	blocks: RefCell<Vec<Block>>,
	dtors: Cell<*mut DtorNode>,
}

impl Default for BumpArena {
	fn default() -> Self {
		Self::new()
	}
}

impl BumpArena {
	#[must_use]
	pub fn new() -> Self {
		Self {
			state: Cell::new(State { block: NO_BLOCK, offset: 0 }),
			blocks: RefCell::new(Vec::new()),
			dtors: Cell::new(ptr::null_mut()),
		}
	}

	/// The current bump pointer, suitable for a later [`reset_to`](Self::reset_to).
	#[must_use]
	pub fn state(&self) -> State {
		self.state.get()
	}

	/// Moves `value` into the arena and returns a reference to it.
	///
	/// The reference lives as long as the arena is neither reset nor
	/// rewound past this allocation; the borrow on `self` enforces that.
	pub fn alloc<T>(&self, value: T) -> &T {
		if mem::needs_drop::<T>() {
			let raw = self.raw_alloc(mem::size_of::<WithDtor<T>>(), mem::align_of::<WithDtor<T>>());
			let ptr = raw.cast::<WithDtor<T>>();
			// SAFETY: `raw_alloc` returned properly aligned storage of the
			// requested size, and nothing else aliases it.
			unsafe {
				ptr.write(WithDtor {
					node: DtorNode { dtor: drop_value::<T>, next: self.dtors.get() },
					value,
				});
				self.dtors.set(ptr.cast::<DtorNode>());
				&(*ptr).value
			}
		} else {
			let ptr = self.raw_alloc(mem::size_of::<T>(), mem::align_of::<T>()).cast::<T>();
			// SAFETY: as above.
			unsafe {
				ptr.write(value);
				&*ptr
			}
		}
	}

	/// Rewinds to `state`, dropping everything allocated after it in
	/// reverse construction order. Blocks already grown are kept for reuse.
	pub fn reset_to(&mut self, state: State) {
		let current = self.state.get();
		debug_assert!(
			state.block == NO_BLOCK
				|| (state.block < current.block && state.offset <= BLOCK_SIZE)
				|| (state.block == current.block
					&& state.offset >= current.offset
					&& state.offset <= BLOCK_SIZE),
			"reset target {state:?} was never a state of this arena (now at {current:?})",
		);

		self.run_dtors_above(state);
		self.state.set(state);
	}

	/// Drops everything in the arena. The first block is kept for reuse.
	pub fn reset(&mut self) {
		let mut node = self.dtors.get();
		while !node.is_null() {
			// SAFETY: the list only holds live nodes; each is run once.
			node = unsafe { run_dtor(node) };
		}
		self.dtors.set(ptr::null_mut());

		let blocks = self.blocks.get_mut();
		blocks.truncate(1);
		let state = if blocks.is_empty() {
			State { block: NO_BLOCK, offset: 0 }
		} else {
			State { block: 0, offset: BLOCK_SIZE }
		};
		self.state.set(state);
	}

	fn raw_alloc(&self, size: usize, align: usize) -> *mut u8 {
		debug_assert!(align.is_power_of_two());
		assert!(align <= MAX_ALIGN, "over-aligned type allocated in the arena");
		assert!(
			size <= BLOCK_SIZE as usize,
			"allocation of {size} bytes exceeds the arena block size"
		);

		let size = (size as u32).max(1);
		let align = align as u32;
		let mut state = self.state.get();

		// Bump downward; a wrap past zero lands at an offset >= BLOCK_SIZE
		// and falls through to the new-block path.
		let new_offset = state.offset.wrapping_sub(size) & !(align - 1);
		if new_offset < BLOCK_SIZE {
			state.offset = new_offset;
			self.state.set(state);
			let blocks = self.blocks.borrow();
			// SAFETY: the offset is in bounds of the current block.
			return unsafe { blocks[state.block as usize].ptr.as_ptr().add(new_offset as usize) };
		}

		let mut blocks = self.blocks.borrow_mut();
		if state.block.wrapping_add(1) as usize == blocks.len() {
			blocks.push(Block::new());
		}
		state.block = state.block.wrapping_add(1);
		state.offset = (BLOCK_SIZE - size) & !(align - 1);
		debug_assert!((state.block as usize) < blocks.len());
		debug_assert!(state.offset < BLOCK_SIZE);
		self.state.set(state);

		// SAFETY: the offset is in bounds of the (possibly fresh) block.
		unsafe { blocks[state.block as usize].ptr.as_ptr().add(state.offset as usize) }
	}

	// Runs, newest first, every destructor registered after `state`. The
	// list is newest-first and newer nodes live in higher blocks or below
	// the saved offset, so walking from the head stops at the right node.
	fn run_dtors_above(&mut self, state: State) {
		let current = self.state.get();
		let blocks = self.blocks.get_mut();
		let mut node = self.dtors.get();

		let mut block_idx = current.block;
		while block_idx != state.block {
			let base = blocks[block_idx as usize].ptr.as_ptr();
			while !node.is_null() && in_range(node.cast(), base, BLOCK_SIZE) {
				// SAFETY: node is live and run exactly once.
				node = unsafe { run_dtor(node) };
			}
			block_idx = block_idx.wrapping_sub(1);
		}

		if state.block != NO_BLOCK {
			let base = blocks[state.block as usize].ptr.as_ptr();
			while !node.is_null() && in_range(node.cast(), base, state.offset) {
				// SAFETY: as above.
				node = unsafe { run_dtor(node) };
			}
		}

		self.dtors.set(node);
	}
}

impl Drop for BumpArena {
	fn drop(&mut self) {
		self.reset();
	}
}

fn in_range(ptr: *const u8, base: *const u8, len: u32) -> bool {
	let (p, b) = (ptr as usize, base as usize);
	b <= p && p < b + len as usize
}

// SAFETY: `node` must head a live `WithDtor<T>` and must not be used again.
unsafe fn run_dtor(node: *mut DtorNode) -> *mut DtorNode {
	// SAFETY: per the function contract.
	unsafe {
		let next = (*node).next;
		((*node).dtor)(node);
		next
	}
}

// SAFETY: `node` must point at the `node` field of a live `WithDtor<T>`.
unsafe fn drop_value<T>(node: *mut DtorNode) {
	let with = node.cast::<WithDtor<T>>();
	// SAFETY: `#[repr(C)]` makes the cast valid; the value is live.
	unsafe { ptr::drop_in_place(&mut (*with).value) };
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Bumps a counter when dropped.
	struct Signal<'c> {
		counter: &'c Cell<u32>,
	}

	impl Drop for Signal<'_> {
		fn drop(&mut self) {
			self.counter.set(self.counter.get() + 1);
		}
	}

	const SIGNAL_SIZE: u32 = mem::size_of::<WithDtor<Signal<'static>>>() as u32;
	const SIGNALS_PER_BLOCK: u32 = BLOCK_SIZE / SIGNAL_SIZE;

	#[test]
	fn plain_values_round_trip() {
		let arena = BumpArena::new();
		let a = arena.alloc(12_i32);
		let b = arena.alloc(13_i64);
		assert_eq!(*a, 12);
		assert_eq!(*b, 13);
	}

	#[test]
	fn rewind_runs_destructors_for_the_discarded_region() {
		let counter = Cell::new(0);
		let mut arena = BumpArena::new();

		for _ in 0..SIGNALS_PER_BLOCK + 5 {
			arena.alloc(Signal { counter: &counter });
		}

		let state = arena.state();
		assert_eq!(state.block, 1);
		assert_eq!(state.offset, BLOCK_SIZE - 5 * SIGNAL_SIZE);
		assert_eq!(counter.get(), 0);

		// Rewind into the first block: all five signals in block one go, plus
		// the ten newest in block zero (the ones below the target offset).
		arena.reset_to(State { block: 0, offset: 10 * SIGNAL_SIZE });
		assert_eq!(counter.get(), 15);
		assert_eq!(arena.state(), State { block: 0, offset: 10 * SIGNAL_SIZE });

		arena.reset();
		assert_eq!(counter.get(), SIGNALS_PER_BLOCK + 5);
	}

	#[test]
	fn destructors_run_in_reverse_construction_order() {
		let log = RefCell::new(Vec::new());

		struct Ordered<'l> {
			id: u32,
			log: &'l RefCell<Vec<u32>>,
		}
		impl Drop for Ordered<'_> {
			fn drop(&mut self) {
				self.log.borrow_mut().push(self.id);
			}
		}

		let mut arena = BumpArena::new();
		for id in 0..4 {
			arena.alloc(Ordered { id, log: &log });
		}
		arena.reset();

		assert_eq!(*log.borrow(), [3, 2, 1, 0]);
	}

	#[test]
	fn rewind_to_a_checkpoint_preserves_older_values() {
		let counter = Cell::new(0);
		let mut arena = BumpArena::new();

		arena.alloc(Signal { counter: &counter });
		let checkpoint = arena.state();
		for _ in 0..3 {
			arena.alloc(Signal { counter: &counter });
		}

		arena.reset_to(checkpoint);
		assert_eq!(counter.get(), 3);
		assert_eq!(arena.state(), checkpoint);

		arena.reset();
		assert_eq!(counter.get(), 4);
	}

	#[test]
	fn rewind_to_the_empty_state_discards_everything() {
		let counter = Cell::new(0);
		let mut arena = BumpArena::new();

		let empty = arena.state();
		for _ in 0..7 {
			arena.alloc(Signal { counter: &counter });
		}
		arena.reset_to(empty);

		assert_eq!(counter.get(), 7);
		assert_eq!(arena.state(), empty);
	}

	#[test]
	fn dropping_the_arena_runs_destructors_once() {
		let counter = Cell::new(0);
		{
			let arena = BumpArena::new();
			for _ in 0..10 {
				arena.alloc(Signal { counter: &counter });
			}
		}
		assert_eq!(counter.get(), 10);
	}

	#[test]
	fn mixed_drop_and_plain_allocations() {
		let counter = Cell::new(0);
		let mut arena = BumpArena::new();

		let n = arena.alloc(1_u8);
		arena.alloc(Signal { counter: &counter });
		let words = arena.alloc(vec!["heap".to_string(), "arena".to_string()]);

		assert_eq!(*n, 1);
		assert_eq!(words.len(), 2);
		arena.reset();
		assert_eq!(counter.get(), 1);
	}

	mod properties {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			// Allocate in segments with a checkpoint before each, then
			// rewind them in reverse: each rewind must drop exactly its
			// segment's values.
			#[test]
			fn segment_rewinds_drop_exact_counts(segments in proptest::collection::vec(0u32..200, 1..8)) {
				let counter = Cell::new(0);
				let mut arena = BumpArena::new();

				let mut checkpoints = Vec::new();
				for &count in &segments {
					checkpoints.push(arena.state());
					for _ in 0..count {
						arena.alloc(Signal { counter: &counter });
					}
				}

				let mut expected = 0;
				for (&count, &checkpoint) in segments.iter().zip(&checkpoints).rev() {
					expected += count;
					arena.reset_to(checkpoint);
					prop_assert_eq!(counter.get(), expected);
					prop_assert_eq!(arena.state(), checkpoint);
				}
			}
		}
	}
}
