//! Method bodies: instructions, labels, and their layout
//!
//! ### Structure
//!
//! A method body is a linear sequence of [`Instruction`]s. Branches refer to other positions in
//! the sequence, and since Dalvik branch offsets are relative and some instructions have several
//! encodings of different widths, those offsets depend on every instruction in between. Rather
//! than have callers compute offsets, instructions are built with [`Label`]s as their branch
//! targets, and offsets are only resolved at the very end.
//!
//! ### Editing and relaxation
//!
//! [`MutableInstructionStream`] holds the instructions of one method and supports arbitrary
//! insertion, removal, replacement, and swapping. Picking branch encodings and aligning payloads
//! is deferred to [`relaxation`], which runs before anything is read out. The result is a
//! [`MethodImplementation`], with every offset resolved.
//!
//! For straight top-to-bottom generation, [`InstructionStreamBuilder`] is more convenient: it
//! keeps track of named labels and attaches debug items to the next instruction.

mod builder;
mod code_writer;
mod debug_item;
mod implementation;
mod instruction;
mod label;
mod location;
pub mod relaxation;
mod stream;
mod try_blocks;

pub use builder::*;
pub use code_writer::*;
pub use debug_item::*;
pub use implementation::*;
pub use instruction::*;
pub use label::*;
pub use location::{InstructionLocation, StreamCursor};
pub use stream::*;
pub use try_blocks::*;

use location::{LocationId, LocationSlot};
