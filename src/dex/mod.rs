//! Building blocks of Dalvik executables
//!
//! Generating a dex file is done in two largely independent steps:
//!
//!   - method bodies are built as [`code::MutableInstructionStream`]s, where branches point at
//!     labels and encodings get picked once the code stops changing
//!   - classes are interned into a [`pool::DexPool`], which collects every string, type, and
//!     member reference they use, then gets sorted and written out by a [`pool::PoolWriter`]
//!
//! ```
//! use dexbuild::dex::code::{
//!     write_code_units, IfTest, Instruction, InstructionStreamBuilder, ValueKind,
//! };
//! use dexbuild::dex::model::{ClassDef, Method, MethodParameter};
//! use dexbuild::dex::pool::{DexPool, PoolWriter};
//! use dexbuild::dex::{ClassAccessFlags, MethodAccessFlags};
//!
//! // static int clamp(int x) { return x >= 0 ? x : 0; }
//! let mut builder = InstructionStreamBuilder::new(1);
//! let positive = builder.label("positive");
//! builder.add_instruction(Instruction::IfZero {
//!     test: IfTest::Ge,
//!     register: 0,
//!     target: positive,
//! })?;
//! builder.add_instruction(Instruction::Const4 { dest: 0, value: 0 })?;
//! builder.add_label("positive")?;
//! builder.add_instruction(Instruction::Return { kind: ValueKind::Single, register: 0 })?;
//! let implementation = builder.finish()?;
//! assert_eq!(implementation.code_unit_count(), 4);
//!
//! let mut method = Method::new(
//!     "clamp",
//!     vec![MethodParameter::new("I")],
//!     "I",
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//! );
//! method.implementation = Some(implementation.clone());
//!
//! let mut class = ClassDef::new(
//!     "LMath;",
//!     ClassAccessFlags::PUBLIC,
//!     Some(String::from("Ljava/lang/Object;")),
//! );
//! class.add_method(method);
//!
//! let mut pool = DexPool::new();
//! let mut writer = PoolWriter::new(&mut pool);
//! writer.add_classes([&class])?;
//! let sections = writer.write()?;
//! assert_eq!(sections.method_ids.len(), 1);
//!
//! // String indices past 16 bits need `const-string/jumbo`, which is only known after layout
//! let implementation = implementation.with_jumbo_strings(&pool)?;
//! let mut code_units = vec![];
//! write_code_units(&mut code_units, &implementation.instructions, &pool)?;
//! assert_eq!(code_units.len(), 8);
//! # Ok::<(), dexbuild::dex::Error>(())
//! ```

mod access_flags;
mod binary_format;
pub mod code;
mod encoded_value;
mod errors;
pub mod model;
pub mod pool;
mod references;
mod settings;

pub use access_flags::*;
pub use binary_format::*;
pub use encoded_value::*;
pub use errors::*;
pub use pool::Section;
pub use references::*;
pub use settings::*;
