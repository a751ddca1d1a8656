use super::code::{DebugItemId, Label};
use super::{MethodHandleRef, Section};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Instruction index outside of the stream (`len` is the index of the end sentinel)
    IndexOutOfBounds { index: usize, len: usize },

    /// Label was not created by this stream
    UnknownLabel(Label),

    /// Label is already bound to a location
    LabelAlreadyPlaced(Label),

    /// Label was referred to but never placed
    UnplacedLabel(Label),

    /// Named label was placed twice
    DuplicateLabelName(String),

    /// Debug item was not created by this stream
    UnknownDebugItem(DebugItemId),

    /// Debug item is already attached to a location
    DebugItemAlreadyAttached(DebugItemId),

    /// Switch instruction doesn't point at any payload
    DanglingSwitch { address: u32 },

    /// Switch instruction points at a payload of the wrong kind
    WrongPayloadKind {
        address: u32,
        expected: &'static str,
        found: &'static str,
    },

    /// Two switch instructions share one payload (`address` is the second switch)
    SharedSwitchPayload { address: u32 },

    /// Relative offset doesn't fit in the instruction's offset field
    BranchOutOfRange {
        address: u32,
        instruction: &'static str,
        offset: i64,
    },

    /// Branch relaxation kept on changing the stream
    RelaxationDidNotConverge { passes: usize },

    /// Resolved offset doesn't land on an instruction boundary
    InvalidBranchTarget { address: u32, target: i64 },

    /// Overlapping try ranges with different handlers for the same exception type (`None` is the
    /// catch-all)
    OverlappingCatches { exception_type: Option<String> },

    /// Register doesn't fit the instruction format
    InvalidRegister {
        instruction: &'static str,
        register: u8,
    },

    /// Literal doesn't fit the instruction format
    LiteralOutOfRange {
        instruction: &'static str,
        value: i64,
    },

    /// More than 5 arguments to a non-range invoke
    TooManyArguments {
        instruction: &'static str,
        count: usize,
    },

    /// Register range of a `/range` instruction runs past the last register
    InvalidRegisterRange {
        instruction: &'static str,
        first_register: u16,
        register_count: u8,
    },

    /// Pool index too large for the instruction's index field
    IndexTooLarge {
        instruction: &'static str,
        index: u32,
    },

    /// Array payload element width other than 1, 2, 4, or 8
    InvalidArrayPayload { element_width: u16 },

    /// Class was already interned into this pool
    ClassAlreadyInterned(String),

    /// Two fields of a class have the same name and type
    DuplicateField { class: String, field: String },

    /// Two methods of a class have the same name and prototype
    DuplicateMethod { class: String, method: String },

    /// Unknown `method_handle_type`
    UnrecognizedMethodHandleKind(u16),

    /// Field accessor method handle pointing at a method or vice versa
    MismatchedMethodHandle(MethodHandleRef),

    /// Method implementation has try blocks but no instructions
    TryBlocksWithoutInstructions { class: String, method: String },

    /// Entity was never interned (indicates a bug in the cascade)
    MissingPoolEntry { section: Section, entity: String },

    /// `reset` called without a preceding `mark`
    ResetWithoutMark,

    /// Too many entries in a section indexed by a 16-bit field
    PoolOverflow { section: Section, count: usize },

    /// Final indices requested before pool layout
    PoolNotLaidOut(Section),

    /// Instruction stream was modified while a cursor was reading it
    StreamModified,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds (end is at {})", index, len)
            }
            Error::UnknownLabel(label) => write!(f, "unknown label {:?}", label),
            Error::LabelAlreadyPlaced(label) => write!(f, "label {:?} is already placed", label),
            Error::UnplacedLabel(label) => write!(f, "label {:?} was never placed", label),
            Error::DuplicateLabelName(name) => {
                write!(f, "there is already a label named {:?}", name)
            }
            Error::UnknownDebugItem(item) => write!(f, "unknown debug item {:?}", item),
            Error::DebugItemAlreadyAttached(item) => {
                write!(f, "debug item {:?} is already attached", item)
            }
            Error::DanglingSwitch { address } => write!(
                f,
                "switch instruction at address {} does not refer to a payload",
                address
            ),
            Error::WrongPayloadKind {
                address,
                expected,
                found,
            } => write!(
                f,
                "switch instruction at address {} refers to {} instead of {}",
                address, found, expected
            ),
            Error::SharedSwitchPayload { address } => write!(
                f,
                "switch instruction at address {} refers to a payload used by another switch",
                address
            ),
            Error::BranchOutOfRange {
                address,
                instruction,
                offset,
            } => write!(
                f,
                "offset {} of {} at address {} is out of range",
                offset, instruction, address
            ),
            Error::RelaxationDidNotConverge { passes } => {
                write!(f, "branch relaxation did not converge after {} passes", passes)
            }
            Error::InvalidBranchTarget { address, target } => write!(
                f,
                "branch at address {} targets {}, which is not an instruction boundary",
                address, target
            ),
            Error::OverlappingCatches { exception_type } => write!(
                f,
                "multiple overlapping catches for {} with different handlers",
                exception_type.as_deref().unwrap_or("all exceptions")
            ),
            Error::InvalidRegister {
                instruction,
                register,
            } => write!(f, "register v{} is out of range for {}", register, instruction),
            Error::LiteralOutOfRange { instruction, value } => {
                write!(f, "literal {} is out of range for {}", value, instruction)
            }
            Error::TooManyArguments { instruction, count } => {
                write!(f, "{} takes at most 5 arguments (got {})", instruction, count)
            }
            Error::InvalidRegisterRange {
                instruction,
                first_register,
                register_count,
            } => write!(
                f,
                "{} registers starting at v{} are out of range for {}",
                register_count, first_register, instruction
            ),
            Error::IndexTooLarge { instruction, index } => {
                write!(f, "index {} is too large for {}", index, instruction)
            }
            Error::InvalidArrayPayload { element_width } => {
                write!(f, "invalid array payload element width {}", element_width)
            }
            Error::ClassAlreadyInterned(class) => {
                write!(f, "class {} has already been interned", class)
            }
            Error::DuplicateField { class, field } => write!(
                f,
                "multiple definitions for field {} in class {}",
                field, class
            ),
            Error::DuplicateMethod { class, method } => write!(
                f,
                "multiple definitions for method {} in class {}",
                method, class
            ),
            Error::UnrecognizedMethodHandleKind(kind) => {
                write!(f, "unrecognized method handle kind {:#x}", kind)
            }
            Error::MismatchedMethodHandle(handle) => write!(
                f,
                "method handle kind {:?} does not match its member {:?}",
                handle.kind, handle.member
            ),
            Error::TryBlocksWithoutInstructions { class, method } => write!(
                f,
                "method {} in class {} has try blocks but no instructions",
                method, class
            ),
            Error::MissingPoolEntry { section, entity } => {
                write!(f, "{} was never interned into the {:?} section", entity, section)
            }
            Error::ResetWithoutMark => write!(f, "pool reset without a mark"),
            Error::PoolOverflow { section, count } => {
                write!(f, "{:?} section has too many entries ({})", section, count)
            }
            Error::PoolNotLaidOut(section) => {
                write!(f, "{:?} section has no final indices yet", section)
            }
            Error::StreamModified => {
                write!(f, "instruction stream was modified during iteration")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
