use std::fmt;

/// Debug metadata attached to a position in the instruction stream
///
/// These become the opcodes of a `debug_info_item` state machine once addresses are known.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DebugItem {
    /// Source line of the instructions starting here
    LineNumber(u32),

    /// Local variable comes into scope
    StartLocal {
        register: u16,
        name: Option<String>,
        local_type: Option<String>,
        signature: Option<String>,
    },

    /// Local variable goes out of scope
    EndLocal { register: u16 },

    /// Previously ended local variable comes back into scope
    RestartLocal { register: u16 },

    PrologueEnd,
    EpilogueBegin,

    /// Source file of the instructions starting here (`None` resets to the class source file)
    SetSourceFile(Option<String>),
}

/// Handle to a debug item owned by a [`super::MutableInstructionStream`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct DebugItemId(pub(super) usize);

impl fmt::Debug for DebugItemId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("d{}", self.0))
    }
}

/// Debug item with its final address
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResolvedDebugItem {
    pub address: u32,
    pub item: DebugItem,
}
