use super::{DebugItem, DebugItemId, Instruction, Label, MutableInstructionStream};
use crate::dex::Error;
use crate::util::Width;

/// Stable handle to a slot in the stream's location arena
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub(super) struct LocationId(pub(super) usize);

/// One position in the instruction stream
///
/// The `index` and `address` fields are derived from the position of the slot in the stream
/// order, and get rewritten whenever an earlier instruction changes.
#[derive(Debug)]
pub(super) struct LocationSlot {
    pub(super) instruction: Option<Instruction<Label>>,
    pub(super) index: usize,
    pub(super) address: u32,
    pub(super) labels: Vec<Label>,
    pub(super) debug_items: Vec<DebugItemId>,
}

impl LocationSlot {
    pub(super) fn new(instruction: Option<Instruction<Label>>) -> LocationSlot {
        LocationSlot {
            instruction,
            index: 0,
            address: 0,
            labels: vec![],
            debug_items: vec![],
        }
    }

    /// Width in code units (the end sentinel has no width)
    pub(super) fn width(&self) -> u32 {
        self.instruction
            .as_ref()
            .map_or(0, |instruction| instruction.width() as u32)
    }
}

/// Read-only view of one position in a [`MutableInstructionStream`]
///
/// The last location of every stream has no instruction: it is the position one past the end,
/// where labels for "end of method" live.
pub struct InstructionLocation<'a> {
    pub(super) stream: &'a MutableInstructionStream,
    pub(super) slot: &'a LocationSlot,
}

impl<'a> InstructionLocation<'a> {
    pub fn instruction(&self) -> Option<&'a Instruction<Label>> {
        self.slot.instruction.as_ref()
    }

    pub fn index(&self) -> usize {
        self.slot.index
    }

    /// Address in code units from the start of the method
    ///
    /// This reflects the current encodings, which may still change when the stream is relaxed.
    pub fn address(&self) -> u32 {
        self.slot.address
    }

    pub fn labels(&self) -> &'a [Label] {
        &self.slot.labels
    }

    pub fn debug_item_ids(&self) -> &'a [DebugItemId] {
        &self.slot.debug_items
    }

    /// Debug items in the order they were attached
    pub fn debug_items(&self) -> impl Iterator<Item = &'a DebugItem> + 'a {
        let stream = self.stream;
        self.slot
            .debug_items
            .iter()
            .filter_map(move |id| stream.debug_item(*id))
    }
}

/// Cursor over the instruction locations of a stream
///
/// The cursor remembers the modification count of the stream when it was created, and refuses to
/// keep reading once the stream has been modified.
#[derive(Debug)]
pub struct StreamCursor {
    pub(super) position: usize,
    pub(super) modification_count: u64,
}

impl StreamCursor {
    /// Next location with an instruction, or `None` at the end
    pub fn next<'a>(
        &mut self,
        stream: &'a MutableInstructionStream,
    ) -> Result<Option<InstructionLocation<'a>>, Error> {
        if stream.modification_count != self.modification_count {
            return Err(Error::StreamModified);
        }
        if self.position >= stream.len() {
            return Ok(None);
        }
        let location = stream.location(self.position);
        self.position += 1;
        Ok(location)
    }
}
