use super::{
    DebugItem, DebugItemId, Instruction, InstructionLocation, Label, LocationId, LocationSlot,
    StreamCursor, TryRange,
};
use crate::dex::{Error, Settings};
use std::collections::HashMap;

/// Editable instruction stream of one method
///
/// Instructions live in locations, and branches refer to locations through [`Label`]s, so that
/// instructions can be inserted, removed, replaced, and swapped without having to fix up offsets
/// by hand. The stream always ends with a sentinel location that has no instruction.
///
/// Addresses and indices of locations are kept consistent with the current instructions after
/// every edit. What edits don't do is pick encodings: a `goto` whose target drifted out of range
/// or a payload that ended up on an odd address is only fixed up when the stream is relaxed (see
/// [`super::relaxation`]). All of the methods that read out final instructions, try blocks, or
/// debug items relax the stream first if it has changed.
///
/// ```
/// use dexbuild::dex::code::{Instruction, MutableInstructionStream, ValueKind};
///
/// # fn main() -> Result<(), dexbuild::dex::Error> {
/// let mut stream = MutableInstructionStream::new(2);
/// stream.add_instruction(Instruction::Const4 { dest: 0, value: 1 })?;
/// stream.add_instruction(Instruction::Return { kind: ValueKind::Single, register: 0 })?;
/// stream.insert_instruction(1, Instruction::Const16 { dest: 1, value: 300 })?;
///
/// let addresses: Vec<u32> = stream
///     .instructions()?
///     .iter()
///     .map(|resolved| resolved.address)
///     .collect();
/// assert_eq!(addresses, vec![0, 1, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MutableInstructionStream {
    register_count: u16,

    /// Location arena (removed locations stay behind, unreachable from `order`)
    pub(super) slots: Vec<LocationSlot>,

    /// Locations in instruction order, ending with the sentinel
    pub(super) order: Vec<LocationId>,

    /// Location of every label created by this stream
    pub(super) labels: Vec<Option<LocationId>>,

    pub(super) debug_items: Vec<DebugSlot>,
    pub(super) try_ranges: Vec<TryRange>,

    /// Switch instruction referring to each switch payload, from the last relaxation
    pub(super) switch_referrers: HashMap<LocationId, LocationId>,

    /// Encodings may be stale
    pub(super) dirty: bool,

    /// Bumped on every edit, to invalidate outstanding cursors
    pub(super) modification_count: u64,

    pub(super) relaxation_pass_limit: usize,
}

#[derive(Debug)]
pub(super) struct DebugSlot {
    pub(super) item: DebugItem,
    pub(super) location: Option<LocationId>,
}

impl MutableInstructionStream {
    pub fn new(register_count: u16) -> MutableInstructionStream {
        MutableInstructionStream::with_settings(register_count, &Settings::default())
    }

    pub fn with_settings(register_count: u16, settings: &Settings) -> MutableInstructionStream {
        MutableInstructionStream {
            register_count,
            slots: vec![LocationSlot::new(None)],
            order: vec![LocationId(0)],
            labels: vec![],
            debug_items: vec![],
            try_ranges: vec![],
            switch_referrers: HashMap::new(),
            dirty: false,
            modification_count: 0,
            relaxation_pass_limit: settings.relaxation_pass_limit,
        }
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    pub fn set_register_count(&mut self, register_count: u16) {
        self.register_count = register_count;
    }

    /// Number of instructions (which is also the index of the end sentinel)
    pub fn len(&self) -> usize {
        self.order.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether encodings need to be recomputed before addresses are final
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Location at an index (`len()` is the end sentinel)
    pub fn location(&self, index: usize) -> Option<InstructionLocation<'_>> {
        let id = self.order.get(index)?;
        Some(InstructionLocation {
            stream: self,
            slot: &self.slots[id.0],
        })
    }

    pub fn instruction(&self, index: usize) -> Option<&Instruction<Label>> {
        self.order
            .get(index)
            .and_then(|id| self.slots[id.0].instruction.as_ref())
    }

    /// Relax the stream, then start a cursor over its locations
    pub fn cursor(&mut self) -> Result<StreamCursor, Error> {
        self.relax()?;
        Ok(StreamCursor {
            position: 0,
            modification_count: self.modification_count,
        })
    }

    /// Append an instruction at the end
    ///
    /// The end sentinel becomes the location of the new instruction (so labels and debug items at
    /// the end now refer to it) and a fresh sentinel is added after it.
    pub fn add_instruction(&mut self, instruction: Instruction<Label>) -> Result<(), Error> {
        self.check_labels(&instruction)?;
        let sentinel = self.sentinel();
        let slot = &mut self.slots[sentinel.0];
        slot.instruction = Some(instruction);
        let (index, address) = (slot.index + 1, slot.address + slot.width());

        let new_sentinel = self.new_slot(None);
        let slot = &mut self.slots[new_sentinel.0];
        slot.index = index;
        slot.address = address;
        self.order.push(new_sentinel);
        self.touch();
        Ok(())
    }

    /// Insert an instruction before the one at `index`
    ///
    /// Labels and debug items at `index` stay with the instruction that was already there. Passing
    /// `len()` is the same as [`Self::add_instruction`].
    pub fn insert_instruction(
        &mut self,
        index: usize,
        instruction: Instruction<Label>,
    ) -> Result<(), Error> {
        if index > self.len() {
            return Err(self.out_of_bounds(index));
        }
        if index == self.len() {
            return self.add_instruction(instruction);
        }
        self.check_labels(&instruction)?;
        let id = self.new_slot(Some(instruction));
        self.order.insert(index, id);
        self.renumber_from(index);
        self.touch();
        Ok(())
    }

    /// Replace the instruction at `index`, returning the old one
    pub fn replace_instruction(
        &mut self,
        index: usize,
        instruction: Instruction<Label>,
    ) -> Result<Instruction<Label>, Error> {
        let id = self.instruction_location(index)?;
        self.check_labels(&instruction)?;
        let slot = &mut self.slots[id.0];
        let old_width = slot.width();
        let old = slot.instruction.replace(instruction);
        if slot.width() != old_width {
            self.renumber_from(index + 1);
        }
        self.touch();
        old.ok_or_else(|| self.out_of_bounds(index))
    }

    /// Remove the instruction at `index`, returning it
    ///
    /// Labels and debug items of the removed location move to the following location, with the
    /// debug items placed before the ones already there.
    pub fn remove_instruction(&mut self, index: usize) -> Result<Instruction<Label>, Error> {
        let id = self.instruction_location(index)?;
        let next = self.order[index + 1];

        let removed = &mut self.slots[id.0];
        let instruction = removed.instruction.take();
        let labels = std::mem::take(&mut removed.labels);
        let mut debug_items = std::mem::take(&mut removed.debug_items);

        for label in &labels {
            self.labels[label.0] = Some(next);
        }
        for item in &debug_items {
            self.debug_items[item.0].location = Some(next);
        }
        let next_slot = &mut self.slots[next.0];
        next_slot.labels.extend(labels);
        debug_items.append(&mut next_slot.debug_items);
        next_slot.debug_items = debug_items;

        self.order.remove(index);
        self.renumber_from(index);
        self.touch();
        instruction.ok_or_else(|| self.out_of_bounds(index))
    }

    /// Exchange two instructions, leaving labels and debug items where they are
    pub fn swap_instructions(&mut self, index1: usize, index2: usize) -> Result<(), Error> {
        let id1 = self.instruction_location(index1)?;
        let id2 = self.instruction_location(index2)?;
        if id1 == id2 {
            return Ok(());
        }
        let first = self.slots[id1.0].instruction.take();
        let second = std::mem::replace(&mut self.slots[id2.0].instruction, first);
        self.slots[id1.0].instruction = second;
        self.renumber_from(index1.min(index2) + 1);
        self.touch();
        Ok(())
    }

    /// Make a fresh unplaced label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind an unplaced label to the location at `index`
    pub fn place_label(&mut self, label: Label, index: usize) -> Result<(), Error> {
        match self.labels.get(label.0) {
            None => return Err(Error::UnknownLabel(label)),
            Some(Some(_)) => return Err(Error::LabelAlreadyPlaced(label)),
            Some(None) => (),
        }
        let id = *self
            .order
            .get(index)
            .ok_or_else(|| self.out_of_bounds(index))?;
        self.labels[label.0] = Some(id);
        self.slots[id.0].labels.push(label);
        self.touch();
        Ok(())
    }

    /// Make a new label bound to the location at `index`
    pub fn add_new_label(&mut self, index: usize) -> Result<Label, Error> {
        if index > self.len() {
            return Err(self.out_of_bounds(index));
        }
        let label = self.new_label();
        self.place_label(label, index)?;
        Ok(label)
    }

    /// Unbind a label from its location (it can be placed again afterwards)
    pub fn remove_label(&mut self, label: Label) -> Result<(), Error> {
        let placed = self
            .labels
            .get_mut(label.0)
            .ok_or(Error::UnknownLabel(label))?
            .take();
        if let Some(id) = placed {
            self.slots[id.0].labels.retain(|other| *other != label);
            self.touch();
        }
        Ok(())
    }

    /// Location a label is bound to, if it is placed
    pub fn label_location(&self, label: Label) -> Option<InstructionLocation<'_>> {
        let id = (*self.labels.get(label.0)?)?;
        Some(InstructionLocation {
            stream: self,
            slot: &self.slots[id.0],
        })
    }

    pub fn label_index(&self, label: Label) -> Option<usize> {
        self.label_location(label).map(|location| location.index())
    }

    pub fn label_address(&self, label: Label) -> Option<u32> {
        self.label_location(label).map(|location| location.address())
    }

    /// Make a fresh detached debug item
    pub fn new_debug_item(&mut self, item: DebugItem) -> DebugItemId {
        self.debug_items.push(DebugSlot {
            item,
            location: None,
        });
        DebugItemId(self.debug_items.len() - 1)
    }

    /// Attach a detached debug item after the other debug items at `index`
    pub fn attach_debug_item(&mut self, item: DebugItemId, index: usize) -> Result<(), Error> {
        match self.debug_items.get(item.0) {
            None => return Err(Error::UnknownDebugItem(item)),
            Some(DebugSlot {
                location: Some(_), ..
            }) => return Err(Error::DebugItemAlreadyAttached(item)),
            Some(_) => (),
        }
        let id = *self
            .order
            .get(index)
            .ok_or_else(|| self.out_of_bounds(index))?;
        self.debug_items[item.0].location = Some(id);
        self.slots[id.0].debug_items.push(item);
        self.touch();
        Ok(())
    }

    /// Make a new debug item attached at `index`
    pub fn add_debug_item(&mut self, index: usize, item: DebugItem) -> Result<DebugItemId, Error> {
        if index > self.len() {
            return Err(self.out_of_bounds(index));
        }
        let id = self.new_debug_item(item);
        self.attach_debug_item(id, index)?;
        Ok(id)
    }

    /// Detach a debug item from its location (it can be attached again afterwards)
    pub fn detach_debug_item(&mut self, item: DebugItemId) -> Result<(), Error> {
        let attached = self
            .debug_items
            .get_mut(item.0)
            .ok_or(Error::UnknownDebugItem(item))?
            .location
            .take();
        if let Some(id) = attached {
            self.slots[id.0].debug_items.retain(|other| *other != item);
            self.touch();
        }
        Ok(())
    }

    pub fn debug_item(&self, item: DebugItemId) -> Option<&DebugItem> {
        self.debug_items.get(item.0).map(|slot| &slot.item)
    }

    /// Register an exception handler for the instructions from `start` up to (excluding) `end`
    ///
    /// `None` as the exception type catches everything.
    pub fn add_catch(
        &mut self,
        exception_type: Option<String>,
        start: Label,
        end: Label,
        handler: Label,
    ) -> Result<(), Error> {
        for label in [start, end, handler] {
            self.check_label(label)?;
        }
        self.try_ranges.push(TryRange {
            start,
            end,
            handler,
            exception_type,
        });
        self.touch();
        Ok(())
    }

    pub(super) fn sentinel(&self) -> LocationId {
        self.order[self.order.len() - 1]
    }

    /// Location of an actual instruction (not the sentinel)
    fn instruction_location(&self, index: usize) -> Result<LocationId, Error> {
        if index >= self.len() {
            return Err(self.out_of_bounds(index));
        }
        Ok(self.order[index])
    }

    /// Location a label is bound to, or an error if it isn't placed
    pub(super) fn placed_location(&self, label: Label) -> Result<LocationId, Error> {
        match self.labels.get(label.0) {
            None => Err(Error::UnknownLabel(label)),
            Some(None) => Err(Error::UnplacedLabel(label)),
            Some(Some(id)) => Ok(*id),
        }
    }

    fn check_label(&self, label: Label) -> Result<(), Error> {
        if label.0 < self.labels.len() {
            Ok(())
        } else {
            Err(Error::UnknownLabel(label))
        }
    }

    fn check_labels(&self, instruction: &Instruction<Label>) -> Result<(), Error> {
        for label in instruction.labels() {
            self.check_label(*label)?;
        }
        Ok(())
    }

    fn new_slot(&mut self, instruction: Option<Instruction<Label>>) -> LocationId {
        self.slots.push(LocationSlot::new(instruction));
        LocationId(self.slots.len() - 1)
    }

    /// Recompute indices and addresses of the locations from `start` onwards
    pub(super) fn renumber_from(&mut self, start: usize) {
        let mut address = match start.checked_sub(1) {
            None => 0,
            Some(previous) => {
                let slot = &self.slots[self.order[previous].0];
                slot.address + slot.width()
            }
        };
        for (index, id) in self.order.iter().enumerate().skip(start) {
            let slot = &mut self.slots[id.0];
            slot.index = index;
            slot.address = address;
            address += slot.width();
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.modification_count += 1;
    }

    fn out_of_bounds(&self, index: usize) -> Error {
        Error::IndexOutOfBounds {
            index,
            len: self.len(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::code::ValueKind;

    fn const4(value: i8) -> Instruction<Label> {
        Instruction::Const4 { dest: 0, value }
    }

    fn addresses(stream: &MutableInstructionStream) -> Vec<u32> {
        (0..=stream.len())
            .map(|index| stream.location(index).unwrap().address())
            .collect()
    }

    #[test]
    fn insert_between() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();
        stream
            .add_instruction(Instruction::Const { dest: 0, value: 2 })
            .unwrap();
        assert_eq!(addresses(&stream), vec![0, 1, 4]);

        stream
            .insert_instruction(1, Instruction::Const16 { dest: 0, value: 3 })
            .unwrap();
        assert_eq!(stream.instruction(0), Some(&const4(1)));
        assert_eq!(
            stream.instruction(1),
            Some(&Instruction::Const16 { dest: 0, value: 3 })
        );
        assert_eq!(
            stream.instruction(2),
            Some(&Instruction::Const { dest: 0, value: 2 })
        );
        assert_eq!(addresses(&stream), vec![0, 1, 3, 6]);
        assert!(stream.is_dirty());
    }

    #[test]
    fn bounds() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();

        assert!(matches!(
            stream.insert_instruction(2, const4(2)),
            Err(Error::IndexOutOfBounds { index: 2, len: 1 })
        ));
        assert!(matches!(
            stream.replace_instruction(1, const4(2)),
            Err(Error::IndexOutOfBounds { index: 1, len: 1 })
        ));
        assert!(matches!(
            stream.remove_instruction(1),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            stream.swap_instructions(0, 1),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert_eq!(stream.len(), 1);

        // Inserting at the sentinel appends
        stream.insert_instruction(1, const4(2)).unwrap();
        assert_eq!(stream.instruction(1), Some(&const4(2)));
    }

    #[test]
    fn replace_shifts_addresses() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();
        stream.add_instruction(const4(2)).unwrap();
        let old = stream
            .replace_instruction(0, Instruction::Const { dest: 0, value: 1 })
            .unwrap();
        assert_eq!(old, const4(1));
        assert_eq!(addresses(&stream), vec![0, 3, 4]);
    }

    #[test]
    fn remove_merges_labels_and_debug_items() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();
        stream.add_instruction(const4(2)).unwrap();
        stream.add_instruction(const4(3)).unwrap();

        let removed_label = stream.add_new_label(1).unwrap();
        let next_label = stream.add_new_label(2).unwrap();
        stream.add_debug_item(2, DebugItem::LineNumber(20)).unwrap();
        stream.add_debug_item(1, DebugItem::LineNumber(10)).unwrap();
        stream.add_debug_item(1, DebugItem::PrologueEnd).unwrap();

        assert_eq!(stream.remove_instruction(1).unwrap(), const4(2));
        assert_eq!(stream.len(), 2);

        let location = stream.location(1).unwrap();
        assert_eq!(location.instruction(), Some(&const4(3)));
        assert_eq!(location.labels(), &[next_label, removed_label]);
        assert_eq!(
            location.debug_items().cloned().collect::<Vec<_>>(),
            vec![
                DebugItem::LineNumber(10),
                DebugItem::PrologueEnd,
                DebugItem::LineNumber(20)
            ]
        );
        assert_eq!(stream.label_index(removed_label), Some(1));
        assert_eq!(stream.label_address(removed_label), Some(1));
    }

    #[test]
    fn remove_last_moves_labels_to_sentinel() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();
        let label = stream.add_new_label(0).unwrap();
        stream.remove_instruction(0).unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.label_index(label), Some(0));
        assert_eq!(stream.location(0).unwrap().instruction(), None);
    }

    #[test]
    fn swap_keeps_labels() {
        let mut stream = MutableInstructionStream::new(1);
        stream
            .add_instruction(Instruction::Const { dest: 0, value: 7 })
            .unwrap();
        stream.add_instruction(const4(1)).unwrap();
        stream
            .add_instruction(Instruction::Return {
                kind: ValueKind::Single,
                register: 0,
            })
            .unwrap();
        let first = stream.add_new_label(0).unwrap();

        stream.swap_instructions(2, 0).unwrap();
        assert_eq!(stream.label_index(first), Some(0));
        assert_eq!(
            stream.instruction(0),
            Some(&Instruction::Return {
                kind: ValueKind::Single,
                register: 0
            })
        );
        assert_eq!(addresses(&stream), vec![0, 1, 2, 5]);
    }

    #[test]
    fn label_states() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();

        let label = stream.new_label();
        assert_eq!(stream.label_index(label), None);
        stream.place_label(label, 1).unwrap();
        assert!(matches!(
            stream.place_label(label, 0),
            Err(Error::LabelAlreadyPlaced(l)) if l == label
        ));

        stream.remove_label(label).unwrap();
        assert_eq!(stream.label_index(label), None);
        assert!(stream.location(1).unwrap().labels().is_empty());
        stream.place_label(label, 0).unwrap();
        assert_eq!(stream.label_index(label), Some(0));

        let mut other = MutableInstructionStream::new(1);
        assert!(matches!(
            other.add_instruction(Instruction::Goto(label)),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn debug_item_states() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();

        let item = stream.new_debug_item(DebugItem::EpilogueBegin);
        stream.attach_debug_item(item, 0).unwrap();
        assert!(matches!(
            stream.attach_debug_item(item, 1),
            Err(Error::DebugItemAlreadyAttached(_))
        ));
        stream.detach_debug_item(item).unwrap();
        stream.attach_debug_item(item, 1).unwrap();
        assert_eq!(stream.location(1).unwrap().debug_item_ids(), &[item]);
        assert!(stream.location(0).unwrap().debug_item_ids().is_empty());
    }

    #[test]
    fn cursor_invalidation() {
        let mut stream = MutableInstructionStream::new(1);
        stream.add_instruction(const4(1)).unwrap();
        stream.add_instruction(const4(2)).unwrap();

        let mut cursor = stream.cursor().unwrap();
        let first = cursor.next(&stream).unwrap().unwrap();
        assert_eq!(first.instruction(), Some(&const4(1)));

        stream.add_instruction(const4(3)).unwrap();
        assert!(matches!(cursor.next(&stream), Err(Error::StreamModified)));

        let mut cursor = stream.cursor().unwrap();
        let mut count = 0;
        while let Some(_) = cursor.next(&stream).unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
