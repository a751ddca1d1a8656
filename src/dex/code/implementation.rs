use super::{
    coalesce_try_ranges, offset_fits, ExceptionHandler, Instruction, Label,
    MutableInstructionStream, ReferenceIndexer, ResolvedDebugItem, TryBlock,
};
use crate::dex::Error;
use crate::util::Width;
use std::collections::{BTreeMap, HashMap};

/// Instruction at its final address, with branch targets resolved to relative offsets
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResolvedInstruction {
    pub address: u32,
    pub instruction: Instruction<i32>,
}

/// Finished method body, ready to be encoded into a `code_item`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodImplementation {
    pub register_count: u16,
    pub instructions: Vec<ResolvedInstruction>,
    pub try_blocks: Vec<TryBlock>,
    pub debug_items: Vec<ResolvedDebugItem>,
}

impl MethodImplementation {
    /// Size of the instructions in code units
    pub fn code_unit_count(&self) -> u32 {
        self.instructions
            .last()
            .map_or(0, |last| last.address + last.instruction.width() as u32)
    }

    /// Use `const-string/jumbo` for every `const-string` whose final string index needs more than
    /// 16 bits
    ///
    /// String indices are only known once the pool is laid out, and the wider instruction moves
    /// everything after it, so the body is rebuilt and relaxed again. A body that needs no jumbo
    /// strings comes back unchanged.
    pub fn with_jumbo_strings(
        &self,
        indexer: &impl ReferenceIndexer,
    ) -> Result<MethodImplementation, Error> {
        let mut promoted = vec![];
        for (index, resolved) in self.instructions.iter().enumerate() {
            if let Instruction::ConstString { string, .. } = &resolved.instruction {
                if indexer.string_index(string)? > u16::MAX as u32 {
                    promoted.push(index);
                }
            }
        }
        if promoted.is_empty() {
            return Ok(self.clone());
        }
        log::debug!("Promoting {} const-string instructions to jumbo", promoted.len());

        let mut stream = MutableInstructionStream::from_implementation(self)?;
        for index in promoted {
            if let Some(Instruction::ConstString { dest, string }) = stream.instruction(index) {
                let jumbo = Instruction::ConstStringJumbo {
                    dest: *dest,
                    string: string.clone(),
                };
                stream.replace_instruction(index, jumbo)?;
            }
        }
        stream.to_implementation()
    }
}

impl MutableInstructionStream {
    /// Final instructions, relaxing the stream first if needed
    pub fn instructions(&mut self) -> Result<Vec<ResolvedInstruction>, Error> {
        self.relax()?;

        let mut resolved = Vec::with_capacity(self.len());
        for id in &self.order[..self.len()] {
            let slot = &self.slots[id.0];
            let instruction = match &slot.instruction {
                Some(instruction) => instruction,
                None => continue,
            };

            // Payload entries are relative to the switch, the rest is relative to the instruction
            let base = match self.switch_referrers.get(id) {
                Some(switch) if instruction.is_switch_payload() => self.slots[switch.0].address,
                _ => slot.address,
            };
            let points_at_payload = matches!(
                instruction,
                Instruction::PackedSwitch { .. }
                    | Instruction::SparseSwitch { .. }
                    | Instruction::FillArrayData { .. }
            );
            let bits = instruction.format().offset_bits().unwrap_or(32);

            let instruction = instruction.try_map_labels(|label| {
                let target = if points_at_payload {
                    self.payload_location(*label)?
                        .ok_or(Error::DanglingSwitch {
                            address: slot.address,
                        })?
                } else {
                    self.placed_location(*label)?
                };
                let offset = self.slots[target.0].address as i64 - base as i64;
                if offset_fits(offset, bits) {
                    Ok(offset as i32)
                } else {
                    Err(Error::BranchOutOfRange {
                        address: slot.address,
                        instruction: instruction.mnemonic(),
                        offset,
                    })
                }
            })?;
            resolved.push(ResolvedInstruction {
                address: slot.address,
                instruction,
            });
        }
        Ok(resolved)
    }

    /// Final try blocks, relaxing the stream first if needed
    pub fn try_blocks(&mut self) -> Result<Vec<TryBlock>, Error> {
        self.relax()?;

        let address_of = |label: Label| -> Result<u32, Error> {
            Ok(self.slots[self.placed_location(label)?.0].address)
        };
        let ranges = self
            .try_ranges
            .iter()
            .map(|range| {
                let handler = ExceptionHandler {
                    exception_type: range.exception_type.clone(),
                    handler_address: address_of(range.handler)?,
                };
                Ok((address_of(range.start)?, address_of(range.end)?, handler))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        coalesce_try_ranges(&ranges)
    }

    /// Final debug items in address order, relaxing the stream first if needed
    pub fn debug_items(&mut self) -> Result<Vec<ResolvedDebugItem>, Error> {
        self.relax()?;

        let mut resolved = vec![];
        for id in &self.order {
            let slot = &self.slots[id.0];
            for item in &slot.debug_items {
                resolved.push(ResolvedDebugItem {
                    address: slot.address,
                    item: self.debug_items[item.0].item.clone(),
                });
            }
        }
        Ok(resolved)
    }

    /// Relax the stream and read out the finished method body
    pub fn to_implementation(&mut self) -> Result<MethodImplementation, Error> {
        Ok(MethodImplementation {
            register_count: self.register_count(),
            instructions: self.instructions()?,
            try_blocks: self.try_blocks()?,
            debug_items: self.debug_items()?,
        })
    }

    /// Rebuild an editable stream from a finished method body
    ///
    /// Every branch offset becomes a label on its target. Debug items and try block boundaries that
    /// don't fall on an instruction boundary are moved back to the instruction containing them.
    pub fn from_implementation(
        implementation: &MethodImplementation,
    ) -> Result<MutableInstructionStream, Error> {
        let mut stream = MutableInstructionStream::new(implementation.register_count);

        // Recompute addresses from the widths, and map them to instruction indices
        let mut index_of_address: BTreeMap<u32, usize> = BTreeMap::new();
        let mut address: u32 = 0;
        for (index, resolved) in implementation.instructions.iter().enumerate() {
            index_of_address.insert(address, index);
            address += resolved.instruction.width() as u32;
        }
        let end_address = address;
        index_of_address.insert(end_address, implementation.instructions.len());

        // Switch payload offsets are relative to the switch pointing at them
        let mut payload_bases: HashMap<u32, u32> = HashMap::new();
        for (address, index) in &index_of_address {
            match implementation.instructions.get(*index).map(|r| &r.instruction) {
                Some(Instruction::PackedSwitch { payload, .. })
                | Some(Instruction::SparseSwitch { payload, .. }) => {
                    payload_bases.insert((*address as i64 + *payload as i64) as u32, *address);
                }
                _ => (),
            }
        }

        let mut labels: HashMap<usize, Label> = HashMap::new();
        for (&address, &index) in &index_of_address {
            let resolved = match implementation.instructions.get(index) {
                Some(resolved) => resolved,
                None => continue,
            };
            let base = match resolved.instruction {
                Instruction::PackedSwitchPayload { .. } | Instruction::SparseSwitchPayload { .. } => {
                    payload_bases.get(&address).copied().unwrap_or(address)
                }
                _ => address,
            };
            let instruction = resolved.instruction.try_map_labels(|offset| {
                let target = base as i64 + *offset as i64;
                let target_index = u32::try_from(target)
                    .ok()
                    .and_then(|target| index_of_address.get(&target))
                    .ok_or(Error::InvalidBranchTarget { address, target })?;
                Ok::<Label, Error>(
                    *labels
                        .entry(*target_index)
                        .or_insert_with(|| stream.new_label()),
                )
            })?;
            stream.add_instruction(instruction)?;
        }

        // Anything else at an address inside an instruction belongs to that instruction
        let containing_index = |address: u32| -> usize {
            index_of_address
                .range(..=address.min(end_address))
                .next_back()
                .map_or(0, |(_, index)| *index)
        };

        for block in &implementation.try_blocks {
            let start = containing_index(block.start_address);
            let end = containing_index(block.end_address());
            for handler in &block.handlers {
                let handler_index = containing_index(handler.handler_address);
                let mut label_at = |index: usize| {
                    *labels
                        .entry(index)
                        .or_insert_with(|| stream.new_label())
                };
                let (start, end, handler_label) =
                    (label_at(start), label_at(end), label_at(handler_index));
                stream.add_catch(handler.exception_type.clone(), start, end, handler_label)?;
            }
        }

        for (index, label) in labels {
            stream.place_label(label, index)?;
        }

        for resolved in &implementation.debug_items {
            let index = containing_index(resolved.address);
            stream.add_debug_item(index, resolved.item.clone())?;
        }

        Ok(stream)
    }
}
