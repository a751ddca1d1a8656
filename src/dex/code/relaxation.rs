//! Pick branch encodings and align payloads
//!
//! Edits on a [`MutableInstructionStream`] keep addresses consistent, but they never change which
//! instructions are in the stream. Relaxation is the pass that does, in two phases:
//!
//!   1. **Payload linking**: every `packed-switch` and `sparse-switch` is matched with the payload
//!      its label points at (skipping over `nop`s). A switch that points at nothing, at the wrong
//!      kind of payload, or at a payload another switch already claimed is an error. Payloads
//!      are resolved relative to their switch, so a payload can only have one.
//!
//!   2. **Fixed point**: full passes over the stream, each of which
//!        - widens `goto` to `goto/16` (or straight to `goto/32`) and `goto/16` to `goto/32` when
//!          the offset to the target no longer fits
//!        - removes switch payloads no switch refers to
//!        - moves payloads onto even addresses, by either removing the `nop` right before the
//!          payload or inserting one
//!
//!      Passes continue until one makes no changes.
//!
//! ```text,ignore,no_run
//!     goto L1               goto/16 L1               (offset no longer fits in 8 bits)
//!     packed-switch L2      packed-switch L2
//!     ...             =>    ...
//!                           nop                      (payload was on an odd address)
//! L2: <payload>         L2: <payload>
//! ```
//!
//! ### Termination
//!
//! Widening only ever goes in one direction and at most twice per `goto`, and payloads only ever
//! get removed. The alignment fixes are the only edits that shrink the stream, and a `nop` is only
//! removed when the payload behind it is misaligned, which cannot undo a `goto` widening. Still,
//! passes are capped by [`crate::dex::Settings::relaxation_pass_limit`] and exceeding the cap is
//! reported as [`Error::RelaxationDidNotConverge`].

use super::{offset_fits, Instruction, Label, LocationId, MutableInstructionStream};
use crate::dex::Error;
use std::collections::HashMap;

impl MutableInstructionStream {
    /// Recompute encodings and payload alignment, if anything changed since the last time
    pub fn relax(&mut self) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        self.switch_referrers = link_payloads(self)?;
        let passes = widen_and_align(self)?;
        log::debug!(
            "Relaxed {} instructions in {} passes ({} code units)",
            self.len(),
            passes,
            self.slots[self.sentinel().0].address
        );
        self.dirty = false;
        Ok(())
    }

    /// Location of the payload targeted by a label, skipping over any `nop`s
    pub(super) fn payload_location(&self, label: Label) -> Result<Option<LocationId>, Error> {
        let target = self.placed_location(label)?;
        let start = self.slots[target.0].index;
        Ok(self.order[start..]
            .iter()
            .copied()
            .find(|id| !matches!(&self.slots[id.0].instruction, Some(Instruction::Nop)))
            .filter(|id| self.slots[id.0].instruction.is_some()))
    }
}

/// Match every switch with its payload, returning a map from payload to switch location
fn link_payloads(
    stream: &MutableInstructionStream,
) -> Result<HashMap<LocationId, LocationId>, Error> {
    let mut referrers: HashMap<LocationId, LocationId> = HashMap::new();

    for id in &stream.order {
        let slot = &stream.slots[id.0];
        let (payload, expected) = match &slot.instruction {
            Some(Instruction::PackedSwitch { payload, .. }) => (*payload, "packed-switch-payload"),
            Some(Instruction::SparseSwitch { payload, .. }) => (*payload, "sparse-switch-payload"),
            Some(Instruction::FillArrayData { payload, .. }) => (*payload, "array-payload"),
            _ => continue,
        };

        let payload_id = stream
            .payload_location(payload)?
            .ok_or(Error::DanglingSwitch {
                address: slot.address,
            })?;
        let found = match &stream.slots[payload_id.0].instruction {
            Some(instruction) => instruction.mnemonic(),
            None => {
                return Err(Error::DanglingSwitch {
                    address: slot.address,
                })
            }
        };
        if found != expected {
            return Err(Error::WrongPayloadKind {
                address: slot.address,
                expected,
                found,
            });
        }

        // Array payloads are resolved relative to each `fill-array-data`, so they can be shared
        if expected != "array-payload" && referrers.insert(payload_id, *id).is_some() {
            return Err(Error::SharedSwitchPayload {
                address: slot.address,
            });
        }
    }

    Ok(referrers)
}

/// Fix-up needed at one location
enum Fixup {
    Widen(Instruction<Label>),
    RemoveDeadPayload,
    Align,
}

/// Run passes until nothing changes, returning the number of passes
fn widen_and_align(stream: &mut MutableInstructionStream) -> Result<usize, Error> {
    let mut passes = 0;
    loop {
        passes += 1;
        if passes > stream.relaxation_pass_limit {
            return Err(Error::RelaxationDidNotConverge {
                passes: stream.relaxation_pass_limit,
            });
        }

        let mut changed = false;
        let mut index = 0;
        while index < stream.len() {
            let id = stream.order[index];
            let fixup = match next_fixup(stream, id)? {
                None => {
                    index += 1;
                    continue;
                }
                Some(fixup) => fixup,
            };
            changed = true;

            match fixup {
                Fixup::Widen(wider) => {
                    log::trace!(
                        "Widening to {} at address {}",
                        wider.mnemonic(),
                        stream.slots[id.0].address
                    );
                    stream.replace_instruction(index, wider)?;
                    index += 1;
                }
                Fixup::RemoveDeadPayload => {
                    log::trace!(
                        "Removing unreferenced switch payload at address {}",
                        stream.slots[id.0].address
                    );
                    stream.remove_instruction(index)?;
                }
                Fixup::Align => {
                    let previous_is_nop = index
                        .checked_sub(1)
                        .and_then(|previous| stream.instruction(previous))
                        .map_or(false, Instruction::is_nop);
                    if previous_is_nop {
                        log::trace!("Removing alignment nop before payload at index {}", index);
                        stream.remove_instruction(index - 1)?;
                    } else {
                        log::trace!("Inserting alignment nop before payload at index {}", index);
                        stream.insert_instruction(index, Instruction::Nop)?;
                        index += 1;
                    }
                    index += 1;
                }
            }
        }

        if !changed {
            return Ok(passes);
        }
    }
}

/// Decide what (if anything) needs to change about the instruction at a location
fn next_fixup(stream: &MutableInstructionStream, id: LocationId) -> Result<Option<Fixup>, Error> {
    let slot = &stream.slots[id.0];
    let instruction = match &slot.instruction {
        Some(instruction) => instruction,
        None => return Ok(None),
    };

    let fixup = match instruction {
        Instruction::Goto(target) | Instruction::Goto16(target) => {
            let target_address = stream.slots[stream.placed_location(*target)?.0].address;
            let offset = target_address as i64 - slot.address as i64;
            let bits = if matches!(instruction, Instruction::Goto(_)) {
                8
            } else {
                16
            };
            if offset_fits(offset, bits) {
                None
            } else if bits == 8 && offset_fits(offset, 16) {
                Some(Fixup::Widen(Instruction::Goto16(*target)))
            } else {
                Some(Fixup::Widen(Instruction::Goto32(*target)))
            }
        }
        payload if payload.is_switch_payload() && !stream.switch_referrers.contains_key(&id) => {
            Some(Fixup::RemoveDeadPayload)
        }
        payload if payload.requires_alignment() && slot.address % 2 != 0 => Some(Fixup::Align),
        _ => None,
    };
    Ok(fixup)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::code::ValueKind;
    use crate::dex::Settings;

    fn move_() -> Instruction<Label> {
        Instruction::Move {
            kind: ValueKind::Single,
            dest: 0,
            source: 1,
        }
    }

    /// Stream of `count` one-unit instructions
    fn filler(stream: &mut MutableInstructionStream, count: usize) {
        for _ in 0..count {
            stream.add_instruction(move_()).unwrap();
        }
    }

    fn mnemonics(stream: &MutableInstructionStream) -> Vec<&'static str> {
        (0..stream.len())
            .map(|index| stream.instruction(index).unwrap().mnemonic())
            .collect()
    }

    #[test]
    fn short_goto_stays_short() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 126);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();

        stream.relax().unwrap();
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto(target)));
        assert_eq!(stream.label_address(target), Some(127));
    }

    #[test]
    fn goto_widened_to_16_bits() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 129);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();

        stream.relax().unwrap();
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto16(target)));
        assert_eq!(stream.label_address(target), Some(131));
    }

    #[test]
    fn backward_goto_boundaries() {
        // -128 fits in 8 bits, -129 doesn't
        for (filler_count, expected) in [(128, "goto"), (129, "goto/16")] {
            let mut stream = MutableInstructionStream::new(2);
            let target = stream.add_new_label(0).unwrap();
            filler(&mut stream, filler_count);
            stream.add_instruction(Instruction::Goto(target)).unwrap();
            stream.relax().unwrap();
            assert_eq!(stream.instruction(filler_count).unwrap().mnemonic(), expected);
        }
    }

    #[test]
    fn goto_widened_to_32_bits() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 33000);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();

        stream.relax().unwrap();
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto32(target)));
        assert_eq!(stream.label_address(target), Some(33003));
    }

    #[test]
    fn widening_cascades() {
        // The backward goto is exactly in range until the forward goto before it is widened
        let mut stream = MutableInstructionStream::new(2);
        let start = stream.add_new_label(0).unwrap();
        let end = stream.new_label();
        filler(&mut stream, 1);
        stream.add_instruction(Instruction::Goto(end)).unwrap();
        filler(&mut stream, 126);
        stream.add_instruction(Instruction::Goto(start)).unwrap();
        filler(&mut stream, 200);
        stream.place_label(end, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        assert_eq!(stream.location(128).unwrap().address(), 128);

        stream.relax().unwrap();
        assert_eq!(stream.instruction(1).unwrap().mnemonic(), "goto/16");
        assert_eq!(stream.instruction(128).unwrap().mnemonic(), "goto/16");
        assert_eq!(stream.location(128).unwrap().address(), 129);
    }

    #[test]
    fn goto16_widened_to_32_bits() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto16(target)).unwrap();
        filler(&mut stream, 40000);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();

        stream.relax().unwrap();
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto32(target)));
    }

    #[test]
    fn edits_trigger_widening() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 126);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.relax().unwrap();
        assert!(!stream.is_dirty());
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto(target)));

        stream.insert_instruction(1, move_()).unwrap();
        assert!(stream.is_dirty());
        stream.relax().unwrap();
        assert_eq!(stream.instruction(0), Some(&Instruction::Goto16(target)));
    }

    #[test]
    fn relaxation_is_idempotent() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 200);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.relax().unwrap();

        let before = mnemonics(&stream);
        let modifications = stream.modification_count;
        stream.dirty = true;
        stream.relax().unwrap();
        assert_eq!(mnemonics(&stream), before);
        assert_eq!(stream.modification_count, modifications);
    }

    #[test]
    fn dead_payload_removed() {
        let mut stream = MutableInstructionStream::new(2);
        let target = stream.new_label();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.add_instruction(Instruction::Nop).unwrap();
        stream
            .add_instruction(Instruction::PackedSwitchPayload {
                first_key: 0,
                targets: vec![target],
            })
            .unwrap();
        stream.place_label(target, 0).unwrap();

        stream.relax().unwrap();
        assert_eq!(mnemonics(&stream), vec!["return-void", "nop"]);
    }

    #[test]
    fn switch_errors() {
        // Switch pointing at the end of the method
        let mut stream = MutableInstructionStream::new(2);
        let payload = stream.new_label();
        stream
            .add_instruction(Instruction::PackedSwitch {
                register: 0,
                payload,
            })
            .unwrap();
        stream.place_label(payload, 1).unwrap();
        assert!(matches!(
            stream.relax(),
            Err(Error::DanglingSwitch { address: 0 })
        ));

        // Switch pointing at the wrong payload kind
        let mut stream = MutableInstructionStream::new(2);
        let payload = stream.new_label();
        stream
            .add_instruction(Instruction::SparseSwitch {
                register: 0,
                payload,
            })
            .unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.place_label(payload, stream.len()).unwrap();
        stream
            .add_instruction(Instruction::PackedSwitchPayload {
                first_key: 0,
                targets: vec![],
            })
            .unwrap();
        assert!(matches!(
            stream.relax(),
            Err(Error::WrongPayloadKind {
                expected: "sparse-switch-payload",
                found: "packed-switch-payload",
                ..
            })
        ));

        // Two switches sharing one payload
        let mut stream = MutableInstructionStream::new(2);
        let payload = stream.new_label();
        for _ in 0..2 {
            stream
                .add_instruction(Instruction::PackedSwitch {
                    register: 0,
                    payload,
                })
                .unwrap();
        }
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.place_label(payload, stream.len()).unwrap();
        stream
            .add_instruction(Instruction::PackedSwitchPayload {
                first_key: 0,
                targets: vec![],
            })
            .unwrap();
        assert!(matches!(
            stream.relax(),
            Err(Error::SharedSwitchPayload { address: 3 })
        ));
    }

    #[test]
    fn switch_skips_nops_before_payload() {
        let mut stream = MutableInstructionStream::new(2);
        let payload = stream.new_label();
        let case = stream.new_label();
        stream
            .add_instruction(Instruction::PackedSwitch {
                register: 0,
                payload,
            })
            .unwrap();
        stream.place_label(case, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();
        stream.place_label(payload, stream.len()).unwrap();
        stream.add_instruction(Instruction::Nop).unwrap();
        stream.add_instruction(Instruction::Nop).unwrap();
        stream
            .add_instruction(Instruction::PackedSwitchPayload {
                first_key: 0,
                targets: vec![case],
            })
            .unwrap();

        stream.relax().unwrap();
        assert_eq!(
            mnemonics(&stream),
            vec!["packed-switch", "return-void", "nop", "nop", "packed-switch-payload"]
        );
        let payload_address = stream.location(4).unwrap().address();
        assert_eq!(payload_address % 2, 0);
    }

    #[test]
    fn pass_limit() {
        let settings = Settings {
            relaxation_pass_limit: 1,
            ..Settings::default()
        };
        let mut stream = MutableInstructionStream::with_settings(2, &settings);
        let target = stream.new_label();
        stream.add_instruction(Instruction::Goto(target)).unwrap();
        filler(&mut stream, 200);
        stream.place_label(target, stream.len()).unwrap();
        stream.add_instruction(Instruction::ReturnVoid).unwrap();

        // The first pass widens, so a second pass is needed to see that nothing changes
        assert!(matches!(
            stream.relax(),
            Err(Error::RelaxationDidNotConverge { passes: 1 })
        ));
    }
}
