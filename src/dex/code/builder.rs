use super::{DebugItem, Instruction, Label, MethodImplementation, MutableInstructionStream};
use crate::dex::{Error, Settings};
use std::collections::HashMap;

/// Builds a method body from top to bottom, with labels referred to by name
///
/// Labels and debug items are attached at the current position, which is always the end of the
/// stream: they end up on whichever instruction gets added next.
///
/// ```
/// use dexbuild::dex::code::{IfTest, Instruction, InstructionStreamBuilder, ValueKind};
///
/// # fn main() -> Result<(), dexbuild::dex::Error> {
/// let mut builder = InstructionStreamBuilder::new(1);
/// let done = builder.label("done");
/// builder.add_line_number(10)?;
/// builder.add_instruction(Instruction::IfZero { test: IfTest::Eq, register: 0, target: done })?;
/// builder.add_instruction(Instruction::Const4 { dest: 0, value: 1 })?;
/// builder.add_label("done")?;
/// builder.add_instruction(Instruction::Return { kind: ValueKind::Single, register: 0 })?;
///
/// let implementation = builder.finish()?;
/// assert_eq!(implementation.instructions[0].instruction.labels(), vec![&3]);
/// # Ok(())
/// # }
/// ```
pub struct InstructionStreamBuilder {
    stream: MutableInstructionStream,
    labels: HashMap<String, Label>,
}

impl InstructionStreamBuilder {
    pub fn new(register_count: u16) -> InstructionStreamBuilder {
        InstructionStreamBuilder::with_settings(register_count, &Settings::default())
    }

    pub fn with_settings(register_count: u16, settings: &Settings) -> InstructionStreamBuilder {
        InstructionStreamBuilder {
            stream: MutableInstructionStream::with_settings(register_count, settings),
            labels: HashMap::new(),
        }
    }

    /// Place a named label at the current position
    ///
    /// If the name was already handed out by [`Self::label`] but not placed yet, that label gets
    /// placed. Placing the same name twice is an error.
    pub fn add_label(&mut self, name: &str) -> Result<Label, Error> {
        let current = self.current_index();
        match self.labels.get(name) {
            Some(label) if self.stream.label_location(*label).is_some() => {
                Err(Error::DuplicateLabelName(name.to_owned()))
            }
            Some(label) => {
                let label = *label;
                self.stream.place_label(label, current)?;
                Ok(label)
            }
            None => {
                let label = self.stream.add_new_label(current)?;
                self.labels.insert(name.to_owned(), label);
                Ok(label)
            }
        }
    }

    /// Label with the given name, creating an unplaced one if needed
    pub fn label(&mut self, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return *label;
        }
        let label = self.stream.new_label();
        self.labels.insert(name.to_owned(), label);
        label
    }

    /// Place a fresh anonymous label at the current position
    pub fn add_anonymous_label(&mut self) -> Result<Label, Error> {
        let current = self.current_index();
        self.stream.add_new_label(current)
    }

    pub fn add_instruction(&mut self, instruction: Instruction<Label>) -> Result<(), Error> {
        self.stream.add_instruction(instruction)
    }

    pub fn add_catch(
        &mut self,
        exception_type: Option<String>,
        start: Label,
        end: Label,
        handler: Label,
    ) -> Result<(), Error> {
        self.stream.add_catch(exception_type, start, end, handler)
    }

    pub fn add_line_number(&mut self, line: u32) -> Result<(), Error> {
        self.add_debug_item(DebugItem::LineNumber(line))
    }

    pub fn add_start_local(
        &mut self,
        register: u16,
        name: Option<String>,
        local_type: Option<String>,
        signature: Option<String>,
    ) -> Result<(), Error> {
        self.add_debug_item(DebugItem::StartLocal {
            register,
            name,
            local_type,
            signature,
        })
    }

    pub fn add_end_local(&mut self, register: u16) -> Result<(), Error> {
        self.add_debug_item(DebugItem::EndLocal { register })
    }

    pub fn add_restart_local(&mut self, register: u16) -> Result<(), Error> {
        self.add_debug_item(DebugItem::RestartLocal { register })
    }

    pub fn add_prologue(&mut self) -> Result<(), Error> {
        self.add_debug_item(DebugItem::PrologueEnd)
    }

    pub fn add_epilogue(&mut self) -> Result<(), Error> {
        self.add_debug_item(DebugItem::EpilogueBegin)
    }

    pub fn add_set_source_file(&mut self, source_file: Option<String>) -> Result<(), Error> {
        self.add_debug_item(DebugItem::SetSourceFile(source_file))
    }

    fn add_debug_item(&mut self, item: DebugItem) -> Result<(), Error> {
        let current = self.current_index();
        self.stream.add_debug_item(current, item)?;
        Ok(())
    }

    fn current_index(&self) -> usize {
        self.stream.len()
    }

    pub fn stream(&self) -> &MutableInstructionStream {
        &self.stream
    }

    /// Keep editing the method as a stream
    pub fn into_stream(self) -> MutableInstructionStream {
        self.stream
    }

    /// Relax the method and read out the result
    pub fn finish(mut self) -> Result<MethodImplementation, Error> {
        self.stream.to_implementation()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::code::ResolvedDebugItem;

    #[test]
    fn forward_and_backward_labels() {
        let mut builder = InstructionStreamBuilder::new(1);
        let top = builder.add_label("top").unwrap();
        builder
            .add_instruction(Instruction::Const4 { dest: 0, value: 0 })
            .unwrap();
        let bottom = builder.label("bottom");
        builder.add_instruction(Instruction::Goto(bottom)).unwrap();
        builder.add_instruction(Instruction::Goto(top)).unwrap();
        assert_eq!(builder.add_label("bottom").unwrap(), bottom);
        builder.add_instruction(Instruction::ReturnVoid).unwrap();

        let offsets: Vec<Vec<i32>> = builder
            .finish()
            .unwrap()
            .instructions
            .iter()
            .map(|resolved| resolved.instruction.labels().into_iter().copied().collect())
            .collect();
        assert_eq!(offsets, vec![vec![], vec![2], vec![-2], vec![]]);
    }

    #[test]
    fn duplicate_label_names() {
        let mut builder = InstructionStreamBuilder::new(1);
        builder.add_label("l").unwrap();
        builder.add_instruction(Instruction::ReturnVoid).unwrap();
        assert!(matches!(
            builder.add_label("l"),
            Err(Error::DuplicateLabelName(name)) if name == "l"
        ));
    }

    #[test]
    fn unplaced_label() {
        let mut builder = InstructionStreamBuilder::new(1);
        let nowhere = builder.label("nowhere");
        builder.add_instruction(Instruction::Goto(nowhere)).unwrap();
        assert!(matches!(builder.finish(), Err(Error::UnplacedLabel(l)) if l == nowhere));
    }

    #[test]
    fn debug_items_attach_to_next_instruction() {
        let mut builder = InstructionStreamBuilder::new(1);
        builder.add_line_number(1).unwrap();
        builder.add_prologue().unwrap();
        builder
            .add_instruction(Instruction::Const { dest: 0, value: 5 })
            .unwrap();
        builder.add_line_number(2).unwrap();
        builder
            .add_start_local(0, Some(String::from("x")), Some(String::from("I")), None)
            .unwrap();
        builder.add_instruction(Instruction::ReturnVoid).unwrap();
        builder.add_end_local(0).unwrap();

        let implementation = builder.finish().unwrap();
        assert_eq!(
            implementation.debug_items,
            vec![
                ResolvedDebugItem {
                    address: 0,
                    item: DebugItem::LineNumber(1)
                },
                ResolvedDebugItem {
                    address: 0,
                    item: DebugItem::PrologueEnd
                },
                ResolvedDebugItem {
                    address: 3,
                    item: DebugItem::LineNumber(2)
                },
                ResolvedDebugItem {
                    address: 3,
                    item: DebugItem::StartLocal {
                        register: 0,
                        name: Some(String::from("x")),
                        local_type: Some(String::from("I")),
                        signature: None,
                    }
                },
                ResolvedDebugItem {
                    address: 4,
                    item: DebugItem::EndLocal { register: 0 }
                },
            ]
        );
    }
}
