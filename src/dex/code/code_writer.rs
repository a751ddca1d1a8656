use super::{Instruction, ResolvedInstruction};
use crate::dex::{
    CallSiteRef, Error, FieldRef, MethodHandleRef, MethodProto, MethodRef, Reference, Serialize,
};
use byteorder::WriteBytesExt;

/// Source of final pool indices for the entities instructions refer to
///
/// [`crate::dex::pool::DexPool`] implements this once its sections have been laid out.
pub trait ReferenceIndexer {
    fn string_index(&self, string: &str) -> Result<u32, Error>;
    fn type_index(&self, descriptor: &str) -> Result<u32, Error>;
    fn proto_index(&self, proto: &MethodProto) -> Result<u32, Error>;
    fn field_index(&self, field: &FieldRef) -> Result<u32, Error>;
    fn method_index(&self, method: &MethodRef) -> Result<u32, Error>;
    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, Error>;
    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, Error>;

    fn reference_index(&self, reference: Reference<'_>) -> Result<u32, Error> {
        match reference {
            Reference::String(string) => self.string_index(string),
            Reference::Type(descriptor) => self.type_index(descriptor),
            Reference::Proto(proto) => self.proto_index(proto),
            Reference::Field(field) => self.field_index(field),
            Reference::Method(method) => self.method_index(method),
            Reference::CallSite(call_site) => self.call_site_index(call_site),
            Reference::MethodHandle(handle) => self.method_handle_index(handle),
        }
    }
}

/// Encode resolved instructions as little-endian code units (the `insns` of a `code_item`)
pub fn write_code_units<W: WriteBytesExt>(
    writer: &mut W,
    instructions: &[ResolvedInstruction],
    indexer: &impl ReferenceIndexer,
) -> Result<(), Error> {
    for resolved in instructions {
        for unit in encode(resolved, indexer)? {
            unit.serialize(writer)?;
        }
    }
    Ok(())
}

fn encode(
    resolved: &ResolvedInstruction,
    indexer: &impl ReferenceIndexer,
) -> Result<Vec<u16>, Error> {
    use Instruction::*;

    let instruction = &resolved.instruction;
    let name = instruction.mnemonic();
    let op = instruction.opcode();
    let wide_reference_index = || -> Result<u32, Error> {
        match instruction.reference() {
            Some(reference) => indexer.reference_index(reference),
            None => Ok(0),
        }
    };
    let reference_index = || -> Result<u16, Error> {
        let index = wide_reference_index()?;
        u16::try_from(index).map_err(|_| Error::IndexTooLarge {
            instruction: name,
            index,
        })
    };
    let offset16 = |offset: i32| -> Result<u16, Error> {
        i16::try_from(offset)
            .map(|offset| offset as u16)
            .map_err(|_| Error::BranchOutOfRange {
                address: resolved.address,
                instruction: name,
                offset: offset as i64,
            })
    };

    let units = match instruction {
        Nop | ReturnVoid => vec![op],
        Move { dest, source, .. } => vec![op | nibble(name, *dest)? << 8 | nibble(name, *source)? << 12],
        MoveResult { dest: register, .. } | Return { register, .. } | Throw { register } => {
            vec![op | (*register as u16) << 8]
        }
        Const4 { dest, value } => {
            if !(-8..=7).contains(value) {
                return Err(Error::LiteralOutOfRange {
                    instruction: name,
                    value: *value as i64,
                });
            }
            vec![op | nibble(name, *dest)? << 8 | (*value as u16 & 0xf) << 12]
        }
        Const16 { dest, value } => vec![op | (*dest as u16) << 8, *value as u16],
        Const { dest, value } => vec![
            op | (*dest as u16) << 8,
            *value as u16,
            (*value >> 16) as u16,
        ],
        ConstString { dest: register, .. }
        | ConstClass { dest: register, .. }
        | ConstMethodHandle { dest: register, .. }
        | ConstMethodType { dest: register, .. }
        | NewInstance { dest: register, .. }
        | CheckCast { register, .. }
        | StaticField { register, .. } => vec![op | (*register as u16) << 8, reference_index()?],
        ConstStringJumbo { dest, .. } => {
            let index = wide_reference_index()?;
            vec![op | (*dest as u16) << 8, index as u16, (index >> 16) as u16]
        }
        NewArray {
            dest: first,
            size: second,
            ..
        }
        | InstanceOf {
            dest: first,
            object: second,
            ..
        }
        | InstanceField {
            register: first,
            object: second,
            ..
        } => vec![
            op | nibble(name, *first)? << 8 | nibble(name, *second)? << 12,
            reference_index()?,
        ],
        Invoke { arguments, .. }
        | InvokeCustom { arguments, .. }
        | FilledNewArray { arguments, .. } => {
            if arguments.len() > 5 {
                return Err(Error::TooManyArguments {
                    instruction: name,
                    count: arguments.len(),
                });
            }
            let mut registers = [0u16; 5];
            for (slot, register) in registers.iter_mut().zip(arguments) {
                *slot = nibble(name, *register)?;
            }
            let [c, d, e, f, g] = registers;
            vec![
                op | (arguments.len() as u16) << 12 | g << 8,
                reference_index()?,
                c | d << 4 | e << 8 | f << 12,
            ]
        }
        InvokeRange {
            first_register,
            register_count,
            ..
        }
        | InvokeCustomRange {
            first_register,
            register_count,
            ..
        }
        | FilledNewArrayRange {
            first_register,
            register_count,
            ..
        } => {
            if *first_register as u32 + *register_count as u32 > u16::MAX as u32 + 1 {
                return Err(Error::InvalidRegisterRange {
                    instruction: name,
                    first_register: *first_register,
                    register_count: *register_count,
                });
            }
            vec![
                op | (*register_count as u16) << 8,
                reference_index()?,
                *first_register,
            ]
        }
        Goto(offset) => {
            let offset = i8::try_from(*offset).map_err(|_| Error::BranchOutOfRange {
                address: resolved.address,
                instruction: name,
                offset: *offset as i64,
            })?;
            vec![op | (offset as u8 as u16) << 8]
        }
        Goto16(offset) => vec![op, offset16(*offset)?],
        Goto32(offset) => vec![op, *offset as u16, (*offset >> 16) as u16],
        If {
            first,
            second,
            target,
            ..
        } => vec![
            op | nibble(name, *first)? << 8 | nibble(name, *second)? << 12,
            offset16(*target)?,
        ],
        IfZero {
            register, target, ..
        } => vec![op | (*register as u16) << 8, offset16(*target)?],
        PackedSwitch { register, payload }
        | SparseSwitch { register, payload }
        | FillArrayData { register, payload } => vec![
            op | (*register as u16) << 8,
            *payload as u16,
            (*payload >> 16) as u16,
        ],
        PackedSwitchPayload { first_key, targets } => {
            let mut units = vec![op, table_size(name, targets.len())?];
            push_i32(&mut units, *first_key);
            for target in targets {
                push_i32(&mut units, *target);
            }
            units
        }
        SparseSwitchPayload { entries } => {
            let mut units = vec![op, table_size(name, entries.len())?];
            for (key, _) in entries {
                push_i32(&mut units, *key);
            }
            for (_, target) in entries {
                push_i32(&mut units, *target);
            }
            units
        }
        ArrayPayload {
            element_width,
            elements,
        } => {
            if ![1, 2, 4, 8].contains(element_width) {
                return Err(Error::InvalidArrayPayload {
                    element_width: *element_width,
                });
            }
            let mut units = vec![op, *element_width];
            push_i32(&mut units, elements.len() as i32);

            let width = *element_width as usize;
            let mut bytes: Vec<u8> = elements
                .iter()
                .flat_map(|element| element.to_le_bytes()[..width].to_vec())
                .collect();
            if bytes.len() % 2 != 0 {
                bytes.push(0);
            }
            units.extend(
                bytes
                    .chunks(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
            );
            units
        }
    };
    Ok(units)
}

/// Register that has to fit in 4 bits
fn nibble(instruction: &'static str, register: u8) -> Result<u16, Error> {
    if register < 16 {
        Ok(register as u16)
    } else {
        Err(Error::InvalidRegister {
            instruction,
            register,
        })
    }
}

fn table_size(instruction: &'static str, size: usize) -> Result<u16, Error> {
    u16::try_from(size).map_err(|_| Error::LiteralOutOfRange {
        instruction,
        value: size as i64,
    })
}

fn push_i32(units: &mut Vec<u16>, value: i32) {
    units.push(value as u16);
    units.push((value >> 16) as u16);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::code::{FieldOp, InvokeKind};

    /// Indexer that hands out the length of the name as an index
    struct LengthIndexer;

    impl ReferenceIndexer for LengthIndexer {
        fn string_index(&self, string: &str) -> Result<u32, Error> {
            Ok(string.len() as u32)
        }
        fn type_index(&self, descriptor: &str) -> Result<u32, Error> {
            Ok(descriptor.len() as u32)
        }
        fn proto_index(&self, proto: &MethodProto) -> Result<u32, Error> {
            Ok(proto.parameters.len() as u32)
        }
        fn field_index(&self, field: &FieldRef) -> Result<u32, Error> {
            Ok(field.name.len() as u32)
        }
        fn method_index(&self, method: &MethodRef) -> Result<u32, Error> {
            Ok(method.name.len() as u32)
        }
        fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, Error> {
            Ok(call_site.name.len() as u32)
        }
        fn method_handle_index(&self, _handle: &MethodHandleRef) -> Result<u32, Error> {
            Ok(0x10000)
        }
    }

    fn encode_one(instruction: Instruction<i32>) -> Result<Vec<u16>, Error> {
        encode(
            &ResolvedInstruction {
                address: 0,
                instruction,
            },
            &LengthIndexer,
        )
    }

    #[test]
    fn simple_formats() {
        assert_eq!(encode_one(Instruction::ReturnVoid).unwrap(), vec![0x000e]);
        assert_eq!(
            encode_one(Instruction::Const4 { dest: 3, value: -1 }).unwrap(),
            vec![0xf312]
        );
        assert_eq!(
            encode_one(Instruction::Const {
                dest: 0x10,
                value: 0x12345678
            })
            .unwrap(),
            vec![0x1014, 0x5678, 0x1234]
        );
        assert_eq!(
            encode_one(Instruction::ConstString {
                dest: 1,
                string: String::from("hello")
            })
            .unwrap(),
            vec![0x011a, 0x0005]
        );
        assert_eq!(
            encode_one(Instruction::InstanceField {
                op: FieldOp::Get,
                register: 2,
                object: 3,
                field: FieldRef::new("LFoo;", "x", "I"),
            })
            .unwrap(),
            vec![0x3252, 0x0001]
        );
    }

    #[test]
    fn invoke() {
        let method = MethodRef::new(
            "LFoo;",
            "sixteen_chars_xx",
            crate::dex::MethodProto::new("V", vec![]),
        );
        assert_eq!(
            encode_one(Instruction::Invoke {
                kind: InvokeKind::Static,
                arguments: vec![0, 1],
                method: method.clone(),
            })
            .unwrap(),
            vec![0x2071, 0x0010, 0x0010]
        );
        assert_eq!(
            encode_one(Instruction::Invoke {
                kind: InvokeKind::Virtual,
                arguments: vec![1, 2, 3, 4, 5],
                method: method.clone(),
            })
            .unwrap(),
            vec![0x556e, 0x0010, 0x4321]
        );
        assert!(matches!(
            encode_one(Instruction::Invoke {
                kind: InvokeKind::Static,
                arguments: vec![0; 6],
                method: method.clone(),
            }),
            Err(Error::TooManyArguments { count: 6, .. })
        ));

        // Six arguments starting at v300
        assert_eq!(
            encode_one(Instruction::InvokeRange {
                kind: InvokeKind::Direct,
                first_register: 300,
                register_count: 6,
                method: method.clone(),
            })
            .unwrap(),
            vec![0x0676, 0x0010, 300]
        );
        assert!(matches!(
            encode_one(Instruction::InvokeRange {
                kind: InvokeKind::Static,
                first_register: u16::MAX,
                register_count: 2,
                method,
            }),
            Err(Error::InvalidRegisterRange { register_count: 2, .. })
        ));
        assert_eq!(
            encode_one(Instruction::InvokeCustomRange {
                first_register: 1,
                register_count: 0,
                call_site: CallSiteRef {
                    name: String::from("cs"),
                    bootstrap: MethodHandleRef {
                        kind: crate::dex::MethodHandleKind::InvokeStatic,
                        member: crate::dex::MethodHandleMember::Method(MethodRef::new(
                            "LBoot;",
                            "bootstrap",
                            MethodProto::new("Ljava/lang/invoke/CallSite;", vec![]),
                        )),
                    },
                    method_name: String::from("run"),
                    method_proto: MethodProto::new("V", vec![]),
                    extra_arguments: vec![],
                },
            })
            .unwrap(),
            vec![0x00fd, 0x0002, 0x0001]
        );
    }

    #[test]
    fn arrays_and_types() {
        assert_eq!(
            encode_one(Instruction::FilledNewArray {
                arguments: vec![4, 5, 6],
                array_type: String::from("[I"),
            })
            .unwrap(),
            vec![0x3024, 0x0002, 0x0654]
        );
        assert_eq!(
            encode_one(Instruction::FilledNewArrayRange {
                first_register: 16,
                register_count: 20,
                array_type: String::from("[LFoo;"),
            })
            .unwrap(),
            vec![0x1425, 0x0006, 0x0010]
        );
        assert_eq!(
            encode_one(Instruction::InstanceOf {
                dest: 1,
                object: 2,
                class: String::from("LFoo;"),
            })
            .unwrap(),
            vec![0x2120, 0x0005]
        );
        assert!(matches!(
            encode_one(Instruction::InstanceOf {
                dest: 16,
                object: 2,
                class: String::from("LFoo;"),
            }),
            Err(Error::InvalidRegister { register: 16, .. })
        ));
    }

    #[test]
    fn jumbo_string_index() {
        let string = "x".repeat(0x12345);
        assert!(matches!(
            encode_one(Instruction::ConstString {
                dest: 0,
                string: string.clone(),
            }),
            Err(Error::IndexTooLarge { index: 0x12345, .. })
        ));
        assert_eq!(
            encode_one(Instruction::ConstStringJumbo { dest: 0xab, string }).unwrap(),
            vec![0xab1b, 0x2345, 0x0001]
        );
    }

    #[test]
    fn branches() {
        assert_eq!(encode_one(Instruction::Goto(-2)).unwrap(), vec![0xfe28]);
        assert_eq!(encode_one(Instruction::Goto16(300)).unwrap(), vec![0x0029, 300]);
        assert_eq!(
            encode_one(Instruction::Goto32(-70000)).unwrap(),
            vec![0x002a, 0xee90, 0xfffe]
        );
        assert!(matches!(
            encode_one(Instruction::Goto(200)),
            Err(Error::BranchOutOfRange { offset: 200, .. })
        ));
    }

    #[test]
    fn payloads() {
        assert_eq!(
            encode_one(Instruction::PackedSwitchPayload {
                first_key: 1,
                targets: vec![4, -3],
            })
            .unwrap(),
            vec![0x0100, 2, 1, 0, 4, 0, 0xfffd, 0xffff]
        );
        assert_eq!(
            encode_one(Instruction::SparseSwitchPayload {
                entries: vec![(-1, 6), (10, 8)],
            })
            .unwrap(),
            vec![0x0200, 2, 0xffff, 0xffff, 10, 0, 6, 0, 8, 0]
        );
        assert_eq!(
            encode_one(Instruction::ArrayPayload {
                element_width: 1,
                elements: vec![1, 2, 3],
            })
            .unwrap(),
            vec![0x0300, 1, 3, 0, 0x0201, 0x0003]
        );
    }

    #[test]
    fn operand_limits() {
        assert!(matches!(
            encode_one(Instruction::Const4 { dest: 0, value: 8 }),
            Err(Error::LiteralOutOfRange { value: 8, .. })
        ));
        assert!(matches!(
            encode_one(Instruction::Move {
                kind: crate::dex::code::ValueKind::Object,
                dest: 16,
                source: 0,
            }),
            Err(Error::InvalidRegister { register: 16, .. })
        ));

        let handle = MethodHandleRef {
            kind: crate::dex::MethodHandleKind::InvokeStatic,
            member: crate::dex::MethodHandleMember::Method(MethodRef::new(
                "LFoo;",
                "f",
                MethodProto::new("V", vec![]),
            )),
        };
        assert!(matches!(
            encode_one(Instruction::ConstMethodHandle { dest: 0, handle }),
            Err(Error::IndexTooLarge { index: 0x10000, .. })
        ));
    }
}
