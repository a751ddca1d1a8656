use crate::dex::{CallSiteRef, FieldRef, MethodHandleRef, MethodProto, MethodRef, Reference};
use crate::util::Width;
use std::convert::Infallible;

/// Instruction formats, named after their layout (eg. `21t` is two code units, one register, and
/// a branch target)
///
/// [0]: https://source.android.com/docs/core/runtime/instruction-formats
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Format {
    F10x,
    F10t,
    F11n,
    F11x,
    F12x,
    F20t,
    F21c,
    F21s,
    F21t,
    F22c,
    F22t,
    F30t,
    F31c,
    F31i,
    F31t,
    F35c,
    F3rc,
    PackedSwitchPayload,
    SparseSwitchPayload,
    ArrayPayload,
}

impl Format {
    /// Width in code units, if it doesn't depend on the instruction contents
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Format::F10x | Format::F10t | Format::F11n | Format::F11x | Format::F12x => Some(1),
            Format::F20t | Format::F21c | Format::F21s | Format::F21t | Format::F22c => Some(2),
            Format::F22t => Some(2),
            Format::F30t | Format::F31c | Format::F31i | Format::F31t => Some(3),
            Format::F35c | Format::F3rc => Some(3),
            Format::PackedSwitchPayload | Format::SparseSwitchPayload | Format::ArrayPayload => {
                None
            }
        }
    }

    /// Number of bits available to encode a relative branch offset
    pub fn offset_bits(self) -> Option<u32> {
        match self {
            Format::F10t => Some(8),
            Format::F20t | Format::F21t | Format::F22t => Some(16),
            Format::F30t | Format::F31t => Some(32),
            Format::PackedSwitchPayload | Format::SparseSwitchPayload => Some(32),
            _ => None,
        }
    }
}

/// Whether `offset` can be encoded in a signed field of `bits` bits
pub fn offset_fits(offset: i64, bits: u32) -> bool {
    let limit = 1i64 << (bits - 1);
    -limit <= offset && offset < limit
}

/// Kind of value held in a register, for moves and returns
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Single,
    Wide,
    Object,
}

/// Comparison used by conditional branches
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IfTest {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl IfTest {
    fn ordinal(self) -> u16 {
        match self {
            IfTest::Eq => 0,
            IfTest::Ne => 1,
            IfTest::Lt => 2,
            IfTest::Ge => 3,
            IfTest::Gt => 4,
            IfTest::Le => 5,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldOp {
    Get,
    Put,
}

/// Dalvik instruction, generic over the representation of branch targets
///
/// While a method is being edited, targets are [`super::Label`]s. Once addresses are resolved,
/// they become `i32` offsets in code units. Offsets are relative to the instruction itself, except
/// in switch payloads where they are relative to the switch instruction referring to the payload.
///
/// Registers are all `u8`: formats with 4-bit register fields reject larger values when encoded.
/// The range forms name a run of `register_count` consecutive registers starting at
/// `first_register`, which may be any 16-bit register.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Instruction<L> {
    Nop,
    Move {
        kind: ValueKind,
        dest: u8,
        source: u8,
    },
    MoveResult {
        kind: ValueKind,
        dest: u8,
    },
    ReturnVoid,
    Return {
        kind: ValueKind,
        register: u8,
    },
    Const4 {
        dest: u8,
        value: i8,
    },
    Const16 {
        dest: u8,
        value: i16,
    },
    Const {
        dest: u8,
        value: i32,
    },
    ConstString {
        dest: u8,
        string: String,
    },

    /// `const-string` with a 32-bit string index
    ConstStringJumbo {
        dest: u8,
        string: String,
    },
    ConstClass {
        dest: u8,
        class: String,
    },
    ConstMethodHandle {
        dest: u8,
        handle: MethodHandleRef,
    },
    ConstMethodType {
        dest: u8,
        proto: MethodProto,
    },
    CheckCast {
        register: u8,
        class: String,
    },
    InstanceOf {
        dest: u8,
        object: u8,
        class: String,
    },
    NewInstance {
        dest: u8,
        class: String,
    },
    NewArray {
        dest: u8,
        size: u8,
        array_type: String,
    },
    FilledNewArray {
        arguments: Vec<u8>,
        array_type: String,
    },
    FilledNewArrayRange {
        first_register: u16,
        register_count: u8,
        array_type: String,
    },
    StaticField {
        op: FieldOp,
        register: u8,
        field: FieldRef,
    },
    InstanceField {
        op: FieldOp,
        register: u8,
        object: u8,
        field: FieldRef,
    },
    Invoke {
        kind: InvokeKind,
        arguments: Vec<u8>,
        method: MethodRef,
    },
    InvokeRange {
        kind: InvokeKind,
        first_register: u16,
        register_count: u8,
        method: MethodRef,
    },
    InvokeCustom {
        arguments: Vec<u8>,
        call_site: CallSiteRef,
    },
    InvokeCustomRange {
        first_register: u16,
        register_count: u8,
        call_site: CallSiteRef,
    },
    Throw {
        register: u8,
    },
    Goto(L),
    Goto16(L),
    Goto32(L),
    If {
        test: IfTest,
        first: u8,
        second: u8,
        target: L,
    },
    IfZero {
        test: IfTest,
        register: u8,
        target: L,
    },
    PackedSwitch {
        register: u8,
        payload: L,
    },
    SparseSwitch {
        register: u8,
        payload: L,
    },
    FillArrayData {
        register: u8,
        payload: L,
    },

    /// Jump table for consecutive keys starting at `first_key`
    PackedSwitchPayload {
        first_key: i32,
        targets: Vec<L>,
    },

    /// Jump table for arbitrary keys, sorted by key
    SparseSwitchPayload {
        entries: Vec<(i32, L)>,
    },

    /// Array literal data (each element truncated to `element_width` bytes)
    ArrayPayload {
        element_width: u16,
        elements: Vec<i64>,
    },
}

const INSTANCE_GET: [&str; 7] = [
    "iget",
    "iget-wide",
    "iget-object",
    "iget-boolean",
    "iget-byte",
    "iget-char",
    "iget-short",
];
const INSTANCE_PUT: [&str; 7] = [
    "iput",
    "iput-wide",
    "iput-object",
    "iput-boolean",
    "iput-byte",
    "iput-char",
    "iput-short",
];
const STATIC_GET: [&str; 7] = [
    "sget",
    "sget-wide",
    "sget-object",
    "sget-boolean",
    "sget-byte",
    "sget-char",
    "sget-short",
];
const STATIC_PUT: [&str; 7] = [
    "sput",
    "sput-wide",
    "sput-object",
    "sput-boolean",
    "sput-byte",
    "sput-char",
    "sput-short",
];
const IF_TESTS: [&str; 6] = ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"];
const IF_ZERO_TESTS: [&str; 6] = ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"];

/// Which of the 7 field access opcodes applies to a field of this type
fn field_variant(descriptor: &str) -> usize {
    match descriptor.as_bytes().first() {
        Some(b'J') | Some(b'D') => 1,
        Some(b'L') | Some(b'[') => 2,
        Some(b'Z') => 3,
        Some(b'B') => 4,
        Some(b'C') => 5,
        Some(b'S') => 6,
        _ => 0,
    }
}

impl<L> Instruction<L> {
    pub fn format(&self) -> Format {
        use Instruction::*;
        match self {
            Nop | ReturnVoid => Format::F10x,
            Move { .. } => Format::F12x,
            MoveResult { .. } | Return { .. } | Throw { .. } => Format::F11x,
            Const4 { .. } => Format::F11n,
            Const16 { .. } => Format::F21s,
            Const { .. } => Format::F31i,
            ConstString { .. }
            | ConstClass { .. }
            | ConstMethodHandle { .. }
            | ConstMethodType { .. }
            | CheckCast { .. }
            | NewInstance { .. }
            | StaticField { .. } => Format::F21c,
            ConstStringJumbo { .. } => Format::F31c,
            NewArray { .. } | InstanceOf { .. } | InstanceField { .. } => Format::F22c,
            Invoke { .. } | InvokeCustom { .. } | FilledNewArray { .. } => Format::F35c,
            InvokeRange { .. } | InvokeCustomRange { .. } | FilledNewArrayRange { .. } => {
                Format::F3rc
            }
            Goto(_) => Format::F10t,
            Goto16(_) => Format::F20t,
            Goto32(_) => Format::F30t,
            If { .. } => Format::F22t,
            IfZero { .. } => Format::F21t,
            PackedSwitch { .. } | SparseSwitch { .. } | FillArrayData { .. } => Format::F31t,
            PackedSwitchPayload { .. } => Format::PackedSwitchPayload,
            SparseSwitchPayload { .. } => Format::SparseSwitchPayload,
            ArrayPayload { .. } => Format::ArrayPayload,
        }
    }

    /// Opcode (or, for payloads, the full identifying first code unit)
    pub fn opcode(&self) -> u16 {
        use Instruction::*;
        match self {
            Nop => 0x00,
            Move { kind, .. } => match kind {
                ValueKind::Single => 0x01,
                ValueKind::Wide => 0x04,
                ValueKind::Object => 0x07,
            },
            MoveResult { kind, .. } => match kind {
                ValueKind::Single => 0x0a,
                ValueKind::Wide => 0x0b,
                ValueKind::Object => 0x0c,
            },
            ReturnVoid => 0x0e,
            Return { kind, .. } => match kind {
                ValueKind::Single => 0x0f,
                ValueKind::Wide => 0x10,
                ValueKind::Object => 0x11,
            },
            Const4 { .. } => 0x12,
            Const16 { .. } => 0x13,
            Const { .. } => 0x14,
            ConstString { .. } => 0x1a,
            ConstStringJumbo { .. } => 0x1b,
            ConstClass { .. } => 0x1c,
            CheckCast { .. } => 0x1f,
            InstanceOf { .. } => 0x20,
            NewInstance { .. } => 0x22,
            NewArray { .. } => 0x23,
            FilledNewArray { .. } => 0x24,
            FilledNewArrayRange { .. } => 0x25,
            FillArrayData { .. } => 0x26,
            Throw { .. } => 0x27,
            Goto(_) => 0x28,
            Goto16(_) => 0x29,
            Goto32(_) => 0x2a,
            PackedSwitch { .. } => 0x2b,
            SparseSwitch { .. } => 0x2c,
            If { test, .. } => 0x32 + test.ordinal(),
            IfZero { test, .. } => 0x38 + test.ordinal(),
            InstanceField { op, field, .. } => {
                let base = match op {
                    FieldOp::Get => 0x52,
                    FieldOp::Put => 0x59,
                };
                base + field_variant(&field.field_type) as u16
            }
            StaticField { op, field, .. } => {
                let base = match op {
                    FieldOp::Get => 0x60,
                    FieldOp::Put => 0x67,
                };
                base + field_variant(&field.field_type) as u16
            }
            Invoke { kind, .. } => match kind {
                InvokeKind::Virtual => 0x6e,
                InvokeKind::Super => 0x6f,
                InvokeKind::Direct => 0x70,
                InvokeKind::Static => 0x71,
                InvokeKind::Interface => 0x72,
            },
            InvokeRange { kind, .. } => match kind {
                InvokeKind::Virtual => 0x74,
                InvokeKind::Super => 0x75,
                InvokeKind::Direct => 0x76,
                InvokeKind::Static => 0x77,
                InvokeKind::Interface => 0x78,
            },
            InvokeCustom { .. } => 0xfc,
            InvokeCustomRange { .. } => 0xfd,
            ConstMethodHandle { .. } => 0xfe,
            ConstMethodType { .. } => 0xff,
            PackedSwitchPayload { .. } => 0x0100,
            SparseSwitchPayload { .. } => 0x0200,
            ArrayPayload { .. } => 0x0300,
        }
    }

    /// Assembler name of the instruction
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Nop => "nop",
            Move { kind, .. } => match kind {
                ValueKind::Single => "move",
                ValueKind::Wide => "move-wide",
                ValueKind::Object => "move-object",
            },
            MoveResult { kind, .. } => match kind {
                ValueKind::Single => "move-result",
                ValueKind::Wide => "move-result-wide",
                ValueKind::Object => "move-result-object",
            },
            ReturnVoid => "return-void",
            Return { kind, .. } => match kind {
                ValueKind::Single => "return",
                ValueKind::Wide => "return-wide",
                ValueKind::Object => "return-object",
            },
            Const4 { .. } => "const/4",
            Const16 { .. } => "const/16",
            Const { .. } => "const",
            ConstString { .. } => "const-string",
            ConstStringJumbo { .. } => "const-string/jumbo",
            ConstClass { .. } => "const-class",
            ConstMethodHandle { .. } => "const-method-handle",
            ConstMethodType { .. } => "const-method-type",
            CheckCast { .. } => "check-cast",
            InstanceOf { .. } => "instance-of",
            NewInstance { .. } => "new-instance",
            NewArray { .. } => "new-array",
            FilledNewArray { .. } => "filled-new-array",
            FilledNewArrayRange { .. } => "filled-new-array/range",
            StaticField { op, field, .. } => match op {
                FieldOp::Get => STATIC_GET[field_variant(&field.field_type)],
                FieldOp::Put => STATIC_PUT[field_variant(&field.field_type)],
            },
            InstanceField { op, field, .. } => match op {
                FieldOp::Get => INSTANCE_GET[field_variant(&field.field_type)],
                FieldOp::Put => INSTANCE_PUT[field_variant(&field.field_type)],
            },
            Invoke { kind, .. } => match kind {
                InvokeKind::Virtual => "invoke-virtual",
                InvokeKind::Super => "invoke-super",
                InvokeKind::Direct => "invoke-direct",
                InvokeKind::Static => "invoke-static",
                InvokeKind::Interface => "invoke-interface",
            },
            InvokeRange { kind, .. } => match kind {
                InvokeKind::Virtual => "invoke-virtual/range",
                InvokeKind::Super => "invoke-super/range",
                InvokeKind::Direct => "invoke-direct/range",
                InvokeKind::Static => "invoke-static/range",
                InvokeKind::Interface => "invoke-interface/range",
            },
            InvokeCustom { .. } => "invoke-custom",
            InvokeCustomRange { .. } => "invoke-custom/range",
            Throw { .. } => "throw",
            Goto(_) => "goto",
            Goto16(_) => "goto/16",
            Goto32(_) => "goto/32",
            If { test, .. } => IF_TESTS[test.ordinal() as usize],
            IfZero { test, .. } => IF_ZERO_TESTS[test.ordinal() as usize],
            PackedSwitch { .. } => "packed-switch",
            SparseSwitch { .. } => "sparse-switch",
            FillArrayData { .. } => "fill-array-data",
            PackedSwitchPayload { .. } => "packed-switch-payload",
            SparseSwitchPayload { .. } => "sparse-switch-payload",
            ArrayPayload { .. } => "array-payload",
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Instruction::Nop)
    }

    /// Payloads are data embedded in the instruction stream, never executed
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            Instruction::PackedSwitchPayload { .. }
                | Instruction::SparseSwitchPayload { .. }
                | Instruction::ArrayPayload { .. }
        )
    }

    pub fn is_switch_payload(&self) -> bool {
        matches!(
            self,
            Instruction::PackedSwitchPayload { .. } | Instruction::SparseSwitchPayload { .. }
        )
    }

    /// Whether the instruction must start at an even code unit address
    pub fn requires_alignment(&self) -> bool {
        self.is_payload()
    }

    /// Entity from one of the pools that this instruction refers to
    pub fn reference(&self) -> Option<Reference<'_>> {
        use Instruction::*;
        match self {
            ConstString { string, .. } | ConstStringJumbo { string, .. } => {
                Some(Reference::String(string))
            }
            ConstClass { class, .. }
            | CheckCast { class, .. }
            | InstanceOf { class, .. }
            | NewInstance { class, .. } => Some(Reference::Type(class)),
            NewArray { array_type, .. }
            | FilledNewArray { array_type, .. }
            | FilledNewArrayRange { array_type, .. } => Some(Reference::Type(array_type)),
            ConstMethodHandle { handle, .. } => Some(Reference::MethodHandle(handle)),
            ConstMethodType { proto, .. } => Some(Reference::Proto(proto)),
            StaticField { field, .. } | InstanceField { field, .. } => {
                Some(Reference::Field(field))
            }
            Invoke { method, .. } | InvokeRange { method, .. } => Some(Reference::Method(method)),
            InvokeCustom { call_site, .. } | InvokeCustomRange { call_site, .. } => {
                Some(Reference::CallSite(call_site))
            }
            _ => None,
        }
    }

    /// Branch targets mentioned in the instruction
    pub fn labels(&self) -> Vec<&L> {
        use Instruction::*;
        match self {
            Goto(target) | Goto16(target) | Goto32(target) => vec![target],
            If { target, .. } | IfZero { target, .. } => vec![target],
            PackedSwitch { payload, .. }
            | SparseSwitch { payload, .. }
            | FillArrayData { payload, .. } => vec![payload],
            PackedSwitchPayload { targets, .. } => targets.iter().collect(),
            SparseSwitchPayload { entries } => entries.iter().map(|(_, target)| target).collect(),
            _ => vec![],
        }
    }

    /// Convert the branch targets, possibly failing
    pub fn try_map_labels<M, E>(
        &self,
        mut map_label: impl FnMut(&L) -> Result<M, E>,
    ) -> Result<Instruction<M>, E> {
        use Instruction::*;
        Ok(match self {
            Nop => Nop,
            Move { kind, dest, source } => Move {
                kind: *kind,
                dest: *dest,
                source: *source,
            },
            MoveResult { kind, dest } => MoveResult {
                kind: *kind,
                dest: *dest,
            },
            ReturnVoid => ReturnVoid,
            Return { kind, register } => Return {
                kind: *kind,
                register: *register,
            },
            Const4 { dest, value } => Const4 {
                dest: *dest,
                value: *value,
            },
            Const16 { dest, value } => Const16 {
                dest: *dest,
                value: *value,
            },
            Const { dest, value } => Const {
                dest: *dest,
                value: *value,
            },
            ConstString { dest, string } => ConstString {
                dest: *dest,
                string: string.clone(),
            },
            ConstStringJumbo { dest, string } => ConstStringJumbo {
                dest: *dest,
                string: string.clone(),
            },
            ConstClass { dest, class } => ConstClass {
                dest: *dest,
                class: class.clone(),
            },
            ConstMethodHandle { dest, handle } => ConstMethodHandle {
                dest: *dest,
                handle: handle.clone(),
            },
            ConstMethodType { dest, proto } => ConstMethodType {
                dest: *dest,
                proto: proto.clone(),
            },
            CheckCast { register, class } => CheckCast {
                register: *register,
                class: class.clone(),
            },
            InstanceOf {
                dest,
                object,
                class,
            } => InstanceOf {
                dest: *dest,
                object: *object,
                class: class.clone(),
            },
            NewInstance { dest, class } => NewInstance {
                dest: *dest,
                class: class.clone(),
            },
            NewArray {
                dest,
                size,
                array_type,
            } => NewArray {
                dest: *dest,
                size: *size,
                array_type: array_type.clone(),
            },
            FilledNewArray {
                arguments,
                array_type,
            } => FilledNewArray {
                arguments: arguments.clone(),
                array_type: array_type.clone(),
            },
            FilledNewArrayRange {
                first_register,
                register_count,
                array_type,
            } => FilledNewArrayRange {
                first_register: *first_register,
                register_count: *register_count,
                array_type: array_type.clone(),
            },
            StaticField {
                op,
                register,
                field,
            } => StaticField {
                op: *op,
                register: *register,
                field: field.clone(),
            },
            InstanceField {
                op,
                register,
                object,
                field,
            } => InstanceField {
                op: *op,
                register: *register,
                object: *object,
                field: field.clone(),
            },
            Invoke {
                kind,
                arguments,
                method,
            } => Invoke {
                kind: *kind,
                arguments: arguments.clone(),
                method: method.clone(),
            },
            InvokeRange {
                kind,
                first_register,
                register_count,
                method,
            } => InvokeRange {
                kind: *kind,
                first_register: *first_register,
                register_count: *register_count,
                method: method.clone(),
            },
            InvokeCustom {
                arguments,
                call_site,
            } => InvokeCustom {
                arguments: arguments.clone(),
                call_site: call_site.clone(),
            },
            InvokeCustomRange {
                first_register,
                register_count,
                call_site,
            } => InvokeCustomRange {
                first_register: *first_register,
                register_count: *register_count,
                call_site: call_site.clone(),
            },
            Throw { register } => Throw {
                register: *register,
            },
            Goto(target) => Goto(map_label(target)?),
            Goto16(target) => Goto16(map_label(target)?),
            Goto32(target) => Goto32(map_label(target)?),
            If {
                test,
                first,
                second,
                target,
            } => If {
                test: *test,
                first: *first,
                second: *second,
                target: map_label(target)?,
            },
            IfZero {
                test,
                register,
                target,
            } => IfZero {
                test: *test,
                register: *register,
                target: map_label(target)?,
            },
            PackedSwitch { register, payload } => PackedSwitch {
                register: *register,
                payload: map_label(payload)?,
            },
            SparseSwitch { register, payload } => SparseSwitch {
                register: *register,
                payload: map_label(payload)?,
            },
            FillArrayData { register, payload } => FillArrayData {
                register: *register,
                payload: map_label(payload)?,
            },
            PackedSwitchPayload { first_key, targets } => PackedSwitchPayload {
                first_key: *first_key,
                targets: targets
                    .iter()
                    .map(&mut map_label)
                    .collect::<Result<Vec<M>, E>>()?,
            },
            SparseSwitchPayload { entries } => SparseSwitchPayload {
                entries: entries
                    .iter()
                    .map(|(key, target)| Ok((*key, map_label(target)?)))
                    .collect::<Result<Vec<(i32, M)>, E>>()?,
            },
            ArrayPayload {
                element_width,
                elements,
            } => ArrayPayload {
                element_width: *element_width,
                elements: elements.clone(),
            },
        })
    }

    /// Convert the branch targets
    pub fn map_labels<M>(&self, mut map_label: impl FnMut(&L) -> M) -> Instruction<M> {
        match self.try_map_labels(|label| Ok::<M, Infallible>(map_label(label))) {
            Ok(instruction) => instruction,
            Err(never) => match never {},
        }
    }
}

impl<L> Width for Instruction<L> {
    fn width(&self) -> usize {
        match self {
            Instruction::PackedSwitchPayload { targets, .. } => 4 + 2 * targets.len(),
            Instruction::SparseSwitchPayload { entries } => 2 + 4 * entries.len(),
            Instruction::ArrayPayload {
                element_width,
                elements,
            } => 4 + (elements.len() * *element_width as usize + 1) / 2,
            other => other.format().fixed_width().unwrap_or(0),
        }
    }
}
