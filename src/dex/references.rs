use super::{EncodedValue, Error};
use std::fmt;

/// Method prototype: return type followed by parameter types, all as type descriptors
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodProto {
    pub return_type: String,
    pub parameters: Vec<String>,
}

impl MethodProto {
    pub fn new(return_type: impl Into<String>, parameters: Vec<String>) -> MethodProto {
        MethodProto {
            return_type: return_type.into(),
            parameters,
        }
    }

    /// Short-form descriptor (eg. `VIL` for `(ILjava/lang/String;)V`)
    ///
    /// References and arrays both collapse to `L`.
    pub fn shorty(&self) -> String {
        std::iter::once(&self.return_type)
            .chain(self.parameters.iter())
            .map(|descriptor| match descriptor.as_bytes().first() {
                Some(b'[') | Some(b'L') | None => 'L',
                Some(other) => *other as char,
            })
            .collect()
    }
}

impl fmt::Debug for MethodProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.parameters.concat(), self.return_type)
    }
}

/// Reference to a field, as it appears in `field_ids`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub field_type: String,
}

impl FieldRef {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> FieldRef {
        FieldRef {
            class: class.into(),
            name: name.into(),
            field_type: field_type.into(),
        }
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.class, self.name, self.field_type)
    }
}

/// Reference to a method, as it appears in `method_ids`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub proto: MethodProto,
}

impl MethodRef {
    pub fn new(class: impl Into<String>, name: impl Into<String>, proto: MethodProto) -> MethodRef {
        MethodRef {
            class: class.into(),
            name: name.into(),
            proto,
        }
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{:?}", self.class, self.name, self.proto)
    }
}

/// Kinds of method handles
///
/// The first four are field accessors, the rest are invocations.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MethodHandleKind {
    StaticPut,
    StaticGet,
    InstancePut,
    InstanceGet,
    InvokeStatic,
    InvokeInstance,
    InvokeConstructor,
    InvokeDirect,
    InvokeInterface,
}

impl MethodHandleKind {
    /// Decode the `method_handle_type` field
    pub fn from_raw(raw: u16) -> Result<MethodHandleKind, Error> {
        Ok(match raw {
            0x00 => MethodHandleKind::StaticPut,
            0x01 => MethodHandleKind::StaticGet,
            0x02 => MethodHandleKind::InstancePut,
            0x03 => MethodHandleKind::InstanceGet,
            0x04 => MethodHandleKind::InvokeStatic,
            0x05 => MethodHandleKind::InvokeInstance,
            0x06 => MethodHandleKind::InvokeConstructor,
            0x07 => MethodHandleKind::InvokeDirect,
            0x08 => MethodHandleKind::InvokeInterface,
            other => return Err(Error::UnrecognizedMethodHandleKind(other)),
        })
    }

    /// Encode into the `method_handle_type` field
    pub fn raw(self) -> u16 {
        match self {
            MethodHandleKind::StaticPut => 0x00,
            MethodHandleKind::StaticGet => 0x01,
            MethodHandleKind::InstancePut => 0x02,
            MethodHandleKind::InstanceGet => 0x03,
            MethodHandleKind::InvokeStatic => 0x04,
            MethodHandleKind::InvokeInstance => 0x05,
            MethodHandleKind::InvokeConstructor => 0x06,
            MethodHandleKind::InvokeDirect => 0x07,
            MethodHandleKind::InvokeInterface => 0x08,
        }
    }

    pub fn is_field_accessor(self) -> bool {
        matches!(
            self,
            MethodHandleKind::StaticPut
                | MethodHandleKind::StaticGet
                | MethodHandleKind::InstancePut
                | MethodHandleKind::InstanceGet
        )
    }
}

/// Member targeted by a method handle
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum MethodHandleMember {
    Field(FieldRef),
    Method(MethodRef),
}

/// Method handle constant
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodHandleRef {
    pub kind: MethodHandleKind,
    pub member: MethodHandleMember,
}

impl MethodHandleRef {
    /// Make a method handle, checking that field accessor kinds point at fields and invocation
    /// kinds point at methods
    pub fn new(kind: MethodHandleKind, member: MethodHandleMember) -> Result<MethodHandleRef, Error> {
        let handle = MethodHandleRef { kind, member };
        handle.check()?;
        Ok(handle)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        let consistent = match &self.member {
            MethodHandleMember::Field(_) => self.kind.is_field_accessor(),
            MethodHandleMember::Method(_) => !self.kind.is_field_accessor(),
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::MismatchedMethodHandle(self.clone()))
        }
    }
}

/// Call site of an `invoke-custom`
///
/// The name only distinguishes call sites that would otherwise be identical, it is not part of
/// the encoded form.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CallSiteRef {
    pub name: String,
    pub bootstrap: MethodHandleRef,
    pub method_name: String,
    pub method_proto: MethodProto,
    pub extra_arguments: Vec<EncodedValue>,
}

impl CallSiteRef {
    /// Contents of the `encoded_array_item` referenced from `call_site_ids`
    pub fn encoded_call_site(&self) -> Vec<EncodedValue> {
        let mut values = vec![
            EncodedValue::MethodHandle(self.bootstrap.clone()),
            EncodedValue::String(self.method_name.clone()),
            EncodedValue::MethodType(self.method_proto.clone()),
        ];
        values.extend(self.extra_arguments.iter().cloned());
        values
    }
}

/// Pooled entity referred to from an instruction
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Reference<'a> {
    String(&'a str),
    Type(&'a str),
    Field(&'a FieldRef),
    Method(&'a MethodRef),
    Proto(&'a MethodProto),
    CallSite(&'a CallSiteRef),
    MethodHandle(&'a MethodHandleRef),
}
