use crate::dex::{AnnotationSet, EncodedValue, FieldAccessFlags, FieldRef};

/// Semantic representation of a field
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Field {
    pub name: String,

    /// Type descriptor (eg. `I` or `Ljava/lang/String;`)
    pub field_type: String,

    pub access_flags: FieldAccessFlags,

    /// Initial value, only meaningful on static fields
    pub initial_value: Option<EncodedValue>,

    pub annotations: AnnotationSet,
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        field_type: impl Into<String>,
        access_flags: FieldAccessFlags,
    ) -> Field {
        Field {
            name: name.into(),
            field_type: field_type.into(),
            access_flags,
            initial_value: None,
            annotations: AnnotationSet::default(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    /// Reference to this field from inside `class`
    pub fn reference(&self, class: &str) -> FieldRef {
        FieldRef::new(class, self.name.clone(), self.field_type.clone())
    }

    /// Name and type, which must be unique within a class (eg. `count:I`)
    pub fn short_descriptor(&self) -> String {
        format!("{}:{}", self.name, self.field_type)
    }
}
