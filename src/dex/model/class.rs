use crate::dex::model::{Field, Method};
use crate::dex::{compare_utf16, AnnotationSet, ClassAccessFlags, EncodedValue};

/// Semantic representation of a class
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassDef {
    /// Type descriptor of the class (eg. `Lcom/example/Point;`)
    pub class_type: String,

    pub access_flags: ClassAccessFlags,

    /// Type descriptor of the superclass (only `Ljava/lang/Object;` has none)
    pub superclass: Option<String>,

    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub annotations: AnnotationSet,

    /// Fields
    ///
    /// Use [`Self::add_field`] to have fields sorted into static and instance fields.
    pub static_fields: Vec<Field>,
    pub instance_fields: Vec<Field>,

    /// Methods
    ///
    /// Use [`Self::add_method`] to have methods sorted into direct and virtual methods.
    pub direct_methods: Vec<Method>,
    pub virtual_methods: Vec<Method>,
}

impl ClassDef {
    /// Create a new class with no members
    pub fn new(
        class_type: impl Into<String>,
        access_flags: ClassAccessFlags,
        superclass: Option<String>,
    ) -> ClassDef {
        ClassDef {
            class_type: class_type.into(),
            access_flags,
            superclass,
            interfaces: vec![],
            source_file: None,
            annotations: AnnotationSet::default(),
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
        }
    }

    pub fn add_field(&mut self, field: Field) {
        if field.is_static() {
            self.static_fields.push(field);
        } else {
            self.instance_fields.push(field);
        }
    }

    pub fn add_method(&mut self, method: Method) {
        if method.is_direct() {
            self.direct_methods.push(method);
        } else {
            self.virtual_methods.push(method);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    /// Initial values of the static fields, as stored in the `static_values` encoded array
    ///
    /// Values follow the order static fields are written in (by name, then type) and stop after
    /// the last value that isn't the default for its field. If every static field starts out with
    /// its default value, there is no array at all.
    pub fn static_initializers(&self) -> Option<Vec<EncodedValue>> {
        let mut fields: Vec<&Field> = self.static_fields.iter().collect();
        fields.sort_by(|f1, f2| {
            compare_utf16(&f1.name, &f2.name).then_with(|| compare_utf16(&f1.field_type, &f2.field_type))
        });

        let values: Vec<EncodedValue> = fields
            .iter()
            .map(|field| match &field.initial_value {
                Some(value) => value.clone(),
                None => EncodedValue::default_for(&field.field_type),
            })
            .collect();
        let last_non_default = values.iter().rposition(|value| !value.is_default())?;
        Some(values[..=last_non_default].to_vec())
    }
}
