use super::{FieldRef, MethodHandleRef, MethodProto, MethodRef};

/// Constant value, as found in static initializers, annotations, and call sites
///
/// Floating point values are stored as their little-endian bytes so that values can be hashed and
/// compared structurally (`NaN` is equal to itself and `0.0` differs from `-0.0`).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float([u8; 4]),
    Double([u8; 8]),
    MethodType(MethodProto),
    MethodHandle(MethodHandleRef),
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    Enum(FieldRef),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue {
    pub const VALUE_BYTE: u8 = 0x00;
    pub const VALUE_SHORT: u8 = 0x02;
    pub const VALUE_CHAR: u8 = 0x03;
    pub const VALUE_INT: u8 = 0x04;
    pub const VALUE_LONG: u8 = 0x06;
    pub const VALUE_FLOAT: u8 = 0x10;
    pub const VALUE_DOUBLE: u8 = 0x11;
    pub const VALUE_METHOD_TYPE: u8 = 0x15;
    pub const VALUE_METHOD_HANDLE: u8 = 0x16;
    pub const VALUE_STRING: u8 = 0x17;
    pub const VALUE_TYPE: u8 = 0x18;
    pub const VALUE_FIELD: u8 = 0x19;
    pub const VALUE_METHOD: u8 = 0x1a;
    pub const VALUE_ENUM: u8 = 0x1b;
    pub const VALUE_ARRAY: u8 = 0x1c;
    pub const VALUE_ANNOTATION: u8 = 0x1d;
    pub const VALUE_NULL: u8 = 0x1e;
    pub const VALUE_BOOLEAN: u8 = 0x1f;

    pub fn float(value: f32) -> EncodedValue {
        EncodedValue::Float(value.to_le_bytes())
    }

    pub fn double(value: f64) -> EncodedValue {
        EncodedValue::Double(value.to_le_bytes())
    }

    /// The `value_type` tag
    pub fn value_type(&self) -> u8 {
        match self {
            EncodedValue::Byte(_) => EncodedValue::VALUE_BYTE,
            EncodedValue::Short(_) => EncodedValue::VALUE_SHORT,
            EncodedValue::Char(_) => EncodedValue::VALUE_CHAR,
            EncodedValue::Int(_) => EncodedValue::VALUE_INT,
            EncodedValue::Long(_) => EncodedValue::VALUE_LONG,
            EncodedValue::Float(_) => EncodedValue::VALUE_FLOAT,
            EncodedValue::Double(_) => EncodedValue::VALUE_DOUBLE,
            EncodedValue::MethodType(_) => EncodedValue::VALUE_METHOD_TYPE,
            EncodedValue::MethodHandle(_) => EncodedValue::VALUE_METHOD_HANDLE,
            EncodedValue::String(_) => EncodedValue::VALUE_STRING,
            EncodedValue::Type(_) => EncodedValue::VALUE_TYPE,
            EncodedValue::Field(_) => EncodedValue::VALUE_FIELD,
            EncodedValue::Method(_) => EncodedValue::VALUE_METHOD,
            EncodedValue::Enum(_) => EncodedValue::VALUE_ENUM,
            EncodedValue::Array(_) => EncodedValue::VALUE_ARRAY,
            EncodedValue::Annotation(_) => EncodedValue::VALUE_ANNOTATION,
            EncodedValue::Null => EncodedValue::VALUE_NULL,
            EncodedValue::Boolean(_) => EncodedValue::VALUE_BOOLEAN,
        }
    }

    /// Whether this is the value a field holds before any initializer runs
    ///
    /// Both `0.0` and `-0.0` count as defaults, matching numeric comparison with zero.
    pub fn is_default(&self) -> bool {
        match self {
            EncodedValue::Byte(b) => *b == 0,
            EncodedValue::Short(s) => *s == 0,
            EncodedValue::Char(c) => *c == 0,
            EncodedValue::Int(i) => *i == 0,
            EncodedValue::Long(l) => *l == 0,
            EncodedValue::Float(bytes) => f32::from_le_bytes(*bytes) == 0.0,
            EncodedValue::Double(bytes) => f64::from_le_bytes(*bytes) == 0.0,
            EncodedValue::Boolean(b) => !*b,
            EncodedValue::Null => true,
            _ => false,
        }
    }

    /// Default value for a field of the given type descriptor
    pub fn default_for(descriptor: &str) -> EncodedValue {
        match descriptor {
            "Z" => EncodedValue::Boolean(false),
            "B" => EncodedValue::Byte(0),
            "S" => EncodedValue::Short(0),
            "C" => EncodedValue::Char(0),
            "I" => EncodedValue::Int(0),
            "J" => EncodedValue::Long(0),
            "F" => EncodedValue::float(0.0),
            "D" => EncodedValue::double(0.0),
            _ => EncodedValue::Null,
        }
    }
}

/// Annotation body: annotation type and its elements
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EncodedAnnotation {
    pub annotation_type: String,

    /// Elements, sorted by name
    elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn new(
        annotation_type: impl Into<String>,
        mut elements: Vec<AnnotationElement>,
    ) -> EncodedAnnotation {
        elements.sort_by(|e1, e2| super::compare_utf16(&e1.name, &e2.name));
        EncodedAnnotation {
            annotation_type: annotation_type.into(),
            elements,
        }
    }

    pub fn elements(&self) -> &[AnnotationElement] {
        &self.elements
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AnnotationElement {
    pub name: String,
    pub value: EncodedValue,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn raw(self) -> u8 {
        match self {
            AnnotationVisibility::Build => 0x00,
            AnnotationVisibility::Runtime => 0x01,
            AnnotationVisibility::System => 0x02,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Annotation {
    pub visibility: AnnotationVisibility,
    pub annotation: EncodedAnnotation,
}

/// Set of annotations on a class, member, or parameter, sorted by annotation type
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct AnnotationSet(Vec<Annotation>);

impl AnnotationSet {
    pub fn new(mut annotations: Vec<Annotation>) -> AnnotationSet {
        annotations.sort_by(|a1, a2| {
            super::compare_utf16(
                &a1.annotation.annotation_type,
                &a2.annotation.annotation_type,
            )
        });
        AnnotationSet(annotations)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        for descriptor in ["Z", "B", "S", "C", "I", "J", "F", "D", "Ljava/lang/Object;", "[I"] {
            assert!(
                EncodedValue::default_for(descriptor).is_default(),
                "default of {}",
                descriptor
            );
        }
        assert!(EncodedValue::double(-0.0).is_default());
        assert!(!EncodedValue::float(f32::NAN).is_default());
        assert!(!EncodedValue::Int(1).is_default());
        assert!(!EncodedValue::String(String::new()).is_default());
    }

    #[test]
    fn float_identity() {
        assert_eq!(EncodedValue::float(f32::NAN), EncodedValue::float(f32::NAN));
        assert_ne!(EncodedValue::double(0.0), EncodedValue::double(-0.0));
    }

    #[test]
    fn annotation_order() {
        let annotation = EncodedAnnotation::new(
            "LAnno;",
            vec![
                AnnotationElement {
                    name: String::from("value"),
                    value: EncodedValue::Int(1),
                },
                AnnotationElement {
                    name: String::from("name"),
                    value: EncodedValue::Int(2),
                },
            ],
        );
        let names: Vec<&str> = annotation.elements().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["name", "value"]);

        let set = AnnotationSet::new(vec![
            Annotation {
                visibility: AnnotationVisibility::Runtime,
                annotation: EncodedAnnotation::new("LZeta;", vec![]),
            },
            Annotation {
                visibility: AnnotationVisibility::Build,
                annotation: EncodedAnnotation::new("LAlpha;", vec![]),
            },
        ]);
        assert_eq!(set.annotations()[0].annotation.annotation_type, "LAlpha;");
    }
}
