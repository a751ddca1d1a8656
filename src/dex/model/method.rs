use crate::dex::code::MethodImplementation;
use crate::dex::{AnnotationSet, MethodAccessFlags, MethodProto, MethodRef};

/// Semantic representation of a method
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Method {
    pub name: String,
    pub parameters: Vec<MethodParameter>,

    /// Return type descriptor (`V` for `void`)
    pub return_type: String,

    pub access_flags: MethodAccessFlags,
    pub annotations: AnnotationSet,

    /// Method body (absent on abstract and native methods)
    pub implementation: Option<MethodImplementation>,
}

/// Parameter of a method, with its optional debug name and annotations
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodParameter {
    pub parameter_type: String,
    pub name: Option<String>,
    pub annotations: AnnotationSet,
}

impl MethodParameter {
    pub fn new(parameter_type: impl Into<String>) -> MethodParameter {
        MethodParameter {
            parameter_type: parameter_type.into(),
            name: None,
            annotations: AnnotationSet::default(),
        }
    }
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<MethodParameter>,
        return_type: impl Into<String>,
        access_flags: MethodAccessFlags,
    ) -> Method {
        Method {
            name: name.into(),
            parameters,
            return_type: return_type.into(),
            access_flags,
            annotations: AnnotationSet::default(),
            implementation: None,
        }
    }

    pub fn proto(&self) -> MethodProto {
        MethodProto::new(
            self.return_type.clone(),
            self.parameters
                .iter()
                .map(|parameter| parameter.parameter_type.clone())
                .collect(),
        )
    }

    /// Reference to this method from inside `class`
    pub fn reference(&self, class: &str) -> MethodRef {
        MethodRef::new(class, self.name.clone(), self.proto())
    }

    /// Name and prototype, which must be unique within a class (eg. `run(I)V`)
    pub fn short_descriptor(&self) -> String {
        format!("{}{:?}", self.name, self.proto())
    }

    /// Direct methods are static, private, or constructors
    pub fn is_direct(&self) -> bool {
        self.access_flags.is_direct() || self.name == "<init>" || self.name == "<clinit>"
    }
}
