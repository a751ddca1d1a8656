//! Interning of everything a class refers to
//!
//! A dex file stores every string, type, prototype, field, and method reference exactly once, in
//! per-kind sections, and everything else refers to those by index. [`DexPool`] collects these
//! sections: interning a [`ClassDef`] walks through the class and interns every entity it
//! mentions, directly or indirectly (the "cascade"). Once all classes are in, [`PoolWriter`] sorts
//! the sections into their final order and emits them.
//!
//! Interning can be undone, either explicitly with [`DexPool::mark`] and [`DexPool::reset`] (to
//! move a class that makes the pool overflow into another file) or implicitly when interning a
//! class fails halfway through.

mod index;
mod intern_pool;
mod value_writer;
mod writer;

pub use index::*;
pub use intern_pool::*;
pub use value_writer::*;
pub use writer::*;

use crate::dex::code::{DebugItem, MethodImplementation, ReferenceIndexer};
use crate::dex::model::{ClassDef, Method};
use crate::dex::{
    compare_utf16, Annotation, AnnotationSet, CallSiteRef, EncodedAnnotation, EncodedValue,
    Error, FieldRef, MethodHandleMember, MethodHandleRef, MethodProto, MethodRef, Reference,
    Settings,
};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Sections of a dex file that are backed by a pool
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Section {
    Strings,
    Types,
    Protos,
    Fields,
    Methods,
    Classes,
    CallSites,
    MethodHandles,
    TypeLists,
    Annotations,
    AnnotationSets,
    EncodedArrays,
}

/// Every pool of a dex file
pub struct DexPool {
    settings: Settings,
    marked: bool,

    strings: InternPool<String, StringIndex>,
    types: InternPool<String, TypeIndex>,
    protos: InternPool<MethodProto, ProtoIndex>,
    fields: InternPool<FieldRef, FieldIndex>,
    methods: InternPool<MethodRef, MethodIndex>,
    classes: InternPool<String, ClassIndex, ClassDef>,
    call_sites: InternPool<CallSiteRef, CallSiteIndex>,
    method_handles: InternPool<MethodHandleRef, MethodHandleIndex>,
    type_lists: InternPool<Vec<String>, TypeListIndex>,
    annotations: InternPool<Annotation, AnnotationIndex>,
    annotation_sets: InternPool<AnnotationSet, AnnotationSetIndex>,
    encoded_arrays: InternPool<Vec<EncodedValue>, EncodedArrayIndex>,
}

/// Sizes of every pool, in section order
type Checkpoint = [usize; 12];

impl DexPool {
    pub fn new() -> DexPool {
        DexPool::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> DexPool {
        DexPool {
            settings,
            marked: false,
            strings: InternPool::new(Section::Strings),
            types: InternPool::new(Section::Types),
            protos: InternPool::new(Section::Protos),
            fields: InternPool::new(Section::Fields),
            methods: InternPool::new(Section::Methods),
            classes: InternPool::new(Section::Classes),
            call_sites: InternPool::new(Section::CallSites),
            method_handles: InternPool::new(Section::MethodHandles),
            type_lists: InternPool::new(Section::TypeLists),
            annotations: InternPool::new(Section::Annotations),
            annotation_sets: InternPool::new(Section::AnnotationSets),
            encoded_arrays: InternPool::new(Section::EncodedArrays),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn strings(&self) -> &InternPool<String, StringIndex> {
        &self.strings
    }

    pub fn types(&self) -> &InternPool<String, TypeIndex> {
        &self.types
    }

    pub fn protos(&self) -> &InternPool<MethodProto, ProtoIndex> {
        &self.protos
    }

    pub fn fields(&self) -> &InternPool<FieldRef, FieldIndex> {
        &self.fields
    }

    pub fn methods(&self) -> &InternPool<MethodRef, MethodIndex> {
        &self.methods
    }

    pub fn classes(&self) -> &InternPool<String, ClassIndex, ClassDef> {
        &self.classes
    }

    pub fn call_sites(&self) -> &InternPool<CallSiteRef, CallSiteIndex> {
        &self.call_sites
    }

    pub fn method_handles(&self) -> &InternPool<MethodHandleRef, MethodHandleIndex> {
        &self.method_handles
    }

    pub fn type_lists(&self) -> &InternPool<Vec<String>, TypeListIndex> {
        &self.type_lists
    }

    pub fn annotations(&self) -> &InternPool<Annotation, AnnotationIndex> {
        &self.annotations
    }

    pub fn annotation_sets(&self) -> &InternPool<AnnotationSet, AnnotationSetIndex> {
        &self.annotation_sets
    }

    pub fn encoded_arrays(&self) -> &InternPool<Vec<EncodedValue>, EncodedArrayIndex> {
        &self.encoded_arrays
    }

    fn pools_mut(&mut self) -> [&mut dyn Markable; 12] {
        [
            &mut self.strings,
            &mut self.types,
            &mut self.protos,
            &mut self.fields,
            &mut self.methods,
            &mut self.classes,
            &mut self.call_sites,
            &mut self.method_handles,
            &mut self.type_lists,
            &mut self.annotations,
            &mut self.annotation_sets,
            &mut self.encoded_arrays,
        ]
    }

    /// Remember the current state of every pool
    pub fn mark(&mut self) {
        for pool in self.pools_mut() {
            pool.mark();
        }
        self.marked = true;
        log::debug!("marked pool at {} classes", self.classes.len());
    }

    /// Go back to the state of the last `mark`, dropping everything interned since
    pub fn reset(&mut self) -> Result<(), Error> {
        if !self.marked {
            return Err(Error::ResetWithoutMark);
        }
        for pool in self.pools_mut() {
            pool.reset()?;
        }
        log::debug!("reset pool to {} classes", self.classes.len());
        Ok(())
    }

    /// Whether one of the sections indexed by 16-bit fields has too many entries
    pub fn has_overflowed(&self) -> bool {
        self.overflowing_section().is_some()
    }

    fn overflowing_section(&self) -> Option<(Section, usize)> {
        [
            (Section::Types, self.types.len()),
            (Section::Protos, self.protos.len()),
            (Section::Fields, self.fields.len()),
            (Section::Methods, self.methods.len()),
        ]
        .into_iter()
        .find(|(_, count)| *count > self.settings.max_index_count)
    }

    fn section_len(&self, section: Section) -> usize {
        match section {
            Section::Strings => self.strings.len(),
            Section::Types => self.types.len(),
            Section::Protos => self.protos.len(),
            Section::Fields => self.fields.len(),
            Section::Methods => self.methods.len(),
            Section::Classes => self.classes.len(),
            Section::CallSites => self.call_sites.len(),
            Section::MethodHandles => self.method_handles.len(),
            Section::TypeLists => self.type_lists.len(),
            Section::Annotations => self.annotations.len(),
            Section::AnnotationSets => self.annotation_sets.len(),
            Section::EncodedArrays => self.encoded_arrays.len(),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        [
            self.strings.len(),
            self.types.len(),
            self.protos.len(),
            self.fields.len(),
            self.methods.len(),
            self.classes.len(),
            self.call_sites.len(),
            self.method_handles.len(),
            self.type_lists.len(),
            self.annotations.len(),
            self.annotation_sets.len(),
            self.encoded_arrays.len(),
        ]
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.strings.truncate(checkpoint[0]);
        self.types.truncate(checkpoint[1]);
        self.protos.truncate(checkpoint[2]);
        self.fields.truncate(checkpoint[3]);
        self.methods.truncate(checkpoint[4]);
        self.classes.truncate(checkpoint[5]);
        self.call_sites.truncate(checkpoint[6]);
        self.method_handles.truncate(checkpoint[7]);
        self.type_lists.truncate(checkpoint[8]);
        self.annotations.truncate(checkpoint[9]);
        self.annotation_sets.truncate(checkpoint[10]);
        self.encoded_arrays.truncate(checkpoint[11]);
    }

    pub fn intern_string(&mut self, string: &str) -> StringIndex {
        match self.strings.get(string) {
            Some(index) => index,
            None => self.strings.insert(string.to_owned(), ()).0,
        }
    }

    /// Intern a type descriptor (and the descriptor string)
    pub fn intern_type(&mut self, descriptor: &str) -> TypeIndex {
        if let Some(index) = self.types.get(descriptor) {
            return index;
        }
        self.intern_string(descriptor);
        self.types.insert(descriptor.to_owned(), ()).0
    }

    /// Intern a list of types (parameters or interfaces)
    pub fn intern_type_list(&mut self, types: &[String]) -> TypeListIndex {
        if let Some(index) = self.type_lists.get(types) {
            return index;
        }
        for descriptor in types {
            self.intern_type(descriptor);
        }
        self.type_lists.insert(types.to_vec(), ()).0
    }

    /// Intern a prototype, with its shorty, return type, and parameter list
    pub fn intern_proto(&mut self, proto: &MethodProto) -> ProtoIndex {
        if let Some(index) = self.protos.get(proto) {
            return index;
        }
        self.intern_string(&proto.shorty());
        self.intern_type(&proto.return_type);
        if !proto.parameters.is_empty() {
            self.intern_type_list(&proto.parameters);
        }
        self.protos.insert(proto.clone(), ()).0
    }

    /// Intern a field reference, with its class, name, and type
    pub fn intern_field(&mut self, field: &FieldRef) -> FieldIndex {
        if let Some(index) = self.fields.get(field) {
            return index;
        }
        self.intern_type(&field.class);
        self.intern_string(&field.name);
        self.intern_type(&field.field_type);
        self.fields.insert(field.clone(), ()).0
    }

    /// Intern a method reference, with its class, name, and prototype
    pub fn intern_method(&mut self, method: &MethodRef) -> MethodIndex {
        if let Some(index) = self.methods.get(method) {
            return index;
        }
        self.intern_type(&method.class);
        self.intern_string(&method.name);
        self.intern_proto(&method.proto);
        self.methods.insert(method.clone(), ()).0
    }

    /// Intern a method handle, with the field or method it refers to
    pub fn intern_method_handle(
        &mut self,
        handle: &MethodHandleRef,
    ) -> Result<MethodHandleIndex, Error> {
        if let Some(index) = self.method_handles.get(handle) {
            return Ok(index);
        }
        handle.check()?;
        match &handle.member {
            MethodHandleMember::Field(field) => {
                self.intern_field(field);
            }
            MethodHandleMember::Method(method) => {
                self.intern_method(method);
            }
        }
        Ok(self.method_handles.insert(handle.clone(), ()).0)
    }

    /// Intern a call site, along with the encoded array of its bootstrap arguments
    pub fn intern_call_site(&mut self, call_site: &CallSiteRef) -> Result<CallSiteIndex, Error> {
        if let Some(index) = self.call_sites.get(call_site) {
            return Ok(index);
        }
        self.intern_encoded_array(&call_site.encoded_call_site())?;
        Ok(self.call_sites.insert(call_site.clone(), ()).0)
    }

    /// Intern an array of values, with everything the values refer to
    pub fn intern_encoded_array(
        &mut self,
        values: &[EncodedValue],
    ) -> Result<EncodedArrayIndex, Error> {
        if let Some(index) = self.encoded_arrays.get(values) {
            return Ok(index);
        }
        for value in values {
            self.intern_encoded_value(value)?;
        }
        Ok(self.encoded_arrays.insert(values.to_vec(), ()).0)
    }

    /// Intern everything a value refers to
    ///
    /// Values themselves are not pooled, only the arrays containing them.
    pub fn intern_encoded_value(&mut self, value: &EncodedValue) -> Result<(), Error> {
        match value {
            EncodedValue::Byte(_)
            | EncodedValue::Short(_)
            | EncodedValue::Char(_)
            | EncodedValue::Int(_)
            | EncodedValue::Long(_)
            | EncodedValue::Float(_)
            | EncodedValue::Double(_)
            | EncodedValue::Null
            | EncodedValue::Boolean(_) => (),
            EncodedValue::MethodType(proto) => {
                self.intern_proto(proto);
            }
            EncodedValue::MethodHandle(handle) => {
                self.intern_method_handle(handle)?;
            }
            EncodedValue::String(string) => {
                self.intern_string(string);
            }
            EncodedValue::Type(descriptor) => {
                self.intern_type(descriptor);
            }
            EncodedValue::Field(field) | EncodedValue::Enum(field) => {
                self.intern_field(field);
            }
            EncodedValue::Method(method) => {
                self.intern_method(method);
            }
            EncodedValue::Array(values) => {
                for value in values {
                    self.intern_encoded_value(value)?;
                }
            }
            EncodedValue::Annotation(annotation) => self.intern_encoded_annotation(annotation)?,
        }
        Ok(())
    }

    fn intern_encoded_annotation(&mut self, annotation: &EncodedAnnotation) -> Result<(), Error> {
        self.intern_type(&annotation.annotation_type);
        for element in annotation.elements() {
            self.intern_string(&element.name);
            self.intern_encoded_value(&element.value)?;
        }
        Ok(())
    }

    pub fn intern_annotation(&mut self, annotation: &Annotation) -> Result<AnnotationIndex, Error> {
        if let Some(index) = self.annotations.get(annotation) {
            return Ok(index);
        }
        self.intern_encoded_annotation(&annotation.annotation)?;
        Ok(self.annotations.insert(annotation.clone(), ()).0)
    }

    /// Intern a set of annotations, unless it is empty
    pub fn intern_annotation_set(
        &mut self,
        set: &AnnotationSet,
    ) -> Result<Option<AnnotationSetIndex>, Error> {
        if set.is_empty() {
            return Ok(None);
        }
        if let Some(index) = self.annotation_sets.get(set) {
            return Ok(Some(index));
        }
        for annotation in set.annotations() {
            self.intern_annotation(annotation)?;
        }
        Ok(Some(self.annotation_sets.insert(set.clone(), ()).0))
    }

    /// Intern whatever an instruction refers to
    pub fn intern_reference(&mut self, reference: Reference<'_>) -> Result<(), Error> {
        match reference {
            Reference::String(string) => {
                self.intern_string(string);
            }
            Reference::Type(descriptor) => {
                self.intern_type(descriptor);
            }
            Reference::Field(field) => {
                self.intern_field(field);
            }
            Reference::Method(method) => {
                self.intern_method(method);
            }
            Reference::Proto(proto) => {
                self.intern_proto(proto);
            }
            Reference::CallSite(call_site) => {
                self.intern_call_site(call_site)?;
            }
            Reference::MethodHandle(handle) => {
                self.intern_method_handle(handle)?;
            }
        }
        Ok(())
    }

    /// Intern a class and everything it refers to
    ///
    /// This either interns the whole class or, if anything about the class is invalid, leaves
    /// every pool as it was before the call.
    pub fn intern_class(&mut self, class: &ClassDef) -> Result<ClassIndex, Error> {
        if self.classes.contains(class.class_type.as_str()) {
            return Err(Error::ClassAlreadyInterned(class.class_type.clone()));
        }
        check_unique_members(class)?;

        let checkpoint = self.checkpoint();
        match self.intern_class_contents(class) {
            Ok(()) => {
                let (index, _) = self.classes.insert(class.class_type.clone(), class.clone());
                log::debug!("interned class {} as {:?}", class.class_type, index);
                Ok(index)
            }
            Err(err) => {
                self.rollback(checkpoint);
                log::debug!("rolled back class {}: {}", class.class_type, err);
                Err(err)
            }
        }
    }

    fn intern_class_contents(&mut self, class: &ClassDef) -> Result<(), Error> {
        self.intern_type(&class.class_type);
        if let Some(superclass) = &class.superclass {
            self.intern_type(superclass);
        }
        if !class.interfaces.is_empty() {
            self.intern_type_list(&class.interfaces);
        }
        if let Some(source_file) = &class.source_file {
            self.intern_string(source_file);
        }
        self.intern_annotation_set(&class.annotations)?;

        for field in class.fields() {
            self.intern_field(&field.reference(&class.class_type));
            if let Some(value) = &field.initial_value {
                self.intern_encoded_value(value)?;
            }
            self.intern_annotation_set(&field.annotations)?;
        }
        if let Some(static_values) = class.static_initializers() {
            self.intern_encoded_array(&static_values)?;
        }

        for method in class.methods() {
            self.intern_method(&method.reference(&class.class_type));
            self.intern_annotation_set(&method.annotations)?;
            for parameter in &method.parameters {
                self.intern_annotation_set(&parameter.annotations)?;
                if let Some(name) = &parameter.name {
                    self.intern_string(name);
                }
            }
            if let Some(implementation) = &method.implementation {
                self.intern_implementation(class, method, implementation)?;
            }
        }
        Ok(())
    }

    /// Intern what instructions, handlers, and debug items of a method body refer to
    fn intern_implementation(
        &mut self,
        class: &ClassDef,
        method: &Method,
        implementation: &MethodImplementation,
    ) -> Result<(), Error> {
        if implementation.instructions.is_empty() && !implementation.try_blocks.is_empty() {
            return Err(Error::TryBlocksWithoutInstructions {
                class: class.class_type.clone(),
                method: method.short_descriptor(),
            });
        }

        for resolved in &implementation.instructions {
            if let Some(reference) = resolved.instruction.reference() {
                self.intern_reference(reference)?;
            }
        }

        for try_block in &implementation.try_blocks {
            for handler in &try_block.handlers {
                if let Some(exception_type) = &handler.exception_type {
                    self.intern_type(exception_type);
                }
            }
        }

        for debug_item in &implementation.debug_items {
            match &debug_item.item {
                DebugItem::StartLocal {
                    name,
                    local_type,
                    signature,
                    ..
                } => {
                    if let Some(name) = name {
                        self.intern_string(name);
                    }
                    if let Some(local_type) = local_type {
                        self.intern_type(local_type);
                    }
                    if let Some(signature) = signature {
                        self.intern_string(signature);
                    }
                }
                DebugItem::SetSourceFile(Some(source_file)) => {
                    self.intern_string(source_file);
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Assign final indices to every section
    ///
    /// Strings sort in UTF-16 order and the id sections that refer to them sort by those strings.
    /// Classes come after their superclass and interfaces. The data sections keep the order
    /// entries were interned in, except call sites, which follow their encoded arrays.
    pub fn lay_out(&mut self) {
        self.strings.sort_by(|s1, s2| compare_utf16(s1, s2));
        self.types.sort_by(|t1, t2| compare_utf16(t1, t2));
        self.protos.sort_by(compare_protos);
        self.fields.sort_by(|f1, f2| {
            compare_utf16(&f1.class, &f2.class)
                .then_with(|| compare_utf16(&f1.name, &f2.name))
                .then_with(|| compare_utf16(&f1.field_type, &f2.field_type))
        });
        self.methods.sort_by(|m1, m2| {
            compare_utf16(&m1.class, &m2.class)
                .then_with(|| compare_utf16(&m1.name, &m2.name))
                .then_with(|| compare_protos(&m1.proto, &m2.proto))
        });

        let class_order = self.class_order();
        self.classes.lay_out(class_order);

        let encoded_arrays = &self.encoded_arrays;
        self.call_sites.sort_by(|c1, c2| {
            let position = |call_site: &CallSiteRef| {
                encoded_arrays
                    .get(call_site.encoded_call_site().as_slice())
                    .map(|index| index.0)
            };
            position(c1).cmp(&position(c2))
        });

        self.method_handles.keep_insertion_order();
        self.type_lists.keep_insertion_order();
        self.annotations.keep_insertion_order();
        self.annotation_sets.keep_insertion_order();
        self.encoded_arrays.keep_insertion_order();

        log::debug!(
            "laid out pool: {} strings, {} types, {} protos, {} fields, {} methods, {} classes",
            self.strings.len(),
            self.types.len(),
            self.protos.len(),
            self.fields.len(),
            self.methods.len(),
            self.classes.len(),
        );
    }

    /// Classes in type order, except that supertypes defined in the pool come first
    fn class_order(&self) -> Vec<usize> {
        let mut by_type: Vec<(ClassIndex, &String)> =
            self.classes.iter().map(|(index, key, _)| (index, key)).collect();
        by_type.sort_by(|(_, t1), (_, t2)| compare_utf16(t1, t2));

        let mut order: Vec<usize> = Vec::with_capacity(by_type.len());
        let mut visited: HashSet<usize> = HashSet::new();
        for (index, _) in by_type {
            self.visit_class(index, &mut visited, &mut order);
        }
        order
    }

    fn visit_class(&self, index: ClassIndex, visited: &mut HashSet<usize>, order: &mut Vec<usize>) {
        if !visited.insert(index.position()) {
            return;
        }
        if let Some((_, class)) = self.classes.entry(index) {
            for supertype in class.superclass.iter().chain(class.interfaces.iter()) {
                if let Some(super_index) = self.classes.get(supertype.as_str()) {
                    self.visit_class(super_index, visited, order);
                }
            }
        }
        order.push(index.position());
    }

    pub fn type_list_index(&self, types: &[String]) -> Result<u32, Error> {
        self.type_lists.final_index(types)
    }

    pub fn annotation_index(&self, annotation: &Annotation) -> Result<u32, Error> {
        self.annotations.final_index(annotation)
    }

    pub fn annotation_set_index(&self, set: &AnnotationSet) -> Result<u32, Error> {
        self.annotation_sets.final_index(set)
    }

    pub fn encoded_array_index(&self, values: &[EncodedValue]) -> Result<u32, Error> {
        self.encoded_arrays.final_index(values)
    }
}

impl Default for DexPool {
    fn default() -> DexPool {
        DexPool::new()
    }
}

/// Final indices of the id sections, once the pool is laid out
impl ReferenceIndexer for DexPool {
    fn string_index(&self, string: &str) -> Result<u32, Error> {
        self.strings.final_index(string)
    }

    fn type_index(&self, descriptor: &str) -> Result<u32, Error> {
        self.types.final_index(descriptor)
    }

    fn proto_index(&self, proto: &MethodProto) -> Result<u32, Error> {
        self.protos.final_index(proto)
    }

    fn field_index(&self, field: &FieldRef) -> Result<u32, Error> {
        self.fields.final_index(field)
    }

    fn method_index(&self, method: &MethodRef) -> Result<u32, Error> {
        self.methods.final_index(method)
    }

    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, Error> {
        self.call_sites.final_index(call_site)
    }

    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, Error> {
        self.method_handles.final_index(handle)
    }
}

/// Order of prototypes: by return type, then by parameter list
fn compare_protos(p1: &MethodProto, p2: &MethodProto) -> Ordering {
    compare_utf16(&p1.return_type, &p2.return_type).then_with(|| {
        for (t1, t2) in p1.parameters.iter().zip(p2.parameters.iter()) {
            match compare_utf16(t1, t2) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        p1.parameters.len().cmp(&p2.parameters.len())
    })
}

/// Fields must be unique by name and type, methods by name and prototype
fn check_unique_members(class: &ClassDef) -> Result<(), Error> {
    let mut seen: HashSet<String> = HashSet::new();
    for field in class.fields() {
        if !seen.insert(field.short_descriptor()) {
            return Err(Error::DuplicateField {
                class: class.class_type.clone(),
                field: field.short_descriptor(),
            });
        }
    }

    seen.clear();
    for method in class.methods() {
        if !seen.insert(method.short_descriptor()) {
            return Err(Error::DuplicateMethod {
                class: class.class_type.clone(),
                method: method.short_descriptor(),
            });
        }
    }
    Ok(())
}
