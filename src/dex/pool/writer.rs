use super::{write_encoded_annotation, write_encoded_array, DexPool, Section};
use crate::dex::code::ReferenceIndexer;
use crate::dex::model::ClassDef;
use crate::dex::{
    encode_modified_utf8, utf16_len, ClassAccessFlags, Error, MethodHandleMember, Serialize,
    NO_INDEX,
};
use crate::util::write_uleb128;
use byteorder::WriteBytesExt;
use std::io::Result as IoResult;

/// Lays out a [`DexPool`] and emits its sections
///
/// ```
/// use dexbuild::dex::model::ClassDef;
/// use dexbuild::dex::pool::{DexPool, PoolWriter};
/// use dexbuild::dex::ClassAccessFlags;
///
/// let mut pool = DexPool::new();
/// let mut writer = PoolWriter::new(&mut pool);
/// let class = ClassDef::new("LEmpty;", ClassAccessFlags::PUBLIC, None);
/// writer.add_classes([&class]).unwrap();
///
/// let sections = writer.write().unwrap();
/// assert_eq!(sections.class_defs.len(), 1);
/// assert_eq!(sections.string_ids.len(), 1);
/// ```
pub struct PoolWriter<'p> {
    pool: &'p mut DexPool,
}

/// `string_data`, `type_list`, and similar items of one kind, back to back
///
/// Id sections refer to these items by position. The writer of the enclosing file rebases those
/// positions into file offsets using `offsets`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DataSection {
    pub bytes: Vec<u8>,

    /// Offset of every item, relative to the start of `bytes`
    pub offsets: Vec<u32>,
}

impl DataSection {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Bytes of the item at a position, up to the start of the next item
    pub fn item(&self, position: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(position)? as usize;
        let end = self
            .offsets
            .get(position + 1)
            .map_or(self.bytes.len(), |end| *end as usize);
        Some(&self.bytes[start..end])
    }

    /// Pad with zeroes up to a multiple of `alignment`
    fn align(&mut self, alignment: usize) {
        while self.bytes.len() % alignment != 0 {
            self.bytes.push(0);
        }
    }

    fn start_item(&mut self, alignment: usize) {
        self.align(alignment);
        self.offsets.push(self.bytes.len() as u32);
    }
}

/// Every pool-backed section of a dex file, in final order
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DexSections {
    /// Position of each string in `string_data`
    pub string_ids: Vec<u32>,

    /// String index of each type descriptor
    pub type_ids: Vec<u32>,

    pub proto_ids: Vec<ProtoId>,
    pub field_ids: Vec<FieldId>,
    pub method_ids: Vec<MethodId>,
    pub class_defs: Vec<ClassDefItem>,

    /// Position of each call site in `encoded_arrays`
    pub call_site_ids: Vec<u32>,

    pub method_handles: Vec<MethodHandleItem>,

    pub string_data: DataSection,
    pub type_lists: DataSection,
    pub annotations: DataSection,
    pub annotation_sets: DataSection,
    pub encoded_arrays: DataSection,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ProtoId {
    pub shorty: u32,
    pub return_type: u32,

    /// Position in `type_lists`, or `NO_INDEX` for no parameters
    pub parameters: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FieldId {
    pub class: u16,
    pub field_type: u16,
    pub name: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MethodId {
    pub class: u16,
    pub proto: u16,
    pub name: u32,
}

/// Pool-backed parts of a `class_def_item`
///
/// Member lists and code live in `class_data_item`s, which are left to the writer of the
/// enclosing file. Missing indices and positions are `NO_INDEX`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClassDefItem {
    pub class: u32,
    pub access_flags: ClassAccessFlags,
    pub superclass: u32,

    /// Position in `type_lists`
    pub interfaces: u32,

    pub source_file: u32,

    /// Position of the class annotations in `annotation_sets`
    pub annotations: u32,

    /// Position in `encoded_arrays`
    pub static_values: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MethodHandleItem {
    pub kind: u16,
    pub member: u16,
}

impl Serialize for ProtoId {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.shorty.serialize(writer)?;
        self.return_type.serialize(writer)?;
        self.parameters.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for FieldId {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.class.serialize(writer)?;
        self.field_type.serialize(writer)?;
        self.name.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for MethodId {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.class.serialize(writer)?;
        self.proto.serialize(writer)?;
        self.name.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for MethodHandleItem {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.kind.serialize(writer)?;
        0u16.serialize(writer)?;
        self.member.serialize(writer)?;
        0u16.serialize(writer)?;
        Ok(())
    }
}

impl<'p> PoolWriter<'p> {
    pub fn new(pool: &'p mut DexPool) -> PoolWriter<'p> {
        PoolWriter { pool }
    }

    pub fn pool(&self) -> &DexPool {
        self.pool
    }

    /// Intern classes, stopping at the first one that fails
    pub fn add_classes<'c>(
        &mut self,
        classes: impl IntoIterator<Item = &'c ClassDef>,
    ) -> Result<(), Error> {
        for class in classes {
            self.pool.intern_class(class)?;
        }
        Ok(())
    }

    /// Lay out the pool and emit every section
    pub fn write(self) -> Result<DexSections, Error> {
        if let Some((section, count)) = self.pool.overflowing_section() {
            return Err(Error::PoolOverflow { section, count });
        }
        self.pool.lay_out();
        let pool: &DexPool = self.pool;

        let mut sections = DexSections::default();

        for (string, _) in pool.strings.sorted()? {
            sections.string_ids.push(sections.string_data.len() as u32);
            sections.string_data.start_item(1);
            let bytes = &mut sections.string_data.bytes;
            write_uleb128(bytes, utf16_len(string) as u32)?;
            bytes.extend(encode_modified_utf8(string));
            bytes.push(0);
        }

        for (descriptor, _) in pool.types.sorted()? {
            sections.type_ids.push(pool.string_index(descriptor)?);
        }

        for (types, _) in pool.type_lists.sorted()? {
            let data = &mut sections.type_lists;
            data.start_item(4);
            (types.len() as u32).serialize(&mut data.bytes)?;
            for descriptor in types {
                let index = narrow(pool, Section::Types, pool.type_index(descriptor)?)?;
                index.serialize(&mut data.bytes)?;
            }
        }

        for (proto, _) in pool.protos.sorted()? {
            let parameters = if proto.parameters.is_empty() {
                NO_INDEX
            } else {
                pool.type_list_index(&proto.parameters)?
            };
            sections.proto_ids.push(ProtoId {
                shorty: pool.string_index(&proto.shorty())?,
                return_type: pool.type_index(&proto.return_type)?,
                parameters,
            });
        }

        for (field, _) in pool.fields.sorted()? {
            sections.field_ids.push(FieldId {
                class: narrow(pool, Section::Types, pool.type_index(&field.class)?)?,
                field_type: narrow(pool, Section::Types, pool.type_index(&field.field_type)?)?,
                name: pool.string_index(&field.name)?,
            });
        }

        for (method, _) in pool.methods.sorted()? {
            sections.method_ids.push(MethodId {
                class: narrow(pool, Section::Types, pool.type_index(&method.class)?)?,
                proto: narrow(pool, Section::Protos, pool.proto_index(&method.proto)?)?,
                name: pool.string_index(&method.name)?,
            });
        }

        for (handle, _) in pool.method_handles.sorted()? {
            let member = match &handle.member {
                MethodHandleMember::Field(field) => {
                    narrow(pool, Section::Fields, pool.field_index(field)?)?
                }
                MethodHandleMember::Method(method) => {
                    narrow(pool, Section::Methods, pool.method_index(method)?)?
                }
            };
            sections.method_handles.push(MethodHandleItem {
                kind: handle.kind.raw(),
                member,
            });
        }

        for (annotation, _) in pool.annotations.sorted()? {
            let data = &mut sections.annotations;
            data.start_item(1);
            data.bytes.push(annotation.visibility.raw());
            write_encoded_annotation(&mut data.bytes, &annotation.annotation, pool)?;
        }

        for (set, _) in pool.annotation_sets.sorted()? {
            let mut entries: Vec<(u32, u32)> = set
                .annotations()
                .iter()
                .map(|annotation| {
                    Ok((
                        pool.type_index(&annotation.annotation.annotation_type)?,
                        pool.annotation_index(annotation)?,
                    ))
                })
                .collect::<Result<_, Error>>()?;
            entries.sort_unstable();

            let data = &mut sections.annotation_sets;
            data.start_item(4);
            (entries.len() as u32).serialize(&mut data.bytes)?;
            for (_, annotation) in entries {
                annotation.serialize(&mut data.bytes)?;
            }
        }

        for (values, _) in pool.encoded_arrays.sorted()? {
            let data = &mut sections.encoded_arrays;
            data.start_item(1);
            write_encoded_array(&mut data.bytes, values, pool)?;
        }

        for (call_site, _) in pool.call_sites.sorted()? {
            sections
                .call_site_ids
                .push(pool.encoded_array_index(&call_site.encoded_call_site())?);
        }

        for (_, class) in pool.classes.sorted()? {
            sections.class_defs.push(class_def_item(pool, class)?);
        }

        log::debug!(
            "wrote {} class defs with {} bytes of string data",
            sections.class_defs.len(),
            sections.string_data.bytes.len()
        );
        Ok(sections)
    }
}

fn class_def_item(pool: &DexPool, class: &ClassDef) -> Result<ClassDefItem, Error> {
    let optional_type = |descriptor: Option<&String>| match descriptor {
        Some(descriptor) => pool.type_index(descriptor),
        None => Ok(NO_INDEX),
    };
    let interfaces = if class.interfaces.is_empty() {
        NO_INDEX
    } else {
        pool.type_list_index(&class.interfaces)?
    };
    let source_file = match &class.source_file {
        Some(source_file) => pool.string_index(source_file)?,
        None => NO_INDEX,
    };
    let annotations = if class.annotations.is_empty() {
        NO_INDEX
    } else {
        pool.annotation_set_index(&class.annotations)?
    };
    let static_values = match class.static_initializers() {
        Some(values) => pool.encoded_array_index(&values)?,
        None => NO_INDEX,
    };

    Ok(ClassDefItem {
        class: pool.type_index(&class.class_type)?,
        access_flags: class.access_flags,
        superclass: optional_type(class.superclass.as_ref())?,
        interfaces,
        source_file,
        annotations,
        static_values,
    })
}

/// Fit an index into a 16-bit field
fn narrow(pool: &DexPool, section: Section, index: u32) -> Result<u16, Error> {
    u16::try_from(index).map_err(|_| Error::PoolOverflow {
        section,
        count: pool.section_len(section),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::model::{Field, Method, MethodParameter};
    use crate::dex::{
        Annotation, AnnotationSet, AnnotationVisibility, EncodedAnnotation, EncodedValue,
        FieldAccessFlags, MethodAccessFlags, Settings,
    };

    fn sample_class() -> ClassDef {
        let mut class = ClassDef::new(
            "LSample;",
            ClassAccessFlags::PUBLIC,
            Some(String::from("Ljava/lang/Object;")),
        );
        class.interfaces.push(String::from("Ljava/lang/Runnable;"));
        class.annotations = AnnotationSet::new(vec![Annotation {
            visibility: AnnotationVisibility::Runtime,
            annotation: EncodedAnnotation::new("LMarker;", vec![]),
        }]);

        let mut field = Field::new("LIMIT", "I", FieldAccessFlags::STATIC);
        field.initial_value = Some(EncodedValue::Int(10));
        class.add_field(field);

        class.add_method(Method::new(
            "run",
            vec![],
            "V",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        ));
        class.add_method(Method::new(
            "max",
            vec![MethodParameter::new("I"), MethodParameter::new("I")],
            "I",
            MethodAccessFlags::STATIC,
        ));
        class
    }

    #[test]
    fn id_sections() {
        let mut pool = DexPool::new();
        let mut writer = PoolWriter::new(&mut pool);
        writer.add_classes([&sample_class()]).unwrap();
        let sections = writer.write().unwrap();

        // Strings: I, III, LIMIT, LMarker;, LSample;, Ljava/lang/Object;, Ljava/lang/Runnable;,
        // V, max, run
        assert_eq!(sections.string_ids.len(), 10);
        assert_eq!(sections.string_data.item(0), Some(&[1, b'I', 0][..]));
        assert_eq!(sections.type_ids, vec![0, 3, 4, 5, 6, 7]);

        // Protos: ()V then (II)I, sorted by return type
        assert_eq!(
            sections.proto_ids,
            vec![
                ProtoId {
                    shorty: 1,
                    return_type: 0,
                    parameters: 1,
                },
                ProtoId {
                    shorty: 7,
                    return_type: 5,
                    parameters: NO_INDEX,
                },
            ]
        );
        assert_eq!(
            sections.field_ids,
            vec![FieldId {
                class: 2,
                field_type: 0,
                name: 2,
            }]
        );
        assert_eq!(
            sections.method_ids,
            vec![
                MethodId {
                    class: 2,
                    proto: 0,
                    name: 8,
                },
                MethodId {
                    class: 2,
                    proto: 1,
                    name: 9,
                },
            ]
        );

        let class_def = &sections.class_defs[0];
        assert_eq!(class_def.class, 2);
        assert_eq!(class_def.superclass, 3);
        assert_eq!(class_def.source_file, NO_INDEX);
        // Items run up to the next one, alignment padding included
        let interfaces = sections.type_lists.item(class_def.interfaces as usize).unwrap();
        assert_eq!(interfaces, &[1, 0, 0, 0, 4, 0, 0, 0][..]);
        assert_eq!(
            sections.encoded_arrays.item(class_def.static_values as usize),
            Some(&[1, 0x04, 10][..])
        );
        assert_ne!(class_def.annotations, NO_INDEX);
    }

    #[test]
    fn data_items_are_aligned() {
        let mut pool = DexPool::new();
        let mut writer = PoolWriter::new(&mut pool);
        writer.add_classes([&sample_class()]).unwrap();
        let sections = writer.write().unwrap();

        assert_eq!(sections.type_lists.len(), 2);
        for offset in &sections.type_lists.offsets {
            assert_eq!(offset % 4, 0);
        }
        for offset in &sections.annotation_sets.offsets {
            assert_eq!(offset % 4, 0);
        }
    }

    #[test]
    fn overflow_is_an_error() {
        let mut pool = DexPool::with_settings(Settings {
            max_index_count: 3,
            ..Settings::default()
        });
        let mut writer = PoolWriter::new(&mut pool);
        writer.add_classes([&sample_class()]).unwrap();
        assert!(matches!(
            writer.write(),
            Err(Error::PoolOverflow {
                section: Section::Types,
                count: 6
            })
        ));
    }
}
