use std::fmt;

/// Index of an entry in one of the pools of a [`super::DexPool`]
///
/// Before layout these are provisional: they count entries in the order they were first interned.
/// Final indices, as written to the file, are assigned during layout.
pub trait PoolIndex: Copy + Eq + fmt::Debug {
    fn from_position(position: usize) -> Self;
    fn position(self) -> usize;
}

macro_rules! pool_index {
    ($($(#[$attr:meta])* $name:ident,)*) => {
        $(
            $(#[$attr])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
            pub struct $name(pub u32);

            impl PoolIndex for $name {
                fn from_position(position: usize) -> $name {
                    $name(position as u32)
                }

                fn position(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

pool_index! {
    StringIndex,
    TypeIndex,
    ProtoIndex,
    FieldIndex,
    MethodIndex,
    ClassIndex,
    CallSiteIndex,
    MethodHandleIndex,

    /// Index of a parameter or interface list
    TypeListIndex,

    AnnotationIndex,
    AnnotationSetIndex,

    /// Index of a static initializer or call site array
    EncodedArrayIndex,
}
