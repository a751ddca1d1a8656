mod leb128;

pub use leb128::*;

/// Elements with a width measured in some fixed unit (eg. code units for instructions)
pub trait Width {
    fn width(&self) -> usize;
}
