//! Class definitions, as handed to the pool for interning

mod class;
mod field;
mod method;

pub use class::*;
pub use field::*;
pub use method::*;
