//! Class file structures needed to emit (and read back) a `StackMapTable` attribute
//!
//! Everything here is serialized with [`Serialize`], which writes the big-endian layouts the
//! class file format uses.

mod attribute;
mod constants;
mod serialize;
mod stack_map;

pub use attribute::*;
pub use constants::*;
pub use serialize::*;
pub use stack_map::*;
