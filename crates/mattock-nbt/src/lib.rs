pub mod nbt;
pub mod reader;

pub use nbt::*;
pub use reader::*;
