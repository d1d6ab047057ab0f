pub mod job;
pub mod safety;

pub use job::*;
pub use safety::*;
