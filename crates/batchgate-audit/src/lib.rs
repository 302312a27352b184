pub mod entry;
pub mod log;

pub use entry::*;
pub use log::*;
