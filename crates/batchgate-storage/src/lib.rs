pub mod json_file;
pub mod lock;
pub mod memory;
pub mod traits;

pub use json_file::*;
pub use lock::*;
pub use memory::*;
pub use traits::*;
