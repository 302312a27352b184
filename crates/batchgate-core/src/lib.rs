pub mod document;
pub mod error;
pub mod gate;
pub mod ids;
pub mod interval;
pub mod model;
pub mod queue;
pub mod task;

pub use document::*;
pub use error::*;
pub use gate::*;
pub use ids::*;
pub use interval::*;
pub use model::*;
pub use queue::*;
pub use task::*;
