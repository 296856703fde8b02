pub mod command;
pub mod execution;
pub mod metadata;
pub mod types;

pub use command::*;
pub use execution::*;
pub use metadata::*;
pub use types::*;
