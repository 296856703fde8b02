pub mod command_validator;

pub use command_validator::*;
