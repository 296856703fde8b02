pub mod compiler;
pub mod connection_pool;
pub mod dialect; // Column-family and relational rule sets
pub mod executor;
pub mod native; // Collaborator traits each backing store implements
pub mod publication;
pub mod query_service;
pub mod schema_mapper;
pub mod translator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use compiler::*;
pub use connection_pool::*;
pub use executor::*;
pub use publication::*;
pub use query_service::*;
pub use schema_mapper::*;
pub use translator::*;
