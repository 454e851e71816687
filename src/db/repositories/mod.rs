pub mod memory_repository;
pub mod poll_repository;

pub use memory_repository::*;
pub use poll_repository::*;
