#[macro_use]
extern crate tracing;

pub mod config;
pub mod db;
pub mod error;
pub mod polls;
pub mod realtime;
pub mod startup;
pub mod store;
pub mod votes;
