pub mod db;
mod locations;
pub mod models;
mod tables;
mod tokens;

pub use db::{Database, DatabaseError};
pub use tables::*;
