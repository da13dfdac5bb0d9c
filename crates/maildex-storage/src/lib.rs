pub mod blob;
pub mod db;
pub mod kv;
pub mod models;
pub mod queue;
pub mod schema;
pub mod timefmt;
pub mod vector;

mod error;

pub use error::{Error, Result};
