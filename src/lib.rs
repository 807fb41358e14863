pub mod config;
pub mod db;
pub mod profile;
pub mod quest;
pub mod signal;

pub use signal::{Connection, Signal};
