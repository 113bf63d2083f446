pub mod backend;
pub mod config;
pub mod course;
pub mod enrollment;
pub mod error;
pub mod progress;
pub mod session;
pub mod sync;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
