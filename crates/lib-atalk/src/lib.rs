pub mod link;
pub mod port;
pub mod service;
pub mod tables;
pub mod types;

mod constants;
mod error;
mod router;

pub use constants::*;
pub use error::*;
pub use router::*;
