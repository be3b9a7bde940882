pub mod config;
pub mod decoder;
pub mod error;
pub mod model;
pub mod output;
pub mod reactor;
pub mod solver;
pub mod storage;
pub mod transport;
pub mod util;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
