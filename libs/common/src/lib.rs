//! mbutils basic library
//!
//! Provides functions shared by the server and the client:
//! - logging setup
//! - shutdown signal handling
//! - common command-line arguments
//! - integer and hex helpers used for wire dumps and option parsing

pub mod bootstrap_args;
pub mod hex;
pub mod logging;
pub mod parse;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use parse::{parse_int, parse_int_as};
