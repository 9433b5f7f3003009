//! mbclient: one-shot Modbus client
//!
//! Arguments are validated into a [`request::RequestPlan`] before any link
//! is opened; [`client::run`] then sends exactly one request.

pub mod bootstrap;
pub mod client;
pub mod functions;
pub mod output;
pub mod request;

pub use client::{run, Client};
pub use functions::{FunctionSpec, Payload, FUNCTIONS};
pub use request::{build_plan, RequestPlan};
