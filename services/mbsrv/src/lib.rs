//! mbsrv: Modbus server over a serial line (RTU) or TCP
//!
//! - [`store`]: the four register banks shared by every connection
//! - [`dispatch`]: applies one request PDU to the store
//! - [`backend`]: listening and accepting for each transport
//! - [`session`]: request/response loop on one connection
//! - [`multiplexer`]: runs sessions until shutdown

pub mod backend;
pub mod bootstrap;
pub mod dispatch;
pub mod multiplexer;
pub mod session;
pub mod settings;
pub mod store;

pub use backend::{create_session, Backend, BackendError, Connection, SessionContext};
pub use multiplexer::{Multiplexer, MultiplexerOptions};
pub use session::{CloseReason, Session, SessionOptions, SessionState, SessionSummary};
pub use settings::ServerSettings;
pub use store::{Bank, BankSizes, RegisterStore, StoreError};
