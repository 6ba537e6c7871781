//! PostgreSQL wire protocol.
//!
//! - `backend`: server to client messages (parsing)
//! - `frontend`: client to server messages (encoding)
//! - `codec`: encoding and decoding primitives
//! - `types`: format codes, transaction status and type oids

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
