//! Blocking driver for the state machines.

mod conn;
mod connect;
mod stream;

pub use conn::Conn;
pub use connect::{Connector, ROLE_QUERY};
pub use stream::{Socket, Stream};
