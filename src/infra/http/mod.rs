//! REST transport used by the cache to reach the content backend.

mod rest;
mod transport;

pub use rest::RestTransport;
pub use transport::{Transport, WriteMethod};
