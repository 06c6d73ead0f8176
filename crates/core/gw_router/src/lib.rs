//! Component D of the gateway specification: the per-transport inbound
//! handler registry and its cooperative dispatch queue.

mod handler;
mod router;

pub use handler::Handler;
pub use router::Router;
