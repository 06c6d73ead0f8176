//! Component E of the gateway specification: the per-direction publishing
//! pipeline (reconnect loop, persistence drain, direct-publish fast path).

mod pipeline;

pub use pipeline::Publisher;
