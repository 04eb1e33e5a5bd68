//! Individual probe primitives used by the cascade.

pub mod command;
pub mod http;
pub mod tcp;

pub use command::{CommandOutput, CustomProbe};
pub use http::{Classification, HttpProber, HttpResponse, classify};
pub use tcp::dial;
