//! BeamLink Protocol (BLP) v1.0 handshake.

mod constants;
mod engine;
mod session;
mod types;

pub use constants::*;
pub use engine::*;
pub use session::*;
pub use types::*;
