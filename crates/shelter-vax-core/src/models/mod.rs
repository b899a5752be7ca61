//! Domain models for the shelter vaccination system.

mod animal;
mod dose;
mod protocol;
mod vaccine;

pub use animal::*;
pub use dose::*;
pub use protocol::*;
pub use vaccine::*;
