//! Clock abstraction and calendar arithmetic.
//!
//! Every date the engine stores is a *shelter day*: the calendar date of an
//! instant seen from the shelter's configured UTC offset.

mod clock;
mod dates;

pub use clock::*;
pub use dates::*;
