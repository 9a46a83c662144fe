//! Mock implementations of the submitter's collaborators for testing.

mod channel;
mod finisher;
mod resolver;

pub use channel::{Channel, Pool, Pushed};
pub use finisher::{Event, Finisher};
pub use resolver::Resolver;
