//! Core types and traits for the display job dispatcher.
//!
//! The job model and its state machine live here together with the two seams the
//! dispatcher is built on: [`JobStore`] and [`QueueAdapter`].

mod dto;
mod error;
mod job;
mod message;
mod traits;

pub use dto::*;
pub use error::*;
pub use job::*;
pub use message::*;
pub use traits::*;
