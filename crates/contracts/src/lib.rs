//! # Contracts
//!
//! Frozen interface contracts shared by every batchline crate: events and
//! outcomes, the error taxonomy, sink/checkpoint capability traits and the
//! configuration blueprint.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Identity Model
//! - Every `Event` carries a stable `EventId`
//! - Outcomes are attributed by `EventId`, never by position in a response

mod blueprint;
mod checkpoint;
mod error;
mod error_kind;
mod event;
mod event_id;
mod outcome;
mod sink;

pub use blueprint::*;
pub use checkpoint::*;
pub use error::*;
pub use error_kind::ErrorKind;
pub use event::*;
pub use event_id::EventId;
pub use outcome::*;
pub use sink::*;
