//! Cluster placement core.
//!
//! Given a hierarchical topology of physical resources (§[`node`]), a set
//! of reservations (§[`allocation`]), and a set of applications with
//! resource demands and constraints (§[`application`]), decides which
//! application runs on which server at each scheduling cycle.
//!
//! The driver is [`placement::schedule`] (exposed as [`cell::Cell::schedule`]):
//! flatten allocations into a priority queue, attempt placement top-down
//! through the node tree respecting traits/labels/capacity/affinity,
//! evict lower-priority applications and retry if needed, and record the
//! placement transitions for the cycle. `schedule()` is synchronous and
//! reads/mutates its [`Cell`] in place; there is no network I/O,
//! persistent storage format, or container runtime interaction here; those
//! are a collaborator's concern, loading topology/application state
//! before a cycle and persisting placement decisions after one.

pub mod allocation;
pub mod application;
pub mod cell;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;
pub mod placement;
pub mod resources;
pub mod traits;

pub use allocation::{Allocation, QueueEntry};
pub use application::Application;
pub use cell::Cell;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Time};
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use identity::IdentityGroup;
pub use node::{Server, ServerState, Strategy};
pub use placement::PlacementChange;
pub use resources::ResourceVector;
pub use traits::TraitMask;
