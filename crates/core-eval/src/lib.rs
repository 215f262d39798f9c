//! The evaluator: feeds, levels, the step state machine, action
//! fulfillment and specialization, non-local flow, and the boot-time
//! catalogs.
//!
//! Everything runs against an owned [`Machine`]; there is no process
//! state. The canonical entry points are [`Machine::startup`] and
//! [`Machine::run_source`].

mod boot;
mod error;
mod feed;
mod fulfill;
mod level;
mod lookup;
mod machine;
mod mold;
mod natives;
mod paths;
mod raise;
mod specialize;
mod step;

pub use boot::BootError;
pub use error::{Category, ErrId};
pub use machine::{Machine, MachineConfig, NativeFn};
pub use raise::{Bounce, Raise};
pub use step::RunOutcome;
