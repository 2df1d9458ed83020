//! Core domain model types.
//!
//! - Step identifiers, channels and patterns
//! - Node keys for managed steps and external leaves
//! - Step state and output types

mod identifier;
mod key;
mod output;
mod status;

pub use identifier::{Channel, StepIdentifier, StepPattern, TableReference, Version};
pub use key::{ExternalRef, NodeKey};
pub use output::StepOutput;
pub use status::{NodeKind, OutputStatus, StepState};
