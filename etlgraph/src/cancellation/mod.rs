//! Global abort for a run.

mod token;

pub use token::CancellationToken;
