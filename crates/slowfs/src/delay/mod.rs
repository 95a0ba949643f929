//! Delay and fault injection
//!
//! - [`DelayModel`]: wait range and failure probability for one category
//! - [`ConfigStore`]: live table of models, updated by copy-and-publish
//! - [`DelayEngine`]: sleeps and decides injected faults per operation

mod engine;
mod model;
mod store;

pub use engine::{DelayEngine, Outcome, RandomSource, StdRandom};
pub use model::{DelayModel, ErrorCode, OperationCategory};
pub use store::{ConfigStore, ConfigTable};
