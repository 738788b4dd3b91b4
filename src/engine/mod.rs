// SPDX-License-Identifier: MIT

//! Orchestration building blocks with no knowledge of trip planning

pub mod cache;
pub mod checkpoint;
pub mod error;
pub mod retry;
pub mod tool;

pub use error::{PlannerError, ProviderError, ProviderErrorKind, StoreError, SynthesisError, ValidationError};
pub use tool::Tool;
