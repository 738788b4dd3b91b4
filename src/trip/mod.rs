// SPDX-License-Identifier: MIT

//! Trip planning on top of the orchestration engine

pub mod capability;
pub mod config;
pub mod graph;
pub mod itinerary;
pub mod registry;
pub mod server;
pub mod service;
pub mod state;
pub mod synthesis;
pub mod tools;
pub mod types;

pub use capability::Capability;
pub use config::Settings;
pub use graph::{ExecutorConfig, GraphExecutor};
pub use itinerary::Itinerary;
pub use registry::CapabilityRegistry;
pub use service::PlanningService;
pub use state::{RunStatus, RunSummary, StepStatus, WorkflowState};
pub use types::{AccommodationTier, BudgetTier, TransportMode, TripRequest};
