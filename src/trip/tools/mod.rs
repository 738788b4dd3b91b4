// SPDX-License-Identifier: MIT

//! Provider adapters behind the tool interface

pub mod http;
pub mod offline;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::Arc;

use super::capability::Capability;
use super::config::Settings;
use super::registry::CapabilityRegistry;
use crate::engine::error::PlannerError;
use http::HttpCapabilityTool;
use offline::OfflineTool;

// --- Static schemas ---

static POI_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string", "description": "City to search in"},
            "keywords": {"type": "array", "items": {"type": "string"}},
            "citylimit": {"type": "boolean", "description": "Restrict results to the city"}
        },
        "required": ["city", "keywords"]
    })
});

static WEATHER_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string", "description": "City to forecast"}
        },
        "required": ["city"]
    })
});

static LODGING_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string"},
            "keywords": {"type": "string", "description": "Accommodation tier keyword"}
        },
        "required": ["city"]
    })
});

static DRAFT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string"},
            "days": {"type": "integer"},
            "preferences": {"type": "array", "items": {"type": "string"}},
            "outline": {
                "type": "array",
                "description": "Activity names per day",
                "items": {"type": "array", "items": {"type": "string"}}
            }
        },
        "required": ["city", "days", "outline"]
    })
});

/// Input schema of `capability`
pub fn schema_for(capability: Capability) -> &'static Value {
    match capability {
        Capability::PointOfInterest => &POI_SCHEMA,
        Capability::Weather => &WEATHER_SCHEMA,
        Capability::Lodging => &LODGING_SCHEMA,
        Capability::ItineraryDraft => &DRAFT_SCHEMA,
    }
}

/// Register an adapter for every capability the settings can serve.
///
/// A configured endpoint wins; otherwise the offline adapter is used when
/// enabled. Drafting has no offline adapter and stays unregistered.
pub async fn register_providers(
    registry: &CapabilityRegistry,
    settings: &Settings,
) -> Result<(), PlannerError> {
    for capability in Capability::ALL {
        if let Some(provider) = settings.providers.get(&capability) {
            let tool = HttpCapabilityTool::new(capability, provider)?;
            log::info!("Registered tool: {} -> {}", capability, provider.endpoint);
            registry.register(capability, Arc::new(tool)).await;
        } else if settings.offline_providers && capability != Capability::ItineraryDraft {
            log::info!("Registered tool: {} (offline)", capability);
            registry
                .register(capability, Arc::new(OfflineTool::new(capability)))
                .await;
        } else {
            log::warn!("No provider for capability {}", capability);
        }
    }
    Ok(())
}
