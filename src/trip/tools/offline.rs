// SPDX-License-Identifier: MIT

//! Canned provider data for running without external services

use async_trait::async_trait;
use chrono::{Days, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use crate::engine::error::ProviderError;
use crate::engine::tool::Tool;
use crate::trip::capability::Capability;
use crate::trip::types::AccommodationTier;

const FORECAST_DAYS: u64 = 4;

// (suffix, category, visit minutes, ticket price)
const ATTRACTIONS: [(&str, &str, u32, u32); 8] = [
    ("古城", "历史文化", 180, 60),
    ("博物馆", "历史文化;博物馆", 150, 0),
    ("老街", "美食;历史文化", 120, 0),
    ("中央公园", "自然风光", 120, 0),
    ("美术馆", "艺术;美术馆", 90, 30),
    ("夜市", "美食", 120, 0),
    ("湖畔步道", "自然风光", 90, 0),
    ("观景塔", "城市地标", 60, 80),
];

/// Deterministic stand-in for a capability provider.
///
/// Results depend only on the parameters (and the current date for
/// weather), so identical requests produce identical payloads.
pub struct OfflineTool {
    capability: Capability,
    name: String,
}

impl OfflineTool {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            name: format!("offline_{}", capability.name()),
        }
    }

    fn city(params: &Value) -> Result<&str, ProviderError> {
        params
            .get("city")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::permanent("invalid_params", "city is required"))
    }

    fn points_of_interest(city: &str) -> Value {
        let pois: Vec<Value> = ATTRACTIONS
            .iter()
            .enumerate()
            .map(|(i, (suffix, category, minutes, price))| {
                json!({
                    "id": format!("offline-poi-{}", i + 1),
                    "name": format!("{}{}", city, suffix),
                    "address": format!("{}市中心区{}号", city, (i + 1) * 10),
                    "category": category,
                    "visit_minutes": minutes,
                    "ticket_price": price,
                })
            })
            .collect();
        json!({ "pois": pois })
    }

    fn forecast(city: &str) -> Value {
        let today = Utc::now().date_naive();
        let forecast: Vec<Value> = (0..FORECAST_DAYS)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .map(|date| {
                json!({
                    "date": date.format("%Y-%m-%d").to_string(),
                    "day_weather": "晴",
                    "night_weather": "多云",
                    "day_temp": "26",
                    "night_temp": "18",
                })
            })
            .collect();
        json!({ "city": city, "forecast": forecast })
    }

    fn hotels(city: &str) -> Value {
        let hotels: Vec<Value> = [
            AccommodationTier::Economy,
            AccommodationTier::Comfort,
            AccommodationTier::Luxury,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, tier)| {
            json!({
                "id": format!("offline-hotel-{}", i + 1),
                "name": format!("{}{}", city, tier.label()),
                "address": format!("{}站前路{}号", city, (i + 1) * 8),
                "tier": tier.label(),
                "price_per_night": tier.default_nightly_price(),
            })
        })
        .collect();
        json!({ "hotels": hotels })
    }
}

#[async_trait]
impl Tool for OfflineTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Serves canned data without calling an external provider"
    }

    fn schema(&self) -> &Value {
        super::schema_for(self.capability)
    }

    async fn invoke(&self, params: Value, _timeout: Duration) -> Result<Value, ProviderError> {
        let city = Self::city(&params)?;
        log::debug!("{} serving canned data for {}", self.name, city);

        match self.capability {
            Capability::PointOfInterest => Ok(Self::points_of_interest(city)),
            Capability::Weather => Ok(Self::forecast(city)),
            Capability::Lodging => Ok(Self::hotels(city)),
            Capability::ItineraryDraft => Err(ProviderError::permanent(
                "unsupported",
                "itinerary drafting has no offline provider",
            )),
        }
    }
}
