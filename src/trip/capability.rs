// SPDX-License-Identifier: MIT

//! The closed set of capabilities a planning run can call

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use super::types::TripRequest;

/// External capability, dispatched through the tool registry by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PointOfInterest,
    Weather,
    Lodging,
    ItineraryDraft,
}

/// Mutually independent steps run concurrently before synthesis
pub const FAN_OUT: [Capability; 3] = [
    Capability::PointOfInterest,
    Capability::Weather,
    Capability::Lodging,
];

/// Name of the join step
pub const SYNTHESIS_STEP: &str = "synthesis";

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::PointOfInterest,
        Capability::Weather,
        Capability::Lodging,
        Capability::ItineraryDraft,
    ];

    /// Registry key and step name
    pub fn name(&self) -> &'static str {
        match self {
            Capability::PointOfInterest => "point_of_interest",
            Capability::Weather => "weather",
            Capability::Lodging => "lodging",
            Capability::ItineraryDraft => "itinerary_draft",
        }
    }

    /// Provider parameters for a fan-out step of `request`.
    ///
    /// `ItineraryDraft` parameters depend on the other payloads and are built
    /// by synthesis instead; here they carry only the request fields.
    pub fn params(&self, request: &TripRequest) -> Value {
        match self {
            Capability::PointOfInterest => {
                let keywords = if request.preferences.is_empty() {
                    vec!["景点".to_string()]
                } else {
                    request.preferences.clone()
                };
                json!({
                    "city": request.destination,
                    "keywords": keywords,
                    "citylimit": true,
                })
            }
            Capability::Weather => json!({ "city": request.destination }),
            Capability::Lodging => json!({
                "city": request.destination,
                "keywords": request.accommodation.label(),
            }),
            Capability::ItineraryDraft => json!({
                "city": request.destination,
                "days": request.days,
                "preferences": request.preferences,
            }),
        }
    }

    /// Degraded-mode payload used when the capability is allowed to fall back
    pub fn default_payload(&self) -> Value {
        match self {
            Capability::PointOfInterest => json!({ "pois": [], "default": true }),
            Capability::Weather => json!({ "forecast": [], "default": true }),
            Capability::Lodging => json!({ "hotels": [], "default": true }),
            Capability::ItineraryDraft => json!({ "summaries": [], "default": true }),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.name() == s.trim())
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request() -> TripRequest {
        TripRequest::new("北京", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), 3)
    }

    #[test]
    fn test_poi_defaults_to_sightseeing_keyword() {
        let params = Capability::PointOfInterest.params(&request());
        assert_eq!(params["keywords"], json!(["景点"]));
        assert_eq!(params["citylimit"], json!(true));

        let params = Capability::PointOfInterest
            .params(&request().with_preferences(["历史文化", "美食"]));
        assert_eq!(params["keywords"], json!(["历史文化", "美食"]));
    }

    #[test]
    fn test_lodging_uses_tier_label() {
        let params = Capability::Lodging.params(&request());
        assert_eq!(params["keywords"], json!("舒适型酒店"));
    }

    #[test]
    fn test_name_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(cap.name().parse::<Capability>(), Ok(cap));
        }
        assert!("flights".parse::<Capability>().is_err());
    }

    #[test]
    fn test_serde_matches_name() {
        for cap in Capability::ALL {
            assert_eq!(serde_json::to_value(cap).unwrap(), json!(cap.name()));
        }
    }
}
