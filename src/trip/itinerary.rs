//! Terminal artifact of a planning run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::capability::Capability;
use super::types::AccommodationTier;

/// Where a piece of the itinerary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// A live provider payload
    Live,
    /// A degraded-mode default payload
    Default,
    /// Filled in by synthesis without provider data
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub capability: Capability,
    /// Provider identifier of the referenced record, when it has one
    pub reference: Option<String>,
    pub origin: SourceOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Attraction,
    FreeExploration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub address: String,
    pub category: String,
    pub visit_minutes: u32,
    pub ticket_price: u32,
    pub kind: ActivityKind,
    pub source: SourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayWeather {
    pub day_weather: String,
    pub night_weather: String,
    pub day_temp: Option<f64>,
    pub night_temp: Option<f64>,
    pub source: SourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lodging {
    pub name: String,
    pub address: String,
    pub tier: Option<AccommodationTier>,
    pub price_per_night: u32,
    pub source: SourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    /// Zero-based position in the trip
    pub day_index: u32,
    pub summary: String,
    pub transport: String,
    pub weather: Option<DayWeather>,
    pub activities: Vec<Activity>,
    pub lodging: Option<Lodging>,
}

/// Estimated spend, in yuan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Budget {
    pub attractions: u64,
    pub lodging: u64,
    pub meals: u64,
    pub transport: u64,
    pub total: u64,
    pub ceiling: Option<u64>,
}

/// A constraint the planner could not satisfy. Kept on the itinerary so
/// partial results are visible instead of silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    WeatherConflict { date: NaiveDate, activity: String },
    InsufficientAttractions { date: NaiveDate },
    TierSubstituted {
        requested: AccommodationTier,
        chosen: Option<AccommodationTier>,
    },
    NoLodging,
    OverBudget { total: u64, ceiling: u64 },
    DegradedSource { capability: Capability },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    pub city: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<DayPlan>,
    pub lodging: Option<Lodging>,
    pub budget: Budget,
    pub violations: Vec<Violation>,
    /// Capabilities whose data came from a degraded default
    pub degraded: Vec<Capability>,
    pub suggestions: String,
}

impl Itinerary {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
