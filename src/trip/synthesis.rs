// SPDX-License-Identifier: MIT

//! Planner synthesis
//!
//! Merges the fan-out payloads into an [`Itinerary`]. Everything here is a
//! pure function of the request and the payloads keyed by capability, so the
//! result does not depend on which fan-out step finished first.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

use super::capability::{Capability, FAN_OUT};
use super::itinerary::{
    Activity, ActivityKind, Budget, DayPlan, DayWeather, Itinerary, Lodging, SourceOrigin,
    SourceRef, Violation,
};
use super::state::WorkflowState;
use super::types::{AccommodationTier, TripRequest};
use crate::engine::error::SynthesisError;

/// Attractions considered before allocation
pub const MAX_CANDIDATES: usize = 15;
/// Attractions placed on a single day
pub const MAX_PER_DAY: usize = 3;
/// Breakfast + lunch + dinner
pub const MEALS_PER_DAY: u64 = 30 + 60 + 100;
pub const TRANSPORT_ESTIMATE: u64 = 100;
const DEFAULT_VISIT_MINUTES: u32 = 120;
const FREE_EXPLORATION_MINUTES: u32 = 180;

const INDOOR_MARKERS: [&str; 6] = ["博物馆", "美术馆", "展览", "museum", "gallery", "indoor"];
const RAIN_MARKERS: [&str; 2] = ["雨", "rain"];

/// A fan-out payload and whether it is a degraded default
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePayload {
    pub payload: Value,
    pub degraded: bool,
}

/// Payloads synthesis works from, keyed by capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisInput {
    pub sources: BTreeMap<Capability, SourcePayload>,
}

impl SynthesisInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability, payload: Value, degraded: bool) -> Self {
        self.sources
            .insert(capability, SourcePayload { payload, degraded });
        self
    }

    /// Collect the settled fan-out payloads of `state`
    pub fn from_state(state: &WorkflowState) -> Result<Self, SynthesisError> {
        let mut input = Self::new();
        for cap in FAN_OUT {
            let step = state
                .step(cap.name())
                .filter(|s| s.status.is_settled())
                .ok_or_else(|| SynthesisError::MissingInput(cap.name().to_string()))?;
            let payload = step
                .payload
                .clone()
                .ok_or_else(|| SynthesisError::MissingInput(cap.name().to_string()))?;
            input = input.with(cap, payload, step.degraded);
        }
        Ok(input)
    }

    fn source(&self, capability: Capability) -> Result<&SourcePayload, SynthesisError> {
        self.sources
            .get(&capability)
            .ok_or_else(|| SynthesisError::MissingInput(capability.name().to_string()))
    }

    fn degraded(&self) -> Vec<Capability> {
        self.sources
            .iter()
            .filter(|(_, s)| s.degraded)
            .map(|(cap, _)| *cap)
            .collect()
    }
}

// Provider payload contracts

#[derive(Debug, Deserialize)]
struct PoiPayload {
    #[serde(default)]
    pois: Vec<PoiRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct PoiRecord {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    category: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    visit_minutes: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    ticket_price: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WeatherPayload {
    #[serde(default)]
    forecast: Vec<ForecastRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct ForecastRecord {
    date: String,
    #[serde(default)]
    day_weather: String,
    #[serde(default)]
    night_weather: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    day_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    night_temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LodgingPayload {
    #[serde(default)]
    hotels: Vec<HotelRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct HotelRecord {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    price_per_night: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DraftPayload {
    #[serde(default)]
    summaries: Vec<String>,
    #[serde(default)]
    suggestions: Option<String>,
}

/// Accept numbers, numeric strings ("26", "26°C") or null
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .trim()
            .trim_end_matches("°C")
            .trim_end_matches('℃')
            .trim()
            .parse()
            .ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32))
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    capability: Capability,
    payload: &Value,
) -> Result<T, SynthesisError> {
    serde_json::from_value(payload.clone()).map_err(|e| SynthesisError::MalformedPayload {
        capability: capability.name().to_string(),
        message: e.to_string(),
    })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn is_indoor(poi: &PoiRecord) -> bool {
    contains_any(&poi.category, &INDOOR_MARKERS) || contains_any(&poi.name, &INDOOR_MARKERS)
}

/// Index of the first preference the attraction matches
fn preference_rank(poi: &PoiRecord, preferences: &[String]) -> usize {
    preferences
        .iter()
        .position(|p| poi.category.contains(p.as_str()) || poi.name.contains(p.as_str()))
        .unwrap_or(preferences.len())
}

/// Deduplicated candidates in deterministic rank order
fn rank_attractions(pois: Vec<PoiRecord>, preferences: &[String]) -> Vec<PoiRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<PoiRecord> = pois
        .into_iter()
        .filter(|p| !p.name.trim().is_empty())
        .filter(|p| {
            let key = if p.id.is_empty() { &p.name } else { &p.id };
            seen.insert(key.clone())
        })
        .collect();

    unique.sort_by(|a, b| {
        preference_rank(a, preferences)
            .cmp(&preference_rank(b, preferences))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    unique.truncate(MAX_CANDIDATES);
    unique
}

/// Split `total` placements over `days` as evenly as possible, earlier days first
fn day_quotas(total: usize, days: usize) -> Vec<usize> {
    let total = total.min(days * MAX_PER_DAY);
    (0..days)
        .map(|i| total / days + usize::from(i < total % days))
        .collect()
}

/// Assign candidate indices to days. Rainy days take indoor candidates
/// first; everything else is filled in rank order.
fn allocate(candidates: &[PoiRecord], rainy: &[bool]) -> Vec<Vec<usize>> {
    let quotas = day_quotas(candidates.len(), rainy.len());
    let mut used = vec![false; candidates.len()];
    let mut plan: Vec<Vec<usize>> = vec![Vec::new(); rainy.len()];

    for (day, is_rainy) in rainy.iter().enumerate() {
        if !is_rainy {
            continue;
        }
        for (idx, poi) in candidates.iter().enumerate() {
            if plan[day].len() >= quotas[day] {
                break;
            }
            if !used[idx] && is_indoor(poi) {
                used[idx] = true;
                plan[day].push(idx);
            }
        }
    }

    for day in 0..rainy.len() {
        for idx in 0..candidates.len() {
            if plan[day].len() >= quotas[day] {
                break;
            }
            if !used[idx] {
                used[idx] = true;
                plan[day].push(idx);
            }
        }
        plan[day].sort_unstable();
    }

    plan
}

fn is_rainy(weather: &DayWeather) -> bool {
    contains_any(&weather.day_weather, &RAIN_MARKERS)
        || contains_any(&weather.night_weather, &RAIN_MARKERS)
}

fn day_weather(
    date: NaiveDate,
    forecast: &[ForecastRecord],
    degraded: bool,
) -> Option<DayWeather> {
    let origin = if degraded {
        SourceOrigin::Default
    } else {
        SourceOrigin::Live
    };

    let entry = forecast
        .iter()
        .find(|f| NaiveDate::parse_from_str(f.date.trim(), "%Y-%m-%d").ok() == Some(date));

    match entry {
        Some(f) => Some(DayWeather {
            day_weather: f.day_weather.clone(),
            night_weather: f.night_weather.clone(),
            day_temp: f.day_temp,
            night_temp: f.night_temp,
            source: SourceRef {
                capability: Capability::Weather,
                reference: Some(f.date.trim().to_string()),
                origin,
            },
        }),
        None if degraded => Some(DayWeather {
            day_weather: "未知".to_string(),
            night_weather: "未知".to_string(),
            day_temp: None,
            night_temp: None,
            source: SourceRef {
                capability: Capability::Weather,
                reference: None,
                origin: SourceOrigin::Default,
            },
        }),
        None => None,
    }
}

fn hotel_tier(hotel: &HotelRecord) -> Option<AccommodationTier> {
    hotel.tier.as_deref().and_then(|t| t.parse().ok())
}

/// Cheapest hotel in the requested tier, else the nearest tier
fn choose_lodging(
    hotels: &[HotelRecord],
    requested: AccommodationTier,
    degraded: bool,
) -> (Option<Lodging>, Option<Violation>) {
    if hotels.is_empty() {
        return (None, Some(Violation::NoLodging));
    }

    let price = |h: &HotelRecord| {
        h.price_per_night.unwrap_or_else(|| {
            hotel_tier(h)
                .unwrap_or(requested)
                .default_nightly_price()
        })
    };

    let matching = hotels
        .iter()
        .filter(|h| hotel_tier(h).map(|t| t == requested).unwrap_or(true))
        .min_by(|a, b| {
            price(a)
                .cmp(&price(b))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

    let (chosen, violation) = match matching {
        Some(hotel) => (hotel, None),
        None => {
            // Every hotel has a tier here, and none is the requested one
            let nearest = hotels.iter().min_by(|a, b| {
                let da = hotel_tier(a).map(|t| t.distance(requested)).unwrap_or(0);
                let db = hotel_tier(b).map(|t| t.distance(requested)).unwrap_or(0);
                da.cmp(&db)
                    .then_with(|| price(a).cmp(&price(b)))
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.id.cmp(&b.id))
            });
            match nearest {
                Some(hotel) => (
                    hotel,
                    Some(Violation::TierSubstituted {
                        requested,
                        chosen: hotel_tier(hotel),
                    }),
                ),
                None => return (None, Some(Violation::NoLodging)),
            }
        }
    };

    let lodging = Lodging {
        name: chosen.name.clone(),
        address: chosen.address.clone(),
        tier: hotel_tier(chosen),
        price_per_night: price(chosen),
        source: SourceRef {
            capability: Capability::Lodging,
            reference: (!chosen.id.is_empty()).then(|| chosen.id.clone()),
            origin: if degraded {
                SourceOrigin::Default
            } else {
                SourceOrigin::Live
            },
        },
    };
    (Some(lodging), violation)
}

fn attraction_activity(poi: &PoiRecord, degraded: bool) -> Activity {
    Activity {
        name: poi.name.clone(),
        address: poi.address.clone(),
        category: poi.category.clone(),
        visit_minutes: poi.visit_minutes.unwrap_or(DEFAULT_VISIT_MINUTES),
        ticket_price: poi.ticket_price.unwrap_or(0),
        kind: ActivityKind::Attraction,
        source: SourceRef {
            capability: Capability::PointOfInterest,
            reference: (!poi.id.is_empty()).then(|| poi.id.clone()),
            origin: if degraded {
                SourceOrigin::Default
            } else {
                SourceOrigin::Live
            },
        },
    }
}

fn free_exploration(city: &str) -> Activity {
    Activity {
        name: format!("{}自由探索", city),
        address: city.to_string(),
        category: "自由活动".to_string(),
        visit_minutes: FREE_EXPLORATION_MINUTES,
        ticket_price: 0,
        kind: ActivityKind::FreeExploration,
        source: SourceRef {
            capability: Capability::PointOfInterest,
            reference: None,
            origin: SourceOrigin::Synthesized,
        },
    }
}

fn day_summary(day_index: u32, activities: &[Activity], rainy: bool) -> String {
    let names: Vec<&str> = activities.iter().map(|a| a.name.as_str()).collect();
    let mut summary = format!("第{}天：{}", day_index + 1, names.join("、"));
    if rainy {
        summary.push_str("（有雨，优先室内）");
    }
    summary
}

/// Merge the fan-out payloads into an itinerary.
///
/// Constraint violations are recorded on the itinerary. Only a complete
/// absence of attractions is an error.
pub fn synthesize(
    request: &TripRequest,
    input: &SynthesisInput,
) -> Result<Itinerary, SynthesisError> {
    let poi_source = input.source(Capability::PointOfInterest)?;
    let weather_source = input.source(Capability::Weather)?;
    let lodging_source = input.source(Capability::Lodging)?;

    let pois: PoiPayload = parse_payload(Capability::PointOfInterest, &poi_source.payload)?;
    let weather: WeatherPayload = parse_payload(Capability::Weather, &weather_source.payload)?;
    let hotels: LodgingPayload = parse_payload(Capability::Lodging, &lodging_source.payload)?;

    let candidates = rank_attractions(pois.pois, &request.preferences);
    if candidates.is_empty() {
        return Err(SynthesisError::NoAttractions {
            city: request.destination.clone(),
        });
    }

    let dates = request.dates();
    let weathers: Vec<Option<DayWeather>> = dates
        .iter()
        .map(|d| day_weather(*d, &weather.forecast, weather_source.degraded))
        .collect();
    let rainy: Vec<bool> = weathers
        .iter()
        .map(|w| w.as_ref().map(is_rainy).unwrap_or(false))
        .collect();

    let (lodging, lodging_violation) =
        choose_lodging(&hotels.hotels, request.accommodation, lodging_source.degraded);

    let allocation = allocate(&candidates, &rainy);
    let mut violations = Vec::new();
    let mut days = Vec::with_capacity(dates.len());
    let mut ticket_total = 0u64;

    for (i, date) in dates.iter().enumerate() {
        let day_index = i as u32;
        let mut activities: Vec<Activity> = allocation[i]
            .iter()
            .map(|idx| attraction_activity(&candidates[*idx], poi_source.degraded))
            .collect();

        if activities.is_empty() {
            activities.push(free_exploration(&request.destination));
            violations.push(Violation::InsufficientAttractions { date: *date });
        }

        if rainy[i] {
            for idx in &allocation[i] {
                if !is_indoor(&candidates[*idx]) {
                    violations.push(Violation::WeatherConflict {
                        date: *date,
                        activity: candidates[*idx].name.clone(),
                    });
                }
            }
        }

        ticket_total = activities
            .iter()
            .fold(ticket_total, |sum, a| sum.saturating_add(u64::from(a.ticket_price)));

        days.push(DayPlan {
            date: *date,
            day_index,
            summary: day_summary(day_index, &activities, rainy[i]),
            transport: request.transport.label().to_string(),
            weather: weathers[i].clone(),
            activities,
            lodging: lodging.clone(),
        });
    }

    if let Some(violation) = lodging_violation {
        violations.push(violation);
    }

    let nightly = lodging
        .as_ref()
        .map(|l| l.price_per_night)
        .unwrap_or_else(|| request.accommodation.default_nightly_price());
    let day_count = u64::from(request.days);
    let lodging_total = u64::from(nightly).saturating_mul(day_count);
    let meals = MEALS_PER_DAY.saturating_mul(day_count);
    let total = ticket_total
        .saturating_add(lodging_total)
        .saturating_add(meals)
        .saturating_add(TRANSPORT_ESTIMATE);
    let ceiling = request
        .budget
        .daily_ceiling()
        .map(|c| u64::from(c).saturating_mul(day_count));
    if let Some(ceiling) = ceiling {
        if total > ceiling {
            violations.push(Violation::OverBudget { total, ceiling });
        }
    }

    let degraded = input.degraded();
    for capability in &degraded {
        violations.push(Violation::DegradedSource {
            capability: *capability,
        });
    }

    let attraction_count: usize = allocation.iter().map(Vec::len).sum();
    let mut suggestions = format!(
        "{}{}日游，共安排{}个景点，预计花费{}元。",
        request.destination, request.days, attraction_count, total
    );
    if rainy.iter().any(|r| *r) {
        suggestions.push_str("部分日期有雨，请携带雨具。");
    }

    Ok(Itinerary {
        city: request.destination.clone(),
        start_date: request.start_date,
        end_date: request.end_date,
        days,
        lodging,
        budget: Budget {
            attractions: ticket_total,
            lodging: lodging_total,
            meals,
            transport: TRANSPORT_ESTIMATE,
            total,
            ceiling,
        },
        violations,
        degraded,
        suggestions,
    })
}

/// Parameters for the optional drafting capability
pub fn draft_params(request: &TripRequest, itinerary: &Itinerary) -> Value {
    let outline: Vec<Vec<&str>> = itinerary
        .days
        .iter()
        .map(|d| d.activities.iter().map(|a| a.name.as_str()).collect())
        .collect();
    json!({
        "city": request.destination,
        "days": request.days,
        "preferences": request.preferences,
        "outline": outline,
    })
}

/// Overlay drafted day summaries and suggestions. Blank entries keep the
/// deterministic text.
pub fn apply_draft(itinerary: &mut Itinerary, draft: &Value) -> Result<(), SynthesisError> {
    let draft: DraftPayload = parse_payload(Capability::ItineraryDraft, draft)?;

    for (day, summary) in itinerary.days.iter_mut().zip(draft.summaries) {
        if !summary.trim().is_empty() {
            day.summary = summary.trim().to_string();
        }
    }
    if let Some(suggestions) = draft.suggestions.filter(|s| !s.trim().is_empty()) {
        itinerary.suggestions = suggestions.trim().to_string();
    }
    Ok(())
}

/// Record that `capability` fell back to deterministic output
pub fn mark_degraded(itinerary: &mut Itinerary, capability: Capability) {
    if !itinerary.degraded.contains(&capability) {
        itinerary.degraded.push(capability);
        itinerary.degraded.sort();
        itinerary
            .violations
            .push(Violation::DegradedSource { capability });
    }
}
