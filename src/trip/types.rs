// SPDX-License-Identifier: MIT

//! Trip request types
//!
//! A [`TripRequest`] is validated once by [`TripRequest::normalize`] before a
//! run is created and is never mutated afterwards.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::error::ValidationError;

/// How the traveller gets around at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    PublicTransit,
    Driving,
    Walking,
    Mixed,
}

impl TransportMode {
    /// Label shown in day plans
    pub fn label(&self) -> &'static str {
        match self {
            TransportMode::PublicTransit => "公共交通",
            TransportMode::Driving => "自驾",
            TransportMode::Walking => "步行",
            TransportMode::Mixed => "混合",
        }
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public_transit" | "transit" | "public" | "公共交通" => Ok(TransportMode::PublicTransit),
            "driving" | "car" | "自驾" => Ok(TransportMode::Driving),
            "walking" | "walk" | "步行" => Ok(TransportMode::Walking),
            "mixed" | "混合" => Ok(TransportMode::Mixed),
            other => Err(format!("Unknown transport mode: {}", other)),
        }
    }
}

/// Requested accommodation tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccommodationTier {
    Economy,
    #[default]
    Comfort,
    Luxury,
}

impl AccommodationTier {
    /// Search keyword sent to the lodging provider
    pub fn label(&self) -> &'static str {
        match self {
            AccommodationTier::Economy => "经济型酒店",
            AccommodationTier::Comfort => "舒适型酒店",
            AccommodationTier::Luxury => "豪华酒店",
        }
    }

    /// Nightly price assumed when the provider does not quote one
    pub fn default_nightly_price(&self) -> u32 {
        match self {
            AccommodationTier::Economy => 200,
            AccommodationTier::Comfort => 400,
            AccommodationTier::Luxury => 900,
        }
    }

    /// Distance between tiers, used to pick the nearest substitute
    pub fn distance(&self, other: AccommodationTier) -> u8 {
        (*self as i8 - other as i8).unsigned_abs()
    }
}

impl FromStr for AccommodationTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "economy" | "budget" | "经济型酒店" | "经济型" => Ok(AccommodationTier::Economy),
            "comfort" | "standard" | "舒适型酒店" | "舒适型" => Ok(AccommodationTier::Comfort),
            "luxury" | "豪华酒店" | "豪华型" => Ok(AccommodationTier::Luxury),
            other => Err(format!("Unknown accommodation tier: {}", other)),
        }
    }
}

/// Spending level used for the budget ceiling check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Low,
    #[default]
    Medium,
    High,
}

impl BudgetTier {
    /// Per-day spending ceiling; `None` means unlimited
    pub fn daily_ceiling(&self) -> Option<u32> {
        match self {
            BudgetTier::Low => Some(500),
            BudgetTier::Medium => Some(1200),
            BudgetTier::High => None,
        }
    }
}

impl FromStr for BudgetTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(BudgetTier::Low),
            "medium" | "mid" => Ok(BudgetTier::Medium),
            "high" => Ok(BudgetTier::High),
            other => Err(format!("Unknown budget tier: {}", other)),
        }
    }
}

impl fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetTier::Low => write!(f, "low"),
            BudgetTier::Medium => write!(f, "medium"),
            BudgetTier::High => write!(f, "high"),
        }
    }
}

/// Input of a planning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default)]
    pub accommodation: AccommodationTier,
    #[serde(default)]
    pub budget: BudgetTier,
    /// Ordered preference tags, most important first
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl TripRequest {
    /// Request for `days` days starting on `start_date`, everything else default.
    ///
    /// A day count past the calendar's range leaves `end_date` at
    /// `start_date`; [`TripRequest::normalize`] rejects it.
    pub fn new(destination: impl Into<String>, start_date: NaiveDate, days: u32) -> Self {
        let end_date = start_date
            .checked_add_days(Days::new(u64::from(days.max(1)) - 1))
            .unwrap_or(start_date);
        Self {
            destination: destination.into(),
            start_date,
            end_date,
            days,
            transport: TransportMode::default(),
            accommodation: AccommodationTier::default(),
            budget: BudgetTier::default(),
            preferences: Vec::new(),
        }
    }

    pub fn with_preferences<I, S>(mut self, preferences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferences = preferences.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_accommodation(mut self, tier: AccommodationTier) -> Self {
        self.accommodation = tier;
        self
    }

    pub fn with_budget(mut self, budget: BudgetTier) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    /// Validate and canonicalize the request.
    ///
    /// Trims the destination, drops blank preference tags and keeps only the
    /// first occurrence of each tag.
    pub fn normalize(mut self, max_days: u32) -> Result<Self, ValidationError> {
        self.destination = self.destination.trim().to_string();
        if self.destination.is_empty() {
            return Err(ValidationError::new("destination", "must not be blank"));
        }

        if self.days == 0 || self.days > max_days {
            return Err(ValidationError::new(
                "days",
                format!("must be between 1 and {}", max_days),
            ));
        }

        if self.start_date > self.end_date {
            return Err(ValidationError::new(
                "end_date",
                "must not be before start_date",
            ));
        }

        let span = (self.end_date - self.start_date).num_days() + 1;
        if span != i64::from(self.days) {
            return Err(ValidationError::new(
                "days",
                format!(
                    "{} does not match the date range {}..={} ({} days)",
                    self.days, self.start_date, self.end_date, span
                ),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        self.preferences = self
            .preferences
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .filter(|p| seen.insert(p.clone()))
            .collect();

        Ok(self)
    }

    /// Every date of the trip, in order
    pub fn dates(&self) -> Vec<NaiveDate> {
        (0..self.days)
            .map_while(|i| self.start_date.checked_add_days(Days::new(u64::from(i))))
            .collect()
    }
}
