//! Integration tests for planning runs
//!
//! These tests drive the full fan-out/join graph using mock providers with
//! call counters and in-memory or SQLite stores.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tripweave_rs::engine::cache::{Fingerprint, MemoryCacheStore, ToolCache};
use tripweave_rs::engine::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use tripweave_rs::engine::error::ProviderError;
use tripweave_rs::engine::retry::RetryPolicy;
use tripweave_rs::engine::tool::Tool;
use tripweave_rs::trip::itinerary::{ActivityKind, SourceOrigin, Violation};
use tripweave_rs::trip::state::{load_state, save_state};
use tripweave_rs::trip::{
    Capability, CapabilityRegistry, ExecutorConfig, GraphExecutor, RunStatus, StepStatus,
    TripRequest, WorkflowState,
};

// ============================================================================
// Mock Components
// ============================================================================

/// Static schema for MockTool
static MOCK_TOOL_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string"}
        }
    })
});

type Responder = Box<dyn Fn(usize, &Value) -> Result<Value, ProviderError> + Send + Sync>;

/// Mock provider that counts calls and answers through a responder
struct MockTool {
    name: String,
    delay: Duration,
    calls: AtomicUsize,
    respond: Responder,
}

impl MockTool {
    fn new<F>(name: &str, respond: F) -> Arc<Self>
    where
        F: Fn(usize, &Value) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        Self::delayed(name, Duration::ZERO, respond)
    }

    fn delayed<F>(name: &str, delay: Duration, respond: F) -> Arc<Self>
    where
        F: Fn(usize, &Value) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
        })
    }

    fn returning(name: &str, payload: Value) -> Arc<Self> {
        Self::new(name, move |_, _| Ok(payload.clone()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A mock provider for testing"
    }

    fn schema(&self) -> &Value {
        &MOCK_TOOL_SCHEMA
    }

    async fn invoke(&self, params: Value, _timeout: Duration) -> Result<Value, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(call, &params)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn beijing(days: u32) -> TripRequest {
    TripRequest::new("北京", start(), days).with_preferences(["历史文化", "美食"])
}

fn pois() -> Value {
    json!({"pois": [
        {"id": "B1", "name": "故宫博物院", "address": "景山前街4号", "category": "历史文化;博物馆", "ticket_price": 60},
        {"id": "B2", "name": "天坛公园", "address": "天坛东里甲1号", "category": "历史文化", "ticket_price": 15},
        {"id": "B3", "name": "南锣鼓巷", "address": "东城区", "category": "美食", "ticket_price": 0},
        {"id": "B4", "name": "颐和园", "address": "新建宫门路19号", "category": "历史文化", "ticket_price": 30},
        {"id": "B5", "name": "簋街", "address": "东直门内大街", "category": "美食"},
        {"id": "B6", "name": "国家博物馆", "address": "东长安街16号", "category": "博物馆"},
        {"id": "B7", "name": "奥林匹克公园", "address": "朝阳区", "category": "城市地标"}
    ]})
}

fn sunny_forecast() -> Value {
    let forecast: Vec<Value> = (0..5)
        .map(|i| {
            json!({
                "date": (start() + chrono::Duration::days(i)).format("%Y-%m-%d").to_string(),
                "day_weather": "晴",
                "night_weather": "多云",
                "day_temp": "30",
                "night_temp": "20"
            })
        })
        .collect();
    json!({ "forecast": forecast })
}

fn hotels() -> Value {
    json!({"hotels": [
        {"id": "H1", "name": "北京如家", "address": "东城区", "tier": "经济型酒店", "price_per_night": 220},
        {"id": "H2", "name": "北京全季", "address": "西城区", "tier": "舒适型酒店", "price_per_night": 380},
        {"id": "H3", "name": "北京半岛", "address": "王府井", "tier": "豪华酒店", "price_per_night": 1500}
    ]})
}

struct Providers {
    poi: Arc<MockTool>,
    weather: Arc<MockTool>,
    lodging: Arc<MockTool>,
}

impl Providers {
    fn healthy() -> Self {
        Self {
            poi: MockTool::returning("poi", pois()),
            weather: MockTool::returning("weather", sunny_forecast()),
            lodging: MockTool::returning("lodging", hotels()),
        }
    }

    async fn registry(&self) -> CapabilityRegistry {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::PointOfInterest, self.poi.clone()).await;
        registry.register(Capability::Weather, self.weather.clone()).await;
        registry.register(Capability::Lodging, self.lodging.clone()).await;
        registry
    }
}

/// Executor config with no backoff so retries do not sleep
fn fast_config() -> ExecutorConfig {
    let mut config = ExecutorConfig::default();
    for cap in Capability::ALL {
        let fallback = (cap == Capability::Weather).then(|| cap.default_payload());
        config = config.with_policy(cap, RetryPolicy::immediate(3).with_fallback(fallback));
    }
    config
}

fn memory_cache() -> Arc<ToolCache> {
    Arc::new(ToolCache::new(Arc::new(MemoryCacheStore::new())))
}

async fn executor_with(
    registry: CapabilityRegistry,
    store: Arc<dyn CheckpointStore>,
    config: ExecutorConfig,
) -> GraphExecutor {
    GraphExecutor::new(registry, memory_cache(), store, config)
}

// ============================================================================
// Planning runs
// ============================================================================

#[tokio::test]
async fn test_happy_path_three_days() {
    let providers = Providers::healthy();
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        fast_config(),
    )
    .await;

    let state = executor.run(beijing(3)).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.failure.is_none());
    let itinerary = state.itinerary.as_ref().unwrap();
    assert_eq!(itinerary.days.len(), 3);
    for (i, day) in itinerary.days.iter().enumerate() {
        assert_eq!(day.date, start() + chrono::Duration::days(i as i64));
        assert!(!day.activities.is_empty());
        assert!(day.activities.len() <= 3);
        assert!(day
            .activities
            .iter()
            .all(|a| a.kind == ActivityKind::Attraction && a.source.origin == SourceOrigin::Live));
        assert_eq!(day.weather.as_ref().unwrap().day_weather, "晴");
    }
    assert_eq!(itinerary.lodging.as_ref().unwrap().name, "北京全季");
    assert!(itinerary.degraded.is_empty());

    assert_eq!(providers.poi.calls(), 1);
    assert_eq!(providers.weather.calls(), 1);
    assert_eq!(providers.lodging.calls(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let providers = Providers {
        poi: MockTool::new("poi", |call, _| {
            if call < 2 {
                Err(ProviderError::transient("503", "busy"))
            } else {
                Ok(pois())
            }
        }),
        ..Providers::healthy()
    };
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        fast_config(),
    )
    .await;

    let state = executor.run(beijing(2)).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(providers.poi.calls(), 3);
    assert_eq!(state.step("point_of_interest").unwrap().attempts, 3);
}

#[tokio::test]
async fn test_degraded_weather_partially_fails() {
    let providers = Providers {
        weather: MockTool::new("weather", |_, _| Err(ProviderError::transient("503", "down"))),
        ..Providers::healthy()
    };
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        fast_config(),
    )
    .await;

    let state = executor.run(beijing(3)).await.unwrap();

    assert_eq!(state.status, RunStatus::PartiallyFailed);
    assert_eq!(providers.weather.calls(), 3);

    let weather = state.step("weather").unwrap();
    assert_eq!(weather.status, StepStatus::Skipped);
    assert!(weather.degraded);

    let itinerary = state.itinerary.as_ref().unwrap();
    assert_eq!(itinerary.days.len(), 3);
    assert!(itinerary
        .days
        .iter()
        .all(|d| d.weather.as_ref().unwrap().source.origin == SourceOrigin::Default));
    assert!(itinerary
        .violations
        .contains(&Violation::DegradedSource { capability: Capability::Weather }));
    assert_eq!(state.summary().degraded, vec![Capability::Weather]);
}

#[tokio::test]
async fn test_required_step_failure_fails_run() {
    let providers = Providers {
        lodging: MockTool::new("lodging", |_, _| {
            Err(ProviderError::permanent("400", "unknown city"))
        }),
        ..Providers::healthy()
    };
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        fast_config(),
    )
    .await;

    let state = executor.run(beijing(2)).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.itinerary.is_none());
    assert!(state.failure.as_ref().unwrap().contains("lodging"));
    // Permanent errors are not retried
    assert_eq!(providers.lodging.calls(), 1);
    assert_eq!(state.step("synthesis").unwrap().status, StepStatus::NotStarted);
    assert_eq!(state.step("point_of_interest").unwrap().status, StepStatus::Succeeded);
}

#[tokio::test]
async fn test_synthesis_is_independent_of_completion_order() {
    let mut itineraries = Vec::new();
    for (poi_delay, weather_delay, lodging_delay) in [(60, 1, 30), (1, 60, 30), (30, 1, 60)] {
        let providers = Providers {
            poi: MockTool::delayed("poi", Duration::from_millis(poi_delay), |_, _| Ok(pois())),
            weather: MockTool::delayed("weather", Duration::from_millis(weather_delay), |_, _| {
                Ok(sunny_forecast())
            }),
            lodging: MockTool::delayed("lodging", Duration::from_millis(lodging_delay), |_, _| {
                Ok(hotels())
            }),
        };
        let executor = executor_with(
            providers.registry().await,
            Arc::new(MemoryCheckpointStore::new()),
            fast_config(),
        )
        .await;
        let state = executor.run(beijing(3)).await.unwrap();
        itineraries.push(state.itinerary.unwrap());
    }

    assert_eq!(itineraries[0], itineraries[1]);
    assert_eq!(itineraries[1], itineraries[2]);
}

#[tokio::test]
async fn test_itinerary_draft_rewrites_text() {
    let providers = Providers::healthy();
    let registry = providers.registry().await;
    let draft = MockTool::new("draft", |_, params| {
        let days = params["days"].as_u64().unwrap_or(0);
        Ok(json!({
            "summaries": (1..=days).map(|d| format!("精选第{}天", d)).collect::<Vec<_>>(),
            "suggestions": "带好身份证"
        }))
    });
    registry.register(Capability::ItineraryDraft, draft.clone()).await;

    let executor = executor_with(registry, Arc::new(MemoryCheckpointStore::new()), fast_config()).await;
    let state = executor.run(beijing(2)).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    let itinerary = state.itinerary.unwrap();
    assert_eq!(itinerary.days[0].summary, "精选第1天");
    assert_eq!(itinerary.days[1].summary, "精选第2天");
    assert_eq!(itinerary.suggestions, "带好身份证");
    assert_eq!(draft.calls(), 1);
}

#[tokio::test]
async fn test_failed_draft_keeps_deterministic_text() {
    let providers = Providers::healthy();
    let registry = providers.registry().await;
    registry
        .register(
            Capability::ItineraryDraft,
            MockTool::new("draft", |_, _| Err(ProviderError::transient("503", "overloaded"))),
        )
        .await;

    let executor = executor_with(registry, Arc::new(MemoryCheckpointStore::new()), fast_config()).await;
    let state = executor.run(beijing(2)).await.unwrap();

    assert_eq!(state.status, RunStatus::PartiallyFailed);
    let itinerary = state.itinerary.unwrap();
    assert_eq!(itinerary.degraded, vec![Capability::ItineraryDraft]);
    assert!(itinerary.days[0].summary.starts_with("第1天"));
}

#[tokio::test]
async fn test_run_timeout_fails_run() {
    let providers = Providers {
        poi: MockTool::delayed("poi", Duration::from_secs(5), |_, _| Ok(pois())),
        ..Providers::healthy()
    };
    let config = fast_config().with_run_timeout(Some(Duration::from_millis(100)));
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        config,
    )
    .await;

    let state = executor.run(beijing(2)).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.failure.as_ref().unwrap().contains("timed out"));
    assert_eq!(state.step("point_of_interest").unwrap().status, StepStatus::Failed);
    assert_eq!(state.step("weather").unwrap().status, StepStatus::Succeeded);
    assert!(state.itinerary.is_none());
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_concurrent_identical_calls_compute_once() {
    let tool = MockTool::delayed("poi", Duration::from_millis(50), |_, _| Ok(pois()));
    let cache = memory_cache();
    let fingerprint = Fingerprint::derive("point_of_interest", &json!({"city": "北京"}));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let tool = tool.clone();
        let fingerprint = fingerprint.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(&fingerprint, Duration::from_secs(60), move || async move {
                    tool.invoke(json!({"city": "北京"}), Duration::from_secs(1)).await
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), pois());
    }
    assert_eq!(tool.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 9);
}

#[tokio::test]
async fn test_cache_is_shared_across_runs() {
    let providers = Providers::healthy();
    let executor = executor_with(
        providers.registry().await,
        Arc::new(MemoryCheckpointStore::new()),
        fast_config(),
    )
    .await;

    let first = executor.run(beijing(2)).await.unwrap();
    let second = executor.run(beijing(2)).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.itinerary, second.itinerary);
    assert_eq!(providers.poi.calls(), 1);
    assert_eq!(providers.weather.calls(), 1);
    assert_eq!(providers.lodging.calls(), 1);
}

// ============================================================================
// Checkpoints and resumption
// ============================================================================

/// A Running state where point of interest and weather already succeeded
fn interrupted_state() -> WorkflowState {
    let request = beijing(2).normalize(30).unwrap();
    let mut state = WorkflowState::new("interrupted-run", request);
    state.status = RunStatus::Running;
    state.revision = 1;

    for (name, payload) in [("point_of_interest", pois()), ("weather", sunny_forecast())] {
        let step = state.step_mut(name);
        step.status = StepStatus::Succeeded;
        step.payload = Some(payload);
        step.attempts = 1;
    }
    state.step_mut("lodging").status = StepStatus::Running;
    state
}

#[tokio::test]
async fn test_resume_runs_only_unfinished_steps() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    save_state(store.as_ref(), &interrupted_state()).await.unwrap();

    let providers = Providers::healthy();
    let executor = executor_with(providers.registry().await, store.clone(), fast_config()).await;
    let state = executor.resume("interrupted-run").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(providers.poi.calls(), 0);
    assert_eq!(providers.weather.calls(), 0);
    assert_eq!(providers.lodging.calls(), 1);

    let latest = load_state(store.as_ref(), "interrupted-run").await.unwrap();
    assert_eq!(latest, state);
    assert!(latest.revision > 1);
}

#[tokio::test]
async fn test_resume_from_sqlite_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");

    {
        let store = SqliteCheckpointStore::open(&db).unwrap();
        save_state(&store, &interrupted_state()).await.unwrap();
    }

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
    let providers = Providers::healthy();
    let executor = executor_with(providers.registry().await, store.clone(), fast_config()).await;
    let state = executor.resume("interrupted-run").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(providers.poi.calls(), 0);
    assert_eq!(providers.lodging.calls(), 1);

    let revisions = store.revisions("interrupted-run").await.unwrap();
    assert_eq!(revisions.first(), Some(&1));
    assert_eq!(revisions.last(), Some(&state.revision));
}

#[tokio::test]
async fn test_resuming_terminal_run_is_noop() {
    let providers = Providers::healthy();
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    let executor = executor_with(providers.registry().await, store, fast_config()).await;

    let finished = executor.run(beijing(2)).await.unwrap();
    let resumed = executor.resume(&finished.run_id).await.unwrap();

    assert_eq!(resumed, finished);
    assert_eq!(providers.poi.calls(), 1);
}

#[tokio::test]
async fn test_stale_driver_is_superseded() {
    let providers = Providers::healthy();
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    let executor = executor_with(providers.registry().await, store.clone(), fast_config()).await;

    let stale = executor.initialize(beijing(2)).await.unwrap();
    let finished = executor.resume(&stale.run_id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);

    // The stale copy still says Pending at revision 1
    let outcome = executor.drive(stale).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.revision, finished.revision);
    assert_eq!(providers.poi.calls(), 1);
}
