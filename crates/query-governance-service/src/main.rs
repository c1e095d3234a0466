use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use query_governance_core::{
    AuditRecord, DisableCause, GovernanceAction, ItemKey, JobRef,
};
use query_governance_engine::{
    ActorContext, AnalysisJobRunner, ApplyOutcome, BatchRequest, CacheStatus, ExtendOutcome,
    ExtendRequest, GovernanceConfig, GovernanceEngine, HttpAnalysisRunner, HttpNotifier,
    HttpSuspendControl, ItemView, JobResultCache, LogSuspendControl, PresetConfirmation,
    PreviewNotifier, SweepReport, ENGINE_CONTRACT_VERSION,
};
use query_governance_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

const SERVICE_CONTRACT_VERSION: &str = "governance-service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    engine: Arc<GovernanceEngine>,
    cache: Arc<JobResultCache>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    engine_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "query-governance-service")]
#[command(about = "Local HTTP service for scheduled-query governance")]
struct Args {
    #[arg(long, default_value = "./query_governance.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 7)]
    remediation_days: i64,
    /// Seconds between auto-disable sweep ticks; 0 disables the background
    /// sweeper.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,
    #[arg(long, default_value_t = 86_400)]
    cache_ttl_secs: u64,
    #[arg(long, default_value_t = 300)]
    refresh_timeout_secs: u64,
    /// Seconds between staleness checks of the background cache refresher.
    #[arg(long, default_value_t = 300)]
    cache_poll_interval_secs: u64,
    #[arg(long, default_value = "governance-alerts")]
    notification_channel: String,
    /// Webhook base URL for the query platform's enable/disable surface.
    /// Absent means dry-run: suspend calls are logged and succeed.
    #[arg(long)]
    suspend_url: Option<String>,
    /// Webhook URL for notification dispatch. Absent means dry-run.
    #[arg(long)]
    notify_url: Option<String>,
    /// Base URL of the fleet-analysis job service. Absent disables cache
    /// refreshes.
    #[arg(long)]
    analysis_url: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

fn service_error(message: impl Into<String>) -> ServiceError {
    ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        engine_contract_version: ENGINE_CONTRACT_VERSION,
        data,
    }
}

struct UnconfiguredRunner;

impl AnalysisJobRunner for UnconfiguredRunner {
    fn run(&self, _timeout: StdDuration) -> Result<JobRef> {
        Err(anyhow!("no analysis runner configured; start with --analysis-url"))
    }

    fn fetch(&self, _job: &JobRef) -> Result<Vec<serde_json::Value>> {
        Err(anyhow!("no analysis runner configured; start with --analysis-url"))
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/items", get(items_list))
        .route("/v1/actions/flag", post(action_flag))
        .route("/v1/actions/suspect", post(action_suspect))
        .route("/v1/actions/notify", post(action_notify))
        .route("/v1/actions/dispute", post(action_dispute))
        .route("/v1/actions/review/approve", post(review_approve))
        .route("/v1/actions/review/reject", post(review_reject))
        .route("/v1/actions/whitelist", post(action_whitelist))
        .route("/v1/actions/disable", post(action_disable))
        .route("/v1/actions/enable", post(action_enable))
        .route("/v1/actions/resolve", post(action_resolve))
        .route("/v1/deadline/extend", post(deadline_extend))
        .route("/v1/sweep", post(sweep_run))
        .route("/v1/cache/refresh", post(cache_refresh))
        .route("/v1/cache", get(cache_status))
        .route("/v1/cache/results", get(cache_results))
        .route("/v1/audit", get(audit_list))
        .with_state(state)
}

fn build_state(args: &Args) -> Result<ServiceState> {
    let mut store = SqliteStore::open(&args.db)?;
    store.migrate()?;
    let audit = SqliteStore::open(&args.db)?;

    let suspend: Box<dyn query_governance_engine::SuspendControl> = match &args.suspend_url {
        Some(url) => Box::new(HttpSuspendControl::new(url.clone())),
        None => Box::new(LogSuspendControl),
    };
    let notifier: Box<dyn query_governance_engine::NotificationDispatcher> =
        match &args.notify_url {
            Some(url) => Box::new(HttpNotifier::new(url.clone())),
            None => Box::new(PreviewNotifier),
        };
    let runner: Box<dyn AnalysisJobRunner> = match &args.analysis_url {
        Some(url) => Box::new(HttpAnalysisRunner::new(url.clone())),
        None => Box::new(UnconfiguredRunner),
    };

    let config = GovernanceConfig {
        remediation_days: args.remediation_days,
        sweep_interval_seconds: args.sweep_interval_secs,
        cache_ttl_seconds: args.cache_ttl_secs,
        refresh_timeout_seconds: args.refresh_timeout_secs,
        notification_channel: args.notification_channel.clone(),
    };
    let cache = JobResultCache::new(
        runner,
        config.cache_ttl_seconds,
        config.refresh_timeout(),
    );
    let engine =
        GovernanceEngine::new(Box::new(store), suspend, Box::new(audit), notifier, config);

    Ok(ServiceState { engine: Arc::new(engine), cache: Arc::new(cache) })
}

fn spawn_sweeper(engine: Arc<GovernanceEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let engine = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || engine.sweep(None)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %format!("{err:#}"), "background sweep failed"),
                Err(err) => warn!(error = %err, "background sweep task panicked"),
            }
        }
    });
}

fn spawn_cache_refresher(cache: Arc<JobResultCache>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let stale = match cache.status(OffsetDateTime::now_utc()) {
                Ok(status) => status.stale,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "cache status check failed");
                    continue;
                }
            };
            if !stale {
                continue;
            }
            let cache = Arc::clone(&cache);
            match tokio::task::spawn_blocking(move || cache.refresh(None)).await {
                Ok(Ok(entry)) => {
                    info!(records = entry.record_count, "background cache refresh completed");
                }
                Ok(Err(err)) => warn!(error = %format!("{err:#}"), "background cache refresh failed"),
                Err(err) => warn!(error = %err, "cache refresh task panicked"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let state = build_state(&args)?;

    if args.sweep_interval_secs > 0 {
        spawn_sweeper(Arc::clone(&state.engine), args.sweep_interval_secs);
    }
    if args.analysis_url.is_some() {
        spawn_cache_refresher(Arc::clone(&state.cache), args.cache_poll_interval_secs);
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "query governance service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

#[derive(Debug, Clone, Deserialize)]
struct AsOfQuery {
    as_of: Option<String>,
}

fn parse_as_of(raw: Option<&str>) -> Result<Option<OffsetDateTime>, ServiceError> {
    raw.map(|value| {
        OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
            .map_err(|err| service_error(format!("invalid as_of timestamp `{value}`: {err}")))
    })
    .transpose()
}

async fn items_list(
    State(state): State<ServiceState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<ServiceEnvelope<Vec<ItemView>>>, ServiceError> {
    let as_of = parse_as_of(query.as_of.as_deref())?;
    let views = state
        .engine
        .list_items(as_of)
        .map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(views)))
}

fn run_batch(
    state: &ServiceState,
    keys: Vec<ItemKey>,
    action: GovernanceAction,
    actor: String,
    as_of: Option<OffsetDateTime>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    let request = BatchRequest { keys, action, as_of };
    let outcomes = state
        .engine
        .apply(&request, &ActorContext::new(actor))
        .map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(outcomes)))
}

#[derive(Debug, Clone, Deserialize)]
struct FlagRequestBody {
    keys: Vec<ItemKey>,
    reason: String,
    actor: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn action_flag(
    State(state): State<ServiceState>,
    Json(body): Json<FlagRequestBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(
        &state,
        body.keys,
        GovernanceAction::Flag { reason: body.reason },
        body.actor,
        body.as_of,
    )
}

#[derive(Debug, Clone, Deserialize)]
struct SuspectRequestBody {
    keys: Vec<ItemKey>,
    detail: String,
    actor: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn action_suspect(
    State(state): State<ServiceState>,
    Json(body): Json<SuspectRequestBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(
        &state,
        body.keys,
        GovernanceAction::MarkSuspicious { detail: body.detail },
        body.actor,
        body.as_of,
    )
}

#[derive(Debug, Clone, Deserialize)]
struct SimpleActionBody {
    keys: Vec<ItemKey>,
    actor: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn action_notify(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::Notify, body.actor, body.as_of)
}

async fn action_dispute(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::Dispute, body.actor, body.as_of)
}

async fn review_approve(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::ApproveReview, body.actor, body.as_of)
}

async fn review_reject(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::RejectReview, body.actor, body.as_of)
}

#[derive(Debug, Clone, Deserialize)]
struct WhitelistRequestBody {
    keys: Vec<ItemKey>,
    note: String,
    actor: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn action_whitelist(
    State(state): State<ServiceState>,
    Json(body): Json<WhitelistRequestBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(
        &state,
        body.keys,
        GovernanceAction::Whitelist { note: body.note },
        body.actor,
        body.as_of,
    )
}

async fn action_disable(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(
        &state,
        body.keys,
        GovernanceAction::Disable { cause: DisableCause::Manual },
        body.actor,
        body.as_of,
    )
}

async fn action_enable(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::Enable, body.actor, body.as_of)
}

async fn action_resolve(
    State(state): State<ServiceState>,
    Json(body): Json<SimpleActionBody>,
) -> Result<Json<ServiceEnvelope<Vec<ApplyOutcome>>>, ServiceError> {
    run_batch(&state, body.keys, GovernanceAction::Resolve, body.actor, body.as_of)
}

#[derive(Debug, Clone, Deserialize)]
struct ExtendRequestBody {
    key: ItemKey,
    days: i64,
    actor: String,
    #[serde(default)]
    confirm_disable: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn deadline_extend(
    State(state): State<ServiceState>,
    Json(body): Json<ExtendRequestBody>,
) -> Result<Json<ServiceEnvelope<ExtendOutcome>>, ServiceError> {
    let request = ExtendRequest { key: body.key, delta_days: body.days, as_of: body.as_of };
    let mut confirm = PresetConfirmation(body.confirm_disable);
    let outcome = state
        .engine
        .extend_deadline(&request, &ActorContext::new(body.actor), &mut confirm)
        .map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(outcome)))
}

#[derive(Debug, Clone, Deserialize)]
struct SweepRequestBody {
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

async fn sweep_run(
    State(state): State<ServiceState>,
    Json(body): Json<SweepRequestBody>,
) -> Result<Json<ServiceEnvelope<SweepReport>>, ServiceError> {
    let report =
        state.engine.sweep(body.as_of).map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(report)))
}

async fn cache_refresh(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<query_governance_core::CacheEntry>>, ServiceError> {
    let entry =
        state.cache.refresh(None).map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(entry)))
}

async fn cache_status(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<CacheStatus>>, ServiceError> {
    let status = state
        .cache
        .status(OffsetDateTime::now_utc())
        .map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(status)))
}

async fn cache_results(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<serde_json::Value>>>, ServiceError> {
    let rows = state.cache.read().map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(rows)))
}

#[derive(Debug, Clone, Deserialize)]
struct AuditQuery {
    name: Option<String>,
    owner: Option<String>,
    app: Option<String>,
}

async fn audit_list(
    State(state): State<ServiceState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ServiceEnvelope<Vec<AuditRecord>>>, ServiceError> {
    let key = match (query.name, query.owner, query.app) {
        (Some(name), Some(owner), Some(app)) => Some(ItemKey::new(name, owner, app)),
        (None, None, None) => None,
        _ => {
            return Err(service_error(
                "audit filter requires name, owner, and app together",
            ))
        }
    };
    let records = state
        .engine
        .audit_log(key.as_ref())
        .map_err(|err| service_error(format!("{err:#}")))?;
    Ok(Json(envelope(records)))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use http::Request;
    use query_governance_core::JobRef;
    use tower::ServiceExt;

    use super::*;

    const FIXTURE_AS_OF: &str = "2023-11-14T22:13:20Z";
    const FIXTURE_LATER: &str = "2023-12-01T00:00:00Z";

    struct StaticRunner;

    impl AnalysisJobRunner for StaticRunner {
        fn run(&self, _timeout: StdDuration) -> Result<JobRef> {
            Ok(JobRef("job-1".to_string()))
        }

        fn fetch(&self, _job: &JobRef) -> Result<Vec<serde_json::Value>> {
            Ok(vec![serde_json::json!({"query": "alpha", "cost": 12.5})])
        }
    }

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("query-governance-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_state() -> ServiceState {
        let path = unique_temp_db_path();
        let mut store = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("open failed: {err:#}"),
        };
        if let Err(err) = store.migrate() {
            panic!("migrate failed: {err:#}");
        }
        let audit = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("audit open failed: {err:#}"),
        };

        let config = GovernanceConfig::default();
        let cache = JobResultCache::new(
            Box::new(StaticRunner),
            config.cache_ttl_seconds,
            config.refresh_timeout(),
        );
        let engine = GovernanceEngine::new(
            Box::new(store),
            Box::new(LogSuspendControl),
            Box::new(audit),
            Box::new(PreviewNotifier),
            config,
        );
        ServiceState { engine: Arc::new(engine), cache: Arc::new(cache) }
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let request = match body {
            Some(body) => Request::builder()
                .uri(uri)
                .method(method)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => Request::builder().uri(uri).method(method).body(Body::empty()),
        };
        let request = request.unwrap_or_else(|err| panic!("failed to build request: {err}"));
        match router.oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    fn key_json(name: &str) -> serde_json::Value {
        serde_json::json!({"name": name, "owner": "rbarnes", "app": "search_ops"})
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_reports_contract_versions() {
        let response = send(app(test_state()), "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.get("engine_contract_version").and_then(serde_json::Value::as_str),
            Some(ENGINE_CONTRACT_VERSION)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn flag_then_list_shows_awaiting_notification() {
        let state = test_state();

        let response = send(
            app(state.clone()),
            "POST",
            "/v1/actions/flag",
            Some(serde_json::json!({
                "keys": [key_json("alpha")],
                "reason": "runs hourly over all time",
                "actor": "gov-admin",
                "as_of": FIXTURE_AS_OF,
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"][0]["outcome"]["result"], "applied");
        assert_eq!(value["data"][0]["outcome"]["to"], "flagged");

        let response = send(
            app(state),
            "GET",
            &format!("/v1/items?as_of={}", FIXTURE_AS_OF.replace(':', "%3A")),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"][0]["item"]["status"], "flagged");
        assert_eq!(value["data"][0]["countdown"], "Awaiting notification");
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn extend_zero_days_is_rejected_with_reason() {
        let response = send(
            app(test_state()),
            "POST",
            "/v1/deadline/extend",
            Some(serde_json::json!({
                "key": key_json("alpha"),
                "days": 0,
                "actor": "gov-admin",
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"]["outcome"], "rejected");
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn sweep_disables_overdue_items() {
        let state = test_state();

        let flag = send(
            app(state.clone()),
            "POST",
            "/v1/actions/flag",
            Some(serde_json::json!({
                "keys": [key_json("expired")],
                "reason": "expensive",
                "actor": "gov-admin",
                "as_of": FIXTURE_AS_OF,
            })),
        )
        .await;
        assert_eq!(flag.status(), StatusCode::OK);

        let notify = send(
            app(state.clone()),
            "POST",
            "/v1/actions/notify",
            Some(serde_json::json!({
                "keys": [key_json("expired")],
                "actor": "gov-admin",
                "as_of": FIXTURE_AS_OF,
            })),
        )
        .await;
        assert_eq!(notify.status(), StatusCode::OK);

        // FIXTURE_LATER is more than seven days past FIXTURE_AS_OF.
        let response = send(
            app(state.clone()),
            "POST",
            "/v1/sweep",
            Some(serde_json::json!({"as_of": FIXTURE_LATER})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"]["disabled"][0]["name"], "expired");

        let audit = send(app(state), "GET", "/v1/audit?name=expired&owner=rbarnes&app=search_ops", None).await;
        let value = response_json(audit).await;
        let actions: Vec<&str> = value["data"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|record| record["action"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(actions.len(), 3, "got: {actions:?}");
        assert!(actions.contains(&"flag") && actions.contains(&"notify"), "got: {actions:?}");
        assert_eq!(actions[2], "auto-disabled");
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn audit_filter_requires_full_key() {
        let response = send(app(test_state()), "GET", "/v1/audit?name=alpha", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn cache_refresh_then_read_round_trip() {
        let state = test_state();

        let response = send(app(state.clone()), "POST", "/v1/cache/refresh", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"]["record_count"], 1);

        let response = send(app(state.clone()), "GET", "/v1/cache", None).await;
        let value = response_json(response).await;
        assert_eq!(value["data"]["stale"], false);

        let response = send(app(state), "GET", "/v1/cache/results", None).await;
        let value = response_json(response).await;
        assert_eq!(value["data"][0]["query"], "alpha");
    }

    // Test IDs: TSVC-007
    #[test]
    fn every_background_cadence_is_a_flag() {
        let defaults = match Args::try_parse_from(["query-governance-service"]) {
            Ok(args) => args,
            Err(err) => panic!("default args should parse: {err}"),
        };
        assert_eq!(defaults.sweep_interval_secs, 30);
        assert_eq!(defaults.cache_poll_interval_secs, 300);

        let tuned = match Args::try_parse_from([
            "query-governance-service",
            "--cache-poll-interval-secs",
            "60",
        ]) {
            Ok(args) => args,
            Err(err) => panic!("tuned args should parse: {err}"),
        };
        assert_eq!(tuned.cache_poll_interval_secs, 60);
    }
}
