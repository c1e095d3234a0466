use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use query_governance_core::{
    apply_action, deadline_display, extend_deadline as shift_deadline, AppliedTransition,
    AuditRecord, CacheEntry, DeadlineDisplay, DisableCause, ExtensionOutcome, GovernanceAction,
    ItemKey, ItemStatus, JobRef, TrackedItem, DEFAULT_CACHE_TTL_SECONDS,
    DEFAULT_REMEDIATION_DAYS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

pub const ENGINE_CONTRACT_VERSION: &str = "governance-engine.v1";

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GovernanceConfig {
    pub remediation_days: i64,
    pub sweep_interval_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub refresh_timeout_seconds: u64,
    pub notification_channel: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            remediation_days: DEFAULT_REMEDIATION_DAYS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            refresh_timeout_seconds: DEFAULT_REFRESH_TIMEOUT_SECONDS,
            notification_channel: "governance-alerts".to_string(),
        }
    }
}

impl GovernanceConfig {
    #[must_use]
    pub fn remediation_period(&self) -> Duration {
        Duration::days(self.remediation_days)
    }

    #[must_use]
    pub fn refresh_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.refresh_timeout_seconds)
    }
}

/// Who is performing a mutation. Carried per request; there is no ambient
/// actor state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorContext {
    pub actor: String,
}

impl ActorContext {
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into() }
    }
}

/// Whole-table record persistence. `write_all` replaces the entire record
/// set; per-key atomicity is the engine's responsibility, not the store's.
pub trait RecordStore: Send {
    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn read_all(&mut self) -> Result<Vec<TrackedItem>>;

    /// # Errors
    /// Returns an error when the snapshot cannot be committed.
    fn write_all(&mut self, items: &[TrackedItem]) -> Result<()>;
}

/// Enable/disable surface of the underlying query platform. Both calls are
/// idempotent: disabling an already-disabled query succeeds.
pub trait SuspendControl: Send {
    /// # Errors
    /// Returns an error when the platform rejects or cannot receive the call.
    fn disable(&mut self, key: &ItemKey) -> Result<()>;

    /// # Errors
    /// Returns an error when the platform rejects or cannot receive the call.
    fn enable(&mut self, key: &ItemKey) -> Result<()>;
}

pub trait AuditLog: Send {
    /// # Errors
    /// Returns an error when the record cannot be appended.
    fn append(&mut self, record: &AuditRecord) -> Result<()>;

    /// # Errors
    /// Returns an error when the trail cannot be read.
    fn list(&mut self, key: Option<&ItemKey>) -> Result<Vec<AuditRecord>>;
}

pub trait NotificationDispatcher: Send {
    fn preview(&self, items: &[TrackedItem]) -> String;

    /// # Errors
    /// Returns an error when dispatch fails; the caller treats this as
    /// observational and never rolls back on it.
    fn send(&mut self, items: &[TrackedItem], channel: &str) -> Result<()>;
}

/// Launches the expensive fleet-analysis job and dereferences its results.
/// `fetch` takes `&self` so readers are never serialized behind a refresh.
pub trait AnalysisJobRunner: Send + Sync {
    /// # Errors
    /// Returns an error when the job fails or exceeds `timeout`.
    fn run(&self, timeout: StdDuration) -> Result<JobRef>;

    /// # Errors
    /// Returns an error when the referenced results cannot be retrieved.
    fn fetch(&self, job: &JobRef) -> Result<Vec<Value>>;
}

/// One yes/no question to whoever initiated the operation. Consulted exactly
/// once, by the deadline reduction that would land in the past.
pub trait ConfirmationSurface {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Fixed answer, for non-interactive callers.
#[derive(Debug, Clone, Copy)]
pub struct PresetConfirmation(pub bool);

impl ConfirmationSurface for PresetConfirmation {
    fn confirm(&mut self, _prompt: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchRequest {
    pub keys: Vec<ItemKey>,
    pub action: GovernanceAction,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum KeyOutcome {
    Applied { from: ItemStatus, to: ItemStatus },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub key: ItemKey,
    pub outcome: KeyOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemView {
    pub item: TrackedItem,
    pub display: DeadlineDisplay,
    pub countdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    #[serde(with = "time::serde::rfc3339")]
    pub swept_at: OffsetDateTime,
    pub checked: usize,
    pub disabled: Vec<ItemKey>,
    pub failed: Vec<ItemKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtendRequest {
    pub key: ItemKey,
    pub delta_days: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtendOutcome {
    Applied {
        #[serde(with = "time::serde::rfc3339")]
        new_deadline: OffsetDateTime,
    },
    /// The reduction crossed into the past and the caller confirmed the
    /// disable instead.
    DisabledInstead,
    /// The reduction crossed into the past and the caller declined; nothing
    /// changed.
    Declined { prompt: String },
    Rejected { reason: String },
}

struct EngineInner {
    store: Box<dyn RecordStore>,
    suspend: Box<dyn SuspendControl>,
    audit: Box<dyn AuditLog>,
    notifier: Box<dyn NotificationDispatcher>,
}

impl EngineInner {
    fn record_audit(&mut self, record: &AuditRecord) {
        if let Err(err) = self.audit.append(record) {
            warn!(action = %record.action, error = %format!("{err:#}"), "audit append failed");
        }
    }
}

/// The governance control loop: all tracked-item mutations (batch actions,
/// deadline extensions, and the auto-disable sweep) serialize through one
/// writer lock around the store's read-merge-write cycle.
pub struct GovernanceEngine {
    inner: Mutex<EngineInner>,
    config: GovernanceConfig,
}

impl GovernanceEngine {
    #[must_use]
    pub fn new(
        store: Box<dyn RecordStore>,
        suspend: Box<dyn SuspendControl>,
        audit: Box<dyn AuditLog>,
        notifier: Box<dyn NotificationDispatcher>,
        config: GovernanceConfig,
    ) -> Self {
        Self { inner: Mutex::new(EngineInner { store, suspend, audit, notifier }), config }
    }

    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, EngineInner>> {
        self.inner.lock().map_err(|_| anyhow!("governance engine writer lock poisoned"))
    }

    /// Current record set with the countdown each item should display.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_items(&self, as_of: Option<OffsetDateTime>) -> Result<Vec<ItemView>> {
        let now = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let mut inner = self.lock_inner()?;
        let snapshot = inner.store.read_all().context("failed to read tracked items")?;
        let items = index_items(snapshot);
        Ok(items
            .into_values()
            .map(|item| {
                let display = deadline_display(&item, now);
                let countdown = display.label();
                ItemView { item, display, countdown }
            })
            .collect())
    }

    /// Apply one action to each requested key, returning a per-key outcome.
    /// Rejected keys never block applied ones, and the merged snapshot is
    /// committed once. Disable/enable call the suspend-control surface before
    /// the record transition is committed; notification and audit failures
    /// are logged and never roll a transition back.
    ///
    /// # Errors
    /// Returns an error only when the store itself cannot be read or written.
    pub fn apply(&self, request: &BatchRequest, ctx: &ActorContext) -> Result<Vec<ApplyOutcome>> {
        let now = request.as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let period = self.config.remediation_period();
        let mut inner = self.lock_inner()?;
        let snapshot = inner.store.read_all().context("failed to read tracked items")?;
        let mut items = index_items(snapshot);

        let creates_record = matches!(
            request.action,
            GovernanceAction::Flag { .. } | GovernanceAction::MarkSuspicious { .. }
        );

        let mut outcomes = Vec::with_capacity(request.keys.len());
        let mut applied: Vec<(ItemKey, AppliedTransition)> = Vec::new();
        let mut to_notify: Vec<TrackedItem> = Vec::new();

        for key in &request.keys {
            if !items.contains_key(key) {
                if creates_record {
                    items.insert(key.clone(), TrackedItem::new(key.clone()));
                } else {
                    outcomes.push(ApplyOutcome {
                        key: key.clone(),
                        outcome: KeyOutcome::Rejected { reason: "item is not tracked".to_string() },
                    });
                    continue;
                }
            }

            let Some(item) = items.get_mut(key) else { continue };
            let mut candidate = item.clone();
            match apply_action(&mut candidate, &request.action, &ctx.actor, now, period) {
                Err(err) => {
                    outcomes.push(ApplyOutcome {
                        key: key.clone(),
                        outcome: KeyOutcome::Rejected { reason: err.to_string() },
                    });
                }
                Ok(transition) => {
                    let gate = match &request.action {
                        GovernanceAction::Disable { .. } => inner.suspend.disable(key),
                        GovernanceAction::Enable => inner.suspend.enable(key),
                        _ => Ok(()),
                    };
                    if let Err(err) = gate {
                        outcomes.push(ApplyOutcome {
                            key: key.clone(),
                            outcome: KeyOutcome::Rejected {
                                reason: format!("suspend control failed: {err:#}"),
                            },
                        });
                        continue;
                    }

                    if matches!(request.action, GovernanceAction::Notify) {
                        to_notify.push(candidate.clone());
                    }
                    *item = candidate;
                    outcomes.push(ApplyOutcome {
                        key: key.clone(),
                        outcome: KeyOutcome::Applied { from: transition.from, to: transition.to },
                    });
                    applied.push((key.clone(), transition));
                }
            }
        }

        if !applied.is_empty() {
            let merged: Vec<TrackedItem> = items.into_values().collect();
            inner.store.write_all(&merged).context("failed to commit tracked items")?;
        }

        if !to_notify.is_empty() {
            let channel = self.config.notification_channel.clone();
            if let Err(err) = inner.notifier.send(&to_notify, &channel) {
                warn!(
                    channel = %channel,
                    items = to_notify.len(),
                    error = %format!("{err:#}"),
                    "notification dispatch failed"
                );
            }
        }

        for (key, transition) in &applied {
            let record = AuditRecord::new(
                now,
                transition.action.clone(),
                key.clone(),
                ctx.actor.clone(),
                format!("{} -> {}", transition.from, transition.to),
            );
            inner.record_audit(&record);
        }

        Ok(outcomes)
    }

    /// One scheduler tick: auto-disable every item whose deadline has passed.
    ///
    /// The suspend-control call happens before the record transition; when it
    /// fails the item is left untouched and picked up again on the next tick.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or written.
    pub fn sweep(&self, as_of: Option<OffsetDateTime>) -> Result<SweepReport> {
        let now = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let period = self.config.remediation_period();
        let mut inner = self.lock_inner()?;
        let snapshot = inner.store.read_all().context("failed to read tracked items")?;
        let mut items = index_items(snapshot);
        let checked = items.len();

        let overdue: Vec<ItemKey> =
            items.values().filter(|item| item.is_overdue(now)).map(|item| item.key.clone()).collect();

        let mut disabled = Vec::new();
        let mut failed = Vec::new();
        for key in overdue {
            if let Err(err) = inner.suspend.disable(&key) {
                warn!(
                    key = %key,
                    error = %format!("{err:#}"),
                    "suspend control failed during sweep; item left for next tick"
                );
                failed.push(key);
                continue;
            }
            let Some(item) = items.get_mut(&key) else { continue };
            let action = GovernanceAction::Disable { cause: DisableCause::DeadlineExpired };
            match apply_action(item, &action, "scheduler", now, period) {
                Ok(_) => disabled.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "sweep transition rejected");
                    failed.push(key);
                }
            }
        }

        if !disabled.is_empty() {
            let merged: Vec<TrackedItem> = items.values().cloned().collect();
            inner.store.write_all(&merged).context("failed to commit sweep results")?;
        }

        for key in &disabled {
            let record = AuditRecord::new(
                now,
                "auto-disabled",
                key.clone(),
                "scheduler",
                "deadline expired",
            );
            inner.record_audit(&record);
        }

        if !disabled.is_empty() || !failed.is_empty() {
            info!(checked, disabled = disabled.len(), failed = failed.len(), "sweep completed");
        }

        Ok(SweepReport { swept_at: now, checked, disabled, failed })
    }

    /// Shift one item's deadline by a signed number of days.
    ///
    /// A reduction that would land at or before `now` consults the
    /// confirmation surface: confirmed means the query is suspended and the
    /// item disabled instead; declined means nothing changes.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or written, or when a
    /// confirmed disable fails at the suspend-control surface.
    pub fn extend_deadline(
        &self,
        request: &ExtendRequest,
        ctx: &ActorContext,
        confirm: &mut dyn ConfirmationSurface,
    ) -> Result<ExtendOutcome> {
        let now = request.as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let period = self.config.remediation_period();
        let mut inner = self.lock_inner()?;
        let snapshot = inner.store.read_all().context("failed to read tracked items")?;
        let mut items = index_items(snapshot);

        let Some(item) = items.get_mut(&request.key) else {
            return Ok(ExtendOutcome::Rejected { reason: "item is not tracked".to_string() });
        };

        match shift_deadline(item, request.delta_days, now) {
            Err(err) => Ok(ExtendOutcome::Rejected { reason: err.to_string() }),
            Ok(ExtensionOutcome::Applied { new_deadline }) => {
                let merged: Vec<TrackedItem> = items.values().cloned().collect();
                inner.store.write_all(&merged).context("failed to commit deadline change")?;
                let record = AuditRecord::new(
                    now,
                    "extend_deadline",
                    request.key.clone(),
                    ctx.actor.clone(),
                    format!("{:+} days; new deadline {new_deadline}", request.delta_days),
                );
                inner.record_audit(&record);
                Ok(ExtendOutcome::Applied { new_deadline })
            }
            Ok(ExtensionOutcome::WouldExpire { .. }) => {
                let prompt = format!(
                    "Shifting the deadline for {} by {:+} days would leave it overdue. \
                     Disable the query now instead?",
                    request.key, request.delta_days
                );
                if !confirm.confirm(&prompt) {
                    return Ok(ExtendOutcome::Declined { prompt });
                }

                inner
                    .suspend
                    .disable(&request.key)
                    .with_context(|| format!("suspend control failed disabling {}", request.key))?;
                let action = GovernanceAction::Disable { cause: DisableCause::Manual };
                apply_action(item, &action, &ctx.actor, now, period)
                    .map_err(|err| anyhow!("confirmed disable rejected: {err}"))?;

                let merged: Vec<TrackedItem> = items.values().cloned().collect();
                inner.store.write_all(&merged).context("failed to commit confirmed disable")?;
                let record = AuditRecord::new(
                    now,
                    "disable",
                    request.key.clone(),
                    ctx.actor.clone(),
                    "confirmed during deadline reduction into the past",
                );
                inner.record_audit(&record);
                Ok(ExtendOutcome::DisabledInstead)
            }
        }
    }

    /// Render the notification body for the given keys without dispatching.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn notification_preview(&self, keys: &[ItemKey]) -> Result<String> {
        let mut inner = self.lock_inner()?;
        let snapshot = inner.store.read_all().context("failed to read tracked items")?;
        let items = index_items(snapshot);
        let selected: Vec<TrackedItem> =
            keys.iter().filter_map(|key| items.get(key).cloned()).collect();
        Ok(inner.notifier.preview(&selected))
    }

    /// Audit trail, optionally restricted to one key.
    ///
    /// # Errors
    /// Returns an error when the audit log cannot be read.
    pub fn audit_log(&self, key: Option<&ItemKey>) -> Result<Vec<AuditRecord>> {
        self.lock_inner()?.audit.list(key)
    }
}

fn index_items(snapshot: Vec<TrackedItem>) -> BTreeMap<ItemKey, TrackedItem> {
    let mut items = BTreeMap::new();
    for item in snapshot {
        if let Some(previous) = items.insert(item.key.clone(), item) {
            warn!(key = %previous.key, "duplicate tracked item collapsed on read");
        }
    }
    items
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStatus {
    pub entry: Option<CacheEntry>,
    pub stale: bool,
}

/// Single-entry cache in front of the expensive fleet-analysis job.
///
/// Refreshes are serialized and coalesced: a caller that waited behind an
/// in-flight refresh returns that refresh's entry instead of re-running the
/// job. The entry lock is never held while the job runs, so readers are
/// served the last good entry throughout.
pub struct JobResultCache {
    runner: Box<dyn AnalysisJobRunner>,
    entry: RwLock<Option<CacheEntry>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    ttl_seconds: u64,
    refresh_timeout: StdDuration,
}

impl JobResultCache {
    #[must_use]
    pub fn new(
        runner: Box<dyn AnalysisJobRunner>,
        ttl_seconds: u64,
        refresh_timeout: StdDuration,
    ) -> Self {
        Self {
            runner,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            ttl_seconds,
            refresh_timeout,
        }
    }

    fn current_entry(&self) -> Result<Option<CacheEntry>> {
        self.entry
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("cache entry lock poisoned"))
    }

    /// Run the analysis job and replace the cached entry.
    ///
    /// # Errors
    /// Returns the job failure; the previous entry stays authoritative.
    pub fn refresh(&self, as_of: Option<OffsetDateTime>) -> Result<CacheEntry> {
        let observed = self.generation.load(Ordering::Acquire);
        let serialize =
            self.refresh_lock.lock().map_err(|_| anyhow!("cache refresh lock poisoned"))?;

        if self.generation.load(Ordering::Acquire) != observed {
            // Another caller finished a refresh while we waited on the lock.
            if let Some(entry) = self.current_entry()? {
                return Ok(entry);
            }
        }

        let job = self
            .runner
            .run(self.refresh_timeout)
            .context("analysis job failed; previous cache entry retained")?;
        let rows = self
            .runner
            .fetch(&job)
            .context("analysis result fetch failed; previous cache entry retained")?;

        let entry = CacheEntry {
            job_ref: job,
            cached_at: as_of.unwrap_or_else(OffsetDateTime::now_utc),
            ttl_seconds: self.ttl_seconds,
            record_count: rows.len(),
        };
        {
            let mut slot =
                self.entry.write().map_err(|_| anyhow!("cache entry lock poisoned"))?;
            *slot = Some(entry.clone());
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(serialize);
        Ok(entry)
    }

    /// Fetch the rows behind the current entry, stale or not.
    ///
    /// # Errors
    /// Returns an error when no entry exists yet or the fetch fails.
    pub fn read(&self) -> Result<Vec<Value>> {
        let Some(entry) = self.current_entry()? else {
            return Err(anyhow!("no cached analysis result; run a refresh first"));
        };
        self.runner.fetch(&entry.job_ref).context("failed to fetch cached analysis result")
    }

    /// # Errors
    /// Returns an error when the entry lock is poisoned.
    pub fn status(&self, now: OffsetDateTime) -> Result<CacheStatus> {
        let entry = self.current_entry()?;
        let stale = entry.as_ref().map_or(true, |entry| entry.is_stale(now));
        Ok(CacheStatus { entry, stale })
    }
}

fn render_notification(items: &[TrackedItem]) -> String {
    let mut body = String::from("The following scheduled queries require remediation:\n");
    for item in items {
        body.push_str(&format!(
            "- {} (owner {}, app {}): {}",
            item.key.name, item.key.owner, item.key.app, item.reason
        ));
        if let Some(deadline) = item.remediation_deadline {
            body.push_str(&format!(" [deadline {deadline}]"));
        }
        body.push('\n');
    }
    body
}

/// Dry-run suspend control: logs the call and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSuspendControl;

impl SuspendControl for LogSuspendControl {
    fn disable(&mut self, key: &ItemKey) -> Result<()> {
        info!(key = %key, "dry-run suspend control: disable");
        Ok(())
    }

    fn enable(&mut self, key: &ItemKey) -> Result<()> {
        info!(key = %key, "dry-run suspend control: enable");
        Ok(())
    }
}

/// Dry-run dispatcher: renders the notification and logs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewNotifier;

impl NotificationDispatcher for PreviewNotifier {
    fn preview(&self, items: &[TrackedItem]) -> String {
        render_notification(items)
    }

    fn send(&mut self, items: &[TrackedItem], channel: &str) -> Result<()> {
        info!(channel = %channel, items = items.len(), "dry-run notification dispatched");
        Ok(())
    }
}

/// Suspend control backed by a webhook endpoint exposing
/// `POST {base}/disable` and `POST {base}/enable`.
pub struct HttpSuspendControl {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpSuspendControl {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent: ureq::AgentBuilder::new().timeout(StdDuration::from_secs(30)).build(),
        }
    }

    fn post(&self, verb: &str, key: &ItemKey) -> Result<()> {
        let url = format!("{}/{verb}", self.base_url);
        self.agent
            .post(&url)
            .send_json(serde_json::json!({
                "name": key.name,
                "owner": key.owner,
                "app": key.app,
            }))
            .with_context(|| format!("suspend control {verb} call failed for {key}"))?;
        Ok(())
    }
}

impl SuspendControl for HttpSuspendControl {
    fn disable(&mut self, key: &ItemKey) -> Result<()> {
        self.post("disable", key)
    }

    fn enable(&mut self, key: &ItemKey) -> Result<()> {
        self.post("enable", key)
    }
}

/// Dispatcher backed by a webhook endpoint accepting the rendered body.
pub struct HttpNotifier {
    url: String,
    agent: ureq::Agent,
}

impl HttpNotifier {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(StdDuration::from_secs(30)).build(),
        }
    }
}

impl NotificationDispatcher for HttpNotifier {
    fn preview(&self, items: &[TrackedItem]) -> String {
        render_notification(items)
    }

    fn send(&mut self, items: &[TrackedItem], channel: &str) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(serde_json::json!({
                "channel": channel,
                "body": render_notification(items),
            }))
            .with_context(|| format!("notification webhook call failed ({} items)", items.len()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RunJobResponse {
    job_ref: String,
}

/// Analysis runner backed by a job service exposing `POST {base}/jobs` and
/// `GET {base}/jobs/{ref}/results`.
pub struct HttpAnalysisRunner {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpAnalysisRunner {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), agent: ureq::AgentBuilder::new().build() }
    }
}

impl AnalysisJobRunner for HttpAnalysisRunner {
    fn run(&self, timeout: StdDuration) -> Result<JobRef> {
        let url = format!("{}/jobs", self.base_url);
        let response: RunJobResponse = self
            .agent
            .post(&url)
            .timeout(timeout)
            .send_json(serde_json::json!({ "timeout_seconds": timeout.as_secs() }))
            .context("analysis job submission failed")?
            .into_json()
            .context("analysis job submission returned malformed JSON")?;
        Ok(JobRef(response.job_ref))
    }

    fn fetch(&self, job: &JobRef) -> Result<Vec<Value>> {
        let url = format!("{}/jobs/{job}/results", self.base_url);
        self.agent
            .get(&url)
            .call()
            .with_context(|| format!("analysis result fetch failed for job {job}"))?
            .into_json()
            .context("analysis results were not a JSON array")
    }
}
