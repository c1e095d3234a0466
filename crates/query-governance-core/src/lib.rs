use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const DEFAULT_REMEDIATION_DAYS: i64 = 7;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GovernanceError {
    #[error("reason MUST be non-empty when flagging")]
    EmptyReason,
    #[error("whitelist note MUST be non-empty")]
    EmptyWhitelistNote,
    #[error("item is already flagged")]
    AlreadyFlagged,
    #[error("item is whitelisted and exempt from automated flagging")]
    WhitelistedExempt,
    #[error("extension days MUST be non-zero")]
    ZeroExtension,
    #[error("no active deadline to extend")]
    NoActiveDeadline,
    #[error("{action} is not allowed from status {from}")]
    InvalidTransition { from: ItemStatus, action: String },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Identity of one governed scheduled query. Stable across status changes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemKey {
    pub name: String,
    pub owner: String,
    pub app: String,
}

impl ItemKey {
    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>, app: impl Into<String>) -> Self {
        Self { name: name.into(), owner: owner.into(), app: app.into() }
    }
}

impl Display for ItemKey {
    // `app:owner:name` with the name last, since query names may contain colons.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.app, self.owner, self.name)
    }
}

impl FromStr for ItemKey {
    type Err = GovernanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app), Some(owner), Some(name))
                if !app.is_empty() && !owner.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(name, owner, app))
            }
            _ => Err(GovernanceError::Validation(format!(
                "item key MUST be formatted as app:owner:name, got `{value}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    Suspicious,
    Flagged,
    Notified,
    Review,
    Disabled,
    Resolved,
}

impl ItemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Suspicious => "suspicious",
            Self::Flagged => "flagged",
            Self::Notified => "notified",
            Self::Review => "review",
            Self::Disabled => "disabled",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(Self::Ok),
            "suspicious" => Some(Self::Suspicious),
            "flagged" => Some(Self::Flagged),
            "notified" => Some(Self::Notified),
            "review" => Some(Self::Review),
            "disabled" => Some(Self::Disabled),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// True while the item is inside the active governance funnel, i.e. it can
    /// carry a deadline and is eligible for the auto-disable sweep.
    #[must_use]
    pub fn is_governed(self) -> bool {
        matches!(self, Self::Flagged | Self::Notified)
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DisableCause {
    Manual,
    DeadlineExpired,
}

impl DisableCause {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::DeadlineExpired => "deadline_expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GovernanceAction {
    Flag { reason: String },
    MarkSuspicious { detail: String },
    Notify,
    Dispute,
    ApproveReview,
    RejectReview,
    Whitelist { note: String },
    Disable { cause: DisableCause },
    Enable,
    Resolve,
}

impl GovernanceAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flag { .. } => "flag",
            Self::MarkSuspicious { .. } => "mark_suspicious",
            Self::Notify => "notify",
            Self::Dispute => "dispute",
            Self::ApproveReview => "approve_review",
            Self::RejectReview => "reject_review",
            Self::Whitelist { .. } => "whitelist",
            Self::Disable { .. } => "disable",
            Self::Enable => "enable",
            Self::Resolve => "resolve",
        }
    }
}

/// Governance record for one scheduled query.
///
/// The deadline is only ever set from `Notified` onward: flagging alone does
/// not start the countdown.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TrackedItem {
    pub key: ItemKey,
    pub status: ItemStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub flagged_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub notified_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub remediation_deadline: Option<OffsetDateTime>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub flagged_by: String,
    #[serde(default)]
    pub whitelisted: bool,
}

impl TrackedItem {
    #[must_use]
    pub fn new(key: ItemKey) -> Self {
        Self {
            key,
            status: ItemStatus::Ok,
            flagged_at: None,
            notified_at: None,
            remediation_deadline: None,
            reason: String::new(),
            notes: String::new(),
            flagged_by: String::new(),
            whitelisted: false,
        }
    }

    /// Validate internal consistency of one stored record.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Validation`] when identity fields are empty
    /// or the status disagrees with the timestamps it requires.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.key.name.trim().is_empty()
            || self.key.owner.trim().is_empty()
            || self.key.app.trim().is_empty()
        {
            return Err(GovernanceError::Validation(
                "item key fields MUST all be non-empty".to_string(),
            ));
        }

        match self.status {
            ItemStatus::Flagged => {
                if self.reason.trim().is_empty() {
                    return Err(GovernanceError::Validation(
                        "flagged item MUST carry a reason".to_string(),
                    ));
                }
                if self.flagged_at.is_none() {
                    return Err(GovernanceError::Validation(
                        "flagged item MUST record flagged_at".to_string(),
                    ));
                }
            }
            ItemStatus::Notified | ItemStatus::Review => {
                if self.notified_at.is_none() || self.remediation_deadline.is_none() {
                    return Err(GovernanceError::Validation(
                        "notified item MUST record notified_at and a deadline".to_string(),
                    ));
                }
            }
            ItemStatus::Ok | ItemStatus::Suspicious | ItemStatus::Resolved => {
                if self.remediation_deadline.is_some() {
                    return Err(GovernanceError::Validation(format!(
                        "{} item MUST NOT carry a deadline",
                        self.status
                    )));
                }
            }
            ItemStatus::Disabled => {}
        }

        Ok(())
    }

    /// An item is overdue when it is still in the governance funnel and its
    /// deadline has passed. Items without a deadline are never overdue.
    #[must_use]
    pub fn is_overdue(&self, now: OffsetDateTime) -> bool {
        self.status.is_governed()
            && self.remediation_deadline.is_some_and(|deadline| deadline < now)
    }

    fn push_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push_str("; ");
        }
        self.notes.push_str(note);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AppliedTransition {
    pub action: String,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

/// Apply one governance action to an item in place.
///
/// Pure: the caller supplies `now` and the remediation period, and is
/// responsible for persistence, suspend-control calls, and auditing.
///
/// # Errors
/// Returns the action-specific rejection when the transition is illegal from
/// the item's current status or a required argument is missing.
pub fn apply_action(
    item: &mut TrackedItem,
    action: &GovernanceAction,
    actor: &str,
    now: OffsetDateTime,
    remediation_period: Duration,
) -> Result<AppliedTransition, GovernanceError> {
    let from = item.status;
    let invalid = |from: ItemStatus| GovernanceError::InvalidTransition {
        from,
        action: action.name().to_string(),
    };

    let to = match action {
        GovernanceAction::Flag { reason } => {
            if reason.trim().is_empty() {
                return Err(GovernanceError::EmptyReason);
            }
            match from {
                ItemStatus::Flagged | ItemStatus::Notified | ItemStatus::Review => {
                    return Err(GovernanceError::AlreadyFlagged);
                }
                ItemStatus::Ok | ItemStatus::Suspicious | ItemStatus::Resolved => {
                    item.flagged_at = Some(now);
                    item.notified_at = None;
                    item.remediation_deadline = None;
                    item.reason = reason.clone();
                    item.flagged_by = actor.to_string();
                    ItemStatus::Flagged
                }
                ItemStatus::Disabled => return Err(invalid(from)),
            }
        }
        GovernanceAction::MarkSuspicious { detail } => {
            if item.whitelisted {
                return Err(GovernanceError::WhitelistedExempt);
            }
            // Resolved items must never resurface as suspicious.
            if from != ItemStatus::Ok {
                return Err(invalid(from));
            }
            item.reason = detail.clone();
            item.flagged_by = actor.to_string();
            ItemStatus::Suspicious
        }
        GovernanceAction::Notify => {
            if from != ItemStatus::Flagged {
                return Err(invalid(from));
            }
            item.notified_at = Some(now);
            item.remediation_deadline = Some(now + remediation_period);
            ItemStatus::Notified
        }
        GovernanceAction::Dispute => {
            if from != ItemStatus::Notified {
                return Err(invalid(from));
            }
            ItemStatus::Review
        }
        GovernanceAction::ApproveReview => {
            if from != ItemStatus::Review {
                return Err(invalid(from));
            }
            item.flagged_at = None;
            item.notified_at = None;
            item.remediation_deadline = None;
            ItemStatus::Resolved
        }
        GovernanceAction::RejectReview => {
            if from != ItemStatus::Review {
                return Err(invalid(from));
            }
            // Rejection restarts the remediation clock rather than resuming
            // the paused one.
            item.notified_at = Some(now);
            item.remediation_deadline = Some(now + remediation_period);
            ItemStatus::Notified
        }
        GovernanceAction::Whitelist { note } => {
            if from != ItemStatus::Suspicious {
                return Err(invalid(from));
            }
            if note.trim().is_empty() {
                return Err(GovernanceError::EmptyWhitelistNote);
            }
            item.whitelisted = true;
            item.push_note(&format!("whitelisted: {note}"));
            ItemStatus::Ok
        }
        GovernanceAction::Disable { cause } => {
            if !from.is_governed() {
                return Err(invalid(from));
            }
            match cause {
                DisableCause::Manual => item.push_note("disabled by operator"),
                DisableCause::DeadlineExpired => {
                    item.push_note("auto-disabled: deadline expired");
                }
            }
            ItemStatus::Disabled
        }
        GovernanceAction::Enable => {
            if from != ItemStatus::Disabled {
                return Err(invalid(from));
            }
            item.flagged_at = None;
            item.notified_at = None;
            item.remediation_deadline = None;
            item.notes = String::new();
            ItemStatus::Ok
        }
        GovernanceAction::Resolve => {
            if from == ItemStatus::Resolved {
                return Err(invalid(from));
            }
            item.flagged_at = None;
            item.notified_at = None;
            item.remediation_deadline = None;
            ItemStatus::Resolved
        }
    };

    item.status = to;
    Ok(AppliedTransition { action: action.name().to_string(), from, to })
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionOutcome {
    Applied {
        #[serde(with = "time::serde::rfc3339")]
        new_deadline: OffsetDateTime,
    },
    /// The requested reduction would land the deadline at or before `now`.
    /// Nothing was mutated; the caller decides whether to disable instead.
    WouldExpire {
        #[serde(with = "time::serde::rfc3339")]
        new_deadline: OffsetDateTime,
    },
}

/// Shift an active deadline by a signed number of days.
///
/// Never changes `status`. `+d` then `-d` restores the original deadline
/// exactly, unless the negative step would cross `now` (reported as
/// [`ExtensionOutcome::WouldExpire`] without mutating).
///
/// # Errors
/// Rejects a zero delta, and any item that is not `Notified` with a deadline.
pub fn extend_deadline(
    item: &mut TrackedItem,
    delta_days: i64,
    now: OffsetDateTime,
) -> Result<ExtensionOutcome, GovernanceError> {
    if delta_days == 0 {
        return Err(GovernanceError::ZeroExtension);
    }
    if item.status != ItemStatus::Notified {
        return Err(GovernanceError::NoActiveDeadline);
    }
    let Some(current) = item.remediation_deadline else {
        return Err(GovernanceError::NoActiveDeadline);
    };

    let delta_seconds = delta_days.checked_mul(SECONDS_PER_DAY).ok_or_else(|| {
        GovernanceError::Validation("extension days out of range".to_string())
    })?;
    let new_deadline = current + Duration::seconds(delta_seconds);

    if new_deadline <= now {
        return Ok(ExtensionOutcome::WouldExpire { new_deadline });
    }

    item.remediation_deadline = Some(new_deadline);
    Ok(ExtensionOutcome::Applied { new_deadline })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineUrgency {
    Critical,
    Urgent,
    Warning,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeadlineDisplay {
    NotApplicable,
    AwaitingNotification,
    UnderReview,
    Remaining { seconds: i64, urgency: DeadlineUrgency },
    Overdue { seconds: i64 },
}

impl DeadlineDisplay {
    /// Human-readable countdown label for list surfaces.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::NotApplicable => "N/A".to_string(),
            Self::AwaitingNotification => "Awaiting notification".to_string(),
            Self::UnderReview => "Under Review".to_string(),
            Self::Remaining { seconds, .. } => {
                format!("{} remaining", format_interval(*seconds))
            }
            Self::Overdue { seconds } => format!("Overdue by {}", format_interval(*seconds)),
        }
    }
}

fn format_interval(total_seconds: i64) -> String {
    let days = total_seconds / SECONDS_PER_DAY;
    let hours = (total_seconds % SECONDS_PER_DAY) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn urgency_for(seconds_left: i64) -> DeadlineUrgency {
    if seconds_left < SECONDS_PER_DAY {
        DeadlineUrgency::Critical
    } else if seconds_left <= 2 * SECONDS_PER_DAY {
        DeadlineUrgency::Urgent
    } else if seconds_left <= 5 * SECONDS_PER_DAY {
        DeadlineUrgency::Warning
    } else {
        DeadlineUrgency::Normal
    }
}

/// Classify what a countdown surface should show for this item right now.
///
/// Disabled and resolved items never show a stale number, and an item under
/// review shows the review marker instead of a running countdown.
#[must_use]
pub fn deadline_display(item: &TrackedItem, now: OffsetDateTime) -> DeadlineDisplay {
    match item.status {
        ItemStatus::Ok
        | ItemStatus::Suspicious
        | ItemStatus::Disabled
        | ItemStatus::Resolved => DeadlineDisplay::NotApplicable,
        ItemStatus::Flagged => DeadlineDisplay::AwaitingNotification,
        ItemStatus::Review => DeadlineDisplay::UnderReview,
        ItemStatus::Notified => match item.remediation_deadline {
            None => DeadlineDisplay::NotApplicable,
            Some(deadline) => {
                let left = (deadline - now).whole_seconds();
                if left <= 0 {
                    DeadlineDisplay::Overdue { seconds: -left }
                } else {
                    DeadlineDisplay::Remaining { seconds: left, urgency: urgency_for(left) }
                }
            }
        },
    }
}

/// Keys of every item the sweep should auto-disable at `now`.
#[must_use]
pub fn overdue_keys(items: &[TrackedItem], now: OffsetDateTime) -> Vec<ItemKey> {
    items.iter().filter(|item| item.is_overdue(now)).map(|item| item.key.clone()).collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AuditId(pub Ulid);

impl AuditId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AuditId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One append-only audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AuditRecord {
    pub id: AuditId,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub action: String,
    pub key: ItemKey,
    pub actor: String,
    pub details: String,
}

impl AuditRecord {
    #[must_use]
    pub fn new(
        at: OffsetDateTime,
        action: impl Into<String>,
        key: ItemKey,
        actor: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: AuditId::new(),
            at,
            action: action.into(),
            key,
            actor: actor.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct JobRef(pub String);

impl Display for JobRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata for the single cached analysis-job result.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CacheEntry {
    pub job_ref: JobRef,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    pub ttl_seconds: u64,
    pub record_count: usize,
}

impl CacheEntry {
    /// TTL expiry is advisory: a stale entry is still served to readers until
    /// a refresh replaces it.
    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        now >= self.cached_at.saturating_add(Duration::seconds(ttl))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn period() -> Duration {
        Duration::days(DEFAULT_REMEDIATION_DAYS)
    }

    fn mk_item(status: ItemStatus) -> TrackedItem {
        let mut item = TrackedItem::new(ItemKey::new("costly_scan", "rbarnes", "search_ops"));
        item.status = status;
        match status {
            ItemStatus::Flagged => {
                item.reason = "expensive wildcard scan".to_string();
                item.flagged_by = "gov-admin".to_string();
                item.flagged_at = Some(fixture_time());
            }
            ItemStatus::Notified | ItemStatus::Review => {
                item.reason = "expensive wildcard scan".to_string();
                item.flagged_by = "gov-admin".to_string();
                item.flagged_at = Some(fixture_time());
                item.notified_at = Some(fixture_time());
                item.remediation_deadline = Some(fixture_time() + period());
            }
            _ => {}
        }
        item
    }

    fn apply(
        item: &mut TrackedItem,
        action: &GovernanceAction,
    ) -> Result<AppliedTransition, GovernanceError> {
        apply_action(item, action, "gov-admin", fixture_time(), period())
    }

    // Test IDs: TSM-001, TSM-002
    #[test]
    fn flag_requires_non_empty_reason() {
        let mut item = mk_item(ItemStatus::Ok);
        let result = apply(&mut item, &GovernanceAction::Flag { reason: "  ".to_string() });
        assert_eq!(result, Err(GovernanceError::EmptyReason));
        assert_eq!(item.status, ItemStatus::Ok);
        assert!(item.flagged_at.is_none());
    }

    // Test IDs: TSM-003
    #[test]
    fn flag_sets_timestamp_actor_and_reason_without_deadline() {
        let mut item = mk_item(ItemStatus::Ok);
        let applied = match apply(
            &mut item,
            &GovernanceAction::Flag { reason: "runs every minute over all time".to_string() },
        ) {
            Ok(applied) => applied,
            Err(err) => panic!("flag failed: {err}"),
        };

        assert_eq!(applied.from, ItemStatus::Ok);
        assert_eq!(applied.to, ItemStatus::Flagged);
        assert_eq!(item.status, ItemStatus::Flagged);
        assert_eq!(item.flagged_at, Some(fixture_time()));
        assert_eq!(item.flagged_by, "gov-admin");
        assert_eq!(item.reason, "runs every minute over all time");
        assert!(item.remediation_deadline.is_none(), "flagging must not start the countdown");
    }

    // Test IDs: TSM-004
    #[test]
    fn flag_allowed_from_suspicious_and_resolved() {
        for status in [ItemStatus::Suspicious, ItemStatus::Resolved] {
            let mut item = mk_item(status);
            let result = apply(
                &mut item,
                &GovernanceAction::Flag { reason: "confirmed expensive".to_string() },
            );
            assert!(result.is_ok(), "flag from {status} rejected: {result:?}");
            assert_eq!(item.status, ItemStatus::Flagged);
        }
    }

    // Test IDs: TSM-005
    #[test]
    fn reflag_rejected_and_original_timestamp_preserved() {
        for status in [ItemStatus::Flagged, ItemStatus::Notified, ItemStatus::Review] {
            let mut item = mk_item(status);
            let original_flagged_at = item.flagged_at;
            let result =
                apply(&mut item, &GovernanceAction::Flag { reason: "again".to_string() });
            assert_eq!(result, Err(GovernanceError::AlreadyFlagged));
            assert_eq!(item.status, status);
            assert_eq!(item.flagged_at, original_flagged_at);
        }
    }

    // Test IDs: TSM-006
    #[test]
    fn flag_from_disabled_is_invalid() {
        let mut item = mk_item(ItemStatus::Disabled);
        match apply(&mut item, &GovernanceAction::Flag { reason: "still bad".to_string() }) {
            Err(GovernanceError::InvalidTransition { from, action }) => {
                assert_eq!(from, ItemStatus::Disabled);
                assert_eq!(action, "flag");
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
    }

    // Test IDs: TSM-007
    #[test]
    fn notify_starts_countdown_from_now() {
        let mut item = mk_item(ItemStatus::Flagged);
        let applied = match apply(&mut item, &GovernanceAction::Notify) {
            Ok(applied) => applied,
            Err(err) => panic!("notify failed: {err}"),
        };

        assert_eq!(applied.to, ItemStatus::Notified);
        assert_eq!(item.notified_at, Some(fixture_time()));
        assert_eq!(item.remediation_deadline, Some(fixture_time() + period()));
    }

    // Test IDs: TSM-008
    #[test]
    fn notify_outside_flagged_is_invalid() {
        for status in [ItemStatus::Ok, ItemStatus::Notified, ItemStatus::Disabled] {
            let mut item = mk_item(status);
            let result = apply(&mut item, &GovernanceAction::Notify);
            assert!(
                matches!(result, Err(GovernanceError::InvalidTransition { .. })),
                "notify from {status} should be invalid, got {result:?}"
            );
        }
    }

    // Test IDs: TSM-009
    #[test]
    fn dispute_then_reject_restarts_the_clock() {
        let mut item = mk_item(ItemStatus::Notified);
        let original_deadline = item.remediation_deadline;
        match apply(&mut item, &GovernanceAction::Dispute) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Review),
            Err(err) => panic!("dispute failed: {err}"),
        }
        assert_eq!(item.remediation_deadline, original_deadline, "dispute keeps the deadline");

        let later = fixture_time() + Duration::days(3);
        let applied =
            match apply_action(&mut item, &GovernanceAction::RejectReview, "admin", later, period())
            {
                Ok(applied) => applied,
                Err(err) => panic!("reject failed: {err}"),
            };
        assert_eq!(applied.to, ItemStatus::Notified);
        assert_eq!(item.notified_at, Some(later));
        assert_eq!(item.remediation_deadline, Some(later + period()));
    }

    // Test IDs: TSM-010
    #[test]
    fn approve_review_resolves_and_clears_governance_fields() {
        let mut item = mk_item(ItemStatus::Review);
        match apply(&mut item, &GovernanceAction::ApproveReview) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Resolved),
            Err(err) => panic!("approve failed: {err}"),
        }
        assert!(item.flagged_at.is_none());
        assert!(item.notified_at.is_none());
        assert!(item.remediation_deadline.is_none());
    }

    // Test IDs: TSM-011
    #[test]
    fn whitelist_requires_note_and_sets_exemption() {
        let mut item = mk_item(ItemStatus::Suspicious);
        let result = apply(&mut item, &GovernanceAction::Whitelist { note: " ".to_string() });
        assert_eq!(result, Err(GovernanceError::EmptyWhitelistNote));
        assert_eq!(item.status, ItemStatus::Suspicious);

        match apply(
            &mut item,
            &GovernanceAction::Whitelist { note: "approved capacity exception".to_string() },
        ) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Ok),
            Err(err) => panic!("whitelist failed: {err}"),
        }
        assert!(item.whitelisted);
        assert!(item.notes.contains("approved capacity exception"));
    }

    // Test IDs: TSM-012
    #[test]
    fn mark_suspicious_skips_whitelisted_and_resolved() {
        let mut whitelisted = mk_item(ItemStatus::Ok);
        whitelisted.whitelisted = true;
        let result = apply(
            &mut whitelisted,
            &GovernanceAction::MarkSuspicious { detail: "high scan volume".to_string() },
        );
        assert_eq!(result, Err(GovernanceError::WhitelistedExempt));
        assert_eq!(whitelisted.status, ItemStatus::Ok);

        let mut resolved = mk_item(ItemStatus::Resolved);
        let result = apply(
            &mut resolved,
            &GovernanceAction::MarkSuspicious { detail: "high scan volume".to_string() },
        );
        assert!(matches!(result, Err(GovernanceError::InvalidTransition { .. })));
        assert_eq!(resolved.status, ItemStatus::Resolved);
    }

    // Test IDs: TSM-013
    #[test]
    fn mark_suspicious_from_ok_records_detail() {
        let mut item = mk_item(ItemStatus::Ok);
        match apply(
            &mut item,
            &GovernanceAction::MarkSuspicious { detail: "cost spike week over week".to_string() },
        ) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Suspicious),
            Err(err) => panic!("mark_suspicious failed: {err}"),
        }
        assert_eq!(item.reason, "cost spike week over week");
    }

    // Test IDs: TSM-014
    #[test]
    fn disable_enable_cycle_records_cause_then_clears() {
        let mut item = mk_item(ItemStatus::Notified);
        match apply(
            &mut item,
            &GovernanceAction::Disable { cause: DisableCause::DeadlineExpired },
        ) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Disabled),
            Err(err) => panic!("disable failed: {err}"),
        }
        assert!(item.notes.contains("auto-disabled: deadline expired"));

        match apply(&mut item, &GovernanceAction::Enable) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Ok),
            Err(err) => panic!("enable failed: {err}"),
        }
        assert!(item.remediation_deadline.is_none());
        assert!(item.notified_at.is_none());
        assert!(item.notes.is_empty());
    }

    // Test IDs: TSM-015
    #[test]
    fn disable_outside_funnel_is_invalid() {
        for status in [ItemStatus::Ok, ItemStatus::Suspicious, ItemStatus::Resolved] {
            let mut item = mk_item(status);
            let result =
                apply(&mut item, &GovernanceAction::Disable { cause: DisableCause::Manual });
            assert!(
                matches!(result, Err(GovernanceError::InvalidTransition { .. })),
                "disable from {status} should be invalid"
            );
        }
    }

    // Test IDs: TSM-016
    #[test]
    fn resolve_clears_fields_and_is_not_idempotent() {
        let mut item = mk_item(ItemStatus::Notified);
        match apply(&mut item, &GovernanceAction::Resolve) {
            Ok(applied) => assert_eq!(applied.to, ItemStatus::Resolved),
            Err(err) => panic!("resolve failed: {err}"),
        }
        assert!(item.remediation_deadline.is_none());
        assert!(item.flagged_at.is_none());

        let result = apply(&mut item, &GovernanceAction::Resolve);
        assert!(matches!(result, Err(GovernanceError::InvalidTransition { .. })));
    }

    // Test IDs: TEXT-001
    #[test]
    fn extend_zero_days_rejected() {
        let mut item = mk_item(ItemStatus::Notified);
        let result = extend_deadline(&mut item, 0, fixture_time());
        assert_eq!(result, Err(GovernanceError::ZeroExtension));
    }

    // Test IDs: TEXT-002
    #[test]
    fn extend_without_active_deadline_rejected() {
        for status in [ItemStatus::Ok, ItemStatus::Flagged, ItemStatus::Review, ItemStatus::Disabled]
        {
            let mut item = mk_item(status);
            let result = extend_deadline(&mut item, 7, fixture_time());
            assert_eq!(
                result,
                Err(GovernanceError::NoActiveDeadline),
                "extend from {status} should report no active deadline"
            );
        }
    }

    // Test IDs: TEXT-003
    #[test]
    fn extend_round_trip_restores_original_deadline() {
        let mut item = mk_item(ItemStatus::Notified);
        let original = item.remediation_deadline;

        match extend_deadline(&mut item, 7, fixture_time()) {
            Ok(ExtensionOutcome::Applied { new_deadline }) => {
                assert_eq!(Some(new_deadline), original.map(|d| d + Duration::days(7)));
            }
            other => panic!("positive extension failed: {other:?}"),
        }
        match extend_deadline(&mut item, -7, fixture_time()) {
            Ok(ExtensionOutcome::Applied { .. }) => {}
            other => panic!("negative extension failed: {other:?}"),
        }
        assert_eq!(item.remediation_deadline, original);
        assert_eq!(item.status, ItemStatus::Notified, "extension never changes status");
    }

    // Test IDs: TEXT-004
    #[test]
    fn reduction_crossing_now_reports_would_expire_without_mutating() {
        let mut item = mk_item(ItemStatus::Notified);
        let original = item.remediation_deadline;

        // Deadline is now + 7d; pulling back 10d lands in the past.
        match extend_deadline(&mut item, -10, fixture_time()) {
            Ok(ExtensionOutcome::WouldExpire { new_deadline }) => {
                assert!(new_deadline <= fixture_time());
            }
            other => panic!("expected WouldExpire, got {other:?}"),
        }
        assert_eq!(item.remediation_deadline, original);
        assert_eq!(item.status, ItemStatus::Notified);
    }

    // Test IDs: TDSP-001
    #[test]
    fn display_never_shows_stale_numbers_for_disabled_or_review() {
        let mut disabled = mk_item(ItemStatus::Notified);
        disabled.status = ItemStatus::Disabled;
        // Stale deadline left over from before the disable.
        assert_eq!(
            deadline_display(&disabled, fixture_time() + Duration::days(30)),
            DeadlineDisplay::NotApplicable
        );

        let review = mk_item(ItemStatus::Review);
        assert_eq!(
            deadline_display(&review, fixture_time() + Duration::days(30)),
            DeadlineDisplay::UnderReview
        );
    }

    // Test IDs: TDSP-002
    #[test]
    fn display_flagged_awaits_notification() {
        let item = mk_item(ItemStatus::Flagged);
        assert_eq!(deadline_display(&item, fixture_time()), DeadlineDisplay::AwaitingNotification);
    }

    // Test IDs: TDSP-003
    #[test]
    fn display_urgency_tiers_match_thresholds() {
        let item = mk_item(ItemStatus::Notified);
        let cases = [
            (Duration::hours(6), DeadlineUrgency::Critical),
            (Duration::days(2), DeadlineUrgency::Urgent),
            (Duration::days(4), DeadlineUrgency::Warning),
            (Duration::days(6), DeadlineUrgency::Normal),
        ];
        for (left, expected) in cases {
            let now = fixture_time() + period() - left;
            match deadline_display(&item, now) {
                DeadlineDisplay::Remaining { urgency, .. } => {
                    assert_eq!(urgency, expected, "urgency with {left} left");
                }
                other => panic!("expected Remaining with {left} left, got {other:?}"),
            }
        }
    }

    // Test IDs: TDSP-004
    #[test]
    fn display_overdue_after_deadline() {
        let item = mk_item(ItemStatus::Notified);
        let now = fixture_time() + period() + Duration::hours(1);
        match deadline_display(&item, now) {
            DeadlineDisplay::Overdue { seconds } => assert_eq!(seconds, 3_600),
            other => panic!("expected Overdue, got {other:?}"),
        }
    }

    // Test IDs: TDSP-005
    #[test]
    fn display_labels_are_human_readable() {
        assert_eq!(DeadlineDisplay::NotApplicable.label(), "N/A");
        assert_eq!(DeadlineDisplay::UnderReview.label(), "Under Review");
        let remaining = DeadlineDisplay::Remaining {
            seconds: 3 * SECONDS_PER_DAY + 5 * 3_600,
            urgency: DeadlineUrgency::Warning,
        };
        assert_eq!(remaining.label(), "3d 5h remaining");
        assert_eq!(DeadlineDisplay::Overdue { seconds: 90 * 60 }.label(), "Overdue by 1h 30m");
    }

    // Test IDs: TSWP-001
    #[test]
    fn overdue_selection_ignores_items_without_deadlines() {
        let now = fixture_time() + period() + Duration::hours(1);
        let mut past_due = mk_item(ItemStatus::Notified);
        past_due.key.name = "past_due".to_string();
        let flagged_no_deadline = mk_item(ItemStatus::Flagged);
        let mut disabled_with_deadline = mk_item(ItemStatus::Notified);
        disabled_with_deadline.status = ItemStatus::Disabled;

        let keys = overdue_keys(&[past_due.clone(), flagged_no_deadline, disabled_with_deadline], now);
        assert_eq!(keys, vec![past_due.key]);
    }

    // Test IDs: TVAL-001
    #[test]
    fn validate_rejects_inconsistent_records() {
        let mut empty_key = mk_item(ItemStatus::Ok);
        empty_key.key.owner = String::new();
        assert!(matches!(empty_key.validate(), Err(GovernanceError::Validation(_))));

        let mut flagged_without_reason = mk_item(ItemStatus::Flagged);
        flagged_without_reason.reason = String::new();
        assert!(matches!(
            flagged_without_reason.validate(),
            Err(GovernanceError::Validation(_))
        ));

        let mut notified_without_deadline = mk_item(ItemStatus::Notified);
        notified_without_deadline.remediation_deadline = None;
        assert!(matches!(
            notified_without_deadline.validate(),
            Err(GovernanceError::Validation(_))
        ));

        let mut ok_with_deadline = mk_item(ItemStatus::Ok);
        ok_with_deadline.remediation_deadline = Some(fixture_time());
        assert!(matches!(ok_with_deadline.validate(), Err(GovernanceError::Validation(_))));

        assert_eq!(mk_item(ItemStatus::Notified).validate(), Ok(()));
    }

    // Test IDs: TKEY-001
    #[test]
    fn item_key_round_trips_through_display() {
        let key = ItemKey::new("cost: all-time scan", "rbarnes", "search_ops");
        let rendered = key.to_string();
        let parsed = match rendered.parse::<ItemKey>() {
            Ok(parsed) => parsed,
            Err(err) => panic!("failed to parse `{rendered}`: {err}"),
        };
        assert_eq!(parsed, key, "name containing colons must survive the round trip");

        assert!("only:two".parse::<ItemKey>().is_err());
        assert!("::".parse::<ItemKey>().is_err());
    }

    // Test IDs: TCCH-001
    #[test]
    fn cache_entry_staleness_is_ttl_based() {
        let entry = CacheEntry {
            job_ref: JobRef("job-123".to_string()),
            cached_at: fixture_time(),
            ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            record_count: 42,
        };
        assert!(!entry.is_stale(fixture_time() + Duration::hours(23)));
        assert!(entry.is_stale(fixture_time() + Duration::hours(24)));
    }

    proptest! {
        // Test IDs: TEXT-005
        #[test]
        fn prop_extension_round_trip(days in 1_i64..3_650) {
            let mut item = mk_item(ItemStatus::Notified);
            // Far-future deadline so the negative leg never crosses now.
            item.remediation_deadline = Some(fixture_time() + Duration::days(8_000));
            let original = item.remediation_deadline;

            prop_assert!(extend_deadline(&mut item, days, fixture_time()).is_ok());
            prop_assert!(extend_deadline(&mut item, -days, fixture_time()).is_ok());
            prop_assert_eq!(item.remediation_deadline, original);
            prop_assert_eq!(item.status, ItemStatus::Notified);
        }

        // Test IDs: TDSP-006
        #[test]
        fn prop_remaining_and_overdue_partition_the_timeline(offset_seconds in -1_000_000_i64..1_000_000) {
            let item = mk_item(ItemStatus::Notified);
            let deadline = fixture_time() + period();
            let now = deadline + Duration::seconds(offset_seconds);
            match deadline_display(&item, now) {
                DeadlineDisplay::Remaining { seconds, .. } => {
                    prop_assert!(offset_seconds < 0);
                    prop_assert_eq!(seconds, -offset_seconds);
                }
                DeadlineDisplay::Overdue { seconds } => {
                    prop_assert!(offset_seconds >= 0);
                    prop_assert_eq!(seconds, offset_seconds);
                }
                other => prop_assert!(false, "unexpected display {:?}", other),
            }
        }
    }
}
