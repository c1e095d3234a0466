use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use query_governance_core::{DisableCause, GovernanceAction, ItemKey, JobRef};
use query_governance_engine::{
    ActorContext, AnalysisJobRunner, BatchRequest, ConfirmationSurface, ExtendRequest,
    GovernanceConfig, GovernanceEngine, HttpAnalysisRunner, HttpNotifier, HttpSuspendControl,
    JobResultCache, LogSuspendControl, NotificationDispatcher, PresetConfirmation,
    PreviewNotifier, SuspendControl,
};
use query_governance_store_sqlite::SqliteStore;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "governance-cli.v1";

#[derive(Debug, Parser)]
#[command(name = "qg")]
#[command(about = "Scheduled-query governance CLI")]
struct Cli {
    #[arg(long, default_value = "./query_governance.sqlite3")]
    db: PathBuf,

    #[arg(long, default_value_t = 7)]
    remediation_days: i64,

    /// Webhook base URL for the query platform's enable/disable surface.
    /// Absent means dry-run: suspend calls are logged and succeed.
    #[arg(long)]
    suspend_url: Option<String>,

    /// Webhook URL for notification dispatch. Absent means dry-run.
    #[arg(long)]
    notify_url: Option<String>,

    /// Base URL of the fleet-analysis job service, required by `cache`
    /// refresh and read.
    #[arg(long)]
    analysis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
    Flag(FlagArgs),
    Suspect(SuspectArgs),
    Notify(KeysArgs),
    Dispute(KeysArgs),
    Approve(KeysArgs),
    Reject(KeysArgs),
    Whitelist(WhitelistArgs),
    Disable(KeysArgs),
    Enable(KeysArgs),
    Resolve(KeysArgs),
    Extend(ExtendArgs),
    Sweep(SweepArgs),
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    List(ItemListArgs),
}

#[derive(Debug, Args)]
struct ItemListArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct KeysArgs {
    /// Item key as `app:owner:name`; repeatable.
    #[arg(long = "key", required = true)]
    keys: Vec<String>,
    #[arg(long)]
    actor: String,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct FlagArgs {
    #[arg(long)]
    reason: String,
    #[command(flatten)]
    keys: KeysArgs,
}

#[derive(Debug, Args)]
struct SuspectArgs {
    #[arg(long)]
    detail: String,
    #[command(flatten)]
    keys: KeysArgs,
}

#[derive(Debug, Args)]
struct WhitelistArgs {
    #[arg(long)]
    note: String,
    #[command(flatten)]
    keys: KeysArgs,
}

#[derive(Debug, Args)]
struct ExtendArgs {
    /// Item key as `app:owner:name`.
    #[arg(long)]
    key: String,
    /// Signed day count; negative values move the deadline earlier.
    #[arg(long, allow_negative_numbers = true)]
    days: i64,
    #[arg(long)]
    actor: String,
    /// Skip the interactive prompt when a reduction crosses into the past
    /// and disable the query instead.
    #[arg(long, default_value_t = false)]
    yes: bool,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct SweepArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    Refresh,
    Status,
    Read,
}

#[derive(Debug, Subcommand)]
enum AuditCommand {
    List(AuditListArgs),
    Export(AuditExportArgs),
}

#[derive(Debug, Args)]
struct AuditListArgs {
    /// Item key as `app:owner:name`.
    #[arg(long)]
    key: Option<String>,
}

#[derive(Debug, Args)]
struct AuditExportArgs {
    #[arg(long)]
    out: PathBuf,
}

/// Asks on stderr and reads one line from stdin. A closed stdin or anything
/// other than `y`/`yes` declines.
struct StdinConfirmation;

impl ConfirmationSurface for StdinConfirmation {
    fn confirm(&mut self, prompt: &str) -> bool {
        if write!(io::stderr(), "{prompt} [y/N] ").and_then(|()| io::stderr().flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(read) if read > 0 => {
                let answer = answer.trim().to_ascii_lowercase();
                answer == "y" || answer == "yes"
            }
            _ => false,
        }
    }
}

struct UnconfiguredRunner;

impl AnalysisJobRunner for UnconfiguredRunner {
    fn run(&self, _timeout: std::time::Duration) -> Result<JobRef> {
        Err(anyhow!("no analysis runner configured; pass --analysis-url"))
    }

    fn fetch(&self, _job: &JobRef) -> Result<Vec<Value>> {
        Err(anyhow!("no analysis runner configured; pass --analysis-url"))
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "cli_contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "cli_contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<Option<OffsetDateTime>> {
    value
        .map(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339)
                .with_context(|| format!("invalid RFC 3339 timestamp `{raw}`"))
        })
        .transpose()
}

fn parse_keys(raw: &[String]) -> Result<Vec<ItemKey>> {
    raw.iter().map(|value| ItemKey::from_str(value).map_err(Into::into)).collect()
}

fn build_config(cli: &Cli) -> GovernanceConfig {
    GovernanceConfig { remediation_days: cli.remediation_days, ..GovernanceConfig::default() }
}

fn build_engine(cli: &Cli) -> Result<GovernanceEngine> {
    let mut store = SqliteStore::open(&cli.db)?;
    store.migrate()?;
    let audit = SqliteStore::open(&cli.db)?;

    let suspend: Box<dyn SuspendControl> = match &cli.suspend_url {
        Some(url) => Box::new(HttpSuspendControl::new(url.clone())),
        None => Box::new(LogSuspendControl),
    };
    let notifier: Box<dyn NotificationDispatcher> = match &cli.notify_url {
        Some(url) => Box::new(HttpNotifier::new(url.clone())),
        None => Box::new(PreviewNotifier),
    };

    Ok(GovernanceEngine::new(
        Box::new(store),
        suspend,
        Box::new(audit),
        notifier,
        build_config(cli),
    ))
}

fn build_cache(cli: &Cli) -> JobResultCache {
    let config = build_config(cli);
    let runner: Box<dyn AnalysisJobRunner> = match &cli.analysis_url {
        Some(url) => Box::new(HttpAnalysisRunner::new(url.clone())),
        None => Box::new(UnconfiguredRunner),
    };
    JobResultCache::new(runner, config.cache_ttl_seconds, config.refresh_timeout())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Db { command } => run_db(command, &cli),
        Command::Item { command } => run_item(command, &cli),
        Command::Flag(args) => {
            let action = GovernanceAction::Flag { reason: args.reason.clone() };
            run_batch(&cli, &args.keys, action)
        }
        Command::Suspect(args) => {
            let action = GovernanceAction::MarkSuspicious { detail: args.detail.clone() };
            run_batch(&cli, &args.keys, action)
        }
        Command::Notify(args) => run_batch(&cli, args, GovernanceAction::Notify),
        Command::Dispute(args) => run_batch(&cli, args, GovernanceAction::Dispute),
        Command::Approve(args) => run_batch(&cli, args, GovernanceAction::ApproveReview),
        Command::Reject(args) => run_batch(&cli, args, GovernanceAction::RejectReview),
        Command::Whitelist(args) => {
            let action = GovernanceAction::Whitelist { note: args.note.clone() };
            run_batch(&cli, &args.keys, action)
        }
        Command::Disable(args) => {
            run_batch(&cli, args, GovernanceAction::Disable { cause: DisableCause::Manual })
        }
        Command::Enable(args) => run_batch(&cli, args, GovernanceAction::Enable),
        Command::Resolve(args) => run_batch(&cli, args, GovernanceAction::Resolve),
        Command::Extend(args) => run_extend(&cli, args),
        Command::Sweep(args) => run_sweep(&cli, args),
        Command::Cache { command } => run_cache(command, &cli),
        Command::Audit { command } => run_audit(command, &cli),
    }
}

fn run_db(command: &DbCommand, cli: &Cli) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let store = SqliteStore::open(&cli.db)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            let before = store.schema_status()?;
            if args.dry_run {
                return emit_json(serde_json::json!({
                    "dry_run": true,
                    "current_version": before.current_version,
                    "target_version": before.target_version,
                    "would_apply_versions": before.pending_versions
                }));
            }

            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "dry_run": false,
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
        DbCommand::IntegrityCheck => {
            let store = SqliteStore::open(&cli.db)?;
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize report")?)
        }
        DbCommand::Backup(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Restore(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            store.restore_database(&args.input)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version
            }))
        }
    }
}

fn run_item(command: &ItemCommand, cli: &Cli) -> Result<()> {
    match command {
        ItemCommand::List(args) => {
            let as_of = parse_optional_rfc3339(args.as_of.as_deref())?;
            let engine = build_engine(cli)?;
            let views = engine.list_items(as_of)?;
            emit_json(serde_json::json!({ "items": views }))
        }
    }
}

fn run_batch(cli: &Cli, args: &KeysArgs, action: GovernanceAction) -> Result<()> {
    let keys = parse_keys(&args.keys)?;
    let as_of = parse_optional_rfc3339(args.as_of.as_deref())?;
    let engine = build_engine(cli)?;
    let request = BatchRequest { keys, action, as_of };
    let outcomes = engine.apply(&request, &ActorContext::new(args.actor.clone()))?;
    emit_json(serde_json::json!({ "outcomes": outcomes }))
}

fn run_extend(cli: &Cli, args: &ExtendArgs) -> Result<()> {
    let key = ItemKey::from_str(&args.key)?;
    let as_of = parse_optional_rfc3339(args.as_of.as_deref())?;
    let engine = build_engine(cli)?;
    let request = ExtendRequest { key, delta_days: args.days, as_of };
    let ctx = ActorContext::new(args.actor.clone());

    let outcome = if args.yes {
        engine.extend_deadline(&request, &ctx, &mut PresetConfirmation(true))?
    } else {
        engine.extend_deadline(&request, &ctx, &mut StdinConfirmation)?
    };
    emit_json(serde_json::to_value(&outcome).context("failed to serialize outcome")?)
}

fn run_sweep(cli: &Cli, args: &SweepArgs) -> Result<()> {
    let as_of = parse_optional_rfc3339(args.as_of.as_deref())?;
    let engine = build_engine(cli)?;
    let report = engine.sweep(as_of)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize report")?)
}

fn run_cache(command: &CacheCommand, cli: &Cli) -> Result<()> {
    let cache = build_cache(cli);
    match command {
        CacheCommand::Refresh => {
            let entry = cache.refresh(None)?;
            emit_json(serde_json::to_value(&entry).context("failed to serialize entry")?)
        }
        CacheCommand::Status => {
            let status = cache.status(OffsetDateTime::now_utc())?;
            emit_json(serde_json::to_value(&status).context("failed to serialize status")?)
        }
        CacheCommand::Read => {
            // One-shot process: populate the in-memory cache before reading.
            cache.refresh(None)?;
            let rows = cache.read()?;
            emit_json(serde_json::json!({ "rows": rows }))
        }
    }
}

fn run_audit(command: &AuditCommand, cli: &Cli) -> Result<()> {
    match command {
        AuditCommand::List(args) => {
            let key = args.key.as_deref().map(ItemKey::from_str).transpose()?;
            let mut store = SqliteStore::open(&cli.db)?;
            store.migrate()?;
            let records = store.list_audit(key.as_ref())?;
            emit_json(serde_json::json!({ "records": records }))
        }
        AuditCommand::Export(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            store.migrate()?;
            let manifest = store.export_audit(&args.out)?;
            emit_json(serde_json::json!({
                "out_dir": args.out,
                "manifest": manifest
            }))
        }
    }
}
