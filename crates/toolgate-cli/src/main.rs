//! Toolgate CLI
//!
//! ## Commands
//!
//! - `eval`: evaluate playbook conditions against an exception
//! - `check`: load packs and print a tenant's catalog with access decisions
//! - `invoke`: run a tool (dry-run unless `--live`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, Level};

use toolgate_core::sandbox::InMemoryAuditLogger;
use toolgate_core::{
    evaluate_conditions, rank_playbooks, AccessDecision, DomainPack, ExceptionAttributes,
    GovernanceConfig, Guardrails, SandboxedInvoker, TenantId, TenantPolicyPack, ToolCall, ToolNaming,
    ToolRegistry,
};

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tool governance and sandboxed invocation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Governance config (TOML)
    #[arg(short, long, global = true, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate conditions against exception attributes
    Eval {
        /// Condition object (JSON)
        #[arg(long, conflicts_with = "playbooks", required_unless_present = "playbooks")]
        conditions: Option<PathBuf>,

        /// Playbook list `[{"name": .., "conditions": {..}}]` (JSON), ranked by priority
        #[arg(long)]
        playbooks: Option<PathBuf>,

        /// Exception attributes (JSON)
        #[arg(short, long)]
        exception: PathBuf,

        /// Policy tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Minutes left on the SLA
        #[arg(long)]
        sla_minutes: Option<f64>,
    },

    /// Print a tenant's catalog and access decisions
    Check {
        #[command(flatten)]
        packs: PackArgs,
    },

    /// Invoke a tool through the sandbox (requires --policy)
    Invoke {
        #[command(flatten)]
        packs: PackArgs,

        /// Tool name
        #[arg(long)]
        tool: String,

        /// Arguments as inline JSON, or `@path` to read a file
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Perform the real call instead of a dry-run
        #[arg(long)]
        live: bool,

        /// Print the audit records after the call
        #[arg(long)]
        show_audit: bool,
    },
}

#[derive(clap::Args)]
struct PackArgs {
    /// Tenant id
    #[arg(short, long)]
    tenant: String,

    /// Domain Pack (JSON)
    #[arg(short, long)]
    domain_pack: PathBuf,

    /// Tenant policy pack (JSON). Without it `check` reports the tenant as
    /// unconfigured; `invoke` refuses to run.
    #[arg(short, long)]
    policy: Option<PathBuf>,
}

#[derive(Deserialize)]
struct Playbook {
    name: String,
    #[serde(default)]
    conditions: Value,
}

#[derive(Serialize)]
struct RankedPlaybook<'a> {
    name: &'a str,
    index: usize,
    priority: i64,
    reason: &'a str,
}

#[derive(Serialize)]
struct CatalogReport {
    /// Policy snapshot digest; absent when no policy pack was given.
    digest: Option<String>,
    /// Domain Pack guardrails, as shipped.
    guardrails: Guardrails,
    tools: Vec<CatalogLine>,
}

#[derive(Serialize)]
struct CatalogLine {
    tool: String,
    version: String,
    endpoint: String,
    decision: AccessDecision,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    toolgate_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    debug!(event = "cli.config_loaded", trip_threshold = config.breaker.trip_threshold);

    match cli.command {
        Commands::Eval {
            conditions,
            playbooks,
            exception,
            tags,
            sla_minutes,
        } => cmd_eval(conditions.as_deref(), playbooks.as_deref(), &exception, &tags, sla_minutes),
        Commands::Check { packs } => cmd_check(&config, &packs),
        Commands::Invoke {
            packs,
            tool,
            args,
            live,
            show_audit,
        } => cmd_invoke(&config, &packs, &tool, &args, live, show_audit).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<GovernanceConfig> {
    let config = match path {
        Some(path) => GovernanceConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GovernanceConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid TOOLGATE_* environment override")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_eval(
    conditions: Option<&Path>,
    playbooks: Option<&Path>,
    exception: &Path,
    tags: &[String],
    sla_minutes: Option<f64>,
) -> Result<()> {
    let exception: ExceptionAttributes = read_json(exception)?;

    if let Some(path) = playbooks {
        let playbooks: Vec<Playbook> = read_json(path)?;
        let ranked = rank_playbooks(&playbooks, |p| &p.conditions, &exception, tags, sla_minutes);
        let lines: Vec<RankedPlaybook<'_>> = ranked
            .iter()
            .map(|r| RankedPlaybook {
                name: &r.candidate.name,
                index: r.index,
                priority: r.evaluation.priority,
                reason: &r.evaluation.reason,
            })
            .collect();
        return print_json(&lines);
    }

    let Some(path) = conditions else {
        bail!("either --conditions or --playbooks is required");
    };
    let conditions: Value = read_json(path)?;
    print_json(&evaluate_conditions(&conditions, &exception, tags, sla_minutes))
}

struct Loaded {
    tenant: TenantId,
    registry: Arc<ToolRegistry>,
    pack: DomainPack,
    policy: Option<TenantPolicyPack>,
}

fn load_packs(config: &GovernanceConfig, args: &PackArgs) -> Result<Loaded> {
    let tenant = TenantId::new(args.tenant.clone());
    let pack: DomainPack = read_json(&args.domain_pack)?;
    let policy: Option<TenantPolicyPack> = match &args.policy {
        Some(path) => Some(read_json(path)?),
        None => None,
    };

    let registry = Arc::new(config.new_registry());
    registry
        .register_domain_pack(&tenant, &pack)
        .context("Failed to register domain pack")?;
    if let Some(policy) = &policy {
        registry
            .register_policy_pack(&tenant, policy)
            .context("Failed to register policy pack")?;
    }
    Ok(Loaded {
        tenant,
        registry,
        pack,
        policy,
    })
}

fn cmd_check(config: &GovernanceConfig, args: &PackArgs) -> Result<()> {
    let loaded = load_packs(config, args)?;
    print_json(&catalog_report(&loaded))
}

fn catalog_report(loaded: &Loaded) -> CatalogReport {
    let tools: Vec<CatalogLine> = loaded
        .registry
        .list_tools(&loaded.tenant, Some(&loaded.pack.domain_name), ToolNaming::Bare)
        .into_iter()
        .filter_map(|tool| {
            let entry = loaded
                .registry
                .get(&loaded.tenant, &tool, Some(&loaded.pack.domain_name))?;
            Some(CatalogLine {
                decision: loaded.registry.access_decision(&loaded.tenant, &tool),
                version: entry.definition.version,
                endpoint: entry.definition.endpoint,
                tool,
            })
        })
        .collect();

    CatalogReport {
        digest: loaded
            .registry
            .get_enforcer(&loaded.tenant)
            .map(|enforcer| enforcer.snapshot_digest().to_string()),
        guardrails: loaded.pack.guardrails.clone(),
        tools,
    }
}

async fn cmd_invoke(
    config: &GovernanceConfig,
    args: &PackArgs,
    tool: &str,
    raw_args: &str,
    live: bool,
    show_audit: bool,
) -> Result<()> {
    let loaded = load_packs(config, args)?;
    let Some(policy) = loaded.policy.as_ref() else {
        bail!("invoke requires --policy: a tool call is only allowed by an approving policy pack");
    };
    let tool_args: Value = match raw_args.strip_prefix('@') {
        Some(path) => read_json(Path::new(path))?,
        None => serde_json::from_str(raw_args).context("--args is not valid JSON")?,
    };

    let audit = Arc::new(InMemoryAuditLogger::new());
    let invoker = SandboxedInvoker::new(Arc::clone(&loaded.registry), config)
        .with_audit_logger(audit.clone());

    let mut call = ToolCall::new(
        loaded.tenant.clone(),
        tool,
        tool_args,
        policy,
        &loaded.pack,
    );
    if live {
        call = call.live();
    }
    let result = invoker.invoke(call).await;
    invoker.close();

    if show_audit {
        print_json(&audit.records())?;
    }
    let outcome = result.with_context(|| format!("Invocation of '{tool}' failed"))?;
    print_json(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_invoke_defaults_to_dry_run() {
        let cli = Cli::try_parse_from([
            "toolgate", "invoke", "--tenant", "acme", "--domain-pack", "pack.json", "--tool",
            "refund",
        ])
        .unwrap();
        match cli.command {
            Commands::Invoke { live, args, .. } => {
                assert!(!live);
                assert_eq!(args, "{}");
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_eval_requires_conditions_or_playbooks() {
        assert!(Cli::try_parse_from(["toolgate", "eval", "--exception", "e.json"]).is_err());
    }

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn finance_pack() -> tempfile::NamedTempFile {
        write_temp(
            r#"{"domain_name": "Finance",
                "tools": {"refund": {"endpoint": "https://api.example.com/refund"}},
                "guardrails": {"block_lists": ["wire_transfer"], "approval_threshold": 0.8}}"#,
        )
    }

    fn pack_args(pack: &tempfile::NamedTempFile, policy: Option<&tempfile::NamedTempFile>) -> PackArgs {
        PackArgs {
            tenant: "acme".into(),
            domain_pack: pack.path().to_path_buf(),
            policy: policy.map(|p| p.path().to_path_buf()),
        }
    }

    #[test]
    fn test_load_packs_without_policy_is_unconfigured() {
        let pack = finance_pack();
        let loaded = load_packs(&GovernanceConfig::default(), &pack_args(&pack, None)).unwrap();
        assert!(loaded.registry.get_enforcer(&loaded.tenant).is_none());
        assert!(loaded.registry.is_allowed(&loaded.tenant, "refund"));

        let report = serde_json::to_value(catalog_report(&loaded)).unwrap();
        assert!(report["digest"].is_null());
        assert_eq!(report["tools"][0]["tool"], "refund");
    }

    #[test]
    fn test_catalog_report_carries_policy_digest() {
        let pack = finance_pack();
        let policy = write_temp(
            r#"{"tenant_id": "acme", "domain_name": "Finance", "approved_tools": ["refund"]}"#,
        );
        let loaded =
            load_packs(&GovernanceConfig::default(), &pack_args(&pack, Some(&policy))).unwrap();
        let expected = loaded
            .registry
            .get_enforcer(&loaded.tenant)
            .unwrap()
            .snapshot_digest()
            .to_string();

        let report = serde_json::to_value(catalog_report(&loaded)).unwrap();
        assert_eq!(report["digest"], expected);
        assert_eq!(report["tools"][0]["decision"]["decision"], "allowed");
        assert_eq!(report["guardrails"]["block_lists"][0], "wire_transfer");
        assert_eq!(report["guardrails"]["approval_threshold"], 0.8);
    }

    #[tokio::test]
    async fn test_invoke_without_policy_is_refused() {
        let pack = finance_pack();
        let err = cmd_invoke(
            &GovernanceConfig::default(),
            &pack_args(&pack, None),
            "refund",
            "{}",
            false,
            false,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--policy"));
    }
}
