use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use evgate_gate::{thread_context_evidence, EvidenceGate, GatePolicy};
use evgate_orchestrator::{read_records, verify_chain, GitStatusScanner, SafetyScanner};
use evgate_protocol::{
    GateInput, GateReport, PermissionDecision, PermissionQuery, SafetyReport, ThreadSnapshot,
};
use serde_json::json;

/// Exit code for a failing gate verdict (1 is reserved for errors).
const EXIT_GATE_FAIL: i32 = 2;
/// Exit code when the working tree needs human review.
const EXIT_NEEDS_REVIEW: i32 = 3;

#[derive(Parser)]
#[command(name = "evgate")]
#[command(about = "Evidence gate: decide whether there is enough evidence to answer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a gate input (JSON) and print the verdict
    Decide(DecideArgs),

    /// Show which intents a query matches
    Classify(ClassifyArgs),

    /// Print the effective intent pattern set
    Patterns(PolicyArgs),

    /// Render a conversation snapshot (JSON) as a thread evidence hit
    ThreadEvidence(InputArgs),

    /// Report working-tree safety for write/exec actions
    Scan(ScanArgs),

    /// Verify the hash chain of a JSONL audit log
    AuditVerify(AuditVerifyArgs),

    /// Print the JSON schema of a protocol type
    Schema(SchemaArgs),
}

#[derive(Args)]
struct PolicyArgs {
    /// Policy file (JSON or TOML); falls back to EVGATE_POLICY, then the builtin
    #[arg(long)]
    policy: Option<PathBuf>,
}

#[derive(Args)]
struct InputArgs {
    /// Input file, or '-' for stdin
    #[arg(long, short, default_value = "-")]
    input: PathBuf,
}

#[derive(Args)]
struct DecideArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    policy: PolicyArgs,

    /// Conversation snapshot whose context is appended as thread evidence
    #[arg(long)]
    thread: Option<PathBuf>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Query text
    query: String,

    #[command(flatten)]
    policy: PolicyArgs,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ScanArgs {
    /// Working tree to inspect
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Size above which a changed file is reported as large
    #[arg(long)]
    large_file_bytes: Option<u64>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AuditVerifyArgs {
    /// Audit log to verify
    path: PathBuf,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SchemaArgs {
    #[arg(value_enum)]
    kind: SchemaKind,
}

#[derive(Copy, Clone, ValueEnum)]
enum SchemaKind {
    GateInput,
    GateReport,
    PermissionQuery,
    PermissionDecision,
    SafetyReport,
    ThreadSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers.
    let json_output = match &cli.command {
        Commands::Decide(args) => args.json,
        Commands::Classify(args) => args.json,
        Commands::Scan(args) => args.json,
        Commands::AuditVerify(args) => args.json,
        Commands::Patterns(_) | Commands::ThreadEvidence(_) | Commands::Schema(_) => true,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Decide(args) => run_decide(args)?,
        Commands::Classify(args) => run_classify(args)?,
        Commands::Patterns(args) => run_patterns(args)?,
        Commands::ThreadEvidence(args) => run_thread_evidence(args)?,
        Commands::Scan(args) => run_scan(args).await?,
        Commands::AuditVerify(args) => run_audit_verify(args)?,
        Commands::Schema(args) => run_schema(args)?,
    }

    Ok(())
}

fn load_policy(args: &PolicyArgs) -> Result<GatePolicy> {
    let policy = match &args.policy {
        Some(path) => GatePolicy::from_file(path)?,
        None => GatePolicy::from_env()?,
    };
    log::debug!("Using gate policy '{}'", policy.name());
    Ok(policy)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn read_thread(path: &Path) -> Result<ThreadSnapshot> {
    Ok(ThreadSnapshot::from_slice_lenient(&read_input(path)?))
}

fn run_decide(args: DecideArgs) -> Result<()> {
    let gate = EvidenceGate::new(load_policy(&args.policy)?);
    let mut input = GateInput::from_slice_lenient(&read_input(&args.input.input)?);
    if let Some(path) = &args.thread {
        // Appended so the top-ranked hit and its overlap stay as provided.
        if let Some(hit) = thread_context_evidence(&read_thread(path)?) {
            input.evidence.push(hit);
        }
    }

    let report = gate.evaluate(&input);
    log::info!(
        "gate {} ({} rule(s) satisfied, top overlap {:.3})",
        report.outcome.as_str(),
        report.satisfied.len(),
        report.top_overlap
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_report(&report));
    }

    if !report.passed {
        std::process::exit(EXIT_GATE_FAIL);
    }
    Ok(())
}

fn render_report(report: &GateReport) -> String {
    if report.satisfied.is_empty() {
        return report.outcome.as_str().to_string();
    }
    let rules: Vec<&str> = report.satisfied.iter().map(|rule| rule.as_str()).collect();
    format!("{} ({})", report.outcome.as_str(), rules.join(", "))
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let policy = load_policy(&args.policy)?;
    let matches = policy.intents().classify(&args.query);
    if args.json {
        let body = json!({
            "query": args.query,
            "thread_reference": matches.thread_reference,
            "summary_request": matches.summary_request,
            "labels": matches.labels,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("thread_reference: {}", matches.thread_reference);
        println!("summary_request: {}", matches.summary_request);
        if !matches.labels.is_empty() {
            println!("labels: {}", matches.labels.join(", "));
        }
    }
    Ok(())
}

fn run_patterns(args: PolicyArgs) -> Result<()> {
    let policy = load_policy(&args)?;
    let set = policy.intents();
    let body = json!({
        "name": set.name(),
        "patterns": set.patterns(),
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn run_thread_evidence(args: InputArgs) -> Result<()> {
    let thread = read_thread(&args.input)?;
    let hit = thread_context_evidence(&thread);
    println!("{}", serde_json::to_string_pretty(&hit)?);
    Ok(())
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let mut scanner = GitStatusScanner::new(&args.root);
    if let Some(bytes) = args.large_file_bytes {
        scanner = scanner.with_large_file_bytes(bytes);
    }
    let report = scanner.scan().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_safety(&report));
    }
    if report.needs_human_review() {
        std::process::exit(EXIT_NEEDS_REVIEW);
    }
    Ok(())
}

fn render_safety(report: &SafetyReport) -> String {
    let large = report.large_files.as_deref().unwrap_or_default();
    let verdict = if report.needs_human_review() {
        "needs review"
    } else {
        "clean"
    };
    format!(
        "{verdict}: dirty={} untracked={} large={}",
        report.dirty,
        report.untracked.len(),
        large.len()
    )
}

fn run_audit_verify(args: AuditVerifyArgs) -> Result<()> {
    let records = read_records(&args.path)?;
    let intact = verify_chain(&records);
    if args.json {
        let body = json!({
            "path": args.path.display().to_string(),
            "records": records.len(),
            "intact": intact,
            "head": records.last().map(|r| r.this_hash.as_str()),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if intact {
        println!("ok: {} record(s)", records.len());
    } else {
        println!("broken: chain does not verify");
    }

    if !intact {
        std::process::exit(1);
    }
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<()> {
    let schema = match args.kind {
        SchemaKind::GateInput => schemars::schema_for!(GateInput),
        SchemaKind::GateReport => schemars::schema_for!(GateReport),
        SchemaKind::PermissionQuery => schemars::schema_for!(PermissionQuery),
        SchemaKind::PermissionDecision => schemars::schema_for!(PermissionDecision),
        SchemaKind::SafetyReport => schemars::schema_for!(SafetyReport),
        SchemaKind::ThreadSnapshot => schemars::schema_for!(ThreadSnapshot),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evgate_protocol::{GateOutcome, GateRule, SourceDiversity, GATE_SCHEMA_VERSION};

    fn report(outcome: GateOutcome, satisfied: Vec<GateRule>) -> GateReport {
        GateReport {
            schema_version: GATE_SCHEMA_VERSION,
            outcome,
            passed: outcome.passed(),
            satisfied,
            top_overlap: 0.0,
            thread_provenance: false,
            intents: vec![],
            diversity: SourceDiversity::default(),
        }
    }

    #[test]
    fn renders_outcome_with_rules() {
        assert_eq!(render_report(&report(GateOutcome::Fail, vec![])), "fail");
        assert_eq!(
            render_report(&report(
                GateOutcome::Pass,
                vec![GateRule::StrongOverlap, GateRule::WeakOverlap]
            )),
            "pass (strong_overlap, weak_overlap)"
        );
    }

    #[test]
    fn renders_safety_verdict() {
        let clean = SafetyReport::default();
        assert_eq!(render_safety(&clean), "clean: dirty=false untracked=0 large=0");
        let heavy = SafetyReport {
            dirty: false,
            untracked: vec!["a.bin".to_string()],
            large_files: Some(vec!["a.bin".to_string()]),
        };
        assert_eq!(
            render_safety(&heavy),
            "needs review: dirty=false untracked=1 large=1"
        );
    }
}
