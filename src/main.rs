use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use twinrisk::config::AnalysisConfig;
use twinrisk::economics::{round_to, EconomicProfile, ProfileOverride};
use twinrisk::engine::{AnalysisReport, RiskAssessment, RiskEngine};
use twinrisk::severity::{failure_modes, time_to_failure, Severity};
use twinrisk::source::{parse_json_lines, JsonLinesSource, MemorySource};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "twinrisk", about = "Digital twin risk scoring and failure cost projection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Telemetry root directory
    #[arg(long, env = "TWINRISK_SOURCE")]
    source: Option<PathBuf>,
    /// Store directory below the telemetry root
    #[arg(long, env = "TWINRISK_STORE")]
    store: Option<String>,
    /// Group to analyze (repeatable; default: all built-in groups)
    #[arg(long = "group", value_name = "GROUP")]
    groups: Vec<String>,
    /// Most recent rows per group [100, 5000]
    #[arg(long)]
    limit: Option<usize>,
    /// Prediction horizon in hours [12, 336]
    #[arg(long)]
    horizon: Option<u32>,
    /// Hide units below this risk from trends [0, 1]
    #[arg(long)]
    min_risk: Option<f64>,
    /// Economic override, e.g. turbine1.revenue_per_hour=90000 (repeatable)
    #[arg(long = "set", value_name = "GROUP.KEY=VALUE")]
    overrides: Vec<ProfileOverride>,
    /// Currency symbol for display
    #[arg(long)]
    currency: Option<String>,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every group, score units and print the risk dashboard
    Analyze {
        #[command(flatten)]
        common: CommonArgs,
        /// Also train the informational at-risk classifier per group
        #[arg(long)]
        train_classifier: bool,
        /// Output as JSON format
        #[arg(long)]
        json: bool,
    },
    /// Print the effective economic profile of each group
    Profiles {
        #[command(flatten)]
        common: CommonArgs,
        /// Output as JSON format
        #[arg(long)]
        json: bool,
    },
    /// Score a single JSON-lines file as one group
    Score {
        /// JSON-lines telemetry file
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Output as JSON format
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default = if verbose { "twinrisk=debug" } else { "twinrisk=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(c: &CommonArgs) -> Result<AnalysisConfig> {
    let mut config = match &c.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(source) = &c.source {
        config.source = source.clone();
    }
    if let Some(store) = &c.store {
        config.store = store.clone();
    }
    if !c.groups.is_empty() {
        config.groups = c.groups.clone();
    }
    if let Some(limit) = c.limit {
        config.limit = limit;
    }
    if let Some(horizon) = c.horizon {
        config.horizon_hours = horizon;
    }
    if let Some(min_risk) = c.min_risk {
        config.min_risk = min_risk;
    }
    if let Some(currency) = &c.currency {
        config.currency = currency.clone();
    }
    Ok(config)
}

fn build_engine(config: AnalysisConfig, overrides: &[ProfileOverride]) -> Result<RiskEngine> {
    let mut engine = RiskEngine::new(config).context("invalid configuration")?;
    engine
        .apply_overrides(overrides)
        .context("rejected economic override")?;
    Ok(engine)
}

/// `1234567.891` -> `₹1,234,567.89`.
fn money(currency: &str, value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{currency}{grouped}.{:02}", cents % 100)
}

fn unit_label(a: &RiskAssessment) -> String {
    match &a.unit {
        Some(unit) => format!("{}/{unit}", a.group),
        None => a.group.clone(),
    }
}

// ---------------------------------------------------------------------------
// Report output
// ---------------------------------------------------------------------------

fn print_json(report: &AnalysisReport, config: &AnalysisConfig) -> Result<()> {
    let out = serde_json::json!({
        "generated_at": Utc::now().to_rfc3339(),
        "currency": config.currency,
        "horizon_hours": report.horizon_hours,
        "min_risk": config.min_risk,
        "summary": {
            "counts": report.severity_counts(),
            "total_revenue_at_risk": round_to(report.total_revenue_at_risk(), 2),
        },
        "assessments": report.assessments,
        "trends": report.trends,
        "notices": report.notices,
        "classifiers": report.classifiers,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_dashboard(title: &str, report: &AnalysisReport, config: &AnalysisConfig) {
    let cur = config.currency.as_str();
    let counts = report.severity_counts();

    println!("=== Digital Twin Risk: {title} ===");
    println!("  horizon:          {:>10} h", report.horizon_hours);
    println!("  assets scored:    {:>10}", report.assessments.len());
    println!("    high risk:      {:>10}", counts.high);
    println!("    medium risk:    {:>10}", counts.medium);
    println!("    low risk:       {:>10}", counts.low);
    println!("  revenue at risk:  {:>10}", money(cur, report.total_revenue_at_risk()));

    if !report.assessments.is_empty() {
        println!("\n--- Risk Summary ---");
        println!(
            "  {:28} {:>6} {:>8} {:>10} {:>18} {:>18}",
            "asset", "risk", "severity", "downtime_h", "revenue_loss", "maintenance"
        );
        for a in &report.assessments {
            println!(
                "  {:28} {:>6.3} {:>8} {:>10.2} {:>18} {:>18}",
                unit_label(a),
                a.risk,
                a.severity,
                a.costs.expected_downtime_hours,
                money(cur, a.costs.revenue_loss),
                money(cur, a.costs.maintenance_cost),
            );
        }
    }

    let healthy: Vec<_> = report.with_severity(Severity::Low).collect();
    if !healthy.is_empty() {
        println!("\n--- Healthy Assets ---");
        for a in healthy {
            println!("  {}: operating normally, no maintenance required", unit_label(a));
        }
    }

    let medium: Vec<_> = report.with_severity(Severity::Medium).collect();
    if !medium.is_empty() {
        println!("\n--- Medium Risk ---");
        for a in medium {
            println!(
                "  {}  risk={:.3}  maintenance {}  potential savings {}",
                unit_label(a),
                a.risk,
                a.severity.maintenance_window(),
                money(cur, a.costs.revenue_loss),
            );
            for action in a.severity.recommended_actions() {
                println!("      - {action}");
            }
        }
    }

    let high: Vec<_> = report.with_severity(Severity::High).collect();
    if !high.is_empty() {
        println!("\n--- High Risk ---");
        for a in high {
            println!("  {}", unit_label(a));
            println!("      failure probability:  {:.1}%", a.risk * 100.0);
            if let Some(window) = time_to_failure(a.risk) {
                println!("      time to failure:      {} ({})", window.label, window.urgency);
                println!(
                    "      recommended action:   {} within {}",
                    a.severity.maintenance_window(),
                    window.label
                );
            }
            println!("      likely failure modes: {}", failure_modes(&a.group).join(", "));
            for action in a.severity.recommended_actions() {
                println!("      - {action}");
            }
            println!("      cost if failure:      {}", money(cur, a.failure_cost()));
        }
    }

    if !report.trends.is_empty() {
        println!("\n--- Risk Trends (min risk {:.2}) ---", config.min_risk);
        for trend in &report.trends {
            println!(
                "  {}: {} units shown, {} hidden",
                trend.group,
                trend.units.len(),
                trend.hidden_units
            );
            for unit in &trend.units {
                let peak = unit.points.iter().map(|p| p.risk).fold(0.0, f64::max);
                let last = unit.points.last();
                println!(
                    "    {:24} avg={:.3}  peak={:.3}  points={:5}  last={}",
                    unit.unit.as_deref().unwrap_or("(all)"),
                    unit.avg_risk,
                    peak,
                    unit.points.len(),
                    last.map(|p| format!("{} {:.3}", p.timestamp.format("%Y-%m-%d %H:%M"), p.risk))
                        .unwrap_or_default(),
                );
            }
        }
    }

    if !report.classifiers.is_empty() {
        println!("\n--- Classifier (informational) ---");
        for c in &report.classifiers {
            let accuracy = c
                .test_accuracy
                .map(|a| format!("{:.1}%", a * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "  {:14} path={:?}  features={}  train={}  test={}  positives={}  accuracy={accuracy}",
                c.group,
                c.path,
                c.feature_names.len(),
                c.train_rows,
                c.test_rows,
                c.positive_labels,
            );
        }
    }

    if !report.notices.is_empty() {
        println!("\n--- Notices ---");
        for notice in &report.notices {
            println!("  {notice}");
        }
    }

    println!("\nLast updated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_analyze(c: CommonArgs, train_classifier: bool, json: bool) -> Result<()> {
    let mut config = load_config(&c)?;
    config.train_classifier |= train_classifier;
    let source = JsonLinesSource::for_store(&config.source, &config.store);
    let engine = build_engine(config, &c.overrides)?;

    let report = engine.run(&source);
    if json {
        print_json(&report, engine.config())
    } else {
        print_dashboard(&engine.config().store, &report, engine.config());
        Ok(())
    }
}

fn cmd_profiles(c: CommonArgs, json: bool) -> Result<()> {
    let config = load_config(&c)?;
    let engine = build_engine(config, &c.overrides)?;
    let profiles = engine.profiles();
    let cur = engine.config().currency.as_str();

    if json {
        let mut out = serde_json::Map::new();
        for (group, p) in profiles.iter() {
            out.insert(group.to_string(), serde_json::to_value(p)?);
        }
        out.insert("*".to_string(), serde_json::to_value(EconomicProfile::GENERIC)?);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("=== Economic Profiles ===");
    println!("  {:16} {:>18} {:>18}", "group", "revenue/hour", "maintenance base");
    for (group, p) in profiles.iter() {
        println!(
            "  {group:16} {:>18} {:>18}",
            money(cur, p.revenue_per_hour),
            money(cur, p.maintenance_base)
        );
    }
    let generic = EconomicProfile::GENERIC;
    println!(
        "  {:16} {:>18} {:>18}",
        "(other)",
        money(cur, generic.revenue_per_hour),
        money(cur, generic.maintenance_base)
    );
    Ok(())
}

fn cmd_score(input: PathBuf, c: CommonArgs, json: bool) -> Result<()> {
    let data = fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let parsed = parse_json_lines(&data);
    if parsed.parse_errors > 0 {
        warn!(skipped = parsed.parse_errors, "skipped unreadable telemetry lines");
    }

    let mut config = load_config(&c)?;
    let group = match c.groups.as_slice() {
        [group] => group.clone(),
        [] => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("cannot derive a group name from the input; pass --group")?,
        _ => anyhow::bail!("score takes a single --group"),
    };
    config.groups = vec![group.clone()];

    let mut source = MemorySource::new();
    source.insert(&group, parsed.records);
    let engine = build_engine(config, &c.overrides)?;

    let report = engine.run(&source);
    if json {
        print_json(&report, engine.config())
    } else {
        print_dashboard(&input.display().to_string(), &report, engine.config());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Commands::Analyze { common, .. }
        | Commands::Profiles { common, .. }
        | Commands::Score { common, .. } => common.verbose,
    };
    init_logging(verbose);

    let result = match cli.command {
        Commands::Analyze { common, train_classifier, json } => {
            cmd_analyze(common, train_classifier, json)
        }
        Commands::Profiles { common, json } => cmd_profiles(common, json),
        Commands::Score { input, common, json } => cmd_score(input, common, json),
    };
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
