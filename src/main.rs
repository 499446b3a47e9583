//! DocGuard operator CLI.
//!
//! Inspects the decision table, checks single decisions, prints TOTP codes
//! for authenticator setup checks, and validates configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use docguard::access::policy::{decision_matrix, evaluate, evaluate_creation, Decision};
use docguard::access::{Role, SecurityLevel};
use docguard::audit::{sink_from_config, AuditEvent};
use docguard::config::{self, Config};
use docguard::logging::{self, LoggingGuard};
use docguard::otp::totp;
use docguard::otp::OtpSeed;
use docguard::types::{Action, DocumentDescriptor, DocumentId, Principal, UserId};

/// DocGuard — role and classification based document access with OTP step-up.
#[derive(Parser)]
#[command(name = "docguard", version, about)]
struct Cli {
    /// Config file (default: `$DOCGUARD_CONFIG_PATH` or `~/.docguard/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write JSON logs with daily rotation to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Print the full decision table.
    Matrix {
        /// Emit JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Evaluate one access request.
    Evaluate {
        /// Actor role.
        #[arg(long)]
        role: Role,
        /// Document level.
        #[arg(long)]
        level: SecurityLevel,
        /// Requested action.
        #[arg(long)]
        action: Action,
        /// The actor owns the document.
        #[arg(long)]
        owner: bool,
    },
    /// Check whether a role may create a document at a level.
    CanCreate {
        /// Actor role.
        #[arg(long)]
        role: Role,
        /// Target level.
        #[arg(long)]
        level: SecurityLevel,
    },
    /// Print the current TOTP code for a base32 secret.
    Code {
        /// Base32 secret as shown during enrollment.
        #[arg(long)]
        secret: String,
    },
    /// Load and validate the configuration, then print the effective values.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _logging_guard = init_logging(cli.log_dir.as_deref(), &config)?;
    debug!(issuer = %config.otp.issuer, "configuration loaded");

    match cli.command {
        Command::Matrix { json } => handle_matrix(json),
        Command::Evaluate {
            role,
            level,
            action,
            owner,
        } => handle_evaluate(&config, role, level, action, owner),
        Command::CanCreate { role, level } => handle_can_create(&config, role, level),
        Command::Code { secret } => handle_code(&config, &secret),
        Command::CheckConfig => handle_check_config(&config),
    }
}

fn init_logging(
    log_dir: Option<&std::path::Path>,
    config: &Config,
) -> anyhow::Result<Option<LoggingGuard>> {
    match log_dir {
        Some(dir) => Ok(Some(logging::init_production(dir, &config.logging.level)?)),
        None => {
            logging::init_cli(&config.logging.level);
            Ok(None)
        }
    }
}

fn describe(decision: &Decision) -> String {
    match (decision.permitted, decision.otp_required) {
        (false, _) => format!("deny ({})", decision.reason.code()),
        (true, false) => format!("allow ({})", decision.reason.code()),
        (true, true) => format!("allow+otp ({})", decision.reason.code()),
    }
}

/// Print every (role, ownership, level, action) combination.
fn handle_matrix(json: bool) -> anyhow::Result<()> {
    let rows = decision_matrix();
    if json {
        for row in &rows {
            println!("{}", serde_json::to_string(row)?);
        }
        return Ok(());
    }
    println!(
        "{:<11} {:<6} {:<13} {:<9} DECISION",
        "ROLE", "OWNER", "LEVEL", "ACTION"
    );
    for row in &rows {
        println!(
            "{:<11} {:<6} {:<13} {:<9} {}",
            row.role.as_str(),
            if row.owner { "yes" } else { "no" },
            row.level.as_str(),
            row.action.as_str(),
            describe(&row.decision)
        );
    }
    Ok(())
}

/// Evaluate one request and audit it through the configured sink.
fn handle_evaluate(
    config: &Config,
    role: Role,
    level: SecurityLevel,
    action: Action,
    owner: bool,
) -> anyhow::Result<()> {
    let actor = UserId(1);
    let owner_id = if owner { actor } else { UserId(2) };
    let principal = Principal::new(actor, role);
    let document = DocumentDescriptor::new(DocumentId(1), owner_id, level);
    let decision = evaluate(&principal, &document, action);

    let sink = sink_from_config(&config.audit)?;
    sink.record(&AuditEvent::decision(
        Utc::now(),
        principal.id,
        Some(document.id),
        Some(action),
        decision,
    ));

    println!("{}", serde_json::to_string_pretty(&decision)?);
    info!(outcome = ?decision.outcome(), "evaluated");
    Ok(())
}

/// Apply the creation rule.
fn handle_can_create(config: &Config, role: Role, level: SecurityLevel) -> anyhow::Result<()> {
    let principal = Principal::new(UserId(1), role);
    let decision = evaluate_creation(&principal, level);
    let sink = sink_from_config(&config.audit)?;
    sink.record(&AuditEvent::decision(
        Utc::now(),
        principal.id,
        None,
        None,
        decision,
    ));
    println!("{}", describe(&decision));
    Ok(())
}

/// Print the code an authenticator should currently show.
fn handle_code(config: &Config, secret: &str) -> anyhow::Result<()> {
    let seed = OtpSeed::from_base32(secret).context("invalid secret")?;
    let params = config.otp.totp_params();
    let now = Utc::now();
    let code = totp::code_at(&seed, now, params)?;
    let step = totp::time_step(now, params.step_seconds);
    let elapsed = u64::try_from(now.timestamp())
        .unwrap_or(0)
        .checked_rem(params.step_seconds)
        .unwrap_or(0);
    let remaining = params.step_seconds.saturating_sub(elapsed);
    println!("{code}");
    debug!(step, remaining, "code valid for the current step");
    Ok(())
}

/// Print the effective configuration.
fn handle_check_config(config: &Config) -> anyhow::Result<()> {
    println!("otp.issuer = {:?}", config.otp.issuer);
    println!("otp.step_seconds = {}", config.otp.step_seconds);
    println!("otp.skew_steps = {}", config.otp.skew_steps);
    println!(
        "otp.challenge_ttl_seconds = {}",
        config.otp.challenge_ttl_seconds
    );
    println!("otp.max_attempts = {}", config.otp.max_attempts);
    println!("audit.enabled = {}", config.audit.enabled);
    match &config.audit.path {
        Some(path) => println!("audit.path = {:?}", path.display().to_string()),
        None => println!("audit.path = (tracing target \"audit\")"),
    }
    println!("logging.level = {:?}", config.logging.level);
    println!("config ok");
    Ok(())
}
