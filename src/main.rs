// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dashguard CLI
//!
//! Inspect and drive the local session, lockout and security-event state.
//! The short-lived session record is kept in `tab-session.json` in the data
//! directory so it survives between invocations of this tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use dashguard::config::{default_data_dir, load_config, save_config, SecurityConfig};
use dashguard::security::{
    AuthenticatedUser, LockoutStatus, LoginFlow, LoginResult, SecurityContext, SessionGate,
    SessionStatus,
};
use dashguard::utils::{ceil_minutes, mask_identifier, mask_sensitive};
use dashguard::AuthError;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short-lived session file used by the CLI in place of tab storage.
const SESSION_FILE: &str = "tab-session.json";

/// dashguard - session lifecycle, login lockout and security events.
#[derive(Parser)]
#[command(name = "dashguard")]
#[command(version = VERSION)]
#[command(about = "Session lifecycle, login lockout and security event log.")]
#[command(long_about = "dashguard - client-side security state\n\n\
    Overview:           dashguard status\n\
    Sign in:            dashguard login ok user@example.com\n\
    Record a failure:   dashguard login fail user@example.com\n\
    Check a lockout:    dashguard lockout user@example.com\n\
    Recent events:      dashguard events --count 20")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (default: ~/.dashguard)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Quiet mode: errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregated session, lockout and event overview
    Status {
        /// Also report the lockout state of this identifier
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Manage the active session
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Simulate a login outcome for an identifier
    Login {
        #[command(subcommand)]
        command: LoginCommands,
    },

    /// Show or clear the lockout for an identifier
    Lockout {
        identifier: String,
        /// Clear attempts and lockout
        #[arg(long)]
        clear: bool,
    },

    /// Show the security event log
    Events {
        /// Number of events to show
        #[arg(short, long, default_value_t = 20)]
        count: usize,
        /// Delete all stored events
        #[arg(long)]
        clear: bool,
    },

    /// Print this machine's device id
    Device,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a session directly (bypasses lockout checks)
    Create { user_id: String, email: String },
    /// Show the session
    Show,
    /// Refresh if due, otherwise report whether the session is usable
    Gate,
    /// Force a refresh
    Refresh,
    /// Record user activity
    Touch,
    /// Log out
    Clear,
}

#[derive(Subcommand)]
enum LoginCommands {
    /// Record a rejected login
    Fail { identifier: String },
    /// Record a successful login and open a session
    Ok {
        identifier: String,
        /// User id for the new session (default: the identifier)
        #[arg(long)]
        user_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file if none exists
    Init,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// JSON acknowledgement for commands that only change state.
fn ack(action: &str, details: Value) -> Value {
    let mut value = json!({ "action": action, "ok": true });
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), details) {
        map.extend(extra);
    }
    value
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = data_dir.join("config.json");

    if let Commands::Config { command } = &cli.command {
        return run_config(command, &config_path, cli.json);
    }

    let mut config = load_config(&config_path)?;
    config.data_dir = Some(data_dir.clone());

    let ctx = SecurityContext::open_with_session_file(config, &data_dir.join(SESSION_FILE))
        .context("Failed to open dashguard state")?;

    match cli.command {
        Commands::Status { identifier } => run_status(&ctx, identifier.as_deref(), cli.json),
        Commands::Session { command } => run_session(&ctx, command, cli.json),
        Commands::Login { command } => run_login(&ctx, command, cli.json),
        Commands::Lockout { identifier, clear } => run_lockout(&ctx, &identifier, clear, cli.json),
        Commands::Events { count, clear } => run_events(&ctx, count, clear, cli.json),
        Commands::Device => {
            let device_id = ctx.sessions().device_id();
            if cli.json {
                return print_json(&json!({ "deviceId": device_id }));
            }
            println!("{}", device_id);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn run_config(command: &ConfigCommands, path: &Path, json: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(path)?;
            if json {
                print_json(&config)?;
            } else {
                println!("{}", "Configuration".bold());
                println!("  session.max_age_ms            {}", config.session.max_age_ms);
                println!("  session.refresh_threshold_ms  {}", config.session.refresh_threshold_ms);
                println!("  session.inactivity_timeout_ms {}", config.session.inactivity_timeout_ms);
                println!("  lockout.max_attempts          {}", config.lockout.max_attempts);
                println!("  lockout.lockout_duration_ms   {}", config.lockout.lockout_duration_ms);
                println!("  lockout.attempt_window_ms     {}", config.lockout.attempt_window_ms);
                println!("  events.max_events             {}", config.events.max_events);
            }
        }
        ConfigCommands::Init => {
            let created = !path.exists();
            if created {
                save_config(path, &SecurityConfig::default())?;
            }
            if json {
                return print_json(&ack(
                    "config_init",
                    json!({ "path": path.display().to_string(), "created": created }),
                ));
            }
            if created {
                println!("{} Wrote default config to {}", "[✓]".green(), path.display());
            } else {
                println!("{} Config already exists at {}", "[i]".cyan(), path.display());
            }
        }
        ConfigCommands::Path => {
            if json {
                return print_json(&json!({ "path": path.display().to_string() }));
            }
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn status_label(status: SessionStatus) -> String {
    match status {
        SessionStatus::Active => status.to_string().green().to_string(),
        SessionStatus::RefreshDue => status.to_string().yellow().to_string(),
        SessionStatus::None => status.to_string().dimmed().to_string(),
        SessionStatus::Invalid(_) => status.to_string().red().to_string(),
    }
}

fn run_status(ctx: &SecurityContext, identifier: Option<&str>, json: bool) -> Result<()> {
    let status = ctx.security_status(identifier);
    if json {
        return print_json(&status);
    }

    println!("{}", "Session".bold());
    println!("  status      {}", status_label(status.session.status));
    if let Some(email) = &status.session.user_email {
        println!("  user        {}", mask_identifier(email));
    }
    if let Some(expires) = &status.session.expires_at {
        println!("  expires     {}", expires);
    }
    if status.session.valid {
        println!("  remaining   {} min", ceil_minutes(status.session.remaining_ms));
    }
    println!(
        "  device      {}",
        status.device.as_deref().unwrap_or("(not registered)")
    );

    println!("{}", "Login protection".bold());
    println!("  active lockouts      {}", status.active_lockouts);
    println!("  failed logins (24h)  {}", status.failed_logins_24h);
    if let (Some(id), Some(lockout)) = (identifier, status.lockout) {
        print_lockout(id, lockout);
    }

    if let Some(event) = &status.last_event {
        println!("{}", "Last event".bold());
        println!("  {}", event.to_audit_string());
    }
    Ok(())
}

fn print_lockout(identifier: &str, lockout: LockoutStatus) {
    match lockout {
        LockoutStatus::Unlocked => {
            println!("  {}  {}", mask_identifier(identifier), "not locked".green());
        }
        LockoutStatus::Locked { remaining_ms, .. } => {
            println!(
                "  {}  {} ({} min remaining)",
                mask_identifier(identifier),
                "LOCKED".red().bold(),
                ceil_minutes(remaining_ms)
            );
        }
    }
}

fn run_session(ctx: &SecurityContext, command: SessionCommands, json: bool) -> Result<()> {
    let sessions = ctx.sessions();
    match command {
        SessionCommands::Create { user_id, email } => {
            let session = sessions.create_session(&user_id, &email);
            if json {
                return print_json(&session);
            }
            println!(
                "{} Session {} created for {}",
                "[✓]".green(),
                mask_sensitive(&session.id, 8),
                mask_identifier(&email)
            );
        }
        SessionCommands::Show => {
            let info = sessions.session_info();
            if json {
                return print_json(&info);
            }
            println!("status        {}", status_label(info.status));
            for (label, value) in [
                ("user", info.user_email.as_deref().map(mask_identifier)),
                ("created", info.created_at),
                ("expires", info.expires_at),
                ("last activity", info.last_activity),
            ] {
                if let Some(value) = value {
                    println!("{:<13} {}", label, value);
                }
            }
        }
        SessionCommands::Gate => {
            let gate = LoginFlow::new(ctx).gate();
            if json {
                return print_json(&gate);
            }
            print_gate(gate);
        }
        SessionCommands::Refresh => {
            let refreshed = sessions.refresh_session();
            if json {
                return print_json(&json!({
                    "refreshed": refreshed.is_some(),
                    "session": refreshed,
                }));
            }
            match refreshed {
                Some(s) => println!(
                    "{} Session extended to {}",
                    "[✓]".green(),
                    dashguard::clock::format_millis(s.expires_at)
                ),
                None => println!("{} No valid session to refresh", "[!]".yellow()),
            }
        }
        SessionCommands::Touch => {
            sessions.update_last_activity();
            if json {
                return print_json(&ack(
                    "session_touch",
                    json!({ "lastActivity": ctx.clock().now_ms() }),
                ));
            }
            println!("{} Activity recorded", "[✓]".green());
        }
        SessionCommands::Clear => {
            sessions.clear_session();
            if json {
                return print_json(&ack("session_clear", Value::Null));
            }
            println!("{} Signed out", "[✓]".green());
        }
    }
    Ok(())
}

fn print_gate(gate: SessionGate) {
    match gate {
        SessionGate::Active(_) => println!("{} Session active", "[✓]".green()),
        SessionGate::Refreshed(s) => println!(
            "{} Session refreshed, expires {}",
            "[✓]".green(),
            dashguard::clock::format_millis(s.expires_at)
        ),
        SessionGate::RedirectToLogin => {
            println!("{} No valid session, sign in required", "[!]".yellow())
        }
    }
}

fn run_login(ctx: &SecurityContext, command: LoginCommands, json: bool) -> Result<()> {
    // Simulated: no credentials are checked, the outcome is given on the command line
    let flow = LoginFlow::new(ctx).with_retry_policy(dashguard::RetryPolicy::none());
    let result = match command {
        LoginCommands::Fail { identifier } => {
            flow.attempt(&identifier, || Err(AuthError::Unauthorized))?
        }
        LoginCommands::Ok {
            identifier,
            user_id,
        } => flow.attempt(&identifier, || {
            Ok(AuthenticatedUser {
                user_id: user_id.clone().unwrap_or_else(|| identifier.clone()),
                email: identifier.clone(),
            })
        })?,
    };

    if json {
        return print_json(&result);
    }
    match result {
        LoginResult::SignedIn(session) => println!(
            "{} Signed in, session {}",
            "[✓]".green(),
            mask_sensitive(&session.id, 8)
        ),
        LoginResult::Rejected {
            message, warning, ..
        } => {
            println!("{} {}", "[✗]".red(), message);
            if let Some(warning) = warning {
                println!("{} {}", "[!]".yellow(), warning);
            }
        }
        LoginResult::LockedOut { message, .. } => println!("{} {}", "[✗]".red().bold(), message),
    }
    Ok(())
}

fn run_lockout(ctx: &SecurityContext, identifier: &str, clear: bool, json: bool) -> Result<()> {
    let tracker = ctx.attempts();
    if clear {
        tracker.clear_attempts(identifier);
    }
    let status = tracker.is_locked_out(identifier);
    if json {
        return print_json(&status);
    }
    print_lockout(identifier, status);
    println!(
        "  recent failures  {} of {}",
        tracker.attempts(identifier).len(),
        tracker.config().max_attempts
    );
    Ok(())
}

fn run_events(ctx: &SecurityContext, count: usize, clear: bool, json: bool) -> Result<()> {
    let events = ctx.events();
    if clear {
        events.clear_events();
        if json {
            return print_json(&ack("events_clear", Value::Null));
        }
        println!("{} Security event log cleared", "[✓]".green());
        return Ok(());
    }

    let recent = events.recent_events(count);
    if json {
        return print_json(&recent);
    }
    if recent.is_empty() {
        println!("{} No security events recorded", "[i]".cyan());
        return Ok(());
    }
    for event in &recent {
        println!("{}", event.to_audit_string());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
