//! NAAb command-line driver.
//!
//! The parser frontend emits AST JSON; `naab run` executes it. The
//! `verify-audit` subcommand checks a tamper-evident audit log offline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use naab_engine::ast::Program;
use naab_engine::security::{verify_log, Capability};
use naab_runtime::{RuntimeOptions, Session};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "naab")]
#[command(about = "NAAb polyglot language runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a parsed program (AST JSON)
    #[command(alias = "r")]
    Run {
        /// Path to the program's AST JSON
        program: PathBuf,
        /// Directory holding library blocks
        #[arg(long)]
        blocks_dir: Option<PathBuf>,
        /// Audit log path
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Enable the audit hash chain
        #[arg(long)]
        tamper_evident: bool,
        /// Disable parallel polyglot execution
        #[arg(long)]
        no_parallel: bool,
        /// Polyglot worker thread count (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
        /// Grant only the listed capabilities (comma-separated:
        /// block_load,block_call,fs_read,fs_write,network,spawn_process)
        #[arg(long)]
        capabilities: Option<String>,
        /// Redact paths and secrets in error output
        #[arg(long)]
        redact: bool,
    },

    /// Verify a tamper-evident audit log
    VerifyAudit {
        /// Path to the audit log
        log: PathBuf,
        /// HMAC key for signature verification
        #[arg(long)]
        hmac_key: Option<String>,
    },
}

fn parse_capabilities(list: &str) -> Result<Vec<Capability>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| match name.to_ascii_lowercase().as_str() {
            "block_load" => Ok(Capability::BlockLoad),
            "block_call" => Ok(Capability::BlockCall),
            "fs_read" => Ok(Capability::FsRead),
            "fs_write" => Ok(Capability::FsWrite),
            "network" => Ok(Capability::Network),
            "spawn_process" => Ok(Capability::SpawnProcess),
            other => bail!("unknown capability: {other}"),
        })
        .collect()
}

fn cmd_run(
    program: PathBuf,
    blocks_dir: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    tamper_evident: bool,
    no_parallel: bool,
    threads: usize,
    capabilities: Option<String>,
    redact: bool,
) -> Result<i32> {
    let text = std::fs::read_to_string(&program)
        .with_context(|| format!("cannot read {}", program.display()))?;
    let ast: Program = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a parsed NAAb program", program.display()))?;

    let capabilities = capabilities.as_deref().map(parse_capabilities).transpose()?;
    let options = RuntimeOptions {
        blocks_dir,
        audit_log,
        tamper_evident,
        capabilities,
        parallel_polyglot: !no_parallel,
        worker_threads: threads,
        redact_errors: redact,
        ..Default::default()
    };

    let mut session = Session::new(&options);
    match session.run(&ast) {
        Ok(()) => Ok(0),
        Err(err) => {
            let file = ast.source_file.as_str();
            eprintln!("{}", session.render_error(&err, "", file));
            Ok(1)
        }
    }
}

fn cmd_verify_audit(log: PathBuf, hmac_key: Option<String>) -> Result<i32> {
    let result = verify_log(&log, hmac_key.as_deref().map(str::as_bytes))
        .with_context(|| format!("cannot verify {}", log.display()))?;
    print!("{}", result.report());
    Ok(if result.is_valid { 0 } else { 2 })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            program,
            blocks_dir,
            audit_log,
            tamper_evident,
            no_parallel,
            threads,
            capabilities,
            redact,
        } => cmd_run(
            program,
            blocks_dir,
            audit_log,
            tamper_evident,
            no_parallel,
            threads,
            capabilities,
            redact,
        )?,
        Commands::VerifyAudit { log, hmac_key } => cmd_verify_audit(log, hmac_key)?,
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parsing() {
        let caps = parse_capabilities("block_load, spawn_process").unwrap();
        assert_eq!(caps, vec![Capability::BlockLoad, Capability::SpawnProcess]);
        assert!(parse_capabilities("teleport").is_err());
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "naab",
            "run",
            "prog.json",
            "--no-parallel",
            "--threads",
            "2",
            "--capabilities",
            "block_call",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                no_parallel,
                threads,
                capabilities,
                ..
            } => {
                assert!(no_parallel);
                assert_eq!(threads, 2);
                assert_eq!(capabilities.as_deref(), Some("block_call"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_verify_audit() {
        let cli =
            Cli::try_parse_from(["naab", "verify-audit", "audit.jsonl", "--hmac-key", "k"])
                .unwrap();
        assert!(matches!(cli.command, Commands::VerifyAudit { .. }));
    }
}
