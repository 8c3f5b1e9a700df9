// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use idstate_kernel::claim::ClaimEntry;
use idstate_kernel::types::NodeHash;
use idstate_kernel::verify::{HistoricalClaimProof, NonRevocationProof};

/// Offline checker for proofs exported by an idstate node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a non-revocation proof bundle (JSON).
    NonRevocation {
        proof: PathBuf,
        /// Expected state commitment, e.g. the one read from the chain.
        #[arg(long)]
        state: Option<String>,
    },
    /// Check a historical claim proof against the claim it proves.
    Claim {
        proof: PathBuf,
        claim: PathBuf,
        /// Expected roots-tree root of the signing state.
        #[arg(long)]
        roots_root: Option<String>,
    },
}

#[derive(Serialize, Debug)]
struct Report {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<NodeHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Report {
    fn invalid(error: String) -> Self {
        Self {
            valid: false,
            state: None,
            revoked: None,
            revoked_at: None,
            revision: None,
            error: Some(error),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {} file {}", what, path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {} JSON", what))
}

fn parse_hash(hex: &str) -> Result<NodeHash> {
    NodeHash::from_hex(hex).map_err(|e| anyhow::anyhow!("Invalid hash {}: {:?}", hex, e))
}

fn check_non_revocation(path: &Path, expected: Option<&str>) -> Result<Report> {
    let bundle: NonRevocationProof = read_json(path, "proof")?;

    if let Some(expected) = expected {
        let expected = parse_hash(expected)?;
        if expected != bundle.state {
            return Ok(Report::invalid(format!("state mismatch: proof binds {}", bundle.state)));
        }
    }

    Ok(match bundle.verify() {
        Ok(revoked) => Report {
            valid: true,
            state: Some(bundle.state),
            revoked: Some(revoked),
            revoked_at: bundle.revoked_at(),
            revision: None,
            error: None,
        },
        Err(e) => Report::invalid(format!("{:?}", e)),
    })
}

fn check_claim(proof: &Path, claim: &Path, expected: Option<&str>) -> Result<Report> {
    let bundle: HistoricalClaimProof = read_json(proof, "proof")?;
    let claim: ClaimEntry = read_json(claim, "claim")?;

    if let Some(expected) = expected {
        let expected = parse_hash(expected)?;
        if expected != bundle.roots_root {
            return Ok(Report::invalid(format!("roots root mismatch: proof binds {}", bundle.roots_root)));
        }
    }

    Ok(match bundle.verify(&claim) {
        Ok(()) => Report {
            valid: true,
            state: None,
            revoked: None,
            revoked_at: None,
            revision: Some(bundle.revision),
            error: None,
        },
        Err(e) => Report::invalid(format!("{:?}", e)),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    eprintln!("idstate verifier v{}", env!("CARGO_PKG_VERSION"));

    let report = match &args.command {
        Command::NonRevocation { proof, state } => check_non_revocation(proof, state.as_deref())?,
        Command::Claim { proof, claim, roots_root } => check_claim(proof, claim, roots_root.as_deref())?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}
