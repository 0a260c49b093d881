//! ltrie CLI - Command line interface for ledger_trie
//!
//! Builds tries from JSON key/value files, prints commitments, and produces
//! and checks proofs. Input files map hex keys to hex values.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ledger_trie::{
    verify_proof, AccountId, ByteKey, Error, Hash, MerkleTrie, Proof, TrieConfig, TrieKey,
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "ltrie")]
#[command(about = "Merkle radix trie commitments and proofs for ledger state")]
#[command(version)]
struct Cli {
    /// Path to a JSON trie config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Key width in bytes (8 for account ids, or 16 or 32)
    #[arg(long, default_value = "8")]
    key_bytes: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a trie from a key/value file and print its commitment
    Commit {
        /// JSON object of hex key to hex value
        #[arg(short, long)]
        input: PathBuf,
        /// Build this many sub-tries in parallel and batch-merge them
        #[arg(short, long, default_value = "1")]
        shards: usize,
    },

    /// Prove membership or absence of a key
    Prove {
        /// JSON object of hex key to hex value
        #[arg(short, long)]
        input: PathBuf,
        /// Hex key to prove
        #[arg(short, long)]
        key: String,
    },

    /// Check a proof against a root commitment
    Verify {
        /// Proof as produced by `prove`
        #[arg(short, long)]
        proof: PathBuf,
        /// Hex root commitment
        #[arg(short, long)]
        root: String,
    },
}

/// Raw key/value pairs in key order
type Entries = Vec<(Vec<u8>, Vec<u8>)>;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => TrieConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TrieConfig::default(),
    };

    match &cli.command {
        Commands::Commit { input, shards } => {
            let entries = read_entries(input, cli.key_bytes)?;
            let (root, size) = match cli.key_bytes {
                8 => commit_as::<AccountId>(&config, &entries, *shards)?,
                16 => commit_as::<ByteKey<16>>(&config, &entries, *shards)?,
                32 => commit_as::<ByteKey<32>>(&config, &entries, *shards)?,
                n => bail!(unsupported_width(n)),
            };
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": root.to_hex(),
                    "size": size
                }),
            )?;
        }

        Commands::Prove { input, key } => {
            let entries = read_entries(input, cli.key_bytes)?;
            let key = parse_hex(key, cli.key_bytes)?;
            let (root, proof) = match cli.key_bytes {
                8 => prove_as::<AccountId>(&config, &entries, &key)?,
                16 => prove_as::<ByteKey<16>>(&config, &entries, &key)?,
                32 => prove_as::<ByteKey<32>>(&config, &entries, &key)?,
                n => bail!(unsupported_width(n)),
            };
            output(
                cli.format,
                &serde_json::json!({
                    "root": root.to_hex(),
                    "membership": proof.is_membership(),
                    "proof": proof
                }),
            )?;
        }

        Commands::Verify { proof, root } => {
            let data = std::fs::read(proof)
                .with_context(|| format!("reading proof from {}", proof.display()))?;
            let proof = parse_proof(&data)?;
            let root = Hash::from_hex(root).map_err(|e| Error::InvalidHash(e.to_string()))?;
            let valid = verify_proof(&proof, &root);
            info!(valid, membership = proof.is_membership(), "verified proof");
            output(
                cli.format,
                &serde_json::json!({
                    "valid": valid,
                    "membership": valid && proof.is_membership(),
                    "key": hex::encode(&proof.key)
                }),
            )?;
            if !valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn unsupported_width(n: usize) -> String {
    format!("unsupported key width: {} bytes (expected 8, 16 or 32)", n)
}

fn parse_hex(s: &str, expected_len: usize) -> anyhow::Result<Vec<u8>> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| Error::InvalidKey(format!("{}: {}", s, e)))?;
    if bytes.len() != expected_len {
        return Err(Error::InvalidKey(format!(
            "{} is {} bytes, expected {}",
            s,
            bytes.len(),
            expected_len
        ))
        .into());
    }
    Ok(bytes)
}

fn read_entries(path: &Path, key_bytes: usize) -> anyhow::Result<Entries> {
    let data =
        std::fs::read(path).with_context(|| format!("reading input from {}", path.display()))?;
    let raw: BTreeMap<String, String> = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} as a JSON object", path.display()))?;
    let entries = raw
        .iter()
        .map(|(key, value)| {
            let value = hex::decode(value.trim_start_matches("0x"))
                .with_context(|| format!("value of {} is not hex", key))?;
            Ok((parse_hex(key, key_bytes)?, value))
        })
        .collect::<anyhow::Result<Entries>>()?;
    debug!(entries = entries.len(), "read input");
    Ok(entries)
}

/// Proofs are accepted as emitted by `prove` or as a bare proof object
fn parse_proof(data: &[u8]) -> anyhow::Result<Proof> {
    let value: serde_json::Value = serde_json::from_slice(data).context("parsing proof JSON")?;
    let proof = match value.get("proof") {
        Some(inner) => serde_json::from_value(inner.clone()),
        None => serde_json::from_value(value),
    };
    proof.context("decoding proof")
}

fn to_key<K: TrieKey>(bytes: &[u8]) -> anyhow::Result<K> {
    K::from_key_bytes(bytes)
        .ok_or_else(|| Error::InvalidKey(hex::encode(bytes)).into())
}

fn build<K: TrieKey>(
    config: &TrieConfig,
    entries: &Entries,
    shards: usize,
) -> anyhow::Result<MerkleTrie<K, Vec<u8>>> {
    let trie = MerkleTrie::new(config.clone())?;
    let keyed = entries
        .iter()
        .map(|(key, value)| Ok((to_key::<K>(key)?, value.clone())))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if shards <= 1 {
        for (key, value) in keyed {
            trie.insert(key, value);
        }
        return Ok(trie);
    }

    let chunk = keyed.len().div_ceil(shards).max(1);
    let serials: Vec<_> = keyed
        .par_chunks(chunk)
        .map(|part| {
            let mut serial = trie.open_serial_subsidiary();
            for (key, value) in part {
                serial.insert(*key, value.clone());
            }
            serial
        })
        .collect();
    info!(shards = serials.len(), "batch merging sub-tries");
    trie.batch_merge_in(serials);
    Ok(trie)
}

fn commit_as<K: TrieKey>(
    config: &TrieConfig,
    entries: &Entries,
    shards: usize,
) -> anyhow::Result<(Hash, i64)> {
    let trie = build::<K>(config, entries, shards)?;
    let root = trie.freeze_and_hash();
    info!(%root, size = trie.size(), "committed");
    Ok((root, trie.size()))
}

fn prove_as<K: TrieKey>(
    config: &TrieConfig,
    entries: &Entries,
    key: &[u8],
) -> anyhow::Result<(Hash, Proof)> {
    let trie = build::<K>(config, entries, 1)?;
    let root = trie.freeze_and_hash();
    let proof = trie.generate_proof(&to_key::<K>(key)?);
    Ok((root, proof))
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
