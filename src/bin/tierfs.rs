//! tierfs CLI
//!
//! Opens a chunk store from a TOML configuration and exercises it.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tierfs::{AllocatorStats, ChunkLocation, FileMeta, StoreConfig, TierStore};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tierfs")]
#[command(about = "Fixed-chunk tiered storage engine tools")]
struct Args {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Override log2 of the chunk size
    #[arg(long, global = true)]
    chunk_bits: Option<u32>,

    /// Override the number of memory pool chunks
    #[arg(long, global = true)]
    memory_chunks: Option<u64>,

    /// Enable spillover to this file or device
    #[arg(long, global = true)]
    spill_path: Option<PathBuf>,

    /// Number of spillover chunks (with --spill-path)
    #[arg(long, global = true)]
    spill_chunks: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill files across tiers, read them back and report allocator state
    Probe {
        /// Bytes per file
        #[arg(short = 'b', long, default_value = "1048576")]
        bytes: u64,

        /// Number of files
        #[arg(short = 'f', long, default_value = "1")]
        files: u32,

        /// Release every chunk before exiting
        #[arg(long)]
        release: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[derive(Debug, Serialize)]
struct FileReport {
    file_id: u32,
    chunks: u64,
    memory_chunks: usize,
    spill_chunks: usize,
    verified: bool,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    chunk_size: u64,
    files: Vec<FileReport>,
    stats: AllocatorStats,
}

fn effective_config(args: &Args) -> anyhow::Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => StoreConfig::default(),
    };

    if let Some(bits) = args.chunk_bits {
        config.chunk_bits = bits;
    }
    if let Some(chunks) = args.memory_chunks {
        config.max_memory_chunks = chunks;
    }
    if let Some(path) = &args.spill_path {
        let chunks = args.spill_chunks.unwrap_or(config.max_spill_chunks);
        config = config.with_spillover(path, chunks);
    } else if args.spill_chunks.is_some() {
        bail!("--spill-chunks requires --spill-path");
    }

    config.validate_all()?;
    Ok(config)
}

fn pattern(file_id: u32, pos: u64) -> u8 {
    (pos as u8).wrapping_mul(31) ^ (file_id as u8)
}

fn probe_file(store: &TierStore, file_id: u32, bytes: u64) -> anyhow::Result<(FileMeta, bool)> {
    let mut meta = store.new_file();

    if let Err(err) = store.extend(file_id, &mut meta, bytes) {
        warn!(
            file_id,
            capacity = store.capacity(&meta),
            error = %err,
            "extend stopped early"
        );
    }

    let len = bytes.min(store.capacity(&meta));
    let step = store.geometry().size.max(4096);
    let mut verified = true;
    let mut pos = 0;

    while pos < len {
        let n = step.min(len - pos) as usize;
        let data: Vec<u8> = (pos..pos + n as u64).map(|p| pattern(file_id, p)).collect();
        store.write(file_id, &meta, pos, &data)?;

        let mut out = vec![0u8; n];
        store.read(file_id, &meta, pos, &mut out)?;
        if out != data {
            warn!(file_id, pos, "read-back mismatch");
            verified = false;
        }
        pos += n as u64;
    }

    Ok((meta, verified))
}

fn probe(store: &TierStore, bytes: u64, files: u32, release: bool) -> anyhow::Result<ProbeReport> {
    let mut metas = Vec::with_capacity(files as usize);
    let mut reports = Vec::with_capacity(files as usize);

    for file_id in 0..files {
        let (meta, verified) = probe_file(store, file_id, bytes)?;
        let count = |loc: ChunkLocation| meta.chunks().iter().filter(|d| d.location == loc).count();

        reports.push(FileReport {
            file_id,
            chunks: meta.chunk_count(),
            memory_chunks: count(ChunkLocation::MemoryPool),
            spill_chunks: count(ChunkLocation::SpilloverDevice),
            verified,
        });
        metas.push(meta);
    }

    let stats = store.stats();

    if release {
        for (file_id, meta) in metas.iter_mut().enumerate() {
            store.shrink(file_id as u32, meta, 0)?;
        }
        info!(stats = ?store.stats(), "released all chunks");
    }

    Ok(ProbeReport {
        chunk_size: store.geometry().size,
        files: reports,
        stats,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = effective_config(&args)?;

    match args.command {
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Probe {
            bytes,
            files,
            release,
        } => {
            let store = TierStore::open(config).context("opening store")?;
            let report = probe(&store, bytes, files, release)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.files.iter().any(|f| !f.verified) {
                bail!("data verification failed");
            }
        }
    }

    Ok(())
}
