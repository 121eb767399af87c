use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use codeblock_fs::config::{default_data_dir, AppConfig};
use codeblock_fs::snapshot;
use codeblock_fs::{HostFs, IndexOptions, PathFilter, SearchIndex, SnapshotNode, Vfs};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cbfs")]
#[command(about = "Directory snapshots and path search", long_about = None)]
struct Cli {
	/// Data directory holding the application config
	#[arg(long, global = true, env = "CBFS_DATA_DIR")]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Capture a directory into a snapshot file
	Take {
		/// Directory to capture
		dir: PathBuf,
		/// Where to write the snapshot
		#[arg(short, long)]
		output: PathBuf,
		/// Extra include globs on top of the configured filter
		#[arg(long)]
		include: Vec<String>,
		/// Extra exclude globs on top of the configured filter
		#[arg(long)]
		exclude: Vec<String>,
	},
	/// Replay a snapshot file into a directory
	Mount {
		/// Snapshot to replay
		snapshot: PathBuf,
		/// Directory to replay into
		dir: PathBuf,
	},
	/// List the tree stored in a snapshot file
	Ls {
		/// Snapshot to inspect
		snapshot: PathBuf,
		/// Subtree to list instead of the root
		path: Option<String>,
	},
	/// Search file paths under a directory
	Search {
		/// Directory to search
		dir: PathBuf,
		/// Query; a trailing slash lists a directory, a leading dot matches an extension
		query: String,
		/// Maximum number of hits to print
		#[arg(short = 'n', long, default_value_t = 10)]
		limit: usize,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let data_dir = match &cli.data_dir {
		Some(dir) => dir.clone(),
		None => default_data_dir()?,
	};
	let config = AppConfig::load_or_create(&data_dir)?;
	init_tracing(&config.log_level);
	info!(data_dir = %data_dir.display(), "config loaded");

	match cli.command {
		Commands::Take {
			dir,
			output,
			include,
			exclude,
		} => take(&config, dir, output, include, exclude).await?,
		Commands::Mount { snapshot, dir } => mount(snapshot, dir).await?,
		Commands::Ls { snapshot, path } => ls(snapshot, path)?,
		Commands::Search { dir, query, limit } => search(&config, dir, query, limit).await?,
	}
	Ok(())
}

fn init_tracing(default_level: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn take(
	config: &AppConfig,
	dir: PathBuf,
	output: PathBuf,
	include: Vec<String>,
	exclude: Vec<String>,
) -> Result<()> {
	let host = HostFs::new(&dir);
	let mut filter_config = config.filter.clone();
	filter_config.include.extend(include);
	filter_config.exclude.extend(exclude);
	let filter = PathFilter::load(&filter_config, &host).await?;

	let node = snapshot::take(&host, "/", &filter).await?;
	let buffer = snapshot::encode(&node)?;
	std::fs::write(&output, &buffer).with_context(|| format!("writing snapshot {output:?}"))?;
	println!(
		"Captured {} nodes ({} bytes) from {}",
		node.node_count(),
		buffer.len(),
		dir.display()
	);
	Ok(())
}

async fn mount(snapshot_path: PathBuf, dir: PathBuf) -> Result<()> {
	let buffer = std::fs::read(&snapshot_path)
		.with_context(|| format!("reading snapshot {snapshot_path:?}"))?;
	std::fs::create_dir_all(&dir).with_context(|| format!("create {dir:?}"))?;

	let host = HostFs::new(&dir);
	snapshot::mount(&host, &buffer, "/").await?;
	println!("Mounted {} into {}", snapshot_path.display(), dir.display());
	Ok(())
}

fn ls(snapshot_path: PathBuf, path: Option<String>) -> Result<()> {
	let buffer = std::fs::read(&snapshot_path)
		.with_context(|| format!("reading snapshot {snapshot_path:?}"))?;
	let root = snapshot::decode(&buffer)?;

	let path = path.unwrap_or_else(|| "/".to_owned());
	let node = root
		.get(&path)
		.ok_or_else(|| anyhow!("no entry at {:?} in the snapshot", path))?;
	print_node(node, path.trim_matches('/'), 0);
	Ok(())
}

fn print_node(node: &SnapshotNode, name: &str, depth: usize) {
	let pad = "  ".repeat(depth);
	match node {
		SnapshotNode::Folder { entries, .. } => {
			println!("{pad}{name}/");
			for (child_name, child) in entries {
				print_node(child, child_name, depth + 1);
			}
		}
		SnapshotNode::File { meta, .. } => println!("{pad}{name} ({} bytes)", meta.size),
		SnapshotNode::Symlink { target } => println!("{pad}{name} -> {target}"),
	}
}

async fn search(config: &AppConfig, dir: PathBuf, query: String, limit: usize) -> Result<()> {
	let vfs: Arc<dyn Vfs> = Arc::new(HostFs::new(&dir));
	let options = IndexOptions {
		filter: config.filter.clone(),
		..Default::default()
	};
	let index = SearchIndex::get(Arc::clone(&vfs), &config.index_path, &options).await;

	let hits = index.search(&query);
	if hits.is_empty() {
		println!("No matches for {query:?}");
		return Ok(());
	}
	for hit in hits.iter().take(limit) {
		println!("{:>5.2}  {}", hit.score, hit.path);
	}
	Ok(())
}
