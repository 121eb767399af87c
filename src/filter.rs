//! Include/exclude path filtering for snapshot capture and indexing.
//!
//! Patterns follow gitignore conventions: a pattern without `/` matches a
//! name in any directory, a pattern with `/` is anchored at the walk root,
//! and an optional ignore file inside the tree contributes more excludes.
//! Filtering a path is pure; building a filter is the only fallible step.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::vfs::{Vfs, VfsError};

/// Excluded everywhere unless a caller builds a filter from scratch.
/// `.crswap` files are editor swap artifacts and never worth capturing.
pub const DEFAULT_EXCLUDES: &[&str] = &["**/*.crswap"];

#[derive(Error, Debug)]
pub enum FilterError {
	#[error("glob builder error: {0}")]
	Glob(#[from] globset::Error),
	#[error("could not read ignore file {path}: {source}")]
	IgnoreFile {
		path: String,
		#[source]
		source: VfsError,
	},
}

/// Filter settings as they appear in config files and mount requests.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
	#[serde(default)]
	pub include: Vec<String>,
	#[serde(default)]
	pub exclude: Vec<String>,
	/// Virtual path of an ignore file to merge into the excludes, if any.
	#[serde(default)]
	pub ignore_file: Option<String>,
}

/// Compiled filter. `include` empty means "everything not excluded".
pub struct PathFilter {
	include: Option<GlobSet>,
	exclude: GlobSet,
}

impl PathFilter {
	pub fn new(
		include: impl IntoIterator<Item = impl AsRef<str>>,
		exclude: impl IntoIterator<Item = impl AsRef<str>>,
	) -> Result<Self, FilterError> {
		let include = include.into_iter().collect::<Vec<_>>();
		let include = if include.is_empty() {
			None
		} else {
			Some(build_glob_set(include)?)
		};

		Ok(Self {
			include,
			exclude: build_glob_set(exclude)?,
		})
	}

	/// Compile a filter from config, reading the configured ignore file
	/// through `vfs`. A missing ignore file is skipped; any other read
	/// failure is an error.
	pub async fn load(config: &FilterConfig, vfs: &dyn Vfs) -> Result<Self, FilterError> {
		let mut exclude = DEFAULT_EXCLUDES
			.iter()
			.map(|glob| (*glob).to_owned())
			.collect::<Vec<_>>();
		exclude.extend(config.exclude.iter().cloned());

		if let Some(path) = &config.ignore_file {
			match vfs.read_file(path).await {
				Ok(bytes) => {
					let patterns = ignore_patterns(&String::from_utf8_lossy(&bytes));
					debug!(path = %path, rules = patterns.len(), "merged ignore file");
					exclude.extend(patterns);
				}
				Err(VfsError::NotFound(_)) => {
					debug!(path = %path, "ignore file not present; skipped");
				}
				Err(source) => {
					return Err(FilterError::IgnoreFile {
						path: path.clone(),
						source,
					})
				}
			}
		}

		Self::new(&config.include, &exclude)
	}

	/// Whether a file or symlink at `path` (relative to the walk root)
	/// passes the filter. Same input always gives the same answer.
	pub fn matches(&self, path: &str) -> bool {
		let path = path.strip_prefix('/').unwrap_or(path);
		if self.exclude.is_match(path) {
			return false;
		}
		self.include
			.as_ref()
			.map_or(true, |include| include.is_match(path))
	}

	/// Whether a directory at `path` should be descended into. Includes do
	/// not apply here: an include like `src/**` must not prune `src` itself
	/// before the walk reaches its contents.
	pub fn matches_dir(&self, path: &str) -> bool {
		let path = path.strip_prefix('/').unwrap_or(path);
		!self.exclude.is_match(path)
	}
}

impl Default for PathFilter {
	fn default() -> Self {
		Self::new(std::iter::empty::<&str>(), DEFAULT_EXCLUDES)
			.expect("this is hardcoded and should always work")
	}
}

fn build_glob_set(
	patterns: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<GlobSet, FilterError> {
	patterns
		.into_iter()
		.flat_map(|pattern| expand_pattern(pattern.as_ref()))
		.map(|pattern| pattern.parse::<Glob>())
		.collect::<Result<Vec<_>, _>>()
		.and_then(|globs| {
			globs
				.into_iter()
				.fold(&mut GlobSetBuilder::new(), |builder, glob| {
					builder.add(glob)
				})
				.build()
		})
		.map_err(Into::into)
}

/// Expand one pattern into the glob variants that give it gitignore
/// semantics. A bare name matches at any depth, both as an entry and as a
/// directory whose contents follow; a pattern containing `/` is anchored.
fn expand_pattern(pattern: &str) -> Vec<String> {
	let pattern = pattern.trim_end_matches('/');
	if pattern.is_empty() {
		return Vec::new();
	}

	if pattern.contains('/') {
		vec![pattern.to_owned(), format!("{pattern}/**")]
	} else {
		vec![
			pattern.to_owned(),
			format!("**/{pattern}"),
			format!("{pattern}/**"),
			format!("**/{pattern}/**"),
		]
	}
}

/// Extract exclude patterns from ignore-file text.
fn ignore_patterns(content: &str) -> Vec<String> {
	let mut patterns = Vec::new();
	let mut pending = String::new();

	for raw in content.lines() {
		pending.push_str(raw.trim());

		// A trailing backslash joins the next line into this pattern
		if pending.ends_with('\\') {
			pending.remove(pending.len() - 1);
			pending.truncate(pending.trim_end().len());
			continue;
		}

		let mut line = std::mem::take(&mut pending);

		// A blank line; skip
		if line.is_empty() {
			continue;
		}

		// A line starting with "#" serves as a comment; skip
		if line.starts_with('#') {
			continue;
		}

		// TODO(ignore-negation): honor `!pattern` re-includes. They need
		// ordered evaluation against the excludes above them, which GlobSet
		// cannot express; dropping them only over-excludes, never leaks.
		if line.starts_with('!') {
			continue;
		}

		if line.starts_with('/') {
			line.remove(0);
		}

		patterns.push(line);
	}

	patterns
}
