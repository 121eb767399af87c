//! Query classification, matching, and ranking.

use std::collections::HashSet;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use super::{tokenize, IndexField, SearchIndex};

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
	pub path: String,
	pub score: f32,
	pub highlights: Vec<TextHighlight>,
}

/// Matched span inside one field's text. Offsets are byte positions into
/// `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextHighlight {
	pub field: IndexField,
	pub text: String,
	pub start: usize,
	pub end: usize,
}

enum QueryKind<'a> {
	/// Directory listing: contents of one directory, unranked.
	Path(&'a str),
	/// Exact extension match, without the leading dot.
	Extension(&'a str),
	/// Every query term must prefix-match some indexed token.
	Fuzzy,
}

fn classify(query: &str) -> QueryKind<'_> {
	if query.ends_with('/') || query.starts_with("./") || query.starts_with("../") {
		QueryKind::Path(query)
	} else if query.starts_with('.') && !query.contains('/') {
		QueryKind::Extension(&query[1..])
	} else {
		QueryKind::Fuzzy
	}
}

impl SearchIndex {
	/// Search the index. The query string picks its own mode: a trailing
	/// `/` (or leading `./`, `../`) lists a directory, a leading `.`
	/// without separators matches an extension, anything else is a fuzzy
	/// path query.
	pub fn search(&self, query: &str) -> Vec<SearchHit> {
		let query = query.trim();
		if query.is_empty() {
			return Vec::new();
		}

		match classify(query) {
			QueryKind::Path(dir) => self.search_dir(dir),
			QueryKind::Extension(ext) => self.search_extension(ext),
			QueryKind::Fuzzy => self.search_fuzzy(query),
		}
	}

	/// Directory-map lookup, O(children). Hits keep the map's insertion
	/// order and carry a flat score.
	fn search_dir(&self, dir: &str) -> Vec<SearchHit> {
		let mut dir = dir;
		loop {
			if let Some(rest) = dir.strip_prefix("./") {
				dir = rest;
			} else if let Some(rest) = dir.strip_prefix("../") {
				dir = rest;
			} else {
				break;
			}
		}
		let dir = dir.trim_matches('/');

		self.dir_map
			.get(dir)
			.into_iter()
			.flatten()
			.map(|path| SearchHit {
				path: path.clone(),
				score: 1.0,
				highlights: Vec::new(),
			})
			.collect()
	}

	fn search_extension(&self, ext: &str) -> Vec<SearchHit> {
		let mut hits = self
			.docs
			.iter()
			.filter(|(_, doc)| {
				!doc.extension.is_empty() && doc.extension.eq_ignore_ascii_case(ext)
			})
			.map(|(path, doc)| SearchHit {
				path: path.clone(),
				score: 1.0,
				highlights: vec![TextHighlight {
					field: IndexField::Extension,
					text: doc.extension.clone(),
					start: 0,
					end: doc.extension.len(),
				}],
			})
			.collect::<Vec<_>>();

		hits.sort_by(|a, b| {
			a.path
				.len()
				.cmp(&b.path.len())
				.then_with(|| a.path.cmp(&b.path))
		});
		hits
	}

	fn search_fuzzy(&self, query: &str) -> Vec<SearchHit> {
		let needles = tokenize(query);
		if needles.is_empty() {
			return Vec::new();
		}

		// Intersect the candidate sets needle by needle; every term must
		// prefix-match some token of a surviving document.
		let mut candidates: Option<HashSet<&str>> = None;
		for needle in &needles {
			let mut matched: HashSet<&str> = HashSet::new();
			for (token, paths) in self
				.terms
				.range::<str, _>((Bound::Included(needle.as_str()), Bound::Unbounded))
			{
				if !token.starts_with(needle.as_str()) {
					break;
				}
				for path in paths.keys() {
					matched.insert(path.as_str());
				}
			}
			if matched.is_empty() {
				return Vec::new();
			}

			candidates = Some(match candidates {
				None => matched,
				Some(mut survivors) => {
					survivors.retain(|path| matched.contains(path));
					if survivors.is_empty() {
						return Vec::new();
					}
					survivors
				}
			});
		}

		let query_lower = query.to_lowercase();
		let mut ranked = candidates
			.into_iter()
			.flatten()
			.map(|path| {
				let doc = &self.docs[path];
				let name_match = doc.basename.to_lowercase().contains(&query_lower);
				let score = relevance(&query_lower, &doc.basename);
				let highlights = highlight(&query_lower, path, doc);
				(
					name_match,
					SearchHit {
						path: path.to_owned(),
						score,
						highlights,
					},
				)
			})
			.collect::<Vec<_>>();

		ranked.sort_by(|(a_name, a), (b_name, b)| {
			a.path
				.len()
				.cmp(&b.path.len())
				.then_with(|| b_name.cmp(a_name))
				.then_with(|| b.score.total_cmp(&a.score))
				.then_with(|| a.path.cmp(&b.path))
		});

		ranked.into_iter().map(|(_, hit)| hit).collect()
	}
}

/// Relevance of a basename to the whole query. Exact match beats prefix
/// beats substring; otherwise partial word matches accumulate, normalized
/// by the number of query words.
fn relevance(query_lower: &str, basename: &str) -> f32 {
	let name_lower = basename.to_lowercase();

	if name_lower == query_lower {
		return 1.0;
	}
	if name_lower.starts_with(query_lower) {
		return 0.9;
	}
	if name_lower.contains(query_lower) {
		return 0.7;
	}

	let words = tokenize(&name_lower);
	let query_words = tokenize(query_lower);

	let mut score = 0.0;
	for query_word in &query_words {
		for word in &words {
			if word.starts_with(query_word.as_str()) {
				score += 0.5;
			} else if word.contains(query_word.as_str()) {
				score += 0.3;
			}
		}
	}

	if query_words.is_empty() {
		0.0
	} else {
		score / query_words.len() as f32
	}
}

/// Highlight the query where it appears verbatim: in the basename first,
/// else in the full path. Queries that only matched token-by-token have no
/// contiguous span to mark.
fn highlight(query_lower: &str, path: &str, doc: &super::Document) -> Vec<TextHighlight> {
	if let Some((start, end)) = find_ignore_case(&doc.basename, query_lower) {
		return vec![TextHighlight {
			field: IndexField::Basename,
			text: doc.basename.clone(),
			start,
			end,
		}];
	}
	if let Some((start, end)) = find_ignore_case(path, query_lower) {
		return vec![TextHighlight {
			field: IndexField::Path,
			text: path.to_owned(),
			start,
			end,
		}];
	}
	Vec::new()
}

/// Case-insensitive substring search. Returns byte offsets into `haystack`
/// itself, not into its lowercase fold — the two differ for characters
/// whose fold changes byte length (e.g. `İ`). `needle_lower` must already
/// be lowercased.
fn find_ignore_case(haystack: &str, needle_lower: &str) -> Option<(usize, usize)> {
	if needle_lower.is_empty() {
		return None;
	}
	'starts: for (start, _) in haystack.char_indices() {
		let mut want = needle_lower.chars().peekable();
		for (offset, ch) in haystack[start..].char_indices() {
			// A needle that runs out mid-fold is a mismatch; spans never
			// split a haystack character.
			for folded in ch.to_lowercase() {
				if want.next() != Some(folded) {
					continue 'starts;
				}
			}
			if want.peek().is_none() {
				return Some((start, start + offset + ch.len_utf8()));
			}
		}
	}
	None
}
