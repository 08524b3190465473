//! Public API types shared across the shard search core: search and list
//! options, per-file results, line and chunk match shapes, statistics, and
//! repository listings.

use serde::Serialize;
use std::collections::HashMap;

use crate::shard::RepoMetadata;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call search options. Zero-valued bounds are filled with defaults on
/// entry to `search`, so `SearchOptions::default()` is a valid "no limits I
/// care about" request.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Return only an estimate of the number of documents this shard would
    /// consider, without evaluating anything.
    pub estimate_doc_count: bool,

    /// Attach the whole document content to every `FileMatch`.
    pub whole: bool,

    /// Maximum number of line/fragment matches this shard may produce before
    /// the document loop stops. 0 means the default (100000).
    pub shard_max_match_count: usize,

    /// Query-wide match bound, enforced here as well since the aggregator
    /// owns the global count. 0 means `10 * shard_max_match_count`.
    pub total_max_match_count: usize,

    /// Stop the document loop after this many important matches (files whose
    /// score exceeds the importance threshold). 0 means the default (10).
    pub shard_max_important_match: usize,

    /// Query-wide important-match bound. 0 means
    /// `10 * shard_max_important_match`.
    pub total_max_important_match: usize,

    /// Emit `ChunkMatch`es (candidates grouped with surrounding context)
    /// instead of `LineMatch`es.
    pub chunk_matches: bool,

    /// Context lines around each chunk when `chunk_matches` is set.
    pub num_context_lines: usize,

    /// Render the score breakdown into `FileMatch::debug`. Injected here
    /// instead of a process global so tests stay hermetic.
    pub debug_score: bool,
}

impl SearchOptions {
    /// Fill unset (zero) bounds with their defaults.
    pub fn set_defaults(&mut self) {
        if self.shard_max_match_count == 0 {
            self.shard_max_match_count = 100_000;
        }
        if self.total_max_match_count == 0 {
            self.total_max_match_count = 10 * self.shard_max_match_count;
        }
        if self.shard_max_important_match == 0 {
            self.shard_max_important_match = 10;
        }
        if self.total_max_important_match == 0 {
            self.total_max_important_match = 10 * self.shard_max_important_match;
        }
    }
}

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Return `RepoList::minimal` entries keyed by repository ID instead of
    /// full `RepoListEntry` values.
    pub minimal: bool,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// One matched fragment within a line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LineFragmentMatch {
    /// Byte offset of the fragment within its line.
    pub line_offset: usize,
    /// Byte offset of the fragment within the whole document (or file name).
    pub offset: u32,
    /// Fragment length in bytes.
    pub match_length: usize,
    /// Character offset of the fragment within its line.
    pub rune_offset: usize,
}

/// All matches on a single line of a document, or on its file name.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LineMatch {
    /// The line content, without the trailing newline.
    pub line: Vec<u8>,
    /// Byte offset of the line start within the document.
    pub line_start: usize,
    /// Byte offset one past the last line byte (the newline's offset).
    pub line_end: usize,
    /// 1-based line number.
    pub line_number: usize,
    /// True when this match is against the file name, not the content.
    pub file_name: bool,
    pub score: f64,
    pub line_fragments: Vec<LineFragmentMatch>,
}

/// A position within a document.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Location {
    pub byte_offset: u32,
    /// 1-based.
    pub line_number: u32,
    /// 1-based character column within the line.
    pub column: u32,
}

/// A matched range within a document.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Range {
    pub start: Location,
    /// Exclusive.
    pub end: Location,
}

/// A group of nearby matches with surrounding context, the alternative result
/// shape to `LineMatch` selected by `SearchOptions::chunk_matches`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkMatch {
    /// Content of the chunk, context lines included.
    pub content: Vec<u8>,
    /// Position of the first byte of `content` in the document.
    pub content_start: Location,
    /// True when the chunk is the file name rather than content.
    pub file_name: bool,
    pub ranges: Vec<Range>,
    pub score: f64,
}

/// One matching document.
#[derive(Debug, Clone, Serialize, Default)]
pub struct FileMatch {
    pub score: f64,
    /// Score breakdown, filled only when `SearchOptions::debug_score` is set.
    pub debug: String,

    pub file_name: String,
    pub repository: String,
    pub repository_id: u32,
    pub branches: Vec<String>,

    /// Line matches, empty when chunk mode was requested.
    pub line_matches: Vec<LineMatch>,
    /// Chunk matches, empty unless chunk mode was requested.
    pub chunk_matches: Vec<ChunkMatch>,

    /// Content checksum as stored in the shard.
    pub checksum: Vec<u8>,
    pub language: String,

    pub sub_repository_name: String,
    pub sub_repository_path: String,

    /// Version (commit) of the first branch the document belongs to.
    pub version: String,

    /// Whole document content, present only with `SearchOptions::whole`.
    pub content: Option<Vec<u8>>,
}

/// Counters accumulated over one search call. All fields only ever increase
/// while the document loop runs.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Stats {
    /// Bytes of document content loaded by the content provider.
    pub content_bytes_loaded: u64,
    /// Bytes of posting-list data consulted by substring atoms.
    pub index_bytes_loaded: u64,
    /// Aggregator seat: number of shards that failed mid-search.
    pub crashes: u64,
    /// Documents that produced a `FileMatch`.
    pub file_count: u64,
    /// Documents the loop evaluated.
    pub files_considered: u64,
    /// Documents whose content was read.
    pub files_loaded: u64,
    /// Documents abandoned because a bound was hit or the call was cancelled.
    pub files_skipped: u64,
    /// Shards skipped whole (cancellation before work, aggregator pruning).
    pub shards_skipped: u64,
    /// Candidate documents in this shard for an `estimate_doc_count` call.
    pub shard_files_considered: u64,
    /// Total line (or range) matches across all files.
    pub match_count: u64,
    /// Posting entries that fed substring atoms.
    pub ngram_matches: u64,
}

impl Stats {
    /// Fold another shard's counters into this one.
    pub fn add(&mut self, other: &Stats) {
        self.content_bytes_loaded += other.content_bytes_loaded;
        self.index_bytes_loaded += other.index_bytes_loaded;
        self.crashes += other.crashes;
        self.file_count += other.file_count;
        self.files_considered += other.files_considered;
        self.files_loaded += other.files_loaded;
        self.files_skipped += other.files_skipped;
        self.shards_skipped += other.shards_skipped;
        self.shard_files_considered += other.shard_files_considered;
        self.match_count += other.match_count;
        self.ngram_matches += other.ngram_matches;
    }
}

/// Result of a `search` call against one shard.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchResult {
    pub stats: Stats,
    pub files: Vec<FileMatch>,

    /// Repository name to file URL template, for every live repository.
    pub repo_urls: HashMap<String, String>,
    /// Repository name to line fragment template.
    pub line_fragments: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// List results
// ---------------------------------------------------------------------------

/// Aggregate numbers for one repository within the shard.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct RepoStats {
    pub documents: u32,
    pub content_bytes: u64,
}

/// Full listing entry for one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoListEntry {
    pub repository: RepoMetadata,
    pub stats: RepoStats,
}

/// Compact listing entry used with `ListOptions::minimal`.
#[derive(Debug, Clone, Serialize)]
pub struct MinimalRepoListEntry {
    pub has_symbols: bool,
    pub branches: Vec<crate::shard::RepoBranch>,
}

/// Result of a `list` call: repositories whose documents satisfy the query.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RepoList {
    /// Full entries, empty when minimal listing was requested.
    pub repos: Vec<RepoListEntry>,
    /// Minimal entries keyed by repository ID, empty otherwise.
    pub minimal: HashMap<u32, MinimalRepoListEntry>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
