//! CodeShard core — the shard search engine.
//!
//! A shard is a read-only, trigram-indexed slice of one or more
//! repositories. This crate evaluates queries against a single shard:
//! queries are simplified against shard metadata, compiled into a match
//! tree of atoms that advance in parallel over documents, evaluated with a
//! cost-tiered protocol that defers content reads and regex execution until
//! cheap atoms have pruned the candidate set, and scored per file.
//!
//! The shard's on-disk format stays behind the [`shard::Shard`] trait;
//! [`mem::MemShard`] is the bundled in-memory implementation.

pub mod error;
pub mod mem;
pub mod query;
pub mod search;
pub mod shard;
pub mod types;

mod content;
mod matchtree;
mod prefilter;
mod score;

pub use error::{Error, Result};
pub use mem::{DocSpec, MemShard, MemShardBuilder};
pub use query::{expand_file_content, simplify, Query, QueryType};
pub use score::SCORE_IMPORTANT_THRESHOLD;
pub use search::{list, search, CancelToken};
pub use shard::{branch_index, DocSection, Posting, RepoBranch, RepoMetadata, Shard, Trigram};
pub use types::{
    ChunkMatch, FileMatch, LineFragmentMatch, LineMatch, ListOptions, Location,
    MinimalRepoListEntry, Range, RepoList, RepoListEntry, RepoStats, SearchOptions, SearchResult,
    Stats,
};
