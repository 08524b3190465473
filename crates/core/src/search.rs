//! Search and list drivers: the bounded document loop over one shard.
//!
//! A call owns all of its mutable state (match tree, content provider,
//! result buffer); the shard itself is shared and read-only, so any number
//! of calls may run against it concurrently. Within a call, documents are
//! visited in strictly increasing ID order and cancellation is polled once
//! per iteration; a cancelled or bounded loop returns partial results with
//! skip accounting, never an error.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::content::ContentProvider;
use crate::error::Result;
use crate::matchtree::{
    self, count_atoms, count_fired_atoms, eval_node, gather_candidates, new_match_tree, NodeIdGen,
    COST_MAX, COST_MIN,
};
use crate::query::{expand_file_content, simplify, Query};
use crate::score::{line_order_bonus, score_file, FileScoreInput, SCORE_IMPORTANT_THRESHOLD};
use crate::shard::{branch_index, RepoMetadata, Shard};
use crate::types::{
    FileMatch, ListOptions, MinimalRepoListEntry, RepoList, RepoListEntry, RepoStats,
    SearchOptions, SearchResult,
};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag, polled non-blockingly at the top of every
/// document-loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Search driver
// ---------------------------------------------------------------------------

/// Search one shard: enumerate matching documents, compute line-level match
/// positions, and score results.
pub fn search<S: Shard>(
    shard: &S,
    q: &Query,
    opts: &SearchOptions,
    cancel: &CancelToken,
) -> Result<SearchResult> {
    search_impl(shard, q, opts, cancel)
}

fn search_impl(
    shard: &dyn Shard,
    q: &Query,
    opts: &SearchOptions,
    cancel: &CancelToken,
) -> Result<SearchResult> {
    let mut opts = opts.clone();
    opts.set_defaults();

    let mut res = SearchResult::default();
    let doc_count = shard.doc_count();
    if doc_count == 0 {
        return Ok(res);
    }
    if cancel.is_cancelled() {
        res.stats.shards_skipped += 1;
        return Ok(res);
    }

    let q = simplify(q.clone(), shard);
    debug!(query = ?q, "simplified");
    if q == Query::Const(false) {
        return Ok(res);
    }
    if opts.estimate_doc_count {
        res.stats.shard_files_considered = doc_count as u64;
        return Ok(res);
    }

    let q = expand_file_content(q);
    let mut ids = NodeIdGen::default();
    let mut mt = new_match_tree(&q, shard, &mut ids)?;
    let total_atoms = count_atoms(&mt);

    let metas = shard.repo_metadata();
    let tombstones = shard.repo_tombstones();
    let lang_names: HashMap<u8, &str> = shard
        .language_map()
        .iter()
        .map(|(name, &byte)| (byte, name.as_str()))
        .collect();

    let mut cp = ContentProvider::new(shard);
    let mut last_doc: Option<u32> = None;
    let mut important_matches = 0usize;

    loop {
        let mut next = mt.next_doc();
        if let Some(last) = last_doc {
            // Atoms may hold stale cursors; guarantee forward progress.
            if next <= last {
                next = last + 1;
            }
        }
        if next >= doc_count {
            break;
        }
        let doc = next;
        last_doc = Some(doc);

        let repo = shard.repo_index(doc);
        assert!(
            (repo as usize) < metas.len(),
            "document {doc} names repository {repo} of {}",
            metas.len()
        );
        if tombstones[repo as usize] {
            continue;
        }

        if cancel.is_cancelled()
            || res.stats.match_count >= opts.shard_max_match_count as u64
            || res.stats.match_count >= opts.total_max_match_count as u64
            || important_matches >= opts.shard_max_important_match
            || important_matches >= opts.total_max_important_match
        {
            // Treat the rest of this repository as not visited.
            res.stats.files_skipped += (shard.repo_end(repo) - doc) as u64;
            break;
        }

        res.stats.files_considered += 1;
        mt.prepare(doc);
        cp.set_document(doc);

        let mut memo: HashMap<u32, bool> = HashMap::new();
        let mut decided = None;
        // Run every tier even after an early true so candidate-producing
        // atoms (regex, symbol) still execute.
        for cost in COST_MIN..=COST_MAX {
            decided = eval_node(&mut mt, &mut cp, cost, &mut memo);
            if decided == Some(false) {
                break;
            }
        }
        let matched = match decided {
            Some(v) => v,
            None => {
                let md = &metas[repo as usize];
                tracing::error!(
                    doc,
                    repo = md.name.as_str(),
                    decisions = ?memo,
                    tree = ?mt,
                    "match tree undecided at maximum cost"
                );
                panic!(
                    "match tree undecided at maximum cost for doc {doc} in repo {}",
                    md.name
                );
            }
        };
        if !matched {
            continue;
        }

        let md = &metas[repo as usize];
        let cands = gather_candidates(&mut mt, &memo, &cp);

        let mut fm = FileMatch {
            file_name: String::from_utf8_lossy(shard.file_name(doc)).into_owned(),
            repository: md.name.clone(),
            repository_id: md.id,
            checksum: shard.checksum(doc).to_vec(),
            language: lang_names
                .get(&shard.language(doc))
                .copied()
                .unwrap_or("")
                .to_string(),
            branches: gather_branches(shard, &mt, &memo, doc, md),
            ..Default::default()
        };

        let doc_mask = shard.branch_mask(doc);
        assert!(doc_mask != 0, "document {doc} has an empty branch mask");
        if let Some(idx) = branch_index(doc_mask) {
            if let Some(b) = md.branches.get(idx as usize) {
                fm.version = b.version.clone();
            }
        }

        let sub_idx = shard.sub_repo_index(doc) as usize;
        let paths = shard.sub_repo_paths(repo);
        assert!(
            sub_idx < paths.len(),
            "document {doc} names sub-repository {sub_idx} of {}",
            paths.len()
        );
        if sub_idx != 0 {
            let path = &paths[sub_idx];
            fm.sub_repository_path = path.clone();
            if let Some(sub) = md.sub_repo_map.get(path) {
                fm.sub_repository_name = sub.name.clone();
            }
        }

        let max_fragment_score;
        if opts.chunk_matches {
            let mut chunks = cp.fill_chunk_matches(&cands, opts.num_context_lines);
            let n = chunks.len();
            for (i, c) in chunks.iter_mut().enumerate() {
                c.score += line_order_bonus(i, n);
            }
            max_fragment_score = chunks.iter().map(|c| c.score).fold(0.0, f64::max);
            res.stats.match_count += chunks.iter().map(|c| c.ranges.len() as u64).sum::<u64>();
            fm.chunk_matches = chunks;
        } else {
            let mut lines = cp.fill_matches(&cands);
            let n = lines.len();
            for (i, l) in lines.iter_mut().enumerate() {
                l.score += line_order_bonus(i, n);
            }
            max_fragment_score = lines.iter().map(|l| l.score).fold(0.0, f64::max);
            res.stats.match_count += lines.len() as u64;
            fm.line_matches = lines;
        }

        let (score, breakdown) = score_file(
            &FileScoreInput {
                max_fragment_score,
                atoms_matched: count_fired_atoms(&mt, &memo),
                total_atoms,
                doc,
                doc_count,
                repo_rank: md.rank,
            },
            opts.debug_score,
        );
        fm.score = score;
        fm.debug = breakdown;
        if score > SCORE_IMPORTANT_THRESHOLD {
            important_matches += 1;
        }

        if opts.whole {
            fm.content = Some(shard.document(doc).to_vec());
        }

        res.stats.file_count += 1;
        res.files.push(fm);
    }

    sort_files_by_score(&mut res.files);
    for (i, md) in metas.iter().enumerate() {
        if !tombstones[i] {
            add_repo(&mut res, md);
        }
    }
    matchtree::update_stats(&mt, &mut res.stats);
    res.stats.add(&cp.stats);
    debug!(
        files = res.stats.file_count,
        considered = res.stats.files_considered,
        skipped = res.stats.files_skipped,
        "document loop done"
    );
    Ok(res)
}

/// Descending score; stable, so equal scores keep document order.
fn sort_files_by_score(files: &mut [FileMatch]) {
    files.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// Record a live repository's URL templates, sub-repositories included.
fn add_repo(res: &mut SearchResult, md: &RepoMetadata) {
    if !md.file_url_template.is_empty() {
        res.repo_urls
            .insert(md.name.clone(), md.file_url_template.clone());
    }
    if !md.line_fragment_template.is_empty() {
        res.line_fragments
            .insert(md.name.clone(), md.line_fragment_template.clone());
    }
    for sub in md.sub_repo_map.values() {
        add_repo(res, sub);
    }
}

/// Branch names to report for a matched document: the branches selected by
/// fired branch atoms, or every branch the document is on when no branch
/// atom constrained the query.
fn gather_branches(
    shard: &dyn Shard,
    mt: &matchtree::MatchTree,
    memo: &HashMap<u32, bool>,
    doc: u32,
    md: &RepoMetadata,
) -> Vec<String> {
    let repo = shard.repo_index(doc);
    let doc_mask = shard.branch_mask(doc);
    let mask = match matchtree::fired_branch_mask(mt, memo, repo) {
        Some(query_mask) => query_mask & doc_mask,
        None => doc_mask,
    };

    let mut out = Vec::new();
    for k in 0..64u32 {
        if mask & (1 << k) == 0 {
            continue;
        }
        match md.branches.get(k as usize) {
            Some(b) => out.push(b.name.clone()),
            None => {
                tracing::error!(doc, repo = md.name.as_str(), mask, bit = k, "corrupt branch mask");
                panic!(
                    "branch mask bit {k} of doc {doc} exceeds the {} branches of repo {}",
                    md.branches.len(),
                    md.name
                );
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// List driver
// ---------------------------------------------------------------------------

/// List repositories whose documents satisfy the query. Each repository not
/// already decided by simplification is probed with a single-match search.
pub fn list<S: Shard>(
    shard: &S,
    q: &Query,
    opts: &ListOptions,
    cancel: &CancelToken,
) -> Result<RepoList> {
    list_impl(shard, q, opts, cancel)
}

fn list_impl(
    shard: &dyn Shard,
    q: &Query,
    opts: &ListOptions,
    cancel: &CancelToken,
) -> Result<RepoList> {
    let q = simplify(q.clone(), shard);
    debug!(query = ?q, "list simplified");

    let mut result = RepoList::default();
    if q == Query::Const(false) {
        return Ok(result);
    }

    let metas = shard.repo_metadata();
    let tombstones = shard.repo_tombstones();
    for (i, md) in metas.iter().enumerate() {
        if tombstones[i] {
            continue;
        }

        let included = if q == Query::Const(true) {
            true
        } else {
            let probe = Query::And(vec![
                Query::RepoSet(BTreeSet::from([md.name.clone()])),
                q.clone(),
            ]);
            let probe_opts = SearchOptions {
                shard_max_match_count: 1,
                total_max_match_count: 1,
                ..Default::default()
            };
            !search_impl(shard, &probe, &probe_opts, cancel)?.files.is_empty()
        };
        if !included {
            continue;
        }

        let repo = i as u32;
        let start = if repo == 0 { 0 } else { shard.repo_end(repo - 1) };
        let end = shard.repo_end(repo);
        if opts.minimal {
            let has_symbols = (start..end).any(|d| !shard.document_symbols(d).is_empty());
            result.minimal.insert(
                md.id,
                MinimalRepoListEntry {
                    has_symbols,
                    branches: md.branches.clone(),
                },
            );
        } else {
            let content_bytes = (start..end).map(|d| shard.document(d).len() as u64).sum();
            result.repos.push(RepoListEntry {
                repository: md.clone(),
                stats: RepoStats {
                    documents: end - start,
                    content_bytes,
                },
            });
        }
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
