//! Match trees: the compiled form of a query that advances over documents.
//!
//! A query compiles into a tree of atoms (substring, regex, branch, repo,
//! language, symbol, brute-force) under and/or/not composites. Nodes expose
//! three operations: `next_doc` (smallest document that could still match),
//! `prepare` (position on a document), and `matches` (tri-state decision at
//! a cost tier). Evaluation is cost-tiered: cheap metadata atoms prune the
//! candidate set before posting lists are consulted, and content is only
//! read for documents that survive. Decisions are memoized per document so
//! a child decided at a cheap tier is never re-evaluated at an expensive
//! one.

use std::collections::{BTreeSet, HashMap};

use memchr::memmem;
use regex::bytes::RegexBuilder;

use crate::content::ContentProvider;
use crate::error::{Error, Result};
use crate::prefilter;
use crate::query::{repo_branches_for, Query};
use crate::shard::{gram_case_variants, DocSection, Posting, Shard, Trigram};
use crate::types::Stats;

/// Trigram width of the index.
pub(crate) const NGRAM_SIZE: usize = 3;

// ---------------------------------------------------------------------------
// Cost tiers
// ---------------------------------------------------------------------------

/// Decisions from already-materialized state (constants, branch masks,
/// repository and language bytes).
pub(crate) const COST_CONST: u32 = 0;
/// Posting-list derived state (trigram hit presence).
pub(crate) const COST_MEMORY: u32 = 1;
/// Content reads: substring verification, line coincidence.
pub(crate) const COST_CONTENT: u32 = 2;
/// Full regex execution over content.
pub(crate) const COST_REGEX: u32 = 3;

pub(crate) const COST_MIN: u32 = COST_CONST;
pub(crate) const COST_MAX: u32 = COST_REGEX;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A concrete match span within the prepared document (or its file name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    /// Span is within the file name, not the content.
    pub file_name: bool,
    pub byte_offset: u32,
    pub byte_len: u32,
}

impl Candidate {
    fn end(&self) -> u32 {
        self.byte_offset + self.byte_len
    }
}

/// Node identity for the per-document memo table.
#[derive(Debug, Default)]
pub(crate) struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Content substring atom backed by the trigram posting lists. Hits are the
/// intersection of the first and last trigram lists at pattern distance;
/// patterns longer than two trigrams are re-verified against content.
#[derive(Debug)]
pub(crate) struct SubstrTree {
    id: u32,
    /// Pattern bytes, ASCII-lowered unless case-sensitive.
    pattern_lowered: Vec<u8>,
    case_sensitive: bool,
    /// Trigram evidence alone proves the pattern (length <= 2 trigrams).
    exact: bool,
    hits: Vec<Posting>,
    postings_considered: usize,
    cursor: usize,
    current: Vec<Candidate>,
}

/// File-name substring atom. Names are short and not trigram-indexed, so
/// hits come from one scan over the name index at construction; any pattern
/// length works, which also serves `file:` queries below the trigram width.
#[derive(Debug)]
pub(crate) struct FileNameTree {
    id: u32,
    hits: Vec<Posting>,
    pattern_len: u32,
    cursor: usize,
    current: Vec<Candidate>,
}

/// Regex atom: a sound substring prefilter gates full regex execution at
/// the top cost tier.
#[derive(Debug)]
pub(crate) struct RegexTree {
    id: u32,
    re: regex::bytes::Regex,
    file_name: bool,
    child: Box<MatchTree>,
    found: Vec<Candidate>,
}

/// Restricts the candidate spans of the child subtree to symbol definition
/// ranges, leaf by leaf.
#[derive(Debug)]
pub(crate) struct SymbolTree {
    id: u32,
    child: Box<MatchTree>,
}

/// Per-repository branch masks; a document matches when its branch mask
/// intersects its repository's query mask.
#[derive(Debug)]
pub(crate) struct BranchTree {
    id: u32,
    masks: Vec<u64>,
}

/// Per-repository inclusion bitset for `Repo`/`RepoSet` atoms that survived
/// simplification on a multi-repo shard.
#[derive(Debug)]
pub(crate) struct RepoTree {
    id: u32,
    include: Vec<bool>,
}

/// Documents tagged with one language byte.
#[derive(Debug)]
pub(crate) struct LanguageTree {
    id: u32,
    byte: u8,
}

/// Matches every document; the conservative fallback when no useful
/// prefilter exists.
#[derive(Debug)]
pub(crate) struct BruteForceTree {
    id: u32,
}

/// Matches nothing; `reason` names why for diagnostics.
#[derive(Debug)]
pub(crate) struct NoMatchTree {
    id: u32,
    #[allow(dead_code)]
    reason: &'static str,
}

#[derive(Debug)]
pub(crate) struct AndTree {
    id: u32,
    children: Vec<MatchTree>,
}

#[derive(Debug)]
pub(crate) struct OrTree {
    id: u32,
    children: Vec<MatchTree>,
}

#[derive(Debug)]
pub(crate) struct NotTree {
    id: u32,
    child: Box<MatchTree>,
}

/// AND whose children must additionally match on at least one shared line;
/// produced by regex lowering for single-line concatenations.
#[derive(Debug)]
pub(crate) struct AndLineTree {
    id: u32,
    children: Vec<MatchTree>,
}

#[derive(Debug)]
pub(crate) enum MatchTree {
    Substr(SubstrTree),
    FileName(FileNameTree),
    Regex(RegexTree),
    Symbol(SymbolTree),
    Branch(BranchTree),
    Repo(RepoTree),
    Language(LanguageTree),
    BruteForce(BruteForceTree),
    NoMatch(NoMatchTree),
    And(AndTree),
    Or(OrTree),
    Not(NotTree),
    AndLine(AndLineTree),
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl SubstrTree {
    pub(crate) fn new(
        shard: &dyn Shard,
        pattern: &str,
        case_sensitive: bool,
        ids: &mut NodeIdGen,
    ) -> Result<SubstrTree> {
        let bytes = pattern.as_bytes();
        if bytes.len() < NGRAM_SIZE {
            return Err(Error::PatternTooShort(pattern.to_string()));
        }
        let pattern_lowered = if case_sensitive {
            bytes.to_vec()
        } else {
            bytes.to_ascii_lowercase()
        };

        let first: Trigram = [pattern_lowered[0], pattern_lowered[1], pattern_lowered[2]];
        let firsts = fetch_postings(shard, first, case_sensitive);
        let mut postings_considered = firsts.len();

        let hits = if bytes.len() == NGRAM_SIZE {
            firsts
        } else {
            let n = pattern_lowered.len();
            let last: Trigram = [
                pattern_lowered[n - 3],
                pattern_lowered[n - 2],
                pattern_lowered[n - 1],
            ];
            let lasts = fetch_postings(shard, last, case_sensitive);
            postings_considered += lasts.len();
            intersect_at_distance(firsts, &lasts, (n - NGRAM_SIZE) as u32)
        };

        Ok(SubstrTree {
            id: ids.next_id(),
            exact: bytes.len() <= 2 * NGRAM_SIZE,
            pattern_lowered,
            case_sensitive,
            hits,
            postings_considered,
            cursor: 0,
            current: Vec::new(),
        })
    }
}

/// Posting lists for a trigram; for case-insensitive atoms the union over
/// all case variants, merged back into (doc, offset) order.
fn fetch_postings(shard: &dyn Shard, gram: Trigram, case_sensitive: bool) -> Vec<Posting> {
    if case_sensitive {
        return shard.postings(gram);
    }
    let mut merged = Vec::new();
    for variant in gram_case_variants(gram) {
        merged.extend(shard.postings(variant));
    }
    merged.sort();
    merged
}

/// Keep first-gram postings that have a last-gram posting exactly `d` bytes
/// later in the same document. Both inputs are (doc, offset) sorted.
fn intersect_at_distance(firsts: Vec<Posting>, lasts: &[Posting], d: u32) -> Vec<Posting> {
    let mut out = Vec::new();
    let mut j = 0;
    for p in firsts {
        let want = Posting {
            doc: p.doc,
            offset: p.offset + d,
        };
        while j < lasts.len() && lasts[j] < want {
            j += 1;
        }
        if j < lasts.len() && lasts[j] == want {
            out.push(p);
        }
    }
    out
}

impl FileNameTree {
    pub(crate) fn new(
        shard: &dyn Shard,
        pattern: &str,
        case_sensitive: bool,
        ids: &mut NodeIdGen,
    ) -> FileNameTree {
        let needle = if case_sensitive {
            pattern.as_bytes().to_vec()
        } else {
            pattern.as_bytes().to_ascii_lowercase()
        };
        let mut hits = Vec::new();
        for doc in 0..shard.doc_count() {
            let name = shard.file_name(doc);
            if needle.is_empty() {
                hits.push(Posting { doc, offset: 0 });
                continue;
            }
            if case_sensitive {
                for off in memmem::find_iter(name, &needle) {
                    hits.push(Posting {
                        doc,
                        offset: off as u32,
                    });
                }
            } else {
                let folded = name.to_ascii_lowercase();
                for off in memmem::find_iter(&folded, &needle) {
                    hits.push(Posting {
                        doc,
                        offset: off as u32,
                    });
                }
            }
        }
        FileNameTree {
            id: ids.next_id(),
            pattern_len: needle.len() as u32,
            hits,
            cursor: 0,
            current: Vec::new(),
        }
    }
}

impl MatchTree {
    pub(crate) fn new_brute(ids: &mut NodeIdGen) -> MatchTree {
        MatchTree::BruteForce(BruteForceTree { id: ids.next_id() })
    }

    pub(crate) fn new_no_match(reason: &'static str, ids: &mut NodeIdGen) -> MatchTree {
        MatchTree::NoMatch(NoMatchTree {
            id: ids.next_id(),
            reason,
        })
    }

    pub(crate) fn new_and(children: Vec<MatchTree>, ids: &mut NodeIdGen) -> MatchTree {
        MatchTree::And(AndTree {
            id: ids.next_id(),
            children,
        })
    }

    pub(crate) fn new_or(children: Vec<MatchTree>, ids: &mut NodeIdGen) -> MatchTree {
        MatchTree::Or(OrTree {
            id: ids.next_id(),
            children,
        })
    }

    pub(crate) fn new_and_line(children: Vec<MatchTree>, ids: &mut NodeIdGen) -> MatchTree {
        MatchTree::AndLine(AndLineTree {
            id: ids.next_id(),
            children,
        })
    }

    /// Text atom over either the name index or the content posting lists.
    pub(crate) fn new_text_atom(
        shard: &dyn Shard,
        pattern: &str,
        case_sensitive: bool,
        file_name: bool,
        ids: &mut NodeIdGen,
    ) -> Result<MatchTree> {
        if file_name {
            Ok(MatchTree::FileName(FileNameTree::new(
                shard,
                pattern,
                case_sensitive,
                ids,
            )))
        } else {
            Ok(MatchTree::Substr(SubstrTree::new(
                shard,
                pattern,
                case_sensitive,
                ids,
            )?))
        }
    }
}

/// Compile a simplified, expanded query into a match tree.
pub(crate) fn new_match_tree(
    q: &Query,
    shard: &dyn Shard,
    ids: &mut NodeIdGen,
) -> Result<MatchTree> {
    match q {
        Query::Const(true) => Ok(MatchTree::new_brute(ids)),
        Query::Const(false) => Ok(MatchTree::new_no_match("const", ids)),

        Query::And(children) => {
            let children = children
                .iter()
                .map(|c| new_match_tree(c, shard, ids))
                .collect::<Result<Vec<_>>>()?;
            Ok(MatchTree::new_and(children, ids))
        }
        Query::Or(children) => {
            let children = children
                .iter()
                .map(|c| new_match_tree(c, shard, ids))
                .collect::<Result<Vec<_>>>()?;
            Ok(MatchTree::new_or(children, ids))
        }
        Query::Not(child) => Ok(MatchTree::Not(NotTree {
            id: ids.next_id(),
            child: Box::new(new_match_tree(child, shard, ids)?),
        })),

        Query::Substring {
            pattern,
            case_sensitive,
            file_name,
            ..
        } => MatchTree::new_text_atom(shard, pattern, *case_sensitive, *file_name, ids),

        Query::Regexp {
            pattern,
            case_sensitive,
            file_name,
            ..
        } => new_regex_tree(shard, pattern, *case_sensitive, *file_name, ids),

        Query::Symbol(child) => Ok(MatchTree::Symbol(SymbolTree {
            id: ids.next_id(),
            child: Box::new(new_match_tree(child, shard, ids)?),
        })),

        Query::Language(name) => {
            let byte = shard
                .language_map()
                .get(name)
                .copied()
                .ok_or_else(|| Error::UnknownLanguage(name.clone()))?;
            Ok(MatchTree::Language(LanguageTree {
                id: ids.next_id(),
                byte,
            }))
        }

        Query::Repo(pattern) => {
            let include = shard
                .repo_metadata()
                .iter()
                .map(|m| m.name.contains(pattern.as_str()))
                .collect();
            Ok(MatchTree::Repo(RepoTree {
                id: ids.next_id(),
                include,
            }))
        }

        Query::RepoSet(set) => {
            let include = shard
                .repo_metadata()
                .iter()
                .map(|m| set.contains(&m.name))
                .collect();
            Ok(MatchTree::Repo(RepoTree {
                id: ids.next_id(),
                include,
            }))
        }

        Query::RepoBranches(map) => {
            // Fold the per-repo restriction into one mask leaf: repositories
            // absent from the map get an empty mask and never match.
            let masks = shard
                .repo_metadata()
                .iter()
                .map(|m| branch_mask_for(m, &repo_branches_for(map, &m.name)))
                .collect();
            Ok(MatchTree::Branch(BranchTree {
                id: ids.next_id(),
                masks,
            }))
        }

        Query::Branch { pattern, exact } => {
            let masks = shard
                .repo_metadata()
                .iter()
                .map(|m| {
                    let mut mask = 0u64;
                    for (k, b) in m.branches.iter().enumerate() {
                        let hit = if *exact {
                            b.name == *pattern
                        } else {
                            b.name.contains(pattern.as_str())
                        };
                        if hit {
                            mask |= 1 << k;
                        }
                    }
                    mask
                })
                .collect();
            Ok(MatchTree::Branch(BranchTree {
                id: ids.next_id(),
                masks,
            }))
        }

        Query::Type { child, .. } => new_match_tree(child, shard, ids),
    }
}

/// Mask of one repository's branches selected by a `Branch`/`Or(Branch)`
/// query fragment, as produced by `repo_branches_for`.
fn branch_mask_for(meta: &crate::shard::RepoMetadata, q: &Query) -> u64 {
    match q {
        Query::Const(_) => 0,
        Query::Branch { pattern, exact } => {
            let mut mask = 0u64;
            for (k, b) in meta.branches.iter().enumerate() {
                let hit = if *exact {
                    b.name == *pattern
                } else {
                    b.name.contains(pattern.as_str())
                };
                if hit {
                    mask |= 1 << k;
                }
            }
            mask
        }
        Query::Or(children) => children.iter().map(|c| branch_mask_for(meta, c)).fold(0, |a, m| a | m),
        _ => 0,
    }
}

fn new_regex_tree(
    shard: &dyn Shard,
    pattern: &str,
    case_sensitive: bool,
    file_name: bool,
    ids: &mut NodeIdGen,
) -> Result<MatchTree> {
    let lowered = prefilter::lower(pattern, NGRAM_SIZE, file_name, case_sensitive, shard, ids)?;
    if lowered.is_equal {
        return Ok(lowered.tree);
    }
    let re = RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| Error::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
    Ok(MatchTree::Regex(RegexTree {
        id: ids.next_id(),
        re,
        file_name,
        child: Box::new(lowered.tree),
        found: Vec::new(),
    }))
}

// ---------------------------------------------------------------------------
// Document advancement
// ---------------------------------------------------------------------------

impl MatchTree {
    pub(crate) fn id(&self) -> u32 {
        match self {
            MatchTree::Substr(t) => t.id,
            MatchTree::FileName(t) => t.id,
            MatchTree::Regex(t) => t.id,
            MatchTree::Symbol(t) => t.id,
            MatchTree::Branch(t) => t.id,
            MatchTree::Repo(t) => t.id,
            MatchTree::Language(t) => t.id,
            MatchTree::BruteForce(t) => t.id,
            MatchTree::NoMatch(t) => t.id,
            MatchTree::And(t) => t.id,
            MatchTree::Or(t) => t.id,
            MatchTree::Not(t) => t.id,
            MatchTree::AndLine(t) => t.id,
        }
    }

    /// Smallest document at or after the internal cursor that could still
    /// match; `u32::MAX` when exhausted. Leaves without document hints
    /// return 0 and rely on the driver's forward-progress guard.
    pub(crate) fn next_doc(&self) -> u32 {
        match self {
            MatchTree::Substr(t) => t.hits.get(t.cursor).map(|p| p.doc).unwrap_or(u32::MAX),
            MatchTree::FileName(t) => t.hits.get(t.cursor).map(|p| p.doc).unwrap_or(u32::MAX),
            MatchTree::Regex(t) => t.child.next_doc(),
            MatchTree::Symbol(t) => t.child.next_doc(),
            MatchTree::And(t) => t.children.iter().map(|c| c.next_doc()).max().unwrap_or(u32::MAX),
            MatchTree::AndLine(t) => {
                t.children.iter().map(|c| c.next_doc()).max().unwrap_or(u32::MAX)
            }
            MatchTree::Or(t) => t.children.iter().map(|c| c.next_doc()).min().unwrap_or(u32::MAX),
            MatchTree::NoMatch(_) => u32::MAX,
            MatchTree::Not(_)
            | MatchTree::Branch(_)
            | MatchTree::Repo(_)
            | MatchTree::Language(_)
            | MatchTree::BruteForce(_) => 0,
        }
    }

    /// Position every node on `doc` and reset per-document state.
    pub(crate) fn prepare(&mut self, doc: u32) {
        match self {
            MatchTree::Substr(t) => {
                t.current.clear();
                while let Some(p) = t.hits.get(t.cursor) {
                    if p.doc > doc {
                        break;
                    }
                    if p.doc == doc {
                        t.current.push(Candidate {
                            file_name: false,
                            byte_offset: p.offset,
                            byte_len: t.pattern_lowered.len() as u32,
                        });
                    }
                    t.cursor += 1;
                }
            }
            MatchTree::FileName(t) => {
                t.current.clear();
                while let Some(p) = t.hits.get(t.cursor) {
                    if p.doc > doc {
                        break;
                    }
                    if p.doc == doc {
                        t.current.push(Candidate {
                            file_name: true,
                            byte_offset: p.offset,
                            byte_len: t.pattern_len,
                        });
                    }
                    t.cursor += 1;
                }
            }
            MatchTree::Regex(t) => {
                t.found.clear();
                t.child.prepare(doc);
            }
            MatchTree::Symbol(t) => t.child.prepare(doc),
            MatchTree::Not(t) => t.child.prepare(doc),
            MatchTree::And(t) => t.children.iter_mut().for_each(|c| c.prepare(doc)),
            MatchTree::Or(t) => t.children.iter_mut().for_each(|c| c.prepare(doc)),
            MatchTree::AndLine(t) => t.children.iter_mut().for_each(|c| c.prepare(doc)),
            MatchTree::Branch(_)
            | MatchTree::Repo(_)
            | MatchTree::Language(_)
            | MatchTree::BruteForce(_)
            | MatchTree::NoMatch(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a node at a cost tier through the memo table. `Some(v)` when
/// decided (now or earlier), `None` while undecided at this tier.
pub(crate) fn eval_node(
    node: &mut MatchTree,
    cp: &mut ContentProvider<'_>,
    cost: u32,
    memo: &mut HashMap<u32, bool>,
) -> Option<bool> {
    if let Some(&v) = memo.get(&node.id()) {
        return Some(v);
    }
    let (v, decided) = node.matches(cp, cost, memo);
    if decided {
        memo.insert(node.id(), v);
        Some(v)
    } else {
        None
    }
}

impl MatchTree {
    /// Tri-state decision at `cost`: `(value, decided)`. Undecided nodes are
    /// retried at higher tiers; every node must decide by `COST_MAX`.
    fn matches(
        &mut self,
        cp: &mut ContentProvider<'_>,
        cost: u32,
        memo: &mut HashMap<u32, bool>,
    ) -> (bool, bool) {
        match self {
            MatchTree::BruteForce(_) => (true, true),
            MatchTree::NoMatch(_) => (false, true),

            MatchTree::Branch(t) => {
                let mask = t.masks[cp.repo_index() as usize];
                (cp.branch_mask() & mask != 0, true)
            }
            MatchTree::Repo(t) => (t.include[cp.repo_index() as usize], true),
            MatchTree::Language(t) => (cp.language_byte() == t.byte, true),

            MatchTree::FileName(t) => {
                if t.current.is_empty() {
                    return (false, true);
                }
                // Hits come from the name index; that is memory-tier work.
                (true, cost >= COST_MEMORY)
            }

            MatchTree::Substr(t) => {
                if t.current.is_empty() {
                    return (false, true);
                }
                if cost < COST_MEMORY {
                    return (false, false);
                }
                if t.exact {
                    return (true, true);
                }
                if cost < COST_CONTENT {
                    return (false, false);
                }
                let SubstrTree {
                    current,
                    pattern_lowered,
                    case_sensitive,
                    ..
                } = t;
                if *case_sensitive {
                    let data = cp.data(false);
                    current.retain(|c| {
                        data.get(c.byte_offset as usize..c.end() as usize)
                            == Some(pattern_lowered.as_slice())
                    });
                } else {
                    let data = cp.data_folded(false);
                    current.retain(|c| {
                        data.get(c.byte_offset as usize..c.end() as usize)
                            == Some(pattern_lowered.as_slice())
                    });
                }
                (!current.is_empty(), true)
            }

            MatchTree::Regex(t) => {
                if eval_node(&mut t.child, cp, cost, memo) == Some(false) {
                    return (false, true);
                }
                if cost < COST_REGEX {
                    return (false, false);
                }
                let data = cp.data(t.file_name);
                t.found.clear();
                for m in t.re.find_iter(data) {
                    t.found.push(Candidate {
                        file_name: t.file_name,
                        byte_offset: m.start() as u32,
                        byte_len: (m.end() - m.start()) as u32,
                    });
                }
                (!t.found.is_empty(), true)
            }

            MatchTree::Symbol(t) => {
                let child = match eval_node(&mut t.child, cp, cost, memo) {
                    Some(false) => return (false, true),
                    other => other,
                };
                if cost < COST_CONTENT || child.is_none() {
                    return (false, false);
                }
                let secs = cp.symbols();
                (restrict_to_sections(&mut t.child, secs), true)
            }

            MatchTree::And(t) => {
                let mut all_decided = true;
                for child in &mut t.children {
                    match eval_node(child, cp, cost, memo) {
                        Some(false) => return (false, true),
                        Some(true) => {}
                        None => all_decided = false,
                    }
                }
                (all_decided, all_decided)
            }

            MatchTree::Or(t) => {
                let mut any_true = false;
                let mut all_decided = true;
                for child in &mut t.children {
                    match eval_node(child, cp, cost, memo) {
                        Some(true) => any_true = true,
                        Some(false) => {}
                        None => all_decided = false,
                    }
                }
                // A true child already proves the OR, but settling now would
                // memoize it and starve undecided candidate-producing
                // children at the higher tiers; stay open until all decide.
                (any_true, all_decided)
            }

            MatchTree::Not(t) => match eval_node(&mut t.child, cp, cost, memo) {
                Some(v) => (!v, true),
                None => (false, false),
            },

            MatchTree::AndLine(t) => {
                let mut all_decided = true;
                for child in &mut t.children {
                    match eval_node(child, cp, cost, memo) {
                        Some(false) => return (false, true),
                        Some(true) => {}
                        None => all_decided = false,
                    }
                }
                if !all_decided || cost < COST_CONTENT {
                    return (false, false);
                }

                // Line-locatable spans live on substring leaves, possibly
                // nested inside inner same-line groups. File-name atoms have
                // no content line and impose no constraint; without any
                // constrained child there is nothing to check.
                if !t.children.iter().any(has_line_spans) {
                    return (true, true);
                }

                // All children matched somewhere; require a shared line
                // across every child that has line-locatable spans.
                cp.ensure_newlines();
                let mut common: Option<BTreeSet<usize>> = None;
                for child in &t.children {
                    let Some(lines) = candidate_lines(child, cp) else {
                        continue;
                    };
                    common = Some(match common {
                        None => lines,
                        Some(acc) => acc.intersection(&lines).copied().collect(),
                    });
                }
                let common = common.unwrap_or_default();
                if common.is_empty() {
                    return (false, true);
                }
                for child in &mut t.children {
                    prune_to_lines(child, &common, cp);
                }
                (true, true)
            }
        }
    }
}

/// Restrict every candidate-carrying leaf under `node` to spans overlapping
/// a symbol section, and re-evaluate the node's boolean shape over what
/// survives. Composite children of a `Symbol` query (an elided-regex `Or`,
/// a user-written `And`) are narrowed leaf by leaf rather than accepted
/// wholesale.
fn restrict_to_sections(node: &mut MatchTree, secs: &[DocSection]) -> bool {
    let keep = |c: &Candidate| secs.iter().any(|s| s.overlaps(c.byte_offset, c.byte_len));
    match node {
        MatchTree::Substr(t) => {
            t.current.retain(keep);
            !t.current.is_empty()
        }
        MatchTree::FileName(t) => {
            t.current.retain(keep);
            !t.current.is_empty()
        }
        MatchTree::Regex(t) => {
            t.found.retain(keep);
            !t.found.is_empty()
        }
        MatchTree::And(t) => {
            let mut all = true;
            for child in &mut t.children {
                all &= restrict_to_sections(child, secs);
            }
            all
        }
        MatchTree::AndLine(t) => {
            let mut all = true;
            for child in &mut t.children {
                all &= restrict_to_sections(child, secs);
            }
            all
        }
        MatchTree::Or(t) => {
            let mut any = false;
            for child in &mut t.children {
                any |= restrict_to_sections(child, secs);
            }
            any
        }
        MatchTree::Symbol(t) => restrict_to_sections(&mut t.child, secs),
        // Negations and structural leaves carry no text spans to narrow.
        _ => true,
    }
}

/// Whether the subtree holds any line-locatable spans (substring leaves,
/// possibly inside nested same-line groups).
fn has_line_spans(node: &MatchTree) -> bool {
    match node {
        MatchTree::Substr(_) => true,
        MatchTree::AndLine(t) => t.children.iter().any(has_line_spans),
        _ => false,
    }
}

/// Lines on which the subtree's verified spans fall. A nested same-line
/// group contributes the intersection of its children's lines (the lines it
/// can match on as a whole); subtrees without line-locatable spans return
/// `None` and impose no constraint. `ensure_newlines` must have run.
fn candidate_lines(node: &MatchTree, cp: &ContentProvider<'_>) -> Option<BTreeSet<usize>> {
    match node {
        MatchTree::Substr(t) => Some(
            t.current
                .iter()
                .map(|c| cp.line_of_offset(c.byte_offset))
                .collect(),
        ),
        MatchTree::AndLine(t) => {
            let mut acc: Option<BTreeSet<usize>> = None;
            for child in &t.children {
                let Some(lines) = candidate_lines(child, cp) else {
                    continue;
                };
                acc = Some(match acc {
                    None => lines,
                    Some(prev) => prev.intersection(&lines).copied().collect(),
                });
            }
            acc
        }
        _ => None,
    }
}

/// Drop spans outside the shared lines, descending into nested same-line
/// groups.
fn prune_to_lines(node: &mut MatchTree, lines: &BTreeSet<usize>, cp: &ContentProvider<'_>) {
    match node {
        MatchTree::Substr(t) => {
            t.current
                .retain(|c| lines.contains(&cp.line_of_offset(c.byte_offset)));
        }
        MatchTree::AndLine(t) => {
            for child in &mut t.children {
                prune_to_lines(child, lines, cp);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Candidate gathering and merging
// ---------------------------------------------------------------------------

/// Collect the spans of every atom that fired for the prepared document,
/// following only branches the memo decided true. Content matches suppress
/// file-name matches; a document matched purely structurally gets one
/// synthesized candidate covering its whole file name. The result is sorted
/// and overlap-free.
pub(crate) fn gather_candidates(
    root: &mut MatchTree,
    memo: &HashMap<u32, bool>,
    cp: &ContentProvider<'_>,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    collect_fired(root, memo, &mut out);

    if out.iter().any(|c| !c.file_name) {
        out.retain(|c| !c.file_name);
    }
    if out.is_empty() {
        out.push(Candidate {
            file_name: true,
            byte_offset: 0,
            byte_len: cp.file_name().len() as u32,
        });
    }
    merge_candidates(&mut out);
    out
}

fn collect_fired(node: &mut MatchTree, memo: &HashMap<u32, bool>, out: &mut Vec<Candidate>) {
    match node {
        MatchTree::And(t) => {
            for child in &mut t.children {
                if memo.get(&child.id()) == Some(&true) {
                    collect_fired(child, memo, out);
                }
            }
        }
        MatchTree::Or(t) => {
            for child in &mut t.children {
                if memo.get(&child.id()) == Some(&true) {
                    collect_fired(child, memo, out);
                }
            }
        }
        MatchTree::AndLine(t) => {
            for child in &mut t.children {
                if memo.get(&child.id()) == Some(&true) {
                    collect_fired(child, memo, out);
                }
            }
        }
        MatchTree::Symbol(t) => {
            if memo.get(&t.child.id()) == Some(&true) {
                collect_fired(&mut t.child, memo, out);
            }
        }
        // Negated subtrees contribute no spans.
        MatchTree::Not(_) => {}
        MatchTree::Substr(t) => out.append(&mut t.current),
        MatchTree::FileName(t) => out.append(&mut t.current),
        MatchTree::Regex(t) => out.append(&mut t.found),
        MatchTree::Branch(_)
        | MatchTree::Repo(_)
        | MatchTree::Language(_)
        | MatchTree::BruteForce(_)
        | MatchTree::NoMatch(_) => {}
    }
}

/// Sort by byte offset and merge adjacent or overlapping spans in one pass.
pub(crate) fn merge_candidates(cands: &mut Vec<Candidate>) {
    cands.sort_by_key(|c| c.byte_offset);
    let mut out: Vec<Candidate> = Vec::with_capacity(cands.len());
    for c in cands.drain(..) {
        match out.last_mut() {
            Some(tail) if tail.end() >= c.byte_offset => {
                let end = tail.end().max(c.end());
                tail.byte_len = end - tail.byte_offset;
            }
            _ => out.push(c),
        }
    }
    *cands = out;
}

// ---------------------------------------------------------------------------
// Tree walks for the driver
// ---------------------------------------------------------------------------

/// Number of leaf atoms; regex atoms count once, their prefilter is
/// internal.
pub(crate) fn count_atoms(node: &MatchTree) -> usize {
    match node {
        MatchTree::And(t) => t.children.iter().map(count_atoms).sum(),
        MatchTree::Or(t) => t.children.iter().map(count_atoms).sum(),
        MatchTree::AndLine(t) => t.children.iter().map(count_atoms).sum(),
        MatchTree::Not(t) => count_atoms(&t.child),
        MatchTree::Symbol(t) => count_atoms(&t.child),
        _ => 1,
    }
}

/// Leaf atoms the memo decided true for the current document.
pub(crate) fn count_fired_atoms(node: &MatchTree, memo: &HashMap<u32, bool>) -> usize {
    match node {
        MatchTree::And(t) => t.children.iter().map(|c| count_fired_atoms(c, memo)).sum(),
        MatchTree::Or(t) => t.children.iter().map(|c| count_fired_atoms(c, memo)).sum(),
        MatchTree::AndLine(t) => t.children.iter().map(|c| count_fired_atoms(c, memo)).sum(),
        MatchTree::Not(t) => count_fired_atoms(&t.child, memo),
        MatchTree::Symbol(t) => count_fired_atoms(&t.child, memo),
        _ => {
            if memo.get(&node.id()) == Some(&true) {
                1
            } else {
                0
            }
        }
    }
}

/// Union of the branch masks of fired branch atoms, for branch reporting.
/// `None` when no branch atom fired.
pub(crate) fn fired_branch_mask(
    node: &MatchTree,
    memo: &HashMap<u32, bool>,
    repo: u32,
) -> Option<u64> {
    match node {
        MatchTree::And(t) => {
            let mut acc = None;
            for child in &t.children {
                if memo.get(&child.id()) == Some(&true) {
                    if let Some(m) = fired_branch_mask(child, memo, repo) {
                        acc = Some(acc.unwrap_or(0) | m);
                    }
                }
            }
            acc
        }
        MatchTree::Or(t) => {
            let mut acc = None;
            for child in &t.children {
                if memo.get(&child.id()) == Some(&true) {
                    if let Some(m) = fired_branch_mask(child, memo, repo) {
                        acc = Some(acc.unwrap_or(0) | m);
                    }
                }
            }
            acc
        }
        MatchTree::AndLine(t) => {
            let mut acc = None;
            for child in &t.children {
                if memo.get(&child.id()) == Some(&true) {
                    if let Some(m) = fired_branch_mask(child, memo, repo) {
                        acc = Some(acc.unwrap_or(0) | m);
                    }
                }
            }
            acc
        }
        MatchTree::Not(_) => None,
        MatchTree::Symbol(t) => fired_branch_mask(&t.child, memo, repo),
        MatchTree::Branch(t) => {
            if memo.get(&t.id) == Some(&true) {
                Some(t.masks[repo as usize])
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Let atoms report their index-side work into the final stats.
pub(crate) fn update_stats(node: &MatchTree, stats: &mut Stats) {
    match node {
        MatchTree::And(t) => t.children.iter().for_each(|c| update_stats(c, stats)),
        MatchTree::Or(t) => t.children.iter().for_each(|c| update_stats(c, stats)),
        MatchTree::AndLine(t) => t.children.iter().for_each(|c| update_stats(c, stats)),
        MatchTree::Not(t) => update_stats(&t.child, stats),
        MatchTree::Symbol(t) => update_stats(&t.child, stats),
        MatchTree::Regex(t) => update_stats(&t.child, stats),
        MatchTree::Substr(t) => {
            stats.ngram_matches += t.hits.len() as u64;
            stats.index_bytes_loaded += (t.postings_considered * std::mem::size_of::<Posting>()) as u64;
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
