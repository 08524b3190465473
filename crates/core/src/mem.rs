//! In-memory reference implementation of the [`Shard`] reader contract.
//!
//! `MemShardBuilder` derives everything a shard carries (posting lists,
//! branch masks, repository boundaries, language bytes, checksums) from
//! plain documents. Every test in this crate builds its corpus through it,
//! and embedders with small corpora can use it as a real backend.

use std::collections::{BTreeMap, HashMap};

use crate::shard::{DocSection, Posting, RepoBranch, RepoMetadata, Shard, Trigram};

// ---------------------------------------------------------------------------
// Builder input
// ---------------------------------------------------------------------------

/// One document to add to the shard under construction.
#[derive(Debug, Clone, Default)]
pub struct DocSpec {
    /// Path within the repository.
    pub name: String,
    pub content: Vec<u8>,
    /// Branch membership bitmask; 0 means "first branch only".
    pub branches: u64,
    /// Language name; registered in the shard's language map on build.
    pub language: Option<String>,
    /// Sub-repository path, when the document belongs to a submodule.
    pub sub_repo_path: Option<String>,
    /// Symbol definition ranges, sorted by start.
    pub symbols: Vec<DocSection>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`MemShard`]. Documents attach to the most recently added
/// repository; repositories keep their insertion order, which fixes the
/// document ID order.
#[derive(Debug, Default)]
pub struct MemShardBuilder {
    repos: Vec<RepoMetadata>,
    tombstones: Vec<bool>,
    docs: Vec<Vec<DocSpec>>,
}

impl MemShardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a repository; subsequent `add_doc` calls attach to it. Returns
    /// the repository index.
    pub fn add_repo(&mut self, meta: RepoMetadata) -> u32 {
        self.repos.push(meta);
        self.tombstones.push(false);
        self.docs.push(Vec::new());
        (self.repos.len() - 1) as u32
    }

    /// Add a document to the most recently added repository.
    ///
    /// # Panics
    /// When called before any `add_repo`.
    pub fn add_doc(&mut self, doc: DocSpec) {
        self.docs
            .last_mut()
            .expect("add_repo must be called before add_doc")
            .push(doc);
    }

    /// Mark a repository as logically deleted without removing its documents.
    pub fn tombstone(&mut self, repo: usize) {
        self.tombstones[repo] = true;
    }

    pub fn build(self) -> MemShard {
        let mut repos = self.repos;
        let mut language_map = BTreeMap::new();
        let mut next_lang: u8 = 1;

        let mut names = Vec::new();
        let mut contents = Vec::new();
        let mut checksums = Vec::new();
        let mut symbols = Vec::new();
        let mut doc_repo = Vec::new();
        let mut doc_sub_repo = Vec::new();
        let mut branch_masks = Vec::new();
        let mut languages = Vec::new();
        let mut sub_repo_paths = Vec::new();
        let mut repo_ends = Vec::new();
        let mut postings: HashMap<Trigram, Vec<Posting>> = HashMap::new();

        for (repo_idx, docs) in self.docs.into_iter().enumerate() {
            // Branch bit 0 must exist for the default mask.
            if repos[repo_idx].branches.is_empty() {
                repos[repo_idx].branches.push(RepoBranch {
                    name: "HEAD".to_string(),
                    version: String::new(),
                });
            }

            let mut paths = vec![String::new()];
            for d in &docs {
                if let Some(p) = &d.sub_repo_path {
                    if !p.is_empty() && !paths.contains(p) {
                        paths.push(p.clone());
                    }
                }
            }
            paths[1..].sort();

            for d in docs {
                let doc_id = names.len() as u32;
                doc_repo.push(repo_idx as u32);

                let sub = d
                    .sub_repo_path
                    .as_ref()
                    .and_then(|p| paths.iter().position(|q| q == p))
                    .unwrap_or(0);
                doc_sub_repo.push(sub as u32);

                branch_masks.push(if d.branches == 0 { 1 } else { d.branches });

                let lang = match d.language {
                    Some(name) => *language_map.entry(name).or_insert_with(|| {
                        let b = next_lang;
                        next_lang += 1;
                        b
                    }),
                    None => 0,
                };
                languages.push(lang);

                for (off, gram) in d.content.windows(3).enumerate() {
                    postings
                        .entry([gram[0], gram[1], gram[2]])
                        .or_default()
                        .push(Posting {
                            doc: doc_id,
                            offset: off as u32,
                        });
                }

                checksums.push(fnv1a(&d.content).to_be_bytes());
                names.push(d.name.into_bytes());
                contents.push(d.content);
                symbols.push(d.symbols);
            }

            sub_repo_paths.push(paths);
            repo_ends.push(names.len() as u32);
        }

        MemShard {
            repos,
            tombstones: self.tombstones,
            names,
            contents,
            checksums,
            symbols,
            doc_repo,
            doc_sub_repo,
            branch_masks,
            languages,
            language_map,
            sub_repo_paths,
            repo_ends,
            postings,
        }
    }
}

/// FNV-1a, the checksum recorded per document.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// An immutable in-memory shard.
#[derive(Debug)]
pub struct MemShard {
    repos: Vec<RepoMetadata>,
    tombstones: Vec<bool>,
    names: Vec<Vec<u8>>,
    contents: Vec<Vec<u8>>,
    checksums: Vec<[u8; 8]>,
    symbols: Vec<Vec<DocSection>>,
    doc_repo: Vec<u32>,
    doc_sub_repo: Vec<u32>,
    branch_masks: Vec<u64>,
    languages: Vec<u8>,
    language_map: BTreeMap<String, u8>,
    sub_repo_paths: Vec<Vec<String>>,
    repo_ends: Vec<u32>,
    postings: HashMap<Trigram, Vec<Posting>>,
}

impl Shard for MemShard {
    fn doc_count(&self) -> u32 {
        self.names.len() as u32
    }

    fn postings(&self, gram: Trigram) -> Vec<Posting> {
        self.postings.get(&gram).cloned().unwrap_or_default()
    }

    fn document(&self, doc: u32) -> &[u8] {
        &self.contents[doc as usize]
    }

    fn file_name(&self, doc: u32) -> &[u8] {
        &self.names[doc as usize]
    }

    fn checksum(&self, doc: u32) -> &[u8] {
        &self.checksums[doc as usize]
    }

    fn repo_metadata(&self) -> &[RepoMetadata] {
        &self.repos
    }

    fn repo_tombstones(&self) -> &[bool] {
        &self.tombstones
    }

    fn repo_index(&self, doc: u32) -> u32 {
        self.doc_repo[doc as usize]
    }

    fn repo_end(&self, repo: u32) -> u32 {
        self.repo_ends[repo as usize]
    }

    fn sub_repo_index(&self, doc: u32) -> u32 {
        self.doc_sub_repo[doc as usize]
    }

    fn sub_repo_paths(&self, repo: u32) -> &[String] {
        &self.sub_repo_paths[repo as usize]
    }

    fn branch_mask(&self, doc: u32) -> u64 {
        self.branch_masks[doc as usize]
    }

    fn language(&self, doc: u32) -> u8 {
        self.languages[doc as usize]
    }

    fn language_map(&self) -> &BTreeMap<String, u8> {
        &self.language_map
    }

    fn document_symbols(&self, doc: u32) -> &[DocSection] {
        &self.symbols[doc as usize]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
