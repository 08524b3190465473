//! Content provider: a single-document caching cursor over shard data.
//!
//! One provider is owned by one search call. It lazily loads the current
//! document's content, a case-folded copy, and a newline index, and turns
//! gathered candidate spans into `LineMatch`es or `ChunkMatch`es. Content
//! reads are counted into the call's stats.

use memchr::memchr_iter;

use crate::matchtree::Candidate;
use crate::score::candidate_score;
use crate::shard::{DocSection, Shard};
use crate::types::{ChunkMatch, LineFragmentMatch, LineMatch, Location, Range, Stats};

pub(crate) struct ContentProvider<'a> {
    shard: &'a dyn Shard,
    doc: u32,
    content: Option<&'a [u8]>,
    content_folded: Option<Vec<u8>>,
    name_folded: Option<Vec<u8>>,
    newlines: Option<Vec<u32>>,
    pub(crate) stats: Stats,
}

impl<'a> ContentProvider<'a> {
    pub(crate) fn new(shard: &'a dyn Shard) -> Self {
        ContentProvider {
            shard,
            doc: 0,
            content: None,
            content_folded: None,
            name_folded: None,
            newlines: None,
            stats: Stats::default(),
        }
    }

    /// Position on a document, dropping all per-document caches.
    pub(crate) fn set_document(&mut self, doc: u32) {
        self.doc = doc;
        self.content = None;
        self.content_folded = None;
        self.name_folded = None;
        self.newlines = None;
    }

    pub(crate) fn repo_index(&self) -> u32 {
        self.shard.repo_index(self.doc)
    }

    pub(crate) fn branch_mask(&self) -> u64 {
        self.shard.branch_mask(self.doc)
    }

    pub(crate) fn language_byte(&self) -> u8 {
        self.shard.language(self.doc)
    }

    pub(crate) fn symbols(&self) -> &'a [DocSection] {
        self.shard.document_symbols(self.doc)
    }

    pub(crate) fn file_name(&self) -> &'a [u8] {
        self.shard.file_name(self.doc)
    }

    /// Document content, or the file name when `file_name` is set. The
    /// first content read of a document is counted into the stats.
    pub(crate) fn data(&mut self, file_name: bool) -> &'a [u8] {
        if file_name {
            return self.shard.file_name(self.doc);
        }
        match self.content {
            Some(c) => c,
            None => {
                let c = self.shard.document(self.doc);
                self.stats.files_loaded += 1;
                self.stats.content_bytes_loaded += c.len() as u64;
                self.content = Some(c);
                c
            }
        }
    }

    /// ASCII-lowercased variant of `data`, cached per document.
    pub(crate) fn data_folded(&mut self, file_name: bool) -> &[u8] {
        if file_name {
            if self.name_folded.is_none() {
                self.name_folded = Some(self.shard.file_name(self.doc).to_ascii_lowercase());
            }
            return self.name_folded.as_deref().expect("filled above");
        }
        if self.content_folded.is_none() {
            let data = self.data(false);
            self.content_folded = Some(data.to_ascii_lowercase());
        }
        self.content_folded.as_deref().expect("filled above")
    }

    // -----------------------------------------------------------------------
    // Line arithmetic
    // -----------------------------------------------------------------------

    /// Build the newline index (loads content).
    pub(crate) fn ensure_newlines(&mut self) {
        if self.newlines.is_some() {
            return;
        }
        let data = self.data(false);
        self.newlines = Some(memchr_iter(b'\n', data).map(|off| off as u32).collect());
    }

    fn newlines(&self) -> &[u32] {
        self.newlines.as_deref().expect("ensure_newlines not called")
    }

    /// 0-based line index containing a byte offset. `ensure_newlines` must
    /// have run for the current document.
    pub(crate) fn line_of_offset(&self, off: u32) -> usize {
        self.newlines().partition_point(|&nl| nl < off)
    }

    /// Byte bounds `[start, end)` of a 0-based line, newline excluded.
    fn line_bounds(&self, line: usize) -> (u32, u32) {
        let newlines = self.newlines();
        let start = if line == 0 { 0 } else { newlines[line - 1] + 1 };
        let end = if line < newlines.len() {
            newlines[line]
        } else {
            self.content.map(|c| c.len() as u32).unwrap_or(0)
        };
        (start, end)
    }

    fn last_line(&self) -> usize {
        self.newlines().len()
    }

    // -----------------------------------------------------------------------
    // Match assembly
    // -----------------------------------------------------------------------

    /// Group candidates by line into `LineMatch`es with per-line scores.
    /// Candidates are all-content or all-file-name, sorted and disjoint.
    pub(crate) fn fill_matches(&mut self, cands: &[Candidate]) -> Vec<LineMatch> {
        if cands.is_empty() {
            return Vec::new();
        }

        if cands[0].file_name {
            let name = self.file_name();
            let fragments = cands
                .iter()
                .map(|c| LineFragmentMatch {
                    line_offset: c.byte_offset as usize,
                    offset: c.byte_offset,
                    match_length: c.byte_len as usize,
                    rune_offset: char_count(&name[..c.byte_offset as usize]),
                })
                .collect();
            let score = max_candidate_score(name, cands, &[]);
            return vec![LineMatch {
                line: name.to_vec(),
                line_start: 0,
                line_end: name.len(),
                line_number: 1,
                file_name: true,
                score,
                line_fragments: fragments,
            }];
        }

        self.ensure_newlines();
        let data = self.data(false);
        let secs = self.symbols();

        let mut out = Vec::new();
        let mut i = 0;
        while i < cands.len() {
            let line = self.line_of_offset(cands[i].byte_offset);
            let (start, end) = self.line_bounds(line);
            let mut fragments = Vec::new();
            let mut score = 0.0f64;
            while i < cands.len() && self.line_of_offset(cands[i].byte_offset) == line {
                let c = &cands[i];
                fragments.push(LineFragmentMatch {
                    line_offset: (c.byte_offset - start) as usize,
                    offset: c.byte_offset,
                    match_length: c.byte_len as usize,
                    rune_offset: char_count(&data[start as usize..c.byte_offset as usize]),
                });
                score = score.max(candidate_score(data, c.byte_offset, c.byte_len, secs));
                i += 1;
            }
            out.push(LineMatch {
                line: data[start as usize..end as usize].to_vec(),
                line_start: start as usize,
                line_end: end as usize,
                line_number: line + 1,
                file_name: false,
                score,
                line_fragments: fragments,
            });
        }
        out
    }

    /// Group candidates into chunks: neighbors whose context windows touch
    /// or overlap land in the same chunk, whose content carries
    /// `num_context_lines` of context on both sides.
    pub(crate) fn fill_chunk_matches(
        &mut self,
        cands: &[Candidate],
        num_context_lines: usize,
    ) -> Vec<ChunkMatch> {
        if cands.is_empty() {
            return Vec::new();
        }

        if cands[0].file_name {
            let name = self.file_name();
            let ranges = cands
                .iter()
                .map(|c| Range {
                    start: Location {
                        byte_offset: c.byte_offset,
                        line_number: 1,
                        column: char_count(&name[..c.byte_offset as usize]) as u32 + 1,
                    },
                    end: Location {
                        byte_offset: c.byte_offset + c.byte_len,
                        line_number: 1,
                        column: char_count(&name[..(c.byte_offset + c.byte_len) as usize]) as u32
                            + 1,
                    },
                })
                .collect();
            let score = max_candidate_score(name, cands, &[]);
            return vec![ChunkMatch {
                content: name.to_vec(),
                content_start: Location {
                    byte_offset: 0,
                    line_number: 1,
                    column: 1,
                },
                file_name: true,
                ranges,
                score,
            }];
        }

        self.ensure_newlines();
        let data = self.data(false);
        let secs = self.symbols();

        struct Group {
            first_line: usize,
            last_line: usize,
            cands: Vec<Candidate>,
        }

        let mut groups: Vec<Group> = Vec::new();
        for c in cands {
            let first = self.line_of_offset(c.byte_offset);
            let last = self.line_of_offset(c.byte_offset + c.byte_len.saturating_sub(1));
            match groups.last_mut() {
                Some(g) if first <= g.last_line + 2 * num_context_lines + 1 => {
                    g.last_line = g.last_line.max(last);
                    g.cands.push(*c);
                }
                _ => groups.push(Group {
                    first_line: first,
                    last_line: last,
                    cands: vec![*c],
                }),
            }
        }

        groups
            .into_iter()
            .map(|g| {
                let first = g.first_line.saturating_sub(num_context_lines);
                let last = (g.last_line + num_context_lines).min(self.last_line());
                let (start, _) = self.line_bounds(first);
                let (_, end) = self.line_bounds(last);
                let ranges = g
                    .cands
                    .iter()
                    .map(|c| self.candidate_range(data, c))
                    .collect();
                let score = max_candidate_score(data, &g.cands, secs);
                ChunkMatch {
                    content: data[start as usize..end as usize].to_vec(),
                    content_start: Location {
                        byte_offset: start,
                        line_number: first as u32 + 1,
                        column: 1,
                    },
                    file_name: false,
                    ranges,
                    score,
                }
            })
            .collect()
    }

    fn candidate_range(&self, data: &[u8], c: &Candidate) -> Range {
        let start_line = self.line_of_offset(c.byte_offset);
        let (start_bol, _) = self.line_bounds(start_line);
        let end_off = c.byte_offset + c.byte_len;
        let end_line = self.line_of_offset(end_off.saturating_sub(1).max(c.byte_offset));
        let (end_bol, _) = self.line_bounds(end_line);
        Range {
            start: Location {
                byte_offset: c.byte_offset,
                line_number: start_line as u32 + 1,
                column: char_count(&data[start_bol as usize..c.byte_offset as usize]) as u32 + 1,
            },
            end: Location {
                byte_offset: end_off,
                line_number: end_line as u32 + 1,
                column: char_count(&data[end_bol as usize..end_off as usize]) as u32 + 1,
            },
        }
    }
}

fn max_candidate_score(data: &[u8], cands: &[Candidate], secs: &[DocSection]) -> f64 {
    cands
        .iter()
        .map(|c| candidate_score(data, c.byte_offset, c.byte_len, secs))
        .fold(0.0, f64::max)
}

/// Character count of a byte slice, decoding lossily.
fn char_count(bytes: &[u8]) -> usize {
    String::from_utf8_lossy(bytes).chars().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
