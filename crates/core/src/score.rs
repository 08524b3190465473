//! Scoring: per-candidate line scores and the file-level combination of
//! fragment, atom-fraction, document-order, and shard-rank contributions.

use serde_json::json;

use crate::shard::DocSection;

// ---------------------------------------------------------------------------
// Scoring constants
// ---------------------------------------------------------------------------

pub(crate) const SCORE_PARTIAL_WORD_MATCH: f64 = 50.0;
pub(crate) const SCORE_WORD_MATCH: f64 = 500.0;
pub(crate) const SCORE_PARTIAL_SYMBOL: f64 = 4000.0;
pub(crate) const SCORE_SYMBOL: f64 = 7000.0;
pub(crate) const SCORE_FACTOR_ATOM_MATCH: f64 = 400.0;
pub(crate) const SCORE_SHARD_RANK_FACTOR: f64 = 20.0;
pub(crate) const SCORE_FILE_ORDER_FACTOR: f64 = 10.0;
pub(crate) const SCORE_LINE_ORDER_FACTOR: f64 = 1.0;

/// Files scoring above this are "important" and count against the
/// important-match bounds.
pub const SCORE_IMPORTANT_THRESHOLD: f64 = 2000.0;

// ---------------------------------------------------------------------------
// Candidate scoring
// ---------------------------------------------------------------------------

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Intrinsic score of one candidate span: word-boundary alignment plus
/// symbol-definition overlap.
pub(crate) fn candidate_score(data: &[u8], off: u32, len: u32, secs: &[DocSection]) -> f64 {
    let start = off as usize;
    let end = (off + len) as usize;
    let mut score = 0.0;

    let starts_word = start == 0 || !is_word_byte(data[start - 1]);
    let ends_word = end >= data.len() || !is_word_byte(data[end]);
    if starts_word && ends_word {
        score += SCORE_WORD_MATCH;
    } else if starts_word || ends_word {
        score += SCORE_PARTIAL_WORD_MATCH;
    }

    for sec in secs {
        if !sec.overlaps(off, len) {
            continue;
        }
        if sec.start == off && sec.end == off + len {
            score += SCORE_SYMBOL;
        } else {
            score += SCORE_PARTIAL_SYMBOL;
        }
        break;
    }

    score
}

// ---------------------------------------------------------------------------
// File scoring
// ---------------------------------------------------------------------------

/// Inputs to the file-level score.
pub(crate) struct FileScoreInput {
    /// Best line (or chunk) score in the file.
    pub max_fragment_score: f64,
    pub atoms_matched: usize,
    pub total_atoms: usize,
    pub doc: u32,
    pub doc_count: u32,
    pub repo_rank: u16,
}

/// Combine the sub-scores. Earlier documents and higher-ranked repositories
/// win ties between equal content scores.
pub(crate) fn score_file(input: &FileScoreInput, debug: bool) -> (f64, String) {
    let fragment = input.max_fragment_score;
    let atom = if input.total_atoms > 0 {
        SCORE_FACTOR_ATOM_MATCH * (input.atoms_matched as f64 / input.total_atoms as f64)
    } else {
        0.0
    };
    let doc_order = if input.doc_count > 0 {
        SCORE_FILE_ORDER_FACTOR * (1.0 - input.doc as f64 / input.doc_count as f64)
    } else {
        0.0
    };
    let shard_rank = SCORE_SHARD_RANK_FACTOR * (input.repo_rank as f64 / 65535.0);

    let total = fragment + atom + doc_order + shard_rank;
    let breakdown = if debug {
        json!({
            "fragment": fragment,
            "atom": atom,
            "doc_order": doc_order,
            "shard_rank": shard_rank,
        })
        .to_string()
    } else {
        String::new()
    };
    (total, breakdown)
}

/// Bonus for the i-th of n line matches; earlier matches within a file
/// outrank later ones, subordinate to the file-level score.
pub(crate) fn line_order_bonus(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    SCORE_LINE_ORDER_FACTOR * (1.0 - index as f64 / total as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_match_outranks_partial_match() {
        let data = b"foo foobar foo_";
        // "foo" standalone: both boundaries.
        let full = candidate_score(data, 0, 3, &[]);
        // "foo" inside "foobar": only the start boundary.
        let partial = candidate_score(data, 4, 3, &[]);
        // "oob" inside "foobar": no boundary.
        let none = candidate_score(data, 5, 3, &[]);
        assert_eq!(full, SCORE_WORD_MATCH);
        assert_eq!(partial, SCORE_PARTIAL_WORD_MATCH);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn underscore_is_a_word_byte() {
        let data = b"x foo_ y";
        // "foo" followed by '_' does not end a word.
        assert_eq!(candidate_score(data, 2, 3, &[]), SCORE_PARTIAL_WORD_MATCH);
    }

    #[test]
    fn symbol_overlap_scores() {
        let data = b"fn parse_query()";
        let secs = [DocSection { start: 3, end: 14 }];
        let exact = candidate_score(data, 3, 11, &secs);
        let partial = candidate_score(data, 3, 5, &secs);
        assert_eq!(exact, SCORE_WORD_MATCH + SCORE_SYMBOL);
        assert!(partial < exact);
        assert!(partial >= SCORE_PARTIAL_SYMBOL);
    }

    #[test]
    fn doc_order_prefers_earlier_documents() {
        let base = FileScoreInput {
            max_fragment_score: 0.0,
            atoms_matched: 0,
            total_atoms: 0,
            doc: 0,
            doc_count: 10,
            repo_rank: 0,
        };
        let (first, _) = score_file(&base, false);
        let (later, _) = score_file(
            &FileScoreInput {
                doc: 9,
                ..base
            },
            false,
        );
        assert!(first > later);
        assert_eq!(first, SCORE_FILE_ORDER_FACTOR);
    }

    #[test]
    fn single_doc_shard_gets_full_doc_order_score() {
        let (score, _) = score_file(
            &FileScoreInput {
                max_fragment_score: 0.0,
                atoms_matched: 0,
                total_atoms: 0,
                doc: 0,
                doc_count: 1,
                repo_rank: 0,
            },
            false,
        );
        assert_eq!(score, SCORE_FILE_ORDER_FACTOR);
    }

    #[test]
    fn atom_fraction_scales_with_fired_atoms() {
        let mk = |matched| FileScoreInput {
            max_fragment_score: 0.0,
            atoms_matched: matched,
            total_atoms: 4,
            doc: 0,
            doc_count: 0,
            repo_rank: 0,
        };
        let (half, _) = score_file(&mk(2), false);
        let (full, _) = score_file(&mk(4), false);
        assert_eq!(half, SCORE_FACTOR_ATOM_MATCH / 2.0);
        assert_eq!(full, SCORE_FACTOR_ATOM_MATCH);
    }

    #[test]
    fn debug_breakdown_renders_components() {
        let (_, dbg) = score_file(
            &FileScoreInput {
                max_fragment_score: 500.0,
                atoms_matched: 1,
                total_atoms: 1,
                doc: 0,
                doc_count: 2,
                repo_rank: 65535,
            },
            true,
        );
        assert!(dbg.contains("fragment"));
        assert!(dbg.contains("shard_rank"));
    }

    #[test]
    fn line_order_bonus_decreases() {
        assert!(line_order_bonus(0, 3) > line_order_bonus(1, 3));
        assert_eq!(line_order_bonus(0, 1), SCORE_LINE_ORDER_FACTOR);
    }
}
