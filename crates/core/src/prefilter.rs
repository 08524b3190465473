//! Regex lowering: translate a parsed regular expression into a sound match
//! tree of substring atoms plus line-locality hints.
//!
//! The lowered tree over-approximates the regex: every document the regex
//! matches also matches the tree, so it can prune documents before the
//! regex runs. `is_equal` marks the rare exact translations (single long
//! literals, alternations of them), which let the caller skip regex
//! execution entirely. `single_line` asserts every match of the lowered
//! tree lies within one line, which upgrades concatenations to the
//! same-line AND.
//!
//! Patterns are parsed case-sensitively even for case-insensitive queries:
//! folding is the atoms' job, and a case-folded parse would dissolve the
//! literals this pass exists to find.

use regex_syntax::hir::{Class, Hir, HirKind};

use crate::error::{Error, Result};
use crate::matchtree::{MatchTree, NodeIdGen};
use crate::shard::Shard;

/// A lowered (sub)expression.
#[derive(Debug)]
pub(crate) struct Lowered {
    pub tree: MatchTree,
    /// The tree matches exactly the documents the regex does.
    pub is_equal: bool,
    /// Every match of the tree lies on a single line.
    pub single_line: bool,
}

/// Lower `pattern` into a prefilter tree. `min_text_size` is the shortest
/// literal worth binding to the index (the trigram width).
pub(crate) fn lower(
    pattern: &str,
    min_text_size: usize,
    file_name: bool,
    case_sensitive: bool,
    shard: &dyn Shard,
    ids: &mut NodeIdGen,
) -> Result<Lowered> {
    let hir = regex_syntax::ParserBuilder::new()
        .utf8(false)
        .build()
        .parse(pattern)
        .map_err(|e| Error::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
    lower_hir(&hir, min_text_size, file_name, case_sensitive, shard, ids)
}

fn brute(single_line: bool, ids: &mut NodeIdGen) -> Lowered {
    Lowered {
        tree: MatchTree::new_brute(ids),
        is_equal: false,
        single_line,
    }
}

fn lower_hir(
    hir: &Hir,
    min_text_size: usize,
    file_name: bool,
    case_sensitive: bool,
    shard: &dyn Shard,
    ids: &mut NodeIdGen,
) -> Result<Lowered> {
    match hir.kind() {
        HirKind::Literal(lit) => {
            let bytes: &[u8] = &lit.0;
            if bytes.len() < min_text_size {
                return Ok(brute(false, ids));
            }
            let Ok(s) = std::str::from_utf8(bytes) else {
                return Ok(brute(false, ids));
            };
            Ok(Lowered {
                tree: MatchTree::new_text_atom(shard, s, case_sensitive, file_name, ids)?,
                is_equal: true,
                single_line: !bytes.contains(&b'\n'),
            })
        }

        HirKind::Capture(cap) => {
            lower_hir(&cap.sub, min_text_size, file_name, case_sensitive, shard, ids)
        }

        HirKind::Repetition(rep) => {
            if rep.min == 0 {
                // `.*` (dot not matching newline) cannot leave its line.
                if rep.max.is_none() && is_any_char_not_nl(&rep.sub) {
                    return Ok(brute(true, ids));
                }
                return Ok(brute(false, ids));
            }
            let child = lower_hir(&rep.sub, min_text_size, file_name, case_sensitive, shard, ids)?;
            if rep.min == 1 {
                // At least one occurrence: the child's tree and flags carry.
                Ok(child)
            } else {
                Ok(Lowered {
                    is_equal: false,
                    ..child
                })
            }
        }

        HirKind::Concat(subs) => {
            let mut kept: Vec<Lowered> = Vec::new();
            let mut all_single_line = true;
            let mut dropped = 0usize;
            for sub in subs {
                let low = lower_hir(sub, min_text_size, file_name, case_sensitive, shard, ids)?;
                all_single_line &= low.single_line;
                if matches!(low.tree, MatchTree::BruteForce(_)) {
                    dropped += 1;
                    continue;
                }
                kept.push(low);
            }
            match kept.len() {
                0 => Ok(brute(false, ids)),
                1 => {
                    let only = kept.pop().expect("len checked");
                    Ok(Lowered {
                        is_equal: only.is_equal && dropped == 0,
                        ..only
                    })
                }
                _ => {
                    let trees: Vec<MatchTree> = kept.into_iter().map(|l| l.tree).collect();
                    let tree = if all_single_line {
                        MatchTree::new_and_line(trees, ids)
                    } else {
                        MatchTree::new_and(trees, ids)
                    };
                    Ok(Lowered {
                        tree,
                        is_equal: false,
                        single_line: all_single_line,
                    })
                }
            }
        }

        HirKind::Alternation(subs) => {
            if subs.is_empty() {
                return Ok(Lowered {
                    tree: MatchTree::new_no_match("const", ids),
                    is_equal: true,
                    single_line: false,
                });
            }
            let mut children = Vec::with_capacity(subs.len());
            let mut is_equal = true;
            for sub in subs {
                let low = lower_hir(sub, min_text_size, file_name, case_sensitive, shard, ids)?;
                if matches!(low.tree, MatchTree::BruteForce(_)) {
                    // One unfilterable branch makes the whole OR unfilterable.
                    return Ok(brute(false, ids));
                }
                is_equal &= low.is_equal;
                children.push(low.tree);
            }
            Ok(Lowered {
                tree: MatchTree::new_or(children, ids),
                is_equal,
                single_line: false,
            })
        }

        _ => Ok(brute(false, ids)),
    }
}

/// `.` without the `s` flag: every character except newline.
fn is_any_char_not_nl(hir: &Hir) -> bool {
    let HirKind::Class(class) = hir.kind() else {
        return false;
    };
    match class {
        Class::Unicode(c) => {
            let ranges: Vec<(char, char)> =
                c.ranges().iter().map(|r| (r.start(), r.end())).collect();
            ranges == vec![('\0', '\u{9}'), ('\u{B}', '\u{10FFFF}')]
        }
        Class::Bytes(c) => {
            let ranges: Vec<(u8, u8)> = c.ranges().iter().map(|r| (r.start(), r.end())).collect();
            ranges == vec![(0, 9), (11, 255)]
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
