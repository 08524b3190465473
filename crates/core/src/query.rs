//! Query tree and shard-level simplification.
//!
//! A query arrives as a tagged tree. Before any match tree is built, the
//! simplifier folds repository, branch, and language atoms against the
//! shard's metadata: atoms the shard can already decide collapse to
//! constants, which lets whole shards be skipped or stripped of impossible
//! branches. A second, purely boolean pass then flattens and de-duplicates
//! the tree.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::shard::Shard;

// ---------------------------------------------------------------------------
// Query tree
// ---------------------------------------------------------------------------

/// Output granularity hint carried by `Query::Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryType {
    FileMatch,
    FileName,
    Repo,
}

/// A query over file contents, file names, repositories, branches, and
/// languages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Query {
    Const(bool),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),

    /// Literal substring search. When neither `file_name` nor `content` is
    /// set the atom applies to both, and the search driver expands it into
    /// an `Or` of the two single-target forms.
    Substring {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },

    /// Regular expression search; same targeting flags as `Substring`.
    Regexp {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },

    /// Restrict the child's content matches to symbol definitions.
    Symbol(Box<Query>),

    /// Documents written in the named language.
    Language(String),

    /// Repositories whose name contains the pattern.
    Repo(String),

    /// Repositories named exactly by the set.
    RepoSet(BTreeSet<String>),

    /// Per-repository branch restriction, as sent by the multi-repo
    /// front end: repo name to the branches to search in it.
    RepoBranches(BTreeMap<String, Vec<String>>),

    /// Documents on a branch. `exact` requires the full branch name;
    /// otherwise containment suffices.
    Branch { pattern: String, exact: bool },

    /// Output-shape wrapper; evaluation is transparent.
    Type { kind: QueryType, child: Box<Query> },
}

impl Query {
    /// Substring atom over file content and file name alike.
    pub fn substring(pattern: &str) -> Query {
        Query::Substring {
            pattern: pattern.to_string(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }

    /// Regexp atom over file content and file name alike.
    pub fn regexp(pattern: &str) -> Query {
        Query::Regexp {
            pattern: pattern.to_string(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }
}

/// The branch restriction a `RepoBranches` map imposes on one repository:
/// `Const(false)` when the repo is not listed, a single exact branch, or an
/// `Or` of exact branches.
pub(crate) fn repo_branches_for(map: &BTreeMap<String, Vec<String>>, repo: &str) -> Query {
    let Some(branches) = map.get(repo) else {
        return Query::Const(false);
    };
    match branches.len() {
        0 => Query::Const(false),
        1 => Query::Branch {
            pattern: branches[0].clone(),
            exact: true,
        },
        _ => Query::Or(
            branches
                .iter()
                .map(|b| Query::Branch {
                    pattern: b.clone(),
                    exact: true,
                })
                .collect(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Shard-level folding
// ---------------------------------------------------------------------------

/// Simplify a query against a shard: fold metadata-decidable atoms to
/// constants, then run the generic boolean pass. Pure; the shard is only
/// read.
pub fn simplify(q: Query, shard: &dyn Shard) -> Query {
    simplify_booleans(fold_metadata(q, shard))
}

fn fold_metadata(q: Query, shard: &dyn Shard) -> Query {
    match q {
        Query::And(children) => Query::And(
            children
                .into_iter()
                .map(|c| fold_metadata(c, shard))
                .collect(),
        ),
        Query::Or(children) => Query::Or(
            children
                .into_iter()
                .map(|c| fold_metadata(c, shard))
                .collect(),
        ),
        Query::Not(child) => Query::Not(Box::new(fold_metadata(*child, shard))),
        Query::Symbol(child) => Query::Symbol(Box::new(fold_metadata(*child, shard))),
        Query::Type { kind, child } => Query::Type {
            kind,
            child: Box::new(fold_metadata(*child, shard)),
        },

        Query::Repo(pattern) => fold_repo_predicate(shard, |name| name.contains(&pattern))
            .unwrap_or(Query::Repo(pattern)),

        Query::RepoSet(set) => {
            fold_repo_predicate(shard, |name| set.contains(name)).unwrap_or(Query::RepoSet(set))
        }

        Query::RepoBranches(map) => {
            let metas = shard.repo_metadata();
            if metas.len() == 1 {
                return repo_branches_for(&map, &metas[0].name);
            }
            if !metas.iter().any(|m| map.contains_key(&m.name)) {
                return Query::Const(false);
            }
            // Partial overlap on a multi-repo shard stays as-is; the match
            // tree restricts per repository.
            Query::RepoBranches(map)
        }

        Query::Language(name) => {
            if shard.language_map().contains_key(&name) {
                Query::Language(name)
            } else {
                Query::Const(false)
            }
        }

        other => other,
    }
}

/// Count live repositories against a name predicate. `Some(Const)` when the
/// shard forces the atom's value, `None` to leave it unchanged.
fn fold_repo_predicate(shard: &dyn Shard, pred: impl Fn(&str) -> bool) -> Option<Query> {
    let tombstones = shard.repo_tombstones();
    let mut alive = 0usize;
    let mut hit = 0usize;
    for (i, md) in shard.repo_metadata().iter().enumerate() {
        if tombstones[i] {
            continue;
        }
        alive += 1;
        if pred(&md.name) {
            hit += 1;
        }
    }
    if hit == alive {
        Some(Query::Const(true))
    } else if hit == 0 {
        Some(Query::Const(false))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Boolean simplification
// ---------------------------------------------------------------------------

/// Generic tree cleanup: flatten nested same-kind `And`/`Or`, drop identity
/// constants, short-circuit absorbing constants, de-duplicate children, and
/// fold `Not` over constants.
pub fn simplify_booleans(q: Query) -> Query {
    match q {
        Query::And(children) => simplify_junction(children, true),
        Query::Or(children) => simplify_junction(children, false),
        Query::Not(child) => match simplify_booleans(*child) {
            Query::Const(v) => Query::Const(!v),
            Query::Not(inner) => *inner,
            other => Query::Not(Box::new(other)),
        },
        Query::Symbol(child) => match simplify_booleans(*child) {
            Query::Const(v) => Query::Const(v),
            other => Query::Symbol(Box::new(other)),
        },
        Query::Type { kind, child } => Query::Type {
            kind,
            child: Box::new(simplify_booleans(*child)),
        },
        other => other,
    }
}

/// Shared body of `And`/`Or` simplification. For `And`: identity is `true`,
/// absorber is `false`; `Or` is the mirror image.
fn simplify_junction(children: Vec<Query>, is_and: bool) -> Query {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match simplify_booleans(child) {
            Query::And(sub) if is_and => flat.extend(sub),
            Query::Or(sub) if !is_and => flat.extend(sub),
            Query::Const(v) if v == is_and => {} // identity, drop
            Query::Const(v) => return Query::Const(v), // absorber
            other => flat.push(other),
        }
    }

    let mut unique: Vec<Query> = Vec::with_capacity(flat.len());
    for child in flat {
        if !unique.contains(&child) {
            unique.push(child);
        }
    }

    match unique.len() {
        0 => Query::Const(is_and),
        1 => unique.into_iter().next().unwrap(),
        _ if is_and => Query::And(unique),
        _ => Query::Or(unique),
    }
}

// ---------------------------------------------------------------------------
// File-content expansion
// ---------------------------------------------------------------------------

/// Expand text atoms that name neither target into an `Or` of the file-name
/// and content forms. Runs after simplification, before match-tree
/// construction.
pub fn expand_file_content(q: Query) -> Query {
    match q {
        Query::And(children) => {
            Query::And(children.into_iter().map(expand_file_content).collect())
        }
        Query::Or(children) => Query::Or(children.into_iter().map(expand_file_content).collect()),
        Query::Not(child) => Query::Not(Box::new(expand_file_content(*child))),
        Query::Type { kind, child } => Query::Type {
            kind,
            child: Box::new(expand_file_content(*child)),
        },
        // Symbol children stay content-only.
        Query::Substring {
            pattern,
            case_sensitive,
            file_name: false,
            content: false,
        } => Query::Or(vec![
            Query::Substring {
                pattern: pattern.clone(),
                case_sensitive,
                file_name: true,
                content: false,
            },
            Query::Substring {
                pattern,
                case_sensitive,
                file_name: false,
                content: true,
            },
        ]),
        Query::Regexp {
            pattern,
            case_sensitive,
            file_name: false,
            content: false,
        } => Query::Or(vec![
            Query::Regexp {
                pattern: pattern.clone(),
                case_sensitive,
                file_name: true,
                content: false,
            },
            Query::Regexp {
                pattern,
                case_sensitive,
                file_name: false,
                content: true,
            },
        ]),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{DocSpec, MemShardBuilder};
    use crate::shard::RepoMetadata;

    fn two_repo_shard() -> crate::mem::MemShard {
        let mut b = MemShardBuilder::new();
        b.add_repo(RepoMetadata {
            name: "a".to_string(),
            id: 1,
            ..Default::default()
        });
        b.add_doc(DocSpec {
            name: "a.go".to_string(),
            content: b"package a\n".to_vec(),
            ..Default::default()
        });
        b.add_repo(RepoMetadata {
            name: "b".to_string(),
            id: 2,
            ..Default::default()
        });
        b.add_doc(DocSpec {
            name: "b.go".to_string(),
            content: b"package b\n".to_vec(),
            ..Default::default()
        });
        b.build()
    }

    #[test]
    fn repo_atom_folds_to_true_when_all_alive_match() {
        let shard = two_repo_shard();
        assert_eq!(simplify(Query::Repo("".to_string()), &shard), Query::Const(true));
    }

    #[test]
    fn repo_atom_folds_to_false_when_none_match() {
        let shard = two_repo_shard();
        assert_eq!(
            simplify(Query::Repo("missing".to_string()), &shard),
            Query::Const(false)
        );
    }

    #[test]
    fn repo_atom_stays_on_partial_match() {
        let shard = two_repo_shard();
        assert_eq!(
            simplify(Query::Repo("a".to_string()), &shard),
            Query::Repo("a".to_string())
        );
    }

    #[test]
    fn tombstoned_repos_are_not_counted() {
        let mut b = MemShardBuilder::new();
        b.add_repo(RepoMetadata {
            name: "a".to_string(),
            ..Default::default()
        });
        b.add_doc(DocSpec {
            name: "a.go".to_string(),
            content: b"x".to_vec(),
            ..Default::default()
        });
        b.add_repo(RepoMetadata {
            name: "b".to_string(),
            ..Default::default()
        });
        b.add_doc(DocSpec {
            name: "b.go".to_string(),
            content: b"y".to_vec(),
            ..Default::default()
        });
        b.tombstone(1);
        let shard = b.build();
        // "a" matches every live repo.
        assert_eq!(simplify(Query::Repo("a".to_string()), &shard), Query::Const(true));
    }

    #[test]
    fn repo_branches_on_single_repo_shard_becomes_branch_union() {
        let mut b = MemShardBuilder::new();
        b.add_repo(RepoMetadata {
            name: "repo1".to_string(),
            ..Default::default()
        });
        b.add_doc(DocSpec {
            name: "f.go".to_string(),
            content: b"x".to_vec(),
            ..Default::default()
        });
        let shard = b.build();

        let mut map = BTreeMap::new();
        map.insert("repo1".to_string(), vec!["main".to_string()]);
        assert_eq!(
            simplify(Query::RepoBranches(map), &shard),
            Query::Branch {
                pattern: "main".to_string(),
                exact: true
            }
        );

        let mut map = BTreeMap::new();
        map.insert("other".to_string(), vec!["main".to_string()]);
        assert_eq!(simplify(Query::RepoBranches(map), &shard), Query::Const(false));
    }

    #[test]
    fn repo_branches_multi_repo_without_any_listed_name_is_false() {
        let shard = two_repo_shard();
        let mut map = BTreeMap::new();
        map.insert("zzz".to_string(), vec!["main".to_string()]);
        assert_eq!(simplify(Query::RepoBranches(map), &shard), Query::Const(false));
    }

    #[test]
    fn unknown_language_folds_to_false() {
        let shard = two_repo_shard();
        assert_eq!(
            simplify(Query::Language("Go".to_string()), &shard),
            Query::Const(false)
        );
    }

    #[test]
    fn and_flattens_absorbs_and_dedupes() {
        let sub = Query::substring("needle");
        let q = Query::And(vec![
            Query::Const(true),
            Query::And(vec![sub.clone(), sub.clone()]),
        ]);
        assert_eq!(simplify_booleans(q), sub);

        let q = Query::And(vec![Query::substring("x"), Query::Const(false)]);
        assert_eq!(simplify_booleans(q), Query::Const(false));
    }

    #[test]
    fn or_flattens_absorbs_and_dedupes() {
        let q = Query::Or(vec![
            Query::Const(false),
            Query::Or(vec![Query::substring("x"), Query::Const(true)]),
        ]);
        assert_eq!(simplify_booleans(q), Query::Const(true));
    }

    #[test]
    fn not_folds_constants_and_double_negation() {
        assert_eq!(
            simplify_booleans(Query::Not(Box::new(Query::Const(false)))),
            Query::Const(true)
        );
        let sub = Query::substring("x");
        assert_eq!(
            simplify_booleans(Query::Not(Box::new(Query::Not(Box::new(sub.clone()))))),
            sub
        );
    }

    #[test]
    fn expand_untargeted_substring_into_both_forms() {
        let q = expand_file_content(Query::substring("x"));
        let Query::Or(children) = q else {
            panic!("expected Or, got {q:?}");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(
            &children[0],
            Query::Substring { file_name: true, content: false, .. }
        ));
        assert!(matches!(
            &children[1],
            Query::Substring { file_name: false, content: true, .. }
        ));
    }

    #[test]
    fn expand_leaves_targeted_atoms_alone() {
        let q = Query::Substring {
            pattern: "x".to_string(),
            case_sensitive: false,
            file_name: true,
            content: false,
        };
        assert_eq!(expand_file_content(q.clone()), q);
    }
}
