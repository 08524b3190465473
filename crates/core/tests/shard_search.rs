//! End-to-end searches against in-memory shards: simplification effects,
//! match-tree evaluation, candidate suppression, scoring, bounds, and the
//! list driver.

use std::collections::{BTreeMap, BTreeSet};

use codeshard_core::{
    list, search, simplify, CancelToken, DocSpec, DocSection, ListOptions, MemShard,
    MemShardBuilder, Query, RepoBranch, RepoMetadata, SearchOptions, SearchResult,
};

fn run(shard: &MemShard, q: &Query) -> SearchResult {
    search(shard, q, &SearchOptions::default(), &CancelToken::new()).unwrap()
}

fn file_names(res: &SearchResult) -> Vec<&str> {
    res.files.iter().map(|f| f.file_name.as_str()).collect()
}

fn repo(name: &str) -> RepoMetadata {
    RepoMetadata {
        name: name.to_string(),
        ..Default::default()
    }
}

fn doc(name: &str, content: &[u8]) -> DocSpec {
    DocSpec {
        name: name.to_string(),
        content: content.to_vec(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Repository atoms
// ---------------------------------------------------------------------------

#[test]
fn repo_atom_restricts_to_matching_repository() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("a"));
    b.add_doc(doc("a/one.txt", b"needle here\n"));
    b.add_repo(repo("b"));
    b.add_doc(doc("b/two.txt", b"needle here\n"));
    let shard = b.build();

    // Both repos alive: Repo("a") stays an atom and matches only repo a.
    let q = Query::And(vec![Query::substring("needle"), Query::Repo("a".to_string())]);
    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["a/one.txt"]);

    // A pattern hitting all alive repos folds to Const(true).
    assert_eq!(simplify(Query::Repo("".to_string()), &shard), Query::Const(true));
}

#[test]
fn tombstoned_repositories_never_match() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("live"));
    b.add_doc(doc("live.txt", b"needle\n"));
    b.add_repo(repo("dead"));
    b.add_doc(doc("dead.txt", b"needle\n"));
    b.tombstone(1);
    let shard = b.build();

    let res = run(&shard, &Query::substring("needle"));
    assert_eq!(file_names(&res), vec!["live.txt"]);
    for f in &res.files {
        assert_ne!(f.repository, "dead");
    }
}

#[test]
fn fully_tombstoned_shard_returns_nothing() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("only"));
    b.add_doc(doc("f.txt", b"needle\n"));
    b.tombstone(0);
    let shard = b.build();

    let res = run(&shard, &Query::substring("needle"));
    assert!(res.files.is_empty());
    assert_eq!(res.stats.file_count, 0);
    assert!(res.repo_urls.is_empty());
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

fn branched_shard() -> MemShard {
    let mut b = MemShardBuilder::new();
    b.add_repo(RepoMetadata {
        name: "repo1".to_string(),
        branches: vec![
            RepoBranch {
                name: "main".to_string(),
                version: "v-main".to_string(),
            },
            RepoBranch {
                name: "dev".to_string(),
                version: "v-dev".to_string(),
            },
        ],
        ..Default::default()
    });
    b.add_doc(DocSpec {
        branches: 0b01,
        ..doc("on_main.txt", b"shared text\n")
    });
    b.add_doc(DocSpec {
        branches: 0b10,
        ..doc("on_dev.txt", b"shared text\n")
    });
    b.add_doc(DocSpec {
        branches: 0b11,
        ..doc("on_both.txt", b"shared text\n")
    });
    b.build()
}

#[test]
fn repo_branches_on_single_repo_shard_selects_branch_documents() {
    let shard = branched_shard();
    let mut map = BTreeMap::new();
    map.insert("repo1".to_string(), vec!["main".to_string()]);
    let q = Query::And(vec![Query::substring("shared"), Query::RepoBranches(map)]);

    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["on_main.txt", "on_both.txt"]);
    // Fired branch atoms narrow the reported branches to the queried ones.
    for f in &res.files {
        assert_eq!(f.branches, vec!["main".to_string()]);
    }
    assert_eq!(res.files[0].version, "v-main");
}

#[test]
fn derived_branch_atoms_are_exact() {
    let mut b = MemShardBuilder::new();
    b.add_repo(RepoMetadata {
        name: "repo1".to_string(),
        branches: vec![RepoBranch {
            name: "maintenance".to_string(),
            version: String::new(),
        }],
        ..Default::default()
    });
    b.add_doc(doc("f.txt", b"text\n"));
    let shard = b.build();

    let mut map = BTreeMap::new();
    map.insert("repo1".to_string(), vec!["main".to_string()]);
    let res = run(&shard, &Query::RepoBranches(map));
    assert!(res.files.is_empty());

    // A plain branch atom keeps containment semantics.
    let res = run(
        &shard,
        &Query::Branch {
            pattern: "main".to_string(),
            exact: false,
        },
    );
    assert_eq!(res.files.len(), 1);
}

#[test]
fn unconstrained_query_reports_all_document_branches() {
    let shard = branched_shard();
    let res = run(&shard, &Query::substring("shared"));
    let both = res
        .files
        .iter()
        .find(|f| f.file_name == "on_both.txt")
        .unwrap();
    assert_eq!(both.branches, vec!["main".to_string(), "dev".to_string()]);
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

#[test]
fn unknown_language_short_circuits_the_shard() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("x.py", b"xyz\n"));
    let shard = b.build();

    let q = Query::And(vec![
        Query::substring("xyz"),
        Query::Language("Go".to_string()),
    ]);
    assert_eq!(simplify(q.clone(), &shard), Query::Const(false));

    let res = run(&shard, &q);
    assert!(res.files.is_empty());
    assert_eq!(res.stats.files_considered, 0);
}

#[test]
fn language_atom_selects_tagged_documents() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(DocSpec {
        language: Some("Go".to_string()),
        ..doc("a.go", b"package xyz\n")
    });
    b.add_doc(DocSpec {
        language: Some("Python".to_string()),
        ..doc("b.py", b"import xyz\n")
    });
    let shard = b.build();

    let q = Query::And(vec![
        Query::substring("xyz"),
        Query::Language("Go".to_string()),
    ]);
    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["a.go"]);
    assert_eq!(res.files[0].language, "Go");
}

// ---------------------------------------------------------------------------
// Regex lowering in action
// ---------------------------------------------------------------------------

#[test]
fn single_line_regex_requires_literals_on_one_line() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("same_line.txt", b"say foobar now\n"));
    b.add_doc(doc("split.txt", b"foo\nbar\n"));
    b.add_doc(doc("gap.txt", b"a foo then bar b\n"));
    let shard = b.build();

    let res = run(&shard, &Query::regexp("foo.*bar"));
    assert_eq!(file_names(&res), vec!["same_line.txt", "gap.txt"]);
}

#[test]
fn prefilter_pass_still_requires_the_regex_to_match() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    // Both literals on one line, but in the wrong order for the regex.
    b.add_doc(doc("reversed.txt", b"bar then foo\n"));
    let shard = b.build();

    let res = run(&shard, &Query::regexp("foo.*bar"));
    assert!(res.files.is_empty());
}

#[test]
fn dotall_regex_matches_across_lines() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("split.txt", b"foo\nbar\n"));
    let shard = b.build();

    let res = run(&shard, &Query::regexp("(?s)foo.*bar"));
    assert_eq!(file_names(&res), vec!["split.txt"]);
}

#[test]
fn literal_regex_is_executed_as_a_substring() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"one foobar two\n"));
    let shard = b.build();

    let by_regex = run(&shard, &Query::regexp("foobar"));
    let by_substr = run(&shard, &Query::substring("foobar"));
    assert_eq!(file_names(&by_regex), file_names(&by_substr));
    assert_eq!(
        by_regex.files[0].line_matches[0].line_fragments,
        by_substr.files[0].line_matches[0].line_fragments,
    );
}

#[test]
fn case_insensitive_regex_and_substring() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"say Hello big World now\n"));
    let shard = b.build();

    assert_eq!(run(&shard, &Query::substring("HELLO")).files.len(), 1);
    assert_eq!(run(&shard, &Query::regexp("hello.*world")).files.len(), 1);

    let cs = Query::Substring {
        pattern: "HELLO".to_string(),
        case_sensitive: true,
        file_name: false,
        content: false,
    };
    assert!(run(&shard, &cs).files.is_empty());
}

#[test]
fn malformed_regex_fails_the_call() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"text\n"));
    let shard = b.build();

    let err = search(
        &shard,
        &Query::regexp("fo(o"),
        &SearchOptions::default(),
        &CancelToken::new(),
    );
    assert!(err.is_err());
}

// ---------------------------------------------------------------------------
// Candidate handling
// ---------------------------------------------------------------------------

#[test]
fn content_matches_suppress_file_name_matches() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("README.md", b"see the README for details\n"));
    let shard = b.build();

    let res = run(&shard, &Query::substring("README"));
    assert_eq!(res.files.len(), 1);
    assert!(!res.files[0].line_matches.is_empty());
    for lm in &res.files[0].line_matches {
        assert!(!lm.file_name, "file-name candidate not suppressed");
    }
}

#[test]
fn file_name_only_match_reports_the_name_line() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("README.md", b"nothing relevant\n"));
    let shard = b.build();

    let res = run(&shard, &Query::substring("README"));
    assert_eq!(res.files.len(), 1);
    let lm = &res.files[0].line_matches[0];
    assert!(lm.file_name);
    assert_eq!(lm.line, b"README.md".to_vec());
    assert_eq!(lm.line_fragments[0].match_length, "README".len());
}

#[test]
fn structural_match_synthesizes_a_file_name_candidate() {
    let shard = branched_shard();
    let res = run(
        &shard,
        &Query::Branch {
            pattern: "dev".to_string(),
            exact: true,
        },
    );
    assert_eq!(file_names(&res), vec!["on_dev.txt", "on_both.txt"]);
    let lm = &res.files[0].line_matches[0];
    assert!(lm.file_name);
    assert_eq!(lm.line_fragments[0].match_length, lm.line.len());
}

#[test]
fn overlapping_candidates_merge_into_one_fragment() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"abcabcabc\n"));
    let shard = b.build();

    // Occurrences at 0 and 3 overlap as spans 0..6 and 3..9.
    let res = run(&shard, &Query::substring("abcabc"));
    let frags = &res.files[0].line_matches[0].line_fragments;
    assert_eq!(frags.len(), 1);
    assert_eq!(frags[0].offset, 0);
    assert_eq!(frags[0].match_length, 9);
}

#[test]
fn symbol_query_keeps_only_definition_spans() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(DocSpec {
        symbols: vec![DocSection { start: 3, end: 14 }],
        ..doc("lib.rs", b"fn parse_query() {}\nparse me too\n")
    });
    b.add_doc(doc("readme.txt", b"how to parse things\n"));
    let shard = b.build();

    let inner = Query::Substring {
        pattern: "parse".to_string(),
        case_sensitive: false,
        file_name: false,
        content: true,
    };
    let res = run(&shard, &Query::Symbol(Box::new(inner)));
    assert_eq!(file_names(&res), vec!["lib.rs"]);
    let lines = &res.files[0].line_matches;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].line_number, 1);
    assert_eq!(lines[0].line_fragments[0].line_offset, 3);
}

#[test]
fn symbol_over_composite_children_still_restricts_to_definitions() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(DocSpec {
        symbols: vec![DocSection { start: 3, end: 10 }],
        ..doc("lib.rs", b"fn foo_bar() {}\n")
    });
    b.add_doc(doc("plain.txt", b"foo and bar outside any symbol\n"));
    let shard = b.build();

    let atom = |pattern: &str| Query::Substring {
        pattern: pattern.to_string(),
        case_sensitive: false,
        file_name: false,
        content: true,
    };

    // Both legs of the AND occur in both documents, but only lib.rs has
    // them inside a symbol definition.
    let q = Query::Symbol(Box::new(Query::And(vec![atom("foo"), atom("bar")])));
    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["lib.rs"]);
    for lm in &res.files[0].line_matches {
        for frag in &lm.line_fragments {
            assert!(frag.offset >= 3 && frag.offset < 10);
        }
    }

    // Same for an OR child: the alternative that fired must still fall
    // inside a definition.
    let q = Query::Symbol(Box::new(Query::Or(vec![atom("foo"), atom("qux")])));
    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["lib.rs"]);
}

#[test]
fn nested_group_regex_keeps_single_line_semantics() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("joined.txt", b"foo x barbaz\n"));
    b.add_doc(doc("split.txt", b"foo x bar\nbaz\n"));
    let shard = b.build();

    // The captured group nests a same-line AND inside the outer one; only
    // the document with all three literals on one line can match.
    let res = run(&shard, &Query::regexp("(foo.*bar)baz"));
    assert_eq!(file_names(&res), vec!["joined.txt"]);
}

#[test]
fn not_excludes_matching_documents() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("both.txt", b"alpha beta\n"));
    b.add_doc(doc("alpha_only.txt", b"alpha gamma\n"));
    let shard = b.build();

    let q = Query::And(vec![
        Query::substring("alpha"),
        Query::Not(Box::new(Query::substring("beta"))),
    ]);
    let res = run(&shard, &q);
    assert_eq!(file_names(&res), vec!["alpha_only.txt"]);
}

// ---------------------------------------------------------------------------
// Scoring and ordering
// ---------------------------------------------------------------------------

#[test]
fn single_document_score_includes_full_doc_order_factor() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("main.txt", b"hello world\n"));
    let shard = b.build();

    let res = run(&shard, &Query::substring("hello"));
    assert_eq!(res.files.len(), 1);
    // word match 500 + line order 1, atom fraction 400 * 1/2 (the file-name
    // half of the expansion did not fire), doc order 10 * (1 - 0/1).
    assert_eq!(res.files[0].score, 711.0);
}

#[test]
fn files_are_sorted_by_descending_score() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    // Partial word match only.
    b.add_doc(doc("weak.txt", b"xhellox\n"));
    // Full word match, later in doc order.
    b.add_doc(doc("strong.txt", b"hello\n"));
    let shard = b.build();

    let res = run(&shard, &Query::substring("hello"));
    assert_eq!(file_names(&res), vec!["strong.txt", "weak.txt"]);
    assert!(res.files[0].score > res.files[1].score);
}

#[test]
fn debug_score_renders_breakdown_only_on_request() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"hello\n"));
    let shard = b.build();

    let plain = run(&shard, &Query::substring("hello"));
    assert!(plain.files[0].debug.is_empty());

    let opts = SearchOptions {
        debug_score: true,
        ..Default::default()
    };
    let debugged = search(&shard, &Query::substring("hello"), &opts, &CancelToken::new()).unwrap();
    assert!(debugged.files[0].debug.contains("fragment"));
}

// ---------------------------------------------------------------------------
// Bounds, cancellation, stats
// ---------------------------------------------------------------------------

fn five_match_shard() -> MemShard {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    for i in 0..5 {
        b.add_doc(doc(&format!("f{i}.txt"), b"needle\n"));
    }
    b.build()
}

#[test]
fn shard_max_match_count_stops_the_loop_and_books_skips() {
    let shard = five_match_shard();
    let opts = SearchOptions {
        shard_max_match_count: 1,
        ..Default::default()
    };
    let res = search(&shard, &Query::substring("needle"), &opts, &CancelToken::new()).unwrap();
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.stats.file_count, 1);
    assert_eq!(res.stats.files_skipped, 4);
}

#[test]
fn important_match_bound_stops_the_loop() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    for i in 0..3 {
        b.add_doc(DocSpec {
            symbols: vec![DocSection { start: 0, end: 6 }],
            ..doc(&format!("f{i}.rs"), b"needle\n")
        });
    }
    let shard = b.build();

    let opts = SearchOptions {
        shard_max_important_match: 1,
        ..Default::default()
    };
    let res = search(&shard, &Query::substring("needle"), &opts, &CancelToken::new()).unwrap();
    // The symbol hit scores far above the importance threshold.
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.stats.files_skipped, 2);
}

#[test]
fn stats_invariants_hold() {
    let shard = five_match_shard();
    let res = run(&shard, &Query::substring("needle"));
    assert!(res.stats.files_considered >= res.stats.file_count);
    let total_lines: u64 = res
        .files
        .iter()
        .map(|f| f.line_matches.len() as u64)
        .sum();
    assert_eq!(res.stats.match_count, total_lines);
    assert!(res.stats.ngram_matches >= 5);
    assert!(res.stats.content_bytes_loaded > 0);
}

#[test]
fn search_equals_search_of_simplified_query() {
    let shard = branched_shard();
    let q = Query::And(vec![
        Query::Or(vec![Query::substring("shared"), Query::Const(false)]),
        Query::Const(true),
        Query::Repo("repo1".to_string()),
    ]);
    let direct = run(&shard, &q);
    let pre_simplified = run(&shard, &simplify(q, &shard));
    assert_eq!(file_names(&direct), file_names(&pre_simplified));
    let scores = |r: &SearchResult| r.files.iter().map(|f| f.score).collect::<Vec<_>>();
    assert_eq!(scores(&direct), scores(&pre_simplified));
}

// ---------------------------------------------------------------------------
// Result extras
// ---------------------------------------------------------------------------

#[test]
fn whole_option_attaches_content() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"needle\n"));
    let shard = b.build();

    let opts = SearchOptions {
        whole: true,
        ..Default::default()
    };
    let res = search(&shard, &Query::substring("needle"), &opts, &CancelToken::new()).unwrap();
    assert_eq!(res.files[0].content.as_deref(), Some(b"needle\n".as_slice()));
}

#[test]
fn chunk_matches_replace_line_matches() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("r"));
    b.add_doc(doc("f.txt", b"ctx above\nneedle\nctx below\n"));
    let shard = b.build();

    let opts = SearchOptions {
        chunk_matches: true,
        num_context_lines: 1,
        ..Default::default()
    };
    let res = search(&shard, &Query::substring("needle"), &opts, &CancelToken::new()).unwrap();
    let f = &res.files[0];
    assert!(f.line_matches.is_empty());
    assert_eq!(f.chunk_matches.len(), 1);
    let chunk = &f.chunk_matches[0];
    assert_eq!(chunk.content, b"ctx above\nneedle\nctx below".to_vec());
    assert_eq!(chunk.ranges.len(), 1);
    assert_eq!(chunk.ranges[0].start.line_number, 2);
    assert_eq!(res.stats.match_count, 1);
}

#[test]
fn url_templates_cover_live_repos_and_sub_repos() {
    let mut sub_map = BTreeMap::new();
    sub_map.insert(
        "vendor/dep".to_string(),
        RepoMetadata {
            name: "dep".to_string(),
            file_url_template: "https://example.com/dep/{{.Path}}".to_string(),
            ..Default::default()
        },
    );
    let mut b = MemShardBuilder::new();
    b.add_repo(RepoMetadata {
        name: "main".to_string(),
        file_url_template: "https://example.com/main/{{.Path}}".to_string(),
        line_fragment_template: "#L{{.LineNumber}}".to_string(),
        sub_repo_map: sub_map,
        ..Default::default()
    });
    b.add_doc(doc("f.txt", b"needle\n"));
    let shard = b.build();

    let res = run(&shard, &Query::substring("needle"));
    assert_eq!(res.repo_urls.len(), 2);
    assert!(res.repo_urls.contains_key("main"));
    assert!(res.repo_urls.contains_key("dep"));
    assert_eq!(res.line_fragments.get("main").unwrap(), "#L{{.LineNumber}}");
}

#[test]
fn sub_repository_fields_resolve_from_the_map() {
    let mut sub_map = BTreeMap::new();
    sub_map.insert(
        "vendor/dep".to_string(),
        RepoMetadata {
            name: "dep".to_string(),
            ..Default::default()
        },
    );
    let mut b = MemShardBuilder::new();
    b.add_repo(RepoMetadata {
        name: "main".to_string(),
        sub_repo_map: sub_map,
        ..Default::default()
    });
    b.add_doc(doc("top.txt", b"needle\n"));
    b.add_doc(DocSpec {
        sub_repo_path: Some("vendor/dep".to_string()),
        ..doc("vendor/dep/inner.txt", b"needle\n")
    });
    let shard = b.build();

    let res = run(&shard, &Query::substring("needle"));
    let inner = res
        .files
        .iter()
        .find(|f| f.file_name == "vendor/dep/inner.txt")
        .unwrap();
    assert_eq!(inner.sub_repository_path, "vendor/dep");
    assert_eq!(inner.sub_repository_name, "dep");
    let top = res.files.iter().find(|f| f.file_name == "top.txt").unwrap();
    assert!(top.sub_repository_path.is_empty());
}

// ---------------------------------------------------------------------------
// List driver
// ---------------------------------------------------------------------------

#[test]
fn list_matches_the_repositories_search_finds() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("alpha-repo"));
    b.add_doc(doc("a.txt", b"alpha content\n"));
    b.add_repo(repo("beta-repo"));
    b.add_doc(doc("b.txt", b"beta content\n"));
    let shard = b.build();

    let q = Query::substring("alpha");
    let listed = list(&shard, &q, &ListOptions::default(), &CancelToken::new()).unwrap();
    let listed_names: BTreeSet<String> = listed
        .repos
        .iter()
        .map(|e| e.repository.name.clone())
        .collect();

    let searched = run(&shard, &q);
    let searched_names: BTreeSet<String> =
        searched.files.iter().map(|f| f.repository.clone()).collect();

    assert_eq!(listed_names, searched_names);
    assert_eq!(listed_names, BTreeSet::from(["alpha-repo".to_string()]));
}

#[test]
fn list_const_false_is_empty() {
    let shard = five_match_shard();
    let q = Query::Language("Cobol".to_string());
    let listed = list(&shard, &q, &ListOptions::default(), &CancelToken::new()).unwrap();
    assert!(listed.repos.is_empty());
    assert!(listed.minimal.is_empty());
}

#[test]
fn list_skips_tombstoned_repositories_even_for_const_true() {
    let mut b = MemShardBuilder::new();
    b.add_repo(repo("live"));
    b.add_doc(doc("a.txt", b"x\n"));
    b.add_repo(repo("dead"));
    b.add_doc(doc("b.txt", b"x\n"));
    b.tombstone(1);
    let shard = b.build();

    let listed = list(
        &shard,
        &Query::Const(true),
        &ListOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(listed.repos.len(), 1);
    assert_eq!(listed.repos[0].repository.name, "live");
}
