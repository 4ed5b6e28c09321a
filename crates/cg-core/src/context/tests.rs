use cg_config::EngineOptions;
use cg_grammar::{ContextualTest, Grammar, TagId, TagStore};

use crate::cohort::CohortId;
use crate::context::ContextEval;
use crate::dep;
use crate::reading::Reading;
use crate::window::{SingleWindow, WindowStore};

/// One single-reading cohort per (wordform, tags) pair.
fn window_of(
    tags: &mut TagStore,
    store: &mut WindowStore,
    words: &[(&str, &[&str])],
) -> SingleWindow {
    let mut sw = store.new_window();
    for (wf, reading) in words {
        let wfid = tags.intern(&format!("\"<{wf}>\""));
        let id = store.alloc_cohort(sw.number, wfid);
        let ids: Vec<TagId> = reading.iter().map(|t| tags.intern(t)).collect();
        if let Some(c) = store.cohort_mut(id) {
            c.append_reading(Reading::from_tags(tags, ids));
        }
        sw.cohorts.push(id);
    }
    store.renumber(&sw);
    sw
}

fn det_n_grammar(tags: &mut TagStore) -> Grammar {
    let mut g = Grammar::new(tags);
    g.add_list_set(tags, "Det", &[&["det"]]);
    g.add_list_set(tags, "N", &[&["n"]]);
    g.add_list_set(tags, "Fin", &[&["fin"]]);
    g.reindex(tags);
    g
}

fn set(g: &Grammar, name: &str) -> cg_grammar::SetId {
    g.set_by_name(name).unwrap()
}

#[test]
fn positional_offsets_resolve_neighbors() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("the", &["det"]), ("cat", &["n"])]);
    let (the, cat) = (sw.cohorts[0], sw.cohorts[1]);

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    assert_eq!(ev.run_test(the, &ContextualTest::at(1, set(&g, "N"))), Some(cat));
    assert_eq!(ev.run_test(cat, &ContextualTest::at(-1, set(&g, "Det"))), Some(the));
    assert_eq!(ev.run_test(the, &ContextualTest::at(1, set(&g, "Det"))), None);
    assert_eq!(ev.run_test(the, &ContextualTest::at(5, set(&g, "N"))), None);
}

#[test]
fn inverted_tests_accept_missing_positions() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("cat", &["n"])]);
    let cat = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let mut t = ContextualTest::at(1, set(&g, "Det"));
    t.flags.not_ = true;
    // Nothing at +1, so NOT succeeds and reports the origin.
    assert_eq!(ev.run_test(cat, &t), Some(cat));

    let mut neg = ContextualTest::at(1, set(&g, "N"));
    neg.flags.negate = true;
    assert_eq!(ev.run_test(cat, &neg), Some(cat));
}

#[test]
fn scans_stop_at_barriers() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[
            ("the", &["det"]),
            ("is", &["fin"]),
            ("cat", &["n"]),
            ("dog", &["n"]),
        ],
    );
    let the = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    // Unbarred scan reaches the first noun.
    let scan = ContextualTest::scan(1, set(&g, "N"));
    assert_eq!(ev.run_test(the, &scan), Some(sw.cohorts[2]));
    // A finite-verb barrier blocks before any noun is reached.
    let barred = ContextualTest::scan(1, set(&g, "N")).with_barrier(set(&g, "Fin"));
    assert_eq!(ev.run_test(the, &barred), None);
    // Leftward scan from the far end still finds the determiner.
    let back = ContextualTest::scan(-1, set(&g, "Det"));
    assert_eq!(ev.run_test(sw.cohorts[3], &back), Some(the));
}

#[test]
fn exhaustive_scans_never_pass_a_barrier() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[
            ("one", &["num"]),
            ("two", &["num"]),
            ("three", &["num"]),
            ("is", &["fin"]),
            ("cat", &["n"]),
        ],
    );

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let barred = ContextualTest::scan_all(1, set(&g, "N")).with_barrier(set(&g, "Fin"));
    // Barrier right next to the origin.
    assert_eq!(ev.run_test(sw.cohorts[2], &barred), None);
    // Barrier three steps out, noun behind it.
    assert_eq!(ev.run_test(sw.cohorts[0], &barred), None);
    // No barrier cohort on the path at all.
    let open = ContextualTest::scan_all(1, set(&g, "N")).with_barrier(set(&g, "Det"));
    assert_eq!(ev.run_test(sw.cohorts[0], &open), Some(sw.cohorts[4]));
}

#[test]
fn leftward_exhaustive_scans_respect_barriers() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[
            ("dog", &["n"]),
            ("was", &["fin"]),
            ("one", &["num"]),
            ("two", &["num"]),
            ("three", &["num"]),
        ],
    );

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let barred = ContextualTest::scan_all(-1, set(&g, "N")).with_barrier(set(&g, "Fin"));
    // Barrier right next to the origin.
    assert_eq!(ev.run_test(sw.cohorts[2], &barred), None);
    // Barrier three steps out, noun behind it.
    assert_eq!(ev.run_test(sw.cohorts[4], &barred), None);
    // No barrier cohort on the path at all.
    let open = ContextualTest::scan_all(-1, set(&g, "N")).with_barrier(set(&g, "Det"));
    assert_eq!(ev.run_test(sw.cohorts[4], &open), Some(sw.cohorts[0]));
}

#[test]
fn careful_barriers_halt_only_on_unambiguous_cohorts() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[("the", &["det"]), ("saw", &["fin"]), ("cat", &["n"])],
    );
    let (the, saw, cat) = (sw.cohorts[0], sw.cohorts[1], sw.cohorts[2]);

    let mut barred = ContextualTest::scan_all(1, set(&g, "N"));
    barred.cbarrier = Some(set(&g, "Fin"));
    {
        // Every reading of "saw" is finite, so the careful barrier halts.
        let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
        assert_eq!(ev.run_test(the, &barred), None);
    }

    // An extra determiner reading makes "saw" ambiguous; the careful
    // barrier no longer fires and the scan reaches the noun.
    let det = tags.intern("det");
    if let Some(c) = store.cohort_mut(saw) {
        let r = Reading::from_tags(&tags, [det]);
        c.append_reading(r);
    }
    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    assert_eq!(ev.run_test(the, &barred), Some(cat));
}

#[test]
fn linked_tests_chain_from_the_match() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[("the", &["det"]), ("cat", &["n"]), ("runs", &["fin"])],
    );
    let the = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let good = ContextualTest::at(1, set(&g, "N"))
        .linked_to(ContextualTest::at(1, set(&g, "Fin")));
    // The whole chain reports the first link's cohort.
    assert_eq!(ev.run_test(the, &good), Some(sw.cohorts[1]));

    let bad = ContextualTest::at(1, set(&g, "N"))
        .linked_to(ContextualTest::at(1, set(&g, "Det")));
    assert_eq!(ev.run_test(the, &bad), None);
}

#[test]
fn careful_tests_demand_unambiguity() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("the", &["det"]), ("saw", &["n"])]);
    let the = sw.cohorts[0];
    // Make "saw" ambiguous between noun and finite verb.
    let saw = sw.cohorts[1];
    let fin = tags.intern("fin");
    if let Some(c) = store.cohort_mut(saw) {
        let r = Reading::from_tags(&tags, [fin]);
        c.append_reading(r);
    }

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let plain = ContextualTest::at(1, set(&g, "N"));
    let mut careful = ContextualTest::at(1, set(&g, "N"));
    careful.flags.careful = true;
    assert_eq!(ev.run_test(the, &plain), Some(saw));
    assert_eq!(ev.run_test(the, &careful), None);
}

#[test]
fn dependency_tests_walk_the_graph() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(
        &mut tags,
        &mut store,
        &[("the", &["det"]), ("cat", &["n"]), ("runs", &["fin"])],
    );
    let (the, cat, runs) = (sw.cohorts[0], sw.cohorts[1], sw.cohorts[2]);
    assert!(dep::attach(&mut store, &sw, &opts, cat, the, false, false));
    assert!(dep::attach(&mut store, &sw, &opts, runs, cat, false, false));

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let mut parent = ContextualTest::at(0, set(&g, "N"));
    parent.flags.dep_parent = true;
    assert_eq!(ev.run_test(the, &parent), Some(cat));

    // Deep: the grandparent is reachable too.
    let mut grand = ContextualTest::at(0, set(&g, "Fin"));
    grand.flags.dep_parent = true;
    grand.flags.deep = true;
    assert_eq!(ev.run_test(the, &grand), Some(runs));
    // Without deep, only the immediate parent is considered.
    let mut shallow = ContextualTest::at(0, set(&g, "Fin"));
    shallow.flags.dep_parent = true;
    assert_eq!(ev.run_test(the, &shallow), None);

    let mut child = ContextualTest::at(0, set(&g, "Det"));
    child.flags.dep_child = true;
    assert_eq!(ev.run_test(cat, &child), Some(the));
}

#[test]
fn spanning_scans_cross_into_the_previous_window() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let prev = window_of(&mut tags, &mut store, &[("the", &["det"]), ("end", &["n"])]);
    let the = prev.cohorts[0];
    store.retire(prev);
    let sw = window_of(&mut tags, &mut store, &[("it", &["n"]), ("ran", &["fin"])]);
    let it = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let plain = ContextualTest::scan(-1, set(&g, "Det"));
    assert_eq!(ev.run_test(it, &plain), None);
    let mut spanning = ContextualTest::scan(-1, set(&g, "Det"));
    spanning.flags.span_left = true;
    assert_eq!(ev.run_test(it, &spanning), Some(the));
}

#[test]
fn graph_edges_into_other_windows_need_span_flags() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let prev = window_of(&mut tags, &mut store, &[("the", &["det"])]);
    let the = prev.cohorts[0];
    store.retire(prev);
    let sw = window_of(&mut tags, &mut store, &[("cat", &["n"])]);
    let cat = sw.cohorts[0];
    assert!(dep::attach(&mut store, &sw, &opts, the, cat, false, false));

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let mut parent = ContextualTest::at(0, set(&g, "Det"));
    parent.flags.dep_parent = true;
    // The parent lives in a finished window to the left.
    assert_eq!(ev.run_test(cat, &parent), None);
    parent.flags.span_left = true;
    assert_eq!(ev.run_test(cat, &parent), Some(the));
    // span_right alone does not open the left side.
    parent.flags.span_left = false;
    parent.flags.span_right = true;
    assert_eq!(ev.run_test(cat, &parent), None);
    parent.flags.span_both = true;
    assert_eq!(ev.run_test(cat, &parent), Some(the));
}

#[test]
fn or_alternatives_take_the_first_success() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("the", &["det"]), ("cat", &["n"])]);
    let the = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let t = ContextualTest {
        ors: vec![
            ContextualTest::at(1, set(&g, "Fin")),
            ContextualTest::at(1, set(&g, "N")),
        ],
        ..ContextualTest::default()
    };
    assert_eq!(ev.run_test(the, &t), Some(sw.cohorts[1]));
}

#[test]
fn attach_flag_captures_the_matched_cohort() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("the", &["det"]), ("cat", &["n"])]);
    let the = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let mut t = ContextualTest::at(1, set(&g, "N"));
    t.flags.attach_to = true;
    assert_eq!(ev.run_test(the, &t), Some(sw.cohorts[1]));
    assert_eq!(ev.attach, Some(sw.cohorts[1]));
}

#[test]
fn self_excluding_graph_modes_ignore_missing_edges() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("cat", &["n"])]);
    let cat = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let mut t = ContextualTest::at(0, set(&g, "N"));
    t.flags.dep_parent = true;
    assert_eq!(ev.run_test(cat, &t), None);
    // With SELF the origin itself is a candidate.
    t.flags.self_ = true;
    assert_eq!(ev.run_test(cat, &t), Some(cat));
}

#[test]
fn templates_are_resolved_through_the_grammar() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    g.add_list_set(&mut tags, "N", &[&["n"]]);
    let n = g.set_by_name("N").unwrap();
    g.templates
        .insert("noun-right".to_owned(), ContextualTest::at(1, n));
    g.reindex(&tags);
    let opts = EngineOptions::default();
    let mut store = WindowStore::new(2);
    let sw = window_of(&mut tags, &mut store, &[("the", &["det"]), ("cat", &["n"])]);
    let the = sw.cohorts[0];

    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let t = ContextualTest {
        template: Some("noun-right".to_owned()),
        ..ContextualTest::default()
    };
    assert_eq!(ev.run_test(the, &t), Some(sw.cohorts[1]));
}

#[test]
fn unknown_cohorts_fail_quietly() {
    let mut tags = TagStore::new();
    let g = det_n_grammar(&mut tags);
    let opts = EngineOptions::default();
    let store = WindowStore::new(2);
    let sw = SingleWindow::default();
    let mut ev = ContextEval::new(&g, &tags, &opts, &store, &sw);
    let t = ContextualTest::at(0, set(&g, "N"));
    assert_eq!(ev.run_test(CohortId(99), &t), None);
}
