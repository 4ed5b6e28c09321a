use cg_config::EngineOptions;
use cg_grammar::{ContextualTest, Grammar, Rule, RuleKind, TagId, TagStore};

use crate::engine::{Engine, EngineStatus};
use crate::reading::Reading;
use crate::window::{SingleWindow, WindowStore};

fn window_of(
    tags: &mut TagStore,
    store: &mut WindowStore,
    words: &[(&str, &[&[&str]])],
) -> SingleWindow {
    let mut sw = store.new_window();
    for (wf, readings) in words {
        let wfid = tags.intern(&format!("\"<{wf}>\""));
        let id = store.alloc_cohort(sw.number, wfid);
        if let Some(c) = store.cohort_mut(id) {
            for r in *readings {
                let ids: Vec<TagId> = r.iter().map(|t| tags.intern(t)).collect();
                c.append_reading(Reading::from_tags(tags, ids));
            }
        }
        sw.cohorts.push(id);
    }
    store.renumber(&sw);
    sw
}

fn run(
    g: &Grammar,
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
) -> EngineStatus {
    g.verify(tags).unwrap();
    let opts = EngineOptions::default();
    Engine::new(g, &opts).run_window(tags, store, sw).unwrap()
}

fn reading_texts(tags: &TagStore, r: &Reading) -> Vec<String> {
    r.tags_list.iter().map(|t| tags.get(*t).text.clone()).collect()
}

#[test]
fn select_keeps_hits_and_traces_the_rest() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let det = g.add_list_set(&mut tags, "Det", &[&["det"]]);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Select, n);
    r.tests.push(ContextualTest::at(-1, det));
    let rid = g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(
        &mut tags,
        &mut store,
        &[("the", &[&["det"]]), ("saw", &[&["\"saw\"", "n"], &["\"see\"", "v"]])],
    );
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Changed);

    let saw = store.cohort(sw.cohorts[1]).unwrap();
    assert_eq!(saw.readings.len(), 1);
    assert!(saw.readings[0].has(tags.find("n").unwrap()));
    assert_eq!(saw.deleted.len(), 1);
    assert_eq!(saw.deleted[0].hit_by, vec![rid]);
    assert_eq!(saw.readings[0].hit_by, vec![rid]);
}

#[test]
fn remove_never_empties_a_cohort() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    g.add_rule(0, Rule::new(g.next_rule_id(), RuleKind::Remove, n));
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Unchanged);
    assert_eq!(store.cohort(sw.cohorts[0]).unwrap().readings.len(), 1);
}

#[test]
fn unsafe_remove_may_empty() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Remove, n);
    r.flags.unsafe_removal = true;
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Changed);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    assert!(c.readings.is_empty());
    assert_eq!(c.deleted.len(), 1);
}

#[test]
fn delayed_rules_route_to_the_delayed_list() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let v = g.add_list_set(&mut tags, "V", &[&["v"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Remove, v);
    r.flags.delayed = true;
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("saw", &[&["n"], &["v"]])]);
    run(&g, &mut tags, &mut store, &mut sw);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    assert_eq!(c.readings.len(), 1);
    assert!(c.deleted.is_empty());
    assert_eq!(c.delayed.len(), 1);
}

#[test]
fn add_reaches_a_fixpoint() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Add, n);
    r.maplist.push(tags.intern("checked"));
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Changed);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    assert!(c.readings[0].has(tags.find("checked").unwrap()));
    assert_eq!(c.readings[0].tags_list.len(), 2);
}

#[test]
fn iff_selects_on_hit_and_removes_on_miss() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let det = g.add_list_set(&mut tags, "Det", &[&["det"]]);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Iff, n);
    r.tests.push(ContextualTest::at(-1, det));
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut with_det = window_of(
        &mut tags,
        &mut store,
        &[("the", &[&["det"]]), ("saw", &[&["n"], &["v"]])],
    );
    run(&g, &mut tags, &mut store, &mut with_det);
    let c = store.cohort(with_det.cohorts[1]).unwrap();
    assert!(c.readings[0].has(tags.find("n").unwrap()));
    assert_eq!(c.readings.len(), 1);

    let mut without = window_of(&mut tags, &mut store, &[("saw", &[&["n"], &["v"]])]);
    run(&g, &mut tags, &mut store, &mut without);
    let c = store.cohort(without.cohorts[0]).unwrap();
    assert_eq!(c.readings.len(), 1);
    assert!(c.readings[0].has(tags.find("v").unwrap()));
}

#[test]
fn map_conflicts_are_fatal() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut a = Rule::new(g.next_rule_id(), RuleKind::Map, n);
    a.maplist.push(tags.intern("@SUBJ"));
    g.add_rule(0, a);
    let mut b = Rule::new(g.next_rule_id(), RuleKind::Map, n);
    b.maplist.push(tags.intern("@OBJ"));
    g.add_rule(0, b);
    g.reindex(&tags);
    g.verify(&tags).unwrap();

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    let opts = EngineOptions::default();
    let err = Engine::new(&g, &opts).run_window(&mut tags, &mut store, &mut sw);
    assert!(err.is_err());
}

#[test]
fn substitute_splices_in_place() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Substitute, n);
    r.sublist.push(tags.intern("sg"));
    r.maplist.push(tags.intern("pl"));
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cats", &[&["\"cat\"", "n", "sg", "def"]])]);
    run(&g, &mut tags, &mut store, &mut sw);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    assert_eq!(
        reading_texts(&tags, &c.readings[0]),
        vec!["\"cat\"", "n", "pl", "def"]
    );
}

#[test]
fn append_adds_one_reading_only_once() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::Append, n);
    r.maplist.push(tags.intern("\"cat\""));
    r.maplist.push(tags.intern("n"));
    r.maplist.push(tags.intern("pl"));
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cats", &[&["\"cat\"", "n", "sg"]])]);
    run(&g, &mut tags, &mut store, &mut sw);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    // The fixpoint loop must not duplicate the appended reading.
    assert_eq!(c.readings.len(), 2);
}

#[test]
fn delimit_cuts_the_window() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let dot = g.add_list_set(&mut tags, "Dot", &[&["\"<.>\""]]);
    g.add_rule(0, Rule::new(g.next_rule_id(), RuleKind::Delimit, dot));
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(
        &mut tags,
        &mut store,
        &[
            ("one", &[&["n"]]),
            (".", &[&["sent"]]),
            ("two", &[&["n"]]),
        ],
    );
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Delimited);
    assert_eq!(sw.len(), 2);
    // The cut point carries the window-end tag now.
    let dot_c = store.cohort(sw.cohorts[1]).unwrap();
    assert!(dot_c.readings[0].has(tags.find("<<<").unwrap()));
    // The remainder waits at the front of the input buffer, behind a fresh
    // start marker.
    let next = store.next.front().unwrap();
    assert!(next.closed);
    assert_eq!(next.len(), 2);
    let marker = store.cohort(next.cohorts[0]).unwrap();
    assert_eq!(tags.get(marker.wordform).text, ">>>");
}

#[test]
fn rem_cohort_reparents_children() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let filler = g.add_list_set(&mut tags, "Filler", &[&["filler"]]);
    g.add_rule(0, Rule::new(g.next_rule_id(), RuleKind::RemCohort, filler));
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(
        &mut tags,
        &mut store,
        &[("a", &[&["n"]]), ("uh", &[&["filler"]]), ("b", &[&["n"]])],
    );
    let (a, uh, b) = (sw.cohorts[0], sw.cohorts[1], sw.cohorts[2]);
    let opts = EngineOptions::default();
    assert!(crate::dep::attach(&mut store, &sw, &opts, a, uh, false, false));
    assert!(crate::dep::attach(&mut store, &sw, &opts, uh, b, false, false));

    run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(sw.cohorts, vec![a, b]);
    assert!(!store.contains(uh));
    // b was re-parented onto the removed cohort's parent.
    assert_eq!(store.cohort(b).unwrap().dep_parent, Some(a));
}

#[test]
fn add_cohort_inserts_next_to_the_target() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let y = g.add_list_set(&mut tags, "Y", &[&["y"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::AddCohort, n);
    r.maplist.push(tags.intern("\"<x>\""));
    r.maplist.push(tags.intern("y"));
    let mut guard = ContextualTest::at(1, y);
    guard.flags.not_ = true;
    r.tests.push(guard);
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Changed);
    assert_eq!(sw.len(), 2);
    let added = store.cohort(sw.cohorts[1]).unwrap();
    assert_eq!(tags.get(added.wordform).text, "\"<x>\"");
    assert!(added.readings[0].has(tags.find("y").unwrap()));
}

#[test]
fn set_parent_attaches_through_the_anchor_test() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let det = g.add_list_set(&mut tags, "Det", &[&["det"]]);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let mut r = Rule::new(g.next_rule_id(), RuleKind::SetParent, det);
    r.dep_target = Some(ContextualTest::at(1, n));
    g.add_rule(0, r);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("the", &[&["det"]]), ("cat", &[&["n"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Changed);
    let the = store.cohort(sw.cohorts[0]).unwrap();
    assert_eq!(the.dep_parent, Some(sw.cohorts[1]));
}

#[test]
fn sections_run_in_order() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let n = g.add_list_set(&mut tags, "N", &[&["n"]]);
    let marked = g.add_list_set(&mut tags, "Marked", &[&["marked"]]);
    // Section 1 depends on what section 0 added.
    let mut first = Rule::new(g.next_rule_id(), RuleKind::Add, n);
    first.maplist.push(tags.intern("marked"));
    g.add_rule(0, first);
    let mut second = Rule::new(g.next_rule_id(), RuleKind::Add, marked);
    second.maplist.push(tags.intern("twice"));
    g.add_rule(1, second);
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"]])]);
    run(&g, &mut tags, &mut store, &mut sw);
    let c = store.cohort(sw.cohorts[0]).unwrap();
    assert!(c.readings[0].has(tags.find("marked").unwrap()));
    assert!(c.readings[0].has(tags.find("twice").unwrap()));
}

#[test]
fn no_matching_rule_leaves_the_window_unchanged() {
    let mut tags = TagStore::new();
    let mut g = Grammar::new(&mut tags);
    let adj = g.add_list_set(&mut tags, "Adj", &[&["adj"]]);
    g.add_rule(0, Rule::new(g.next_rule_id(), RuleKind::Remove, adj));
    g.reindex(&tags);

    let mut store = WindowStore::new(2);
    let mut sw = window_of(&mut tags, &mut store, &[("cat", &[&["n"], &["v"]])]);
    let status = run(&g, &mut tags, &mut store, &mut sw);
    assert_eq!(status, EngineStatus::Unchanged);
    assert_eq!(store.cohort(sw.cohorts[0]).unwrap().readings.len(), 2);
}
