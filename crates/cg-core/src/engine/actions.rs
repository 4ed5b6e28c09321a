use std::collections::BTreeSet;

use cg_config::EngineOptions;
use cg_grammar::{Grammar, Rule, RuleKind, TagId, TagStore};
use orion_error::StructError;

use crate::cohort::CohortId;
use crate::dep;
use crate::error::{CoreReason, CoreResult};
use crate::reading::Reading;
use crate::window::{SingleWindow, WindowStore};

// ---------------------------------------------------------------------------
// Apply phase
// ---------------------------------------------------------------------------

/// Everything the immutable test phase recorded about one firing cohort.
pub(crate) struct Hit {
    pub cohort: CohortId,
    /// Per active reading: did it match the rule's target set?
    pub matched: Vec<bool>,
    /// Whether the contextual tests held (only Iff acts on a miss).
    pub tests_passed: bool,
    /// Anchor cohort for anchored kinds.
    pub anchor: Option<CohortId>,
    /// Regex captures for varstring substitution.
    pub captures: Vec<String>,
}

/// Apply one hit. Returns (changed, delimited).
pub(crate) fn apply(
    grammar: &Grammar,
    opts: &EngineOptions,
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    rule: &Rule,
    hit: &Hit,
) -> CoreResult<(bool, bool)> {
    let changed = match rule.kind {
        RuleKind::Select => select(store, rule, hit),
        RuleKind::Remove => remove(store, rule, hit),
        RuleKind::Iff => {
            if hit.tests_passed {
                select(store, rule, hit)
            } else {
                remove(store, rule, hit)
            }
        }
        RuleKind::Add => add(tags, store, rule, hit),
        RuleKind::Map => return Ok((map(tags, store, rule, hit)?, false)),
        RuleKind::Unmap => unmap(tags, store, rule, hit),
        RuleKind::Replace => replace(tags, store, rule, hit),
        RuleKind::Substitute => substitute(tags, store, rule, hit),
        RuleKind::Append => append(tags, store, rule, hit),
        RuleKind::Copy => copy(tags, store, rule, hit),
        RuleKind::Delimit => {
            let cut = delimit(grammar, tags, store, sw, hit);
            return Ok((cut, cut));
        }
        RuleKind::RemCohort => remove_cohort(store, sw, hit.cohort),
        RuleKind::AddCohort => add_cohort(tags, store, sw, rule, hit),
        RuleKind::Move => move_cohort(store, sw, rule, hit),
        RuleKind::Switch => switch_cohorts(store, sw, hit),
        RuleKind::MergeCohorts => merge_cohorts(tags, store, sw, rule, hit),
        RuleKind::SplitCohort => split_cohort(tags, store, sw, rule, hit),
        RuleKind::SetParent => match hit.anchor {
            Some(a) => dep::attach(
                store,
                sw,
                opts,
                a,
                hit.cohort,
                rule.flags.allow_loop,
                rule.flags.allow_cross,
            ),
            None => false,
        },
        RuleKind::SetChild => match hit.anchor {
            Some(a) => dep::attach(
                store,
                sw,
                opts,
                hit.cohort,
                a,
                rule.flags.allow_loop,
                rule.flags.allow_cross,
            ),
            None => false,
        },
        RuleKind::RemParent => dep::detach(store, hit.cohort),
        RuleKind::AddRelation | RuleKind::SetRelation | RuleKind::RemRelation => {
            relation(tags, store, rule, hit)
        }
    };
    Ok((changed, false))
}

// ---------------------------------------------------------------------------
// Varstrings
// ---------------------------------------------------------------------------

/// Substitute `$1`..`$9` from the hit's captures and intern the result.
/// Plain tags pass through unchanged.
fn resolve_tag(tags: &mut TagStore, tid: TagId, caps: &[String]) -> TagId {
    if !tags.get(tid).flags.varstring {
        return tid;
    }
    let mut text = tags.get(tid).text.clone();
    for (i, cap) in caps.iter().enumerate().take(9) {
        text = text.replace(&format!("${}", i + 1), cap);
    }
    tags.intern(&text)
}

fn resolve_tags(tags: &mut TagStore, list: &[TagId], caps: &[String]) -> Vec<TagId> {
    list.iter().map(|t| resolve_tag(tags, *t, caps)).collect()
}

// ---------------------------------------------------------------------------
// Reading-level actions
// ---------------------------------------------------------------------------

fn select(store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() || hit.matched.iter().all(|m| *m) {
        return false;
    }
    let old = std::mem::take(&mut c.readings);
    let mut dropped = Vec::new();
    for (mut r, m) in old.into_iter().zip(hit.matched.iter()) {
        if *m {
            r.hit_by.push(rule.id);
            c.readings.push(r);
        } else {
            dropped.push(r);
        }
    }
    route_dropped(rule, c, dropped);
    true
}

fn remove(store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let n = hit.matched.iter().filter(|m| **m).count();
    if n == 0 {
        return false;
    }
    // Removing the last reading needs an explicit unsafe marker.
    if n == c.readings.len() && (!rule.flags.unsafe_removal || rule.flags.safe) {
        return false;
    }
    let old = std::mem::take(&mut c.readings);
    let mut dropped = Vec::new();
    for (r, m) in old.into_iter().zip(hit.matched.iter()) {
        if *m {
            dropped.push(r);
        } else {
            c.readings.push(r);
        }
    }
    route_dropped(rule, c, dropped);
    true
}

fn route_dropped(rule: &Rule, c: &mut crate::cohort::Cohort, dropped: Vec<Reading>) {
    for mut r in dropped {
        r.hit_by.push(rule.id);
        if rule.flags.ignored {
            c.ignored.push(r);
        } else if rule.flags.delayed {
            c.delayed.push(r);
        } else {
            c.deleted.push(r);
        }
    }
}

fn add(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let mut changed = false;
    for (r, m) in c.readings.iter_mut().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        let mut this = false;
        for &t in &list {
            this |= r.add_tag(tags, t);
        }
        if this {
            r.hit_by.push(rule.id);
            changed = true;
        }
    }
    changed
}

/// MAP adds its tags and locks the reading's grammatical function. A second
/// mapping onto an already-mapped reading is a grammar bug and fatal.
/// Additional mapping tags in one list multiply the reading.
fn map(
    tags: &mut TagStore,
    store: &mut WindowStore,
    rule: &Rule,
    hit: &Hit,
) -> CoreResult<bool> {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let (mappings, plain): (Vec<TagId>, Vec<TagId>) =
        list.into_iter().partition(|t| tags.get(*t).flags.mapping);

    let Some(c) = store.cohort_mut(hit.cohort) else {
        return Ok(false);
    };
    if c.readings.len() != hit.matched.len() {
        return Ok(false);
    }
    let mut hashes: BTreeSet<u64> = c.readings.iter().map(|r| r.hash).collect();
    let mut clones: Vec<Reading> = Vec::new();
    let mut changed = false;

    for (r, m) in c.readings.iter_mut().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        for &t in &plain {
            changed |= r.add_tag(tags, t);
        }
        let Some((&first, rest)) = mappings.split_first() else {
            continue;
        };
        match r.mapping {
            Some(have) if have == first => {}
            Some(_) => {
                return StructError::from(CoreReason::RuleExec)
                    .with_detail(format!(
                        "rule {} (line {}): cohort {} reading is already mapped",
                        rule.id.0, rule.line, hit.cohort
                    ))
                    .err();
            }
            None => {
                changed |= r.add_tag(tags, first);
            }
        }
        r.hit_by.push(rule.id);
        for &extra in rest {
            let mut cl = r.clone();
            cl.remove_tag(tags, first);
            cl.add_tag(tags, extra);
            if hashes.insert(cl.hash) {
                clones.push(cl);
            }
        }
    }
    if !clones.is_empty() {
        changed = true;
        c.readings.extend(clones);
    }
    Ok(changed)
}

fn unmap(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let mut changed = false;
    for (r, m) in c.readings.iter_mut().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        if let Some(mtag) = r.mapping
            && r.remove_tag(tags, mtag)
        {
            r.hit_by.push(rule.id);
            changed = true;
        }
    }
    changed
}

/// REPLACE keeps the baseform and swaps everything else for the tag list.
fn replace(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let mut changed = false;
    for (r, m) in c.readings.iter_mut().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        let mut fresh: Vec<TagId> = Vec::with_capacity(list.len() + 1);
        fresh.extend(r.baseform);
        fresh.extend(list.iter().copied());
        if fresh == r.tags_list {
            continue;
        }
        r.tags_list = fresh;
        r.rehash(tags);
        r.hit_by.push(rule.id);
        changed = true;
    }
    changed
}

/// SUBSTITUTE removes the search tags and splices the replacements in at the
/// position of the first removed tag. Readings without any search tag are
/// untouched.
fn substitute(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let search = resolve_tags(tags, &rule.sublist, &hit.captures);
    let reps = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let mut changed = false;
    for (r, m) in c.readings.iter_mut().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        let Some(at) = r.tags_list.iter().position(|t| search.contains(t)) else {
            continue;
        };
        r.tags_list.retain(|t| !search.contains(t));
        r.rehash(tags);
        r.insert_tags_at(tags, at, &reps);
        r.hit_by.push(rule.id);
        changed = true;
    }
    changed
}

fn append(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let mut r = Reading::from_tags(tags, list);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.iter().any(|x| x.hash == r.hash) {
        return false;
    }
    r.hit_by.push(rule.id);
    c.readings.push(r);
    true
}

fn copy(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    if c.readings.len() != hit.matched.len() {
        return false;
    }
    let mut hashes: BTreeSet<u64> = c.readings.iter().map(|r| r.hash).collect();
    let mut clones = Vec::new();
    for (r, m) in c.readings.iter().zip(hit.matched.iter()) {
        if !*m {
            continue;
        }
        let mut cl = r.clone();
        for &t in &list {
            cl.add_tag(tags, t);
        }
        if hashes.insert(cl.hash) {
            cl.hit_by.push(rule.id);
            clones.push(cl);
        }
    }
    if clones.is_empty() {
        return false;
    }
    c.readings.extend(clones);
    true
}

// ---------------------------------------------------------------------------
// Structural actions
// ---------------------------------------------------------------------------

/// Cut the window after the target cohort. The remainder becomes a fresh
/// closed window at the front of the input buffer, with its own start
/// marker; the cut point receives the window-end tag.
fn delimit(
    grammar: &Grammar,
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    hit: &Hit,
) -> bool {
    let Some(at) = sw.cohorts.iter().position(|id| *id == hit.cohort) else {
        return false;
    };
    if at + 1 >= sw.cohorts.len() {
        return false;
    }
    let tail = sw.cohorts.split_off(at + 1);
    if let Some(last) = sw.cohorts.last().copied()
        && let Some(c) = store.cohort_mut(last)
    {
        for r in &mut c.readings {
            r.add_tag(tags, grammar.tag_end);
        }
    }

    let mut nw = store.new_window();
    let marker = store.alloc_cohort(nw.number, grammar.tag_begin);
    let boundary = Reading::from_tags(tags, [grammar.tag_begin]);
    if let Some(m) = store.cohort_mut(marker) {
        m.readings.push(boundary);
    }
    nw.cohorts.push(marker);
    nw.cohorts.extend(tail);
    nw.closed = true;
    store.renumber(&nw);
    for id in &nw.cohorts {
        sw.purge_candidate(*id);
    }
    store.next.push_front(nw);
    true
}

/// Remove a cohort, re-parenting its dependency children onto its own
/// parent (or detaching them).
fn remove_cohort(store: &mut WindowStore, sw: &mut SingleWindow, id: CohortId) -> bool {
    let Some(pos) = sw.cohorts.iter().position(|x| *x == id) else {
        return false;
    };
    sw.cohorts.remove(pos);
    sw.purge_candidate(id);

    let (parent, children) = match store.cohort(id) {
        Some(c) => (c.dep_parent, c.dep_children.clone()),
        None => (None, BTreeSet::new()),
    };
    for ch in children {
        if let Some(c) = store.cohort_mut(ch) {
            c.dep_parent = parent;
        }
        if let Some(p) = parent
            && let Some(pc) = store.cohort_mut(p)
        {
            pc.dep_children.insert(ch);
        }
    }
    if let Some(p) = parent
        && let Some(pc) = store.cohort_mut(p)
    {
        pc.dep_children.remove(&id);
    }
    store.free_cohort(id);
    true
}

/// The first list tag names the new wordform; the rest form its reading.
fn add_cohort(
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    rule: &Rule,
    hit: &Hit,
) -> bool {
    let list = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some((&wf, rest)) = list.split_first() else {
        return false;
    };
    let Some(pos) = sw.cohorts.iter().position(|id| *id == hit.cohort) else {
        return false;
    };
    // Never in front of the window-start marker.
    let at = if rule.flags.before { pos } else { pos + 1 }.max(1);
    let mut r = Reading::from_tags(tags, rest.iter().copied());
    r.hit_by.push(rule.id);
    let id = store.alloc_cohort(sw.number, wf);
    if let Some(c) = store.cohort_mut(id) {
        c.readings.push(r);
    }
    sw.cohorts.insert(at.min(sw.cohorts.len()), id);
    true
}

fn move_cohort(
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    rule: &Rule,
    hit: &Hit,
) -> bool {
    let Some(anchor) = hit.anchor else {
        return false;
    };
    if anchor == hit.cohort || !store.contains(anchor) {
        return false;
    }
    let Some(from) = sw.cohorts.iter().position(|id| *id == hit.cohort) else {
        return false;
    };
    if !sw.cohorts.contains(&anchor) {
        return false;
    }
    let old = sw.cohorts.clone();
    sw.cohorts.remove(from);
    let Some(apos) = sw.cohorts.iter().position(|id| *id == anchor) else {
        sw.cohorts = old;
        return false;
    };
    let at = if rule.flags.before { apos } else { apos + 1 }.max(1);
    sw.cohorts.insert(at.min(sw.cohorts.len()), hit.cohort);
    old != sw.cohorts
}

fn switch_cohorts(store: &mut WindowStore, sw: &mut SingleWindow, hit: &Hit) -> bool {
    let Some(anchor) = hit.anchor else {
        return false;
    };
    if anchor == hit.cohort || !store.contains(anchor) {
        return false;
    }
    let a = sw.cohorts.iter().position(|id| *id == hit.cohort);
    let b = sw.cohorts.iter().position(|id| *id == anchor);
    match (a, b) {
        (Some(a), Some(b)) if a != b => {
            sw.cohorts.swap(a, b);
            true
        }
        _ => false,
    }
}

/// Fold the anchor cohort into the target: the wordforms concatenate in
/// surface order and the anchor's readings survive as sub-readings.
fn merge_cohorts(
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    rule: &Rule,
    hit: &Hit,
) -> bool {
    let Some(anchor) = hit.anchor else {
        return false;
    };
    if anchor == hit.cohort {
        return false;
    }
    let tpos = sw.cohorts.iter().position(|id| *id == hit.cohort);
    let apos = sw.cohorts.iter().position(|id| *id == anchor);
    let (Some(tpos), Some(apos)) = (tpos, apos) else {
        return false;
    };

    let (first, second) = if tpos < apos {
        (hit.cohort, anchor)
    } else {
        (anchor, hit.cohort)
    };
    let joined = {
        let Some(a) = store.cohort(first) else {
            return false;
        };
        let Some(b) = store.cohort(second) else {
            return false;
        };
        format!(
            "\"<{}{}>\"",
            tags.get(a.wordform).pattern_text(),
            tags.get(b.wordform).pattern_text()
        )
    };
    let wf = tags.intern(&joined);

    let absorbed = match store.cohort(anchor) {
        Some(c) => c.readings.clone(),
        None => return false,
    };
    if let Some(c) = store.cohort_mut(hit.cohort) {
        c.wordform = wf;
        for r in &mut c.readings {
            r.subs.extend(absorbed.iter().cloned());
            r.hit_by.push(rule.id);
        }
    }
    remove_cohort(store, sw, anchor)
}

/// Expand the sub-readings of the target's first reading into cohorts that
/// follow it. Sub-readings carrying a wordform tag name their own cohort.
fn split_cohort(
    tags: &mut TagStore,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    rule: &Rule,
    hit: &Hit,
) -> bool {
    let Some(pos) = sw.cohorts.iter().position(|id| *id == hit.cohort) else {
        return false;
    };
    let (subs, fallback_wf) = match store.cohort_mut(hit.cohort) {
        Some(c) => {
            let subs = match c.readings.first() {
                Some(r) if !r.subs.is_empty() => r.subs.clone(),
                _ => return false,
            };
            for r in &mut c.readings {
                r.subs.clear();
            }
            (subs, c.wordform)
        }
        None => return false,
    };

    for (k, sub) in subs.into_iter().enumerate() {
        let wf = sub
            .tags_textual
            .iter()
            .find(|t| tags.get(**t).flags.wordform)
            .copied()
            .unwrap_or(fallback_wf);
        let mut r = sub;
        r.subs.clear();
        r.remove_tag(tags, wf);
        r.hit_by.push(rule.id);
        let id = store.alloc_cohort(sw.number, wf);
        if let Some(c) = store.cohort_mut(id) {
            c.readings.push(r);
        }
        sw.cohorts.insert((pos + 1 + k).min(sw.cohorts.len()), id);
    }
    true
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

fn relation(tags: &mut TagStore, store: &mut WindowStore, rule: &Rule, hit: &Hit) -> bool {
    let Some(anchor) = hit.anchor else {
        return false;
    };
    if !store.contains(anchor) {
        return false;
    }
    let names = resolve_tags(tags, &rule.maplist, &hit.captures);
    let Some(c) = store.cohort_mut(hit.cohort) else {
        return false;
    };
    let mut changed = false;
    for n in names {
        changed |= match rule.kind {
            RuleKind::AddRelation => c.add_relation(n, anchor),
            RuleKind::SetRelation => c.set_relation(n, anchor),
            RuleKind::RemRelation => c.rem_relation(n, anchor),
            _ => false,
        };
    }
    changed
}
