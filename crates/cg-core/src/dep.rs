use std::collections::BTreeSet;

use cg_config::EngineOptions;

use crate::cohort::CohortId;
use crate::window::{SingleWindow, WindowStore};

// ---------------------------------------------------------------------------
// Dependency graph maintenance
// ---------------------------------------------------------------------------

/// Would making `parent` the parent of `child` close a cycle? Bounded
/// ancestor walk from `parent`; an existing cycle or a tripped depth
/// ceiling counts as unsafe.
pub fn would_loop(
    store: &WindowStore,
    opts: &EngineOptions,
    parent: CohortId,
    child: CohortId,
) -> bool {
    if parent == child {
        return true;
    }
    let mut seen: BTreeSet<CohortId> = BTreeSet::new();
    let mut depth = 0u32;
    let mut cur = parent;
    while let Some(c) = store.cohort(cur) {
        let Some(p) = c.dep_parent else { return false };
        if p == child {
            return true;
        }
        if !seen.insert(p) {
            log::warn!("existing dependency cycle above {parent}");
            return true;
        }
        depth += 1;
        if depth > opts.dep_depth_ceiling {
            log::warn!("ancestor walk above {parent} hit the depth ceiling");
            return true;
        }
        cur = p;
    }
    false
}

/// Would the edge (`parent`, `child`) cross an existing edge? A cohort
/// strictly between the two with a parent outside their span crosses.
/// Edges across window boundaries are never treated as crossing.
pub fn would_cross(
    store: &WindowStore,
    sw: &SingleWindow,
    parent: CohortId,
    child: CohortId,
) -> bool {
    let (Some(p), Some(c)) = (store.cohort(parent), store.cohort(child)) else {
        return false;
    };
    if p.window != c.window || p.window != sw.number {
        return false;
    }
    let (lo, hi) = if p.local < c.local {
        (p.local, c.local)
    } else {
        (c.local, p.local)
    };
    for idx in (lo + 1)..hi {
        let Some(mid) = sw
            .cohorts
            .get(idx as usize)
            .and_then(|id| store.cohort(*id))
        else {
            continue;
        };
        let Some(mp) = mid.dep_parent.and_then(|id| store.cohort(id)) else {
            continue;
        };
        if mp.window == p.window && (mp.local < lo || mp.local > hi) {
            return true;
        }
    }
    false
}

/// Attach `child` under `parent`, detaching it from its old parent first.
/// Returns whether the graph changed; refused or redundant attachments are
/// quiet no-ops.
pub fn attach(
    store: &mut WindowStore,
    sw: &SingleWindow,
    opts: &EngineOptions,
    parent: CohortId,
    child: CohortId,
    allow_loop: bool,
    allow_cross: bool,
) -> bool {
    if parent == child || !store.contains(parent) {
        return false;
    }
    let old = match store.cohort(child) {
        Some(c) => c.dep_parent,
        None => return false,
    };
    if old == Some(parent) {
        return false;
    }
    if opts.dep_block_loops && !allow_loop && would_loop(store, opts, parent, child) {
        log::warn!("refusing attachment of {child} under {parent}: would create a loop");
        return false;
    }
    if opts.dep_block_crossing && !allow_cross && would_cross(store, sw, parent, child) {
        log::warn!("refusing attachment of {child} under {parent}: would cross");
        return false;
    }

    if let Some(old) = old
        && let Some(o) = store.cohort_mut(old)
    {
        o.dep_children.remove(&child);
    }
    if let Some(c) = store.cohort_mut(child) {
        c.dep_parent = Some(parent);
    }
    if let Some(p) = store.cohort_mut(parent) {
        p.dep_children.insert(child);
    }
    true
}

/// Detach a cohort from its dependency parent. Returns whether anything
/// changed.
pub fn detach(store: &mut WindowStore, child: CohortId) -> bool {
    let Some(old) = store.cohort(child).and_then(|c| c.dep_parent) else {
        return false;
    };
    if let Some(c) = store.cohort_mut(child) {
        c.dep_parent = None;
    }
    if let Some(o) = store.cohort_mut(old) {
        o.dep_children.remove(&child);
    }
    true
}

/// Resolve a window's deferred relation edges against the cohorts that are
/// now visible. Edges whose targets are still unknown stay pending.
pub fn reflow(store: &mut WindowStore, sw: &SingleWindow) {
    for id in sw.cohorts.clone() {
        let Some(mut c) = store.take_cohort(id) else {
            continue;
        };
        let pending = std::mem::take(&mut c.relations_input);
        for (name, targets) in pending {
            for t in targets {
                if t == c.id || store.contains(t) {
                    c.add_relation(name, t);
                } else {
                    c.relations_input.entry(name).or_default().insert(t);
                }
            }
        }
        store.insert_cohort(c);
    }
}
