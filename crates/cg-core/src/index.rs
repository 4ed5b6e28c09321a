use std::collections::BTreeSet;

use cg_grammar::{Grammar, SetId};

use crate::cohort::{Cohort, CohortId};
use crate::window::{SingleWindow, WindowStore};

// ---------------------------------------------------------------------------
// Rule-to-cohort indexing
// ---------------------------------------------------------------------------
//
// `possible_sets` is the soundness-critical prune key: it must be a superset
// of the true match set for every individual reading, so recomputation
// always unions over every tag of every active reading plus the wordform,
// and special sets (regex / numeric / any) are unconditionally flagged.

/// Recompute a cohort's `possible_sets` and insert it into the candidate
/// sets of every rule whose target could now match. Called whenever the
/// cohort's reading tag-lists change.
pub fn index_cohort(grammar: &Grammar, cohort: &mut Cohort, sw: &mut SingleWindow) {
    cohort.possible_sets.clear();

    let mut touched: BTreeSet<SetId> = grammar.any_sets.iter().copied().collect();
    let mut seed = |tag| {
        if let Some(sets) = grammar.sets_by_tag.get(&tag) {
            touched.extend(sets.iter().copied());
        }
    };
    seed(cohort.wordform);
    for r in &cohort.readings {
        for &t in &r.tags {
            seed(t);
        }
    }

    for sid in touched {
        cohort.possible_sets.set(sid);
        if let Some(rules) = grammar.rules_by_set.get(&sid) {
            for rid in rules {
                sw.add_candidate(*rid, cohort.id);
            }
        }
    }
}

/// Rebuild a window's candidate sets from scratch. Used when the window
/// first becomes current and after structural mutation.
pub fn reindex_window(grammar: &Grammar, store: &mut WindowStore, sw: &mut SingleWindow) {
    sw.rule_to_cohorts.clear();
    let ids: Vec<CohortId> = sw.cohorts.clone();
    for id in ids {
        reindex_cohort(grammar, store, sw, id);
    }
}

/// Re-index a single cohort in place after its readings changed. The cohort
/// is briefly taken out of the arena so the candidate sets can be updated
/// alongside it.
pub fn reindex_cohort(
    grammar: &Grammar,
    store: &mut WindowStore,
    sw: &mut SingleWindow,
    id: CohortId,
) {
    if let Some(mut cohort) = store.take_cohort(id) {
        index_cohort(grammar, &mut cohort, sw);
        store.insert_cohort(cohort);
    }
}
