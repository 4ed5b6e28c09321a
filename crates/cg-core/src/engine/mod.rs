use cg_config::EngineOptions;
use cg_grammar::{Grammar, Rule, RuleKind, TagStore};

use crate::context::ContextEval;
use crate::error::CoreResult;
use crate::index::{reindex_cohort, reindex_window};
use crate::window::{SingleWindow, WindowStore};

mod actions;
use actions::Hit;

#[cfg(test)]
mod tests;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What rule application did to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No rule changed anything.
    Unchanged,
    /// Readings or the graph changed; the cohort sequence did not split.
    Changed,
    /// The window was cut; the remainder went back into the input buffer.
    Delimited,
}

/// Applies a compiled grammar to one window at a time.
///
/// Rules run section by section; each section loops to a fixpoint before the
/// next one starts. Candidate iteration is snapshot-then-apply: all tests
/// for a rule run against an immutable window, then the collected hits are
/// applied. Structural hits invalidate the snapshot and stop the sweep.
pub struct Engine<'a> {
    grammar: &'a Grammar,
    opts: &'a EngineOptions,
}

impl<'a> Engine<'a> {
    pub fn new(grammar: &'a Grammar, opts: &'a EngineOptions) -> Self {
        Self { grammar, opts }
    }

    pub fn run_window(
        &self,
        tags: &mut TagStore,
        store: &mut WindowStore,
        sw: &mut SingleWindow,
    ) -> CoreResult<EngineStatus> {
        store.renumber(sw);
        reindex_window(self.grammar, store, sw);

        let mut any_change = false;
        let mut delimited = false;
        for section in self.grammar.ordered_sections() {
            let mut passes = 0u32;
            loop {
                passes += 1;
                if passes > self.opts.fixpoint_ceiling {
                    log::warn!(
                        "window {}: section abandoned after {} passes",
                        sw.number,
                        passes - 1
                    );
                    break;
                }
                let mut changed = false;
                for &rid in section {
                    let rule = self.grammar.rule(rid);
                    let (rule_changed, rule_delimited) = self.run_rule(tags, store, sw, rule)?;
                    changed |= rule_changed;
                    delimited |= rule_delimited;
                }
                if !changed {
                    break;
                }
                any_change = true;
            }
        }

        Ok(if delimited {
            EngineStatus::Delimited
        } else if any_change {
            EngineStatus::Changed
        } else {
            EngineStatus::Unchanged
        })
    }

    /// One application sweep of a rule over its candidate cohorts. Returns
    /// (changed, delimited). REPEAT rules sweep until stable.
    fn run_rule(
        &self,
        tags: &mut TagStore,
        store: &mut WindowStore,
        sw: &mut SingleWindow,
        rule: &Rule,
    ) -> CoreResult<(bool, bool)> {
        let mut any = false;
        let mut delimited = false;
        // Structural sweeps restart from a fresh snapshot; each cohort still
        // fires at most once unless the rule repeats.
        let track_fired = rule.kind.is_structural() && !rule.flags.repeat;
        let mut fired: std::collections::BTreeSet<crate::cohort::CohortId> =
            std::collections::BTreeSet::new();
        let mut sweeps = 0u32;
        loop {
            sweeps += 1;
            if sweeps > self.opts.fixpoint_ceiling {
                log::warn!(
                    "rule {} (line {}): abandoned after {} sweeps",
                    rule.id.0,
                    rule.line,
                    sweeps - 1
                );
                break;
            }
            let hits = self.collect_hits(tags, store, sw, rule);
            let mut pass_changed = false;
            for hit in &hits {
                if track_fired && !fired.insert(hit.cohort) {
                    continue;
                }
                let (changed, delim) =
                    actions::apply(self.grammar, self.opts, tags, store, sw, rule, hit)?;
                if !changed {
                    continue;
                }
                pass_changed = true;
                any = true;
                delimited |= delim;
                if rule.kind.is_structural() {
                    // The snapshot is stale; renumber, reindex, stop the sweep.
                    store.renumber(sw);
                    reindex_window(self.grammar, store, sw);
                    break;
                }
                reindex_cohort(self.grammar, store, sw, hit.cohort);
            }
            if !pass_changed {
                break;
            }
            if !rule.flags.repeat && !rule.kind.is_structural() {
                break;
            }
        }
        Ok((any, delimited))
    }

    /// Immutable phase: evaluate target and contextual tests for every
    /// candidate cohort, recording what the apply phase needs.
    fn collect_hits(
        &self,
        tags: &TagStore,
        store: &WindowStore,
        sw: &SingleWindow,
        rule: &Rule,
    ) -> Vec<Hit> {
        let cands = sw.candidates(rule.id);
        if cands.is_empty() {
            return Vec::new();
        }
        let mut ev = ContextEval::new(self.grammar, tags, self.opts, store, sw);
        let mut hits = Vec::new();
        for cid in cands {
            let Some(c) = store.cohort(cid) else { continue };
            if c.window != sw.number || c.readings.is_empty() {
                continue;
            }
            if !c.possible_sets.test(rule.target) {
                continue;
            }
            // The window-start marker never participates in structural moves.
            if rule.kind.is_structural() && c.wordform == self.grammar.tag_begin {
                continue;
            }

            ev.matcher.clear_cache();
            ev.matcher.look_deleted = false;
            ev.matcher.look_delayed = false;
            let matched: Vec<bool> = c
                .readings
                .iter()
                .map(|r| ev.matcher.match_set_reading(c, r, rule.target))
                .collect();
            if !matched.iter().any(|m| *m) {
                continue;
            }
            let target_captures = ev.matcher.captures.clone();

            let tests_passed = ev.test_rule(cid, rule);
            if !tests_passed && rule.kind != RuleKind::Iff {
                continue;
            }
            let anchor = if rule.kind.needs_anchor() && tests_passed {
                match ev.resolve_anchor(cid, rule) {
                    Some(a) => Some(a),
                    None => continue,
                }
            } else {
                None
            };

            let mut captures = ev.matcher.captures.clone();
            if captures.is_empty() {
                captures = target_captures;
            }
            hits.push(Hit {
                cohort: cid,
                matched,
                tests_passed,
                anchor,
                captures,
            });
        }
        hits
    }
}
