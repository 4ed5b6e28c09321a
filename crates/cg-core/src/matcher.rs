use std::collections::HashMap;

use cg_grammar::{CompositeTag, Grammar, SetId, SetOp, Tag, TagId, TagStore};

use crate::cohort::Cohort;
use crate::reading::Reading;

// ---------------------------------------------------------------------------
// Matcher — "does reading R satisfy set S"
// ---------------------------------------------------------------------------

/// Evaluates tag and set membership against readings and cohorts.
///
/// Regex and case-insensitive results are cached per (pattern, subject) tag
/// pair; the engine clears the cache per rule/cohort evaluation. A
/// successful regex match stores its capture groups for later varstring
/// substitution.
pub struct Matcher<'a> {
    grammar: &'a Grammar,
    tags: &'a TagStore,
    cache: HashMap<(TagId, TagId), bool>,
    /// Captures of the most recent successful regex tag match.
    pub captures: Vec<String>,
    /// Deleted readings participate in matching.
    pub look_deleted: bool,
    /// Delayed readings participate in matching.
    pub look_delayed: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(grammar: &'a Grammar, tags: &'a TagStore) -> Self {
        Self {
            grammar,
            tags,
            cache: HashMap::new(),
            captures: Vec::new(),
            look_deleted: false,
            look_delayed: false,
        }
    }

    /// Reset the per-(rule, cohort) match cache and capture scratch.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.captures.clear();
    }

    // -- tag level ----------------------------------------------------------

    /// Does this reading (in this cohort) satisfy a single tag? Fail-fast
    /// tags succeed when the base tag is absent.
    pub fn match_tag(&mut self, cohort: &Cohort, r: &Reading, tid: TagId) -> bool {
        let tag = self.tags.get(tid);
        let pos = self.match_tag_positive(cohort, r, tag);
        if tag.flags.failfast { !pos } else { pos }
    }

    fn match_tag_positive(&mut self, cohort: &Cohort, r: &Reading, tag: &Tag) -> bool {
        if tag.flags.any {
            return true;
        }
        if tag.flags.numerical {
            let (Some(key), Some(op), Some(value)) = (&tag.num_key, tag.num_op, tag.num_value)
            else {
                return false;
            };
            return r
                .tags_numerical
                .get(key)
                .is_some_and(|v| op.compare(*v, value));
        }
        if tag.flags.textual && (tag.flags.regexp || tag.flags.case_insensitive) {
            let subject = if tag.flags.wordform {
                cohort.wordform
            } else {
                match r.baseform {
                    Some(b) => b,
                    None => return false,
                }
            };
            let key = (tag.id, subject);
            if let Some(hit) = self.cache.get(&key) {
                return *hit;
            }
            let subject_text = self.tags.get(subject).pattern_text();
            let hit = if tag.flags.regexp {
                match tag.match_captures(subject_text) {
                    Some(caps) => {
                        if !caps.is_empty() {
                            self.captures = caps;
                        }
                        true
                    }
                    None => false,
                }
            } else {
                tag.matches_text(subject_text)
            };
            self.cache.insert(key, hit);
            return hit;
        }

        // Identity: fail-fast tags resolve to their base tag first.
        let base = if tag.flags.failfast {
            match self.tags.find(tag.pattern_text()) {
                Some(b) => b,
                None => return false,
            }
        } else {
            tag.id
        };
        r.has(base) || base == cohort.wordform
    }

    fn match_composite(&mut self, cohort: &Cohort, r: &Reading, comp: &CompositeTag) -> bool {
        comp.tags.iter().all(|t| self.match_tag(cohort, r, *t))
    }

    // -- set level ----------------------------------------------------------

    /// Does this reading satisfy the set? Near-constant for plain sets via
    /// the compiled identity/composite indices.
    pub fn match_set_reading(&mut self, cohort: &Cohort, r: &Reading, sid: SetId) -> bool {
        let set = self.grammar.set(sid);
        if set.is_algebraic() {
            let mut acc = self.match_set_reading(cohort, r, set.sets[0]);
            for (i, op) in set.ops.iter().enumerate() {
                let rhs = self.match_set_reading(cohort, r, set.sets[i + 1]);
                acc = match op {
                    SetOp::Union => acc || rhs,
                    SetOp::Difference => acc && !rhs,
                    SetOp::Intersection => acc && rhs,
                    SetOp::SymmetricDifference => acc ^ rhs,
                };
            }
            return acc;
        }

        if set.matches_any {
            return true;
        }
        if set.single_tags.contains(&cohort.wordform) {
            return true;
        }
        if set.single_tags.iter().any(|t| r.has(*t)) {
            return true;
        }
        if set
            .single_special
            .iter()
            .any(|t| self.match_tag(cohort, r, *t))
        {
            return true;
        }

        for (key, positions) in &set.composite_index {
            if r.has(*key) || *key == cohort.wordform {
                for &p in positions {
                    if self.match_composite(cohort, r, &set.composites[p]) {
                        return true;
                    }
                }
            }
        }
        set.composite_rest
            .iter()
            .any(|&p| self.match_composite(cohort, r, &set.composites[p]))
    }

    // -- cohort level -------------------------------------------------------

    fn reading_indices(&self, cohort: &Cohort) -> Vec<(usize, u8)> {
        let mut out: Vec<(usize, u8)> = (0..cohort.readings.len()).map(|i| (i, 0)).collect();
        if self.look_deleted {
            out.extend((0..cohort.deleted.len()).map(|i| (i, 1)));
        }
        if self.look_delayed {
            out.extend((0..cohort.delayed.len()).map(|i| (i, 2)));
        }
        out
    }

    fn reading_at<'c>(&self, cohort: &'c Cohort, slot: (usize, u8)) -> &'c Reading {
        match slot.1 {
            1 => &cohort.deleted[slot.0],
            2 => &cohort.delayed[slot.0],
            _ => &cohort.readings[slot.0],
        }
    }

    /// Normal mode: at least one considered reading matches.
    pub fn match_cohort(&mut self, cohort: &Cohort, sid: SetId) -> bool {
        self.reading_indices(cohort).into_iter().any(|slot| {
            let r = self.reading_at(cohort, slot);
            self.match_set_reading(cohort, r, sid)
        })
    }

    /// Careful mode: every considered reading matches, and there is at
    /// least one.
    pub fn match_cohort_careful(&mut self, cohort: &Cohort, sid: SetId) -> bool {
        let slots = self.reading_indices(cohort);
        !slots.is_empty()
            && slots.into_iter().all(|slot| {
                let r = self.reading_at(cohort, slot);
                self.match_set_reading(cohort, r, sid)
            })
    }
}
