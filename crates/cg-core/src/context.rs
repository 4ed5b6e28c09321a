use std::collections::{BTreeSet, VecDeque};

use cg_config::EngineOptions;
use cg_grammar::{ContextualTest, Grammar, Rule, SetId, TagStore};

use crate::cohort::{Cohort, CohortId};
use crate::matcher::Matcher;
use crate::window::{SingleWindow, WindowStore};

// ---------------------------------------------------------------------------
// Window-relative positions
// ---------------------------------------------------------------------------

/// Which window of the sliding buffer a position falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WinRef {
    /// `store.previous[i]`, oldest first.
    Prev(usize),
    /// The window currently being processed.
    Cur,
    /// `store.next[i]`, nearest first.
    Next(usize),
}

type Pos = (WinRef, usize);

// ---------------------------------------------------------------------------
// ContextEval
// ---------------------------------------------------------------------------

/// Evaluates a rule's contextual tests against the sliding window buffer.
///
/// Everything here is read-only with respect to cohorts and windows; the
/// engine runs all tests for a (rule, cohort) pair first and mutates only
/// afterwards. `attach` and `mark` collect the cohorts captured by
/// ATTACH/MARK-flagged tests for the apply phase.
pub struct ContextEval<'a> {
    grammar: &'a Grammar,
    opts: &'a EngineOptions,
    store: &'a WindowStore,
    sw: &'a SingleWindow,
    pub matcher: Matcher<'a>,
    base_look_deleted: bool,
    base_look_delayed: bool,
    /// Cohort captured by an attach-flagged test, if any.
    pub attach: Option<CohortId>,
    /// Cohort captured by a mark-flagged test, if any.
    pub mark: Option<CohortId>,
}

impl<'a> ContextEval<'a> {
    pub fn new(
        grammar: &'a Grammar,
        tags: &'a TagStore,
        opts: &'a EngineOptions,
        store: &'a WindowStore,
        sw: &'a SingleWindow,
    ) -> Self {
        Self {
            grammar,
            opts,
            store,
            sw,
            matcher: Matcher::new(grammar, tags),
            base_look_deleted: false,
            base_look_delayed: false,
            attach: None,
            mark: None,
        }
    }

    /// Run every contextual test of `rule` from `origin`; all must succeed.
    /// Resets the per-cohort caches and the attach/mark captures first.
    pub fn test_rule(&mut self, origin: CohortId, rule: &Rule) -> bool {
        self.matcher.clear_cache();
        self.attach = None;
        self.mark = None;
        self.base_look_deleted = rule.flags.look_deleted;
        self.base_look_delayed = rule.flags.look_delayed;
        rule.tests
            .iter()
            .all(|t| self.run_test(origin, t).is_some())
    }

    /// Resolve the anchor cohort of an anchored rule through its dependency
    /// target test. An explicit ATTACH capture from the ordinary tests wins.
    pub fn resolve_anchor(&mut self, origin: CohortId, rule: &Rule) -> Option<CohortId> {
        if let Some(a) = self.attach {
            return Some(a);
        }
        let test = rule.dep_target.as_ref()?;
        self.run_test(origin, test)
    }

    // -- test driver ----------------------------------------------------------

    /// Evaluate one contextual test from `origin`. Returns the matched
    /// cohort on success (the origin itself for negated misses).
    pub fn run_test(&mut self, origin: CohortId, test: &ContextualTest) -> Option<CohortId> {
        let raw = if let Some(name) = &test.template {
            let tmpl = self.grammar.templates.get(name)?;
            let hit = self.run_test(origin, tmpl);
            self.chase_link(hit, test)
        } else if !test.ors.is_empty() {
            let hit = test
                .ors
                .iter()
                .find_map(|alt| self.run_test(origin, alt));
            self.chase_link(hit, test)
        } else {
            let origin_c = self.cohort(origin)?;
            let target = test.target?;
            if test.flags.is_graph() {
                self.run_graph(origin_c, test, target)
            } else if test.flags.is_scanning() {
                self.run_scan(origin_c, test, target)
            } else {
                self.run_position(origin_c, test, target)
            }
        };

        let result = if test.flags.negate {
            match raw {
                Some(_) => None,
                None => Some(origin),
            }
        } else {
            raw
        };

        if let Some(hit) = result {
            if test.flags.attach_to {
                self.attach = Some(hit);
            }
            if test.flags.mark {
                self.mark = Some(hit);
            }
        }
        result
    }

    fn chase_link(&mut self, hit: Option<CohortId>, test: &ContextualTest) -> Option<CohortId> {
        match (hit, &test.linked) {
            (Some(h), Some(l)) => self.run_test(h, l).map(|_| h),
            (h, _) => h,
        }
    }

    // -- positional -----------------------------------------------------------

    fn run_position(
        &mut self,
        origin: &'a Cohort,
        test: &ContextualTest,
        target: SetId,
    ) -> Option<CohortId> {
        let Some(c) = self.resolve_position(origin, test) else {
            // A nonexistent position satisfies an inverted test.
            return test.flags.not_.then_some(origin.id);
        };
        let hit = self.cohort_matches(c, target, test.flags.careful, test) != test.flags.not_;
        if !hit {
            return None;
        }
        if let Some(l) = &test.linked {
            self.run_test(c.id, l)?;
        }
        Some(c.id)
    }

    fn resolve_position(&self, origin: &Cohort, test: &ContextualTest) -> Option<&'a Cohort> {
        if test.flags.absolute {
            let idx = if test.offset >= 0 {
                test.offset as usize
            } else {
                self.sw
                    .len()
                    .checked_sub(test.offset.unsigned_abs() as usize)?
            };
            let id = *self.sw.cohorts.get(idx)?;
            return self.cohort(id);
        }
        let dir = test.offset.signum();
        let spans = if dir < 0 {
            test.flags.spans_left()
        } else {
            test.flags.spans_right()
        };
        let mut pos = self.pos_of(origin)?;
        for _ in 0..test.offset.unsigned_abs() {
            pos = self.step(pos, dir, spans)?;
        }
        self.cohort_at(pos)
    }

    // -- scanning -------------------------------------------------------------

    fn run_scan(
        &mut self,
        origin: &'a Cohort,
        test: &ContextualTest,
        target: SetId,
    ) -> Option<CohortId> {
        let dir = if test.offset < 0 { -1 } else { 1 };
        let spans = if dir < 0 {
            test.flags.spans_left()
        } else {
            test.flags.spans_right()
        };
        let mut pos = Some(self.pos_of(origin)?);
        for _ in 0..test.offset.unsigned_abs() {
            pos = pos.and_then(|p| self.step(p, dir, spans));
        }

        let mut first = true;
        while let Some(p) = pos {
            let c = self.cohort_at(p)?;
            if !first && c.id == origin.id && !test.flags.pass_origin {
                break;
            }
            let hit = self.cohort_matches(c, target, test.flags.careful, test) != test.flags.not_;
            if hit {
                match &test.linked {
                    None => return Some(c.id),
                    Some(l) => {
                        if self.run_test(c.id, l).is_some() {
                            return Some(c.id);
                        }
                        if test.flags.scan_first {
                            return None;
                        }
                    }
                }
            }
            if let Some(b) = test.barrier
                && self.cohort_matches(c, b, false, test)
            {
                break;
            }
            if let Some(b) = test.cbarrier
                && self.cohort_matches(c, b, true, test)
            {
                break;
            }
            first = false;
            pos = self.step(p, dir, spans);
        }
        None
    }

    // -- graph modes ----------------------------------------------------------

    fn run_graph(
        &mut self,
        origin: &'a Cohort,
        test: &ContextualTest,
        target: SetId,
    ) -> Option<CohortId> {
        let f = test.flags;
        let mut cands: Vec<CohortId> = Vec::new();
        if f.dep_parent {
            cands.extend(self.ancestors(origin, f.deep));
        }
        if f.dep_child {
            cands.extend(self.descendants(origin, f.deep));
        }
        if f.dep_sibling {
            cands.extend(self.siblings(origin));
        }
        if f.relation
            && let Some(name) = test.relation
            && let Some(rel) = origin.relations.get(&name)
        {
            cands.extend(rel.iter().copied());
        }
        if f.self_ {
            cands.push(origin.id);
        }

        // Order by surface position, dedup, then apply the position filters.
        let okey = self.order_key(origin.id);
        let mut keyed: Vec<((usize, u32), CohortId)> = cands
            .into_iter()
            .filter_map(|id| self.order_key(id).map(|k| (k, id)))
            .collect();
        keyed.sort();
        keyed.dedup();
        // Edges into other windows only count when the span flags allow it.
        if let Some((orank, _)) = okey {
            if !f.spans_left() {
                keyed.retain(|((rank, _), _)| *rank >= orank);
            }
            if !f.spans_right() {
                keyed.retain(|((rank, _), _)| *rank <= orank);
            }
        }
        if f.left {
            keyed.retain(|(k, _)| Some(*k) < okey);
        }
        if f.right {
            keyed.retain(|(k, _)| Some(*k) > okey);
        }
        if f.leftmost {
            keyed.truncate(1);
        }
        if f.rightmost && keyed.len() > 1 {
            keyed.drain(..keyed.len() - 1);
        }

        if f.none {
            for (_, id) in &keyed {
                if self.candidate_passes(*id, test, target) {
                    return None;
                }
            }
            return Some(origin.id);
        }
        if f.all {
            for (_, id) in &keyed {
                if !self.candidate_passes(*id, test, target) {
                    return None;
                }
            }
            return keyed.first().map(|(_, id)| *id).or(Some(origin.id));
        }
        keyed
            .iter()
            .map(|(_, id)| *id)
            .find(|id| self.candidate_passes(*id, test, target))
    }

    fn candidate_passes(&mut self, id: CohortId, test: &ContextualTest, target: SetId) -> bool {
        let Some(c) = self.cohort(id) else {
            return false;
        };
        let hit = self.cohort_matches(c, target, test.flags.careful, test) != test.flags.not_;
        if !hit {
            return false;
        }
        match &test.linked {
            None => true,
            Some(l) => self.run_test(id, l).is_some(),
        }
    }

    /// Ancestor chain of a cohort, nearest first. Bounded by the configured
    /// depth ceiling; cycles terminate the walk with a warning.
    fn ancestors(&self, origin: &Cohort, deep: bool) -> Vec<CohortId> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<CohortId> = BTreeSet::new();
        let mut cur = origin.id;
        while let Some(c) = self.cohort(cur) {
            let Some(p) = c.dep_parent else { break };
            if !seen.insert(p) {
                log::warn!("dependency cycle while walking ancestors of {}", origin.id);
                break;
            }
            if out.len() >= self.opts.dep_depth_ceiling as usize {
                log::warn!("ancestor walk of {} hit the depth ceiling", origin.id);
                break;
            }
            out.push(p);
            if !deep {
                break;
            }
            cur = p;
        }
        out
    }

    /// Children (or the full descendant closure) of a cohort, breadth first.
    fn descendants(&self, origin: &Cohort, deep: bool) -> Vec<CohortId> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<CohortId> = BTreeSet::new();
        let mut queue: VecDeque<CohortId> = origin.dep_children.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if out.len() >= self.opts.dep_depth_ceiling as usize {
                log::warn!("descendant walk of {} hit the depth ceiling", origin.id);
                break;
            }
            out.push(id);
            if deep && let Some(c) = self.cohort(id) {
                queue.extend(c.dep_children.iter().copied());
            }
        }
        out
    }

    fn siblings(&self, origin: &Cohort) -> Vec<CohortId> {
        let Some(p) = origin.dep_parent else {
            return Vec::new();
        };
        match self.cohort(p) {
            Some(parent) => parent
                .dep_children
                .iter()
                .copied()
                .filter(|c| *c != origin.id)
                .collect(),
            None => Vec::new(),
        }
    }

    // -- matching & buffer access ----------------------------------------------

    fn cohort_matches(
        &mut self,
        c: &Cohort,
        set: SetId,
        careful: bool,
        test: &ContextualTest,
    ) -> bool {
        self.matcher.look_deleted = self.base_look_deleted || test.flags.look_deleted;
        self.matcher.look_delayed = self.base_look_delayed || test.flags.look_delayed;
        if careful {
            self.matcher.match_cohort_careful(c, set)
        } else {
            self.matcher.match_cohort(c, set)
        }
    }

    fn cohort(&self, id: CohortId) -> Option<&'a Cohort> {
        self.store.cohort(id)
    }

    fn win_at(&self, r: WinRef) -> Option<&'a SingleWindow> {
        match r {
            WinRef::Prev(i) => self.store.previous.get(i),
            WinRef::Cur => Some(self.sw),
            WinRef::Next(i) => self.store.next.get(i),
        }
    }

    fn winref_of(&self, number: u32) -> Option<WinRef> {
        if number == self.sw.number {
            return Some(WinRef::Cur);
        }
        if let Some(i) = self.store.previous.iter().position(|w| w.number == number) {
            return Some(WinRef::Prev(i));
        }
        self.store
            .next
            .iter()
            .position(|w| w.number == number)
            .map(WinRef::Next)
    }

    fn pos_of(&self, c: &Cohort) -> Option<Pos> {
        Some((self.winref_of(c.window)?, c.local as usize))
    }

    fn cohort_at(&self, (w, i): Pos) -> Option<&'a Cohort> {
        let id = *self.win_at(w)?.cohorts.get(i)?;
        self.cohort(id)
    }

    /// Global surface ordering key: (window rank in the buffer, local index).
    fn order_key(&self, id: CohortId) -> Option<(usize, u32)> {
        let c = self.cohort(id)?;
        let rank = match self.winref_of(c.window)? {
            WinRef::Prev(i) => i,
            WinRef::Cur => self.store.previous.len(),
            WinRef::Next(i) => self.store.previous.len() + 1 + i,
        };
        Some((rank, c.local))
    }

    fn step(&self, (w, i): Pos, dir: i32, spans: bool) -> Option<Pos> {
        if dir < 0 {
            if i > 0 {
                return Some((w, i - 1));
            }
            if !spans {
                return None;
            }
            let mut w = w;
            loop {
                w = self.left_win(w)?;
                let win = self.win_at(w)?;
                if !win.is_empty() {
                    return Some((w, win.len() - 1));
                }
            }
        } else {
            let len = self.win_at(w)?.len();
            if i + 1 < len {
                return Some((w, i + 1));
            }
            if !spans {
                return None;
            }
            let mut w = w;
            loop {
                w = self.right_win(w)?;
                if !self.win_at(w)?.is_empty() {
                    return Some((w, 0));
                }
            }
        }
    }

    fn left_win(&self, r: WinRef) -> Option<WinRef> {
        match r {
            WinRef::Prev(0) => None,
            WinRef::Prev(i) => Some(WinRef::Prev(i - 1)),
            WinRef::Cur => {
                let n = self.store.previous.len();
                (n > 0).then_some(WinRef::Prev(n - 1))
            }
            WinRef::Next(0) => Some(WinRef::Cur),
            WinRef::Next(i) => Some(WinRef::Next(i - 1)),
        }
    }

    fn right_win(&self, r: WinRef) -> Option<WinRef> {
        match r {
            WinRef::Prev(i) if i + 1 < self.store.previous.len() => Some(WinRef::Prev(i + 1)),
            WinRef::Prev(_) => Some(WinRef::Cur),
            WinRef::Cur => (!self.store.next.is_empty()).then_some(WinRef::Next(0)),
            WinRef::Next(i) => {
                (i + 1 < self.store.next.len()).then_some(WinRef::Next(i + 1))
            }
        }
    }
}

#[cfg(test)]
mod tests;
