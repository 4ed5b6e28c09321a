use std::collections::{BTreeSet, HashMap, VecDeque};

use cg_grammar::{RuleId, TagId};

use crate::cohort::{Cohort, CohortId};


// ---------------------------------------------------------------------------
// SingleWindow
// ---------------------------------------------------------------------------

/// A bounded run of cohorts ("sentence"). Owns only the ordering and the
/// per-rule candidate sets; the cohorts themselves live in the
/// [`WindowStore`] arena.
#[derive(Debug, Default)]
pub struct SingleWindow {
    pub number: u32,
    /// Cohort ids in surface order; index equals each cohort's `local`.
    pub cohorts: Vec<CohortId>,
    /// Per-rule sorted candidate sets maintained incrementally by the
    /// indexer; iterated via snapshots so side effects cannot invalidate a
    /// cursor.
    pub rule_to_cohorts: HashMap<RuleId, BTreeSet<CohortId>>,
    /// Streaming: no further cohorts will be appended.
    pub closed: bool,
}

impl SingleWindow {
    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn add_candidate(&mut self, rule: RuleId, cohort: CohortId) {
        self.rule_to_cohorts.entry(rule).or_default().insert(cohort);
    }

    /// Snapshot of a rule's candidate set, in cohort order.
    pub fn candidates(&self, rule: RuleId) -> Vec<CohortId> {
        self.rule_to_cohorts
            .get(&rule)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a cohort from every candidate set (after structural removal).
    pub fn purge_candidate(&mut self, cohort: CohortId) {
        for set in self.rule_to_cohorts.values_mut() {
            set.remove(&cohort);
        }
    }
}

// ---------------------------------------------------------------------------
// WindowStore
// ---------------------------------------------------------------------------

/// The sliding previous/next buffer of SingleWindows plus the central cohort
/// arena and the global numbering counters.
///
/// All live cohorts are owned by `cohort_map`; windows and candidate sets
/// hold [`CohortId`] handles only. The window currently being processed is
/// taken out of the buffers by the caller and operated on side by side with
/// the store.
#[derive(Debug)]
pub struct WindowStore {
    cohort_map: HashMap<CohortId, Cohort>,
    /// Finished windows, oldest first. Bounded by `retention`.
    pub previous: VecDeque<SingleWindow>,
    /// Closed (and one open) upcoming windows, oldest first.
    pub next: VecDeque<SingleWindow>,
    next_cohort: u32,
    next_window: u32,
    retention: usize,
}

impl WindowStore {
    pub fn new(retention: usize) -> Self {
        Self {
            cohort_map: HashMap::new(),
            previous: VecDeque::new(),
            next: VecDeque::new(),
            next_cohort: 0,
            next_window: 0,
            retention,
        }
    }

    pub fn cohort(&self, id: CohortId) -> Option<&Cohort> {
        self.cohort_map.get(&id)
    }

    pub fn cohort_mut(&mut self, id: CohortId) -> Option<&mut Cohort> {
        self.cohort_map.get_mut(&id)
    }

    pub fn contains(&self, id: CohortId) -> bool {
        self.cohort_map.contains_key(&id)
    }

    pub fn cohort_count(&self) -> usize {
        self.cohort_map.len()
    }

    /// Create the next SingleWindow in numbering order.
    pub fn new_window(&mut self) -> SingleWindow {
        let number = self.next_window;
        self.next_window += 1;
        SingleWindow {
            number,
            ..SingleWindow::default()
        }
    }

    /// Allocate a cohort in the arena and return its id. The caller places
    /// the id into a window and renumbers.
    pub fn alloc_cohort(&mut self, window: u32, wordform: TagId) -> CohortId {
        let id = CohortId(self.next_cohort);
        self.next_cohort += 1;
        self.cohort_map.insert(id, Cohort::new(id, window, wordform));
        id
    }

    /// Remove a cohort from the arena entirely.
    pub fn free_cohort(&mut self, id: CohortId) -> Option<Cohort> {
        self.cohort_map.remove(&id)
    }

    /// Briefly take a cohort out of the arena for an update that also needs
    /// the owning window mutable. Pair with [`insert_cohort`](Self::insert_cohort).
    pub(crate) fn take_cohort(&mut self, id: CohortId) -> Option<Cohort> {
        self.cohort_map.remove(&id)
    }

    pub(crate) fn insert_cohort(&mut self, cohort: Cohort) {
        self.cohort_map.insert(cohort.id, cohort);
    }

    /// Re-assign `local` and `window` for every cohort of `sw` to match its
    /// current ordering. Must run after any structural change.
    pub fn renumber(&mut self, sw: &SingleWindow) {
        for (i, id) in sw.cohorts.iter().enumerate() {
            if let Some(c) = self.cohort_map.get_mut(id) {
                c.local = i as u32;
                c.window = sw.number;
            }
        }
    }

    /// File a finished window behind the current one, evicting (and
    /// destroying the subtree of) windows past the retention horizon.
    pub fn retire(&mut self, sw: SingleWindow) {
        self.previous.push_back(sw);
        while self.previous.len() > self.retention {
            if let Some(old) = self.previous.pop_front() {
                for id in &old.cohorts {
                    if let Some(c) = self.cohort_map.remove(id)
                        && !c.relations_input.is_empty()
                    {
                        log::warn!(
                            "window {}: cohort {} evicted with unresolved relations",
                            old.number,
                            c.id
                        );
                    }
                }
            }
        }
    }
}
