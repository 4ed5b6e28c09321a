use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use cg_grammar::{SetId, TagId, TagStore};

use crate::reading::Reading;

// ---------------------------------------------------------------------------
// CohortId & PossibleSets
// ---------------------------------------------------------------------------

/// Global cohort number, monotonically increasing for the lifetime of a
/// [`WindowStore`](crate::window::WindowStore). Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CohortId(pub u32);

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Growable bit vector over set ids: the union, across all active readings,
/// of every set any of their tags could satisfy. Pruning key for rule
/// indexing — a cleared bit proves the rule's target cannot match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PossibleSets {
    bits: Vec<u64>,
}

impl PossibleSets {
    pub fn set(&mut self, id: SetId) {
        let (word, bit) = (id.0 as usize / 64, id.0 as usize % 64);
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << bit;
    }

    pub fn test(&self, id: SetId) -> bool {
        let (word, bit) = (id.0 as usize / 64, id.0 as usize % 64);
        self.bits.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

// ---------------------------------------------------------------------------
// Cohort
// ---------------------------------------------------------------------------

/// One token position: the active readings plus the restorable side-lists,
/// dependency and relation state, and the indexing prune key.
///
/// Cohorts are owned by the window store's arena and referenced everywhere
/// else by [`CohortId`]; `local` and `window` are renumbered by the store
/// whenever the cohort sequence changes.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub id: CohortId,
    /// Position within the owning window; equals the index into the window's
    /// cohort list.
    pub local: u32,
    /// Number of the owning SingleWindow.
    pub window: u32,
    pub wordform: TagId,
    /// Verbatim trailing text between this cohort and the next.
    pub text: String,
    pub readings: Vec<Reading>,
    /// Readings removed by rules; restorable.
    pub deleted: Vec<Reading>,
    /// Readings held back by delayed rules; restorable.
    pub delayed: Vec<Reading>,
    /// Readings hidden from matching entirely; restorable.
    pub ignored: Vec<Reading>,

    pub dep_parent: Option<CohortId>,
    pub dep_children: BTreeSet<CohortId>,

    /// Relation name → related cohorts.
    pub relations: BTreeMap<TagId, BTreeSet<CohortId>>,
    /// Deferred incoming edges by original id, resolved during reflow once
    /// the target window is visible.
    pub relations_input: BTreeMap<TagId, BTreeSet<CohortId>>,

    pub possible_sets: PossibleSets,
}

impl Cohort {
    pub fn new(id: CohortId, window: u32, wordform: TagId) -> Self {
        Self {
            id,
            local: 0,
            window,
            wordform,
            text: String::new(),
            readings: Vec::new(),
            deleted: Vec::new(),
            delayed: Vec::new(),
            ignored: Vec::new(),
            dep_parent: None,
            dep_children: BTreeSet::new(),
            relations: BTreeMap::new(),
            relations_input: BTreeMap::new(),
            possible_sets: PossibleSets::default(),
        }
    }

    pub fn append_reading(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn add_relation(&mut self, name: TagId, target: CohortId) -> bool {
        self.relations.entry(name).or_default().insert(target)
    }

    pub fn set_relation(&mut self, name: TagId, target: CohortId) -> bool {
        let entry = self.relations.entry(name).or_default();
        if entry.len() == 1 && entry.contains(&target) {
            return false;
        }
        entry.clear();
        entry.insert(target);
        true
    }

    pub fn rem_relation(&mut self, name: TagId, target: CohortId) -> bool {
        match self.relations.get_mut(&name) {
            Some(set) => {
                let removed = set.remove(&target);
                if set.is_empty() {
                    self.relations.remove(&name);
                }
                removed
            }
            None => false,
        }
    }

    /// Readable dump of the cohort for diagnostics.
    pub fn describe(&self, tags: &TagStore) -> String {
        let mut out = format!("{} {}", self.id, tags.get(self.wordform).text);
        for r in &self.readings {
            out.push_str("\n\t");
            for t in &r.tags_list {
                out.push_str(&tags.get(*t).text);
                out.push(' ');
            }
        }
        out
    }
}
