use std::collections::{BTreeSet, HashMap};

use crate::tag::{TagId, TagStore};

// ---------------------------------------------------------------------------
// SetId & algebra
// ---------------------------------------------------------------------------

/// Handle for a compiled [`Set`] inside a [`Grammar`](crate::Grammar).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetId(pub u32);

/// Boolean combinator between two operand sets of an algebraic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    /// `A OR B` — either operand matches.
    Union,
    /// `A - B` — left matches and right does not.
    Difference,
    /// `A + B` — both operands match.
    Intersection,
    /// `A ∆ B` — exactly one operand matches.
    SymmetricDifference,
}

// ---------------------------------------------------------------------------
// Composite tags
// ---------------------------------------------------------------------------

/// A fixed AND-combination of tags: a reading matches when it carries every
/// member (fail-fast members veto instead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeTag {
    pub tags: BTreeSet<TagId>,
}

impl CompositeTag {
    pub fn new(tags: impl IntoIterator<Item = TagId>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Set
// ---------------------------------------------------------------------------

/// A named boolean predicate over tags: OR'd single tags, OR'd composite
/// AND-groups, or an algebraic combination of other sets.
///
/// Leaf sets are compiled by [`compile`](Set::compile) into fast-lookup
/// indices before use: plain single tags go into an identity set, special
/// tags (regex / numeric / any / case-insensitive) into a separate list the
/// matcher evaluates per reading, and composites into an index keyed by
/// their first plain member for cheap candidate pruning.
#[derive(Debug, Clone, Default)]
pub struct Set {
    pub id: SetId,
    pub name: String,
    /// OR'd single-tag alternatives, identity-matched.
    pub single_tags: BTreeSet<TagId>,
    /// OR'd single-tag alternatives needing per-reading evaluation.
    pub single_special: Vec<TagId>,
    /// OR'd AND-group alternatives.
    pub composites: Vec<CompositeTag>,
    /// Operand sets when this is an algebraic set; empty for leaf sets.
    pub sets: Vec<SetId>,
    /// Combinators between consecutive operands; `ops.len() == sets.len() - 1`.
    pub ops: Vec<SetOp>,
    /// Candidate composite positions keyed by a plain member tag.
    pub composite_index: HashMap<TagId, Vec<usize>>,
    /// Composite positions with no plain member to key on.
    pub composite_rest: Vec<usize>,
    /// True when any reachable tag is special (forces conservative pruning).
    pub has_special: bool,
    /// True when the set can match regardless of which tags a reading holds
    /// (contains `*`).
    pub matches_any: bool,
}

impl Set {
    pub fn new(id: SetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_algebraic(&self) -> bool {
        !self.sets.is_empty()
    }

    /// Build the fast-lookup indices. Called once by
    /// [`Grammar::reindex`](crate::Grammar::reindex); idempotent.
    pub fn compile(&mut self, tags: &TagStore) {
        self.composite_index.clear();
        self.composite_rest.clear();
        self.has_special = false;
        self.matches_any = false;

        // Partition single tags into identity-matched and special.
        let singles: Vec<TagId> = self
            .single_tags
            .iter()
            .copied()
            .chain(self.single_special.iter().copied())
            .collect();
        self.single_tags.clear();
        self.single_special.clear();
        for t in singles {
            let flags = tags.get(t).flags;
            if flags.any {
                self.matches_any = true;
            }
            if flags.is_special() {
                self.has_special = true;
                self.single_special.push(t);
            } else {
                self.single_tags.insert(t);
            }
        }

        for (pos, comp) in self.composites.iter().enumerate() {
            let key = comp
                .tags
                .iter()
                .copied()
                .find(|t| !tags.get(*t).flags.is_special());
            if comp.tags.iter().any(|t| tags.get(*t).flags.is_special()) {
                self.has_special = true;
            }
            match key {
                Some(t) => self.composite_index.entry(t).or_default().push(pos),
                None => self.composite_rest.push(pos),
            }
        }
    }

    /// All tags reachable from this leaf set (operands excluded).
    pub fn own_tags(&self) -> impl Iterator<Item = TagId> + '_ {
        self.single_tags
            .iter()
            .copied()
            .chain(self.single_special.iter().copied())
            .chain(self.composites.iter().flat_map(|c| c.tags.iter().copied()))
    }
}

#[cfg(test)]
mod tests;
