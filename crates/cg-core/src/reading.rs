use std::collections::{BTreeSet, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

use cg_grammar::{RuleId, TagId, TagStore};

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One candidate interpretation of a cohort: an ordered tag list plus the
/// derived indices the matcher relies on.
///
/// The derived fields (`tags`, `tags_plain`, `tags_textual`,
/// `tags_numerical`, `mapping`, `baseform`, hashes) are recomputed by
/// [`rehash`](Self::rehash) after every tag-list change; all mutation goes
/// through `add_tag` / `remove_tag` / `insert_tag_at`, which do this
/// automatically.
#[derive(Debug, Clone, Default)]
pub struct Reading {
    /// Tags in surface order.
    pub tags_list: Vec<TagId>,
    /// Full tag set, order-independent.
    pub tags: BTreeSet<TagId>,
    /// Tag set excluding mapping and boundary tags.
    pub tags_plain: BTreeSet<TagId>,
    /// Quoted (wordform/baseform) tags.
    pub tags_textual: BTreeSet<TagId>,
    /// Numeric key → value carried by this reading's comparison tags.
    pub tags_numerical: HashMap<String, f64>,
    /// First baseform tag, if any.
    pub baseform: Option<TagId>,
    /// The singular mapping tag, if any.
    pub mapping: Option<TagId>,
    /// Content hash over the full tag set.
    pub hash: u64,
    /// Content hash excluding the mapping tag; groups readings that differ
    /// only by grammatical function.
    pub hash_plain: u64,
    /// Rules that have touched this reading, in firing order.
    pub hit_by: Vec<RuleId>,
    /// Sub-readings of a multi-word union, in surface order.
    pub subs: Vec<Reading>,
}

impl Reading {
    pub fn from_tags(store: &TagStore, tags: impl IntoIterator<Item = TagId>) -> Self {
        let mut r = Reading {
            tags_list: tags.into_iter().collect(),
            ..Reading::default()
        };
        r.rehash(store);
        r
    }

    pub fn has(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }

    /// Append a tag; returns false (and leaves the reading untouched) when
    /// the tag is already present.
    pub fn add_tag(&mut self, store: &TagStore, tag: TagId) -> bool {
        if self.has(tag) {
            return false;
        }
        self.tags_list.push(tag);
        self.rehash(store);
        true
    }

    /// Remove every occurrence of a tag; returns whether anything changed.
    pub fn remove_tag(&mut self, store: &TagStore, tag: TagId) -> bool {
        let before = self.tags_list.len();
        self.tags_list.retain(|t| *t != tag);
        if self.tags_list.len() == before {
            return false;
        }
        self.rehash(store);
        true
    }

    /// Splice tags into the surface order at `idx` (clamped to the end).
    pub fn insert_tags_at(&mut self, store: &TagStore, idx: usize, tags: &[TagId]) {
        let idx = idx.min(self.tags_list.len());
        for (i, t) in tags.iter().enumerate() {
            self.tags_list.insert(idx + i, *t);
        }
        self.rehash(store);
    }

    /// Recompute all derived indices from `tags_list`.
    pub fn rehash(&mut self, store: &TagStore) {
        self.tags.clear();
        self.tags_plain.clear();
        self.tags_textual.clear();
        self.tags_numerical.clear();
        self.baseform = None;
        self.mapping = None;

        for &t in &self.tags_list {
            let tag = store.get(t);
            self.tags.insert(t);
            if tag.flags.mapping {
                if self.mapping.is_none() {
                    self.mapping = Some(t);
                }
            } else if !tag.flags.boundary {
                self.tags_plain.insert(t);
            }
            if tag.flags.textual {
                self.tags_textual.insert(t);
                if tag.flags.baseform && self.baseform.is_none() {
                    self.baseform = Some(t);
                }
            }
            if let (Some(key), Some(value)) = (&tag.num_key, tag.num_value) {
                self.tags_numerical.insert(key.clone(), value);
            }
        }

        self.hash = hash_tags(store, self.tags.iter().copied());
        self.hash_plain = hash_tags(
            store,
            self.tags.iter().copied().filter(|t| Some(*t) != self.mapping),
        );
    }
}

/// Hash a tag sequence by content hash. Callers pass sorted sets, so the
/// result is invariant to the order tags were added.
fn hash_tags(store: &TagStore, tags: impl Iterator<Item = TagId>) -> u64 {
    let mut h = DefaultHasher::new();
    for t in tags {
        store.get(t).hash.hash(&mut h);
    }
    h.finish()
}
