use crate::set::SetId;
use crate::tag::TagId;

// ---------------------------------------------------------------------------
// TestFlags
// ---------------------------------------------------------------------------

/// Position and mode switches of a contextual test.
///
/// Flags compose: `scan_first` + `span_both` walks across window edges,
/// `dep_child` + `deep` walks the whole descendant closure, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestFlags {
    /// Every active reading of the tested cohort must match, not just one.
    pub careful: bool,
    /// Invert the final result of the whole test (including scans).
    pub negate: bool,
    /// Invert the match at the resolved position only.
    pub not_: bool,
    /// Scan from the anchor position, stopping at the first match.
    pub scan_first: bool,
    /// Scan from the anchor position, testing every cohort up to a barrier.
    pub scan_all: bool,
    /// Offset counts from the window start (negative: from the end).
    pub absolute: bool,
    /// Scans may continue into the previous window.
    pub span_left: bool,
    /// Scans may continue into the next window.
    pub span_right: bool,
    /// Scans may continue in both directions.
    pub span_both: bool,
    /// Resolve the dependency parent of the anchor.
    pub dep_parent: bool,
    /// Resolve the dependency children of the anchor.
    pub dep_child: bool,
    /// Resolve the dependency siblings of the anchor.
    pub dep_sibling: bool,
    /// With dep_parent/dep_child: walk the full ancestor/descendant closure.
    pub deep: bool,
    /// Resolve cohorts related to the anchor under `relation`.
    pub relation: bool,
    /// Include the anchor cohort itself among the candidates.
    pub self_: bool,
    /// Restrict graph candidates to the left of the anchor.
    pub left: bool,
    /// Restrict graph candidates to the right of the anchor.
    pub right: bool,
    /// Of the surviving candidates, test only the leftmost.
    pub leftmost: bool,
    /// Of the surviving candidates, test only the rightmost.
    pub rightmost: bool,
    /// Every candidate must match (fail on the first miss).
    pub all: bool,
    /// No candidate may match.
    pub none: bool,
    /// The tested cohort's deleted readings participate in matching.
    pub look_deleted: bool,
    /// The tested cohort's delayed readings participate in matching.
    pub look_delayed: bool,
    /// Scans may pass through the origin cohort.
    pub pass_origin: bool,
    /// Remember the matched cohort as the attach anchor for the rule.
    pub attach_to: bool,
    /// Remember the matched cohort as the mark for later tests.
    pub mark: bool,
}

impl TestFlags {
    pub fn is_scanning(&self) -> bool {
        self.scan_first || self.scan_all
    }

    pub fn is_graph(&self) -> bool {
        self.dep_parent || self.dep_child || self.dep_sibling || self.relation
    }

    pub fn spans_left(&self) -> bool {
        self.span_left || self.span_both
    }

    pub fn spans_right(&self) -> bool {
        self.span_right || self.span_both
    }
}

// ---------------------------------------------------------------------------
// ContextualTest
// ---------------------------------------------------------------------------

/// A positional or graph query a rule must satisfy before acting.
///
/// Exactly one of three drivers applies per instance: a direct target set,
/// a named template, or a list of OR alternatives.
/// [`Grammar::verify`](crate::Grammar::verify) enforces this before any
/// input is processed.
#[derive(Debug, Clone, Default)]
pub struct ContextualTest {
    pub offset: i32,
    pub flags: TestFlags,
    pub target: Option<SetId>,
    /// Halts a scan in its direction without counting as a hit.
    pub barrier: Option<SetId>,
    /// Barrier variant requiring a careful (all-readings) match to halt.
    pub cbarrier: Option<SetId>,
    /// Relation name for `relation`-mode tests.
    pub relation: Option<TagId>,
    /// AND-linked follow-up test, evaluated from the matched cohort.
    pub linked: Option<Box<ContextualTest>>,
    /// OR alternatives; the first that succeeds wins.
    pub ors: Vec<ContextualTest>,
    /// Named template reference resolved through the grammar.
    pub template: Option<String>,
}

impl ContextualTest {
    pub fn at(offset: i32, target: SetId) -> Self {
        Self {
            offset,
            target: Some(target),
            ..Self::default()
        }
    }

    /// Scan-first test (`*offset`), direction given by the offset sign.
    pub fn scan(offset: i32, target: SetId) -> Self {
        let mut t = Self::at(offset, target);
        t.flags.scan_first = true;
        t
    }

    /// Scan-all test (`**offset`), barrier-aware exhaustive scan.
    pub fn scan_all(offset: i32, target: SetId) -> Self {
        let mut t = Self::at(offset, target);
        t.flags.scan_all = true;
        t
    }

    pub fn with_barrier(mut self, barrier: SetId) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn linked_to(mut self, next: ContextualTest) -> Self {
        self.linked = Some(Box::new(next));
        self
    }

    /// Count of drivers configured; valid tests have exactly one.
    pub fn driver_count(&self) -> usize {
        usize::from(self.target.is_some())
            + usize::from(self.template.is_some())
            + usize::from(!self.ors.is_empty())
    }
}
