use crate::contextual::ContextualTest;
use crate::set::SetId;
use crate::tag::TagId;

// ---------------------------------------------------------------------------
// RuleId & kinds
// ---------------------------------------------------------------------------

/// Handle for a [`Rule`] inside a [`Grammar`](crate::Grammar). Ids follow
/// declaration order, which is also execution order within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub u32);

/// The mutating action a rule performs on its hit readings or cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Keep hit readings, move the rest to the deleted list.
    Select,
    /// Move hit readings to the deleted list.
    Remove,
    /// SELECT when the context holds, REMOVE the target readings otherwise.
    Iff,
    /// Append tags to hit readings.
    Add,
    /// Add a mapping tag and lock the reading against further mapping.
    Map,
    /// Remove the mapping tag and unlock the reading.
    Unmap,
    /// Replace all non-core tags of hit readings with the tag list.
    Replace,
    /// Remove the search tags and splice the replacement tags in their place.
    Substitute,
    /// Append a whole new reading to the cohort.
    Append,
    /// Duplicate hit readings, adding the tag list to the copies.
    Copy,
    /// Cut the window after the target cohort.
    Delimit,
    /// Remove the target cohort from the window.
    RemCohort,
    /// Insert a new cohort before/after the target.
    AddCohort,
    /// Move the target cohort before/after the anchor cohort.
    Move,
    /// Swap the target cohort with the anchor cohort.
    Switch,
    /// Fold the anchor cohort's readings into the target as sub-readings.
    MergeCohorts,
    /// Expand the target's sub-readings into following cohorts.
    SplitCohort,
    /// Attach the target as dependency child of the anchor.
    SetParent,
    /// Attach the anchor as dependency child of the target.
    SetChild,
    /// Detach the target from its dependency parent.
    RemParent,
    /// Add named relation edges from the target to the anchor.
    AddRelation,
    /// Replace the named relation edges of the target with the anchor.
    SetRelation,
    /// Remove named relation edges from the target to the anchor.
    RemRelation,
}

impl RuleKind {
    /// Kinds that change the cohort sequence and therefore force a window
    /// renumber + reindex after firing.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            RuleKind::Delimit
                | RuleKind::RemCohort
                | RuleKind::AddCohort
                | RuleKind::Move
                | RuleKind::Switch
                | RuleKind::MergeCohorts
                | RuleKind::SplitCohort
        )
    }

    /// Kinds that resolve an anchor cohort through the rule's dependency
    /// target test before acting.
    pub fn needs_anchor(self) -> bool {
        matches!(
            self,
            RuleKind::Move
                | RuleKind::Switch
                | RuleKind::MergeCohorts
                | RuleKind::SetParent
                | RuleKind::SetChild
                | RuleKind::AddRelation
                | RuleKind::SetRelation
                | RuleKind::RemRelation
        )
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Per-rule behavioral switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleFlags {
    /// Removal may empty the cohort's reading list.
    pub unsafe_removal: bool,
    /// Removal must leave at least one reading even on unsafe-by-default kinds.
    pub safe: bool,
    /// Dependency attachment may create cycles.
    pub allow_loop: bool,
    /// Dependency attachment may create crossing spans.
    pub allow_cross: bool,
    /// Removed readings go to the delayed list instead of deleted.
    pub delayed: bool,
    /// Removed readings go to the ignored list instead of deleted.
    pub ignored: bool,
    /// Insert before the anchor instead of after (AddCohort / Move).
    pub before: bool,
    /// Contextual tests may see deleted readings.
    pub look_deleted: bool,
    /// Contextual tests may see delayed readings.
    pub look_delayed: bool,
    /// Re-run this rule on its own output until stable.
    pub repeat: bool,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One declarative rule: a target set, an action, an AND-chain of contextual
/// tests, and for dependency/relation/movement kinds a separate anchor test.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    /// Grammar source line, used in diagnostics and traces.
    pub line: u32,
    pub kind: RuleKind,
    pub flags: RuleFlags,
    pub target: SetId,
    /// Contextual tests, all of which must succeed, in declared order.
    pub tests: Vec<ContextualTest>,
    /// Anchor test for kinds that attach/move relative to another cohort.
    pub dep_target: Option<ContextualTest>,
    /// Tags produced by the action (mapped / added / replacement tags, the
    /// wordform + reading for AddCohort, relation names for relation kinds).
    pub maplist: Vec<TagId>,
    /// Tags consumed by the action (Substitute search list, Unmap targets).
    pub sublist: Vec<TagId>,
}

impl Rule {
    pub fn new(id: RuleId, kind: RuleKind, target: SetId) -> Self {
        Self {
            id,
            line: 0,
            kind,
            flags: RuleFlags::default(),
            target,
            tests: Vec::new(),
            dep_target: None,
            maplist: Vec::new(),
            sublist: Vec::new(),
        }
    }
}
