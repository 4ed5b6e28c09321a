use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, bail};

use crate::contextual::ContextualTest;
use crate::rule::{Rule, RuleId, RuleKind};
use crate::set::{CompositeTag, Set, SetId, SetOp};
use crate::tag::{TagId, TagStore};

// ---------------------------------------------------------------------------
// Grammar — the compiled grammar object
// ---------------------------------------------------------------------------

/// The compiled grammar the engine consumes: sets, rules grouped into
/// ordered sections, templates, delimiter sets, and the reverse indices
/// driving incremental rule-to-cohort candidate maintenance.
///
/// Construction happens through the `add_*` methods (normally called by an
/// external grammar compiler), followed by [`reindex`](Self::reindex) and
/// [`verify`](Self::verify) before the first cohort is pushed.
#[derive(Debug, Default)]
pub struct Grammar {
    pub sets: Vec<Set>,
    sets_by_name: HashMap<String, SetId>,
    pub templates: HashMap<String, ContextualTest>,
    pub rules: Vec<Rule>,
    /// BEFORE-SECTIONS pseudo-section, run first on every window.
    pub before_sections: Vec<RuleId>,
    /// Numbered sections in declared order.
    pub sections: Vec<Vec<RuleId>>,
    /// AFTER-SECTIONS pseudo-section, run last.
    pub after_sections: Vec<RuleId>,
    pub delimiters: Option<SetId>,
    pub soft_delimiters: Option<SetId>,
    /// `>>>` window-start magic tag.
    pub tag_begin: TagId,
    /// `<<<` window-end magic tag.
    pub tag_end: TagId,
    pub tag_any: TagId,

    // Reverse indices, rebuilt by `reindex`.
    /// Tag → sets whose tag closure contains it.
    pub sets_by_tag: HashMap<TagId, Vec<SetId>>,
    /// Sets that may match regardless of which indexed tags a reading holds.
    pub any_sets: Vec<SetId>,
    /// Set → rules targeting it (directly or through operands).
    pub rules_by_set: HashMap<SetId, Vec<RuleId>>,
}

impl Grammar {
    pub fn new(tags: &mut TagStore) -> Self {
        let tag_begin = tags.intern(">>>");
        let tag_end = tags.intern("<<<");
        let tag_any = tags.intern("*");
        Self {
            tag_begin,
            tag_end,
            tag_any,
            ..Self::default()
        }
    }

    // -- construction -------------------------------------------------------

    /// Add a LIST-style leaf set: each alternative with one tag becomes a
    /// single tag, longer alternatives become composite AND-groups.
    pub fn add_list_set(&mut self, tags: &mut TagStore, name: &str, alts: &[&[&str]]) -> SetId {
        let id = SetId(self.sets.len() as u32);
        let mut set = Set::new(id, name);
        for alt in alts {
            match alt {
                [] => {}
                [single] => {
                    set.single_tags.insert(tags.intern(single));
                }
                many => {
                    set.composites
                        .push(CompositeTag::new(many.iter().map(|t| tags.intern(t))));
                }
            }
        }
        self.sets_by_name.insert(name.to_owned(), id);
        self.sets.push(set);
        id
    }

    /// Add a SET-style algebraic set over previously defined operands.
    pub fn add_combined_set(&mut self, name: &str, parts: &[SetId], ops: &[SetOp]) -> SetId {
        let id = SetId(self.sets.len() as u32);
        let mut set = Set::new(id, name);
        set.sets = parts.to_vec();
        set.ops = ops.to_vec();
        self.sets_by_name.insert(name.to_owned(), id);
        self.sets.push(set);
        id
    }

    pub fn set_by_name(&self, name: &str) -> Option<SetId> {
        self.sets_by_name.get(name).copied()
    }

    pub fn set(&self, id: SetId) -> &Set {
        &self.sets[id.0 as usize]
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }

    /// Allocate the next rule id without placing the rule in a section.
    pub fn next_rule_id(&self) -> RuleId {
        RuleId(self.rules.len() as u32)
    }

    /// Add a rule to a numbered section, growing the section list as needed.
    pub fn add_rule(&mut self, section: usize, rule: Rule) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        debug_assert_eq!(id, rule.id);
        while self.sections.len() <= section {
            self.sections.push(Vec::new());
        }
        self.sections[section].push(id);
        self.rules.push(rule);
        id
    }

    pub fn add_rule_before(&mut self, rule: Rule) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.before_sections.push(id);
        self.rules.push(rule);
        id
    }

    pub fn add_rule_after(&mut self, rule: Rule) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.after_sections.push(id);
        self.rules.push(rule);
        id
    }

    /// Sections in execution order: BEFORE, numbered, AFTER.
    pub fn ordered_sections(&self) -> Vec<&[RuleId]> {
        let mut out: Vec<&[RuleId]> = Vec::with_capacity(self.sections.len() + 2);
        if !self.before_sections.is_empty() {
            out.push(&self.before_sections);
        }
        for s in &self.sections {
            out.push(s);
        }
        if !self.after_sections.is_empty() {
            out.push(&self.after_sections);
        }
        out
    }

    // -- indexing -----------------------------------------------------------

    /// Compile all sets and rebuild the reverse indices. Must run after the
    /// last `add_*` call and before the engine sees any input.
    pub fn reindex(&mut self, tags: &TagStore) {
        for set in &mut self.sets {
            set.compile(tags);
        }

        self.sets_by_tag.clear();
        self.any_sets.clear();
        self.rules_by_set.clear();

        // Per-set tag closure and specialness, operands folded in. Operand
        // ids are always smaller (verified), so one forward pass suffices.
        let mut closures: Vec<BTreeSet<TagId>> = Vec::with_capacity(self.sets.len());
        let mut special: Vec<bool> = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            let mut tags_of: BTreeSet<TagId> = set.own_tags().collect();
            let mut sp = set.has_special || set.matches_any;
            for op in &set.sets {
                let idx = op.0 as usize;
                if idx < closures.len() {
                    tags_of.extend(closures[idx].iter().copied());
                    sp |= special[idx];
                }
            }
            closures.push(tags_of);
            special.push(sp);
        }

        for (idx, closure) in closures.iter().enumerate() {
            let sid = SetId(idx as u32);
            for t in closure {
                self.sets_by_tag.entry(*t).or_default().push(sid);
            }
            if special[idx] {
                self.any_sets.push(sid);
            }
        }

        for rule in &self.rules {
            let tidx = rule.target.0 as usize;
            self.rules_by_set
                .entry(rule.target)
                .or_default()
                .push(rule.id);
            for op in &self.sets[tidx].sets {
                self.rules_by_set.entry(*op).or_default().push(rule.id);
            }
        }
    }

    // -- verification -------------------------------------------------------

    /// Validate all cross-references. Any failure here is a fatal
    /// configuration error: the engine must not see input afterwards.
    pub fn verify(&self, _tags: &TagStore) -> Result<()> {
        for set in &self.sets {
            if set.is_algebraic() {
                if set.ops.len() + 1 != set.sets.len() {
                    bail!(
                        "set {:?}: {} operands require {} operators, found {}",
                        set.name,
                        set.sets.len(),
                        set.sets.len() - 1,
                        set.ops.len()
                    );
                }
                for op in &set.sets {
                    if op.0 >= set.id.0 {
                        bail!(
                            "set {:?}: operand {} is not defined before it",
                            set.name,
                            op.0
                        );
                    }
                }
            }
        }

        for rule in &self.rules {
            self.check_set_ref(rule.target, rule.id)?;
            for test in &rule.tests {
                self.check_test(test, rule.id)?;
            }
            if let Some(dt) = &rule.dep_target {
                self.check_test(dt, rule.id)?;
            }
            if rule.kind.needs_anchor() && rule.dep_target.is_none() {
                bail!(
                    "rule {} (line {}): {:?} requires an anchor context",
                    rule.id.0,
                    rule.line,
                    rule.kind
                );
            }
            if matches!(
                rule.kind,
                RuleKind::AddRelation | RuleKind::SetRelation | RuleKind::RemRelation
            ) && rule.maplist.is_empty()
            {
                bail!(
                    "rule {} (line {}): relation rule without relation names",
                    rule.id.0,
                    rule.line
                );
            }
        }

        if let Some(d) = self.delimiters {
            self.check_set_id(d, "DELIMITERS")?;
        }
        if let Some(d) = self.soft_delimiters {
            self.check_set_id(d, "SOFT-DELIMITERS")?;
        }
        Ok(())
    }

    fn check_test(&self, test: &ContextualTest, rule: RuleId) -> Result<()> {
        if test.driver_count() != 1 {
            bail!(
                "rule {}: contextual test must have exactly one of target/template/OR-list",
                rule.0
            );
        }
        if let Some(t) = test.target {
            self.check_set_ref(t, rule)?;
        }
        if let Some(b) = test.barrier {
            self.check_set_ref(b, rule)?;
        }
        if let Some(b) = test.cbarrier {
            self.check_set_ref(b, rule)?;
        }
        if let Some(name) = &test.template
            && !self.templates.contains_key(name)
        {
            bail!("rule {}: unknown template {:?}", rule.0, name);
        }
        if test.flags.relation && test.relation.is_none() {
            bail!("rule {}: relation test without a relation name", rule.0);
        }
        if let Some(linked) = &test.linked {
            self.check_test(linked, rule)?;
        }
        for alt in &test.ors {
            self.check_test(alt, rule)?;
        }
        Ok(())
    }

    fn check_set_ref(&self, id: SetId, rule: RuleId) -> Result<()> {
        if id.0 as usize >= self.sets.len() {
            bail!("rule {}: reference to undefined set {}", rule.0, id.0);
        }
        Ok(())
    }

    fn check_set_id(&self, id: SetId, what: &str) -> Result<()> {
        if id.0 as usize >= self.sets.len() {
            bail!("{what}: reference to undefined set {}", id.0);
        }
        Ok(())
    }
}
