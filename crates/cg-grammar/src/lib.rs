//! Compiled-grammar data model for the constraint grammar engine: interned
//! tags, compiled sets, rules, contextual tests, and the grammar container
//! with its reverse indices.
//!
//! This crate holds no engine state; the rule application engine in
//! `cg-core` consumes these types read-only (apart from runtime tag
//! interning through [`TagStore`]).

pub mod contextual;
pub mod grammar;
pub mod rule;
pub mod set;
pub mod tag;

pub use contextual::{ContextualTest, TestFlags};
pub use grammar::Grammar;
pub use rule::{Rule, RuleFlags, RuleId, RuleKind};
pub use set::{CompositeTag, Set, SetId, SetOp};
pub use tag::{NumOp, Tag, TagFlags, TagId, TagStore};
