use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EngineOptions — deserialized from [engine]
// ---------------------------------------------------------------------------

/// Runtime options for the rule application engine and the streaming
/// controller.
///
/// The iteration ceilings are safety valves against runaway fixpoint loops
/// and cyclic dependency graphs; the defaults match the long-standing
/// behavior of constraint grammar processors and should not be lowered
/// without evidence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Cohort count after which a soft delimiter closes the window.
    pub soft_limit: u32,
    /// Cohort count at which the window is force-closed with a warning.
    pub hard_limit: u32,
    /// How far back to search for an already-buffered soft delimiter once
    /// the soft limit is reached.
    pub soft_lookback: u32,
    /// Closed windows buffered ahead before the engine runs one.
    pub window_span: u32,
    /// Finished windows retained behind the current one for spanning tests.
    pub prev_retention: u32,
    /// Maximum section re-runs per window before processing is abandoned.
    pub fixpoint_ceiling: u32,
    /// Maximum ancestor-walk depth in dependency traversal.
    pub dep_depth_ceiling: u32,
    /// Refuse dependency attachments that would create a cycle.
    pub dep_block_loops: bool,
    /// Refuse dependency attachments that would create a crossing span.
    pub dep_block_crossing: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            soft_limit: 300,
            hard_limit: 500,
            soft_lookback: 30,
            window_span: 2,
            prev_retention: 2,
            fixpoint_ceiling: 1000,
            dep_depth_ceiling: 1000,
            dep_block_loops: true,
            dep_block_crossing: false,
        }
    }
}

impl EngineOptions {
    /// Parse from a TOML document with an optional `[engine]` table.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default)]
            engine: EngineOptions,
        }
        let doc: Doc = toml::from_str(text)?;
        doc.engine.validate()?;
        Ok(doc.engine)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hard_limit == 0 {
            bail!("hard_limit must be at least 1");
        }
        if self.soft_limit > self.hard_limit {
            bail!(
                "soft_limit ({}) must not exceed hard_limit ({})",
                self.soft_limit,
                self.hard_limit
            );
        }
        if self.window_span == 0 {
            bail!("window_span must be at least 1");
        }
        if self.fixpoint_ceiling == 0 || self.dep_depth_ceiling == 0 {
            bail!("iteration ceilings must be at least 1");
        }
        Ok(())
    }
}
