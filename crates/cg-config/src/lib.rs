//! Engine configuration: window limits, lookahead span, and the iteration
//! safety ceilings, loadable from TOML.

pub mod options;

pub use options::EngineOptions;
