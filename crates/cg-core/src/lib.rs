//! Window-based rule application over ambiguous token streams.
//!
//! Input arrives as cohorts (a surface wordform with candidate readings),
//! gets buffered into delimited windows, and each window is disambiguated
//! by the sectioned rules of a compiled grammar before being handed to a
//! [`StreamSink`]. Cohorts live in a central arena keyed by [`CohortId`];
//! windows, candidate indexes, and the dependency/relation graphs hold
//! handles only.

pub mod cohort;
pub mod context;
pub mod dep;
pub mod engine;
pub mod error;
pub mod index;
pub mod matcher;
pub mod reading;
pub mod stream;
pub mod window;

pub use cohort::{Cohort, CohortId, PossibleSets};
pub use context::ContextEval;
pub use engine::{Engine, EngineStatus};
pub use error::{CoreError, CoreReason, CoreResult};
pub use matcher::Matcher;
pub use reading::Reading;
pub use stream::{CohortBuilder, StreamController, StreamSink, WindowOutput};
pub use window::{SingleWindow, WindowStore};
