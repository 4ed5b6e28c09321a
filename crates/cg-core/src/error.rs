use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("grammar configuration error")]
    Config,
    #[error("rule execution error")]
    RuleExec,
    #[error("window state error")]
    Window,
    #[error("stream error")]
    Stream,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Config => 1001,
            Self::RuleExec => 1002,
            Self::Window => 1003,
            Self::Stream => 1004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
