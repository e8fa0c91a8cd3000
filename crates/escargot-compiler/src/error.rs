//! Generator-side errors.
//!
//! These are engine-internal failures surfaced to the embedder, distinct
//! from script-visible thrown values.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("constant pool limit exceeded")]
    TooManyConstants,
    #[error("type-profile slot limit exceeded")]
    TooManyProfileSlots,
    #[error("inline-cache slot limit exceeded")]
    TooManyCacheSlots,
    #[error("too many local variables in one function")]
    TooManyLocals,
    #[error("too many arguments at a call site")]
    TooManyArguments,
    #[error("too many nested functions")]
    TooManyFunctions,
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("break outside of a breakable construct")]
    StrayBreak,
    #[error("continue outside of a loop")]
    StrayContinue,
    #[error("unresolved label '{0}'")]
    UnresolvedLabel(String),
}
