//! Generator and coroutine lifecycle.
//!
//! A [`GeneratorContext`] owns the frame of a suspendable body and moves
//! through `JustStarted -> Running -> Completed`, with `Throwing` while an
//! injected exception is in flight. Compiled contexts keep their state in a
//! fixed-layout footer; interpreted ones derive it from their frame record.
//! Both answer the same predicates.

mod context;
mod exception;
pub mod layout;
mod state;

use std::fmt;

pub use context::{
    FnBody, GenCx, GeneratorBody, GeneratorContext, Injection, ResumeOutcome, Step, body_fn,
};
pub use exception::{Exception, ExceptionKind};
pub use state::{GenState, GeneratorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorError {
    AlreadyExecuting { kind: GeneratorKind },
    Exhausted { kind: GeneratorKind },
    NonNoneToJustStarted { kind: GeneratorKind },
    NotACoroutine { kind: GeneratorKind },
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorError::AlreadyExecuting { kind } => write!(f, "{} already executing", kind),
            GeneratorError::Exhausted { kind } if kind.is_coroutine() => {
                write!(f, "cannot reuse already awaited coroutine")
            }
            GeneratorError::Exhausted { kind } => write!(f, "{} already exhausted", kind),
            GeneratorError::NonNoneToJustStarted { kind } => {
                write!(f, "can't send non-None value to a just-started {}", kind)
            }
            GeneratorError::NotACoroutine { kind } => {
                write!(f, "awaiter links require a coroutine, got {}", kind)
            }
        }
    }
}

impl std::error::Error for GeneratorError {}
