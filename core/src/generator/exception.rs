use std::fmt;
use std::sync::Arc;

use crate::object::ObjRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    StopIteration,
    StopAsyncIteration,
    GeneratorExit,
    RuntimeError,
    TypeError,
    ValueError,
    Other(Arc<str>),
}

impl ExceptionKind {
    pub fn name(&self) -> &str {
        match self {
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::StopAsyncIteration => "StopAsyncIteration",
            ExceptionKind::GeneratorExit => "GeneratorExit",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::Other(name) => name,
        }
    }
}

/// A runtime exception travelling through a generator body.
///
/// These are language-level values, not Rust errors: a body raises one and
/// the resumption entry point hands it back to the caller.
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: Arc<str>,
    pub value: Option<ObjRef>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: ObjRef) -> Self {
        self.value = Some(value);
        self
    }

    pub fn generator_exit() -> Self {
        Self::new(ExceptionKind::GeneratorExit, "")
    }

    pub fn runtime_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn is(&self, kind: &ExceptionKind) -> bool {
        &self.kind == kind
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_value", &self.value.is_some())
            .finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}
