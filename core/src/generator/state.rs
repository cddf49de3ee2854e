/// Which flavour of suspendable body a context runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    Generator,
    Coroutine,
    AsyncGenerator,
}

impl GeneratorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratorKind::Generator => "generator",
            GeneratorKind::Coroutine => "coroutine",
            GeneratorKind::AsyncGenerator => "async_generator",
        }
    }

    pub fn is_coroutine(self) -> bool {
        self == GeneratorKind::Coroutine
    }
}

impl std::fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a compiled generator.
///
/// `Running` covers both "executing" and "suspended"; the yield point tells
/// the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GenState {
    JustStarted = 0,
    Running = 1,
    Completed = 2,
    Throwing = 3,
}

impl GenState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => GenState::JustStarted,
            1 => GenState::Running,
            3 => GenState::Throwing,
            _ => GenState::Completed,
        }
    }
}
