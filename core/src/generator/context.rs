use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::code::CodeObject;
use crate::frame::{FrameHandle, FrameRef, FrameState, MaterializeFrame, ShadowFrame, ShadowStack};
use crate::gil::{GilCell, GilToken};
use crate::object::{ObjRef, ObjectValue, builtins};

use super::GeneratorError;
use super::exception::{Exception, ExceptionKind};
use super::layout::GenDataAccessor;
use super::state::{GenState, GeneratorKind};

const TRACE_TARGET: &str = "umbra::generator";

/// What the caller pushes into a suspended body.
#[derive(Debug)]
pub enum Injection {
    Send(ObjRef),
    Throw(Exception),
    /// Ask the body to finish. It observes this as a thrown `GeneratorExit`.
    Close,
}

/// What one run of a body produced.
#[derive(Debug)]
pub enum Step {
    Yield(ObjRef),
    Return(ObjRef),
    Raise(Exception),
}

/// Result of a resumption, as seen by the caller.
#[derive(Debug)]
pub enum ResumeOutcome {
    Yielded(ObjRef),
    Returned(ObjRef),
    Raised(Exception),
}

impl ResumeOutcome {
    pub fn is_yield(&self) -> bool {
        matches!(self, ResumeOutcome::Yielded(_))
    }
}

/// The code a generator runs between two suspension points.
pub trait GeneratorBody: Send {
    fn step(&mut self, cx: &mut GenCx<'_>, input: Injection) -> Step;
}

/// Body backed by a closure.
pub struct FnBody<F>(F);

impl<F> GeneratorBody for FnBody<F>
where
    F: FnMut(&mut GenCx<'_>, Injection) -> Step + Send,
{
    fn step(&mut self, cx: &mut GenCx<'_>, input: Injection) -> Step {
        (self.0)(cx, input)
    }
}

pub fn body_fn<F>(f: F) -> FnBody<F>
where
    F: FnMut(&mut GenCx<'_>, Injection) -> Step + Send,
{
    FnBody(f)
}

/// Handle a running body gets for its own context.
pub struct GenCx<'a> {
    gil: GilToken<'a>,
    generator: &'a GeneratorContext,
}

impl<'a> GenCx<'a> {
    pub fn gil(&self) -> GilToken<'a> {
        self.gil
    }

    pub fn kind(&self) -> GeneratorKind {
        self.generator.kind
    }

    pub fn frame(&self) -> &FrameRef {
        &self.generator.frame
    }

    pub fn set_ip(&self, ip: isize) {
        self.generator.frame.set_ip(ip);
    }

    /// Full record for the running frame, built on demand.
    pub fn record(&self) -> Option<FrameHandle> {
        self.generator.frame.materialize().ok()
    }

    /// Record that this body is about to suspend on `callee`.
    pub fn awaiting(&self, callee: &GeneratorContext) -> Result<(), GeneratorError> {
        callee.set_awaiter(Some(self.generator))
    }
}

enum Backing {
    Compiled(GenDataAccessor),
    /// The live record; `None` once the body finished.
    Interpreted(Mutex<Option<FrameHandle>>),
}

/// State of one generator, coroutine or async generator.
///
/// Created together with its frame and dropped with its last reference. A
/// completed context is never reset or handed out again.
pub struct GeneratorContext {
    this: Weak<GeneratorContext>,
    kind: GeneratorKind,
    frame: FrameRef,
    backing: Backing,
    body: GilCell<Option<Box<dyn GeneratorBody>>>,
    yields: AtomicUsize,
    awaiter: Mutex<Option<Weak<GeneratorContext>>>,
}

impl GeneratorContext {
    /// Context for compiled code. The frame starts compact.
    pub fn compiled(
        kind: GeneratorKind,
        code: Arc<CodeObject>,
        materializer: Option<Arc<dyn MaterializeFrame>>,
        body: impl GeneratorBody + 'static,
    ) -> Arc<Self> {
        let frame = ShadowFrame::compiled(code, materializer);
        Self::build(kind, frame, Backing::Compiled(GenDataAccessor::new()), Box::new(body))
    }

    /// Context for interpreted code, driven by a full frame record.
    pub fn interpreted(kind: GeneratorKind, record: FrameHandle, body: impl GeneratorBody + 'static) -> Arc<Self> {
        let frame = ShadowFrame::interpreted(Arc::clone(&record));
        Self::build(kind, frame, Backing::Interpreted(Mutex::new(Some(record))), Box::new(body))
    }

    fn build(kind: GeneratorKind, frame: FrameRef, backing: Backing, body: Box<dyn GeneratorBody>) -> Arc<Self> {
        debug!(
            target: TRACE_TARGET,
            kind = %kind,
            frame = %frame.code().qualified_name(),
            compiled = matches!(backing, Backing::Compiled(_)),
            "created generator context"
        );
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            kind,
            frame,
            backing,
            body: GilCell::new(Some(body)),
            yields: AtomicUsize::new(0),
            awaiter: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> GeneratorKind {
        self.kind
    }

    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        self.frame.code()
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.backing, Backing::Compiled(_))
    }

    /// Lifecycle state. The interpreted backing has no separate throwing
    /// state and reports `Running` while an exception is in flight.
    pub fn state(&self) -> GenState {
        match &self.backing {
            Backing::Compiled(data) => data.state(),
            Backing::Interpreted(_) => {
                if self.is_completed() {
                    GenState::Completed
                } else if self.is_just_started() {
                    GenState::JustStarted
                } else {
                    GenState::Running
                }
            }
        }
    }

    /// Set iff the body is suspended at a yield.
    pub fn yield_point(&self) -> Option<NonZeroUsize> {
        match &self.backing {
            Backing::Compiled(data) => data.yield_point(),
            Backing::Interpreted(live) => {
                let suspended = lock(live)
                    .as_ref()
                    .is_some_and(|record| record.state() == FrameState::Suspended);
                if suspended {
                    NonZeroUsize::new(self.yields.load(Ordering::Relaxed))
                } else {
                    None
                }
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.backing {
            Backing::Compiled(data) => data.state() == GenState::Completed,
            Backing::Interpreted(live) => lock(live)
                .as_ref()
                .is_none_or(|record| record.state().has_completed()),
        }
    }

    pub fn is_just_started(&self) -> bool {
        match &self.backing {
            Backing::Compiled(data) => data.state() == GenState::JustStarted,
            Backing::Interpreted(live) => lock(live).as_ref().is_some_and(|record| record.last_instr() == -1),
        }
    }

    pub fn is_executing(&self) -> bool {
        match &self.backing {
            Backing::Compiled(data) => match data.state() {
                GenState::Running => data.yield_point().is_none(),
                GenState::Throwing => true,
                GenState::JustStarted | GenState::Completed => false,
            },
            Backing::Interpreted(live) => lock(live)
                .as_ref()
                .is_some_and(|record| record.state().is_executing()),
        }
    }

    pub fn is_runnable(&self) -> bool {
        match &self.backing {
            Backing::Compiled(data) => match data.state() {
                GenState::JustStarted => true,
                GenState::Running => data.yield_point().is_some(),
                GenState::Throwing | GenState::Completed => false,
            },
            Backing::Interpreted(live) => lock(live)
                .as_ref()
                .is_some_and(|record| record.state().is_runnable()),
        }
    }

    /// The context awaiting this coroutine, if it is still alive.
    pub fn awaiter(&self) -> Option<Arc<GeneratorContext>> {
        lock(&self.awaiter).as_ref().and_then(Weak::upgrade)
    }

    /// Record (or clear) who awaits this coroutine. The awaiter's frame is
    /// linked into this frame so stack walks pass through it.
    pub fn set_awaiter(&self, awaiter: Option<&GeneratorContext>) -> Result<(), GeneratorError> {
        if !self.kind.is_coroutine() {
            return Err(GeneratorError::NotACoroutine { kind: self.kind });
        }
        self.frame.set_awaiter(awaiter.map(|a| &a.frame));
        *lock(&self.awaiter) = awaiter.map(|a| a.this.clone());
        Ok(())
    }

    /// Wrap the context in a managed object of the matching builtin type.
    pub fn into_object(self: Arc<Self>) -> ObjRef {
        let ty = match self.kind {
            GeneratorKind::Generator => &builtins::GENERATOR,
            GeneratorKind::Coroutine => &builtins::COROUTINE,
            GeneratorKind::AsyncGenerator => &builtins::ASYNC_GENERATOR,
        };
        ObjRef::new(Arc::clone(ty), ObjectValue::Generator(self))
    }

    /// Resume the body with `input`.
    ///
    /// Not reentrant: resuming a context that is already executing is
    /// rejected, but two threads racing to resume the same context are not
    /// defended against. `external` is bound as the frame's record when the
    /// frame has none yet.
    pub fn resume(
        &self,
        gil: GilToken<'_>,
        input: Injection,
        external: Option<FrameHandle>,
    ) -> Result<ResumeOutcome, GeneratorError> {
        if self.is_executing() {
            return Err(GeneratorError::AlreadyExecuting { kind: self.kind });
        }
        if self.is_completed() {
            return match input {
                Injection::Close => Ok(ResumeOutcome::Returned(ObjRef::none())),
                Injection::Send(_) | Injection::Throw(_) => Err(GeneratorError::Exhausted { kind: self.kind }),
            };
        }
        if self.is_just_started() {
            match input {
                Injection::Send(value) if !value.is_none() => {
                    value.release(gil);
                    return Err(GeneratorError::NonNoneToJustStarted { kind: self.kind });
                }
                Injection::Close => {
                    self.complete(gil, FrameState::Cleared);
                    return Ok(ResumeOutcome::Returned(ObjRef::none()));
                }
                _ => {}
            }
        }

        let closing = matches!(input, Injection::Close);
        let throwing = !matches!(input, Injection::Send(_));
        let Some(mut body) = self.body.with_mut(gil, Option::take) else {
            return Err(GeneratorError::AlreadyExecuting { kind: self.kind });
        };
        if let Some(record) = external {
            self.frame.bind_record(record);
        }
        self.enter(throwing);

        let step = {
            let unwind = CompleteOnUnwind { generator: self, gil };
            let _guard = ShadowStack::enter(Arc::clone(&self.frame));
            let mut cx = GenCx { gil, generator: self };
            let input = match input {
                Injection::Close => Injection::Throw(Exception::generator_exit()),
                other => other,
            };
            let step = body.step(&mut cx, input);
            std::mem::forget(unwind);
            step
        };
        self.body.with_mut(gil, |slot| *slot = Some(body));

        let outcome = match step {
            Step::Yield(value) => {
                self.suspend();
                if closing {
                    value.release(gil);
                    ResumeOutcome::Raised(Exception::runtime_error(format!("{} ignored GeneratorExit", self.kind)))
                } else {
                    ResumeOutcome::Yielded(value)
                }
            }
            Step::Return(value) => {
                self.complete(gil, FrameState::Returned);
                if closing {
                    value.release(gil);
                    ResumeOutcome::Returned(ObjRef::none())
                } else {
                    ResumeOutcome::Returned(value)
                }
            }
            Step::Raise(exception) => {
                self.complete(gil, FrameState::Raised);
                let stop = exception.is(&ExceptionKind::StopIteration);
                if closing && (stop || exception.is(&ExceptionKind::GeneratorExit)) {
                    ResumeOutcome::Returned(ObjRef::none())
                } else if stop {
                    ResumeOutcome::Raised(Exception::runtime_error(format!("{} raised StopIteration", self.kind)))
                } else {
                    ResumeOutcome::Raised(exception)
                }
            }
        };
        Ok(outcome)
    }

    fn enter(&self, throwing: bool) {
        if self.frame.last_instr() < 0 {
            self.frame.set_ip(0);
        }
        match &self.backing {
            Backing::Compiled(data) => {
                data.set_yield_point(None);
                data.set_state(if throwing { GenState::Throwing } else { GenState::Running });
            }
            Backing::Interpreted(live) => {
                if let Some(record) = lock(live).as_ref() {
                    record.set_state(FrameState::Executing);
                }
            }
        }
        debug!(target: TRACE_TARGET, kind = %self.kind, throwing, "generator running");
    }

    fn suspend(&self) {
        let count = self.yields.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.backing {
            Backing::Compiled(data) => {
                data.set_state(GenState::Running);
                data.set_yield_point(NonZeroUsize::new(count));
            }
            Backing::Interpreted(live) => {
                if let Some(record) = lock(live).as_ref() {
                    record.set_state(FrameState::Suspended);
                }
            }
        }
        debug!(target: TRACE_TARGET, kind = %self.kind, yield_point = count, "generator suspended");
    }

    fn complete(&self, gil: GilToken<'_>, final_state: FrameState) {
        match &self.backing {
            Backing::Compiled(data) => {
                data.set_yield_point(None);
                data.set_state(GenState::Completed);
            }
            Backing::Interpreted(live) => {
                let record = lock(live).take();
                if let Some(record) = record {
                    record.clear(gil);
                    record.set_state(final_state);
                }
            }
        }
        if self.kind.is_coroutine() {
            self.frame.set_awaiter(None);
            *lock(&self.awaiter) = None;
        }
        debug!(target: TRACE_TARGET, kind = %self.kind, state = ?final_state, "generator completed");
    }
}

/// A body that panics leaves its context completed, as if it had raised.
struct CompleteOnUnwind<'a, 'g> {
    generator: &'a GeneratorContext,
    gil: GilToken<'g>,
}

impl Drop for CompleteOnUnwind<'_, '_> {
    fn drop(&mut self) {
        warn!(target: TRACE_TARGET, kind = %self.generator.kind, "generator body panicked");
        self.generator.complete(self.gil, FrameState::Raised);
    }
}

impl fmt::Debug for GeneratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorContext")
            .field("kind", &self.kind)
            .field("code", &self.frame.code().qualified_name())
            .field("compiled", &self.is_compiled())
            .field("state", &self.state())
            .field("yield_point", &self.yield_point())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
