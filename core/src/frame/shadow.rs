use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::code::CodeObject;

use super::FrameError;
use super::record::{FrameHandle, FrameRecord};

const TRACE_TARGET: &str = "umbra::frame";

/// Who created the frame and is responsible for unlinking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    Compiled,
    Interpreter,
}

/// Builds a full frame record for a compiled activation on demand.
pub trait MaterializeFrame: Send + Sync {
    fn materialize(&self, code: &Arc<CodeObject>, last_instr: isize) -> FrameRecord;
}

impl<F> MaterializeFrame for F
where
    F: Fn(&Arc<CodeObject>, isize) -> FrameRecord + Send + Sync,
{
    fn materialize(&self, code: &Arc<CodeObject>, last_instr: isize) -> FrameRecord {
        self(code, last_instr)
    }
}

/// How a frame is currently represented.
#[derive(Debug, Clone, Copy)]
pub enum FrameRepr<'a> {
    /// Only the code reference and instruction pointer exist.
    Compact { code: &'a Arc<CodeObject>, ip: isize },
    /// A full record has been built.
    Materialized(&'a FrameHandle),
}

/// Everything a walker needs from one frame.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub code: Arc<CodeObject>,
    pub qualified_name: Arc<str>,
    pub frame: Option<FrameHandle>,
}

pub type FrameRef = Arc<ShadowFrame>;

#[derive(Default)]
struct FrameLinks {
    prev: Option<FrameRef>,
    awaiter: Option<Weak<ShadowFrame>>,
}

/// Logical call-stack entry, independent of the native stack layout.
pub struct ShadowFrame {
    code: Arc<CodeObject>,
    owner: FrameOwner,
    ip: AtomicIsize,
    record: OnceCell<FrameHandle>,
    materializer: Option<Arc<dyn MaterializeFrame>>,
    /// Written only by the thread whose stack the frame is on (push and pop
    /// lock it once each). Other threads only read it while inspecting under
    /// the global lock, so the lock is uncontended on call and return.
    links: Mutex<FrameLinks>,
}

impl fmt::Debug for ShadowFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowFrame")
            .field("code", &self.code)
            .field("owner", &self.owner)
            .field("materialized", &self.is_materialized())
            .field("last_instr", &self.last_instr())
            .finish()
    }
}

impl ShadowFrame {
    /// Compact frame for compiled code. Without a materializer the frame can
    /// never produce a full record.
    pub fn compiled(code: Arc<CodeObject>, materializer: Option<Arc<dyn MaterializeFrame>>) -> FrameRef {
        Arc::new(Self {
            code,
            owner: FrameOwner::Compiled,
            ip: AtomicIsize::new(-1),
            record: OnceCell::new(),
            materializer,
            links: Mutex::new(FrameLinks::default()),
        })
    }

    /// Interpreter frame; interpreted calls always have a full record.
    pub fn interpreted(record: FrameHandle) -> FrameRef {
        let code = Arc::clone(record.code());
        let ip = record.last_instr();
        Arc::new(Self {
            code,
            owner: FrameOwner::Interpreter,
            ip: AtomicIsize::new(ip),
            record: OnceCell::with_value(record),
            materializer: None,
            links: Mutex::new(FrameLinks::default()),
        })
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }

    pub fn owner(&self) -> FrameOwner {
        self.owner
    }

    pub fn repr(&self) -> FrameRepr<'_> {
        match self.record.get() {
            Some(record) => FrameRepr::Materialized(record),
            None => FrameRepr::Compact {
                code: &self.code,
                ip: self.ip.load(Ordering::Relaxed),
            },
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.record.get().is_some()
    }

    pub fn can_materialize(&self) -> bool {
        self.is_materialized() || self.materializer.is_some()
    }

    /// The record, if one has already been built.
    pub fn record(&self) -> Option<&FrameHandle> {
        self.record.get()
    }

    /// Record the current instruction. Once materialized, the record follows.
    #[inline]
    pub fn set_ip(&self, ip: isize) {
        self.ip.store(ip, Ordering::Relaxed);
        if let Some(record) = self.record.get() {
            record.set_last_instr(ip);
        }
    }

    pub fn last_instr(&self) -> isize {
        match self.record.get() {
            Some(record) => record.last_instr(),
            None => self.ip.load(Ordering::Relaxed),
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.code.line_for(self.last_instr())
    }

    /// Build the full record if it does not exist yet. Never called on the
    /// call path itself.
    pub fn materialize(&self) -> Result<FrameHandle, FrameError> {
        self.record
            .get_or_try_init(|| {
                let materializer = self.materializer.as_ref().ok_or_else(|| FrameError::NotSupported {
                    name: Arc::clone(self.code.qualified_name()),
                })?;
                let ip = self.ip.load(Ordering::Relaxed);
                let record = materializer.materialize(&self.code, ip);
                record.set_last_instr(ip);
                debug!(
                    target: TRACE_TARGET,
                    frame = %self.code.qualified_name(),
                    last_instr = ip,
                    "materialized frame"
                );
                Ok(record.into_handle())
            })
            .map(Arc::clone)
    }

    /// Attach an existing record. Returns `false` if one was already present.
    pub fn bind_record(&self, record: FrameHandle) -> bool {
        self.record.set(record).is_ok()
    }

    /// Name and code straight from the code reference for compact frames,
    /// from the record for materialized ones.
    pub fn resolve(&self) -> Resolved {
        match self.repr() {
            FrameRepr::Compact { code, .. } => Resolved {
                code: Arc::clone(code),
                qualified_name: Arc::clone(code.qualified_name()),
                frame: None,
            },
            FrameRepr::Materialized(record) => Resolved {
                code: Arc::clone(record.code()),
                qualified_name: Arc::clone(record.code().qualified_name()),
                frame: Some(Arc::clone(record)),
            },
        }
    }

    pub fn prev(&self) -> Option<FrameRef> {
        self.links().prev.clone()
    }

    /// The frame of the task awaiting this one, if it is still alive.
    pub fn awaiter(&self) -> Option<FrameRef> {
        self.links().awaiter.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_awaiter(&self, awaiter: Option<&FrameRef>) {
        self.links().awaiter = awaiter.map(Arc::downgrade);
    }

    /// Whether this frame is currently linked below another one.
    pub fn is_linked(&self) -> bool {
        self.links().prev.is_some()
    }

    pub(crate) fn link(&self, prev: Option<FrameRef>) {
        self.links().prev = prev;
    }

    pub(crate) fn unlink(&self) -> Option<FrameRef> {
        self.links().prev.take()
    }

    fn links(&self) -> MutexGuard<'_, FrameLinks> {
        // Links hold no invariant a panic could break halfway.
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ShadowFrame {
    fn drop(&mut self) {
        // Unwind long predecessor chains iteratively instead of recursing
        // through nested `Arc` drops.
        let links = self.links.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = links.prev.take();
        while let Some(frame) = next {
            match Arc::try_unwrap(frame) {
                Ok(mut inner) => {
                    let links = inner.links.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
                    next = links.prev.take();
                }
                Err(_) => break,
            }
        }
    }
}
