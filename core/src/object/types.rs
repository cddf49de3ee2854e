use std::fmt;
use std::sync::Arc;

use super::obj::ManagedObject;

/// Capability bits carried by a type descriptor.
///
/// The core only reads these; the type system that owns them sets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TypeFlags(u64);

impl TypeFlags {
    pub const NONE: Self = Self(0);
    /// Instances never shadow attributes defined on the type.
    pub const NO_SHADOWING_INSTANCES: Self = Self(1 << 0);
    pub const GENERATOR: Self = Self(1 << 1);
    pub const COROUTINE: Self = Self(1 << 2);

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for TypeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Runs once when a mortal object's count reaches zero.
pub type Destructor = Arc<dyn Fn(&ManagedObject) + Send + Sync>;

pub struct TypeDescriptor {
    name: Arc<str>,
    flags: TypeFlags,
    destructor: Option<Destructor>,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

impl TypeDescriptor {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            flags: TypeFlags::NONE,
            destructor: None,
        }
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_destructor<F>(mut self, destructor: F) -> Self
    where
        F: Fn(&ManagedObject) + Send + Sync + 'static,
    {
        self.destructor = Some(Arc::new(destructor));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    pub(crate) fn destructor(&self) -> Option<&Destructor> {
        self.destructor.as_ref()
    }

    #[inline]
    pub fn has_no_shadowing_instances(&self) -> bool {
        self.flags.contains(TypeFlags::NO_SHADOWING_INSTANCES)
    }
}

/// How attribute lookups on instances of a type may be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowingAssumption {
    /// Type attributes can be read without consulting the instance dict.
    TypeAttributesWin,
    /// The instance dict must be checked first.
    InstanceMayShadow,
}

pub fn shadowing_assumption(ty: &TypeDescriptor) -> ShadowingAssumption {
    if ty.has_no_shadowing_instances() {
        ShadowingAssumption::TypeAttributesWin
    } else {
        ShadowingAssumption::InstanceMayShadow
    }
}
