pub mod code;
pub mod config;
pub mod frame;
pub mod generator;
pub mod gil;
pub mod introspect;
pub mod object;
pub mod walk;

pub use code::CodeObject;
pub use config::RuntimeConfig;
pub use frame::{FrameError, FrameRecord, ShadowFrame, ShadowStack};
pub use generator::{GeneratorContext, GeneratorKind};
pub use gil::{Gil, GilToken};
pub use object::ObjRef;
pub use walk::WalkError;
