//! Translation pipeline: descriptors, lowering, optimization and C++ emission.

pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod ir;
pub mod lower;
pub mod naming;
pub mod optimize;
pub mod shims;
pub mod translator;
pub mod verify;
pub mod writer;

pub use self::descriptor::{DescriptorModel, ModuleDescriptor, StorageKind, TypeDescriptor, Visibility};
pub use self::emitter::{EmitOptions, EmittedFile, Emitter, ModuleKind};
pub use self::error::*;
pub use self::ir::{LoweredMethod, LoweredModule, Operation, TranslationUnit};
pub use self::lower::{lower_method, lower_module, split_initializers, LowerContext};
pub use self::optimize::{Optimizer, PassPipeline};
pub use self::shims::ShimRegistry;
pub use self::translator::{TranslateOptions, Translator};
pub use self::verify::{verify_method, verify_unit};
