//! The ferry remote context.
//!
//! The remote context is the one privileged surface: it owns module
//! singletons and the authoritative state slices, answers calls from client
//! contexts, and fans state and event changes out to every attached client.

pub mod config;
pub mod error;
pub mod module;
pub mod registry;
pub mod remote;
pub mod state;
pub mod storage;
pub mod system;

pub use error::{KernelError, KernelResult};
pub use module::{ModuleContext, ModuleError, Params, RemoteModule};
pub use registry::{ModuleRegistry, ModuleTable};
pub use remote::{ClientId, RemoteContext};
pub use state::{SliceDef, StateStore};
pub use storage::{MemorySliceStorage, SliceStorage};
