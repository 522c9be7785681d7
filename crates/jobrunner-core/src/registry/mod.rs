//! Job Registry - approved targets and their handlers.
//!
//! Built once at startup, then read-only. A record names its target by
//! string; the executor resolves it here at execution time.

pub mod builder;
pub mod handler;
pub mod signature;

pub use self::builder::{Registry, RegistryBuilder, RegistryEntry, RegistryError};
pub use self::handler::{
    FnHandler, Handler, HandlerError, JobHandler, TypedHandler, TypedJob, handler_fn,
};
pub use self::signature::{ArgKind, Param, Signature};
