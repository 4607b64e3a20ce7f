//! VECTORIA: a deterministic, ahead-of-time compiled tensor execution engine
//! for dense numerical graphs.
//!
//! A caller builds an immutable [`ir::Graph`], hands it to [`engine::Engine`]
//! for compilation (composite-op expansion, scheduling, arena planning), then
//! drives `set_buffer`/`execute`/`buffer` to run it. The [`abi`] module
//! exposes the same surface as a `#[no_mangle] extern "C"` API for
//! out-of-process callers.

pub mod abi;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod expander;
pub mod ir;
pub mod kernels;
pub mod scheduler;
pub mod trace;
pub mod types;

pub use engine::Engine;
pub use error::{VectoriaError, VectoriaResult};
pub use ir::Graph;
pub use types::{DType, NodeId, Shape};
