//! Overlapped disk IO engine
//!
//! This module submits read/write/flush requests to the platform's native
//! overlapped-completion facility and reconciles completions back to a pool
//! of caller-owned requests:
//! - Windows: overlapped file handles and I/O completion ports
//! - Unix: positional IO feeding an in-process completion port
//!
//! The caller submits with [`Engine::submit`] and later collects finished
//! requests with [`Engine::harvest`]; one listener thread per open target
//! drains the completion port in between.

pub mod aligned_buffer;
pub mod config;
pub mod control_block;
pub mod engine;
pub mod errno;
pub mod error;
pub mod event;
pub(crate) mod listener;
pub mod overlapped;
pub mod request;
pub mod sys;
pub mod target;

pub use aligned_buffer::{AlignedBuffer, PAGE_SIZE};
pub use config::{Access, AccessPattern, EngineConfig, TargetOptions};
pub use control_block::{Completion, ControlBlock};
pub use engine::{Engine, Submitted, TRIM_UNSUPPORTED};
pub use error::{EngineError, EngineResult};
pub use request::{Direction, IoRequest};
pub use target::{Target, TargetId, TargetState};
