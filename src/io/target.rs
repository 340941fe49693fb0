//! File targets
//!
//! A target is one native handle plus, while it is open for IO, a completion
//! port association and a dedicated listener thread. The listener side moves
//! through `Open → Stopping → Closed`; the handle may only be closed once the
//! listener is `Closed`, so no completion can arrive for a freed handle.

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::EngineResult;
use super::sys::NativeFile;

/// Engine-local identity of an open target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub(crate) u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a target's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Listener running; submissions accepted
    Open,
    /// Stop requested; listener may still be draining the port
    Stopping,
    /// Listener joined; the handle can be closed
    Closed,
}

/// An open file target
pub struct Target {
    id: TargetId,
    path: PathBuf,
    file: NativeFile,
}

impl Target {
    pub(crate) fn new(id: TargetId, path: PathBuf, file: NativeFile) -> Self {
        Self { id, path, file }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the target in bytes
    pub fn size(&self) -> EngineResult<u64> {
        Ok(self.file.size()?)
    }

    pub(crate) fn file(&self) -> &NativeFile {
        &self.file
    }

    pub(crate) fn into_file(self) -> NativeFile {
        self.file
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}
