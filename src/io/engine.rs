//! Overlapped IO engine
//!
//! The engine bridges three execution contexts:
//!
//! ```text
//!   caller thread                 listener (one per target)
//!   ─────────────                 ─────────────────────────
//!   submit ──► native op ──► kernel ──► completion port
//!                                            │
//!                                     ControlBlock::finish
//!                                            │
//!   harvest ◄── rescan busy set ◄── completion event (auto reset)
//! ```
//!
//! The completion event only means "at least one control block became
//! complete since the event was last consumed". `harvest` therefore always
//! rescans the caller's busy set after waking and never trusts the wake
//! alone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config::{EngineConfig, TargetOptions};
use super::control_block::ControlBlock;
use super::errno;
use super::error::{EngineError, EngineResult};
use super::event::Event;
use super::listener::Listener;
use super::request::{Direction, IoRequest};
use super::sys::{self, CancelSupport, NativeFile};
use super::target::{Target, TargetId, TargetState};

/// Error attached to trim requests, which have no native path
pub const TRIM_UNSUPPORTED: i32 = libc::EOPNOTSUPP;

/// Immediate outcome of [`Engine::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Finished before submit returned; the request carries its result
    Completed,
    /// Accepted; the result arrives through [`Engine::harvest`]
    Queued,
    /// Rejected or failed synchronously; the request carries the error and
    /// full residue
    Failed,
}

pub struct Engine {
    config: EngineConfig,
    events: Vec<usize>,
    completed: Arc<Event>,
    cancel: Option<CancelSupport>,
    running: Arc<AtomicBool>,
    listeners: HashMap<TargetId, Listener>,
    next_target: u64,
    cleaned: bool,
}

impl Engine {
    /// Build engine state sized for `config.queue_depth` in-flight requests
    pub fn init(config: EngineConfig) -> EngineResult<Self> {
        if config.queue_depth == 0 {
            return Err(EngineError::Allocation(
                "queue depth must be at least 1".into(),
            ));
        }

        let mut events = Vec::new();
        events.try_reserve_exact(config.queue_depth).map_err(|e| {
            EngineError::Allocation(format!("{} completion slots: {e}", config.queue_depth))
        })?;

        let cancel = CancelSupport::resolve();
        info!(
            queue_depth = config.queue_depth,
            targeted_cancel = cancel.is_some(),
            "overlapped IO engine initialized"
        );

        Ok(Self {
            config,
            events,
            completed: Arc::new(Event::auto_reset()),
            cancel,
            running: Arc::new(AtomicBool::new(true)),
            listeners: HashMap::new(),
            next_target: 0,
            cleaned: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue_depth(&self) -> usize {
        self.config.queue_depth
    }

    /// Whether the platform supports cancelling a single operation
    pub fn supports_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.cleaned {
            return Err(EngineError::ContractViolation("engine already cleaned up"));
        }
        Ok(())
    }

    // ========================================================================
    // Control blocks
    // ========================================================================

    /// Attach a control block to a pooled request
    pub fn control_block_init(&self, req: &mut IoRequest) -> EngineResult<()> {
        if req.control_block().is_some() {
            return Err(EngineError::ContractViolation(
                "request already has a control block",
            ));
        }
        req.attach(ControlBlock::new(req.index())?);
        Ok(())
    }

    /// Release a request's control block
    ///
    /// Refused while an operation on it is outstanding.
    pub fn control_block_free(&self, req: &mut IoRequest) -> EngineResult<()> {
        if req.is_in_flight() {
            return Err(EngineError::ContractViolation(
                "control block freed while its operation is outstanding",
            ));
        }
        req.detach();
        Ok(())
    }

    // ========================================================================
    // Targets
    // ========================================================================

    /// Open a target and start its completion listener
    pub fn open_target(&mut self, path: &Path, opts: &TargetOptions) -> EngineResult<Target> {
        self.ensure_live()?;

        if path.as_os_str() == "-" {
            return Err(EngineError::UnsupportedTarget {
                path: "-".into(),
                reason: "standard streams are not supported",
            });
        }
        if sys::is_pipe(path) {
            return Err(EngineError::UnsupportedTarget {
                path: path.display().to_string(),
                reason: "pipes are not supported",
            });
        }

        let mut file = NativeFile::open(path, opts)?;
        let port = file.associate()?;

        let id = TargetId(self.next_target);
        self.next_target += 1;

        // On spawn failure `file` is dropped here, closing the handle.
        let listener = Listener::spawn(
            id,
            port,
            self.running.clone(),
            self.completed.clone(),
            self.config.listener_poll,
        )?;
        self.listeners.insert(id, listener);

        debug!(target_id = %id, path = %path.display(), ?opts, "target opened");
        Ok(Target::new(id, path.to_path_buf(), file))
    }

    pub fn target_state(&self, target: &Target) -> TargetState {
        self.listeners
            .get(&target.id())
            .map_or(TargetState::Closed, Listener::state)
    }

    /// Stop and join the target's listener (`Open → Stopping → Closed`)
    ///
    /// Completions still sitting in the port are not delivered afterwards, so
    /// drain outstanding requests first.
    pub fn stop_target(&mut self, target: &Target) {
        if let Some(mut listener) = self.listeners.remove(&target.id()) {
            listener.stop();
            listener.join();
            debug!(target_id = %target.id(), "target listener stopped");
        }
    }

    /// Close the target's handle; legal only once its listener is `Closed`
    ///
    /// Closing a target whose listener is still live is reported as a
    /// contract violation. The listener is joined before the handle is
    /// released either way, so no completion can reference a closed handle.
    pub fn close_target(&mut self, target: Target) -> EngineResult<()> {
        let premature = self.target_state(&target) != TargetState::Closed;
        if premature {
            warn!(target_id = %target.id(), "target closed before its listener was stopped");
            self.stop_target(&target);
        }

        let id = target.id();
        target.into_file().close()?;
        debug!(target_id = %id, "target closed");

        if premature {
            return Err(EngineError::ContractViolation(
                "target closed while its listener was running",
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Issue the operation described by `req` against `target`
    pub fn submit(&self, target: &Target, req: &mut IoRequest) -> EngineResult<Submitted> {
        let block = req
            .control_block()
            .cloned()
            .ok_or(EngineError::ContractViolation("request has no control block"))?;

        if self.target_state(target) != TargetState::Open {
            return Err(EngineError::ContractViolation(
                "submit on a target without a running listener",
            ));
        }

        let direction = req.direction();
        if direction.is_sync() {
            return Ok(Self::flush(target, req));
        }
        if direction == Direction::Trim {
            warn!(target_id = %target.id(), "trim is not supported by this engine");
            req.set_result(TRIM_UNSUPPORTED, req.xfer_len());
            return Ok(Submitted::Failed);
        }

        block.arm(req.offset(), req.xfer_len())?;
        let issued = if direction == Direction::Read {
            target.file().start_read(&block, req.xfer_buf_mut())
        } else {
            target.file().start_write(&block, req.xfer_buf())
        };

        match issued {
            Ok(()) => Ok(Submitted::Queued),
            Err(code) => {
                block.disarm();
                let error = errno::translate(code);
                debug!(
                    target_id = %target.id(),
                    request = req.index(),
                    ?direction,
                    error,
                    "submission failed"
                );
                req.set_result(error, req.xfer_len());
                Ok(Submitted::Failed)
            }
        }
    }

    /// Serve a sync-class request inline
    fn flush(target: &Target, req: &mut IoRequest) -> Submitted {
        match target.file().flush() {
            Ok(()) => {
                req.set_result(0, 0);
                Submitted::Completed
            }
            Err(code) => {
                let error = errno::translate(code);
                warn!(target_id = %target.id(), error, "flush failed");
                req.set_result(error, req.xfer_len());
                Submitted::Failed
            }
        }
    }

    // ========================================================================
    // Harvest
    // ========================================================================

    /// Collect completed requests from `busy`
    ///
    /// Scans `busy` in order and harvests up to `max` completed requests,
    /// applying each result to its request and recording its index in the
    /// completion slots. While fewer than `min` were found it waits on the
    /// completion event and rescans. `timeout` bounds the total wait to within
    /// one wait slice; `None`, or a timeout too large to represent, waits
    /// indefinitely.
    ///
    /// Returns the number harvested, which is below `min` only when a finite
    /// timeout expired.
    pub fn harvest(
        &mut self,
        busy: &mut [IoRequest],
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> EngineResult<usize> {
        if min > max {
            return Err(EngineError::ContractViolation("harvest min exceeds max"));
        }
        if max > self.config.queue_depth {
            return Err(EngineError::ContractViolation(
                "harvest max exceeds queue depth",
            ));
        }

        // A timeout past the representable range is the same as none
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        self.events.clear();

        loop {
            for req in busy.iter_mut() {
                if self.events.len() >= max {
                    break;
                }
                let Some(block) = req.control_block() else {
                    continue;
                };
                if let Some(completion) = block.take_completion() {
                    req.apply(completion);
                    self.events.push(req.index());
                }
            }

            if self.events.len() >= min {
                break;
            }

            let slice = match deadline {
                None => self.config.harvest_slice,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(self.config.harvest_slice)
                }
            };
            self.completed.wait_timeout(slice);
        }

        Ok(self.events.len())
    }

    /// Pool index of the `index`th request harvested by the last call
    ///
    /// # Panics
    /// Panics if `index` is not below the last harvested count.
    pub fn fetch(&self, index: usize) -> usize {
        assert!(
            index < self.events.len(),
            "fetch index {index} out of range (last harvest returned {})",
            self.events.len()
        );
        self.events[index]
    }

    /// Pool indices of all requests harvested by the last call
    pub fn events(&self) -> &[usize] {
        &self.events
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Best-effort cancellation of the request's outstanding operation
    ///
    /// A successful cancel does not remove the request from the harvest
    /// path: it still completes once, carrying a cancellation error unless
    /// it finished first.
    pub fn cancel(&self, target: &Target, req: &IoRequest) -> bool {
        let Some(block) = req.control_block() else {
            return false;
        };
        if !block.is_in_flight() {
            return false;
        }

        let cancelled = match &self.cancel {
            Some(support) => support.cancel(target.file(), block),
            None => false,
        };
        debug!(
            target_id = %target.id(),
            request = req.index(),
            cancelled,
            "cancel requested"
        );
        cancelled
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop and join every listener and release engine state
    ///
    /// Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }

        self.running.store(false, Ordering::Release);
        for (id, mut listener) in self.listeners.drain() {
            listener.stop();
            listener.join();
            debug!(target_id = %id, "listener joined during cleanup");
        }

        self.events = Vec::new();
        self.cleaned = true;
        info!("overlapped IO engine cleaned up");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("queue_depth", &self.config.queue_depth)
            .field("targets", &self.listeners.len())
            .field("supports_cancel", &self.cancel.is_some())
            .field("cleaned", &self.cleaned)
            .finish()
    }
}
