//! Completion listener
//!
//! One background thread per open target parks on the target's completion
//! port with a bounded wait, so its stop flag is rechecked even when no IO is
//! flowing. Stopping also wakes the port, so an oversized poll interval
//! cannot hold up a join. Each delivered packet is recorded on its control block, then the
//! engine-wide completion event is set to wake a blocked harvester.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::error::{EngineError, EngineResult};
use super::event::Event;
use super::sys::{Dequeued, Port};
use super::target::{TargetId, TargetState};

/// Upper bound on the pause after a failed port wait
const FAILURE_BACKOFF: Duration = Duration::from_millis(250);

/// Owner-side handle of a listener thread
pub(crate) struct Listener {
    target: TargetId,
    state: TargetState,
    running: Arc<AtomicBool>,
    port: Arc<Port>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    pub(crate) fn spawn(
        target: TargetId,
        port: Arc<Port>,
        engine_running: Arc<AtomicBool>,
        completed: Arc<Event>,
        poll: Duration,
    ) -> EngineResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            target,
            port: port.clone(),
            running: running.clone(),
            engine_running,
            completed,
            poll,
        };

        let thread = thread::Builder::new()
            .name(format!("aio-listener-{target}"))
            .spawn(move || worker.run())
            .map_err(EngineError::ThreadCreate)?;

        Ok(Self {
            target,
            state: TargetState::Open,
            running,
            port,
            thread: Some(thread),
        })
    }

    pub(crate) fn state(&self) -> TargetState {
        self.state
    }

    /// Ask the thread to exit after its current wait
    pub(crate) fn stop(&mut self) {
        if self.state == TargetState::Open {
            self.running.store(false, Ordering::Release);
            self.port.wake();
            self.state = TargetState::Stopping;
        }
    }

    /// Wait for the thread to exit
    pub(crate) fn join(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(target_id = %self.target, "completion listener panicked");
            }
        }
        self.state = TargetState::Closed;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.join();
    }
}

struct Worker {
    target: TargetId,
    port: Arc<Port>,
    running: Arc<AtomicBool>,
    engine_running: Arc<AtomicBool>,
    completed: Arc<Event>,
    poll: Duration,
}

impl Worker {
    fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.engine_running.load(Ordering::Acquire)
    }

    fn run(self) {
        debug!(target_id = %self.target, "completion listener started");
        let mut delivered: u64 = 0;

        while self.keep_running() {
            match self.port.dequeue(self.poll) {
                Dequeued::Timeout | Dequeued::Woken => continue,
                Dequeued::Packet(packet) => {
                    packet.block.finish(packet.transferred, packet.error);
                    self.completed.set();
                    delivered += 1;
                }
                Dequeued::Failed(e) => {
                    warn!(target_id = %self.target, error = %e, "completion port wait failed");
                    thread::sleep(self.poll.min(FAILURE_BACKOFF));
                }
            }
        }

        debug!(target_id = %self.target, delivered, "completion listener exiting");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::control_block::ControlBlock;
    use crate::io::sys::Packet;

    fn spawn(port: &Arc<Port>, completed: &Arc<Event>) -> Listener {
        Listener::spawn(
            TargetId(1),
            port.clone(),
            Arc::new(AtomicBool::new(true)),
            completed.clone(),
            Duration::from_millis(10),
        )
        .unwrap()
    }

    #[test]
    fn test_delivers_completion_and_signals() {
        let port = Arc::new(Port::new());
        let completed = Arc::new(Event::auto_reset());
        let mut listener = spawn(&port, &completed);

        let block = ControlBlock::new(0).unwrap();
        block.arm(0, 4096).unwrap();
        port.post(Packet {
            block: block.clone(),
            transferred: 4096,
            error: None,
        });

        assert!(completed.wait_timeout(Duration::from_secs(5)));
        let done = block.take_completion().unwrap();
        assert_eq!(done.error, 0);
        assert_eq!(done.resid, 0);

        listener.join();
        assert_eq!(listener.state(), TargetState::Closed);
    }

    #[test]
    fn test_stop_then_join_transitions() {
        let port = Arc::new(Port::new());
        let completed = Arc::new(Event::auto_reset());
        let mut listener = spawn(&port, &completed);
        assert_eq!(listener.state(), TargetState::Open);

        listener.stop();
        assert_eq!(listener.state(), TargetState::Stopping);
        listener.join();
        assert_eq!(listener.state(), TargetState::Closed);
    }

    #[test]
    fn test_stop_interrupts_unbounded_poll() {
        let port = Arc::new(Port::new());
        let completed = Arc::new(Event::auto_reset());
        let mut listener = Listener::spawn(
            TargetId(3),
            port.clone(),
            Arc::new(AtomicBool::new(true)),
            completed.clone(),
            Duration::MAX,
        )
        .unwrap();

        let block = ControlBlock::new(0).unwrap();
        block.arm(0, 512).unwrap();
        port.post(Packet {
            block: block.clone(),
            transferred: 512,
            error: None,
        });
        assert!(completed.wait_timeout(Duration::from_secs(5)));
        assert!(block.take_completion().is_some());

        listener.stop();
        listener.join();
        assert_eq!(listener.state(), TargetState::Closed);
    }

    #[test]
    fn test_engine_flag_stops_listener() {
        let port = Arc::new(Port::new());
        let completed = Arc::new(Event::auto_reset());
        let engine_running = Arc::new(AtomicBool::new(true));
        let mut listener = Listener::spawn(
            TargetId(2),
            port,
            engine_running.clone(),
            completed,
            Duration::from_millis(10),
        )
        .unwrap();

        engine_running.store(false, Ordering::Release);
        let thread = listener.thread.take().unwrap();
        thread.join().unwrap();
        listener.join();
        assert_eq!(listener.state(), TargetState::Closed);
    }
}
