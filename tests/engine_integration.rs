//! Integration tests for the overlapped IO engine
#![cfg(unix)]

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlapped_aio::io::{
    AlignedBuffer, Direction, Engine, EngineConfig, EngineError, IoRequest, Submitted, Target,
    TargetOptions, TargetState, PAGE_SIZE, TRIM_UNSUPPORTED,
};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn engine(depth: usize) -> Engine {
    let config = EngineConfig::new()
        .with_queue_depth(depth)
        .with_listener_poll(Duration::from_millis(20))
        .with_harvest_slice(Duration::from_millis(20));
    Engine::init(config).unwrap()
}

fn pool(engine: &Engine, depth: usize, fill: u8) -> Vec<IoRequest> {
    (0..depth)
        .map(|index| {
            let mut req = IoRequest::new(index, AlignedBuffer::filled(PAGE_SIZE, fill).unwrap());
            engine.control_block_init(&mut req).unwrap();
            req
        })
        .collect()
}

fn target_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn shutdown(mut engine: Engine, target: Target, requests: &mut [IoRequest]) {
    engine.stop_target(&target);
    engine.close_target(target).unwrap();
    for req in requests.iter_mut() {
        engine.control_block_free(req).unwrap();
    }
    engine.cleanup();
}

// ============ Submission and harvest ============

#[test]
fn test_full_depth_writes_harvest_together() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(4);
    let target = engine
        .open_target(&target_path(&dir, "writes"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 4, 0xAB);

    for (i, req) in busy.iter_mut().enumerate() {
        req.prepare(Direction::Write, (i * PAGE_SIZE) as u64, PAGE_SIZE)
            .unwrap();
        assert_eq!(engine.submit(&target, req).unwrap(), Submitted::Queued);
    }

    assert_eq!(engine.harvest(&mut busy, 4, 4, WAIT).unwrap(), 4);
    let mut seen: Vec<usize> = (0..4).map(|i| engine.fetch(i)).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);

    for req in &busy {
        assert_eq!(req.error(), 0);
        assert_eq!(req.resid(), 0);
        assert_eq!(req.transferred(), PAGE_SIZE);
    }
    assert_eq!(target.size().unwrap(), (4 * PAGE_SIZE) as u64);

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_unbounded_harvest_blocks_until_min() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(4);
    let target = engine
        .open_target(&target_path(&dir, "unbounded"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 4, 0x3C);

    for (i, req) in busy.iter_mut().enumerate() {
        req.prepare(Direction::Write, (i * PAGE_SIZE) as u64, PAGE_SIZE)
            .unwrap();
        assert_eq!(engine.submit(&target, req).unwrap(), Submitted::Queued);
    }

    assert_eq!(engine.harvest(&mut busy, 4, 4, None).unwrap(), 4);
    assert!(busy.iter().all(|req| req.error() == 0 && req.resid() == 0));

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_maximum_timeout_is_treated_as_unbounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "max_timeout"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0x44);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert_eq!(
        engine
            .harvest(&mut busy, 1, 1, Some(Duration::MAX))
            .unwrap(),
        1
    );

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_maximum_listener_poll_still_delivers_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new()
        .with_queue_depth(1)
        .with_listener_poll(Duration::MAX)
        .with_harvest_slice(Duration::MAX);
    let mut engine = Engine::init(config).unwrap();
    let target = engine
        .open_target(&target_path(&dir, "max_poll"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0x66);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert_eq!(engine.harvest(&mut busy, 1, 1, WAIT).unwrap(), 1);
    assert_eq!(busy[0].error(), 0);

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_write_then_read_returns_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(2);
    let target = engine
        .open_target(&target_path(&dir, "roundtrip"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 2, 0);

    busy[0].buffer_mut().copy_from_slice(b"overlapped payload").unwrap();
    busy[0].prepare(Direction::Write, 512, 18).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert_eq!(engine.harvest(&mut busy, 1, 2, WAIT).unwrap(), 1);
    assert_eq!(engine.fetch(0), 0);

    busy[1].prepare(Direction::Read, 512, 18).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[1]).unwrap(), Submitted::Queued);
    assert_eq!(engine.harvest(&mut busy, 1, 2, WAIT).unwrap(), 1);
    assert_eq!(engine.fetch(0), 1);

    let read = &busy[1];
    assert_eq!(read.error(), 0);
    assert_eq!(read.transferred() + read.resid(), 18);
    assert_eq!(&read.buffer().as_full_slice()[..18], b"overlapped payload");

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_short_read_reports_residue() {
    let dir = tempfile::tempdir().unwrap();
    let path = target_path(&dir, "short");
    std::fs::write(&path, vec![7u8; 100]).unwrap();

    let mut engine = engine(1);
    let target = engine.open_target(&path, &TargetOptions::default()).unwrap();
    let mut busy = pool(&engine, 1, 0);

    busy[0].prepare(Direction::Read, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert_eq!(engine.harvest(&mut busy, 1, 1, WAIT).unwrap(), 1);

    assert_eq!(busy[0].error(), 0);
    assert_eq!(busy[0].transferred(), 100);
    assert_eq!(busy[0].resid(), PAGE_SIZE - 100);

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_read_past_end_fails_with_enxio() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "empty"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    busy[0].prepare(Direction::Read, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert_eq!(engine.harvest(&mut busy, 1, 1, WAIT).unwrap(), 1);

    assert_eq!(busy[0].error(), libc::ENXIO);
    assert_eq!(busy[0].resid(), PAGE_SIZE);

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_each_completion_harvested_once() {
    let dir = tempfile::tempdir().unwrap();
    let depth = 8;
    let mut engine = engine(depth);
    let target = engine
        .open_target(&target_path(&dir, "once"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, depth, 0x11);

    for (i, req) in busy.iter_mut().enumerate() {
        req.prepare(Direction::Write, (i * PAGE_SIZE) as u64, PAGE_SIZE)
            .unwrap();
        assert_eq!(engine.submit(&target, req).unwrap(), Submitted::Queued);
    }

    let mut harvested = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while harvested.len() < depth && Instant::now() < deadline {
        let n = engine.harvest(&mut busy, 1, 3, WAIT).unwrap();
        assert!(n <= 3);
        harvested.extend_from_slice(engine.events());
    }
    harvested.sort_unstable();
    assert_eq!(harvested, (0..depth).collect::<Vec<_>>());

    assert_eq!(
        engine
            .harvest(&mut busy, 0, depth, Some(Duration::from_millis(50)))
            .unwrap(),
        0
    );
    assert!(busy.iter().all(|req| !req.is_in_flight()));

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_zero_min_harvest_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(2);
    let target = engine
        .open_target(&target_path(&dir, "poll"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 2, 0);

    let start = Instant::now();
    assert_eq!(
        engine.harvest(&mut busy, 0, 2, Some(Duration::ZERO)).unwrap(),
        0
    );
    assert!(start.elapsed() < Duration::from_millis(100));

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_harvest_times_out_without_completions() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "idle"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    let start = Instant::now();
    let n = engine
        .harvest(&mut busy, 1, 1, Some(Duration::from_millis(100)))
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(n, 0);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));

    shutdown(engine, target, &mut busy);
}

// ============ Synchronous paths ============

#[test]
fn test_sync_completes_inline() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "sync"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    for direction in [Direction::Sync, Direction::DataSync, Direction::SyncFileRange] {
        busy[0].prepare(direction, 0, 0).unwrap();
        assert_eq!(
            engine.submit(&target, &mut busy[0]).unwrap(),
            Submitted::Completed
        );
        assert_eq!(busy[0].error(), 0);
        assert!(!busy[0].is_in_flight());
    }

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_trim_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "trim"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    busy[0].prepare(Direction::Trim, 0, PAGE_SIZE).unwrap();
    assert_eq!(
        engine.submit(&target, &mut busy[0]).unwrap(),
        Submitted::Failed
    );
    assert_eq!(busy[0].error(), TRIM_UNSUPPORTED);
    assert_ne!(busy[0].error(), 0);
    assert_eq!(busy[0].resid(), PAGE_SIZE);
    assert!(!busy[0].is_in_flight());

    shutdown(engine, target, &mut busy);
}

#[test]
fn test_write_to_read_only_target_fails_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let path = target_path(&dir, "readonly");
    std::fs::write(&path, vec![0u8; PAGE_SIZE]).unwrap();

    let mut engine = engine(1);
    let target = engine.open_target(&path, &TargetOptions::read_only()).unwrap();
    let mut busy = pool(&engine, 1, 0x55);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert_eq!(
        engine.submit(&target, &mut busy[0]).unwrap(),
        Submitted::Failed
    );
    assert_eq!(busy[0].error(), libc::EBADF);
    assert_eq!(busy[0].resid(), PAGE_SIZE);
    assert!(!busy[0].is_in_flight());

    // A synchronous failure never reaches the harvest path
    assert_eq!(
        engine.harvest(&mut busy, 0, 1, Some(Duration::from_millis(50))).unwrap(),
        0
    );

    shutdown(engine, target, &mut busy);
}

// ============ Cancellation ============

#[test]
fn test_cancel_does_not_lose_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "cancel"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0x22);

    assert!(!engine.supports_cancel());
    assert!(!engine.cancel(&target, &busy[0]));

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    assert!(!engine.cancel(&target, &busy[0]));

    assert_eq!(engine.harvest(&mut busy, 1, 1, WAIT).unwrap(), 1);
    assert_eq!(busy[0].error(), 0);

    shutdown(engine, target, &mut busy);
}

// ============ Lifecycle contracts ============

#[test]
fn test_free_in_flight_control_block_is_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "free"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    engine.submit(&target, &mut busy[0]).unwrap();
    assert!(matches!(
        engine.control_block_free(&mut busy[0]),
        Err(EngineError::ContractViolation(_))
    ));
    assert!(matches!(
        busy[0].prepare(Direction::Read, 0, PAGE_SIZE),
        Err(EngineError::ContractViolation(_))
    ));

    assert_eq!(engine.harvest(&mut busy, 1, 1, WAIT).unwrap(), 1);
    engine.control_block_free(&mut busy[0]).unwrap();
    assert!(busy[0].control_block().is_none());

    engine.stop_target(&target);
    engine.close_target(target).unwrap();
}

#[test]
fn test_submit_without_control_block_is_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "nocb"), &TargetOptions::default())
        .unwrap();

    let mut req = IoRequest::new(0, AlignedBuffer::new(PAGE_SIZE).unwrap());
    req.prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert!(matches!(
        engine.submit(&target, &mut req),
        Err(EngineError::ContractViolation(_))
    ));

    engine.stop_target(&target);
    engine.close_target(target).unwrap();
}

#[test]
fn test_target_state_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "states"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0);

    assert_eq!(engine.target_state(&target), TargetState::Open);
    engine.stop_target(&target);
    assert_eq!(engine.target_state(&target), TargetState::Closed);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert!(matches!(
        engine.submit(&target, &mut busy[0]),
        Err(EngineError::ContractViolation(_))
    ));

    engine.close_target(target).unwrap();
    engine.control_block_free(&mut busy[0]).unwrap();
}

#[test]
fn test_stop_target_leaves_unharvested_requests_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let depth = 4;
    let mut engine = engine(depth);
    let target = engine
        .open_target(&target_path(&dir, "undrained"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, depth, 0x77);

    for (i, req) in busy.iter_mut().enumerate() {
        req.prepare(Direction::Write, (i * PAGE_SIZE) as u64, PAGE_SIZE)
            .unwrap();
        assert_eq!(engine.submit(&target, req).unwrap(), Submitted::Queued);
    }

    // Stopped without draining: nothing has been harvested yet
    engine.stop_target(&target);
    assert_eq!(engine.target_state(&target), TargetState::Closed);
    for req in busy.iter_mut() {
        assert!(req.is_in_flight());
        assert!(matches!(
            engine.control_block_free(req),
            Err(EngineError::ContractViolation(_))
        ));
    }

    // Only what the listener delivered before stopping can be harvested
    let n = engine
        .harvest(&mut busy, 0, depth, Some(Duration::from_millis(50)))
        .unwrap();
    let still_in_flight = busy.iter().filter(|req| req.is_in_flight()).count();
    assert_eq!(still_in_flight, depth - n);

    engine.close_target(target).unwrap();
    for req in busy.iter_mut().filter(|req| !req.is_in_flight()) {
        engine.control_block_free(req).unwrap();
    }
}

#[test]
fn test_dropped_in_flight_request_does_not_free_control_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "dropped"), &TargetOptions::default())
        .unwrap();
    let mut busy = pool(&engine, 1, 0x88);

    busy[0].prepare(Direction::Write, 0, PAGE_SIZE).unwrap();
    assert_eq!(engine.submit(&target, &mut busy[0]).unwrap(), Submitted::Queued);
    let block = Arc::clone(busy[0].control_block().unwrap());
    drop(busy);

    // Once the listener lets go of its packet, our handle and the one the
    // dropped request leaked remain
    let deadline = Instant::now() + Duration::from_secs(5);
    while !(block.is_complete() && Arc::strong_count(&block) == 2) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(block.is_complete());
    assert_eq!(Arc::strong_count(&block), 2);

    engine.stop_target(&target);
    engine.close_target(target).unwrap();
}

#[test]
fn test_close_before_stop_is_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let target = engine
        .open_target(&target_path(&dir, "premature"), &TargetOptions::default())
        .unwrap();

    assert!(matches!(
        engine.close_target(target),
        Err(EngineError::ContractViolation(_))
    ));
    engine.cleanup();
}

#[test]
fn test_cleanup_joins_open_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let a = engine
        .open_target(&target_path(&dir, "a"), &TargetOptions::default())
        .unwrap();
    let b = engine
        .open_target(&target_path(&dir, "b"), &TargetOptions::default())
        .unwrap();
    assert_ne!(a.id(), b.id());

    engine.cleanup();
    assert_eq!(engine.target_state(&a), TargetState::Closed);
    assert_eq!(engine.target_state(&b), TargetState::Closed);
    engine.close_target(a).unwrap();
    engine.close_target(b).unwrap();
    engine.cleanup();
}

// ============ Target kinds ============

fn make_fifo(path: &Path) {
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
}

#[test]
fn test_fifo_target_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = target_path(&dir, "fifo");
    make_fifo(&path);

    let mut engine = engine(1);
    let err = engine
        .open_target(&path, &TargetOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedTarget { .. }));
}

#[test]
fn test_missing_file_without_create_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(1);
    let err = engine
        .open_target(
            &target_path(&dir, "missing"),
            &TargetOptions::default().with_create(false),
        )
        .unwrap_err();
    match err {
        EngineError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_target_reports_size_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = target_path(&dir, "sized");
    std::fs::write(&path, vec![1u8; 3 * PAGE_SIZE]).unwrap();

    let mut engine = engine(1);
    let target = engine
        .open_target(&path, &TargetOptions::read_only())
        .unwrap();
    assert_eq!(target.size().unwrap(), (3 * PAGE_SIZE) as u64);
    assert_eq!(target.path(), path.as_path());

    engine.stop_target(&target);
    engine.close_target(target).unwrap();
}
