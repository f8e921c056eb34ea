//! End-to-end seed scenarios exercising the registry, link/monitor
//! supervision, selective receive, and timers together through the public
//! API, in the style of the teacher's `meshc` end-to-end suite: one process
//! per behavior under test, assertions on the messages and state a real
//! caller would observe rather than on internal structures.
//!
//! The runtime is a process-lifetime singleton (spec.md §4.9: `init` is
//! idempotent-failure on a second call), so every scenario below runs
//! sequentially inside one `#[test]`, sharing a single initialized runtime
//! and the host pid `init()` returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use swarmrt::{reserved_tags, ExitReason, SignalPayload};

fn wait_until(mut deadline_ms: u64, mut pred: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(5);
    loop {
        if pred() {
            return true;
        }
        if deadline_ms == 0 {
            return false;
        }
        std::thread::sleep(step);
        deadline_ms = deadline_ms.saturating_sub(5);
    }
}

#[test]
fn test_seed_scenarios() {
    swarmrt::init();

    scenario_registry_round_trip();
    scenario_link_propagation_with_trap();
    scenario_link_kill_chain_without_trap();
    scenario_monitor_down();
    scenario_selective_receive();
    scenario_timer();
    scenario_link_crash_hits_running_peer();

    swarmrt::shutdown();
}

/// S1: register a worker under a name, confirm `whereis` resolves it and a
/// second registration under the same name is rejected, exercise
/// `send_named`, and confirm the name is released on exit.
fn scenario_registry_round_trip() {
    let received = Arc::new(AtomicUsize::new(0));
    let received2 = Arc::clone(&received);
    let registered = Arc::new(AtomicBool::new(false));
    let registered2 = Arc::clone(&registered);

    let worker = swarmrt::spawn(move || {
        swarmrt::register("counter").expect("first registration must succeed");
        registered2.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            if swarmrt::receive_any(500).is_some() {
                received2.fetch_add(1, Ordering::SeqCst);
            }
        }
    })
    .unwrap();

    assert!(wait_until(1000, || registered.load(Ordering::SeqCst)));
    assert_eq!(swarmrt::whereis("counter"), Some(worker));

    let second_rejected = Arc::new(AtomicBool::new(false));
    let second_rejected2 = Arc::clone(&second_rejected);
    swarmrt::spawn(move || {
        if swarmrt::register("counter").is_err() {
            second_rejected2.store(true, Ordering::SeqCst);
        }
    })
    .unwrap();
    assert!(wait_until(1000, || second_rejected.load(Ordering::SeqCst)));

    for payload in ["first", "second", "third"] {
        assert!(swarmrt::send_named(
            "counter",
            reserved_tags::NONE,
            Box::new(payload.to_string())
        ));
    }

    assert!(wait_until(2000, || received.load(Ordering::SeqCst) == 3));
    assert!(wait_until(2000, || swarmrt::whereis("counter").is_none()));
}

/// S2: a trapping parent links a child that exits abnormally and receives
/// the death as an ordinary `EXIT` message instead of crashing.
fn scenario_link_propagation_with_trap() {
    swarmrt::set_trap_exit(true);

    let child = swarmrt::spawn(|| {
        let me = swarmrt::self_pid();
        swarmrt::send_after(Duration::from_millis(50), me, Box::new(()));
        swarmrt::receive_tagged(reserved_tags::TIMER, swarmrt::INFINITE);
        swarmrt::exit(ExitReason::Custom(42, "scenario child".into()));
    })
    .unwrap();

    swarmrt::link_process(child).expect("child must still be alive to link");

    let msg = swarmrt::receive_tagged(reserved_tags::EXIT, 5000).expect("expected an EXIT signal");
    let signal = msg.payload::<SignalPayload>().expect("EXIT payload must be a SignalPayload");
    assert_eq!(signal.pid, child);
    assert_eq!(signal.reason, 42);
}

/// S3: `spawn_link` atomically spawns and links; the trapping coordinator
/// still receives the doomed child's death as a message, not a crash.
fn scenario_link_kill_chain_without_trap() {
    swarmrt::set_trap_exit(true);

    let doomed = swarmrt::spawn_link(|| {
        swarmrt::exit(ExitReason::Custom(1, "doomed".into()));
    })
    .unwrap();

    let msg = swarmrt::receive_tagged(reserved_tags::EXIT, 5000).expect("expected an EXIT signal");
    let signal = msg.payload::<SignalPayload>().expect("EXIT payload must be a SignalPayload");
    assert_eq!(signal.pid, doomed);
    assert_eq!(signal.reason, 1);
}

/// S4: a one-shot monitor fires a `DOWN` message carrying the watched pid
/// and the monitor ref it was given.
fn scenario_monitor_down() {
    let target = swarmrt::spawn(|| {
        let me = swarmrt::self_pid();
        swarmrt::send_after(Duration::from_millis(50), me, Box::new(()));
        swarmrt::receive_tagged(reserved_tags::TIMER, swarmrt::INFINITE);
    })
    .unwrap();

    let monitor_ref = swarmrt::monitor(target).expect("target must still be alive to monitor");

    let msg = swarmrt::receive_tagged(reserved_tags::DOWN, 5000).expect("expected a DOWN signal");
    let signal = msg.payload::<SignalPayload>().expect("DOWN payload must be a SignalPayload");
    assert_eq!(signal.pid, target);
    assert_eq!(signal.monitor_ref, monitor_ref);
}

/// S5: selective receive by tag finds a message buried behind two others
/// without consuming them, and later plain receives return the skipped
/// messages in their original send order.
fn scenario_selective_receive() {
    let host = swarmrt::self_pid();
    swarmrt::spawn(move || {
        swarmrt::send_tagged(host, 101, Box::new("ping".to_string()));
        swarmrt::send_tagged(host, 100, Box::new("pong".to_string()));
        swarmrt::send_tagged(host, 102, Box::new("the-data".to_string()));
    })
    .unwrap();

    let first = swarmrt::receive_tagged(102, 2000).expect("expected tag 102");
    assert_eq!(first.payload::<String>().unwrap(), "the-data");

    let second = swarmrt::receive_any(2000).expect("expected the skipped tag-101 message");
    assert_eq!(second.tag(), 101);
    assert_eq!(second.payload::<String>().unwrap(), "ping");

    let third = swarmrt::receive_any(2000).expect("expected the skipped tag-100 message");
    assert_eq!(third.tag(), 100);
    assert_eq!(third.payload::<String>().unwrap(), "pong");
}

/// S6: `send_after` delivers a `TIMER` message within its expected window.
fn scenario_timer() {
    let t0 = Instant::now();
    let me = swarmrt::self_pid();
    swarmrt::send_after(Duration::from_millis(50), me, Box::new("tick".to_string()));

    let msg = swarmrt::receive_tagged(reserved_tags::TIMER, 2000).expect("expected a TIMER message");
    let elapsed = t0.elapsed();
    assert!(elapsed >= Duration::from_millis(40), "fired too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(500), "fired too late: {elapsed:?}");
    assert_eq!(msg.payload::<String>().unwrap(), "tick");
}

/// S2/S3 above only ever crash a peer that's parked in `receive_tagged`
/// (`Waiting`). This scenario instead keeps the non-trapping linked peer
/// actively spinning through `yield_now` — actually `Running` on a worker
/// thread, not merely enqueued — at the moment its partner crashes, so the
/// cascade has to go through `propagate_exit`'s `Running`-peer branch rather
/// than its `Waiting`-peer one. A monitor on the spinning peer confirms it
/// still dies exactly once, with the crash's reason carried through, and
/// never gets double-scheduled onto two run queues at once.
fn scenario_link_crash_hits_running_peer() {
    let linked = Arc::new(AtomicBool::new(false));
    let linked2 = Arc::clone(&linked);

    let crasher = swarmrt::spawn(|| {
        swarmrt::receive_tagged(99, swarmrt::INFINITE);
        swarmrt::exit(ExitReason::Custom(7, "crash while linked peer was running".into()));
    })
    .unwrap();

    let spinner = swarmrt::spawn(move || {
        swarmrt::link_process(crasher).expect("crasher must still be alive to link");
        linked2.store(true, Ordering::SeqCst);
        loop {
            swarmrt::yield_now();
        }
    })
    .unwrap();

    let spinner_monitor = swarmrt::monitor(spinner).expect("spinner must still be alive to monitor");

    assert!(wait_until(1000, || linked.load(Ordering::SeqCst)));
    // Let the spinner actually spend a few scheduling slices `Running`
    // before the crash lands.
    std::thread::sleep(Duration::from_millis(20));
    swarmrt::send_tagged(crasher, 99, Box::new(()));

    let msg =
        swarmrt::receive_tagged(reserved_tags::DOWN, 5000).expect("expected a DOWN signal for the spinner");
    let signal = msg.payload::<SignalPayload>().expect("DOWN payload must be a SignalPayload");
    assert_eq!(signal.pid, spinner);
    assert_eq!(signal.monitor_ref, spinner_monitor);
    assert_eq!(
        signal.reason, 7,
        "the spinner's death must carry the crasher's reason through the link cascade"
    );
}
