//! kcall End-to-End Smoke Test
//!
//! Exercises the engine the way an application would:
//!   Part A — Blocking descriptors (no queue pair)
//!   Part B — File calls through the worker pool, driven by a poll(2) loop
//!            on the wake fd
//!   Part C — Address resolution
//!   Part D — Backpressure and cancellation
//!   Part E — Many descriptors in flight
//!
//! Run: ./target/release/kcall-smoke
//! (KCALL_LOG_LEVEL=info shows worker start/exit)

use kcall_core::kinfo;
use kcall_core::wake::WakeEvent;

use kcall_executor::{
    file_info_async, file_open_async, file_read_async, file_read_at_async, file_write_async,
    file_write_at_async, kcall_cancel, resolve_async, AddrHint, Kcall, KcallConfig, KcallError,
    KcallQueue, KcallResult, KcallState, WorkerPool,
};

use crossbeam_queue::ArrayQueue;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Event loop ──

/// Single-threaded completion consumer: poll(2) on the wake fd, drain
/// it, then drain the CQ.
struct EventLoop {
    queue: Arc<KcallQueue>,
    wake: Arc<dyn WakeEvent>,
    fd: RawFd,
    /// Ids pushed by completion handlers.
    fired: Arc<ArrayQueue<usize>>,
}

impl EventLoop {
    fn new(queue: Arc<KcallQueue>) -> Option<Self> {
        let wake = Arc::clone(queue.wake_event()?);
        let fd = wake.raw_fd()?;
        Some(Self {
            queue,
            wake,
            fd,
            fired: Arc::new(ArrayQueue::new(4096)),
        })
    }

    /// Descriptor whose handler records `id`.
    fn kcall(&self, id: usize) -> Kcall {
        let fired = Arc::clone(&self.fired);
        Kcall::with_handler(Arc::clone(&self.queue), move || {
            let _ = fired.push(id);
        })
    }

    /// One loop turn. Returns completions delivered.
    fn turn(&self, timeout: Duration) -> usize {
        let mut pfd = libc::pollfd { fd: self.fd, events: libc::POLLIN, revents: 0 };
        let ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let n = unsafe { libc::poll(&mut pfd, 1, ms) };
        if n <= 0 || pfd.revents & libc::POLLIN == 0 {
            return 0;
        }
        self.wake.drain();
        self.queue.process_cq()
    }

    /// Submit through `call`, turn the loop until the result is back.
    fn complete<T>(
        &self,
        kc: &mut Kcall,
        mut call: impl FnMut(&mut Kcall) -> KcallResult<T>,
    ) -> KcallResult<T> {
        match call(kc) {
            Err(KcallError::InProgress) => {}
            other => return other,
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while kc.state() != KcallState::Idle {
            if Instant::now() > deadline {
                return Err(KcallError::Busy);
            }
            self.turn(Duration::from_millis(100));
        }
        call(kc)
    }

    fn fired(&self) -> Vec<usize> {
        std::iter::from_fn(|| self.fired.pop()).collect()
    }
}

struct TempPath(PathBuf);

impl TempPath {
    fn new(tag: &str) -> Self {
        TempPath(std::env::temp_dir().join(format!("kcall-smoke-{}-{}", std::process::id(), tag)))
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn describe<T>(r: &KcallResult<T>) -> String {
    match r {
        Ok(_) => "ok".into(),
        Err(e) => e.to_string(),
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Blocking descriptors
// ════════════════════════════════════════════════════════════

fn test_blocking(t: &mut TestRunner) {
    t.section("Part A: Blocking descriptors");
    let mut kc = Kcall::blocking();
    let path = TempPath::new("blocking");

    let fd = file_open_async(&path.0, OFlag::O_CREAT | OFlag::O_RDWR, Mode::S_IRUSR | Mode::S_IWUSR, &mut kc);
    let fd = match fd {
        Ok(fd) => { t.pass("open (blocking)"); fd }
        Err(e) => { t.fail("open (blocking)", &e.to_string()); return; }
    };
    let raw = fd.as_raw_fd();

    let w = file_write_at_async(raw, b"blocking", 0, &mut kc);
    t.check("write_at (blocking)", w == Ok(8), &describe(&w));
    let r = file_read_at_async(raw, 64, 0, &mut kc);
    t.check("read_at (blocking)", r.as_deref() == Ok(&b"blocking"[..]), &describe(&r));
    t.check("descriptor stays idle", kc.state() == KcallState::Idle, "not idle");

    let e = file_info_async(-1, &mut kc).map(|_| ());
    t.check("fstat(-1) → EBADF", e == Err(KcallError::Os(nix::errno::Errno::EBADF)), &describe(&e));
}

// ════════════════════════════════════════════════════════════
// Part B: File calls through the pool
// ════════════════════════════════════════════════════════════

fn test_files(t: &mut TestRunner, ev: &EventLoop) {
    t.section("Part B: File calls via worker pool");
    let mut kc = ev.kcall(1);
    let path = TempPath::new("files");

    let flags = OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_TRUNC;
    let mode = Mode::S_IRUSR | Mode::S_IWUSR;
    let fd = match ev.complete(&mut kc, |kc| file_open_async(&path.0, flags, mode, kc)) {
        Ok(fd) => { t.pass("open"); fd }
        Err(e) => { t.fail("open", &e.to_string()); return; }
    };
    let raw = fd.as_raw_fd();

    let w = ev.complete(&mut kc, |kc| file_write_async(raw, b"hello, kcall", kc));
    t.check("write", w == Ok(12), &describe(&w));

    let w = ev.complete(&mut kc, |kc| file_write_at_async(raw, b"K", 7, kc));
    t.check("write_at", w == Ok(1), &describe(&w));

    let st = ev.complete(&mut kc, |kc| file_info_async(raw, kc));
    t.check(
        "fstat size",
        st.as_ref().map(|s| s.st_size).ok() == Some(12),
        &describe(&st),
    );

    let r = ev.complete(&mut kc, |kc| file_read_at_async(raw, 64, 0, kc));
    t.check("read_at", r.as_deref() == Ok(&b"hello, Kcall"[..]), &describe(&r));

    let r = ev.complete(&mut kc, |kc| file_read_async(raw, 64, kc));
    t.check("read at EOF is empty", r.as_deref() == Ok(&b""[..]), &describe(&r));

    let missing = TempPath::new("missing");
    let e = ev.complete(&mut kc, |kc| file_open_async(&missing.0, OFlag::O_RDONLY, Mode::empty(), kc));
    t.check(
        "open missing → ENOENT",
        matches!(e, Err(KcallError::Os(nix::errno::Errno::ENOENT))),
        &describe(&e),
    );

    let fired = ev.fired();
    t.check("handler fired per call", fired.len() == 7 && fired.iter().all(|&id| id == 1), &format!("{:?}", fired));
}

// ════════════════════════════════════════════════════════════
// Part C: Address resolution
// ════════════════════════════════════════════════════════════

fn test_resolve(t: &mut TestRunner, ev: &EventLoop) {
    t.section("Part C: Address resolution");
    let mut kc = ev.kcall(2);

    let r = ev.complete(&mut kc, |kc| resolve_async("127.0.0.1", 80, AddrHint::Ipv4, kc));
    t.check(
        "resolve 127.0.0.1",
        r.as_ref().map(|a| a.iter().any(|s| s.to_string() == "127.0.0.1:80")).unwrap_or(false),
        &describe(&r),
    );

    let r = ev.complete(&mut kc, |kc| resolve_async("localhost", 443, AddrHint::Any, kc));
    t.check(
        "resolve localhost",
        r.as_ref().map(|a| a.iter().all(|s| s.port() == 443 && s.ip().is_loopback())).unwrap_or(false),
        &describe(&r),
    );
    ev.fired();
}

// ════════════════════════════════════════════════════════════
// Part D: Backpressure and cancellation
// ════════════════════════════════════════════════════════════

fn test_cancel(t: &mut TestRunner) {
    t.section("Part D: Backpressure and cancellation");

    // No workers: the test thread plays both sides.
    let queue = match KcallQueue::from_config(&KcallConfig::new().sq_capacity(1).cq_capacity(1)) {
        Ok(q) => q,
        Err(e) => { t.fail("queue pair", &e.to_string()); return; }
    };
    let ev = match EventLoop::new(Arc::clone(&queue)) {
        Some(ev) => ev,
        None => { t.fail("wake fd", "no pollable wake event"); return; }
    };
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        t.fail("pipe", "pipe failed");
        return;
    }

    let mut a = ev.kcall(10);
    let mut b = ev.kcall(11);
    let r = file_read_async(fds[0], 16, &mut a);
    t.check("submit → InProgress", r == Err(KcallError::InProgress), &describe(&r));
    let r = file_read_async(fds[0], 16, &mut a);
    t.check("resubmit while queued → Busy", r == Err(KcallError::Busy), &describe(&r));
    let r = file_read_async(fds[0], 16, &mut b);
    t.check("second descriptor → QueueFull", r == Err(KcallError::QueueFull), &describe(&r));
    t.check("rejected descriptor idle", b.state() == KcallState::Idle, "not idle");

    // The pipe is empty: without the cancel the read would block.
    kcall_cancel(&a);
    let moved = queue.process_sq();
    let delivered = ev.turn(Duration::from_millis(100));
    t.check("cancelled call skipped", moved == 1 && delivered == 0, &format!("moved {} delivered {}", moved, delivered));
    t.check("no handler after cancel", ev.fired().is_empty(), "handler fired");
    t.check("cancelled descriptor idle", a.state() == KcallState::Idle, "not idle");

    let r = file_write_async(fds[1], b"reuse", &mut a);
    queue.process_sq();
    ev.turn(Duration::from_millis(100));
    let r2 = file_write_async(fds[1], b"reuse", &mut a);
    t.check("descriptor reusable", r == Err(KcallError::InProgress) && r2 == Ok(5), &describe(&r2));

    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
}

// ════════════════════════════════════════════════════════════
// Part E: Many descriptors in flight
// ════════════════════════════════════════════════════════════

fn test_burst(t: &mut TestRunner, ev: &EventLoop) {
    t.section("Part E: Many descriptors in flight");
    const CALLS: usize = 64;
    const ROUNDS: usize = 16;

    let path = TempPath::new("burst");
    let file = match std::fs::File::create(&path.0) {
        Ok(f) => f,
        Err(e) => { t.fail("create file", &e.to_string()); return; }
    };
    let raw = file.as_raw_fd();

    let mut calls: Vec<Kcall> = (0..CALLS).map(|i| ev.kcall(100 + i)).collect();
    let mut done = vec![0usize; CALLS];
    let mut rejected = 0usize;
    let mut errors = 0usize;
    let start = Instant::now();
    let deadline = start + Duration::from_secs(20);

    while done.iter().any(|&d| d < ROUNDS) && Instant::now() < deadline {
        for (i, kc) in calls.iter_mut().enumerate() {
            if done[i] == ROUNDS {
                continue;
            }
            let off = ((i * ROUNDS + done[i]) * 8) as u64;
            match file_write_at_async(raw, &off.to_le_bytes(), off, kc) {
                Ok(8) => done[i] += 1,
                Ok(_) => { errors += 1; done[i] += 1; }
                Err(KcallError::InProgress) | Err(KcallError::Busy) => {}
                Err(KcallError::QueueFull) => rejected += 1,
                Err(_) => { errors += 1; done[i] += 1; }
            }
        }
        ev.turn(Duration::from_millis(10));
    }

    let total: usize = done.iter().sum();
    let elapsed = start.elapsed();
    t.check("all rounds complete", total == CALLS * ROUNDS, &format!("{}/{}", total, CALLS * ROUNDS));
    t.check("no write errors", errors == 0, &format!("{} errors", errors));
    t.check("handlers match completions", ev.fired().len() == total, "handler count mismatch");
    t.check("queue drained", ev.queue.outstanding() == 0, &format!("{} outstanding", ev.queue.outstanding()));
    println!(
        "       {} calls in {:?} ({} QueueFull retries)",
        total, elapsed, rejected
    );
}

fn main() {
    println!("=== kcall End-to-End Smoke Test ===");
    println!("    consumer tid: {}", kcall_sys::thread::current_tid());
    let config = KcallConfig::from_env();
    config.print();

    let mut t = TestRunner::new();

    test_blocking(&mut t);

    let queue = match KcallQueue::from_config(&config) {
        Ok(q) => q,
        Err(e) => {
            println!("\nFATAL: queue pair: {}", e);
            std::process::exit(1);
        }
    };
    let mut pool = match WorkerPool::start(Arc::clone(&queue), &config) {
        Ok(p) => p,
        Err(e) => {
            println!("\nFATAL: worker pool: {}", e);
            std::process::exit(1);
        }
    };
    let ev = match EventLoop::new(Arc::clone(&queue)) {
        Some(ev) => ev,
        None => {
            println!("\nFATAL: wake event has no pollable fd");
            std::process::exit(1);
        }
    };
    kinfo!("smoke: {} workers", pool.total_workers());

    test_files(&mut t, &ev);
    test_resolve(&mut t, &ev);
    test_burst(&mut t, &ev);
    pool.shutdown();

    test_cancel(&mut t);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
