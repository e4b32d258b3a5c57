//! Hierarchical test reporter
//!
//! A run is a tree of named test nodes (file → scenario → step → substep).
//! Each node buffers its own logs and timing; textual output is rendered only
//! after a node closes, so parallel children serialize cleanly. The reporter
//! is the sole concurrency scheduler: `run` executes a child synchronously on
//! the caller's thread, `run_parallel` on its own OS thread, bounded by the
//! configured parallelism.
//!
//! `fail_now` aborts the current node's function through a sentinel panic
//! contained at the node boundary; any other panic marks the node failed and
//! records the payload.

pub mod report;

use std::fmt;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use colored::Colorize;

pub use report::{
    generate_test_report, ScenarioFileReport, ScenarioReport, StepReport, SubStepReport,
    TestDuration, TestReport, TestResult,
};

/// Options for a reporter run
pub struct RunOptions {
    writer: Box<dyn Write + Send>,
    color: bool,
    max_parallel: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            writer: Box::new(io::stdout()),
            color: false,
            max_parallel: 0,
        }
    }
}

impl RunOptions {
    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Bound the number of concurrently running parallel subtests
    /// (0 = unlimited)
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }
}

/// Run `f` under a fresh root reporter, render the result tree, and return
/// whether everything passed.
pub fn run(f: impl FnOnce(&Reporter)) -> bool {
    run_with_options(RunOptions::default(), f)
}

/// [`run`] with explicit options
pub fn run_with_options(mut opts: RunOptions, f: impl FnOnce(&Reporter)) -> bool {
    let gate = (opts.max_parallel > 0).then(|| Arc::new(Gate::new(opts.max_parallel)));
    let root = Arc::new(TestNode::new(String::new(), gate));
    exec_node(&root, f);

    let mut rendered = String::new();
    let children = root
        .state
        .lock()
        .expect("reporter poisoned")
        .children
        .clone();
    for child in &children {
        render_node(child, &mut rendered, 0, opts.color);
    }
    let passed = !root.failed();
    let verdict = if passed { "PASS" } else { "FAIL" };
    let verdict = if opts.color {
        if passed {
            verdict.green().to_string()
        } else {
            verdict.red().to_string()
        }
    } else {
        verdict.to_string()
    };
    rendered.push_str(&verdict);
    rendered.push('\n');
    let _ = opts.writer.write_all(rendered.as_bytes());
    let _ = opts.writer.flush();
    passed
}

/// A reporter with no output sink, for exercising components in isolation
pub fn detached() -> Reporter {
    Reporter {
        node: Arc::new(TestNode::new(String::new(), None)),
    }
}

/// Handle to one test node
#[derive(Clone)]
pub struct Reporter {
    node: Arc<TestNode>,
}

struct TestNode {
    name: String,
    gate: Option<Arc<Gate>>,
    state: Mutex<NodeState>,
}

#[derive(Default)]
struct NodeState {
    failed: bool,
    skipped: bool,
    closed: bool,
    duration: Duration,
    logs: Vec<String>,
    children: Vec<Arc<TestNode>>,
    parallel: Vec<JoinHandle<()>>,
}

/// Sentinel panic payload used by `fail_now` for its controlled exit
struct FailNowSignal;

impl TestNode {
    fn new(name: String, gate: Option<Arc<Gate>>) -> Self {
        Self {
            name,
            gate,
            state: Mutex::new(NodeState::default()),
        }
    }

    fn failed(&self) -> bool {
        let state = self.state.lock().expect("reporter poisoned");
        if state.failed {
            return true;
        }
        state.children.iter().any(|c| c.failed())
    }

    fn result(&self) -> TestResult {
        if self.failed() {
            return TestResult::Failed;
        }
        if self.state.lock().expect("reporter poisoned").skipped {
            return TestResult::Skipped;
        }
        TestResult::Passed
    }
}

impl Reporter {
    fn child(&self, name: impl Into<String>) -> Arc<TestNode> {
        let node = Arc::new(TestNode::new(name.into(), self.node.gate.clone()));
        self.node
            .state
            .lock()
            .expect("reporter poisoned")
            .children
            .push(node.clone());
        node
    }

    /// Run `f` under a child node on the current thread; returns whether the
    /// child passed.
    pub fn run(&self, name: impl Into<String>, f: impl FnOnce(&Reporter)) -> bool {
        let node = self.child(name);
        exec_node(&node, f);
        !node.failed()
    }

    /// Schedule `f` under a child node on its own thread. The parent's node
    /// closes only after all parallel children finish.
    pub fn run_parallel(
        &self,
        name: impl Into<String>,
        f: impl FnOnce(&Reporter) + Send + 'static,
    ) {
        let node = self.child(name);
        let gate = node.gate.clone();
        let handle = std::thread::spawn(move || {
            let _permit = gate.as_ref().map(|g| g.acquire());
            exec_node(&node, f);
        });
        self.node
            .state
            .lock()
            .expect("reporter poisoned")
            .parallel
            .push(handle);
    }

    /// Block until every parallel child scheduled on this node has finished.
    ///
    /// Closing a node does this implicitly; call it directly to observe the
    /// results of parallel children before the node closes (e.g. for report
    /// generation).
    pub fn wait_parallel(&self) {
        loop {
            let handle = self
                .node
                .state
                .lock()
                .expect("reporter poisoned")
                .parallel
                .pop();
            match handle {
                Some(h) => {
                    let _ = h.join();
                }
                None => break,
            }
        }
    }

    /// Record a child node as skipped without running anything
    pub fn skip(&self, name: impl Into<String>) {
        let node = self.child(name);
        let mut state = node.state.lock().expect("reporter poisoned");
        state.skipped = true;
        state.closed = true;
    }

    /// Append a log line to this node's buffer
    pub fn log(&self, message: impl fmt::Display) {
        self.node
            .state
            .lock()
            .expect("reporter poisoned")
            .logs
            .push(message.to_string());
    }

    /// Mark this node failed without exiting
    pub fn fail(&self) {
        self.node.state.lock().expect("reporter poisoned").failed = true;
    }

    /// Mark this node failed and abort its function
    pub fn fail_now(&self) -> ! {
        self.fail();
        // resume_unwind skips the panic hook; the sentinel is caught at the
        // node boundary
        std::panic::resume_unwind(Box::new(FailNowSignal));
    }

    /// Log an error, mark this node failed, and abort its function
    pub fn fatal(&self, err: impl fmt::Display) -> ! {
        self.log(err);
        self.fail_now();
    }

    /// Whether this node or any descendant failed
    pub fn failed(&self) -> bool {
        self.node.failed()
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }
}

fn exec_node(node: &Arc<TestNode>, f: impl FnOnce(&Reporter)) {
    let start = Instant::now();
    let reporter = Reporter { node: node.clone() };
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&reporter)));
    if let Err(payload) = outcome {
        if !payload.is::<FailNowSignal>() {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            let mut state = node.state.lock().expect("reporter poisoned");
            state.failed = true;
            state.logs.push(format!("panic: {message}"));
        }
    }

    // wait for parallel children before closing
    reporter.wait_parallel();

    let mut state = node.state.lock().expect("reporter poisoned");
    state.duration = start.elapsed();
    state.closed = true;
}

fn render_node(node: &Arc<TestNode>, out: &mut String, level: usize, color: bool) {
    let result = node.result();
    let (duration, logs, children) = {
        let state = node.state.lock().expect("reporter poisoned");
        (state.duration, state.logs.clone(), state.children.clone())
    };

    let status = match result {
        TestResult::Passed => "PASS",
        TestResult::Failed => "FAIL",
        TestResult::Skipped => "SKIP",
        TestResult::Running => "RUN",
    };
    let status = if color {
        match result {
            TestResult::Passed => status.green().to_string(),
            TestResult::Failed => status.red().to_string(),
            _ => status.yellow().to_string(),
        }
    } else {
        status.to_string()
    };

    let pad = "    ".repeat(level);
    out.push_str(&format!(
        "{pad}--- {status}: {} ({:.2}s)\n",
        node.name,
        duration.as_secs_f64()
    ));
    for log in &logs {
        for line in log.lines() {
            out.push_str(&format!("{pad}        {line}\n"));
        }
    }
    for child in &children {
        render_node(child, out, level + 1, color);
    }
}

/// Counting gate bounding concurrent parallel subtests
struct Gate {
    max: usize,
    count: Mutex<usize>,
    cv: Condvar,
}

struct Permit<'a>(&'a Gate);

impl Gate {
    fn new(max: usize) -> Self {
        Self {
            max,
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut count = self.count.lock().expect("gate poisoned");
        while *count >= self.max {
            count = self.cv.wait(count).expect("gate poisoned");
        }
        *count += 1;
        Permit(self)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().expect("gate poisoned");
        *count -= 1;
        self.0.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shared buffer usable as a reporter writer
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn test_pass_and_fail_aggregation() {
        let ok = run(|r| {
            r.run("parent", |r| {
                r.run("child", |_| {});
            });
        });
        assert!(ok);

        let ok = run(|r| {
            r.run("parent", |r| {
                r.run("good", |_| {});
                r.run("bad", |r| r.fail());
            });
        });
        assert!(!ok);
    }

    #[test]
    fn test_fail_now_aborts_function() {
        let reached = Arc::new(Mutex::new(false));
        let reached2 = reached.clone();
        let ok = run(move |r| {
            r.run("node", move |r| {
                r.fail_now();
                #[allow(unreachable_code)]
                {
                    *reached2.lock().unwrap() = true;
                }
            });
        });
        assert!(!ok);
        assert!(!*reached.lock().unwrap());
    }

    #[test]
    fn test_panic_is_contained_and_recorded() {
        let buf = SharedBuf::default();
        let ok = run_with_options(RunOptions::default().with_writer(buf.clone()), |r| {
            r.run("exploding", |_| panic!("boom"));
            r.run("still runs", |_| {});
        });
        assert!(!ok);
        let out = buf.contents();
        assert!(out.contains("panic: boom"), "{out}");
        assert!(out.contains("--- PASS: still runs"), "{out}");
    }

    #[test]
    fn test_parallel_children_buffer_output() {
        let buf = SharedBuf::default();
        let ok = run_with_options(
            RunOptions::default().with_writer(buf.clone()).with_max_parallel(2),
            |r| {
                for i in 0..4 {
                    r.run_parallel(format!("p{i}"), move |r| {
                        r.log(format!("log from p{i}"));
                    });
                }
            },
        );
        assert!(ok);
        let out = buf.contents();
        for i in 0..4 {
            let header = format!("--- PASS: p{i} (");
            let pos = out.find(&header).unwrap_or_else(|| panic!("missing {header}"));
            let after = &out[pos..];
            // the node's log sits under its own header
            let log_pos = after.find(&format!("log from p{i}")).expect("log present");
            let next_header = after[header.len()..].find("--- ").map(|p| p + header.len());
            if let Some(nh) = next_header {
                assert!(log_pos < nh, "log printed outside node block:\n{out}");
            }
        }
    }

    #[test]
    fn test_parallel_failure_propagates() {
        let ok = run(|r| {
            r.run("parent", |r| {
                r.run_parallel("bad", |r| r.fail());
            });
        });
        assert!(!ok);
    }

    #[test]
    fn test_skip_does_not_fail_parent() {
        let ok = run(|r| {
            r.run("parent", |r| {
                r.skip("skipped step");
            });
        });
        assert!(ok);
    }

    #[test]
    fn test_render_structure() {
        let buf = SharedBuf::default();
        run_with_options(RunOptions::default().with_writer(buf.clone()), |r| {
            r.run("file.yaml", |r| {
                r.run("scenario", |r| {
                    r.run("step", |r| r.log("hello"));
                });
            });
        });
        let out = buf.contents();
        assert!(out.contains("--- PASS: file.yaml ("), "{out}");
        assert!(out.contains("    --- PASS: scenario ("), "{out}");
        assert!(out.contains("        --- PASS: step ("), "{out}");
        assert!(out.ends_with("PASS\n"), "{out}");
    }
}
