//! Scenario and step execution
//!
//! The runner walks scenario files as subtests: file → scenario → step. The
//! context returned by each step feeds the next; after a failed step the
//! remaining steps of that scenario are recorded as skipped. Request steps
//! run under their retry policy, with every attempt's invoke/build/assert
//! errors logged (and attributed to their YAML block) rather than surfaced,
//! until attempts run out.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::common::Error;
use crate::context::Context;
use crate::errors;
use crate::plugin;
use crate::reporter::Reporter;
use crate::schema::{self, Attempt, Expect, Request, Scenario, Step, StepKind};
use crate::value::{Mapping, Value};

/// Runs a set of scenario files under a reporter
#[derive(Debug, Default)]
pub struct Runner {
    files: Vec<PathBuf>,
    parallel_files: bool,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner over the given scenario files
    pub fn with_scenarios<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            parallel_files: false,
        }
    }

    /// Run scenario files as parallel sibling subtests; concurrency is
    /// bounded by the reporter's configuration.
    pub fn with_parallel_files(mut self, parallel: bool) -> Self {
        self.parallel_files = parallel;
        self
    }

    /// Run every file as a subtest of the context's reporter node
    pub fn run(&self, ctx: &Context) {
        for file in &self.files {
            let name = file.display().to_string();
            if self.parallel_files {
                let ctx = ctx.clone();
                let file = file.clone();
                let reporter = ctx.reporter().clone();
                reporter.run_parallel(name, move |r| {
                    run_file(&ctx, r, &file);
                });
            } else {
                ctx.reporter().clone().run(name, |r| {
                    run_file(ctx, r, file);
                });
            }
        }
        if self.parallel_files {
            ctx.reporter().wait_parallel();
        }
    }
}

fn run_file(ctx: &Context, reporter: &Reporter, file: &Path) {
    let scenarios = match schema::load_scenarios(file) {
        Ok(scenarios) => scenarios,
        Err(err) => reporter.fatal(err),
    };
    for scenario in &scenarios {
        reporter.run(scenario.title.clone(), |r| {
            let sctx = ctx
                .with_reporter(r.clone())
                .with_node(Some(scenario.source().clone()));
            run_scenario(sctx, scenario);
        });
    }
}

/// Execute a scenario's steps in order, threading the context step to step
pub fn run_scenario(ctx: Context, scenario: &Scenario) -> Context {
    let mut ctx = ctx;

    if let Some(plugins) = &scenario.plugins {
        ctx = ctx.with_plugins(resolve_plugins(&ctx, plugins));
    }

    if let Some(vars) = &scenario.vars {
        match ctx.execute_template(vars) {
            Ok(bindings) => ctx = ctx.with_vars(bindings),
            Err(err) => {
                let err = errors::wrap_path(err, "vars", "invalid vars");
                ctx.reporter().clone().fatal(decorate(&ctx, err));
            }
        }
    }

    let mut failed = false;
    for (idx, step) in scenario.steps.iter().enumerate() {
        let name = step_name(step, idx);
        if failed {
            ctx.reporter().skip(name);
            continue;
        }

        let reporter = ctx.reporter().clone();
        let mut next_ctx = None;
        let ok = reporter.run(name, |r| {
            let sctx = ctx.with_reporter(r.clone());
            next_ctx = Some(run_step(sctx, scenario, step, idx));
        });
        if let Some(threaded) = next_ctx {
            ctx = threaded.with_reporter(reporter);
        }
        if !ok {
            failed = true;
        }
    }
    ctx
}

fn step_name(step: &Step, idx: usize) -> String {
    if step.title.is_empty() {
        format!("#{idx:02}")
    } else {
        step.title.clone()
    }
}

fn resolve_plugins(ctx: &Context, plugins: &Mapping) -> Mapping {
    let mut resolved = Mapping::new();
    for (name, path) in plugins.iter() {
        let (Some(name), Some(path)) = (name.stringize(), path.stringize()) else {
            ctx.reporter().clone().fatal(Error::InvalidScenario(
                "plugins must map names to paths".to_string(),
            ));
        };
        match plugin::get(&path) {
            Some(value) => resolved.insert(name, value),
            None => ctx
                .reporter()
                .clone()
                .fatal(decorate(ctx, Error::PluginNotFound(path))),
        }
    }
    resolved
}

/// Execute one step: vars, then include, ref, or request/expect with retry
pub fn run_step(ctx: Context, scenario: &Scenario, step: &Step, idx: usize) -> Context {
    let mut ctx = ctx;
    if let Some(vars) = &step.vars {
        match ctx.execute_template(vars) {
            Ok(bindings) => ctx = ctx.with_vars(bindings),
            Err(err) => {
                let err = errors::wrap_path(err, format!("steps[{idx}].vars"), "invalid vars");
                ctx.reporter().clone().fatal(decorate(&ctx, err));
            }
        }
    }

    match &step.kind {
        StepKind::Include(include) => run_include(ctx, scenario, include),
        StepKind::Ref(reference) => run_ref(ctx, step, reference, idx),
        StepKind::Request {
            request, expect, ..
        } => invoke_and_assert(ctx, step, request, expect, idx),
    }
}

fn run_include(ctx: Context, scenario: &Scenario, include: &str) -> Context {
    let base_dir = scenario
        .filepath()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let path = base_dir.join(include);

    let reporter = ctx.reporter().clone();
    let mut scenarios = match schema::load_scenarios(&path) {
        Ok(scenarios) => scenarios,
        Err(err) => reporter.fatal(format!("failed to include \"{include}\" as step: {err}")),
    };
    if scenarios.len() != 1 {
        reporter.fatal(format!(
            "failed to include \"{include}\" as step: must be a single scenario"
        ));
    }
    let included = scenarios.remove(0);

    let test_name = include.strip_prefix("./").unwrap_or(include);
    let current_node = ctx.node().cloned();
    let mut out_ctx = ctx.clone();
    reporter.run(test_name, |r| {
        let ictx = ctx
            .with_reporter(r.clone())
            .with_node(Some(included.source().clone()));
        out_ctx = run_scenario(ictx, &included);
    });

    // point attribution back at the including document
    out_ctx.with_reporter(reporter).with_node(current_node)
}

fn run_ref(ctx: Context, step: &Step, reference: &str, idx: usize) -> Context {
    let reporter = ctx.reporter().clone();
    let value = match ctx.execute_template(&Value::from(reference)) {
        Ok(value) => value,
        Err(err) => {
            let err = errors::wrap_path(
                err,
                format!("steps[{idx}].ref"),
                format!("failed to reference \"{reference}\" as step"),
            );
            reporter.fatal(decorate(&ctx, err));
        }
    };
    let Value::Step(plugin_step) = value else {
        let err = errors::with_path(
            Error::Plugin(format!(
                "failed to reference \"{reference}\" as step: not a plugin step"
            )),
            format!("steps[{idx}].ref"),
        );
        reporter.fatal(decorate(&ctx, err));
    };

    let started = Instant::now();
    let new_ctx = plugin_step.run(ctx, step);
    reporter.log(format!(
        "Run {}: elapsed time {:.6} sec",
        reference,
        started.elapsed().as_secs_f64()
    ));
    new_ctx
}

fn invoke_and_assert(
    ctx: Context,
    step: &Step,
    request: &Request,
    expect: &Expect,
    idx: usize,
) -> Context {
    let reporter = ctx.reporter().clone();
    let mut retrier = match step.retry.build() {
        Ok(retrier) => retrier,
        Err(err) => reporter.fatal(format!("invalid retry policy: {err}")),
    };
    let deadline = ctx.deadline();

    let mut attempt = 0;
    loop {
        match retrier.next(deadline) {
            Attempt::Continue => {}
            Attempt::Exhausted => reporter.fail_now(),
            Attempt::DeadlineExceeded => {
                let err = errors::with_path(
                    Error::DeadlineExceeded,
                    format!("steps[{idx}].request"),
                );
                reporter.log(decorate(&ctx, err));
                reporter.fail_now();
            }
        }

        reporter.log(format!("[{attempt}] send request"));
        attempt += 1;

        let started = Instant::now();
        let invoked = request.invoker.invoke(ctx.clone());
        reporter.log(format!(
            "elapsed time: {:.6} sec",
            started.elapsed().as_secs_f64()
        ));

        let (new_ctx, response) = match invoked {
            Ok(pair) => pair,
            Err(err) => {
                let err = errors::with_path(err, format!("steps[{idx}].request"));
                reporter.log(decorate(&ctx, err));
                continue;
            }
        };

        let assertion = match expect.builder.build(&new_ctx) {
            Ok(assertion) => assertion,
            Err(err) => {
                let err = errors::with_path(err, format!("steps[{idx}].expect"));
                reporter.log(decorate(&ctx, err));
                continue;
            }
        };

        match assertion.assert(&response) {
            Ok(()) => return new_ctx,
            Err(Error::Assertions(aggregate)) => {
                // one line per leaf mismatch
                for err in aggregate.errors {
                    let err = errors::with_path(err, format!("steps[{idx}].expect"));
                    reporter.log(decorate(&ctx, err));
                }
            }
            Err(err) => {
                let err = errors::with_path(err, format!("steps[{idx}].expect"));
                reporter.log(decorate(&ctx, err));
            }
        }
    }
}

fn decorate(ctx: &Context, err: Error) -> Error {
    errors::with_node_and_colored(
        err,
        ctx.node().map(|n| n.as_ref()),
        ctx.enabled_color(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, Assertion, AssertionBuilder, Invoker, Protocol};
    use crate::reporter;
    use crate::schema::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Protocol whose invoker fails a configured number of times before
    /// succeeding
    struct FlakyProtocol {
        name: String,
        failures: Arc<AtomicUsize>,
    }

    struct FlakyInvoker {
        failures: Arc<AtomicUsize>,
    }

    impl Invoker for FlakyInvoker {
        fn invoke(&self, ctx: Context) -> crate::Result<(Context, Value)> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Invoke("connection refused".to_string()));
            }
            Ok((ctx, Value::Null))
        }
    }

    struct PassBuilder;

    impl AssertionBuilder for PassBuilder {
        fn build(&self, _ctx: &Context) -> crate::Result<Box<dyn Assertion>> {
            Ok(Box::new(PassAssertion))
        }
    }

    struct PassAssertion;

    impl Assertion for PassAssertion {
        fn assert(&self, _response: &Value) -> crate::Result<()> {
            Ok(())
        }
    }

    impl Protocol for FlakyProtocol {
        fn name(&self) -> &str {
            &self.name
        }

        fn unmarshal_request(&self, _bytes: &[u8]) -> crate::Result<Box<dyn Invoker>> {
            Ok(Box::new(FlakyInvoker {
                failures: self.failures.clone(),
            }))
        }

        fn unmarshal_expect(
            &self,
            _bytes: Option<&[u8]>,
        ) -> crate::Result<Box<dyn AssertionBuilder>> {
            Ok(Box::new(PassBuilder))
        }
    }

    fn flaky_scenario(proto: &str, failures: usize, max_retries: u32) -> (Scenario, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(failures));
        protocol::register(Arc::new(FlakyProtocol {
            name: proto.to_string(),
            failures: counter.clone(),
        }))
        .unwrap();

        let yaml = format!(
            "title: flaky\nsteps:\n  - protocol: {proto}\n    retry:\n      constant:\n        interval: 0\n        maxRetries: {max_retries}\n    request: {{}}\n"
        );
        let mut scenarios = schema::load_scenarios_from_reader(yaml.as_bytes()).unwrap();
        protocol::unregister(proto);
        (scenarios.remove(0), counter)
    }

    #[test]
    fn test_retry_recovers_within_max_retries() {
        let (scenario, _counter) = flaky_scenario("runner-flaky-ok", 2, 2);
        let ok = reporter::run(|r| {
            run_scenario(Context::new(r.clone()), &scenario);
        });
        assert!(ok, "two failures fit in maxRetries=2");
    }

    #[test]
    fn test_retry_exhaustion_fails_step() {
        let (scenario, _counter) = flaky_scenario("runner-flaky-ng", 2, 1);
        let ok = reporter::run(|r| {
            run_scenario(Context::new(r.clone()), &scenario);
        });
        assert!(!ok, "two failures exceed maxRetries=1");
    }

    #[test]
    fn test_retry_attempt_count() {
        let (scenario, counter) = flaky_scenario("runner-flaky-count", 10, 2);
        reporter::run(|r| {
            run_scenario(Context::new(r.clone()), &scenario);
        });
        // 3 attempts: failures consumed = 3
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_no_retry_is_single_attempt() {
        assert!(RetryPolicy::default().is_none());
        let (scenario, counter) = flaky_scenario("runner-flaky-single", 10, 0);
        reporter::run(|r| {
            run_scenario(Context::new(r.clone()), &scenario);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }
}
