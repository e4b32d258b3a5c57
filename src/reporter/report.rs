//! Structured test reports
//!
//! Walks a closed reporter tree into a serializable record mirroring the
//! file → scenario → step → substep hierarchy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::{Reporter, TestNode};

/// Final state of a test node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Running,
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestResult::Running => "running",
            TestResult::Passed => "passed",
            TestResult::Failed => "failed",
            TestResult::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Wall-clock duration, serialized as fractional seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestDuration(pub Duration);

impl Serialize for TestDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0.as_secs_f64())
    }
}

/// Report for a whole run
#[derive(Debug, Serialize, PartialEq)]
pub struct TestReport {
    pub result: TestResult,
    pub files: Vec<ScenarioFileReport>,
}

/// Report for one scenario file
#[derive(Debug, Serialize, PartialEq)]
pub struct ScenarioFileReport {
    pub name: String,
    pub result: TestResult,
    pub duration: TestDuration,
    pub scenarios: Vec<ScenarioReport>,
}

/// Report for one scenario
#[derive(Debug, Serialize, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub file: String,
    pub result: TestResult,
    pub duration: TestDuration,
    pub steps: Vec<StepReport>,
}

/// Report for one step
#[derive(Debug, Serialize, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub result: TestResult,
    pub duration: TestDuration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<SubStepReport>,
}

/// Report for a nested subtest of a step
#[derive(Debug, Serialize, PartialEq)]
pub struct SubStepReport {
    pub name: String,
    pub result: TestResult,
    pub duration: TestDuration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<SubStepReport>,
}

/// Generate a structured report from the reporter's tree.
///
/// Callers generate after the observed subtree has closed; still-running
/// nodes report [`TestResult::Running`]. The overall result aggregates the
/// file reports, since the root node closes only after its function returns.
pub fn generate_test_report(reporter: &Reporter) -> TestReport {
    let root = &reporter.node;
    let files: Vec<ScenarioFileReport> = children(root).iter().map(file_report).collect();
    let result = if files.iter().any(|f| f.result == TestResult::Failed) {
        TestResult::Failed
    } else {
        TestResult::Passed
    };
    TestReport { result, files }
}

fn children(node: &Arc<TestNode>) -> Vec<Arc<TestNode>> {
    node.state
        .lock()
        .expect("reporter poisoned")
        .children
        .clone()
}

fn node_result(node: &Arc<TestNode>) -> TestResult {
    if !node.state.lock().expect("reporter poisoned").closed {
        return TestResult::Running;
    }
    node.result()
}

fn duration(node: &Arc<TestNode>) -> TestDuration {
    TestDuration(node.state.lock().expect("reporter poisoned").duration)
}

fn logs(node: &Arc<TestNode>) -> Vec<String> {
    node.state.lock().expect("reporter poisoned").logs.clone()
}

fn file_report(node: &Arc<TestNode>) -> ScenarioFileReport {
    let file = node.name.clone();
    ScenarioFileReport {
        name: file.clone(),
        result: node_result(node),
        duration: duration(node),
        scenarios: children(node)
            .iter()
            .map(|scenario| scenario_report(scenario, &file))
            .collect(),
    }
}

fn scenario_report(node: &Arc<TestNode>, file: &str) -> ScenarioReport {
    ScenarioReport {
        name: node.name.clone(),
        file: file.to_string(),
        result: node_result(node),
        duration: duration(node),
        steps: children(node).iter().map(step_report).collect(),
    }
}

fn step_report(node: &Arc<TestNode>) -> StepReport {
    StepReport {
        name: node.name.clone(),
        result: node_result(node),
        duration: duration(node),
        logs: logs(node),
        sub_steps: children(node).iter().map(sub_step_report).collect(),
    }
}

fn sub_step_report(node: &Arc<TestNode>) -> SubStepReport {
    SubStepReport {
        name: node.name.clone(),
        result: node_result(node),
        duration: duration(node),
        logs: logs(node),
        sub_steps: children(node).iter().map(sub_step_report).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter;

    #[test]
    fn test_report_structure() {
        let mut captured = None;
        let ok = reporter::run(|r| {
            r.run("scenarios/echo.yaml", |r| {
                r.run("echo-service", |r| {
                    r.run("include", |r| {
                        r.run("included.yaml", |r| {
                            r.run("step plugin", |_| {});
                        });
                    });
                    r.run("POST /echo", |r| r.log("[0] send request"));
                });
            });
            captured = Some(generate_test_report(r));
        });
        assert!(ok);

        let report = captured.unwrap();
        assert_eq!(report.files.len(), 1);
        let file = &report.files[0];
        assert_eq!(file.name, "scenarios/echo.yaml");
        assert_eq!(file.result, TestResult::Passed);

        let scenario = &file.scenarios[0];
        assert_eq!(scenario.name, "echo-service");
        assert_eq!(scenario.file, "scenarios/echo.yaml");
        assert_eq!(scenario.steps.len(), 2);

        let include = &scenario.steps[0];
        assert_eq!(include.name, "include");
        assert_eq!(include.sub_steps.len(), 1);
        assert_eq!(include.sub_steps[0].name, "included.yaml");
        assert_eq!(include.sub_steps[0].sub_steps[0].name, "step plugin");

        let post = &scenario.steps[1];
        assert_eq!(post.name, "POST /echo");
        assert_eq!(post.logs, vec!["[0] send request".to_string()]);
    }

    #[test]
    fn test_failed_step_fails_everything_above() {
        let mut captured = None;
        let ok = reporter::run(|r| {
            r.run("file.yaml", |r| {
                r.run("scenario", |r| {
                    r.run("bad step", |r| r.fail());
                    r.skip("skipped step");
                });
            });
            captured = Some(generate_test_report(r));
        });
        assert!(!ok);

        let report = captured.unwrap();
        assert_eq!(report.result, TestResult::Failed);
        let file = &report.files[0];
        assert_eq!(file.result, TestResult::Failed);
        assert_eq!(file.scenarios[0].result, TestResult::Failed);
        assert_eq!(file.scenarios[0].steps[0].result, TestResult::Failed);
        assert_eq!(file.scenarios[0].steps[1].result, TestResult::Skipped);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut captured = None;
        reporter::run(|r| {
            r.run("file.yaml", |r| {
                r.run("scenario", |r| {
                    r.run("step", |_| {});
                });
            });
            captured = Some(generate_test_report(r));
        });
        let json = serde_json::to_string(&captured.unwrap()).unwrap();
        assert!(json.contains("\"result\":\"passed\""), "{json}");
        assert!(json.contains("\"file\":\"file.yaml\""), "{json}");
    }
}
