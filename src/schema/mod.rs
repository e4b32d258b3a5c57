//! Scenario schema and YAML loader
//!
//! Scenarios load from (possibly multi-document) YAML with mapping order
//! preserved and anchors expanded. The raw YAML of each step's `request` and
//! `expect` block is handed to the registered protocol adapter at load time;
//! the resulting invoker and assertion builder are cached on the step.
//! Every scenario keeps its source document for error attribution.

pub mod retry;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::protocol::{self, AssertionBuilder, Invoker};
use crate::value::{Mapping, Value};

pub use retry::{Attempt, RetryPolicy, Retrier};

/// The source document a scenario was loaded from
#[derive(Debug)]
pub struct ScenarioSource {
    pub path: Option<PathBuf>,
    pub text: String,
}

/// A titled, ordered collection of steps loaded from one YAML document.
/// Immutable after load.
pub struct Scenario {
    pub title: String,
    pub description: String,
    pub vars: Option<Value>,
    /// Plugin name → registered plugin value name
    pub plugins: Option<Mapping>,
    /// Default protocol for steps that don't declare one
    pub protocol: Option<String>,
    pub steps: Vec<Step>,
    filepath: Option<PathBuf>,
    source: Arc<ScenarioSource>,
}

impl Scenario {
    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    pub fn source(&self) -> &Arc<ScenarioSource> {
        &self.source
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("title", &self.title)
            .field("steps", &self.steps.len())
            .field("filepath", &self.filepath)
            .finish()
    }
}

/// One step of a scenario
pub struct Step {
    pub title: String,
    pub description: String,
    pub vars: Option<Value>,
    pub retry: RetryPolicy,
    pub kind: StepKind,
}

/// The three mutually exclusive step shapes
pub enum StepKind {
    /// Run another scenario file, path relative to the including file
    Include(String),
    /// A template expression resolving to a plugin step
    Ref(String),
    /// Send a request and match the response
    Request {
        protocol: String,
        request: Request,
        expect: Expect,
    },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StepKind::Include(path) => format!("include {path:?}"),
            StepKind::Ref(expr) => format!("ref {expr:?}"),
            StepKind::Request { protocol, .. } => format!("request via {protocol:?}"),
        };
        f.debug_struct("Step")
            .field("title", &self.title)
            .field("kind", &kind)
            .finish()
    }
}

/// The opaque request block and the invoker built from it
pub struct Request {
    pub bytes: String,
    pub invoker: Box<dyn Invoker>,
}

/// The opaque expect block and the assertion builder built from it.
/// An absent block still carries a builder (a trivially passing one).
pub struct Expect {
    pub bytes: Option<String>,
    pub builder: Box<dyn AssertionBuilder>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    vars: Option<Value>,
    plugins: Option<Value>,
    protocol: Option<String>,
    #[serde(default)]
    steps: Vec<StepDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    vars: Option<Value>,
    protocol: Option<String>,
    include: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    retry: Option<RetryPolicy>,
    request: Option<Value>,
    expect: Option<Value>,
}

/// Load all scenarios from a YAML file
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<Scenario>> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).map_err(|e| Error::file_read(path.display(), e))?;
    load_from_str(&text, Some(path.to_path_buf()))
}

/// Load all scenarios from a reader; loaded scenarios carry no file path
pub fn load_scenarios_from_reader(mut reader: impl Read) -> Result<Vec<Scenario>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| Error::file_read("<reader>", e))?;
    load_from_str(&text, None)
}

fn load_from_str(text: &str, path: Option<PathBuf>) -> Result<Vec<Scenario>> {
    let source = Arc::new(ScenarioSource {
        path: path.clone(),
        text: text.to_string(),
    });

    let mut scenarios = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let doc = ScenarioDoc::deserialize(document)?;
        scenarios.push(build_scenario(doc, path.clone(), source.clone())?);
    }
    if scenarios.is_empty() {
        return Err(Error::InvalidScenario("no scenarios found".to_string()));
    }
    tracing::debug!(?path, count = scenarios.len(), "loaded scenarios");
    Ok(scenarios)
}

fn build_scenario(
    doc: ScenarioDoc,
    filepath: Option<PathBuf>,
    source: Arc<ScenarioSource>,
) -> Result<Scenario> {
    if doc.steps.is_empty() {
        return Err(Error::InvalidScenario(format!(
            "scenario \"{}\" has no steps",
            doc.title
        )));
    }

    let plugins = match doc.plugins {
        None => None,
        Some(Value::Map(m)) => Some(m),
        Some(other) => {
            return Err(Error::InvalidScenario(format!(
                "plugins must be a mapping, got {}",
                other.type_name()
            )))
        }
    };

    let mut steps = Vec::with_capacity(doc.steps.len());
    for (idx, step) in doc.steps.into_iter().enumerate() {
        steps.push(build_step(step, doc.protocol.as_deref(), idx)?);
    }

    Ok(Scenario {
        title: doc.title,
        description: doc.description,
        vars: doc.vars,
        plugins,
        protocol: doc.protocol,
        steps,
        filepath,
        source,
    })
}

fn build_step(doc: StepDoc, default_protocol: Option<&str>, idx: usize) -> Result<Step> {
    let shapes = [
        doc.include.is_some(),
        doc.reference.is_some(),
        doc.request.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if shapes != 1 {
        return Err(Error::InvalidScenario(format!(
            "steps[{idx}] must declare exactly one of include, ref, or request"
        )));
    }

    let kind = if let Some(include) = doc.include {
        StepKind::Include(include)
    } else if let Some(reference) = doc.reference {
        StepKind::Ref(reference)
    } else {
        let request_value = doc.request.expect("request shape checked above");
        let protocol_name = doc
            .protocol
            .as_deref()
            .or(default_protocol)
            .ok_or_else(|| {
                Error::InvalidScenario(format!("steps[{idx}]: protocol is required"))
            })?;
        let adapter = protocol::get(protocol_name)
            .ok_or_else(|| Error::ProtocolNotFound(protocol_name.to_string()))?;

        let request_bytes = serde_yaml::to_string(&request_value)?;
        let invoker = adapter.unmarshal_request(request_bytes.as_bytes())?;

        let expect_bytes = match &doc.expect {
            Some(v) => Some(serde_yaml::to_string(v)?),
            None => None,
        };
        let builder = adapter.unmarshal_expect(expect_bytes.as_deref().map(str::as_bytes))?;

        StepKind::Request {
            protocol: protocol_name.to_string(),
            request: Request {
                bytes: request_bytes,
                invoker,
            },
            expect: Expect {
                bytes: expect_bytes,
                builder,
            },
        }
    };

    Ok(Step {
        title: doc.title,
        description: doc.description,
        vars: doc.vars,
        retry: doc.retry.unwrap_or_default(),
        kind,
    })
}
