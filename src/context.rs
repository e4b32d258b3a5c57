//! Immutable execution context
//!
//! A [`Context`] is threaded through scenario execution; every mutation
//! produces a derived copy sharing its ancestors. Variable bindings form a
//! chain of frames resolved innermost-first, so a derived context observes
//! all ancestor bindings without copying them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::Result;
use crate::query::KeyExtractor;
use crate::reporter::Reporter;
use crate::schema::ScenarioSource;
use crate::template;
use crate::value::{Mapping, Value};

/// One frame of variable bindings
#[derive(Debug)]
pub struct VarFrame {
    bindings: Value,
    parent: Option<Arc<VarFrame>>,
}

impl KeyExtractor for VarFrame {
    fn extract_by_key(&self, key: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(f) = frame {
            if let Some(v) = crate::query::extract_by_key(&f.bindings, key) {
                return Some(v);
            }
            frame = f.parent.as_deref();
        }
        None
    }
}

/// Immutable execution context
#[derive(Clone)]
pub struct Context {
    reporter: Reporter,
    vars: Option<Arc<VarFrame>>,
    plugins: Option<Arc<VarFrame>>,
    request: Option<Arc<Value>>,
    response: Option<Arc<Value>>,
    node: Option<Arc<ScenarioSource>>,
    plugin_dir: Option<Arc<PathBuf>>,
    enabled_color: bool,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            vars: None,
            plugins: None,
            request: None,
            response: None,
            node: None,
            plugin_dir: None,
            enabled_color: false,
            deadline: None,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn with_reporter(&self, reporter: Reporter) -> Self {
        let mut ctx = self.clone();
        ctx.reporter = reporter;
        ctx
    }

    /// Push a frame of variable bindings; the innermost frame wins
    pub fn with_vars(&self, bindings: Value) -> Self {
        let mut ctx = self.clone();
        ctx.vars = Some(Arc::new(VarFrame {
            bindings,
            parent: self.vars.clone(),
        }));
        ctx
    }

    /// Push a frame of plugin values
    pub fn with_plugins(&self, plugins: Mapping) -> Self {
        let mut ctx = self.clone();
        ctx.plugins = Some(Arc::new(VarFrame {
            bindings: Value::Map(plugins),
            parent: self.plugins.clone(),
        }));
        ctx
    }

    pub fn with_request(&self, request: Value) -> Self {
        let mut ctx = self.clone();
        ctx.request = Some(Arc::new(request));
        ctx
    }

    pub fn request(&self) -> Option<&Value> {
        self.request.as_deref()
    }

    pub fn with_response(&self, response: Value) -> Self {
        let mut ctx = self.clone();
        ctx.response = Some(Arc::new(response));
        ctx
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_deref()
    }

    /// Point error attribution at a scenario document
    pub fn with_node(&self, node: Option<Arc<ScenarioSource>>) -> Self {
        let mut ctx = self.clone();
        ctx.node = node;
        ctx
    }

    pub fn node(&self) -> Option<&Arc<ScenarioSource>> {
        self.node.as_ref()
    }

    pub fn with_plugin_dir(&self, dir: impl Into<PathBuf>) -> Self {
        let mut ctx = self.clone();
        ctx.plugin_dir = Some(Arc::new(dir.into()));
        ctx
    }

    pub fn plugin_dir(&self) -> Option<&Path> {
        self.plugin_dir.as_ref().map(|p| p.as_path())
    }

    pub fn with_color(&self, enabled: bool) -> Self {
        let mut ctx = self.clone();
        ctx.enabled_color = enabled;
        ctx
    }

    pub fn enabled_color(&self) -> bool {
        self.enabled_color
    }

    /// Set the request deadline to `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The data environment templates execute against: `vars`, `plugins`,
    /// and the last `request`/`response` of this context.
    pub fn template_data(&self) -> Value {
        let mut root = Mapping::new();
        if let Some(vars) = &self.vars {
            let extractor: Arc<dyn KeyExtractor> = vars.clone();
            root.insert("vars", Value::Extractor(extractor));
        }
        if let Some(plugins) = &self.plugins {
            let extractor: Arc<dyn KeyExtractor> = plugins.clone();
            root.insert("plugins", Value::Extractor(extractor));
        }
        if let Some(request) = &self.request {
            root.insert("request", Value::Shared(request.clone()));
        }
        if let Some(response) = &self.response {
            root.insert("response", Value::Shared(response.clone()));
        }
        Value::Map(root)
    }

    /// Execute every template in `value` against this context's data
    pub fn execute_template(&self, value: &Value) -> Result<Value> {
        template::execute_value(value, &self.template_data())
    }
}
