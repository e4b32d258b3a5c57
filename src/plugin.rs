//! Plugin-defined steps and the plugin value registry
//!
//! The registry is the seam between the runner and whatever loads user
//! plugin code: hosts register named values (records of functions, step
//! implementations) up front, and scenarios reference them through their
//! `plugins` mapping.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::common::{Error, Result};
use crate::context::Context;
use crate::schema::Step;
use crate::value::Value;

/// A step implemented by a plugin, referenced via `ref` in a scenario
pub trait PluginStep: Send + Sync {
    /// Run the step, returning the context for subsequent steps
    fn run(&self, ctx: Context, step: &Step) -> Context;
}

static PLUGINS: Lazy<RwLock<HashMap<String, Value>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a plugin value under the given name.
///
/// Fails when the name is already taken.
pub fn register(name: &str, value: Value) -> Result<()> {
    let mut plugins = PLUGINS.write().expect("plugin registry poisoned");
    if plugins.contains_key(name) {
        return Err(Error::Plugin(format!(
            "plugin \"{name}\" is already registered"
        )));
    }
    plugins.insert(name.to_string(), value);
    Ok(())
}

/// Remove a plugin registration; unknown names are ignored
pub fn unregister(name: &str) {
    let mut plugins = PLUGINS.write().expect("plugin registry poisoned");
    plugins.remove(name);
}

/// Look up a registered plugin value
pub fn get(name: &str) -> Option<Value> {
    let plugins = PLUGINS.read().expect("plugin registry poisoned");
    plugins.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let name = "test-plugin-register";
        register(name, Value::from("value")).unwrap();
        assert_eq!(get(name), Some(Value::from("value")));
        assert!(register(name, Value::Null).is_err());
        unregister(name);
        assert_eq!(get(name), None);
    }
}
