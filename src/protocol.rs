//! Protocol adapter contract and registry
//!
//! An adapter turns the raw YAML of a step's `request` block into an
//! [`Invoker`] and of its `expect` block into an [`AssertionBuilder`].
//! Adapters register under their protocol name before scenarios load; the
//! table is process-wide and safe for concurrent lookups during execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::common::{Error, Result};
use crate::context::Context;
use crate::value::Value;

/// A named protocol adapter
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    /// Build an invoker from the raw YAML bytes of a `request` block
    fn unmarshal_request(&self, bytes: &[u8]) -> Result<Box<dyn Invoker>>;

    /// Build an assertion builder from the raw YAML bytes of an `expect`
    /// block. Called with `None` when the block is absent; the returned
    /// builder must then produce a trivially passing assertion.
    fn unmarshal_expect(&self, bytes: Option<&[u8]>) -> Result<Box<dyn AssertionBuilder>>;
}

/// A one-shot request sender
pub trait Invoker: Send + Sync {
    /// Send the request, returning the derived context (carrying the
    /// request/response values) and the response.
    fn invoke(&self, ctx: Context) -> Result<(Context, Value)>;
}

/// Constructs a response matcher at execution time
pub trait AssertionBuilder: Send + Sync {
    fn build(&self, ctx: &Context) -> Result<Box<dyn Assertion>>;
}

/// A response matcher
pub trait Assertion: Send + Sync {
    /// Returns `Err` on mismatch; aggregates use
    /// [`Error::Assertions`](crate::Error::Assertions).
    fn assert(&self, response: &Value) -> Result<()>;
}

static PROTOCOLS: Lazy<RwLock<HashMap<String, Arc<dyn Protocol>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an adapter under its name.
///
/// Fails when the name is already taken.
pub fn register(protocol: Arc<dyn Protocol>) -> Result<()> {
    let name = protocol.name().to_string();
    let mut protocols = PROTOCOLS.write().expect("protocol registry poisoned");
    if protocols.contains_key(&name) {
        return Err(Error::ProtocolAlreadyRegistered(name));
    }
    tracing::debug!(%name, "registered protocol");
    protocols.insert(name, protocol);
    Ok(())
}

/// Remove an adapter registration; unknown names are ignored
pub fn unregister(name: &str) {
    let mut protocols = PROTOCOLS.write().expect("protocol registry poisoned");
    protocols.remove(name);
}

/// Look up a registered adapter
pub fn get(name: &str) -> Option<Arc<dyn Protocol>> {
    let protocols = PROTOCOLS.read().expect("protocol registry poisoned");
    protocols.get(name).cloned()
}
