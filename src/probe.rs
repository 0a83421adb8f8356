// src/probe.rs

//! Diagnostic probe tree.
//!
//! Components describe themselves by writing key/value pairs into named
//! scopes. The result is a JSON document suitable for health endpoints and
//! support dumps.
//!
//! ```
//! # use mom_transport::ProbeContext;
//! let mut probe = ProbeContext::new();
//! probe
//!     .create_scope("inMemoryReceiveTransport")
//!     .set("address", "orders")?;
//!
//! assert_eq!(probe.to_json()["inMemoryReceiveTransport"]["address"], "orders");
//! # Ok::<(), mom_transport::Error>(())
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;

/// Root of a probe tree.
#[derive(Debug, Default, Clone)]
pub struct ProbeContext {
    root: Map<String, Value>,
}

/// A named scope inside a [`ProbeContext`].
#[derive(Debug)]
pub struct ProbeScope<'a> {
    map: &'a mut Map<String, Value>,
}

fn scope_in<'a>(map: &'a mut Map<String, Value>, name: &str) -> ProbeScope<'a> {
    // ---
    let entry = map
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(map) => ProbeScope { map },
        _ => unreachable!("probe scope entry was just made an object"),
    }
}

impl ProbeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a top-level scope.
    pub fn create_scope(&mut self, name: &str) -> ProbeScope<'_> {
        scope_in(&mut self.root, name)
    }

    /// Set a top-level value.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<&mut Self> {
        self.root.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// The tree as a JSON value.
    pub fn to_json(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.root)
    }
}

impl ProbeScope<'_> {
    /// Set `key` in this scope, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<&mut Self> {
        self.map.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Open (or reopen) a nested scope.
    pub fn create_scope(&mut self, name: &str) -> ProbeScope<'_> {
        scope_in(self.map, name)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_nested_scopes() {
        // ---
        let mut probe = ProbeContext::new();
        {
            let mut scope = probe.create_scope("connection");
            scope.set("host", "localhost").unwrap();
            scope.create_scope("channels").set("open", 2).unwrap();
        }
        probe.create_scope("connection").set("closed", false).unwrap();

        let json = probe.into_json();
        assert_eq!(json["connection"]["host"], "localhost");
        assert_eq!(json["connection"]["channels"]["open"], 2);
        assert_eq!(json["connection"]["closed"], false);
    }
}
