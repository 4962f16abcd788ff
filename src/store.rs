//! Process-wide mapping of point name → latest decoded value.
//!
//! Exists solely so derived metrics can read the other values they depend
//! on; never persisted, overwritten in place. Accessed only from the
//! processor's task, so no locking is required (§5).

use crate::value::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ValueStore {
    values: HashMap<String, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }
}
