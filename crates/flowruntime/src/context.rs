use flowcore::{FlowError, Value};
use std::collections::HashMap;

/// Per-run mapping from `(element_id, port)` to a resolved value
///
/// Each key is written once, by the element that produced it. The scheduler
/// only hands a key to readers after its writer completed, so the map needs
/// no synchronisation of its own.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: HashMap<String, HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an output value; a second write to the same key is an error
    pub fn write(&mut self, element_id: &str, port: &str, value: Value) -> Result<(), FlowError> {
        let ports = self.values.entry(element_id.to_string()).or_default();
        if ports.contains_key(port) {
            return Err(FlowError::Execution(format!(
                "context key {}.{} written twice",
                element_id, port
            )));
        }
        ports.insert(port.to_string(), value);
        Ok(())
    }

    /// Record every output of an element
    pub fn write_outputs(
        &mut self,
        element_id: &str,
        outputs: &HashMap<String, Value>,
    ) -> Result<(), FlowError> {
        for (port, value) in outputs {
            self.write(element_id, port, value.clone())?;
        }
        Ok(())
    }

    pub fn read(&self, element_id: &str, port: &str) -> Option<&Value> {
        self.values.get(element_id).and_then(|ports| ports.get(port))
    }

    pub fn outputs_of(&self, element_id: &str) -> Option<&HashMap<String, Value>> {
        self.values.get(element_id)
    }

    pub fn into_outputs(self) -> HashMap<String, HashMap<String, Value>> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_write_once() {
        let mut ctx = ExecutionContext::new();
        ctx.write("a", "out", json!(1)).unwrap();
        assert!(ctx.write("a", "out", json!(2)).is_err());
        assert_eq!(ctx.read("a", "out"), Some(&json!(1)));
        ctx.write("a", "other", json!(3)).unwrap();
        assert_eq!(ctx.outputs_of("a").map(|o| o.len()), Some(2));
    }
}
