use async_trait::async_trait;
use flowcore::{
    type_name, Element, ElementContext, ElementError, ElementOutput, FlowEvent, Map, PortType,
    Value,
};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Rule {
    Required,
    NotEmpty,
    Type,
    Equals,
    OneOf,
    Min,
    Max,
    MinLength,
    MaxLength,
    Contains,
    Email,
}

/// One named predicate over an input
#[derive(Debug, Clone, Deserialize)]
struct Check {
    name: String,
    input: String,
    rule: Rule,
    #[serde(default)]
    value: Option<Value>,
    /// Advisory checks are reported but never affect `is_valid`
    #[serde(default)]
    advisory: bool,
}

impl Check {
    fn evaluate(&self, actual: Option<&Value>) -> Result<(), String> {
        let present = actual.filter(|v| !v.is_null());
        match self.rule {
            Rule::Required => present.map(|_| ()).ok_or_else(|| "value is missing".to_string()),
            Rule::NotEmpty => match present {
                Some(Value::String(s)) if s.trim().is_empty() => Err("value is empty".into()),
                Some(Value::Array(items)) if items.is_empty() => Err("list is empty".into()),
                Some(Value::Object(map)) if map.is_empty() => Err("object is empty".into()),
                Some(_) => Ok(()),
                None => Err("value is missing".into()),
            },
            Rule::Type => {
                let expected = self.expected_str()?;
                let actual = actual.map(type_name).unwrap_or("null");
                if actual == expected {
                    Ok(())
                } else {
                    Err(format!("expected {}, got {}", expected, actual))
                }
            }
            Rule::Equals => {
                let expected = self.expected()?;
                if actual == Some(expected) {
                    Ok(())
                } else {
                    Err(format!("expected {}", expected))
                }
            }
            Rule::OneOf => {
                let options = self
                    .expected()?
                    .as_array()
                    .ok_or_else(|| "one_of needs a list".to_string())?;
                match actual {
                    Some(v) if options.contains(v) => Ok(()),
                    _ => Err(format!("not one of {}", Value::Array(options.clone()))),
                }
            }
            Rule::Min | Rule::Max => {
                let bound = self.expected_f64()?;
                let n = present
                    .and_then(Value::as_f64)
                    .ok_or_else(|| "value is not a number".to_string())?;
                match self.rule {
                    Rule::Min if n < bound => Err(format!("{} is below {}", n, bound)),
                    Rule::Max if n > bound => Err(format!("{} is above {}", n, bound)),
                    _ => Ok(()),
                }
            }
            Rule::MinLength | Rule::MaxLength => {
                let bound = self.expected_f64()? as usize;
                let len = match present {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(items)) => items.len(),
                    _ => return Err("value has no length".into()),
                };
                match self.rule {
                    Rule::MinLength if len < bound => Err(format!("length {} is below {}", len, bound)),
                    Rule::MaxLength if len > bound => Err(format!("length {} is above {}", len, bound)),
                    _ => Ok(()),
                }
            }
            Rule::Contains => {
                let needle = self.expected()?;
                let contained = match (present, needle) {
                    (Some(Value::String(s)), Value::String(n)) => s.contains(n.as_str()),
                    (Some(Value::Array(items)), n) => items.contains(n),
                    _ => false,
                };
                if contained {
                    Ok(())
                } else {
                    Err(format!("does not contain {}", needle))
                }
            }
            Rule::Email => match present.and_then(Value::as_str) {
                Some(s) if is_email(s) => Ok(()),
                _ => Err("not an email address".into()),
            },
        }
    }

    fn expected(&self) -> Result<&Value, String> {
        self.value
            .as_ref()
            .ok_or_else(|| format!("rule {:?} needs a value", self.rule))
    }

    fn expected_str(&self) -> Result<&str, String> {
        self.expected()?
            .as_str()
            .ok_or_else(|| format!("rule {:?} needs a string value", self.rule))
    }

    fn expected_f64(&self) -> Result<f64, String> {
        self.expected()?
            .as_f64()
            .ok_or_else(|| format!("rule {:?} needs a numeric value", self.rule))
    }

    /// Rules whose comparison value is mandatory
    fn needs_value(&self) -> bool {
        !matches!(self.rule, Rule::Required | Rule::NotEmpty | Rule::Email)
    }
}

fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Evaluates named predicates over its inputs; never fails the run
pub struct Validator {
    checks: Vec<Check>,
}

#[async_trait]
impl Element for Validator {
    fn element_type(&self) -> &str {
        "validator"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let mut results = Vec::with_capacity(self.checks.len());
        let mut failed = Vec::new();
        let mut is_valid = true;

        for check in &self.checks {
            let outcome = check.evaluate(ctx.inputs.get(&check.input));
            let passed = outcome.is_ok();
            if !passed {
                failed.push(Value::String(check.name.clone()));
                if !check.advisory {
                    is_valid = false;
                }
            }
            results.push(json!({
                "name": check.name,
                "input": check.input,
                "passed": passed,
                "advisory": check.advisory,
                "message": outcome.err(),
            }));
        }

        ctx.events.emit(FlowEvent::Validation {
            element_id: ctx.element_id.clone(),
            is_valid,
            checks: results.clone(),
        });

        Ok(ElementOutput::new()
            .with_output("is_valid", is_valid)
            .with_output("checks", Value::Array(results))
            .with_output("failed_checks", Value::Array(failed)))
    }
}

pub struct ValidatorFactory;

impl ElementFactory for ValidatorFactory {
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        let checks: Vec<Check> = match parameters.get("checks") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| ElementError::Configuration(format!("Invalid checks: {}", e)))?,
            None => Vec::new(),
        };
        if let Some(check) = checks.iter().find(|c| c.needs_value() && c.value.is_none()) {
            return Err(ElementError::Configuration(format!(
                "Check '{}' needs a value",
                check.name
            )));
        }
        Ok(Arc::new(Validator { checks }))
    }

    fn element_type(&self) -> &str {
        "validator"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Evaluate named checks over inputs", "data")
            .output(PortDefinition::required("is_valid", PortType::Boolean))
            .output(PortDefinition::required("checks", PortType::List))
            .output(PortDefinition::required("failed_checks", PortType::List))
    }
}
