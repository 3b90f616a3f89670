use crate::error::UnknownDataType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The closed set of data types a port can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Control flow only; carries no data.
    Step,
    String,
    Number,
    Boolean,
    Object,
    Array,
    Function,
    Any,
}

/// How a value of one type may flow into a port of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Exact,
    /// Accepted, but the runtime converts the value on the way in.
    Coercible,
    Incompatible,
    /// Control flow wired to data (or the reverse). Never accepted.
    StepMismatch,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Step => "STEP",
            DataType::String => "STRING",
            DataType::Number => "NUMBER",
            DataType::Boolean => "BOOLEAN",
            DataType::Object => "OBJECT",
            DataType::Array => "ARRAY",
            DataType::Function => "FUNCTION",
            DataType::Any => "ANY",
        }
    }

    pub fn is_step(self) -> bool {
        self == DataType::Step
    }

    /// Checks whether a value produced as `self` can be delivered to a port of type `target`.
    pub fn compatibility(self, target: DataType) -> Compatibility {
        if self.is_step() != target.is_step() {
            return Compatibility::StepMismatch;
        }
        if self == target || self == DataType::Any || target == DataType::Any {
            return Compatibility::Exact;
        }
        match (self, target) {
            (DataType::Number | DataType::Boolean, DataType::String)
            | (DataType::Object | DataType::Array, DataType::String)
            | (DataType::String | DataType::Boolean, DataType::Number)
            | (DataType::String | DataType::Number, DataType::Boolean) => Compatibility::Coercible,
            _ => Compatibility::Incompatible,
        }
    }

    /// Infers the port type a JSON value would naturally occupy.
    pub fn of_value(value: &Value) -> DataType {
        match value {
            Value::Null => DataType::Any,
            Value::Bool(_) => DataType::Boolean,
            Value::Number(_) => DataType::Number,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array,
            Value::Object(_) => DataType::Object,
        }
    }

    /// Converts a value into this type along the coercible pairs. Values that cannot be
    /// converted pass through unchanged.
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (DataType::String, Value::Number(n)) => Value::String(n.to_string()),
            (DataType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (DataType::String, v @ (Value::Object(_) | Value::Array(_))) => {
                Value::String(v.to_string())
            }
            (DataType::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(s),
            },
            (DataType::Number, Value::Bool(b)) => Value::from(if b { 1 } else { 0 }),
            (DataType::Boolean, Value::Number(n)) => {
                Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))
            }
            (DataType::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" | "" => Value::Bool(false),
                _ => Value::Bool(true),
            },
            (_, v) => v,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STEP" => Ok(DataType::Step),
            "STRING" => Ok(DataType::String),
            "NUMBER" => Ok(DataType::Number),
            "BOOLEAN" | "BOOL" => Ok(DataType::Boolean),
            "OBJECT" => Ok(DataType::Object),
            "ARRAY" => Ok(DataType::Array),
            "FUNCTION" => Ok(DataType::Function),
            "ANY" => Ok(DataType::Any),
            _ => Err(UnknownDataType(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// A named, typed connection point on a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub name: String,
    pub data_type: DataType,
    pub direction: Direction,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Set when the port carries traffic into or out of a named inner scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Accepts more than one inbound connection; values arrive as an array.
    #[serde(default)]
    pub multi: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Port {
    fn new(name: &str, data_type: DataType, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            direction,
            optional: false,
            default: None,
            scope: None,
            multi: false,
            label: None,
            description: None,
        }
    }

    pub fn input(name: &str, data_type: DataType) -> Self {
        Self::new(name, data_type, Direction::Input)
    }

    pub fn output(name: &str, data_type: DataType) -> Self {
        Self::new(name, data_type, Direction::Output)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets a default value; a port with a default is always optional.
    pub fn with_default(mut self, value: Value) -> Self {
        self.optional = true;
        self.default = Some(value);
        self
    }

    pub fn scoped(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn is_control_flow(&self) -> bool {
        self.data_type.is_step()
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }
}
