use std::fmt;
use std::str::FromStr;

use crate::error::{ApiError, Result};
use crate::ServiceKey;

/// Identity of an action: its name within a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub service: ServiceKey,
    pub action: String,
}

/// Direction of an action argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            d if d.eq_ignore_ascii_case("in") => Ok(Direction::In),
            d if d.eq_ignore_ascii_case("out") => Ok(Direction::Out),
            other => Err(ApiError::Description(format!(
                "unknown argument direction '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named input or output of an action.
///
/// Values travel on the wire as strings; the typed accessors convert on demand
/// using UPnP's representations (`1`/`0` for booleans).
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    name: String,
    direction: Direction,
    related_state_variable: String,
    value: String,
    parent_action: ActionKey,
}

impl Argument {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        related_state_variable: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            related_state_variable: related_state_variable.into(),
            value: String::new(),
            parent_action: ActionKey::default(),
        }
    }

    pub fn input(name: impl Into<String>, related_state_variable: impl Into<String>) -> Self {
        Self::new(name, Direction::In, related_state_variable)
    }

    pub fn output(name: impl Into<String>, related_state_variable: impl Into<String>) -> Self {
        Self::new(name, Direction::Out, related_state_variable)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Out
    }

    pub fn related_state_variable(&self) -> &str {
        &self.related_state_variable
    }

    /// The action this argument belongs to.
    pub fn parent_action(&self) -> &ActionKey {
        &self.parent_action
    }

    pub(crate) fn set_parent(&mut self, parent: ActionKey) {
        self.parent_action = parent;
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn string(&self) -> &str {
        &self.value
    }

    pub fn set_string(&mut self, value: &str) {
        self.value = value.to_string();
    }

    pub fn int(&self) -> Result<i64> {
        self.value.trim().parse().map_err(|_| self.invalid("integer"))
    }

    pub fn set_int(&mut self, value: i64) {
        self.value = value.to_string();
    }

    pub fn float(&self) -> Result<f64> {
        self.value.trim().parse().map_err(|_| self.invalid("number"))
    }

    pub fn set_float(&mut self, value: f64) {
        self.value = value.to_string();
    }

    pub fn bool(&self) -> Result<bool> {
        match self.value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(self.invalid("boolean")),
        }
    }

    pub fn set_bool(&mut self, value: bool) {
        self.value = if value { "1" } else { "0" }.to_string();
    }

    fn invalid(&self, expected: &str) -> ApiError {
        ApiError::InvalidArgumentValue(format!(
            "{} = '{}' is not a valid {}",
            self.name, self.value, expected
        ))
    }
}
