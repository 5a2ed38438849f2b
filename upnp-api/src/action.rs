use std::collections::HashMap;

use crate::argument::{ActionKey, Argument, Direction};
use crate::error::{ApiError, Result};
use crate::ServiceKey;

/// A remotely invocable operation of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    name: String,
    parent_service: ServiceKey,
    arguments: Vec<Argument>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_service: ServiceKey::default(),
            arguments: Vec::new(),
        }
    }

    /// Builder-style [`Action::add_argument`] for hand-built services.
    ///
    /// # Errors
    ///
    /// Fails when an argument with the same name is already present.
    pub fn with_argument(mut self, argument: Argument) -> Result<Self> {
        self.add_argument(argument)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service this action belongs to.
    pub fn parent_service(&self) -> &ServiceKey {
        &self.parent_service
    }

    pub fn key(&self) -> ActionKey {
        ActionKey {
            service: self.parent_service.clone(),
            action: self.name.clone(),
        }
    }

    pub(crate) fn set_parent(&mut self, parent: ServiceKey) {
        self.parent_service = parent;
        let key = self.key();
        for argument in &mut self.arguments {
            argument.set_parent(key.clone());
        }
    }

    /// Append an argument, keeping declaration order.
    pub fn add_argument(&mut self, mut argument: Argument) -> Result<()> {
        if self.argument_by_name(argument.name()).is_some() {
            return Err(ApiError::Description(format!(
                "duplicate argument '{}' in action '{}'",
                argument.name(),
                self.name
            )));
        }
        argument.set_parent(self.key());
        self.arguments.push(argument);
        Ok(())
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut [Argument] {
        &mut self.arguments
    }

    pub fn argument_by_name(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name() == name)
    }

    pub fn argument_by_name_mut(&mut self, name: &str) -> Option<&mut Argument> {
        self.arguments.iter_mut().find(|a| a.name() == name)
    }

    pub fn input_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.direction() == Direction::In)
    }

    pub fn output_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.direction() == Direction::Out)
    }

    pub fn argument_value(&self, name: &str) -> Result<&str> {
        self.argument_by_name(name)
            .map(Argument::value)
            .ok_or_else(|| ApiError::ArgumentNotFound(format!("{}.{}", self.name, name)))
    }

    pub fn set_argument_value(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let action = self.name.clone();
        let argument = self
            .argument_by_name_mut(name)
            .ok_or_else(|| ApiError::ArgumentNotFound(format!("{}.{}", action, name)))?;
        argument.set_value(value);
        Ok(())
    }

    /// Current values of the `out` arguments, keyed by name.
    pub fn output_values(&self) -> HashMap<String, String> {
        self.output_arguments()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect()
    }

    /// `(name, value)` pairs for the given direction, in declaration order.
    pub fn values(&self, direction: Direction) -> Vec<(&str, &str)> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == direction)
            .map(|a| (a.name(), a.value()))
            .collect()
    }
}
