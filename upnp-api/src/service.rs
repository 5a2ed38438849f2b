use tracing::trace;

use crate::action::Action;
use crate::description;
use crate::error::{ApiError, Result};
use crate::eventing::{EventBatch, SubscriptionRegistry};

/// Identity of a service: its type and id on one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub device_udn: String,
    pub service_type: String,
    pub service_id: String,
}

/// A variable in a service's state table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub send_events: bool,
    pub value: String,
}

impl StateVariable {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            default_value: None,
            allowed_values: Vec::new(),
            send_events: false,
            value: String::new(),
        }
    }

    /// Evented variable with an initial value.
    pub fn evented(name: impl Into<String>, data_type: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            default_value: Some(value.clone()),
            send_events: true,
            value,
            ..Self::new(name, data_type)
        }
    }
}

/// A service of a device, with its endpoints, actions and state.
///
/// URLs are kept as written in the description and resolved against the
/// owning device with [`crate::Device::absolute_url`].
#[derive(Debug, Clone)]
pub struct Service {
    service_type: String,
    service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
    parent_device: String,
    actions: Vec<Action>,
    state_variables: Vec<StateVariable>,
    loaded: bool,
    subscriptions: SubscriptionRegistry,
}

impl Service {
    pub fn new(service_type: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: service_id.into(),
            scpd_url: String::new(),
            control_url: String::new(),
            event_sub_url: String::new(),
            parent_device: String::new(),
            actions: Vec::new(),
            state_variables: Vec::new(),
            loaded: false,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    pub fn with_urls(
        mut self,
        scpd_url: impl Into<String>,
        control_url: impl Into<String>,
        event_sub_url: impl Into<String>,
    ) -> Self {
        self.scpd_url = scpd_url.into();
        self.control_url = control_url.into();
        self.event_sub_url = event_sub_url.into();
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// UDN of the device this service belongs to.
    pub fn parent_device(&self) -> &str {
        &self.parent_device
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            device_udn: self.parent_device.clone(),
            service_type: self.service_type.clone(),
            service_id: self.service_id.clone(),
        }
    }

    pub(crate) fn set_parent(&mut self, device_udn: &str) {
        self.parent_device = device_udn.to_string();
        let key = self.key();
        for action in &mut self.actions {
            action.set_parent(key.clone());
        }
    }

    /// Whether the action list and state table are known.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn add_action(&mut self, mut action: Action) -> Result<()> {
        if self.action_by_name(action.name()).is_some() {
            return Err(ApiError::Description(format!(
                "duplicate action '{}' in service '{}'",
                action.name(),
                self.service_id
            )));
        }
        action.set_parent(self.key());
        self.actions.push(action);
        self.loaded = true;
        Ok(())
    }

    pub fn with_action(mut self, action: Action) -> Result<Self> {
        self.add_action(action)?;
        Ok(self)
    }

    pub fn add_state_variable(&mut self, variable: StateVariable) -> Result<()> {
        if self.state_variable(&variable.name).is_some() {
            return Err(ApiError::Description(format!(
                "duplicate state variable '{}' in service '{}'",
                variable.name, self.service_id
            )));
        }
        self.state_variables.push(variable);
        self.loaded = true;
        Ok(())
    }

    pub fn with_state_variable(mut self, variable: StateVariable) -> Result<Self> {
        self.add_state_variable(variable)?;
        Ok(self)
    }

    /// Replace actions and state table with those of an SCPD document.
    pub fn load_scpd(&mut self, xml: &str) -> Result<()> {
        let (actions, variables) = description::parse_scpd(xml)?;

        let mut loaded = Service::new(self.service_type.clone(), self.service_id.clone());
        loaded.set_parent(&self.parent_device);
        for action in actions {
            loaded.add_action(action)?;
        }
        for variable in variables {
            loaded.add_state_variable(variable)?;
        }

        self.actions = loaded.actions;
        self.state_variables = loaded.state_variables;
        self.loaded = true;
        trace!(
            "Loaded SCPD for {}: {} action(s), {} state variable(s)",
            self.service_id,
            self.actions.len(),
            self.state_variables.len()
        );
        Ok(())
    }

    pub fn to_scpd_xml(&self) -> String {
        description::write_scpd(self)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut [Action] {
        &mut self.actions
    }

    pub fn action_by_name(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name() == name)
    }

    pub fn action_by_name_mut(&mut self, name: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.name() == name)
    }

    /// Like [`Service::action_by_name`] but failing with `ActionNotFound`.
    pub fn action(&self, name: &str) -> Result<&Action> {
        self.action_by_name(name).ok_or_else(|| {
            ApiError::ActionNotFound(format!("{} on {}", name, self.service_type))
        })
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn subscriptions_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut self.subscriptions
    }

    /// Set a state variable, returning the events to deliver when it is evented
    /// and has subscribers.
    pub fn update_state_variable(&mut self, name: &str, value: impl Into<String>) -> Result<Option<EventBatch>> {
        let variable = self
            .state_variables
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| ApiError::StateVariableNotFound(name.to_string()))?;

        variable.value = value.into();
        if !variable.send_events {
            return Ok(None);
        }

        let change = [(variable.name.as_str(), variable.value.as_str())];
        let batch = self.subscriptions.next_notifications(&change);
        Ok((!batch.is_empty()).then_some(batch))
    }

    /// Initial event carrying every evented variable, for a new subscriber.
    pub fn initial_event(&mut self, sid: &str) -> Option<EventBatch> {
        let variables: Vec<(&str, &str)> = self
            .state_variables
            .iter()
            .filter(|v| v.send_events)
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        self.subscriptions.initial_notification(sid, &variables)
    }
}
