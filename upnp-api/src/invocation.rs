//! Action invocation
//!
//! Caller side: [`ActionInvoker`] validates inputs against the action's
//! declaration, sends the call through a [`ControlTransport`] and writes the
//! results back onto the action's `out` arguments.
//!
//! Device side: [`handle_request`] matches an inbound request to an action,
//! fills in its inputs and hands it to an [`ActionListener`].

use std::collections::HashMap;
use std::time::Duration;

use soap_client::{envelope, SoapClient, SoapError, SoapRequest, UpnpError};
use tracing::{debug, warn};

use crate::action::Action;
use crate::argument::Direction;
use crate::error::{ApiError, Result};
use crate::service::Service;

/// Default bound on one invocation.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response channel to a service's control URL.
pub trait ControlTransport: Send + Sync {
    fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(&str, &str)],
        timeout: Duration,
    ) -> std::result::Result<Vec<(String, String)>, SoapError>;
}

impl ControlTransport for SoapClient {
    fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(&str, &str)],
        timeout: Duration,
    ) -> std::result::Result<Vec<(String, String)>, SoapError> {
        SoapClient::call(self, control_url, service_type, action, arguments, timeout)
    }
}

/// Caller side of the invocation protocol.
#[derive(Debug, Clone)]
pub struct ActionInvoker<T = SoapClient> {
    transport: T,
    timeout: Duration,
}

impl ActionInvoker<SoapClient> {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(SoapClient::with_timeout(timeout), timeout)
    }
}

impl Default for ActionInvoker<SoapClient> {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_INVOCATION_TIMEOUT)
    }
}

impl<T: ControlTransport> ActionInvoker<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Invoke `action` at `control_url` with `inputs` keyed by argument name.
    ///
    /// On success every `out` argument of `action` holds the returned value.
    ///
    /// # Errors
    ///
    /// - `ApiError::MissingArgument` if a declared `in` argument has no value;
    ///   the transport is not contacted
    /// - `ApiError::InvocationTimeout` if the device does not answer in time
    /// - `ApiError::Upnp` with the device's code when it answers with a fault
    /// - `ApiError::MissingResult` if a declared `out` argument is absent
    pub fn invoke(
        &self,
        control_url: &str,
        action: &mut Action,
        inputs: &HashMap<String, String>,
    ) -> Result<()> {
        for argument in action.arguments_mut().iter_mut().filter(|a| a.is_input()) {
            let value = inputs
                .get(argument.name())
                .ok_or_else(|| ApiError::MissingArgument(argument.name().to_string()))?;
            argument.set_value(value.clone());
        }

        let service_type = action.parent_service().service_type.clone();
        let outputs = {
            let arguments = action.values(Direction::In);
            self.transport.call(
                control_url,
                &service_type,
                action.name(),
                &arguments,
                self.timeout,
            )?
        };

        let action_name = action.name().to_string();
        for argument in action.arguments_mut().iter_mut().filter(|a| a.is_output()) {
            let value = outputs
                .iter()
                .find(|(name, _)| name == argument.name())
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    ApiError::MissingResult(format!("{}.{}", action_name, argument.name()))
                })?;
            argument.set_value(value.clone());
        }

        debug!("{} on {} succeeded", action_name, control_url);
        Ok(())
    }
}

/// Device logic invoked for inbound action requests.
///
/// The action arrives with its `in` arguments set; on success the listener
/// leaves the results in the `out` arguments.
pub trait ActionListener: Send + Sync {
    fn on_action_request(&self, action: &mut Action) -> std::result::Result<(), UpnpError>;
}

/// Outcome of dispatching one inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionReply {
    Success(Action),
    Fault(UpnpError),
}

impl ActionReply {
    /// HTTP status for the reply: 200 on success, 500 for faults.
    pub fn status(&self) -> u16 {
        match self {
            ActionReply::Success(_) => 200,
            ActionReply::Fault(_) => 500,
        }
    }

    /// Response envelope for the reply.
    pub fn to_xml(&self, service_type: &str) -> String {
        match self {
            ActionReply::Success(action) => {
                envelope::build_response(service_type, action.name(), &action.values(Direction::Out))
            }
            ActionReply::Fault(error) => envelope::build_fault(error),
        }
    }
}

/// Resolve an inbound request to a fresh copy of the addressed action with
/// its inputs filled in.
///
/// # Errors
///
/// Fault 401 when the service has no such action, 402 when an `in`
/// argument is missing from the request.
pub fn prepare_action(service: &Service, request: &SoapRequest) -> std::result::Result<Action, UpnpError> {
    let mut action = service
        .action_by_name(&request.action)
        .cloned()
        .ok_or_else(UpnpError::invalid_action)?;

    for argument in action.arguments_mut().iter_mut() {
        if argument.is_input() {
            let value = request
                .argument(argument.name())
                .ok_or_else(UpnpError::invalid_args)?;
            argument.set_value(value);
        } else {
            argument.set_value("");
        }
    }
    Ok(action)
}

/// Run the listener on a prepared action.
///
/// Without a listener every action is answered with fault 602.
pub fn dispatch(mut action: Action, listener: Option<&dyn ActionListener>) -> ActionReply {
    let Some(listener) = listener else {
        return ActionReply::Fault(UpnpError::optional_action_not_implemented());
    };

    match listener.on_action_request(&mut action) {
        Ok(()) => ActionReply::Success(action),
        Err(error) => {
            debug!("{} failed: {}", action.name(), error);
            ActionReply::Fault(error)
        }
    }
}

/// Device-side handling of one inbound request.
pub fn handle_request(
    service: &Service,
    request: &SoapRequest,
    listener: Option<&dyn ActionListener>,
) -> ActionReply {
    match prepare_action(service, request) {
        Ok(action) => dispatch(action, listener),
        Err(error) => {
            warn!(
                "Rejected {} on {}: {}",
                request.action,
                service.service_id(),
                error
            );
            ActionReply::Fault(error)
        }
    }
}
