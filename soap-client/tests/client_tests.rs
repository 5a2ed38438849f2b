//! HTTP-level tests for the SOAP client against a mock device

use std::time::Duration;

use mockito::{Matcher, Server};
use soap_client::{envelope, SoapClient, SoapError, UpnpError};

const SWITCH_POWER: &str = "urn:schemas-upnp-org:service:SwitchPower:1";

fn client() -> SoapClient {
    SoapClient::with_timeout(Duration::from_secs(5))
}

#[test]
fn test_call_returns_output_arguments() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/service/control/SwitchPower")
        .match_header(
            "soapaction",
            "\"urn:schemas-upnp-org:service:SwitchPower:1#GetTarget\"",
        )
        .match_body(Matcher::Regex("<u:GetTarget ".to_string()))
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body(envelope::build_response(
            SWITCH_POWER,
            "GetTarget",
            &[("RetTargetValue", "1")],
        ))
        .create();

    let url = format!("{}/service/control/SwitchPower", server.url());
    let outputs = client()
        .call(&url, SWITCH_POWER, "GetTarget", &[], Duration::from_secs(5))
        .unwrap();

    assert_eq!(outputs, vec![("RetTargetValue".to_string(), "1".to_string())]);
    mock.assert();
}

#[test]
fn test_call_sends_input_arguments() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/control")
        .match_body(Matcher::Regex("<newTargetValue>1</newTargetValue>".to_string()))
        .with_status(200)
        .with_body(envelope::build_response(SWITCH_POWER, "SetTarget", &[]))
        .create();

    let url = format!("{}/control", server.url());
    let outputs = client()
        .call(
            &url,
            SWITCH_POWER,
            "SetTarget",
            &[("newTargetValue", "1")],
            Duration::from_secs(5),
        )
        .unwrap();

    assert!(outputs.is_empty());
    mock.assert();
}

#[test]
fn test_fault_on_500_is_surfaced_verbatim() {
    let mut server = Server::new();
    server
        .mock("POST", "/control")
        .with_status(500)
        .with_body(envelope::build_fault(&UpnpError::new(718, "Conflict In Mapping Entry")))
        .create();

    let url = format!("{}/control", server.url());
    match client().call(&url, SWITCH_POWER, "AddPortMapping", &[], Duration::from_secs(5)) {
        Err(SoapError::Fault(error)) => {
            assert_eq!(error.code, 718);
            assert_eq!(error.description, "Conflict In Mapping Entry");
        }
        other => panic!("expected fault, got {:?}", other),
    }
}

#[test]
fn test_error_status_without_fault() {
    let mut server = Server::new();
    server
        .mock("POST", "/control")
        .with_status(404)
        .with_body("not here")
        .create();

    let url = format!("{}/control", server.url());
    let result = client().call(&url, SWITCH_POWER, "GetStatus", &[], Duration::from_secs(5));
    assert!(matches!(result, Err(SoapError::Status(404))));
}

#[test]
fn test_subscribe_reads_sid_and_timeout() {
    let mut server = Server::new();
    let mock = server
        .mock("SUBSCRIBE", "/service/event/SwitchPower")
        .match_header("callback", "<http://192.168.1.5:3400/notify>")
        .match_header("nt", "upnp:event")
        .match_header("timeout", "Second-1800")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-300")
        .create();

    let url = format!("{}/service/event/SwitchPower", server.url());
    let response = client()
        .subscribe(&url, "http://192.168.1.5:3400/notify", 1800)
        .unwrap();

    assert_eq!(response.sid, "uuid:sub-1");
    assert_eq!(response.timeout_seconds, 300);
    mock.assert();
}

#[test]
fn test_subscribe_without_sid_is_parse_error() {
    let mut server = Server::new();
    server.mock("SUBSCRIBE", "/event").with_status(200).create();

    let url = format!("{}/event", server.url());
    let result = client().subscribe(&url, "http://127.0.0.1:1/cb", 60);
    assert!(matches!(result, Err(SoapError::Parse(_))));
}

#[test]
fn test_renew_falls_back_to_requested_timeout() {
    let mut server = Server::new();
    let mock = server
        .mock("SUBSCRIBE", "/event")
        .match_header("sid", "uuid:sub-1")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .create();

    let url = format!("{}/event", server.url());
    let granted = client().renew_subscription(&url, "uuid:sub-1", 600).unwrap();
    assert_eq!(granted, 600);
    mock.assert();
}

#[test]
fn test_unsubscribe_unknown_sid_reports_status() {
    let mut server = Server::new();
    server
        .mock("UNSUBSCRIBE", "/event")
        .match_header("sid", "uuid:gone")
        .with_status(412)
        .create();

    let url = format!("{}/event", server.url());
    let result = client().unsubscribe(&url, "uuid:gone");
    assert!(matches!(result, Err(SoapError::Status(412))));
}

#[test]
fn test_notify_sends_gena_headers() {
    let mut server = Server::new();
    let mock = server
        .mock("NOTIFY", "/callback")
        .match_header("nt", "upnp:event")
        .match_header("nts", "upnp:propchange")
        .match_header("sid", "uuid:sub-1")
        .match_header("seq", "0")
        .match_body(Matcher::Regex("<Status>1</Status>".to_string()))
        .with_status(200)
        .create();

    let url = format!("{}/callback", server.url());
    let body = envelope::build_property_set(&[("Status", "1")]);
    client().notify(&url, "uuid:sub-1", 0, &body).unwrap();
    mock.assert();
}
