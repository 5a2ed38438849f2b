//! Control point behavior over in-memory SSDP sockets

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use device_host::{DeviceHost, HostConfig};
use ssdp::memory::MemorySocket;
use ssdp::{SsdpMessage, ROOT_DEVICE};
use upnp_api::{Action, ActionListener, Argument, Service, StateVariable};
use upnp_sdk::{
    ApiError, ControlPoint, ControlPointConfig, DescriptionFetcher, Device, HttpFetcher, SdkError,
    UpnpError,
};

const LIGHT: &str = "urn:schemas-upnp-org:device:BinaryLight:1";
const SWITCH_POWER: &str = "urn:schemas-upnp-org:service:SwitchPower:1";
const SWITCH_POWER_ID: &str = "urn:upnp-org:serviceId:SwitchPower.1";

/// Serves documents from memory and records every request.
#[derive(Default)]
struct FakeFetcher {
    documents: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn serve(&self, url: &str, body: String) {
        self.documents.lock().unwrap().insert(url.to_string(), body);
    }

    fn requests_for(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| *r == url).count()
    }
}

impl DescriptionFetcher for FakeFetcher {
    fn fetch_document(&self, url: &str) -> upnp_sdk::Result<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SdkError::Fetch(format!("{}: HTTP 404", url)))
    }
}

struct Harness {
    control_point: ControlPoint,
    multicast: Arc<MemorySocket>,
    unicast: Arc<MemorySocket>,
    fetcher: Arc<FakeFetcher>,
}

fn harness(config: ControlPointConfig) -> Harness {
    let multicast = Arc::new(MemorySocket::new("0.0.0.0:1900".parse().unwrap()));
    let unicast = Arc::new(MemorySocket::new("0.0.0.0:50000".parse().unwrap()));
    let fetcher = Arc::new(FakeFetcher::default());
    let control_point = ControlPoint::with_parts(
        config,
        multicast.clone(),
        unicast.clone(),
        fetcher.clone(),
    );
    control_point.start().unwrap();
    Harness {
        control_point,
        multicast,
        unicast,
        fetcher,
    }
}

fn power_service() -> Service {
    Service::new(SWITCH_POWER, SWITCH_POWER_ID)
        .with_urls("/upnp/scpd/power.xml", "/upnp/control/power", "/upnp/event/power")
        .with_action(
            Action::new("SetTarget")
                .with_argument(Argument::input("newTargetValue", "Target"))
                .unwrap(),
        )
        .unwrap()
        .with_action(
            Action::new("GetTarget")
                .with_argument(Argument::output("RetTargetValue", "Target"))
                .unwrap(),
        )
        .unwrap()
        .with_state_variable(StateVariable::new("Target", "boolean"))
        .unwrap()
        .with_state_variable(StateVariable::evented("Status", "boolean", "0"))
        .unwrap()
}

fn light(udn: &str, name: &str) -> Device {
    Device::new(udn, LIGHT, name).with_service(power_service()).unwrap()
}

fn location(host: &str) -> String {
    format!("http://{}:49152/description.xml", host)
}

fn source(host: &str) -> SocketAddr {
    format!("{}:1900", host).parse().unwrap()
}

/// Publish a light's description and SCPD at `host`.
fn publish(fetcher: &FakeFetcher, udn: &str, name: &str, host: &str) {
    let device = light(udn, name);
    fetcher.serve(&location(host), device.to_description_xml());
    fetcher.serve(
        &format!("http://{}:49152/upnp/scpd/power.xml", host),
        power_service().to_scpd_xml(),
    );
}

fn search_response(udn: &str, host: &str) -> SsdpMessage {
    SsdpMessage::search_response(
        ROOT_DEVICE,
        &format!("{}::{}", udn, ROOT_DEVICE),
        &location(host),
        1800,
        "Linux/5.0 UPnP/1.1 test/1.0",
    )
}

fn alive(udn: &str, host: &str) -> SsdpMessage {
    SsdpMessage::notify_alive(
        ROOT_DEVICE,
        &format!("{}::{}", udn, ROOT_DEVICE),
        &location(host),
        1800,
        "Linux/5.0 UPnP/1.1 test/1.0",
    )
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_search_sends_msearch_on_unicast_socket() {
    let h = harness(ControlPointConfig::fast());

    h.control_point.search_root_device().unwrap();

    let sent = h.unicast.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, ssdp::multicast_socket_addr());
    let request = SsdpMessage::parse(&sent[0].0).unwrap();
    assert!(request.is_search());
    assert_eq!(request.st(), Some(ROOT_DEVICE));
    assert_eq!(request.mx(), Some(1));
    assert!(h.multicast.sent().is_empty());
}

#[test]
fn test_search_response_registers_device() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");

    h.unicast
        .inject_message(&search_response("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));

    assert!(wait_until(|| h.control_point.registry().contains("uuid:lamp-1")));
    let device = h.control_point.device_by_udn("uuid:lamp-1").unwrap();
    assert_eq!(device.friendly_name, "Kitchen");
    assert_eq!(device.location(), Some(location("10.0.0.5").as_str()));
    assert_eq!(device.source(), Some(source("10.0.0.5")));
    assert!(device.last_seen().is_some());
    // Service descriptions stay unloaded until first use.
    assert!(!device.service_by_type(SWITCH_POWER).unwrap().is_loaded());
}

#[test]
fn test_byebye_removes_device() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");

    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    assert!(wait_until(|| h.control_point.registry().len() == 1));

    let byebye = SsdpMessage::notify_byebye(ROOT_DEVICE, "uuid:lamp-1::upnp:rootdevice");
    h.multicast.inject_message(&byebye, source("10.0.0.5"));

    assert!(wait_until(|| h.control_point.registry().is_empty()));
    assert!(matches!(
        h.control_point.device_by_udn("uuid:lamp-1"),
        Err(SdkError::DeviceNotFound(_))
    ));
}

#[test]
fn test_concurrent_responses_register_every_device() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");
    publish(&h.fetcher, "uuid:lamp-2", "Hallway", "10.0.0.6");

    // One response on each socket so both receive loops run at once.
    h.unicast
        .inject_message(&search_response("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    h.multicast
        .inject_message(&alive("uuid:lamp-2", "10.0.0.6"), source("10.0.0.6"));

    assert!(wait_until(|| h.control_point.registry().len() == 2));
    let names: Vec<String> = h
        .control_point
        .root_devices()
        .into_iter()
        .map(|d| d.friendly_name)
        .collect();
    assert_eq!(names, vec!["Kitchen", "Hallway"]);
    assert_eq!(h.control_point.root_devices_by_type(LIGHT).len(), 2);
}

#[test]
fn test_unreachable_description_is_skipped() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-2", "Hallway", "10.0.0.6");

    // Nothing is served for 10.0.0.5.
    h.unicast
        .inject_message(&search_response("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    h.unicast
        .inject_message(&search_response("uuid:lamp-2", "10.0.0.6"), source("10.0.0.6"));

    assert!(wait_until(|| h.control_point.registry().contains("uuid:lamp-2")));
    assert!(!h.control_point.registry().contains("uuid:lamp-1"));
    assert_eq!(h.fetcher.requests_for(&location("10.0.0.5")), 1);
    assert!(h.control_point.is_running());
}

#[test]
fn test_repeated_announcements_fetch_once() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");

    for _ in 0..3 {
        h.multicast
            .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    }
    h.unicast
        .inject_message(&search_response("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));

    assert!(wait_until(|| h.control_point.registry().len() == 1));
    // Let the remaining announcements drain.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.fetcher.requests_for(&location("10.0.0.5")), 1);
    assert_eq!(h.control_point.registry().len(), 1);
}

#[test]
fn test_new_location_refetches_description() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen (moved)", "10.0.0.9");

    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    assert!(wait_until(|| h.control_point.registry().len() == 1));

    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.9"), source("10.0.0.9"));
    assert!(wait_until(|| {
        h.control_point
            .device_by_udn("uuid:lamp-1")
            .map(|d| d.friendly_name == "Kitchen (moved)")
            .unwrap_or(false)
    }));
    assert_eq!(h.control_point.registry().len(), 1);
}

#[test]
fn test_service_descriptions_loaded_eagerly_when_configured() {
    let h = harness(ControlPointConfig::fast().with_service_descriptions(true));
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");

    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    assert!(wait_until(|| h.control_point.registry().len() == 1));

    let device = h.control_point.device_by_udn("uuid:lamp-1").unwrap();
    let service = device.service_by_type(SWITCH_POWER).unwrap();
    assert!(service.is_loaded());
    assert!(service.action_by_name("SetTarget").is_some());
}

#[test]
fn test_load_service_is_lazy_and_idempotent() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");
    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    assert!(wait_until(|| h.control_point.registry().len() == 1));

    let scpd_url = "http://10.0.0.5:49152/upnp/scpd/power.xml";
    assert_eq!(h.fetcher.requests_for(scpd_url), 0);

    h.control_point.load_service("uuid:lamp-1", SWITCH_POWER).unwrap();
    h.control_point.load_service("uuid:lamp-1", SWITCH_POWER).unwrap();

    assert_eq!(h.fetcher.requests_for(scpd_url), 1);
    let device = h.control_point.device_by_udn("uuid:lamp-1").unwrap();
    assert!(device.service_by_type(SWITCH_POWER).unwrap().is_loaded());
}

#[test]
fn test_lookup_errors() {
    let h = harness(ControlPointConfig::fast());
    publish(&h.fetcher, "uuid:lamp-1", "Kitchen", "10.0.0.5");
    h.multicast
        .inject_message(&alive("uuid:lamp-1", "10.0.0.5"), source("10.0.0.5"));
    assert!(wait_until(|| h.control_point.registry().len() == 1));

    let no_inputs = HashMap::new();
    assert!(matches!(
        h.control_point.invoke("uuid:nobody", SWITCH_POWER, "GetTarget", &no_inputs),
        Err(SdkError::DeviceNotFound(_))
    ));
    assert!(matches!(
        h.control_point.invoke(
            "uuid:lamp-1",
            "urn:schemas-upnp-org:service:Dimming:1",
            "GetTarget",
            &no_inputs
        ),
        Err(SdkError::Api(ApiError::ServiceNotFound(_)))
    ));
    assert!(matches!(
        h.control_point.invoke("uuid:lamp-1", SWITCH_POWER, "Explode", &no_inputs),
        Err(SdkError::Api(ApiError::ActionNotFound(_)))
    ));
    // Missing input is caught before any request is sent.
    assert!(matches!(
        h.control_point.invoke("uuid:lamp-1", SWITCH_POWER, "SetTarget", &no_inputs),
        Err(SdkError::Api(ApiError::MissingArgument(_)))
    ));
}

#[test]
fn test_start_twice_fails_and_stop_is_idempotent() {
    let h = harness(ControlPointConfig::fast());
    assert!(h.control_point.is_running());
    assert!(matches!(
        h.control_point.start(),
        Err(SdkError::Ssdp(ssdp::SsdpError::BindFailure(_)))
    ));

    h.control_point.stop().unwrap();
    h.control_point.stop().unwrap();
    assert!(!h.control_point.is_running());
    assert!(!h.multicast.is_bound());
    assert!(!h.unicast.is_bound());
}

#[derive(Default)]
struct Light {
    target: Mutex<String>,
}

impl ActionListener for Light {
    fn on_action_request(&self, action: &mut Action) -> Result<(), UpnpError> {
        match action.name() {
            "SetTarget" => {
                let value = action
                    .argument_value("newTargetValue")
                    .map_err(|_| UpnpError::invalid_args())?
                    .to_string();
                *self.target.lock().unwrap() = value;
                Ok(())
            }
            "GetTarget" => {
                let target = self.target.lock().unwrap().clone();
                action
                    .set_argument_value("RetTargetValue", target)
                    .map_err(|_| UpnpError::action_failed())
            }
            _ => Err(UpnpError::optional_action_not_implemented()),
        }
    }
}

#[test]
fn test_invoke_and_subscribe_against_hosted_device() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let host = runtime
        .block_on(DeviceHost::start(
            light("uuid:lamp-1", "Kitchen"),
            Some(Arc::new(Light::default()) as Arc<dyn ActionListener>),
            HostConfig::loopback(),
        ))
        .unwrap();

    let multicast = Arc::new(MemorySocket::new("0.0.0.0:1900".parse().unwrap()));
    let unicast = Arc::new(MemorySocket::new("0.0.0.0:50000".parse().unwrap()));
    let control_point = ControlPoint::with_parts(
        ControlPointConfig::fast(),
        multicast.clone(),
        unicast,
        Arc::new(HttpFetcher::new(Duration::from_secs(2)).unwrap()),
    );
    control_point.start().unwrap();

    let announcement = SsdpMessage::notify_alive(
        ROOT_DEVICE,
        "uuid:lamp-1::upnp:rootdevice",
        &host.location(),
        1800,
        "Linux/5.0 UPnP/1.1 test/1.0",
    );
    multicast.inject_message(&announcement, host.local_addr());
    assert!(wait_until(|| control_point.registry().contains("uuid:lamp-1")));

    let inputs = HashMap::from([("newTargetValue".to_string(), "1".to_string())]);
    let outputs = control_point
        .invoke("uuid:lamp-1", SWITCH_POWER, "SetTarget", &inputs)
        .unwrap();
    assert!(outputs.is_empty());

    let outputs = control_point
        .invoke("uuid:lamp-1", SWITCH_POWER, "GetTarget", &HashMap::new())
        .unwrap();
    assert_eq!(outputs.get("RetTargetValue").map(String::as_str), Some("1"));

    // Nothing listens on the callback; the subscription itself still succeeds.
    let subscription = control_point
        .subscribe("uuid:lamp-1", SWITCH_POWER, "http://127.0.0.1:9/events", 300)
        .unwrap();
    assert!(subscription.sid.starts_with("uuid:"));
    assert_eq!(subscription.timeout_seconds, 300);
    assert_eq!(
        control_point
            .renew("uuid:lamp-1", SWITCH_POWER, &subscription.sid, 600)
            .unwrap(),
        600
    );
    control_point
        .unsubscribe("uuid:lamp-1", SWITCH_POWER, &subscription.sid)
        .unwrap();
    assert!(control_point
        .unsubscribe("uuid:lamp-1", SWITCH_POWER, &subscription.sid)
        .is_err());

    control_point.stop().unwrap();
    drop(control_point);
    runtime.block_on(host.shutdown()).unwrap();
}
