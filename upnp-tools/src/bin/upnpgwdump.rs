//! Print the internet gateways on the local network and their external address.

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use upnp_sdk::ControlPointConfig;
use upnp_tools::{discover, external_ip_address, gateway_line, Verbosity, INTERNET_GATEWAY_DEVICE};

/// Dump internet gateway devices
#[derive(Parser, Debug)]
#[command(name = "upnpgwdump")]
#[command(version)]
struct Args {
    #[command(flatten)]
    verbosity: Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.verbosity.install()?;

    let control_point = discover(ControlPointConfig::default())?;
    let gateways = control_point.root_devices_by_type(INTERNET_GATEWAY_DEVICE);

    if gateways.is_empty() {
        println!("Internet gateway device is not found !!");
        control_point.stop()?;
        return Ok(());
    }

    for (n, gateway) in gateways.iter().enumerate() {
        println!("{}", gateway_line(n, gateway));
        match external_ip_address(&control_point, gateway) {
            Ok(address) => println!("  External IP address = {}", address),
            Err(e) => warn!("{}: {:#}", gateway.udn(), e),
        }
    }

    control_point.stop()?;
    Ok(())
}
