//! Print every root device found on the local network.

use anyhow::Result;
use clap::Parser;
use upnp_sdk::ControlPointConfig;
use upnp_tools::{device_line, discover, Verbosity};

/// Dump the root devices answering an SSDP search
#[derive(Parser, Debug)]
#[command(name = "upnpdump")]
#[command(version)]
struct Args {
    #[command(flatten)]
    verbosity: Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.verbosity.install()?;

    let control_point = discover(ControlPointConfig::default())?;
    let devices = control_point.root_devices();
    control_point.stop()?;

    if devices.is_empty() {
        println!("Device not found !!");
        return Ok(());
    }

    for (n, device) in devices.iter().enumerate() {
        println!("{}", device_line(n, device));
    }
    Ok(())
}
