//! Answer pings and echo UDP port 7 on a TUN device.
//!
//! Needs CAP_NET_ADMIN. Usage: `tun_responder [config.toml]`

use std::process::Command;
use std::sync::Arc;

use toy_transport::{HeapPool, IpAddr, NetStack, StackConfig, TunIpLayer};

const TUN_NAME: &str = "tun0";
const LOCAL_ADDR: [u8; 4] = [10, 0, 0, 1];
const ECHO_PORT: u16 = 7;

fn configure_interface(iface_name: &str, ip_cidr: &str) -> std::io::Result<()> {
    let status = Command::new("ip")
        .args(["addr", "add", ip_cidr, "dev", iface_name])
        .status()?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "failed to configure {} on {}",
            ip_cidr, iface_name
        )));
    }

    let status = Command::new("ip")
        .args(["link", "set", "up", "dev", iface_name])
        .status()?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "failed to bring up {}",
            iface_name
        )));
    }
    log::info!("interface {} configured with {}", iface_name, ip_cidr);
    Ok(())
}

fn main() -> toy_transport::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => StackConfig::load(path)?,
        None => StackConfig::default(),
    };

    let tun = Arc::new(TunIpLayer::new(TUN_NAME, LOCAL_ADDR, 24)?);
    configure_interface(tun.name(), "10.0.0.254/24")?;
    let pool = Arc::new(HeapPool::from_config(&config.pool));
    let stack = NetStack::new(tun.clone(), pool, &config);
    stack.sockets().bind(ECHO_PORT)?;
    log::info!(
        "answering pings and UDP echo on {}:{}",
        IpAddr::V4(LOCAL_ADDR),
        ECHO_PORT
    );

    let mut data = vec![0u8; config.pool.block_size];
    loop {
        if let Some(buf) = tun.recv(config.pool.block_size)? {
            let outcome = stack.input(buf);
            log::debug!("dispatched: {:?}", outcome);
        }

        loop {
            let meta = match stack.sockets().recv_from(ECHO_PORT, &mut data, false) {
                Ok(Some(meta)) => meta,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("echo receive: {}", err);
                    continue;
                }
            };
            if let Err(err) = stack.send_to(ECHO_PORT, meta.src, meta.src_port, &data[..meta.len]) {
                log::warn!("echo to {}:{} failed: {}", meta.src, meta.src_port, err);
            }
        }
    }
}
