//! Host facts shown by built-in actions

use std::net::IpAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::process::Command;

/// Public address used only to pick the outbound interface; nothing is sent
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Longest wait for the `hostname -I` fallback
const HOSTNAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Primary outbound IPv4/IPv6 address as a string
///
/// Connects an unbound UDP socket towards a public address to learn which
/// local address the kernel would route through, then falls back to the
/// first address printed by `hostname -I`.
pub async fn primary_ip() -> Option<String> {
    let ip = match route_local_addr().await {
        Some(ip) => Some(ip),
        None => hostname_dash_i().await,
    };
    ip.map(|ip| ip.to_string())
}

async fn route_local_addr() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(ROUTE_PROBE_ADDR).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

async fn hostname_dash_i() -> Option<IpAddr> {
    let mut cmd = Command::new("hostname");
    cmd.arg("-I").kill_on_drop(true);
    let output = tokio::time::timeout(HOSTNAME_TIMEOUT, cmd.output()).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .find_map(|s| s.parse().ok())
}

/// Host name of this machine
#[must_use]
pub fn host_name() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_ip_is_parseable_when_present() {
        if let Some(ip) = primary_ip().await {
            assert!(ip.parse::<IpAddr>().is_ok(), "{ip}");
        }
    }

    #[tokio::test]
    async fn hostname_fallback_yields_an_address_or_nothing() {
        if let Some(ip) = hostname_dash_i().await {
            assert!(!ip.is_unspecified());
        }
    }

    #[test]
    fn host_name_is_not_empty_when_present() {
        if let Some(name) = host_name() {
            assert!(!name.is_empty());
        }
    }
}
