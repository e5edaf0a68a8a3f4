/// Local address selection for media URLs
use dlna_caster_core::{CastError, Result};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use tracing::debug;

/// Get the local IP address that can reach the target device
///
/// Connecting a UDP socket sends nothing; it only asks the OS which
/// interface it would route through.
pub fn local_ip_for_device(device_ip: IpAddr) -> Option<IpAddr> {
    let bind_addr: SocketAddr = match device_ip {
        IpAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        IpAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };

    let socket = UdpSocket::bind(bind_addr).ok()?;
    socket.connect((device_ip, 1900)).ok()?;
    let local_ip = socket.local_addr().ok()?.ip();

    if local_ip.is_unspecified() {
        None
    } else {
        Some(local_ip)
    }
}

/// Host to write into media URLs handed to `device_ip`
///
/// Order: configured override, then the interface routed toward the
/// device, then the listener address when it is bound to a concrete IP.
pub fn advertise_host(
    configured: Option<IpAddr>,
    device_ip: IpAddr,
    listener: SocketAddr,
) -> Result<IpAddr> {
    if let Some(host) = configured {
        return Ok(host);
    }

    if let Some(host) = local_ip_for_device(device_ip) {
        debug!("Using local address {} to reach {}", host, device_ip);
        return Ok(host);
    }

    if !listener.ip().is_unspecified() {
        return Ok(listener.ip());
    }

    Err(CastError::Config(format!(
        "cannot determine a local address reachable from {}; set server.advertise_host",
        device_ip
    )))
}

/// Format a host for use inside a URL (brackets for IPv6)
pub fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_configured_host_wins() {
        let configured: IpAddr = "192.168.1.20".parse().unwrap();
        let host = advertise_host(
            Some(configured),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            SocketAddr::from(([0, 0, 0, 0], 8200)),
        )
        .unwrap();
        assert_eq!(host, configured);
    }

    #[test]
    fn test_loopback_device_routes_via_loopback() {
        let host = local_ip_for_device(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(host, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_url_host_brackets_ipv6() {
        assert_eq!(url_host("10.0.0.2".parse().unwrap()), "10.0.0.2");
        assert_eq!(url_host("fe80::1".parse().unwrap()), "[fe80::1]");
    }
}
