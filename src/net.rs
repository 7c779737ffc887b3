//! Small networking helpers

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Best-effort LAN IP discovery, used only to print a reachable player
/// URL at startup. Falls back to loopback.
///
/// The socket is never written to; connecting a UDP socket just selects
/// the local address the OS would route through.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
