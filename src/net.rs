//! Host identity helpers: node name and advertise-address discovery.
use std::net::{IpAddr, UdpSocket};

use crate::error::SidecarError;

/// Resolves the local hostname used as the catalog node name.
pub fn hostname() -> Result<String, SidecarError> {
    nix::unistd::gethostname()
        .map_err(|errno| {
            SidecarError::Hostname(std::io::Error::from_raw_os_error(errno as i32))
        })
        .map(|name| name.to_string_lossy().into_owned())
}

/// Discovers the externally routable address of this host.
///
/// "Connecting" a UDP socket to a public address selects the outbound
/// interface without sending a packet; the socket's local address is the
/// one peers would reach us on.
pub fn external_ip() -> Result<IpAddr, SidecarError> {
    fn probe() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    }

    probe().map_err(SidecarError::ExternalIp)
}
