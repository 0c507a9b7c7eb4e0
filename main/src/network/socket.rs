use socket2::Domain;
use socket2::Protocol;
use socket2::Socket;
use socket2::Type;
use std::net::IpAddr;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Binds a UDP socket at `address` for sending M-SEARCH queries and receiving their replies.
pub fn bind(address: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(address),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    match address.ip() {
        IpAddr::V4(ip) => {
            // Not every interface accepts being chosen for multicast, sending still works without.
            if let Err(e) = socket.set_multicast_if_v4(&ip) {
                log::debug!("Cannot route multicast through {}: {}", ip, e);
            }
        }
        IpAddr::V6(_) => socket.set_only_v6(true)?,
    }
    socket.bind(&address.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn bind_loopback() {
        crate::test::init();

        let socket = bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let address = socket.local_addr().unwrap();
        assert_eq!(address.ip(), IpAddr::from([127, 0, 0, 1]));
        assert_ne!(address.port(), 0);
    }

    #[tokio::test]
    async fn bind_foreign_address() {
        crate::test::init();

        // TEST-NET-1 is never assigned to a local interface.
        let result = bind("192.0.2.1:0".parse().unwrap());

        assert!(result.is_err());
    }
}
