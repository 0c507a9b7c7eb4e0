use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use nat_upnp_protocol::DecodeError;
use nat_upnp_protocol::SsdpDecoder;
use nat_upnp_protocol::SsdpMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

/// SSDP messages arriving at `socket`.
///
/// Datagrams that fail to decode are dropped. Only socket errors reach the caller.
pub fn receive(
    socket: Arc<UdpSocket>,
) -> BoxStream<'static, std::io::Result<(SsdpMessage, SocketAddr)>> {
    UdpFramed::new(socket, SsdpDecoder)
        .filter_map(|r| async { strip_decode_error(r) })
        .boxed()
}

fn strip_decode_error(
    result: Result<(SsdpMessage, SocketAddr), DecodeError>,
) -> Option<std::io::Result<(SsdpMessage, SocketAddr)>> {
    match result {
        Ok(inner) => Some(Ok(inner)),
        Err(DecodeError::Io(e)) => Some(Err(e)),
        Err(e) => {
            log::debug!("Dropping an invalid SSDP datagram: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nat_upnp_protocol::StartLine;

    #[tokio::test]
    async fn skip_invalid_datagrams() {
        crate::test::init();

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let address = socket.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut messages = receive(socket);

        // When
        sender.send_to(b"\xff\xfe", address).await.unwrap();
        sender.send_to(b"M-SEARCH * HTTP/1.1\r\n\r\n", address).await.unwrap();
        sender
            .send_to(b"HTTP/1.1 200 OK\r\nST: ssdp:all\r\n\r\n", address)
            .await
            .unwrap();

        // Then
        let (message, source) = messages.next().await.unwrap().unwrap();
        assert_eq!(message.start_line, StartLine::Response);
        assert_eq!(message.headers.search_target(), Some("ssdp:all"));
        assert_eq!(source, sender.local_addr().unwrap());
    }
}
