use bytes::BytesMut;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;
use std::net::SocketAddrV6;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// SSDP multicast group for IPv4.
pub fn multicast_address_v4() -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900).into()
}

/// Link-local SSDP multicast group for IPv6.
pub fn multicast_address_v6() -> SocketAddr {
    SocketAddrV6::new(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc), 1900, 0, 0).into()
}

/// An M-SEARCH query.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SearchRequest {
    pub search_target: String,
    pub max_wait_seconds: u8,
}

impl SearchRequest {
    pub fn new(search_target: impl Into<String>) -> Self {
        Self {
            search_target: search_target.into(),
            max_wait_seconds: 1,
        }
    }

    /// Renders the datagram addressed to `multicast_address`, which also fills the `HOST` header.
    pub fn encode(&self, multicast_address: SocketAddr) -> Vec<u8> {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             \r\n",
            multicast_address, self.max_wait_seconds, self.search_target
        )
        .into_bytes()
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StartLine {
    /// `HTTP/1.1 200 OK`, i.e. a reply to an M-SEARCH.
    Response,

    /// `NOTIFY * HTTP/1.1`, an unsolicited announcement.
    Notify,
}

/// MIME-style headers with case-insensitive names.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn search_target(&self) -> Option<&str> {
        self.get("st")
    }

    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SsdpMessage {
    pub start_line: StartLine,
    pub headers: Headers,
}

impl SsdpMessage {
    pub fn parse(datagram: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(datagram)?;
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
        let start_line = match lines.next() {
            Some(line) if line.starts_with("HTTP") => StartLine::Response,
            Some(line) if line.starts_with("NOTIFY") => StartLine::Notify,
            _ => return Err(DecodeError::NotSsdp),
        };

        let mut headers = Headers::default();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            }
        }
        Ok(Self {
            start_line,
            headers,
        })
    }
}

/// Decodes one SSDP message per datagram.
///
/// The whole buffer is consumed before parsing so a rejected datagram never stalls the frame
/// reader.
#[derive(Default)]
pub struct SsdpDecoder;

impl Decoder for SsdpDecoder {
    type Item = SsdpMessage;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split();
        SsdpMessage::parse(&datagram).map(Some)
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Error from network I/O")]
    Io(#[from] std::io::Error),

    #[error("Datagram is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Datagram is neither an HTTP response nor a NOTIFY request")]
    NotSsdp,
}

#[cfg(test)]
mod test {
    use super::*;

    const SEARCH_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=120\r\n\
        ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
        USN: uuid:gateway::urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
        EXT:\r\n\
        SERVER: Linux UPnP/1.1 MiniUPnPd/2.2\r\n\
        Location: http://192.168.1.1:5000/rootDesc.xml\r\n\
        \r\n";

    #[test]
    fn encode_search_request() {
        let request = SearchRequest::new("urn:schemas-upnp-org:device:InternetGatewayDevice:1");

        let datagram = String::from_utf8(request.encode(multicast_address_v4())).unwrap();

        assert_eq!(
            datagram,
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 1\r\n\
             ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
             \r\n"
        );
    }

    #[test]
    fn ipv6_host_header() {
        let datagram = SearchRequest::new("ssdp:all").encode(multicast_address_v6());
        let datagram = String::from_utf8(datagram).unwrap();
        assert!(datagram.contains("HOST: [ff02::c]:1900\r\n"));
    }

    #[test]
    fn parse_search_response() {
        let message = SsdpMessage::parse(SEARCH_RESPONSE.as_bytes()).unwrap();

        assert_eq!(message.start_line, StartLine::Response);
        assert_eq!(
            message.headers.search_target(),
            Some("urn:schemas-upnp-org:device:InternetGatewayDevice:1")
        );
        assert_eq!(
            message.headers.location(),
            Some("http://192.168.1.1:5000/rootDesc.xml")
        );
        assert_eq!(message.headers.get("CACHE-CONTROL"), Some("max-age=120"));
        assert_eq!(message.headers.get("ext"), None, "Empty values are skipped");
    }

    #[test]
    fn parse_notify() {
        let datagram = "NOTIFY * HTTP/1.1\nNT: upnp:rootdevice\nNTS: ssdp:alive\n\n";

        let message = SsdpMessage::parse(datagram.as_bytes()).unwrap();

        assert_eq!(message.start_line, StartLine::Notify);
        assert_eq!(message.headers.get("nts"), Some("ssdp:alive"));
        assert_eq!(message.headers.search_target(), None);
    }

    #[test]
    fn reject_m_search() {
        let datagram = SearchRequest::new("ssdp:all").encode(multicast_address_v4());

        let e = SsdpMessage::parse(&datagram).unwrap_err();

        if let DecodeError::NotSsdp = e {
        } else {
            panic!("An M-SEARCH from another control point is not a reply");
        }
    }

    #[test]
    fn decode_consumes_datagram() {
        let mut bytes = BytesMut::from(&b"garbage"[..]);

        let result = SsdpDecoder.decode(&mut bytes);

        assert!(result.is_err());
        assert!(bytes.is_empty());
    }

    #[test]
    fn decode_empty_datagram() {
        let message = SsdpDecoder.decode(&mut Default::default()).unwrap();
        assert_eq!(message, None);
    }
}
