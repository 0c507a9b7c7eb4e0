use crate::client::ClientError;
use nat_upnp_protocol::ActionResponse;
use regex::Regex;
use serde::Serialize;
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DESCRIPTION: &str = "nat-upnp";

/// Lease in seconds when none is requested.
pub const DEFAULT_TTL: u32 = 1800;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Spelling used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(UnknownProtocol(s.to_string()))
        }
    }
}

#[derive(Error, Debug)]
#[error("Unknown protocol `{0}`")]
pub struct UnknownProtocol(pub String);

/// An endpoint as callers may spell it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum EndpointSpec {
    Port(u16),

    /// A port written as text, e.g. taken from a command line.
    Text(String),

    Address {
        host: Option<String>,
        port: Option<u16>,
    },
}

impl EndpointSpec {
    pub fn normalize(&self) -> Result<RequestedEndpoint, ClientError> {
        match self {
            Self::Port(port) => Ok(RequestedEndpoint {
                host: None,
                port: Some(*port),
            }),
            Self::Text(text) => text
                .trim()
                .parse()
                .map(|port| RequestedEndpoint {
                    host: None,
                    port: Some(port),
                })
                .map_err(|_| ClientError::InvalidEndpoint(text.clone())),
            Self::Address { host, port } => Ok(RequestedEndpoint {
                host: host.clone(),
                port: *port,
            }),
        }
    }
}

impl From<u16> for EndpointSpec {
    fn from(port: u16) -> Self {
        Self::Port(port)
    }
}

impl From<&str> for EndpointSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for EndpointSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct RequestedEndpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// What callers pass to create or remove a mapping.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MappingOptions {
    pub public: Option<EndpointSpec>,
    pub private: Option<EndpointSpec>,
    pub protocol: Option<Protocol>,
    pub description: Option<String>,

    /// Lease in seconds. 0 asks the gateway for a permanent mapping.
    pub ttl: Option<u32>,
}

impl MappingOptions {
    /// Validates the endpoints and fills in defaults.
    pub fn normalize(&self) -> Result<MappingRequest, ClientError> {
        Ok(MappingRequest {
            public: normalize_endpoint(&self.public)?,
            private: normalize_endpoint(&self.private)?,
            protocol: self.protocol.unwrap_or_default(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            ttl: self.ttl.unwrap_or(DEFAULT_TTL),
        })
    }
}

fn normalize_endpoint(spec: &Option<EndpointSpec>) -> Result<RequestedEndpoint, ClientError> {
    spec.as_ref()
        .map(EndpointSpec::normalize)
        .transpose()
        .map(Option::unwrap_or_default)
}

/// [MappingOptions] after normalization.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MappingRequest {
    pub public: RequestedEndpoint,
    pub private: RequestedEndpoint,
    pub protocol: Protocol,
    pub description: String,
    pub ttl: u32,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// One row of the gateway's port mapping table.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct PortMapping {
    pub public: Endpoint,
    pub private: Endpoint,
    pub protocol: Protocol,
    pub enabled: bool,
    pub description: String,
    pub ttl: u32,

    /// Whether the mapping points at the interface this host discovered the gateway through.
    pub local: bool,
}

impl PortMapping {
    pub(crate) fn from_response(
        response: &ActionResponse,
        local_address: IpAddr,
    ) -> Result<Self, ClientError> {
        let private_host = required(response, "NewInternalClient")?.to_string();
        let protocol = required(response, "NewProtocol")?;
        Ok(Self {
            public: Endpoint {
                host: response.field("NewRemoteHost").unwrap_or_default().to_string(),
                port: parse(response, "NewExternalPort")?,
            },
            local: private_host == local_address.to_string(),
            private: Endpoint {
                host: private_host,
                port: parse(response, "NewInternalPort")?,
            },
            protocol: protocol.parse().map_err(|e: UnknownProtocol| {
                ClientError::UnexpectedResponse(e.to_string())
            })?,
            enabled: response.field("NewEnabled") == Some("1"),
            description: response
                .field("NewPortMappingDescription")
                .unwrap_or_default()
                .to_string(),
            ttl: lease_duration(response)?,
        })
    }
}

fn required<'a>(response: &'a ActionResponse, name: &str) -> Result<&'a str, ClientError> {
    response
        .field(name)
        .ok_or_else(|| ClientError::UnexpectedResponse(format!("Missing {}", name)))
}

fn parse<T: FromStr>(response: &ActionResponse, name: &str) -> Result<T, ClientError> {
    let value = required(response, name)?;
    value
        .parse()
        .map_err(|_| ClientError::UnexpectedResponse(format!("Invalid {} `{}`", name, value)))
}

/// An absent or blank lease reads as a permanent mapping.
fn lease_duration(response: &ActionResponse) -> Result<u32, ClientError> {
    match response.field("NewLeaseDuration").map(str::trim) {
        None | Some("") => Ok(0),
        Some(_) => parse(response, "NewLeaseDuration"),
    }
}

#[derive(Debug, Clone)]
pub enum DescriptionFilter {
    /// Keeps descriptions containing the text.
    Contains(String),

    /// Keeps descriptions the pattern matches anywhere in.
    /// Anchor the pattern with `^…$` to require a full match.
    Matches(Regex),
}

#[derive(Debug, Clone, Default)]
pub struct MappingFilter {
    /// Keeps only mappings pointing at this host.
    pub local: bool,

    pub description: Option<DescriptionFilter>,
}

impl MappingFilter {
    pub fn accepts(&self, mapping: &PortMapping) -> bool {
        if self.local && !mapping.local {
            return false;
        }
        match &self.description {
            Some(DescriptionFilter::Contains(text)) => mapping.description.contains(text.as_str()),
            Some(DescriptionFilter::Matches(pattern)) => pattern.is_match(&mapping.description),
            None => true,
        }
    }
}
