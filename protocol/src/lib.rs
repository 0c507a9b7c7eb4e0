//! UPnP wire formats: SSDP datagrams, SOAP envelopes and device descriptions.

mod description;
mod soap;
mod ssdp;

pub use description::DescriptionParseError;
pub use description::DeviceDescription;
pub use description::DeviceDescriptor;
pub use description::ServiceDescriptor;
pub use soap::build_request;
pub use soap::parse_response;
pub use soap::ActionResponse;
pub use soap::Argument;
pub use soap::EnvelopeError;
pub use soap::FaultDetail;
pub use soap::SoapFault;
pub use soap::SoapParseError;
pub use soap::SoapResponse;
pub use soap::UpnpError;
pub use ssdp::multicast_address_v4;
pub use ssdp::multicast_address_v6;
pub use ssdp::DecodeError;
pub use ssdp::Headers;
pub use ssdp::SearchRequest;
pub use ssdp::SsdpDecoder;
pub use ssdp::SsdpMessage;
pub use ssdp::StartLine;
