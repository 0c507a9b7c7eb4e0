//! Port mapping on UPnP Internet Gateway Devices.
//!
//! [Client] discovers the gateway through SSDP on every call, then drives its WAN connection
//! service over SOAP.

mod client;
mod device;
mod gateway;
mod mapping;
mod network;
mod ssdp;


pub use client::Client;
pub use client::ClientError;
pub use client::ClientOptions;
pub use client::INTERNET_GATEWAY_DEVICE;
pub use device::Device;
pub use device::DeviceError;
pub use device::GatewayInfo;
pub use device::WAN_SERVICE_TYPES;
pub use gateway::Gateway;
pub use mapping::DescriptionFilter;
pub use mapping::Endpoint;
pub use mapping::EndpointSpec;
pub use mapping::MappingFilter;
pub use mapping::MappingOptions;
pub use mapping::MappingRequest;
pub use mapping::PortMapping;
pub use mapping::Protocol;
pub use mapping::RequestedEndpoint;
pub use mapping::UnknownProtocol;
pub use mapping::DEFAULT_DESCRIPTION;
pub use mapping::DEFAULT_TTL;
pub use nat_upnp_protocol as protocol;
pub use ssdp::DeviceFound;
pub use ssdp::DeviceSearch;
pub use ssdp::Search;
pub use ssdp::Ssdp;
pub use ssdp::SsdpOptions;
