use crate::client::ClientError;
use crate::device::Device;
use crate::device::GatewayInfo;
use crate::mapping::MappingFilter;
use crate::mapping::MappingRequest;
use crate::mapping::PortMapping;
use futures_util::Stream;
use futures_util::TryStreamExt;
use nat_upnp_protocol::ActionResponse;
use nat_upnp_protocol::Argument;
use std::net::IpAddr;

/// A discovered Internet Gateway Device and its WAN connection service.
#[derive(Debug, Clone)]
pub struct Gateway {
    device: Device,
    info: GatewayInfo,
    local_address: IpAddr,
}

enum EntryLookup {
    Found(PortMapping),
    EndOfTable,
}

impl Gateway {
    pub fn new(device: Device, info: GatewayInfo, local_address: IpAddr) -> Self {
        Self {
            device,
            info,
            local_address,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn info(&self) -> &GatewayInfo {
        &self.info
    }

    /// Address of the local interface the gateway replied to.
    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    pub async fn add_port_mapping(&self, request: &MappingRequest) -> Result<(), ClientError> {
        let private_host = request
            .private
            .host
            .clone()
            .unwrap_or_else(|| self.local_address.to_string());
        let arguments = [
            Argument::new("NewRemoteHost", request.public.host.as_deref().unwrap_or_default()),
            port_argument("NewExternalPort", request.public.port),
            Argument::new("NewProtocol", request.protocol),
            port_argument("NewInternalPort", request.private.port),
            Argument::new("NewInternalClient", private_host),
            Argument::new("NewEnabled", 1),
            Argument::new("NewPortMappingDescription", &request.description),
            Argument::new("NewLeaseDuration", request.ttl),
        ];
        self.invoke("AddPortMapping", &arguments).await?;
        log::info!(
            "Mapped {} port {:?} to {}",
            request.protocol,
            request.public.port,
            self.local_address
        );
        Ok(())
    }

    pub async fn delete_port_mapping(&self, request: &MappingRequest) -> Result<(), ClientError> {
        let arguments = [
            Argument::new("NewRemoteHost", request.public.host.as_deref().unwrap_or_default()),
            port_argument("NewExternalPort", request.public.port),
            Argument::new("NewProtocol", request.protocol),
        ];
        self.invoke("DeletePortMapping", &arguments).await?;
        Ok(())
    }

    /// Walks the mapping table from index 0, fetching one entry per poll.
    ///
    /// Gateways report the end of the table with a fault, so the first failed lookup ends the
    /// stream. A reply that is not an entry yields an error and ends the stream too.
    pub fn mapping_entries(&self) -> impl Stream<Item = Result<PortMapping, ClientError>> + '_ {
        futures_util::stream::unfold(Some(0u32), move |index| async move {
            let index = index?;
            match self.lookup_entry(index).await {
                Ok(EntryLookup::Found(mapping)) => Some((Ok(mapping), index.checked_add(1))),
                Ok(EntryLookup::EndOfTable) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    pub async fn port_mappings(
        &self,
        filter: &MappingFilter,
    ) -> Result<Vec<PortMapping>, ClientError> {
        self.mapping_entries()
            .try_filter(|m| futures_util::future::ready(filter.accepts(m)))
            .try_collect()
            .await
    }

    pub async fn external_ip(&self) -> Result<String, ClientError> {
        let response = self.invoke("GetExternalIPAddress", &[]).await?;
        expect_response(&response, "GetExternalIPAddress")?;
        response
            .field("NewExternalIPAddress")
            .map(str::to_string)
            .ok_or_else(|| ClientError::UnexpectedResponse("Missing NewExternalIPAddress".into()))
    }

    async fn lookup_entry(&self, index: u32) -> Result<EntryLookup, ClientError> {
        let arguments = [Argument::new("NewPortMappingIndex", index)];
        let response = match self.invoke("GetGenericPortMappingEntry", &arguments).await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Mapping table ends at index {}: {}", index, e);
                return Ok(EntryLookup::EndOfTable);
            }
        };
        expect_response(&response, "GetGenericPortMappingEntry")?;
        PortMapping::from_response(&response, self.local_address).map(EntryLookup::Found)
    }

    async fn invoke(
        &self,
        action: &str,
        arguments: &[Argument],
    ) -> Result<ActionResponse, ClientError> {
        Ok(self.device.invoke(&self.info, action, arguments).await?)
    }
}

fn port_argument(name: &str, port: Option<u16>) -> Argument {
    match port {
        Some(port) => Argument::new(name, port),
        None => Argument::empty(name),
    }
}

fn expect_response(response: &ActionResponse, action: &str) -> Result<(), ClientError> {
    let expected = format!("{}Response", action);
    if response.name == expected {
        Ok(())
    } else {
        Err(ClientError::UnexpectedResponse(format!(
            "Expecting {} but got {}",
            expected, response.name
        )))
    }
}
