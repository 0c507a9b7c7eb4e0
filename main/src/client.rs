use crate::device::Device;
use crate::device::DeviceError;
use crate::device::WAN_SERVICE_TYPES;
use crate::gateway::Gateway;
use crate::mapping::MappingFilter;
use crate::mapping::MappingOptions;
use crate::mapping::PortMapping;
use crate::ssdp::DeviceFound;
use crate::ssdp::DeviceSearch;
use crate::ssdp::Ssdp;
use crate::ssdp::SsdpOptions;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const INTERNET_GATEWAY_DEVICE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ClientOptions {
    /// How long to wait for a gateway to answer discovery.
    pub timeout: Duration,

    pub source_port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1800),
            source_port: 0,
        }
    }
}

/// Port mapping client for the gateway of the local network.
///
/// Every operation discovers the gateway afresh.
pub struct Client<S = Ssdp> {
    search: S,
    http: reqwest::Client,
    timeout: Duration,
}

impl Client<Ssdp> {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let ssdp = Ssdp::new(SsdpOptions {
            source_port: options.source_port,
        })?;
        Self::with_search(ssdp, options)
    }
}

impl<S: DeviceSearch> Client<S> {
    pub fn with_search(search: S, options: ClientOptions) -> Result<Self, ClientError> {
        Ok(Self {
            search,
            http: http_client()?,
            timeout: options.timeout,
        })
    }

    /// Finds the first Internet Gateway Device that answers and resolves its WAN service.
    pub async fn get_gateway(&self) -> Result<Gateway, ClientError> {
        let mut search = self.search.search(INTERNET_GATEWAY_DEVICE.to_string());
        let found = tokio::time::timeout(self.timeout, first_located(&mut search)).await;
        drop(search);

        let (location, local_address) = match found {
            Ok(Some(found)) => found,
            Ok(None) => return Err(ClientError::DiscoveryClosed),
            Err(_) => {
                log::debug!("No gateway answered within {:?}", self.timeout);
                return Err(ClientError::GatewayTimeout);
            }
        };
        log::debug!("Gateway at {} answered on {}", location, local_address);
        let device = Device::new(self.http.clone(), location);
        let info = device.resolve_service(&WAN_SERVICE_TYPES).await?;
        Ok(Gateway::new(device, info, local_address))
    }

    pub async fn create_mapping(&self, options: &MappingOptions) -> Result<(), ClientError> {
        let request = options.normalize()?;
        self.get_gateway().await?.add_port_mapping(&request).await
    }

    pub async fn remove_mapping(&self, options: &MappingOptions) -> Result<(), ClientError> {
        let request = options.normalize()?;
        self.get_gateway().await?.delete_port_mapping(&request).await
    }

    pub async fn get_mappings(
        &self,
        filter: &MappingFilter,
    ) -> Result<Vec<PortMapping>, ClientError> {
        self.get_gateway().await?.port_mappings(filter).await
    }

    pub async fn get_public_ip(&self) -> Result<String, ClientError> {
        self.get_gateway().await?.external_ip().await
    }

    /// Shuts down discovery. Operations started afterwards fail with
    /// [ClientError::DiscoveryClosed].
    pub fn close(&self) {
        self.search.close();
    }
}

/// Gateways live on the local network, so system proxy settings are ignored.
pub(crate) fn http_client() -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(ClientError::Http)
}

async fn first_located(search: &mut BoxStream<'static, DeviceFound>) -> Option<(Url, IpAddr)> {
    while let Some(found) = search.next().await {
        match found.headers.location().map(Url::parse) {
            Some(Ok(location)) => return Some((location, found.local_address)),
            Some(Err(e)) => log::debug!("Ignoring a gateway with an invalid location: {}", e),
            None => log::debug!("Ignoring a gateway reply without LOCATION"),
        }
    }
    None
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection timed out")]
    GatewayTimeout,

    #[error("Discovery was closed")]
    DiscoveryClosed,

    #[error("Failed to open SSDP sockets")]
    Io(#[from] std::io::Error),

    #[error("Failed to build the HTTP client")]
    Http(#[source] reqwest::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Unexpected response from the gateway: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid endpoint `{0}`")]
    InvalidEndpoint(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapping::EndpointSpec;
    use crate::ssdp::MockDeviceSearch;
    use crate::test::FakeGateway;
    use crate::test::CONTROL_PATH;
    use mockall::predicate::eq;
    use nat_upnp_protocol::Headers;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    fn found(location: Option<&str>) -> DeviceFound {
        let mut headers = Headers::default();
        headers.insert("ST", INTERNET_GATEWAY_DEVICE);
        if let Some(location) = location {
            headers.insert("LOCATION", location);
        }
        DeviceFound {
            headers,
            local_address: "192.168.1.50".parse().unwrap(),
        }
    }

    fn client_replying(events: Vec<DeviceFound>) -> Client<MockDeviceSearch> {
        let mut search = MockDeviceSearch::new();
        search
            .expect_search()
            .with(eq(INTERNET_GATEWAY_DEVICE.to_string()))
            .return_once(move |_| futures_util::stream::iter(events).boxed());
        Client::with_search(search, Default::default()).unwrap()
    }

    #[tokio::test]
    async fn gateway_timeout() {
        crate::test::init();

        let mut search = MockDeviceSearch::new();
        search
            .expect_search()
            .return_once(|_| futures_util::stream::pending().boxed());
        let client = Client::with_search(
            search,
            ClientOptions {
                timeout: Duration::from_millis(50),
                source_port: 0,
            },
        )
        .unwrap();

        // When
        let e = client.get_gateway().await.unwrap_err();

        // Then
        if let ClientError::GatewayTimeout = e {
        } else {
            panic!("Expecting `GatewayTimeout` but got {:?}", e);
        }
        assert_eq!(e.to_string(), "Connection timed out");
    }

    #[tokio::test]
    async fn discovery_closed() {
        crate::test::init();

        let client = client_replying(Vec::new());

        let e = client.get_gateway().await.unwrap_err();

        if let ClientError::DiscoveryClosed = e {
        } else {
            panic!("Expecting `DiscoveryClosed` but got {:?}", e);
        }
    }

    #[tokio::test]
    async fn skip_replies_without_location() {
        crate::test::init();

        let server = MockServer::start().await;
        crate::test::mount_description(&server).await;
        let location = crate::test::description_url(&server).to_string();
        let client = client_replying(vec![
            found(None),
            found(Some("not a url")),
            found(Some(&location)),
        ]);

        // When
        let gateway = client.get_gateway().await.unwrap();

        // Then
        assert_eq!(gateway.device().description_url().as_str(), location);
        assert_eq!(gateway.local_address(), IpAddr::from([192, 168, 1, 50]));
        assert_eq!(
            gateway.info().control_url.as_str(),
            format!("{}{}", server.uri(), CONTROL_PATH)
        );
    }

    #[tokio::test]
    async fn invalid_endpoint_before_discovery() {
        crate::test::init();

        // Any search would panic on the mock without expectations.
        let client = Client::with_search(MockDeviceSearch::new(), Default::default()).unwrap();
        let options = MappingOptions {
            public: Some(EndpointSpec::from("http")),
            ..Default::default()
        };

        let e = client.create_mapping(&options).await.unwrap_err();

        if let ClientError::InvalidEndpoint(text) = e {
            assert_eq!(text, "http");
        } else {
            panic!("Expecting `InvalidEndpoint` but got {:?}", e);
        }
    }

    #[tokio::test]
    async fn get_public_ip() {
        crate::test::init();

        let server = MockServer::start().await;
        crate::test::mount_description(&server).await;
        Mock::given(method("POST"))
            .and(path(CONTROL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                crate::test::soap_response(
                    "GetExternalIPAddressResponse",
                    &[("NewExternalIPAddress", "203.0.113.7")],
                ),
            ))
            .mount(&server)
            .await;
        let location = crate::test::description_url(&server).to_string();
        let client = client_replying(vec![found(Some(&location))]);

        // When
        let ip = client.get_public_ip().await.unwrap();

        // Then
        assert_eq!(ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn ignore_system_proxy() {
        crate::test::init();

        // Nothing listens on the discard port.
        std::env::set_var("HTTP_PROXY", "http://127.0.0.1:9");
        let server = MockServer::start().await;
        FakeGateway::default().mount(&server).await;
        let location = crate::test::description_url(&server).to_string();
        let client = client_replying(vec![found(Some(&location))]);

        // When
        let ip = client.get_public_ip().await;

        // Then
        assert_eq!(ip.unwrap(), "203.0.113.7");
        assert!(!server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mapping_round_trip() {
        crate::test::init();

        let server = MockServer::start().await;
        FakeGateway::default().mount(&server).await;
        let event = found(Some(crate::test::description_url(&server).as_str()));
        let mut search = MockDeviceSearch::new();
        search
            .expect_search()
            .returning(move |_| futures_util::stream::iter([event.clone()]).boxed());
        let client = Client::with_search(search, Default::default()).unwrap();
        let local = MappingFilter {
            local: true,
            description: None,
        };

        // When
        client
            .create_mapping(&MappingOptions {
                public: Some(8080.into()),
                private: Some(EndpointSpec::Address {
                    host: None,
                    port: Some(80),
                }),
                ttl: Some(600),
                ..Default::default()
            })
            .await
            .unwrap();
        let created = client.get_mappings(&local).await.unwrap();
        client
            .remove_mapping(&MappingOptions {
                public: Some(8080.into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let remaining = client.get_mappings(&local).await.unwrap();

        // Then
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].public.port, 8080);
        assert_eq!(created[0].private.port, 80);
        assert_eq!(created[0].ttl, 600);
        assert_eq!(created[0].description, crate::mapping::DEFAULT_DESCRIPTION);
        assert!(remaining.is_empty());
        let ip: IpAddr = client.get_public_ip().await.unwrap().parse().unwrap();
        assert!(ip.is_ipv4());
    }

    #[tokio::test]
    async fn close_discovery() {
        crate::test::init();

        let mut search = MockDeviceSearch::new();
        search.expect_close().times(1).return_const(());
        let client = Client::with_search(search, Default::default()).unwrap();

        client.close();
    }
}
