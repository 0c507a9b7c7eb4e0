use nat_upnp_protocol::build_request;
use nat_upnp_protocol::parse_response;
use nat_upnp_protocol::ActionResponse;
use nat_upnp_protocol::Argument;
use nat_upnp_protocol::DescriptionParseError;
use nat_upnp_protocol::DeviceDescription;
use nat_upnp_protocol::EnvelopeError;
use nat_upnp_protocol::SoapFault;
use nat_upnp_protocol::SoapParseError;
use nat_upnp_protocol::SoapResponse;
use reqwest::header::CONNECTION;
use reqwest::header::CONTENT_LENGTH;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

/// WAN connection services able to manage port mappings, in no particular preference.
pub const WAN_SERVICE_TYPES: [&str; 3] = [
    "urn:schemas-upnp-org:service:WANIPConnection:1",
    "urn:schemas-upnp-org:service:WANIPConnection:2",
    "urn:schemas-upnp-org:service:WANPPPConnection:1",
];

/// The control service chosen on a gateway, with absolute URLs.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GatewayInfo {
    pub service_type: String,
    pub control_url: Url,
    pub scpd_url: Url,
}

/// A UPnP device reachable over HTTP.
#[derive(Debug, Clone)]
pub struct Device {
    http: reqwest::Client,
    description_url: Url,
}

impl Device {
    pub fn new(http: reqwest::Client, description_url: Url) -> Self {
        Self {
            http,
            description_url,
        }
    }

    pub fn description_url(&self) -> &Url {
        &self.description_url
    }

    /// Fetches the description and picks the first service, in document pre-order, whose type is
    /// in `accepted_types`.
    pub async fn resolve_service(
        &self,
        accepted_types: &[&str],
    ) -> Result<GatewayInfo, DeviceError> {
        log::debug!("Fetching device description from {}", self.description_url);
        let body = self
            .http
            .get(self.description_url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(DeviceError::DescriptionFetch)?
            .bytes()
            .await
            .map_err(DeviceError::DescriptionFetch)?;
        let description = DeviceDescription::parse(&body)?;

        let service = description
            .find_service(accepted_types)
            .ok_or(DeviceError::ServiceNotFound)?;
        let (Some(control_url), Some(scpd_url)) = (&service.control_url, &service.scpd_url) else {
            log::debug!("{} lacks a control or SCPD URL", service.service_type);
            return Err(DeviceError::ServiceNotFound);
        };
        let base_url = match &description.url_base {
            Some(url_base) => self.description_url.join(url_base)?,
            None => self.description_url.clone(),
        };

        let info = GatewayInfo {
            service_type: service.service_type.clone(),
            control_url: base_url.join(control_url)?,
            scpd_url: base_url.join(scpd_url)?,
        };
        log::info!("Using {} at {}", info.service_type, info.control_url);
        Ok(info)
    }

    /// Invokes `action` on a resolved service.
    ///
    /// The body is parsed whatever the HTTP status, since gateways report SOAP faults with 500.
    pub async fn invoke(
        &self,
        info: &GatewayInfo,
        action: &str,
        arguments: &[Argument],
    ) -> Result<ActionResponse, DeviceError> {
        let envelope = build_request(&info.service_type, action, arguments)?;
        log::debug!("Invoking {} at {}", action, info.control_url);
        let response = self
            .http
            .post(info.control_url.clone())
            .header(CONTENT_TYPE, r#"text/xml; charset="utf-8""#)
            .header(CONTENT_LENGTH, envelope.len())
            .header(CONNECTION, "close")
            .header("SOAPAction", format!(r#""{}#{}""#, info.service_type, action))
            .body(envelope)
            .send()
            .await
            .map_err(DeviceError::Request)?;
        let status = response.status();
        let body = response.bytes().await.map_err(DeviceError::Request)?;

        match parse_response(&body)? {
            SoapResponse::Action(response) => Ok(response),
            SoapResponse::Fault(fault) => {
                log::debug!("{} failed with HTTP {}: {}", action, status, fault);
                Err(DeviceError::SoapFault(fault))
            }
        }
    }

    /// Resolves a WAN connection service, then invokes `action` on it.
    pub async fn run(
        &self,
        action: &str,
        arguments: &[Argument],
    ) -> Result<ActionResponse, DeviceError> {
        let info = self.resolve_service(&WAN_SERVICE_TYPES).await?;
        self.invoke(&info, action, arguments).await
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to fetch the device description")]
    DescriptionFetch(#[source] reqwest::Error),

    #[error("Invalid device description")]
    DescriptionParse(#[from] DescriptionParseError),

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Invalid URL in the device description")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Failed to send a SOAP request")]
    Request(#[source] reqwest::Error),

    #[error("Invalid SOAP response")]
    ResponseParse(#[from] SoapParseError),

    #[error("Gateway returned a fault: {0}")]
    SoapFault(SoapFault),
}
