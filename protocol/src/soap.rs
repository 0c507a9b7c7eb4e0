use std::collections::HashMap;
use std::fmt::Display;
use thiserror::Error;
use xmltree::Element;
use xmltree::EmitterConfig;
use xmltree::XMLNode;

const ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// One `<name>value</name>` child of a SOAP action element.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Argument {
    pub name: String,
    pub value: Option<String>,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: Some(value.to_string()),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// Builds a SOAP 1.1 request for `action` of `service_type`.
///
/// Arguments are emitted in the given order. Many gateways reject reordered arguments.
pub fn build_request(
    service_type: &str,
    action: &str,
    arguments: &[Argument],
) -> Result<String, EnvelopeError> {
    let mut action_element = Element::new(&format!("u:{}", action));
    action_element
        .attributes
        .insert("xmlns:u".to_string(), service_type.to_string());
    for argument in arguments {
        let mut child = Element::new(&argument.name);
        if let Some(value) = argument.value.as_ref().filter(|v| !v.is_empty()) {
            child.children.push(XMLNode::Text(value.clone()));
        }
        action_element.children.push(XMLNode::Element(child));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(action_element));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), ENVELOPE_NAMESPACE.to_string());
    envelope
        .attributes
        .insert("s:encodingStyle".to_string(), ENCODING_STYLE.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buffer = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false)
        .normalize_empty_elements(false);
    envelope.write_with_config(&mut buffer, config)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Successful reply: the first element inside `Body` and its child fields.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ActionResponse {
    pub name: String,
    pub fields: HashMap<String, String>,
}

impl ActionResponse {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UpnpError {
    pub error_code: String,
    pub error_description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub enum FaultDetail {
    /// The `detail/UPnPError` element defined by the UPnP Device Architecture.
    Upnp(UpnpError),

    /// The whole `Fault` element, for gateways that omit `UPnPError`.
    Raw(Element),
}

#[derive(Debug, PartialEq, Clone)]
pub struct SoapFault {
    pub fault_code: Option<String>,
    pub fault_string: Option<String>,
    pub detail: FaultDetail,
}

impl SoapFault {
    fn from_element(fault: &Element) -> Self {
        let detail = fault
            .get_child("detail")
            .and_then(|d| d.get_child("UPnPError"))
            .map(|e| {
                FaultDetail::Upnp(UpnpError {
                    error_code: child_text(e, "errorCode").unwrap_or_default(),
                    error_description: child_text(e, "errorDescription").unwrap_or_default(),
                })
            })
            .unwrap_or_else(|| FaultDetail::Raw(fault.clone()));
        Self {
            fault_code: child_text(fault, "faultcode"),
            fault_string: child_text(fault, "faultstring"),
            detail,
        }
    }

    pub fn upnp_error(&self) -> Option<&UpnpError> {
        match &self.detail {
            FaultDetail::Upnp(e) => Some(e),
            FaultDetail::Raw(_) => None,
        }
    }
}

impl Display for SoapFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            FaultDetail::Upnp(e) => {
                write!(f, "UPnP error {}: {}", e.error_code, e.error_description)
            }
            FaultDetail::Raw(_) => write!(
                f,
                "{}",
                self.fault_string.as_deref().unwrap_or("unspecified fault")
            ),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum SoapResponse {
    Action(ActionResponse),
    Fault(SoapFault),
}

/// Parses a SOAP reply. Namespace prefixes are ignored.
pub fn parse_response(xml: &[u8]) -> Result<SoapResponse, SoapParseError> {
    let envelope = Element::parse(xml)?;
    if envelope.name != "Envelope" {
        return Err(SoapParseError::MissingEnvelope);
    }
    let body = envelope
        .get_child("Body")
        .ok_or(SoapParseError::MissingBody)?;

    if let Some(fault) = body.get_child("Fault") {
        return Ok(SoapResponse::Fault(SoapFault::from_element(fault)));
    }

    let response = body
        .children
        .iter()
        .find_map(XMLNode::as_element)
        .ok_or(SoapParseError::MissingResponse)?;
    let fields = response
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|e| {
            let value = e.get_text().map(|t| t.trim().to_string()).unwrap_or_default();
            (e.name.clone(), value)
        })
        .collect();
    Ok(SoapResponse::Action(ActionResponse {
        name: response.name.clone(),
        fields,
    }))
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
}

#[derive(Error, Debug)]
#[error("Failed to serialize a SOAP envelope")]
pub struct EnvelopeError(#[from] xmltree::Error);

#[derive(Error, Debug)]
pub enum SoapParseError {
    #[error("Malformed XML in SOAP reply")]
    Xml(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("SOAP Body carries no response element")]
    MissingResponse,
}
