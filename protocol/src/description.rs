use thiserror::Error;
use xmltree::Element;
use xmltree::XMLNode;

/// A UPnP device description document (`root` element).
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DeviceDescription {
    pub url_base: Option<String>,
    pub device: Option<DeviceDescriptor>,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DeviceDescriptor {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub udn: Option<String>,
    pub services: Vec<ServiceDescriptor>,
    pub devices: Vec<DeviceDescriptor>,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ServiceDescriptor {
    pub service_type: String,
    pub service_id: Option<String>,
    pub control_url: Option<String>,
    pub scpd_url: Option<String>,
    pub event_sub_url: Option<String>,
}

impl DeviceDescription {
    pub fn parse(xml: &[u8]) -> Result<Self, DescriptionParseError> {
        let root = Element::parse(xml)?;
        Ok(Self {
            url_base: text(&root, "URLBase"),
            device: root.get_child("device").map(DeviceDescriptor::from_element),
        })
    }

    /// All services in pre-order: a device's own services first, then its embedded devices,
    /// each in document order.
    pub fn services(&self) -> Vec<&ServiceDescriptor> {
        let mut services = Vec::new();
        if let Some(device) = &self.device {
            device.collect_services(&mut services);
        }
        services
    }

    /// First service in traversal order whose type is one of `accepted_types`.
    pub fn find_service(&self, accepted_types: &[&str]) -> Option<&ServiceDescriptor> {
        self.services()
            .into_iter()
            .find(|s| accepted_types.contains(&s.service_type.as_str()))
    }
}

impl DeviceDescriptor {
    fn from_element(device: &Element) -> Self {
        let services = list(device, "serviceList", "service")
            .map(|service| ServiceDescriptor {
                service_type: text(service, "serviceType").unwrap_or_default(),
                service_id: text(service, "serviceId"),
                control_url: text(service, "controlURL"),
                scpd_url: text(service, "SCPDURL"),
                event_sub_url: text(service, "eventSubURL"),
            })
            .collect();
        let devices = list(device, "deviceList", "device")
            .map(Self::from_element)
            .collect();
        Self {
            device_type: text(device, "deviceType"),
            friendly_name: text(device, "friendlyName"),
            udn: text(device, "UDN"),
            services,
            devices,
        }
    }

    fn collect_services<'a>(&'a self, services: &mut Vec<&'a ServiceDescriptor>) {
        services.extend(self.services.iter());
        for device in &self.devices {
            device.collect_services(services);
        }
    }
}

fn list<'a>(
    parent: &'a Element,
    list_name: &'a str,
    item_name: &'a str,
) -> impl Iterator<Item = &'a Element> + 'a {
    parent
        .get_child(list_name)
        .into_iter()
        .flat_map(|l| l.children.iter())
        .filter_map(XMLNode::as_element)
        .filter(move |e| e.name == item_name)
}

fn text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Error, Debug)]
pub enum DescriptionParseError {
    #[error("Malformed XML in device description")]
    Xml(#[from] xmltree::ParseError),
}
