/// UPnP device description parsing using quick-xml
use dlna_caster_core::{CastError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

const AV_TRANSPORT_PREFIX: &str = "urn:schemas-upnp-org:service:AVTransport:";
const RENDERING_CONTROL_PREFIX: &str = "urn:schemas-upnp-org:service:RenderingControl:";

/// Parsed device description document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub udn: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    /// Every service in the tree, embedded devices included
    pub services: Vec<ServiceEntry>,
}

/// UPnP service on a device, with its control URL made absolute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
}

impl DeviceDescription {
    /// First service whose type starts with `prefix` (any version)
    pub fn service(&self, prefix: &str) -> Option<&ServiceEntry> {
        self.services
            .iter()
            .find(|s| s.service_type.starts_with(prefix))
    }

    pub fn av_transport(&self) -> Option<&ServiceEntry> {
        self.service(AV_TRANSPORT_PREFIX)
    }

    pub fn rendering_control(&self) -> Option<&ServiceEntry> {
        self.service(RENDERING_CONTROL_PREFIX)
    }
}

/// Fetch and parse a description document
pub async fn fetch_description(
    client: &reqwest::Client,
    location: &str,
    timeout: Duration,
) -> Result<DeviceDescription> {
    debug!("Fetching device description from: {}", location);

    let fetch = async {
        let response = client
            .get(location)
            .send()
            .await
            .map_err(|e| CastError::DiscoveryParse(format!("{}: {}", location, e)))?;
        if !response.status().is_success() {
            return Err(CastError::DiscoveryParse(format!(
                "{} returned HTTP {}",
                location,
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| CastError::DiscoveryParse(format!("{}: {}", location, e)))
    };

    let xml = tokio::time::timeout(timeout, fetch).await.map_err(|_| {
        CastError::DiscoveryParse(format!("{} timed out after {:?}", location, timeout))
    })??;

    parse_description(&xml, location)
}

/// Parse UPnP device description XML
pub fn parse_description(xml: &str, location: &str) -> Result<DeviceDescription> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut description = DeviceDescription::default();
    let mut url_base: Option<String> = None;
    let mut raw_services: Vec<ServiceEntry> = Vec::new();

    let mut current_text = String::new();
    let mut in_service = false;
    let mut current_service = ServiceEntry::default();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"root" => saw_root = true,
                    b"service" => {
                        in_service = true;
                        current_service = ServiceEntry::default();
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let text = current_text.trim();

                if in_service {
                    match name.as_str() {
                        "serviceType" => current_service.service_type = text.to_string(),
                        "serviceId" => current_service.service_id = text.to_string(),
                        "controlURL" => current_service.control_url = text.to_string(),
                        "service" => {
                            if !current_service.service_type.is_empty() {
                                raw_services.push(std::mem::take(&mut current_service));
                            }
                            in_service = false;
                        }
                        _ => {}
                    }
                } else if !text.is_empty() {
                    // The root device comes first; embedded devices must not overwrite it
                    match name.as_str() {
                        "friendlyName" if description.friendly_name.is_empty() => {
                            description.friendly_name = text.to_string()
                        }
                        "UDN" if description.udn.is_none() => {
                            description.udn = Some(text.to_string())
                        }
                        "manufacturer" if description.manufacturer.is_none() => {
                            description.manufacturer = Some(text.to_string())
                        }
                        "modelName" if description.model_name.is_none() => {
                            description.model_name = Some(text.to_string())
                        }
                        "URLBase" if url_base.is_none() => url_base = Some(text.to_string()),
                        _ => {}
                    }
                }

                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CastError::DiscoveryParse(format!(
                    "XML parsing error in {} at position {}: {}",
                    location,
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(CastError::DiscoveryParse(format!(
            "{} is not a UPnP device description",
            location
        )));
    }

    if description.friendly_name.is_empty() {
        description.friendly_name = "Unknown Device".to_string();
    }

    let base = resolve_base(url_base.as_deref(), location)?;
    description.services = raw_services
        .into_iter()
        .filter_map(|mut service| match base.join(&service.control_url) {
            Ok(url) if !service.control_url.is_empty() => {
                service.control_url = url.to_string();
                Some(service)
            }
            _ => {
                debug!(
                    "Ignoring service {} ({}) with unusable control URL {:?}",
                    service.service_type, service.service_id, service.control_url
                );
                None
            }
        })
        .collect();

    Ok(description)
}

/// URLBase when present and valid, else the description URL
fn resolve_base(url_base: Option<&str>, location: &str) -> Result<Url> {
    if let Some(base) = url_base.and_then(|b| Url::parse(b).ok()) {
        return Ok(base);
    }
    Url::parse(location)
        .map_err(|e| CastError::DiscoveryParse(format!("bad LOCATION {}: {}", location, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room &amp; Kitchen</friendlyName>
    <UDN>uuid:12345678-1234-1234-1234-123456789012</UDN>
    <manufacturer>ACME Corp</manufacturer>
    <modelName>Renderer v1</modelName>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/upnp/control/rendering1</controlURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <friendlyName>Embedded Transport</friendlyName>
        <UDN>uuid:embedded</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:AVTransport:2</serviceType>
            <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
            <controlURL>ctl/avt</controlURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_description_with_embedded_device() {
        let desc =
            parse_description(DESCRIPTION, "http://192.168.1.100:8080/desc/device.xml").unwrap();

        assert_eq!(desc.friendly_name, "Living Room & Kitchen");
        assert_eq!(
            desc.udn.as_deref(),
            Some("uuid:12345678-1234-1234-1234-123456789012")
        );
        assert_eq!(desc.manufacturer.as_deref(), Some("ACME Corp"));
        assert_eq!(desc.model_name.as_deref(), Some("Renderer v1"));
        assert_eq!(desc.services.len(), 2);

        let avt = desc.av_transport().unwrap();
        assert_eq!(avt.service_type, "urn:schemas-upnp-org:service:AVTransport:2");
        assert_eq!(avt.control_url, "http://192.168.1.100:8080/desc/ctl/avt");

        let rc = desc.rendering_control().unwrap();
        assert_eq!(rc.control_url, "http://192.168.1.100:8080/upnp/control/rendering1");
    }

    #[test]
    fn test_url_base_overrides_location() {
        let xml = r#"<root><URLBase>http://10.0.0.9:1400/</URLBase><device>
<serviceList><service><serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
<controlURL>MediaRenderer/AVTransport/Control</controlURL></service></serviceList>
</device></root>"#;
        let desc = parse_description(xml, "http://10.0.0.9:49152/xml/device.xml").unwrap();

        assert_eq!(desc.friendly_name, "Unknown Device");
        assert_eq!(
            desc.av_transport().unwrap().control_url,
            "http://10.0.0.9:1400/MediaRenderer/AVTransport/Control"
        );
        assert!(desc.rendering_control().is_none());
    }

    #[test]
    fn test_absolute_control_url_kept() {
        let xml = r#"<root><device><serviceList><service>
<serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
<controlURL>http://10.0.0.10:9000/avt</controlURL></service></serviceList></device></root>"#;
        let desc = parse_description(xml, "http://10.0.0.9/device.xml").unwrap();
        assert_eq!(desc.av_transport().unwrap().control_url, "http://10.0.0.10:9000/avt");
    }

    #[test]
    fn test_rejects_non_description() {
        assert!(parse_description("<html><body>hi</body></html>", "http://h/").is_err());
        assert!(parse_description("<root><device>", "not a url").is_err());
    }
}
