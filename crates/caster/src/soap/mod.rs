/// SOAP client for UPnP control actions
///
/// Stateless: every call builds a fresh envelope, POSTs it and parses the
/// reply. Argument values are always escaped here, so callers cannot
/// smuggle raw XML into an envelope.
pub mod avtransport;
pub mod rendering;

pub use avtransport::AvTransport;
pub use rendering::{clamp_volume, RenderingControl};

use async_trait::async_trait;
use dlna_caster_core::{Arguments, CastError, ControlPoint, Result};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, trace, warn};

const SOAP_CONTENT_TYPE: &str = r#"text/xml; charset="utf-8""#;

/// HTTP SOAP transport implementing `ControlPoint`
#[derive(Clone)]
pub struct SoapClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl SoapClient {
    /// Client whose round-trips are bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| CastError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl ControlPoint for SoapClient {
    async fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &Arguments,
    ) -> Result<Arguments> {
        let body = build_envelope(service_type, action, args);
        let soap_action = format!("\"{}#{}\"", service_type, action);

        debug!("SOAP {} -> {}", action, control_url);
        trace!("Body: {}", body);

        let response = self
            .client
            .post(control_url)
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header("SOAPAction", soap_action)
            .body(body)
            .send()
            .await
            .map_err(|e| CastError::transport(action, describe_http_error(&e, self.timeout)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CastError::transport(action, describe_http_error(&e, self.timeout)))?;
        trace!("SOAP response ({}): {}", status, text);

        // Devices send faults with a 500 status; check the body first
        match parse_envelope(&text) {
            Ok(SoapBody::Fault { code, description }) => {
                warn!(
                    "{} returned UPnP fault {:?}: {}",
                    action, code, description
                );
                Err(CastError::ControlFault {
                    action: action.to_string(),
                    code,
                    description,
                })
            }
            Ok(SoapBody::Response { arguments, .. }) if status.is_success() => Ok(arguments),
            Ok(SoapBody::Response { .. }) => Err(CastError::transport(
                action,
                format!("HTTP {} without a SOAP fault", status),
            )),
            Err(reason) if status.is_success() => Err(CastError::transport(
                action,
                format!("unparseable response: {}", reason),
            )),
            Err(_) => Err(CastError::transport(action, format!("HTTP {}", status))),
        }
    }
}

fn describe_http_error(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("timed out after {:?}", timeout)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Build a SOAP envelope for a UPnP action
pub fn build_envelope(service_type: &str, action: &str, args: &Arguments) -> String {
    let param_xml: String = args
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(value)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{}">{param_xml}</u:{action}></s:Body></s:Envelope>"#,
        escape(service_type)
    )
}

/// Contents of a SOAP `Body`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapBody {
    /// An action request or response element and its child values
    Response { element: String, arguments: Arguments },
    Fault {
        code: Option<u32>,
        description: String,
    },
}

/// Parse a SOAP envelope
///
/// Works for requests as well as responses: the single element inside
/// `Body` is returned with its children as ordered arguments.
pub fn parse_envelope(xml: &str) -> std::result::Result<SoapBody, String> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<String> = Vec::new();
    let mut saw_body = false;
    let mut body_element: Option<String> = None;
    let mut arguments = Arguments::new();
    let mut current_text = String::new();

    let mut fault = FaultFields::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.len() == 1 && name == "Body" {
                    saw_body = true;
                }
                if stack.len() == 2 && stack[1] == "Body" && body_element.is_none() {
                    body_element = Some(name.clone());
                }
                stack.push(name);
                current_text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.len() == 2 && stack[1] == "Body" && body_element.is_none() {
                    body_element = Some(name);
                } else if stack.len() == 3 && body_element.as_deref() != Some("Fault") {
                    arguments.push(name, "");
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| format!("bad text at {}: {}", reader.buffer_position(), e))?;
                current_text.push_str(&text);
            }
            Ok(Event::CData(e)) => {
                current_text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    return Err("unbalanced end tag".to_string());
                };
                if body_element.as_deref() == Some("Fault") {
                    fault.record(&name, &current_text);
                } else if stack.len() == 3 {
                    arguments.push(name, current_text.as_str());
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parsing error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
    }

    if !saw_body {
        return Err("no SOAP Body".to_string());
    }

    match body_element {
        Some(name) if name == "Fault" => Ok(fault.into_body()),
        Some(element) => Ok(SoapBody::Response { element, arguments }),
        None => Err("empty SOAP Body".to_string()),
    }
}

#[derive(Default)]
struct FaultFields {
    fault_code: Option<String>,
    fault_string: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
}

impl FaultFields {
    fn record(&mut self, name: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let slot = match name {
            "faultcode" => &mut self.fault_code,
            "faultstring" => &mut self.fault_string,
            "errorCode" => &mut self.error_code,
            "errorDescription" => &mut self.error_description,
            _ => return,
        };
        *slot = Some(text.to_string());
    }

    fn into_body(self) -> SoapBody {
        let code = self.error_code.as_deref().and_then(|c| c.parse().ok());
        let description = self
            .error_description
            .or(self.fault_string)
            .or(self.fault_code)
            .unwrap_or_else(|| "unknown fault".to_string());
        SoapBody::Fault { code, description }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    #[test]
    fn test_build_envelope_escapes_values() {
        let args = Arguments::new()
            .with("InstanceID", "0")
            .with("CurrentURI", r#"http://h/a?x=1&y="2"<"#);
        let envelope = build_envelope(AVT, "SetAVTransportURI", &args);

        assert!(envelope.contains(&format!(r#"<u:SetAVTransportURI xmlns:u="{}">"#, AVT)));
        assert!(envelope.contains("<InstanceID>0</InstanceID>"));
        assert!(envelope.contains("x=1&amp;y=&quot;2&quot;&lt;</CurrentURI>"));
    }

    #[test]
    fn test_envelope_round_trips_through_parser() {
        let args = Arguments::new()
            .with("InstanceID", "0")
            .with("CurrentURIMetaData", "<DIDL-Lite>&amp; \"x\"</DIDL-Lite>")
            .with("Empty", "");
        let envelope = build_envelope(AVT, "SetAVTransportURI", &args);

        match parse_envelope(&envelope).unwrap() {
            SoapBody::Response { element, arguments } => {
                assert_eq!(element, "SetAVTransportURI");
                assert_eq!(arguments, args);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_arguments() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <CurrentTransportState>PLAYING</CurrentTransportState>
      <CurrentTransportStatus>OK</CurrentTransportStatus>
      <CurrentSpeed/>
    </u:GetTransportInfoResponse>
  </s:Body>
</s:Envelope>"#;

        let SoapBody::Response { element, arguments } = parse_envelope(xml).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(element, "GetTransportInfoResponse");
        assert_eq!(arguments.get("CurrentTransportState"), Some("PLAYING"));
        assert_eq!(arguments.get("CurrentTransportStatus"), Some("OK"));
        assert_eq!(arguments.get("CurrentSpeed"), Some(""));
    }

    #[test]
    fn test_parse_upnp_fault() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>718</errorCode>
          <errorDescription>Invalid InstanceID</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

        assert_eq!(
            parse_envelope(xml).unwrap(),
            SoapBody::Fault {
                code: Some(718),
                description: "Invalid InstanceID".to_string(),
            }
        );
    }

    #[test]
    fn test_fault_without_upnp_detail() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode><faultstring>Internal</faultstring></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(
            parse_envelope(xml).unwrap(),
            SoapBody::Fault {
                code: None,
                description: "Internal".to_string(),
            }
        );
    }

    #[test]
    fn test_non_soap_bodies_are_rejected() {
        assert!(parse_envelope("<html><body>Bad Gateway</body></html>").is_err());
        assert!(parse_envelope("").is_err());
        assert!(parse_envelope("<s:Envelope><s:Body></s:Body></s:Envelope>").is_err());
    }
}
