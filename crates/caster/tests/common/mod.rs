//! Mock media renderer shared by the integration tests: a description
//! document, AVTransport and RenderingControl endpoints over axum, and an
//! SSDP responder for unicast searches.
#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use dlna_caster::soap::{build_envelope, parse_envelope, SoapBody};
use dlna_caster::*;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, UdpSocket};

/// One SOAP call received by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub soap_action: String,
    pub action: String,
    pub args: Arguments,
}

/// What the renderer got when it pulled the media URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetch {
    pub status: u16,
    pub content_range: Option<String>,
    pub len: usize,
}

#[derive(Default)]
pub struct MockState {
    pub calls: Mutex<Vec<RecordedCall>>,
    pub transport_state: Mutex<String>,
    pub current_uri: Mutex<String>,
    pub volume: Mutex<u32>,
    pub muted: Mutex<bool>,
    /// Action name -> UPnP error code returned once
    pub faults: Mutex<HashMap<String, u32>>,
    pub fetches: Mutex<Vec<Fetch>>,
}

impl MockState {
    pub fn actions(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.action.clone())
            .collect()
    }

    pub fn call(&self, action: &str) -> Option<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.action == action)
            .cloned()
    }

    pub fn fail_next(&self, action: &str, code: u32) {
        self.faults.lock().unwrap().insert(action.to_string(), code);
    }

    pub fn set_transport_state(&self, state: &str) {
        *self.transport_state.lock().unwrap() = state.to_string();
    }
}

pub struct MockRenderer {
    pub addr: SocketAddr,
    pub uuid: String,
    pub state: Arc<MockState>,
}

impl MockRenderer {
    pub async fn spawn(friendly_name: &str, uuid: &str) -> MockRenderer {
        let state = Arc::new(MockState::default());
        state.set_transport_state("NO_MEDIA_PRESENT");
        *state.volume.lock().unwrap() = 30;

        let description = description_xml(friendly_name, uuid);
        let app = Router::new()
            .route(
                "/description.xml",
                get(move || {
                    let body = description.clone();
                    async move { ([("content-type", "text/xml")], body) }
                }),
            )
            .route("/ctl/avt", post(control))
            .route("/ctl/rc", post(control))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockRenderer {
            addr,
            uuid: uuid.to_string(),
            state,
        }
    }

    pub fn location(&self) -> String {
        format!("http://{}/description.xml", self.addr)
    }

    /// Device as discovery would report it
    pub fn device(&self, friendly_name: &str) -> Device {
        Device {
            usn: format!("uuid:{}::{}", self.uuid, MEDIA_RENDERER_URN),
            friendly_name: friendly_name.to_string(),
            location: self.location(),
            host: self.addr.ip(),
            port: self.addr.port(),
            manufacturer: Some("Mock".to_string()),
            model_name: Some("Renderer".to_string()),
            av_transport_url: format!("http://{}/ctl/avt", self.addr),
            av_transport_type: AV_TRANSPORT_URN.to_string(),
            rendering_control_url: Some(format!("http://{}/ctl/rc", self.addr)),
            rendering_control_type: Some(RENDERING_CONTROL_URN.to_string()),
            max_age: 1800,
            discovered_at: chrono::Utc::now(),
        }
    }
}

fn description_xml(friendly_name: &str, uuid: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>{MEDIA_RENDERER_URN}</deviceType>
    <friendlyName>{friendly_name}</friendlyName>
    <manufacturer>Mock</manufacturer>
    <modelName>Renderer</modelName>
    <UDN>uuid:{uuid}</UDN>
    <serviceList>
      <service>
        <serviceType>{AV_TRANSPORT_URN}</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/ctl/avt</controlURL>
      </service>
      <service>
        <serviceType>{RENDERING_CONTROL_URN}</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/ctl/rc</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#
    )
}

fn fault_envelope(code: u32) -> String {
    format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>{code}</errorCode><errorDescription>Mock failure</errorDescription></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#
    )
}

async fn control(
    State(state): State<Arc<MockState>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let soap_action = headers
        .get("soapaction")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let Ok(SoapBody::Response { element, arguments }) = parse_envelope(&body) else {
        return (StatusCode::BAD_REQUEST, "bad envelope".to_string());
    };
    let service_type = soap_action
        .trim_matches('"')
        .split('#')
        .next()
        .unwrap_or_default()
        .to_string();

    state.calls.lock().unwrap().push(RecordedCall {
        path: uri.path().to_string(),
        soap_action: soap_action.clone(),
        action: element.clone(),
        args: arguments.clone(),
    });

    let fault = state.faults.lock().unwrap().remove(&element);
    if let Some(code) = fault {
        return (StatusCode::INTERNAL_SERVER_ERROR, fault_envelope(code));
    }

    let mut out = Arguments::new();
    match element.as_str() {
        "SetAVTransportURI" => {
            let uri = arguments.get("CurrentURI").unwrap_or_default().to_string();
            if !uri.is_empty() {
                // A real renderer reads the head of the resource before accepting it
                let fetch = fetch_head(&uri).await;
                state.fetches.lock().unwrap().push(fetch);
                state.set_transport_state("STOPPED");
            } else {
                state.set_transport_state("NO_MEDIA_PRESENT");
            }
            *state.current_uri.lock().unwrap() = uri;
        }
        "Play" => state.set_transport_state("PLAYING"),
        "Pause" => state.set_transport_state("PAUSED_PLAYBACK"),
        "Stop" => state.set_transport_state("STOPPED"),
        "Seek" => {}
        "GetTransportInfo" => {
            out.push(
                "CurrentTransportState",
                state.transport_state.lock().unwrap().clone(),
            );
            out.push("CurrentTransportStatus", "OK");
            out.push("CurrentSpeed", "1");
        }
        "GetPositionInfo" => {
            out.push("Track", "1");
            out.push("TrackDuration", "0:01:40");
            out.push("RelTime", "0:00:10");
            out.push("AbsTime", "NOT_IMPLEMENTED");
        }
        "GetMediaInfo" => {
            out.push("NrTracks", "1");
            out.push("MediaDuration", "0:01:40");
            out.push("CurrentURI", state.current_uri.lock().unwrap().clone());
        }
        "SetVolume" => {
            let volume = arguments
                .get("DesiredVolume")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            *state.volume.lock().unwrap() = volume;
        }
        "GetVolume" => out.push("CurrentVolume", state.volume.lock().unwrap().to_string()),
        "SetMute" => *state.muted.lock().unwrap() = arguments.get("DesiredMute") == Some("1"),
        "GetMute" => out.push(
            "CurrentMute",
            if *state.muted.lock().unwrap() { "1" } else { "0" },
        ),
        _ => return (StatusCode::INTERNAL_SERVER_ERROR, fault_envelope(401)),
    }

    (
        StatusCode::OK,
        build_envelope(&service_type, &format!("{}Response", element), &out),
    )
}

async fn fetch_head(uri: &str) -> Fetch {
    let response = match reqwest::Client::new()
        .get(uri)
        .header("Range", "bytes=0-99")
        .send()
        .await
    {
        Ok(r) => r,
        Err(_) => {
            return Fetch {
                status: 0,
                content_range: None,
                len: 0,
            }
        }
    };
    let status = response.status().as_u16();
    let content_range = response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let len = response.bytes().await.map(|b| b.len()).unwrap_or(0);
    Fetch {
        status,
        content_range,
        len,
    }
}

/// Answer every M-SEARCH on a loopback socket with the given datagrams
pub async fn spawn_ssdp_responder(replies: Vec<String>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            if !buf[..len].starts_with(b"M-SEARCH") {
                continue;
            }
            for reply in &replies {
                let _ = socket.send_to(reply.as_bytes(), from).await;
            }
        }
    });
    addr
}

pub fn ssdp_reply(usn: &str, st: &str, location: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=900\r\n\
         EXT:\r\n\
         LOCATION: {location}\r\n\
         SERVER: Mock/1.0 UPnP/1.0 Renderer/1.0\r\n\
         ST: {st}\r\n\
         USN: {usn}\r\n\
         \r\n"
    )
}

pub fn test_config() -> CasterConfig {
    let mut config = CasterConfig::default();
    config.server.bind = "127.0.0.1:0".parse().unwrap();
    config.server.advertise_host = Some("127.0.0.1".parse().unwrap());
    config.discovery.timeout_ms = 600;
    config.discovery.search_interval_ms = 100;
    config.discovery.description_timeout_ms = 1000;
    config.control.timeout_ms = 1000;
    config
}

/// Patterned file contents so any slice is recognizable
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
