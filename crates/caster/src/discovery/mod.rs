/// UPnP/SSDP device discovery for DLNA renderers
///
/// A search sends several M-SEARCH datagrams (UDP is lossy), collects
/// responses until the deadline, deduplicates them by USN and fetches
/// each new device's description while the window is still open. The
/// window is a hard bound: descriptions still in flight when it closes
/// are abandoned and their devices left out.
pub mod description;

use crate::config::DiscoveryConfig;
use chrono::{DateTime, Utc};
use description::{fetch_description, DeviceDescription};
use dlna_caster_core::{root_uuid, CastError, Device, Result};
use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Standard SSDP multicast group and port
pub const SSDP_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

/// Search target matching every device and service
pub const SSDP_ALL: &str = "ssdp:all";

/// max-age assumed when a response carries no usable CACHE-CONTROL
const DEFAULT_MAX_AGE: u32 = 1800;

/// Largest UDP payload; SSDP responses are never split across datagrams
const MAX_DATAGRAM: usize = 65_535;

/// Header fields of one M-SEARCH response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub usn: String,
    pub location: String,
    pub st: String,
    pub max_age: u32,
    pub server: Option<String>,
}

/// Parse an M-SEARCH response datagram
pub fn parse_ssdp_response(text: &str) -> Result<SsdpResponse> {
    let mut lines = text.lines();
    let status = lines.next().unwrap_or("").trim();
    let mut status_parts = status.split_whitespace();
    let version_ok = status_parts
        .next()
        .map(|v| v.to_ascii_uppercase().starts_with("HTTP/1."))
        .unwrap_or(false);
    if !version_ok || status_parts.next() != Some("200") {
        return Err(CastError::DiscoveryParse(format!(
            "not a search response: {:?}",
            status
        )));
    }

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let usn = headers
        .remove("usn")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CastError::DiscoveryParse("response has no USN".to_string()))?;
    let location = headers
        .remove("location")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CastError::DiscoveryParse(format!("{} has no LOCATION", usn)))?;
    let max_age = headers
        .get("cache-control")
        .and_then(|v| parse_max_age(v))
        .unwrap_or(DEFAULT_MAX_AGE);

    Ok(SsdpResponse {
        usn,
        location,
        st: headers.remove("st").unwrap_or_default(),
        max_age,
        server: headers.remove("server"),
    })
}

fn parse_max_age(cache_control: &str) -> Option<u32> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

/// Build an M-SEARCH request
pub fn msearch_request(host: SocketAddr, service_type: &str, mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        host, mx, service_type
    )
}

fn matches_target(response_st: &str, service_type: &str) -> bool {
    service_type.eq_ignore_ascii_case(SSDP_ALL) || response_st.eq_ignore_ascii_case(service_type)
}

/// One USN seen during a search
#[derive(Debug, Clone)]
struct Sighting {
    response: SsdpResponse,
    source: SocketAddr,
    last_seen: DateTime<Utc>,
}

/// Deduplicates responses by USN, remembering first-seen order
#[derive(Debug, Default)]
struct Collector {
    order: Vec<String>,
    sightings: HashMap<String, Sighting>,
}

impl Collector {
    /// Record a response; true when the USN had not been seen before
    ///
    /// A repeat advertisement replaces the stored fields but keeps the
    /// USN's original position.
    fn observe(&mut self, response: SsdpResponse, source: SocketAddr) -> bool {
        let now = Utc::now();
        match self.sightings.get_mut(&response.usn) {
            Some(existing) => {
                existing.response = response;
                existing.source = source;
                existing.last_seen = now;
                false
            }
            None => {
                self.order.push(response.usn.clone());
                self.sightings.insert(
                    response.usn.clone(),
                    Sighting {
                        response,
                        source,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    fn into_ordered(mut self) -> Vec<Sighting> {
        self.order
            .iter()
            .filter_map(|usn| self.sightings.remove(usn))
            .collect()
    }
}

/// SSDP searcher
#[derive(Clone)]
pub struct Discovery {
    config: DiscoveryConfig,
    target: SocketAddr,
    http: reqwest::Client,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.description_timeout())
            .build()
            .map_err(|e| CastError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            target: SSDP_ADDR,
            http,
        })
    }

    /// Send searches to `target` instead of the multicast group (unicast M-SEARCH)
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Discover devices answering `service_type`, ordered by first sighting
    ///
    /// Returns by `timeout` even if description servers stall. An empty
    /// result is not an error. Socket failures abort the call; a
    /// malformed response or a description not fetched in time only drops
    /// that one device.
    pub async fn discover(&self, timeout: Duration, service_type: &str) -> Result<Vec<Device>> {
        info!(
            "Starting DLNA device discovery for {} ({:?} window)",
            service_type, timeout
        );

        let socket = create_ssdp_socket(self.target, self.config.ttl)?;
        let request = msearch_request(self.target, service_type, self.config.mx);

        let mut collector = Collector::default();
        let mut fetches: JoinSet<(String, Result<DeviceDescription>)> = JoinSet::new();
        let mut descriptions: HashMap<String, DeviceDescription> = HashMap::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        let deadline = Instant::now() + timeout;
        let mut next_send = Instant::now();
        let mut sent = 0u32;
        let mut malformed = 0u32;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    match joined {
                        Ok((usn, Ok(description))) => {
                            descriptions.insert(usn, description);
                        }
                        Ok((usn, Err(e))) => warn!("Dropping {}: {}", usn, e),
                        Err(e) => warn!("Description fetch task failed: {}", e),
                    }
                }
                _ = sleep_until(next_send), if sent < self.config.search_count => {
                    let bytes_sent = socket
                        .send_to(request.as_bytes(), self.target)
                        .await
                        .map_err(CastError::Socket)?;
                    sent += 1;
                    next_send += self.config.search_interval();
                    info!(
                        "Sent M-SEARCH for {} ({} bytes to {})",
                        service_type, bytes_sent, self.target
                    );
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, source) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("Socket error during discovery: {}", e);
                            continue;
                        }
                    };
                    let text = String::from_utf8_lossy(&buf[..len]);
                    debug!("SSDP response from {} ({} bytes): {}", source, len, text);

                    let response = match parse_ssdp_response(&text) {
                        Ok(r) => r,
                        Err(e) => {
                            malformed += 1;
                            debug!("Skipping response from {}: {}", source, e);
                            continue;
                        }
                    };
                    if !matches_target(&response.st, service_type) {
                        debug!("Ignoring {} advertising {}", response.usn, response.st);
                        continue;
                    }

                    let usn = response.usn.clone();
                    let location = response.location.clone();
                    let server = response.server.clone().unwrap_or_default();
                    if collector.observe(response, source) {
                        debug!("New device {} at {} ({})", usn, location, server);
                        let http = self.http.clone();
                        let description_timeout = self
                            .config
                            .description_timeout()
                            .min(deadline.saturating_duration_since(Instant::now()));
                        fetches.spawn(async move {
                            let result = fetch_description(&http, &location, description_timeout).await;
                            (usn, result)
                        });
                    }
                }
            }
        }

        if !fetches.is_empty() {
            warn!(
                "Abandoning {} description fetch(es) still running at the deadline",
                fetches.len()
            );
            fetches.abort_all();
        }

        let mut devices = Vec::new();
        let mut seen_roots = HashSet::new();
        for sighting in collector.into_ordered() {
            let Some(description) = descriptions.remove(&sighting.response.usn) else {
                continue;
            };
            // ssdp:all yields one USN per service of the same device
            if !seen_roots.insert(root_uuid(&sighting.response.usn).to_string()) {
                continue;
            }
            match build_device(&sighting, &description) {
                Some(device) => {
                    info!(
                        "Discovered DLNA device: {} ({})",
                        device.friendly_name, device.usn
                    );
                    devices.push(device);
                }
                None => debug!(
                    "{} has no AVTransport service, not a renderer",
                    sighting.response.usn
                ),
            }
        }

        if malformed > 0 {
            debug!("Skipped {} malformed SSDP response(s)", malformed);
        }
        info!("DLNA discovery complete, found {} device(s)", devices.len());
        Ok(devices)
    }

    /// First renderer whose friendly name contains `name` (case-insensitive)
    pub async fn find_device_by_name(&self, name: &str, timeout: Duration) -> Result<Device> {
        let devices = self.discover(timeout, &self.config.service_type).await?;
        let name_lower = name.to_lowercase();

        devices
            .into_iter()
            .find(|d| d.friendly_name.to_lowercase().contains(&name_lower))
            .ok_or(CastError::DiscoveryTimeout { timeout })
    }
}

fn build_device(sighting: &Sighting, description: &DeviceDescription) -> Option<Device> {
    let av_transport = description.av_transport()?;
    let rendering = description.rendering_control();

    let (host, port) = location_host_port(&sighting.response.location)
        .unwrap_or((sighting.source.ip(), sighting.source.port()));

    Some(Device {
        usn: sighting.response.usn.clone(),
        friendly_name: description.friendly_name.clone(),
        location: sighting.response.location.clone(),
        host,
        port,
        manufacturer: description.manufacturer.clone(),
        model_name: description.model_name.clone(),
        av_transport_url: av_transport.control_url.clone(),
        av_transport_type: av_transport.service_type.clone(),
        rendering_control_url: rendering.map(|s| s.control_url.clone()),
        rendering_control_type: rendering.map(|s| s.service_type.clone()),
        max_age: sighting.response.max_age,
        discovered_at: sighting.last_seen,
    })
}

fn location_host_port(location: &str) -> Option<(IpAddr, u16)> {
    let url = Url::parse(location).ok()?;
    let host: IpAddr = url
        .host_str()?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()?;
    Some((host, url.port_or_known_default()?))
}

/// Create a UDP socket for SSDP search
fn create_ssdp_socket(target: SocketAddr, ttl: u32) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(CastError::Socket)?;

    // Coexist with other UPnP software on this host
    socket.set_reuse_address(true).map_err(CastError::Socket)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(CastError::Socket)?;

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], 0));
    socket
        .bind(&bind_addr.into())
        .map_err(CastError::Socket)?;

    if let IpAddr::V4(group) = target.ip() {
        if group.is_multicast() {
            socket
                .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| {
                    warn!("Failed to join multicast group {}: {}", group, e);
                    CastError::Socket(e)
                })?;
            socket
                .set_multicast_ttl_v4(ttl)
                .map_err(CastError::Socket)?;
            debug!("Joined SSDP multicast group {}", group);
        }
    }

    socket.set_nonblocking(true).map_err(CastError::Socket)?;
    let socket = UdpSocket::from_std(socket.into()).map_err(CastError::Socket)?;

    if let Ok(local) = socket.local_addr() {
        debug!("SSDP socket bound to {}", local);
    }
    Ok(socket)
}
