use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Search target for DLNA media renderers
pub const MEDIA_RENDERER_URN: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
/// AVTransport service type
pub const AV_TRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";
/// RenderingControl service type
pub const RENDERING_CONTROL_URN: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// A discovered DLNA media renderer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique service name from the SSDP advertisement (identity key)
    pub usn: String,
    pub friendly_name: String,
    /// URL of the device description document
    pub location: String,
    pub host: IpAddr,
    pub port: u16,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    /// Absolute AVTransport control URL
    pub av_transport_url: String,
    /// Service type the device advertises for AVTransport (version may differ)
    pub av_transport_type: String,
    pub rendering_control_url: Option<String>,
    pub rendering_control_type: Option<String>,
    /// CACHE-CONTROL max-age in seconds
    pub max_age: u32,
    pub discovered_at: DateTime<Utc>,
}

/// Strip the service/device suffix from a USN
pub fn root_uuid(usn: &str) -> &str {
    usn.split("::").next().unwrap_or(usn)
}

/// A subtitle file exposed next to a media resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleResource {
    pub path: PathBuf,
    pub mime_type: String,
    pub size: u64,
}

/// A local file made servable over HTTP
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResource {
    /// Absolute path, fixed at registration
    pub path: PathBuf,
    /// Byte size captured at registration; files are not expected to grow
    pub size: u64,
    pub mime_type: String,
    /// DLNA.ORG_PN token, when the format has one
    pub dlna_profile: Option<String>,
    pub subtitles: Vec<SubtitleResource>,
}

impl MediaResource {
    /// Display title (file stem)
    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    }

    /// File name used as the last URL segment
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string())
    }
}

/// AVTransport CurrentTransportState values
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Stopped,
    Playing,
    Transitioning,
    PausedPlayback,
    PausedRecording,
    Recording,
    NoMediaPresent,
    /// Vendor-specific value, kept verbatim
    Other(String),
}

impl TransportState {
    pub fn as_str(&self) -> &str {
        match self {
            TransportState::Stopped => "STOPPED",
            TransportState::Playing => "PLAYING",
            TransportState::Transitioning => "TRANSITIONING",
            TransportState::PausedPlayback => "PAUSED_PLAYBACK",
            TransportState::PausedRecording => "PAUSED_RECORDING",
            TransportState::Recording => "RECORDING",
            TransportState::NoMediaPresent => "NO_MEDIA_PRESENT",
            TransportState::Other(s) => s,
        }
    }

    /// The renderer has nothing left to play
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Stopped | TransportState::NoMediaPresent)
    }
}

impl FromStr for TransportState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "STOPPED" => TransportState::Stopped,
            "PLAYING" => TransportState::Playing,
            "TRANSITIONING" => TransportState::Transitioning,
            "PAUSED_PLAYBACK" => TransportState::PausedPlayback,
            "PAUSED_RECORDING" => TransportState::PausedRecording,
            "RECORDING" => TransportState::Recording,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            other => TransportState::Other(other.to_string()),
        })
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of GetTransportInfo
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    pub state: TransportState,
    /// OK, ERROR_OCCURRED, ...
    pub status: String,
}

/// Result of GetPositionInfo
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub track_duration: Option<Duration>,
    pub rel_time: Option<Duration>,
}

/// Result of GetMediaInfo
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub media_duration: Option<Duration>,
    pub current_uri: Option<String>,
}

/// Local lifecycle of a playback session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }

    /// No transition leaves Stopped or Error
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seek destination for AVTransport Seek
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekTarget {
    /// REL_TIME: position within the current track
    Relative(Duration),
    /// ABS_TIME: position within the whole media
    Absolute(Duration),
}

impl SeekTarget {
    pub fn unit(&self) -> &'static str {
        match self {
            SeekTarget::Relative(_) => "REL_TIME",
            SeekTarget::Absolute(_) => "ABS_TIME",
        }
    }

    pub fn target(&self) -> String {
        match self {
            SeekTarget::Relative(d) | SeekTarget::Absolute(d) => crate::time::format_hms(*d),
        }
    }
}

/// Snapshot returned to callers by get_status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Last transport state reported by the device
    pub transport_state: Option<TransportState>,
    pub position: Option<Duration>,
    pub duration: Option<Duration>,
    pub volume: Option<u8>,
    pub muted: Option<bool>,
}

/// Ordered name/value pairs for SOAP action arguments
///
/// UPnP requires in-arguments in the order the service description lists
/// them, so this is a list rather than a map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arguments(Vec<(String, String)>);

impl Arguments {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an argument (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value with this name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
