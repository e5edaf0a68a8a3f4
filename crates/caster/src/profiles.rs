/// DLNA profile table
///
/// Renderers decide whether they can play a resource from the
/// `contentFeatures.dlna.org` header and the DIDL-Lite `protocolInfo`.
/// The table gives each MIME type its class, transfer mode and default
/// profile name; a resource may carry a different name of its own. There
/// are no per-device code paths.

/// DLNA.ORG_FLAGS bits (DLNA guidelines 7.4.1.3.24)
const FLAG_STREAMING_TRANSFER: u32 = 1 << 24;
const FLAG_INTERACTIVE_TRANSFER: u32 = 1 << 23;
const FLAG_BACKGROUND_TRANSFER: u32 = 1 << 22;
const FLAG_CONNECTION_STALL: u32 = 1 << 21;
const FLAG_DLNA_V15: u32 = 1 << 20;

/// One row of the profile table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlnaProfile {
    /// DLNA.ORG_PN value, if the format has a registered profile name
    pub name: Option<&'static str>,
    /// upnp:class for DIDL-Lite
    pub upnp_class: &'static str,
    pub transfer_mode: TransferMode,
}

/// transferMode.dlna.org values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Streaming,
    Interactive,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Streaming => "Streaming",
            TransferMode::Interactive => "Interactive",
        }
    }
}

/// Seek operations advertised in DLNA.ORG_OP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrickModes {
    /// TimeSeekRange.dlna.org support
    pub time_seek: bool,
    /// HTTP byte Range support
    pub byte_seek: bool,
}

impl TrickModes {
    /// What the streaming server actually implements: byte ranges only
    pub const BYTE_SEEK: TrickModes = TrickModes {
        time_seek: false,
        byte_seek: true,
    };

    fn op_param(&self) -> &'static str {
        match (self.time_seek, self.byte_seek) {
            (true, true) => "11",
            (true, false) => "10",
            (false, true) => "01",
            (false, false) => "00",
        }
    }
}

const VIDEO_CLASS: &str = "object.item.videoItem";
const AUDIO_CLASS: &str = "object.item.audioItem.musicTrack";
const IMAGE_CLASS: &str = "object.item.imageItem.photo";
const GENERIC_CLASS: &str = "object.item";

/// Exact MIME matches, checked before the family fallbacks
const PROFILE_TABLE: &[(&str, DlnaProfile)] = &[
    (
        "video/mp4",
        DlnaProfile {
            name: Some("AVC_MP4_HD_24_AC3"),
            upnp_class: VIDEO_CLASS,
            transfer_mode: TransferMode::Streaming,
        },
    ),
    (
        "video/x-matroska",
        DlnaProfile {
            name: Some("AVC_MKV_HD_24_AC3"),
            upnp_class: VIDEO_CLASS,
            transfer_mode: TransferMode::Streaming,
        },
    ),
    (
        "audio/mpeg",
        DlnaProfile {
            name: Some("MP3"),
            upnp_class: AUDIO_CLASS,
            transfer_mode: TransferMode::Streaming,
        },
    ),
    (
        "image/jpeg",
        DlnaProfile {
            name: Some("JPEG_LRG"),
            upnp_class: IMAGE_CLASS,
            transfer_mode: TransferMode::Interactive,
        },
    ),
];

/// Pick the profile for a MIME type
pub fn profile_for_mime(mime_type: &str) -> DlnaProfile {
    let mime = mime_type.trim().to_ascii_lowercase();

    if let Some((_, profile)) = PROFILE_TABLE.iter().find(|(m, _)| *m == mime) {
        return *profile;
    }

    let (upnp_class, transfer_mode) = if mime.starts_with("video/") {
        (VIDEO_CLASS, TransferMode::Streaming)
    } else if mime.starts_with("audio/") {
        (AUDIO_CLASS, TransferMode::Streaming)
    } else if mime.starts_with("image/") {
        (IMAGE_CLASS, TransferMode::Interactive)
    } else {
        (GENERIC_CLASS, TransferMode::Interactive)
    };

    DlnaProfile {
        name: None,
        upnp_class,
        transfer_mode,
    }
}

/// Profile used for subtitle side resources
pub fn subtitle_profile() -> DlnaProfile {
    DlnaProfile {
        name: None,
        upnp_class: GENERIC_CLASS,
        transfer_mode: TransferMode::Interactive,
    }
}

fn flags(transfer_mode: TransferMode) -> u32 {
    let transfer = match transfer_mode {
        TransferMode::Streaming => FLAG_STREAMING_TRANSFER,
        TransferMode::Interactive => FLAG_INTERACTIVE_TRANSFER,
    };
    transfer | FLAG_BACKGROUND_TRANSFER | FLAG_CONNECTION_STALL | FLAG_DLNA_V15
}

impl DlnaProfile {
    /// Value of the `contentFeatures.dlna.org` header with this row's own PN
    pub fn content_features(&self, trick_modes: TrickModes) -> String {
        content_features(self.name, self.transfer_mode, trick_modes)
    }
}

/// Value of the `contentFeatures.dlna.org` header
///
/// `profile_name` is the resource's DLNA.ORG_PN, which a caller may have
/// chosen differently from the MIME table.
pub fn content_features(
    profile_name: Option<&str>,
    transfer_mode: TransferMode,
    trick_modes: TrickModes,
) -> String {
    let mut features = String::new();
    if let Some(name) = profile_name.filter(|n| !n.is_empty()) {
        features.push_str(&format!("DLNA.ORG_PN={};", name));
    }
    features.push_str(&format!(
        "DLNA.ORG_OP={};DLNA.ORG_CI=0;DLNA.ORG_FLAGS={:08x}{}",
        trick_modes.op_param(),
        flags(transfer_mode),
        "0".repeat(24)
    ));
    features
}

/// DIDL-Lite `protocolInfo` attribute for an HTTP resource
pub fn protocol_info(mime_type: &str, content_features: &str) -> String {
    format!("http-get:*:{}:{}", mime_type, content_features)
}
