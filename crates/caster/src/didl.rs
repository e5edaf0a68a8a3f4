/// DIDL-Lite XML metadata generation for UPnP/DLNA
///
/// DIDL-Lite is the metadata format renderers read from
/// `CurrentURIMetaData` to decide how to present and fetch an item.
use crate::profiles::{content_features, profile_for_mime, protocol_info, subtitle_profile, TrickModes};
use dlna_caster_core::MediaResource;
use quick_xml::escape::escape;

/// One `<res>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidlResource {
    pub url: String,
    pub protocol_info: String,
    pub size: Option<u64>,
}

/// Metadata for a single DIDL-Lite item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub title: String,
    pub upnp_class: String,
    /// Primary resource first, then side resources such as subtitles
    pub resources: Vec<DidlResource>,
}

impl MediaMetadata {
    /// Metadata for a registered media resource and its subtitle URLs
    ///
    /// `subtitle_urls` pairs up with `media.subtitles` by position.
    pub fn for_media(media: &MediaResource, media_url: &str, subtitle_urls: &[String]) -> Self {
        let profile = profile_for_mime(&media.mime_type);
        let features = content_features(
            media.dlna_profile.as_deref(),
            profile.transfer_mode,
            TrickModes::BYTE_SEEK,
        );

        let mut resources = vec![DidlResource {
            url: media_url.to_string(),
            protocol_info: protocol_info(&media.mime_type, &features),
            size: Some(media.size),
        }];

        let subtitle_features = subtitle_profile().content_features(TrickModes::default());
        for (subtitle, url) in media.subtitles.iter().zip(subtitle_urls) {
            resources.push(DidlResource {
                url: url.clone(),
                protocol_info: protocol_info(&subtitle.mime_type, &subtitle_features),
                size: Some(subtitle.size),
            });
        }

        Self {
            title: media.title(),
            upnp_class: profile.upnp_class.to_string(),
            resources,
        }
    }
}

/// Generate DIDL-Lite XML for a media item
pub fn generate_didl_lite(metadata: &MediaMetadata) -> String {
    let mut didl = String::new();

    didl.push_str(r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#);
    didl.push_str(r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#);
    didl.push_str(r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#);

    didl.push_str(r#"<item id="0" parentID="0" restricted="1">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape(metadata.title.as_str())));
    didl.push_str(&format!(
        "<upnp:class>{}</upnp:class>",
        escape(metadata.upnp_class.as_str())
    ));

    for res in &metadata.resources {
        didl.push_str(&format!(
            r#"<res protocolInfo="{}""#,
            escape(res.protocol_info.as_str())
        ));
        if let Some(size) = res.size {
            didl.push_str(&format!(r#" size="{}""#, size));
        }
        didl.push('>');
        didl.push_str(&escape(res.url.as_str()));
        didl.push_str("</res>");
    }

    didl.push_str("</item>");
    didl.push_str("</DIDL-Lite>");

    didl
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlna_caster_core::SubtitleResource;
    use std::path::PathBuf;

    fn movie() -> MediaResource {
        MediaResource {
            path: PathBuf::from("/media/Tom & Jerry.mp4"),
            size: 10_000,
            mime_type: "video/mp4".to_string(),
            dlna_profile: Some("AVC_MP4_HD_24_AC3".to_string()),
            subtitles: vec![SubtitleResource {
                path: PathBuf::from("/media/Tom & Jerry.srt"),
                mime_type: "text/srt".to_string(),
                size: 42,
            }],
        }
    }

    #[test]
    fn test_generate_didl_for_media() {
        let metadata = MediaMetadata::for_media(
            &movie(),
            "http://10.0.0.2:8200/media/abc/Tom%20%26%20Jerry.mp4",
            &["http://10.0.0.2:8200/media/def/Tom%20%26%20Jerry.srt".to_string()],
        );
        let didl = generate_didl_lite(&metadata);

        assert!(didl.contains("<dc:title>Tom &amp; Jerry</dc:title>"));
        assert!(didl.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(didl.contains(
            r#"protocolInfo="http-get:*:video/mp4:DLNA.ORG_PN=AVC_MP4_HD_24_AC3;DLNA.ORG_OP=01;"#
        ));
        assert!(didl.contains(r#"size="10000""#));
        assert!(didl.contains("Tom%20%26%20Jerry.mp4</res>"));
        assert!(didl.contains("http-get:*:text/srt:DLNA.ORG_OP=00;"));
        assert_eq!(didl.matches("<res ").count(), 2);
    }

    #[test]
    fn test_resource_profile_name_is_used() {
        let mut media = movie();
        media.dlna_profile = Some("AVC_MP4_BL_CIF15_AAC_520".to_string());
        let metadata = MediaMetadata::for_media(&media, "http://h/m.mp4", &[]);
        assert_eq!(
            metadata.resources[0].protocol_info,
            "http-get:*:video/mp4:DLNA.ORG_PN=AVC_MP4_BL_CIF15_AAC_520;DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000"
        );

        media.dlna_profile = None;
        let metadata = MediaMetadata::for_media(&media, "http://h/m.mp4", &[]);
        assert!(metadata.resources[0]
            .protocol_info
            .starts_with("http-get:*:video/mp4:DLNA.ORG_OP=01;"));
    }

    #[test]
    fn test_generate_didl_escapes_url() {
        let metadata = MediaMetadata {
            title: "<Live>".to_string(),
            upnp_class: "object.item".to_string(),
            resources: vec![DidlResource {
                url: "http://host/a?x=1&y=2".to_string(),
                protocol_info: "http-get:*:audio/flac:*".to_string(),
                size: None,
            }],
        };
        let didl = generate_didl_lite(&metadata);

        assert!(didl.contains("<dc:title>&lt;Live&gt;</dc:title>"));
        assert!(didl.contains("http://host/a?x=1&amp;y=2</res>"));
        assert!(!didl.contains("size="));
    }
}
