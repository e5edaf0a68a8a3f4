/// AVTransport control for UPnP MediaRenderers
///
/// Typed wrapper over a `ControlPoint`:
/// - Set the media URL on a renderer (SetAVTransportURI)
/// - Transport commands (Play, Pause, Stop, Seek)
/// - Status queries (GetTransportInfo, GetPositionInfo, GetMediaInfo)
use dlna_caster_core::{
    parse_hms, Arguments, ControlPoint, Device, MediaInfo, PositionInfo, Result, SeekTarget,
    TransportInfo, TransportState,
};
use std::sync::Arc;
use tracing::{debug, info};

/// AVTransport controller for one renderer instance
#[derive(Clone)]
pub struct AvTransport {
    control: Arc<dyn ControlPoint>,
    control_url: String,
    service_type: String,
    instance_id: u32,
}

impl AvTransport {
    pub fn new(
        control: Arc<dyn ControlPoint>,
        control_url: impl Into<String>,
        service_type: impl Into<String>,
        instance_id: u32,
    ) -> Self {
        Self {
            control,
            control_url: control_url.into(),
            service_type: service_type.into(),
            instance_id,
        }
    }

    /// Controller for a discovered device's AVTransport service
    pub fn for_device(control: Arc<dyn ControlPoint>, device: &Device, instance_id: u32) -> Self {
        Self::new(
            control,
            device.av_transport_url.clone(),
            device.av_transport_type.clone(),
            instance_id,
        )
    }

    fn args(&self) -> Arguments {
        Arguments::new().with("InstanceID", self.instance_id.to_string())
    }

    async fn call(&self, action: &str, args: Arguments) -> Result<Arguments> {
        self.control
            .invoke(&self.control_url, &self.service_type, action, &args)
            .await
    }

    /// Tell the renderer which URL to pull; `metadata` is DIDL-Lite or empty
    pub async fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<()> {
        info!("Setting AVTransport URI: {}", uri);
        let args = self
            .args()
            .with("CurrentURI", uri)
            .with("CurrentURIMetaData", metadata);
        self.call("SetAVTransportURI", args).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.call("Play", self.args().with("Speed", "1")).await?;
        info!("Playback started");
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.call("Pause", self.args()).await?;
        info!("Playback paused");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.call("Stop", self.args()).await?;
        info!("Playback stopped");
        Ok(())
    }

    pub async fn seek(&self, target: SeekTarget) -> Result<()> {
        let args = self
            .args()
            .with("Unit", target.unit())
            .with("Target", target.target());
        self.call("Seek", args).await?;
        info!("Seeked to {} ({})", target.target(), target.unit());
        Ok(())
    }

    /// Get transport state (PLAYING, STOPPED, PAUSED_PLAYBACK, etc.)
    pub async fn get_transport_info(&self) -> Result<TransportInfo> {
        let response = self.call("GetTransportInfo", self.args()).await?;

        let state = response
            .get("CurrentTransportState")
            .unwrap_or("")
            .parse::<TransportState>()
            .unwrap_or_else(|never| match never {});
        let status = response
            .get("CurrentTransportStatus")
            .unwrap_or("OK")
            .to_string();

        debug!("Transport state {} ({})", state, status);
        Ok(TransportInfo { state, status })
    }

    pub async fn get_position_info(&self) -> Result<PositionInfo> {
        let response = self.call("GetPositionInfo", self.args()).await?;

        Ok(PositionInfo {
            track_duration: response.get("TrackDuration").and_then(parse_hms),
            rel_time: response.get("RelTime").and_then(parse_hms),
        })
    }

    pub async fn get_media_info(&self) -> Result<MediaInfo> {
        let response = self.call("GetMediaInfo", self.args()).await?;

        Ok(MediaInfo {
            media_duration: response.get("MediaDuration").and_then(parse_hms),
            current_uri: response
                .get("CurrentURI")
                .filter(|uri| !uri.is_empty())
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls and answers every action with a fixed reply
    struct Recorder {
        calls: Mutex<Vec<(String, Arguments)>>,
        reply: Arguments,
    }

    #[async_trait]
    impl ControlPoint for Recorder {
        async fn invoke(
            &self,
            _control_url: &str,
            _service_type: &str,
            action: &str,
            args: &Arguments,
        ) -> Result<Arguments> {
            self.calls
                .lock()
                .unwrap()
                .push((action.to_string(), args.clone()));
            Ok(self.reply.clone())
        }
    }

    fn transport(reply: Arguments) -> (Arc<Recorder>, AvTransport) {
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            reply,
        });
        let avt = AvTransport::new(
            recorder.clone(),
            "http://10.0.0.5:49152/ctl/AVTransport",
            dlna_caster_core::AV_TRANSPORT_URN,
            0,
        );
        (recorder, avt)
    }

    #[tokio::test]
    async fn test_seek_arguments() {
        let (recorder, avt) = transport(Arguments::new());
        avt.seek(SeekTarget::Relative(Duration::from_secs(95)))
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        let (action, args) = &calls[0];
        assert_eq!(action, "Seek");
        let pairs: Vec<(&str, &str)> = args.iter().collect();
        assert_eq!(
            pairs,
            vec![("InstanceID", "0"), ("Unit", "REL_TIME"), ("Target", "00:01:35")]
        );
    }

    #[tokio::test]
    async fn test_play_sends_speed() {
        let (recorder, avt) = transport(Arguments::new());
        avt.play().await.unwrap();
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].1.get("Speed"), Some("1"));
    }

    #[tokio::test]
    async fn test_transport_and_position_parsing() {
        let reply = Arguments::new()
            .with("CurrentTransportState", "PAUSED_PLAYBACK")
            .with("CurrentTransportStatus", "OK")
            .with("TrackDuration", "0:04:10")
            .with("RelTime", "NOT_IMPLEMENTED");
        let (_, avt) = transport(reply);

        let info = avt.get_transport_info().await.unwrap();
        assert_eq!(info.state, TransportState::PausedPlayback);

        let position = avt.get_position_info().await.unwrap();
        assert_eq!(position.track_duration, Some(Duration::from_secs(250)));
        assert_eq!(position.rel_time, None);
    }

    #[tokio::test]
    async fn test_media_info_empty_uri() {
        let reply = Arguments::new()
            .with("MediaDuration", "01:00:00")
            .with("CurrentURI", "");
        let (_, avt) = transport(reply);

        let info = avt.get_media_info().await.unwrap();
        assert_eq!(info.media_duration, Some(Duration::from_secs(3600)));
        assert_eq!(info.current_uri, None);
    }
}
