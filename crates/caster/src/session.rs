/// Playback session state machine
///
/// One session binds one device to one published media resource:
///
/// ```text
/// Idle -> Preparing -> Playing <-> Paused -> Stopped
///              \______________________\____> Error
/// ```
///
/// Commands are serialized by a mutex held across the SOAP round-trip,
/// so concurrent pause/seek/stop calls cannot interleave. The state is
/// only written by the command that just finished its call.
use crate::config::{ControlConfig, StopPolicy};
use crate::didl::{generate_didl_lite, MediaMetadata};
use crate::server::{PublishedMedia, StreamServer};
use crate::soap::{AvTransport, RenderingControl};
use dlna_caster_core::{
    CastError, ControlPoint, Device, MediaResource, Result, SeekTarget, SessionState,
    SessionStatus, TransportState,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// A device playing one media resource
pub struct PlaybackSession {
    device: Device,
    media: MediaResource,
    published: PublishedMedia,
    avtransport: AvTransport,
    rendering: Option<RenderingControl>,
    server: Arc<StreamServer>,
    config: ControlConfig,
    commands: Mutex<()>,
    status: watch::Sender<SessionStatus>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("device", &self.device)
            .field("media", &self.media)
            .field("published", &self.published)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PlaybackSession {
    /// Bind a device to an already published resource; starts `Idle`
    pub fn new(
        device: Device,
        media: MediaResource,
        published: PublishedMedia,
        control: Arc<dyn ControlPoint>,
        server: Arc<StreamServer>,
        config: ControlConfig,
    ) -> Self {
        let avtransport = AvTransport::for_device(control.clone(), &device, config.instance_id);
        let rendering = RenderingControl::for_device(control, &device, config.instance_id);
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Idle,
            transport_state: None,
            position: None,
            duration: None,
            volume: None,
            muted: None,
        });

        Self {
            device,
            media,
            published,
            avtransport,
            rendering,
            server,
            config,
            commands: Mutex::new(()),
            status,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn media(&self) -> &MediaResource {
        &self.media
    }

    pub fn media_url(&self) -> &str {
        &self.published.url
    }

    pub fn subtitle_urls(&self) -> &[String] {
        &self.published.subtitle_urls
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Last known status without touching the network
    pub fn snapshot(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let mut previous = state;
        self.status.send_modify(|s| {
            previous = s.state;
            s.state = state;
        });
        if previous != state {
            info!(
                "Session on {}: {} -> {}",
                self.device.friendly_name, previous, state
            );
        }
    }

    fn require(&self, command: &'static str, allowed: &[SessionState]) -> Result<SessionState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(CastError::SessionState { command, state })
        }
    }

    async fn release(&self) {
        if self.server.unregister(&self.published.url).await {
            debug!("Released {}", self.published.url);
        }
    }

    /// Move to Error when a failure leaves the renderer unusable
    async fn on_command_error(&self, err: &CastError) {
        if err.is_session_fatal() {
            error!(
                "Session on {} is no longer valid: {}",
                self.device.friendly_name, err
            );
            self.set_state(SessionState::Error);
            self.release().await;
        }
    }

    /// Hand the media URL to the renderer and start playback
    ///
    /// Any failure moves the session to Error and releases the resource;
    /// the error is returned as reported by the device.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        self.require("start", &[SessionState::Idle])?;
        self.set_state(SessionState::Preparing);

        match self.prepare().await {
            Ok(()) => {
                self.set_state(SessionState::Playing);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to start playback on {}: {}",
                    self.device.friendly_name, e
                );
                self.set_state(SessionState::Error);
                self.release().await;
                Err(e)
            }
        }
    }

    async fn prepare(&self) -> Result<()> {
        let metadata = if self.config.send_metadata {
            generate_didl_lite(&MediaMetadata::for_media(
                &self.media,
                &self.published.url,
                &self.published.subtitle_urls,
            ))
        } else {
            String::new()
        };

        self.set_uri_with_fallback(&metadata).await?;
        self.avtransport.play().await
    }

    /// Renderers that reject our DIDL-Lite get one retry without metadata
    async fn set_uri_with_fallback(&self, metadata: &str) -> Result<()> {
        let uri = &self.published.url;
        match self.avtransport.set_av_transport_uri(uri, metadata).await {
            Err(CastError::ControlFault {
                code, description, ..
            }) if !metadata.is_empty() => {
                warn!(
                    "{} rejected metadata (fault {:?}: {}), retrying without it",
                    self.device.friendly_name, code, description
                );
                self.avtransport.set_av_transport_uri(uri, "").await
            }
            other => other,
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        self.require("pause", &[SessionState::Playing])?;

        match self.avtransport.pause().await {
            Ok(()) => {
                self.set_state(SessionState::Paused);
                Ok(())
            }
            Err(e) => {
                self.on_command_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn resume(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        self.require("resume", &[SessionState::Paused])?;

        match self.avtransport.play().await {
            Ok(()) => {
                self.set_state(SessionState::Playing);
                Ok(())
            }
            Err(e) => {
                self.on_command_error(&e).await;
                Err(e)
            }
        }
    }

    /// Seek within the media; the session state is unchanged
    pub async fn seek(&self, target: SeekTarget) -> Result<()> {
        let _guard = self.commands.lock().await;
        self.require("seek", &[SessionState::Playing, SessionState::Paused])?;

        match self.avtransport.seek(target).await {
            Ok(()) => {
                let (SeekTarget::Relative(position) | SeekTarget::Absolute(position)) = target;
                self.status.send_modify(|s| s.position = Some(position));
                Ok(())
            }
            Err(e) => {
                self.on_command_error(&e).await;
                Err(e)
            }
        }
    }

    /// Stop playback and release the resource
    ///
    /// The resource is unregistered before anything is sent, so new range
    /// requests get 404 at once. The session ends Stopped even when the
    /// device cannot be reached; that failure is still returned. Stopping
    /// a session that already ended does nothing.
    pub async fn stop(&self) -> Result<()> {
        self.release().await;

        let _guard = self.commands.lock().await;
        let state = self.state();
        if state.is_terminal() {
            debug!("Session already {}, nothing to stop", state);
            return Ok(());
        }
        if state == SessionState::Idle {
            self.set_state(SessionState::Stopped);
            return Ok(());
        }

        let result = self.avtransport.stop().await;
        if let Err(e) = &result {
            warn!(
                "Stop was not delivered to {}: {}",
                self.device.friendly_name, e
            );
        }

        let clear_uri = match self.config.stop_policy {
            StopPolicy::StopOnly => false,
            StopPolicy::ClearUriOnFailure => result.is_err(),
            StopPolicy::AlwaysClearUri => true,
        };
        if clear_uri {
            if let Err(e) = self.avtransport.set_av_transport_uri("", "").await {
                warn!("Clearing transport URI failed: {}", e);
            }
        }

        self.status.send_modify(|s| {
            s.transport_state = Some(TransportState::Stopped);
        });
        self.set_state(SessionState::Stopped);
        result
    }

    /// Set the volume (clamped to 0..=100); allowed in any live state
    pub async fn set_volume(&self, volume: i32) -> Result<u8> {
        let _guard = self.commands.lock().await;
        self.require_live("set volume")?;
        let rendering = self
            .rendering
            .as_ref()
            .ok_or(CastError::MissingService("RenderingControl"))?;

        match rendering.set_volume(volume).await {
            Ok(sent) => {
                self.status.send_modify(|s| s.volume = Some(sent));
                Ok(sent)
            }
            Err(e) => {
                self.on_command_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        let _guard = self.commands.lock().await;
        self.require_live("set mute")?;
        let rendering = self
            .rendering
            .as_ref()
            .ok_or(CastError::MissingService("RenderingControl"))?;

        match rendering.set_mute(muted).await {
            Ok(()) => {
                self.status.send_modify(|s| s.muted = Some(muted));
                Ok(())
            }
            Err(e) => {
                self.on_command_error(&e).await;
                Err(e)
            }
        }
    }

    fn require_live(&self, command: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            Err(CastError::SessionState { command, state })
        } else {
            Ok(())
        }
    }

    /// Poll the device and reconcile local state with what it reports
    ///
    /// GetTransportInfo must succeed; position and rendering queries are
    /// best-effort. A renderer that reports STOPPED or NO_MEDIA_PRESENT
    /// while we think it is playing has finished: the session moves to
    /// Stopped and the resource is released without sending Stop.
    pub async fn get_status(&self) -> Result<SessionStatus> {
        let _guard = self.commands.lock().await;
        if self.state().is_terminal() {
            return Ok(self.snapshot());
        }

        let info = match self.avtransport.get_transport_info().await {
            Ok(info) => info,
            Err(e) => {
                self.on_command_error(&e).await;
                return Err(e);
            }
        };

        let position = match self.avtransport.get_position_info().await {
            Ok(position) => Some(position),
            Err(e) => {
                debug!("GetPositionInfo failed: {}", e);
                None
            }
        };

        let mut media_duration = None;
        if position.as_ref().and_then(|p| p.track_duration).is_none() {
            match self.avtransport.get_media_info().await {
                Ok(media) => media_duration = media.media_duration,
                Err(e) => debug!("GetMediaInfo failed: {}", e),
            }
        }

        let (volume, muted) = match &self.rendering {
            Some(rendering) => (
                rendering.get_volume().await.unwrap_or_else(|e| {
                    debug!("GetVolume failed: {}", e);
                    None
                }),
                rendering.get_mute().await.unwrap_or_else(|e| {
                    debug!("GetMute failed: {}", e);
                    None
                }),
            ),
            None => (None, None),
        };

        self.status.send_modify(|s| {
            s.transport_state = Some(info.state.clone());
            if let Some(position) = &position {
                s.position = position.rel_time.or(s.position);
                s.duration = position.track_duration.or(s.duration);
            }
            s.duration = s.duration.or(media_duration);
            s.volume = volume.or(s.volume);
            s.muted = muted.or(s.muted);
        });

        let state = self.state();
        match (state, &info.state) {
            (SessionState::Playing, TransportState::PausedPlayback) => {
                self.set_state(SessionState::Paused)
            }
            (SessionState::Paused, TransportState::Playing) => {
                self.set_state(SessionState::Playing)
            }
            (SessionState::Playing | SessionState::Paused, reported) if reported.is_terminal() => {
                info!(
                    "{} reports {}, ending session",
                    self.device.friendly_name, reported
                );
                self.set_state(SessionState::Stopped);
                self.release().await;
            }
            _ => {}
        }

        Ok(self.snapshot())
    }
}
