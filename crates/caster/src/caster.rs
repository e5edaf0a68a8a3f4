use crate::config::CasterConfig;
use crate::discovery::Discovery;
use crate::media::inspect_media;
use crate::net::advertise_host;
use crate::server::StreamServer;
use crate::session::PlaybackSession;
use crate::soap::SoapClient;
use dlna_caster_core::{ControlPoint, Device, Result, SubtitleResource};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Entry point for callers: discovery, sessions and the shared server
pub struct Caster {
    config: CasterConfig,
    server: Arc<StreamServer>,
    server_task: Mutex<Option<JoinHandle<()>>>,
    control: Arc<dyn ControlPoint>,
    discovery: Discovery,
    sessions: Mutex<Vec<Weak<PlaybackSession>>>,
}

impl Caster {
    /// Validate the configuration, bind the streaming server and start serving
    pub async fn start(config: CasterConfig) -> Result<Self> {
        config.validate()?;

        let server = Arc::new(StreamServer::bind(&config.server).await?);
        let server_task = server.spawn();
        let control: Arc<dyn ControlPoint> = Arc::new(SoapClient::new(config.control.timeout())?);
        let discovery = Discovery::new(config.discovery.clone())?;

        info!("Caster ready, streaming from {}", server.local_addr());

        Ok(Self {
            config,
            server,
            server_task: Mutex::new(Some(server_task)),
            control,
            discovery,
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Use another control transport for sessions created from now on
    pub fn with_control_point(mut self, control: Arc<dyn ControlPoint>) -> Self {
        self.control = control;
        self
    }

    /// Replace the searcher, e.g. one aimed at a unicast SSDP target
    pub fn with_discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn config(&self) -> &CasterConfig {
        &self.config
    }

    pub fn server(&self) -> &Arc<StreamServer> {
        &self.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Discover media renderers
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<Device>> {
        self.discovery
            .discover(timeout, &self.config.discovery.service_type)
            .await
    }

    /// Discover devices answering a specific search target
    pub async fn discover_with(&self, timeout: Duration, service_type: &str) -> Result<Vec<Device>> {
        self.discovery.discover(timeout, service_type).await
    }

    /// Find a renderer by (partial, case-insensitive) friendly name
    pub async fn find_device_by_name(&self, name: &str, timeout: Duration) -> Result<Device> {
        self.discovery.find_device_by_name(name, timeout).await
    }

    /// Publish a file for `device` and return an idle session
    pub async fn prepare_session(
        &self,
        device: &Device,
        file_path: impl AsRef<Path>,
        subtitles: Vec<SubtitleResource>,
    ) -> Result<Arc<PlaybackSession>> {
        let media = inspect_media(file_path, subtitles)?;
        let host = advertise_host(
            self.config.server.advertise_host,
            device.host,
            self.server.local_addr(),
        )?;
        let published = self.server.register(&media, host).await?;

        let session = Arc::new(PlaybackSession::new(
            device.clone(),
            media,
            published,
            self.control.clone(),
            self.server.clone(),
            self.config.control.clone(),
        ));

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&session));

        Ok(session)
    }

    /// Publish a file and start playing it on `device`
    ///
    /// On failure the resource is already released and the device's
    /// error is returned unchanged.
    pub async fn start_session(
        &self,
        device: &Device,
        file_path: impl AsRef<Path>,
        subtitles: Vec<SubtitleResource>,
    ) -> Result<Arc<PlaybackSession>> {
        let session = self.prepare_session(device, file_path, subtitles).await?;
        session.start().await?;
        Ok(session)
    }

    /// Stop every live session (best-effort), then the server
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<PlaybackSession>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain(..).filter_map(|s| s.upgrade()).collect()
        };

        for session in sessions {
            if let Err(e) = session.stop().await {
                warn!(
                    "Stopping session on {} during shutdown: {}",
                    session.device().friendly_name,
                    e
                );
            }
        }

        self.server.shutdown().await;
        if let Some(task) = self.server_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Streaming server task ended abnormally: {}", e);
            }
        }
        info!("Caster shut down");
    }
}
