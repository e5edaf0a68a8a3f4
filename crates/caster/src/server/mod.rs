/// HTTP streaming server for registered media files
///
/// Renderers pull media from `/media/<token>/<file name>`. Each
/// registration gets a random token so that a stale URL from an earlier
/// session can never reach a newer file. GET and HEAD are served with
/// single byte-range support and the DLNA headers renderers look for.
pub mod range;
pub mod transfer;

use crate::config::ServerConfig;
use crate::net::url_host;
use crate::profiles::{content_features, profile_for_mime, subtitle_profile, TransferMode, TrickModes};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dlna_caster_core::{CastError, MediaResource, Result};
use range::{unsatisfied_content_range, RangeRequest};
use reqwest::Url;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONTENT_FEATURES: HeaderName = HeaderName::from_static("contentfeatures.dlna.org");
const TRANSFER_MODE: HeaderName = HeaderName::from_static("transfermode.dlna.org");

/// URLs handed out for one registered media resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMedia {
    pub url: String,
    /// Same order as `MediaResource::subtitles`
    pub subtitle_urls: Vec<String>,
}

/// A file reachable under a registration token
#[derive(Debug, Clone)]
struct ServedFile {
    name: String,
    path: PathBuf,
    size: u64,
    mime_type: String,
    /// DLNA.ORG_PN advertised for this file
    dlna_profile: Option<String>,
    transfer_mode: TransferMode,
    trick_modes: TrickModes,
}

#[derive(Default)]
struct Registry {
    by_token: HashMap<String, Vec<ServedFile>>,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<RwLock<Registry>>,
    buffer_size: usize,
}

/// Streaming server owning its listener and resource registry
pub struct StreamServer {
    state: AppState,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamServer {
    /// Bind the listener; nothing is served until `serve` or `spawn`
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);

        info!("Streaming server bound to {}", local_addr);

        Ok(Self {
            state: AppState {
                registry: Arc::new(RwLock::new(Registry::default())),
                buffer_size: config.buffer_size,
            },
            listener: Mutex::new(Some(listener)),
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Make a media resource and its subtitles servable
    ///
    /// `host` is the address the renderer should use to reach us.
    pub async fn register(&self, media: &MediaResource, host: IpAddr) -> Result<PublishedMedia> {
        if *self.shutdown_tx.borrow() {
            return Err(CastError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "streaming server is shut down",
            )));
        }

        let token = uuid::Uuid::new_v4().simple().to_string();

        let mut files = vec![ServedFile {
            name: media.file_name(),
            path: media.path.clone(),
            size: media.size,
            mime_type: media.mime_type.clone(),
            dlna_profile: media.dlna_profile.clone(),
            transfer_mode: profile_for_mime(&media.mime_type).transfer_mode,
            trick_modes: TrickModes::BYTE_SEEK,
        }];
        for subtitle in &media.subtitles {
            files.push(ServedFile {
                name: file_name(&subtitle.path),
                path: subtitle.path.clone(),
                size: subtitle.size,
                mime_type: subtitle.mime_type.clone(),
                dlna_profile: None,
                transfer_mode: subtitle_profile().transfer_mode,
                trick_modes: TrickModes::default(),
            });
        }

        let urls = files
            .iter()
            .map(|f| self.url_for(host, &token, &f.name))
            .collect::<Result<Vec<_>>>()?;

        self.state
            .registry
            .write()
            .await
            .by_token
            .insert(token, files);

        let mut urls = urls.into_iter();
        let url = urls.next().unwrap_or_default();
        info!("Registered {} as {}", media.path.display(), url);

        Ok(PublishedMedia {
            url,
            subtitle_urls: urls.collect(),
        })
    }

    /// Withdraw a registration (and its subtitles); later requests get 404
    ///
    /// Transfers already in flight keep their own file handles and run
    /// to completion.
    pub async fn unregister(&self, url: &str) -> bool {
        let Some(token) = token_from_url(url) else {
            return false;
        };

        let removed = self
            .state
            .registry
            .write()
            .await
            .by_token
            .remove(&token)
            .is_some();
        if removed {
            info!("Unregistered {}", url);
        }
        removed
    }

    pub async fn is_registered(&self, url: &str) -> bool {
        match token_from_url(url) {
            Some(token) => self.state.registry.read().await.by_token.contains_key(&token),
            None => false,
        }
    }

    /// Accept connections until `shutdown`
    ///
    /// Hyper runs every connection on its own task, so a stalled reader
    /// never holds up another request.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.listener.lock().await.take().ok_or_else(|| {
            CastError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "streaming server is already serving",
            ))
        })?;

        let app = Router::new()
            .route("/media/:token/:name", get(media_handler))
            .with_state(self.state.clone());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Streaming server listening on {}", self.local_addr);

        tokio::select! {
            result = axum::serve(listener, app) => {
                match result {
                    Ok(_) => info!("Streaming server stopped"),
                    Err(e) => {
                        error!("Streaming server error: {}", e);
                        return Err(e.into());
                    }
                }
            }
            _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                info!("Streaming server shutdown requested");
            }
        }

        Ok(())
    }

    /// Run `serve` on a background task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!("Streaming server exited: {}", e);
            }
        })
    }

    /// Stop accepting connections and drop every registration
    pub async fn shutdown(&self) {
        let released = {
            let mut registry = self.state.registry.write().await;
            let count = registry.by_token.len();
            registry.by_token.clear();
            count
        };
        self.shutdown_tx.send_replace(true);
        info!(
            "Streaming server shutting down ({} registration(s) released)",
            released
        );
    }

    fn url_for(&self, host: IpAddr, token: &str, name: &str) -> Result<String> {
        let base = format!("http://{}:{}/", url_host(host), self.local_addr.port());
        let mut url = Url::parse(&base).map_err(|e| CastError::Config(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CastError::Config(format!("cannot build media URL on {}", base)))?
            .push("media")
            .push(token)
            .push(name);
        Ok(url.to_string())
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resource".to_string())
}

fn token_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let mut segments = url.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("media"), Some(token)) if !token.is_empty() => Some(token.to_string()),
        _ => None,
    }
}

async fn media_handler(
    State(state): State<AppState>,
    Path((token, name)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let range_header = headers.get(header::RANGE).map(|v| v.to_str().unwrap_or(""));
    debug!("{} {} range={:?}", method, name, range_header);

    let file = {
        let registry = state.registry.read().await;
        registry
            .by_token
            .get(&token)
            .and_then(|files| files.iter().find(|f| f.name == name))
            .cloned()
    };
    let Some(file) = file else {
        debug!("No registration for /media/{}/{}", token, name);
        return (StatusCode::NOT_FOUND, "resource not found").into_response();
    };

    let range = match RangeRequest::parse(range_header, file.size) {
        Ok(range) => range,
        Err(_) => {
            debug!(
                "Unsatisfiable range {:?} for {} ({} bytes)",
                range_header, file.name, file.size
            );
            let mut out_headers = HeaderMap::new();
            insert(&mut out_headers, header::CONTENT_RANGE, &unsatisfied_content_range(file.size));
            out_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            return (StatusCode::RANGE_NOT_SATISFIABLE, out_headers, "").into_response();
        }
    };

    let status = if range.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let out_headers = response_headers(&file, &range);

    if method == Method::HEAD {
        return (status, out_headers, Body::empty()).into_response();
    }

    let handle = match transfer::open_span(&file.path, &range).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Registered file {} disappeared", file.path.display());
            return (StatusCode::NOT_FOUND, "file not found").into_response();
        }
        Err(e) => {
            error!("Failed to open {}: {}", file.path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "read failed").into_response();
        }
    };

    if range.partial {
        debug!("Serving {} bytes {}", file.name, range.content_range());
    }

    let body = transfer::stream_span(handle, range, state.buffer_size, file.name.clone());
    (status, out_headers, body).into_response()
}

/// Headers shared by GET and HEAD so both report the same span
fn response_headers(file: &ServedFile, range: &RangeRequest) -> HeaderMap {
    let mut out = HeaderMap::new();
    insert(&mut out, header::CONTENT_TYPE, &file.mime_type);
    insert(&mut out, header::CONTENT_LENGTH, &range.len().to_string());
    if range.partial {
        insert(&mut out, header::CONTENT_RANGE, &range.content_range());
    }
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    out.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    insert(
        &mut out,
        CONTENT_FEATURES,
        &content_features(
            file.dlna_profile.as_deref(),
            file.transfer_mode,
            file.trick_modes,
        ),
    );
    out.insert(
        TRANSFER_MODE,
        HeaderValue::from_static(file.transfer_mode.as_str()),
    );
    out
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!("Dropping invalid {} header value {:?}", name, value),
    }
}
