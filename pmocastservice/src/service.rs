//! The cast orchestrator.
//!
//! `CastService` ties discovery, the device registry, the relay and the
//! control client together behind four public operations (select device,
//! cast file, cast screen, cancel). Every side-effecting operation brackets
//! its work between a status-register lock and unlock, so concurrent
//! callers can never race the service into an inconsistent mode: they fail
//! with a state conflict instead.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use pmocastrelay::RelaySession;
use pmocastupnp::{AvTransportClient, CastDevice, DeviceRegistry, DiscoveryLoop, SsdpClient};
use pmocastupnp::discovery::DiscoveryStop;

use crate::encoder::{CastScreenOptions, EncoderHandle, spawn_encoder};
use crate::errors::CastError;
use crate::http::{HttpState, router};
use crate::status::{CastStatus, StatusRegister};

/// Construction-time parameters, injected rather than read from any global.
#[derive(Debug, Clone)]
pub struct CastServiceConfig {
    /// Port of the local HTTP surface; also the port baked into callback
    /// URLs handed to renderers.
    pub http_port: u16,
    /// Encoder binary (name or path).
    pub ffmpeg_path: String,
    /// MX value for M-SEARCH requests.
    pub discovery_mx: u32,
}

impl Default for CastServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 12345,
            ffmpeg_path: "ffmpeg".to_string(),
            discovery_mx: 5,
        }
    }
}

pub struct CastService {
    status: Arc<StatusRegister>,
    registry: Arc<DeviceRegistry>,
    relay: Arc<RelaySession>,
    selected: Mutex<Option<CastDevice>>,
    file_path: Arc<Mutex<Option<PathBuf>>>,
    encoder: tokio::sync::Mutex<Option<EncoderHandle>>,
    discovery_stop: Mutex<Option<DiscoveryStop>>,
    config: CastServiceConfig,
}

impl CastService {
    pub fn new(config: CastServiceConfig) -> Self {
        Self {
            status: Arc::new(StatusRegister::new()),
            registry: Arc::new(DeviceRegistry::new()),
            relay: Arc::new(RelaySession::new()),
            selected: Mutex::new(None),
            file_path: Arc::new(Mutex::new(None)),
            encoder: tokio::sync::Mutex::new(None),
            discovery_stop: Mutex::new(None),
            config,
        }
    }

    /// Starts discovery and the HTTP surface (transition 0 → 1).
    ///
    /// Failure to open the discovery socket is fatal to the whole service;
    /// the register rolls back to uninitialized.
    pub async fn init(&self) -> Result<(), CastError> {
        self.status.try_lock(CastStatus::Uninitialized)?;
        let result = self.start().await;
        match &result {
            Ok(()) => self.status.unlock(CastStatus::Ready),
            Err(_) => self.status.unlock(CastStatus::Uninitialized),
        }
        result
    }

    async fn start(&self) -> Result<(), CastError> {
        // The discovery socket is the one prerequisite resource everything
        // depends on.
        let ssdp = SsdpClient::new()?;
        let discovery = DiscoveryLoop::new(ssdp, self.registry.clone(), self.config.discovery_mx);
        let (_join, stop) = discovery.spawn();
        *self.discovery_stop.lock().unwrap() = Some(stop);

        let state = HttpState {
            relay: self.relay.clone(),
            file_path: self.file_path.clone(),
        };
        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.config.http_port)).await?;
        info!("🚀 Casting surface listening on {}", listener.local_addr()?);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router(state)).await {
                error!("HTTP server terminated: {}", e);
            }
        });

        Ok(())
    }

    pub fn status(&self) -> CastStatus {
        self.status.status()
    }

    pub fn list_devices(&self) -> Vec<CastDevice> {
        self.registry.list()
    }

    /// Currently selected device, if any.
    pub fn selected_device(&self) -> Option<CastDevice> {
        self.selected.lock().unwrap().clone()
    }

    /// Selects the cast target (transition {1,2} → 2).
    ///
    /// Legal whether a device was already selected or not, but never while
    /// a cast is running.
    pub fn select_device(&self, udn: &str) -> Result<(), CastError> {
        let matched = self
            .status
            .try_lock_any(&[CastStatus::Ready, CastStatus::DeviceSelected])?;

        match self.registry.lookup(udn) {
            Ok(device) => {
                info!("🎯 Selected renderer '{}' ({})", device.friendly_name, device.udn);
                *self.selected.lock().unwrap() = Some(device);
                self.status.unlock(CastStatus::DeviceSelected);
                Ok(())
            }
            Err(_) => {
                self.status.unlock(matched);
                Err(CastError::DeviceNotFound(udn.to_string()))
            }
        }
    }

    /// Selects the cast target by friendly name.
    pub fn select_device_by_name(&self, name: &str) -> Result<(), CastError> {
        let matched = self
            .status
            .try_lock_any(&[CastStatus::Ready, CastStatus::DeviceSelected])?;

        match self.registry.lookup_by_name(name) {
            Ok(device) => {
                info!("🎯 Selected renderer '{}' ({})", device.friendly_name, device.udn);
                *self.selected.lock().unwrap() = Some(device);
                self.status.unlock(CastStatus::DeviceSelected);
                Ok(())
            }
            Err(_) => {
                self.status.unlock(matched);
                Err(CastError::DeviceNotFound(name.to_string()))
            }
        }
    }

    /// Casts a local file to the selected device (transition 2 → 3).
    pub async fn cast_file(&self, path: impl Into<PathBuf>) -> Result<(), CastError> {
        self.status.try_lock(CastStatus::DeviceSelected)?;
        let result = self.begin_file_cast(path.into()).await;
        match &result {
            Ok(()) => self.status.unlock(CastStatus::CastingFile),
            Err(_) => self.status.unlock(CastStatus::DeviceSelected),
        }
        result
    }

    async fn begin_file_cast(&self, path: PathBuf) -> Result<(), CastError> {
        let device = self.require_selected()?;
        info!("📁 Casting {} to '{}'", path.display(), device.friendly_name);

        *self.file_path.lock().unwrap() = Some(path);
        let url = device.callback_url(self.config.http_port, "/file");
        self.set_transport_uri(&device, url).await
    }

    /// Stops a file cast (transition 3 → 2). Nothing to tear down locally:
    /// the renderer just stops pulling.
    pub fn cancel_cast_file(&self) -> Result<(), CastError> {
        self.status
            .assign(CastStatus::CastingFile, CastStatus::DeviceSelected)
    }

    /// Casts a live screen capture to the selected device (transition 2 → 4).
    pub async fn cast_screen(&self, options: CastScreenOptions) -> Result<(), CastError> {
        self.status.try_lock(CastStatus::DeviceSelected)?;
        let result = self.begin_screen_cast(options).await;
        match &result {
            Ok(()) => self.status.unlock(CastStatus::CastingScreen),
            Err(_) => self.status.unlock(CastStatus::DeviceSelected),
        }
        result
    }

    async fn begin_screen_cast(&self, options: CastScreenOptions) -> Result<(), CastError> {
        let device = self.require_selected()?;
        info!(
            "🖥️ Casting screen ({}x{}) to '{}'",
            options.width, options.height, device.friendly_name
        );

        let ingest_url = format!("http://127.0.0.1:{}/live", self.config.http_port);
        let status = self.status.clone();
        let handle = spawn_encoder(&self.config.ffmpeg_path, &options, &ingest_url, move || {
            // The capture process exiting on its own ends the cast
            let _ = status.assign(CastStatus::CastingScreen, CastStatus::DeviceSelected);
        })?;

        let url = device.callback_url(self.config.http_port, "/live");
        match self.set_transport_uri(&device, url).await {
            Ok(()) => {
                *self.encoder.lock().await = Some(handle);
                Ok(())
            }
            Err(e) => {
                // Never leak a capture process the renderer will not pull from
                handle.cancel().await;
                Err(e)
            }
        }
    }

    /// Stops a screen cast (transition 4 → 2): terminates and awaits the
    /// encoder, then returns the register to idle. Succeeds even if the
    /// encoder had already exited on its own.
    pub async fn cancel_cast_screen(&self) -> Result<(), CastError> {
        let handle = self.encoder.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel().await;
        }

        match self
            .status
            .assign(CastStatus::CastingScreen, CastStatus::DeviceSelected)
        {
            Ok(()) => Ok(()),
            // The exit watcher may already have moved the register back
            Err(_) if self.status.status() == CastStatus::DeviceSelected => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stops the discovery loop; honored within one read deadline.
    pub fn shutdown(&self) {
        if let Some(stop) = self.discovery_stop.lock().unwrap().take() {
            stop.request_stop();
        }
    }

    fn require_selected(&self) -> Result<CastDevice, CastError> {
        self.selected
            .lock()
            .unwrap()
            .clone()
            .ok_or(CastError::NoDeviceSelected)
    }

    /// Issues the SOAP call on a blocking worker; the control point is
    /// synchronous.
    async fn set_transport_uri(&self, device: &CastDevice, url: String) -> Result<(), CastError> {
        let client = AvTransportClient::for_device(device)?;
        tokio::task::spawn_blocking(move || client.set_av_transport_uri(0, &url))
            .await
            .map_err(|e| CastError::TaskJoin {
                role: "control",
                details: e.to_string(),
            })??;
        Ok(())
    }

    /// Registry handle, shared with the discovery loop.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }
}
