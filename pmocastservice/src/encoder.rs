//! Screen-capture encoder supervision.
//!
//! The encoder is an external ffmpeg process capturing the desktop and
//! muxing FLV to the local ingest endpoint. The service owns its lifecycle:
//! an exit watcher observes the process ending on its own, and cancellation
//! kills and awaits it.

use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::CastError;

/// Capture parameters for a screen cast.
#[derive(Debug, Clone)]
pub struct CastScreenOptions {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Lossless x264 profile; much more bandwidth, much better text.
    pub high_quality: bool,
}

impl Default for CastScreenOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            framerate: 30,
            high_quality: false,
        }
    }
}

/// Handle on a running encoder.
pub struct EncoderHandle {
    token: CancellationToken,
    watcher: JoinHandle<()>,
}

impl EncoderHandle {
    /// Terminates the encoder if it is still running and waits for the
    /// watcher to observe the exit.
    pub async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.watcher.await {
            warn!("Encoder watcher task failed: {}", e);
        }
    }
}

/// Builds the ffmpeg argument list for the current platform.
pub fn capture_args(
    options: &CastScreenOptions,
    ingest_url: &str,
) -> Result<Vec<String>, CastError> {
    let mut args: Vec<String> = if cfg!(target_os = "linux") {
        vec![
            "-f".into(),
            "x11grab".into(),
            "-s".into(),
            format!("{}x{}", options.width, options.height),
            "-r".into(),
            options.framerate.to_string(),
            "-i".into(),
            ":0.0".into(),
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            "-f".into(),
            "gdigrab".into(),
            "-i".into(),
            "desktop".into(),
        ]
    } else {
        return Err(CastError::UnsupportedPlatform(std::env::consts::OS));
    };

    if options.high_quality {
        args.extend(
            ["-c:v", "libx264", "-qp", "0", "-preset", "ultrafast"]
                .into_iter()
                .map(String::from),
        );
    }

    args.extend(["-f".to_string(), "flv".to_string(), ingest_url.to_string()]);
    Ok(args)
}

/// Spawns the encoder and its exit watcher.
///
/// `on_exit` runs exactly once, when the process terminates for any reason
/// (natural exit, crash, or cancellation kill).
pub fn spawn_encoder(
    ffmpeg: &str,
    options: &CastScreenOptions,
    ingest_url: &str,
    on_exit: impl FnOnce() + Send + 'static,
) -> Result<EncoderHandle, CastError> {
    let args = capture_args(options, ingest_url)?;

    info!("🎥 Starting encoder: {} {}", ffmpeg, args.join(" "));

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| CastError::EncoderSpawn(ffmpeg.to_string(), e.to_string()))?;

    let token = CancellationToken::new();
    let watcher = tokio::spawn({
        let token = token.clone();
        async move {
            let natural_exit = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };
            match natural_exit {
                Some(Ok(status)) => debug!("Encoder exited on its own: {}", status),
                Some(Err(e)) => warn!("Failed to wait on encoder: {}", e),
                None => {
                    // kill() also reaps the process
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill encoder: {}", e);
                    }
                    debug!("Encoder terminated on cancellation");
                }
            }
            on_exit();
        }
    });

    Ok(EncoderHandle { token, watcher })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_args_target_the_ingest_url() {
        if !cfg!(any(target_os = "linux", target_os = "windows")) {
            return;
        }
        let options = CastScreenOptions {
            width: 1280,
            height: 720,
            framerate: 30,
            high_quality: false,
        };
        let args = capture_args(&options, "http://127.0.0.1:12345/live").unwrap();
        // FLV muxing into the relay's ingest endpoint, always last
        let n = args.len();
        assert_eq!(&args[n - 3..], &["-f", "flv", "http://127.0.0.1:12345/live"]);
        assert!(!args.contains(&"libx264".to_string()));
    }

    #[test]
    fn high_quality_selects_lossless_x264() {
        if !cfg!(any(target_os = "linux", target_os = "windows")) {
            return;
        }
        let options = CastScreenOptions {
            high_quality: true,
            ..CastScreenOptions::default()
        };
        let args = capture_args(&options, "http://127.0.0.1:12345/live").unwrap();
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"ultrafast".to_string()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_capture_uses_x11grab_with_geometry() {
        let options = CastScreenOptions::default();
        let args = capture_args(&options, "http://127.0.0.1:12345/live").unwrap();
        assert!(args.contains(&"x11grab".to_string()));
        assert!(args.contains(&"800x600".to_string()));
        assert!(args.contains(&":0.0".to_string()));
    }

    #[tokio::test]
    async fn watcher_reports_natural_exit() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        // `true` exits immediately; not an encoder, but the supervision
        // path is identical
        let exited = Arc::new(AtomicBool::new(false));
        let handle = match spawn_encoder(
            "true",
            &CastScreenOptions::default(),
            "http://127.0.0.1:0/live",
            {
                let exited = exited.clone();
                move || exited.store(true, Ordering::SeqCst)
            },
        ) {
            Ok(handle) => handle,
            // Platform without /usr/bin/true or without capture support
            Err(_) => return,
        };

        handle.watcher.await.unwrap();
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_succeeds_even_after_the_process_already_exited() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let exited = Arc::new(AtomicBool::new(false));
        // `true` ignores the capture arguments and exits immediately, so
        // cancellation races (and loses against) the natural exit
        let handle = match spawn_encoder(
            "true",
            &CastScreenOptions::default(),
            "http://127.0.0.1:0/live",
            {
                let exited = exited.clone();
                move || exited.store(true, Ordering::SeqCst)
            },
        ) {
            Ok(handle) => handle,
            Err(_) => return,
        };

        handle.cancel().await;
        assert!(exited.load(Ordering::SeqCst));
    }
}
