//! PMOCast — cast a local file or the live screen to a DLNA renderer.
//!
//! Usage:
//!
//! ```text
//! PMOCast -l                      list discovered renderers (loops)
//! PMOCast [-i UDN | -n NAME]      select a renderer (default: first found)
//!         [-f FILE]               cast a file instead of the screen
//!         [-w WIDTH] [-h HEIGHT]  capture geometry (default 800x600)
//!         [-high]                 lossless x264 capture profile
//! ```

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pmocastservice::{CastScreenOptions, CastService, CastServiceConfig};

fn init_logging(min_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(min_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `-l` and `-high` stand alone; the other flags take the following
/// argument as their value.
fn parse_args(args: &[String]) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (i, v) in args.iter().enumerate() {
        match v.as_str() {
            "-high" | "-l" => {
                params.insert(v.clone(), String::new());
            }
            "-i" | "-n" | "-f" | "-w" | "-h" => {
                if let Some(value) = args.get(i + 1) {
                    params.insert(v.clone(), value.clone());
                }
            }
            _ => {}
        }
    }
    params
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = pmocastconfig::get_config();
    init_logging(&config.get_log_min_level());

    let service = CastService::new(CastServiceConfig {
        http_port: config.get_http_port(),
        ffmpeg_path: config.get_ffmpeg_path(),
        discovery_mx: config.get_discovery_mx(),
    });
    service.init().await.context("service initialization failed")?;

    let args: Vec<String> = env::args().collect();
    let params = parse_args(&args);

    if params.contains_key("-l") {
        loop {
            for device in service.list_devices() {
                println!("id:{} name:{}", device.udn, device.friendly_name);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    // Discovery needs a moment; retry selection a few times before giving up
    let mut try_count = 5;
    if let Some(udn) = params.get("-i") {
        while try_count > 0 {
            if service.select_device(udn).is_ok() {
                break;
            }
            try_count -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    } else if let Some(name) = params.get("-n") {
        while try_count > 0 {
            if service.select_device_by_name(name).is_ok() {
                break;
            }
            try_count -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    } else {
        while try_count > 0 {
            let devices = service.list_devices();
            if let Some(first) = devices.first() {
                if service.select_device(&first.udn).is_ok() {
                    break;
                }
            }
            try_count -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    if try_count == 0 {
        bail!("no matching renderer found");
    }

    if let Some(path) = params.get("-f") {
        service.cast_file(path).await?;
    } else {
        let mut options = CastScreenOptions {
            framerate: config.get_capture_framerate(),
            high_quality: params.contains_key("-high"),
            ..CastScreenOptions::default()
        };
        if let Some(w) = params.get("-w") {
            options.width = w.parse().context("invalid -w value")?;
        }
        if let Some(h) = params.get("-h") {
            options.height = h.parse().context("invalid -h value")?;
        }
        service.cast_screen(options).await?;
    }

    // Stay up while the renderer pulls from us
    while service.status().is_casting() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!("Cast finished, shutting down");
    service.shutdown();
    Ok(())
}
