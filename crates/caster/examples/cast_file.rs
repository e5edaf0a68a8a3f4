/// Example: Cast a local file to a DLNA renderer
///
/// Usage: cargo run -p dlna-caster --example cast_file <device_name> <file> [config.toml]
///
/// Finds the renderer by name, streams the file to it, prints status every
/// few seconds and stops on Ctrl+C or when the device finishes.
use anyhow::{bail, Result};
use dlna_caster::media::find_sidecar_subtitles;
use dlna_caster::*;
use std::env;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dlna_caster=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("Usage: {} <device_name> <file> [config.toml]", args[0]);
        println!("\nExample: {} \"Living Room\" ~/Videos/clip.mp4", args[0]);
        println!("\nRun this to discover available devices:");
        println!("  cargo run -p dlna-caster --example discover");
        return Ok(());
    }
    let (device_name, file) = (&args[1], &args[2]);

    let config = match args.get(3) {
        Some(path) => CasterConfig::load(path)?,
        None => CasterConfig::default(),
    };
    let window = config.discovery.timeout();
    let caster = Caster::start(config).await?;

    println!("Looking for device: {}", device_name);
    let device = match caster.find_device_by_name(device_name, window).await {
        Ok(device) => device,
        Err(CastError::DiscoveryTimeout { .. }) => {
            bail!("device '{}' not found", device_name);
        }
        Err(e) => return Err(e.into()),
    };
    println!("✓ Found device: {} ({})\n", device.friendly_name, device.host);

    let subtitles = find_sidecar_subtitles(file);
    for subtitle in &subtitles {
        println!("  Subtitle: {}", subtitle.path.display());
    }

    let session = caster.start_session(&device, file, subtitles).await?;
    println!("▶ Playing {}", session.media_url());
    println!("  Press Ctrl+C to stop\n");

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
            _ = ticker.tick() => {
                match session.get_status().await {
                    Ok(status) => {
                        println!(
                            "  {} | {} / {}",
                            status.state,
                            status.position.map(format_hms).unwrap_or_else(|| "--".into()),
                            status.duration.map(format_hms).unwrap_or_else(|| "--".into()),
                        );
                        if status.state.is_terminal() {
                            break;
                        }
                    }
                    Err(e) => println!("  Status unavailable: {}", e),
                }
            }
        }
    }

    if let Err(e) = session.stop().await {
        println!("✗ Stop failed: {}", e);
    }
    caster.shutdown().await;
    println!("✓ Done");
    Ok(())
}
