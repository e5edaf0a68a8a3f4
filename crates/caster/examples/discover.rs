/// Example: Discover DLNA MediaRenderer devices
///
/// Usage: cargo run -p dlna-caster --example discover [timeout_secs]
///
/// Searches the local network and prints every renderer that answered.
use anyhow::Result;
use dlna_caster::*;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let timeout_secs: u64 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    println!("=== DLNA Renderer Discovery ===\n");
    println!("Searching for {} seconds...\n", timeout_secs);

    let discovery = Discovery::new(DiscoveryConfig::default())?;
    let devices = discovery
        .discover(Duration::from_secs(timeout_secs), MEDIA_RENDERER_URN)
        .await?;

    if devices.is_empty() {
        println!("✗ No DLNA renderers found\n");
        println!("Troubleshooting:");
        println!("  1. Ensure your renderers are powered on");
        println!("  2. Check you're on the same network");
        println!("  3. Verify the firewall allows multicast (UDP 239.255.255.250:1900)");
        return Ok(());
    }

    println!("✓ Found {} renderer(s):\n", devices.len());

    for (i, device) in devices.iter().enumerate() {
        println!("{}. {}", i + 1, device.friendly_name);
        println!("   USN: {}", device.usn);
        println!("   Address: {}:{}", device.host, device.port);
        if let Some(manufacturer) = &device.manufacturer {
            println!("   Manufacturer: {}", manufacturer);
        }
        if let Some(model) = &device.model_name {
            println!("   Model: {}", model);
        }
        println!("   AVTransport: {}", device.av_transport_url);
        match &device.rendering_control_url {
            Some(url) => println!("   RenderingControl: {}", url),
            None => println!("   RenderingControl: not available"),
        }
        println!();
    }

    Ok(())
}
