/// RenderingControl: volume and mute on the Master channel
use dlna_caster_core::{Arguments, ControlPoint, Device, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Clamp a requested volume into the UPnP 0..=100 range
pub fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, 100) as u8
}

/// RenderingControl controller for one renderer instance
#[derive(Clone)]
pub struct RenderingControl {
    control: Arc<dyn ControlPoint>,
    control_url: String,
    service_type: String,
    instance_id: u32,
}

impl RenderingControl {
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

    /// `None` when the device advertises no RenderingControl service
    pub fn for_device(
        control: Arc<dyn ControlPoint>,
        device: &Device,
        instance_id: u32,
    ) -> Option<Self> {
        let url = device.rendering_control_url.clone()?;
        let service_type = device
            .rendering_control_type
            .clone()
            .unwrap_or_else(|| dlna_caster_core::RENDERING_CONTROL_URN.to_string());
        Some(Self::new(control, url, service_type, instance_id))
    }

    fn args(&self) -> Arguments {
        Arguments::new()
            .with("InstanceID", self.instance_id.to_string())
            .with("Channel", "Master")
    }

    async fn call(&self, action: &str, args: Arguments) -> Result<Arguments> {
        self.control
            .invoke(&self.control_url, &self.service_type, action, &args)
            .await
    }

    /// Set the volume, clamped to 0..=100; returns the value sent
    pub async fn set_volume(&self, volume: i32) -> Result<u8> {
        let clamped = clamp_volume(volume);
        if i32::from(clamped) != volume {
            debug!("Clamped volume {} to {}", volume, clamped);
        }
        self.call(
            "SetVolume",
            self.args().with("DesiredVolume", clamped.to_string()),
        )
        .await?;
        info!("Volume set to {}", clamped);
        Ok(clamped)
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        let value = if muted { "1" } else { "0" };
        self.call("SetMute", self.args().with("DesiredMute", value))
            .await?;
        info!("Mute set to {}", muted);
        Ok(())
    }

    /// Current volume; unparseable replies read as `None`
    pub async fn get_volume(&self) -> Result<Option<u8>> {
        let response = self.call("GetVolume", self.args()).await?;
        Ok(response
            .get("CurrentVolume")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .map(clamp_volume))
    }

    pub async fn get_mute(&self) -> Result<Option<bool>> {
        let response = self.call("GetMute", self.args()).await?;
        Ok(response
            .get("CurrentMute")
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(-5), 0);
        assert_eq!(clamp_volume(500), 100);
        assert_eq!(clamp_volume(42), 42);
        assert_eq!(clamp_volume(i32::MIN), 0);
    }
}
