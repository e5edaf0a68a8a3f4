use crate::error::Result;
use crate::models::Arguments;
use async_trait::async_trait;

/// Issues UPnP control actions against a device
///
/// The playback session only talks to devices through this trait, so the
/// SOAP client can be swapped for an in-memory double in tests.
#[async_trait]
pub trait ControlPoint: Send + Sync {
    /// Invoke `action` of `service_type` at `control_url`
    ///
    /// Returns the action's out-arguments. Device faults surface as
    /// `CastError::ControlFault`, network problems as `CastError::TransportFailure`.
    async fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &Arguments,
    ) -> Result<Arguments>;
}
