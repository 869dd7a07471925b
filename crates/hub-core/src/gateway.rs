//! Device gateway contract and the IPX800 implementation

use async_trait::async_trait;
use ipx_protocol::{AnalogScaling, IpxClient, IpxClientConfig, PresentTags, ProtocolError};
use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or protocol failure, including timeouts
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The device answered with data of the wrong shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid relay number: {0}")]
    InvalidRelay(u16),
}

impl From<ProtocolError> for GatewayError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidRelay(relay) => Self::InvalidRelay(relay),
            ProtocolError::Malformed(_) | ProtocolError::EmptyResponse(_) => {
                Self::MalformedResponse(e.to_string())
            }
            ProtocolError::Unreachable(_) | ProtocolError::Timeout | ProtocolError::HttpStatus(_) => {
                Self::DeviceUnreachable(e.to_string())
            }
        }
    }
}

/// Read and write access to a relay/IO controller.
///
/// Relay numbers are 1-based, input channel indexes 0-based. Absent digital
/// channels read as `false`, unreadable analog channels as `None`.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Check that the device answers at all
    async fn connect(&self) -> Result<(), GatewayError>;

    async fn read_digital_inputs(&self, count: usize) -> Result<Vec<bool>, GatewayError>;

    /// Analog readings normalized to volts
    async fn read_analog_inputs(&self, count: usize) -> Result<Vec<Option<f64>>, GatewayError>;

    async fn read_outputs(&self, count: usize) -> Result<Vec<bool>, GatewayError>;

    /// Idempotent write; success means the command was sent, not applied
    async fn set_output(&self, relay: u16, on: bool) -> Result<(), GatewayError>;

    /// Read both input families, in one round trip where the device allows it
    async fn read_inputs(
        &self,
        digital_count: usize,
        analog_count: usize,
    ) -> Result<(Vec<bool>, Vec<Option<f64>>), GatewayError> {
        let digital = self.read_digital_inputs(digital_count).await?;
        let analog = self.read_analog_inputs(analog_count).await?;
        Ok((digital, analog))
    }

    /// Read-then-set toggle. The read may be stale by the time the write
    /// lands; callers that need certainty read back afterwards.
    async fn toggle_output(&self, relay: u16) -> Result<bool, GatewayError> {
        if relay == 0 {
            return Err(GatewayError::InvalidRelay(relay));
        }
        let states = self.read_outputs(usize::from(relay)).await?;
        // Unknown state switches on
        let target = states
            .get(usize::from(relay) - 1)
            .map_or(true, |on| !on);
        self.set_output(relay, target).await?;
        Ok(target)
    }
}

/// Gateway backed by an IPX800 `status.xml` / `preset.htm` controller
pub struct IpxGateway {
    client: IpxClient,
    scaling: AnalogScaling,
}

impl IpxGateway {
    pub fn new(config: IpxClientConfig, scaling: AnalogScaling) -> Result<Self, GatewayError> {
        let client = IpxClient::new(config)?;
        Ok(Self { client, scaling })
    }

    /// Which button and analog tag families the controller reports
    pub async fn present_tags(
        &self,
        max_buttons: usize,
        max_analogs: usize,
    ) -> Result<PresentTags, GatewayError> {
        let doc = self.client.fetch_status().await?;
        Ok(doc.present_tags(max_buttons, max_analogs))
    }
}

#[async_trait]
impl DeviceGateway for IpxGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        let doc = self.client.fetch_status().await?;
        tracing::info!(
            "Connected to IPX at {} ({} status fields)",
            self.client.base_url(),
            doc.len()
        );
        Ok(())
    }

    async fn read_digital_inputs(&self, count: usize) -> Result<Vec<bool>, GatewayError> {
        let doc = self.client.fetch_status().await?;
        Ok(doc.digital_inputs(count))
    }

    async fn read_analog_inputs(&self, count: usize) -> Result<Vec<Option<f64>>, GatewayError> {
        let doc = self.client.fetch_status().await?;
        Ok(doc.analog_inputs(count, &self.scaling))
    }

    async fn read_outputs(&self, count: usize) -> Result<Vec<bool>, GatewayError> {
        let doc = self.client.fetch_status().await?;
        Ok(doc.outputs(count))
    }

    async fn set_output(&self, relay: u16, on: bool) -> Result<(), GatewayError> {
        self.client.set_output(relay, on).await?;
        Ok(())
    }

    async fn read_inputs(
        &self,
        digital_count: usize,
        analog_count: usize,
    ) -> Result<(Vec<bool>, Vec<Option<f64>>), GatewayError> {
        let doc = self.client.fetch_status().await?;
        Ok((
            doc.digital_inputs(digital_count),
            doc.analog_inputs(analog_count, &self.scaling),
        ))
    }
}
