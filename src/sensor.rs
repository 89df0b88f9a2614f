//! Ambient light sensor access via iio-sensor-proxy
//!
//! Light level updates only flow while the sensor is claimed, so the
//! claim follows the configuration: it is held while auto brightness
//! or automatic high contrast wants readings and released otherwise.

use zbus::proxy;

use crate::error::Result;

#[proxy(
    interface = "net.hadess.SensorProxy",
    default_service = "net.hadess.SensorProxy",
    default_path = "/net/hadess/SensorProxy"
)]
pub trait Sensor {
    /// Start receiving light level updates
    fn claim_light(&self) -> zbus::Result<()>;

    /// Stop receiving light level updates
    fn release_light(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn has_ambient_light(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn light_level_unit(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn light_level(&self) -> zbus::Result<f64>;
}

/// Claim lifecycle around the sensor service
pub struct SensorClient {
    proxy: SensorProxy<'static>,
    claimed: bool,
}

impl SensorClient {
    /// Connect to iio-sensor-proxy
    ///
    /// Fails when the service is not on the bus; the daemon then runs
    /// without ambient light support.
    pub async fn new(connection: &zbus::Connection) -> Result<Self> {
        let proxy = SensorProxy::new(connection).await?;
        // A property round trip proves the service is actually there
        let has_sensor = proxy.has_ambient_light().await?;
        debug!("Ambient light sensor available: {}", has_sensor);

        Ok(Self {
            proxy,
            claimed: false,
        })
    }

    pub fn proxy(&self) -> &SensorProxy<'static> {
        &self.proxy
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Unit of the current reading
    ///
    /// Read per reading rather than once per claim: a sensor may start
    /// out with a vendor unit and switch to lux later. The proxy's
    /// property cache makes this a local lookup.
    pub async fn unit(&self) -> String {
        self.proxy.light_level_unit().await.unwrap_or_default()
    }

    /// Claim or release the sensor to match `want`
    ///
    /// A sensor that went away drops the claim regardless of `want`.
    /// Returns whether readings flow afterwards.
    pub async fn update_claim(&mut self, want: bool) -> bool {
        let has_sensor = self.proxy.has_ambient_light().await.unwrap_or(false);
        let want = want && has_sensor;
        if want == self.claimed {
            return self.claimed;
        }

        if want {
            match self.proxy.claim_light().await {
                Ok(()) => {
                    self.claimed = true;
                    info!("Claimed ambient light sensor ({})", self.unit().await);
                }
                Err(err) => {
                    warn!("Failed to claim ambient light sensor: {}", err);
                }
            }
        } else {
            if let Err(err) = self.proxy.release_light().await {
                warn!("Failed to release ambient light sensor: {}", err);
            }
            self.claimed = false;
        }

        self.claimed
    }
}
