use crate::prelude::*;
use crate::keba::dispatcher::RouteKey;
use crate::keba::packet::{Plug, Report100, Report2, Report3, State, OK};
use crate::keba::roundtrip::Roundtrip;
use crate::keba::sender::{Sender, Transport};

// ChargeStatus {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeStatus {
    NotConnected,
    Connected,
    Charging,
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotConnected => "Disconnected",
            Self::Connected => "Connected, not charging",
            Self::Charging => "Charging",
        };
        write!(f, "{}", s)
    }
}

impl TryFrom<&Report2> for ChargeStatus {
    type Error = anyhow::Error;

    fn try_from(report: &Report2) -> Result<Self> {
        let invalid = || Error::InvalidStatus {
            plug: report.plug,
            state: report.state,
        };

        let plug = Plug::try_from(report.plug).map_err(|_| invalid())?;
        if plug == Plug::Unplugged {
            return Ok(Self::NotConnected);
        }

        match State::try_from(report.state).map_err(|_| invalid())? {
            State::Charging => Ok(Self::Charging),
            State::Error => Err(invalid().into()),
            State::Starting | State::NotReady | State::Ready | State::AuthRejected => {
                Ok(Self::Connected)
            }
        }
    }
} // }}}

/// One KEBA charge point.
///
/// Every call is a fresh exchange with the device; nothing is cached.
pub struct Charger<T: Transport = Sender> {
    rfid: Option<config::Rfid>,
    roundtrip: Roundtrip<T>,
}

impl Charger<Sender> {
    /// Resolve the configured address, open a sender and subscribe to the
    /// dispatcher.
    pub async fn from_config(dispatcher: &Dispatcher, charger: &config::Charger) -> Result<Self> {
        let addr = charger.addr().await?;
        let sender = Sender::connect(addr).await?;

        // the serial lets a charger be found behind NAT, but plain
        // acknowledgements carry no serial so the address is always needed
        let mut keys = Vec::new();
        if let Some(serial) = charger.serial() {
            keys.push(RouteKey::Serial(serial.to_string()));
        }
        keys.push(RouteKey::Addr(addr));

        let inbox = dispatcher.inbox(&keys);

        info!("charger {}: using {}", charger.name(), addr);

        Ok(Self::new(
            Roundtrip::new(charger.name(), sender, inbox, charger.timeout()),
            charger.rfid().cloned(),
        ))
    }
}

impl<T: Transport> Charger<T> {
    pub fn new(roundtrip: Roundtrip<T>, rfid: Option<config::Rfid>) -> Self {
        Self { rfid, roundtrip }
    }

    pub fn name(&self) -> &str {
        self.roundtrip.name()
    }

    pub fn roundtrip(&self) -> &Roundtrip<T> {
        &self.roundtrip
    }

    pub fn close(&self) {
        info!("charger {}: closing", self.name());
        self.roundtrip.close();
    }

    pub async fn status(&self) -> Result<ChargeStatus> {
        let report: Report2 = self.roundtrip.report(2).await?;
        ChargeStatus::try_from(&report)
    }

    pub async fn enabled(&self) -> Result<bool> {
        let report: Report2 = self.roundtrip.report(2).await?;
        Ok(report.enabled())
    }

    pub async fn enable(&self, enable: bool) -> Result<()> {
        if enable {
            self.enable_rfid().await?;
        }

        info!("charger {}: {}", self.name(), if enable { "enabling" } else { "disabling" });
        self.roundtrip.ack(&format!("ena {}", u8::from(enable))).await
    }

    // authorize with the configured tag, if the charger wants one
    async fn enable_rfid(&self) -> Result<()> {
        let report: Report2 = self.roundtrip.report(2).await?;
        if !report.auth_required() {
            return Ok(());
        }

        let rfid = match &self.rfid {
            Some(rfid) if !rfid.tag().is_empty() => rfid,
            _ => return Err(Error::MissingCredentials.into()),
        };

        let command = match rfid.class() {
            Some(class) => format!("start {} {}", rfid.tag(), class),
            None => format!("start {}", rfid.tag()),
        };

        debug!("charger {}: authorizing", self.name());
        self.roundtrip.ack(&command).await
    }

    pub async fn max_current(&self, current: i64) -> Result<()> {
        let millis = current
            .checked_mul(1000)
            .filter(|millis| *millis >= 0)
            .ok_or(Error::InvalidCurrent(current as f64))?;

        self.roundtrip.ack(&format!("curr {}", millis)).await
    }

    /// Like `max_current` with mA resolution; the reply must be exactly `OK`.
    pub async fn max_current_millis(&self, current: f64) -> Result<()> {
        let millis = 1000.0 * current;
        if !millis.is_finite() || millis < 0.0 || millis > i64::MAX as f64 {
            return Err(Error::InvalidCurrent(current).into());
        }
        let command = format!("curr {}", millis as i64);

        let response = self.roundtrip.line(&command).await?;
        if response != OK {
            return Err(Error::UnexpectedResponse { command, response }.into());
        }

        Ok(())
    }

    /// Power in W.
    pub async fn current_power(&self) -> Result<f64> {
        let report: Report3 = self.roundtrip.report(3).await?;
        Ok(report.p as f64 / 1e3)
    }

    /// Meter reading in kWh.
    pub async fn total_energy(&self) -> Result<f64> {
        let report: Report3 = self.roundtrip.report(3).await?;
        Ok(report.e_total as f64 / 1e4)
    }

    /// Phase currents in A.
    pub async fn currents(&self) -> Result<(f64, f64, f64)> {
        let report: Report3 = self.roundtrip.report(3).await?;
        Ok((
            report.i1 as f64 / 1e3,
            report.i2 as f64 / 1e3,
            report.i3 as f64 / 1e3,
        ))
    }

    /// Chargers without a meter report zero energy forever.
    pub async fn has_meter(&self) -> Result<bool> {
        Ok(self.total_energy().await? > 0.0)
    }

    /// RFID tag of the last session; empty if none was used.
    pub async fn identify(&self) -> Result<String> {
        let report: Report100 = self.roundtrip.report(100).await?;
        Ok(report.rfid_tag)
    }

    pub async fn diagnose(&self) -> Result<Report100> {
        let report: Report100 = self.roundtrip.report(100).await?;
        info!("charger {}: {:?}", self.name(), report);
        Ok(report)
    }
}
