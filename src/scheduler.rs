use crate::prelude::*;

use std::sync::{Arc, Mutex};

/// Polls every charger on a fixed interval and logs what it reports.
pub struct Scheduler {
    config: ConfigWrapper,
    chargers: Vec<Arc<Charger>>,
    // None until a successful probe told us whether there is a meter
    meters: Mutex<Vec<Option<bool>>>,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, chargers: Vec<Arc<Charger>>) -> Self {
        let meters = Mutex::new(vec![None; chargers.len()]);
        Self {
            config,
            chargers,
            meters,
        }
    }

    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => break,
            }

            self.poll_all().await;
        }

        info!("scheduler exiting");
        Ok(())
    }

    pub async fn poll_all(&self) {
        let polls = self
            .chargers
            .iter()
            .enumerate()
            .map(|(i, charger)| self.poll(i, charger));

        futures::future::join_all(polls).await;
    }

    async fn poll(&self, index: usize, charger: &Charger) {
        let status = match charger.status().await {
            Ok(status) => status,
            Err(err) => {
                warn!("charger {}: status failed: {}", charger.name(), err);
                return;
            }
        };

        match charger.enabled().await {
            Ok(enabled) => info!("charger {}: {} (enabled: {})", charger.name(), status, enabled),
            Err(err) => warn!("charger {}: {} (enabled: {})", charger.name(), status, err),
        }

        if self.has_meter(index, charger).await {
            self.poll_meter(charger).await;
        }
    }

    async fn has_meter(&self, index: usize, charger: &Charger) -> bool {
        let known = self.meters.lock().ok().and_then(|m| m.get(index).copied().flatten());
        if let Some(known) = known {
            return known;
        }

        match charger.has_meter().await {
            Ok(meter) => {
                info!("charger {}: meter {}", charger.name(), if meter { "found" } else { "not present" });
                if let Ok(mut meters) = self.meters.lock() {
                    meters[index] = Some(meter);
                }
                meter
            }
            Err(err) => {
                debug!("charger {}: meter probe failed: {}", charger.name(), err);
                false
            }
        }
    }

    async fn poll_meter(&self, charger: &Charger) {
        let power = charger.current_power().await;
        let energy = charger.total_energy().await;
        let currents = charger.currents().await;

        match (power, energy, currents) {
            (Ok(power), Ok(energy), Ok((i1, i2, i3))) => info!(
                "charger {}: {:.0} W, {:.3} kWh, {:.1}/{:.1}/{:.1} A",
                charger.name(),
                power,
                energy,
                i1,
                i2,
                i3
            ),
            (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                warn!("charger {}: metering failed: {}", charger.name(), err)
            }
        }
    }
}
