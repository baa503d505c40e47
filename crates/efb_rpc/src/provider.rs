//! In-memory [`SimDataProvider`]
//!
//! Serves fixed data tables, optionally after a simulated per-call latency.
//! Used by the headless binary and by tests.

use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::time::Duration;

use crate::calls::{FailureState, FlightPlan, Runway, WeatherReport};
use crate::error::RemoteError;
use crate::responder::SimDataProvider;

#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    metars: FxHashMap<String, String>,
    tafs: FxHashMap<String, String>,
    runways: FxHashMap<String, Vec<Runway>>,
    flight_plans: FxHashMap<String, FlightPlan>,
    /// Known failure ids, with whether each is active
    failures: RefCell<FxHashMap<String, bool>>,
    latency: FxHashMap<String, Duration>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small data set around a transatlantic flight
    pub fn demo() -> Self {
        Self::new()
            .with_metar("KJFK", "KJFK 121851Z 27012KT 10SM FEW045 18/09 A3002 RMK AO2")
            .with_metar("EGLL", "EGLL 121850Z 24015G25KT 9999 SCT030 14/08 Q1011")
            .with_metar("CYQX", "CYQX 121830Z 30008KT 15SM BKN025 09/04 A2987")
            .with_taf(
                "EGLL",
                "TAF EGLL 121700Z 1218/1324 24015KT 9999 SCT030 TEMPO 1218/1222 24025G35KT",
            )
            .with_runways(
                "KJFK",
                vec![
                    runway("04L", 44, 3682),
                    runway("22R", 224, 3682),
                    runway("13R", 134, 4442),
                    runway("31L", 314, 4442),
                ],
            )
            .with_runways("EGLL", vec![runway("09L", 90, 3902), runway("27R", 270, 3902)])
            .with_flight_plan(
                "123456",
                FlightPlan {
                    origin: "KJFK".into(),
                    destination: "EGLL".into(),
                    route: ["HAPIE", "DOVEY", "NATW", "LIMRI", "XETBO"]
                        .map(String::from)
                        .to_vec(),
                    cruise_altitude_ft: 37000,
                },
            )
            .with_failure("ENG1_FIRE")
            .with_failure("HYD_A_LOSS")
            .with_failure("PITOT_HEAT")
    }

    pub fn with_metar(mut self, icao: &str, raw: &str) -> Self {
        self.metars.insert(icao.to_string(), raw.to_string());
        self
    }

    pub fn with_taf(mut self, icao: &str, raw: &str) -> Self {
        self.tafs.insert(icao.to_string(), raw.to_string());
        self
    }

    pub fn with_runways(mut self, icao: &str, runways: Vec<Runway>) -> Self {
        self.runways.insert(icao.to_string(), runways);
        self
    }

    pub fn with_flight_plan(mut self, pilot_id: &str, plan: FlightPlan) -> Self {
        self.flight_plans.insert(pilot_id.to_string(), plan);
        self
    }

    /// Register a failure that can be switched on and off
    pub fn with_failure(self, failure_id: &str) -> Self {
        self.failures.borrow_mut().insert(failure_id.to_string(), false);
        self
    }

    /// Delay every reply of `call` by `latency`
    pub fn with_latency(mut self, call: &str, latency: Duration) -> Self {
        self.latency.insert(call.to_string(), latency);
        self
    }

    pub fn is_failure_active(&self, failure_id: &str) -> bool {
        self.failures.borrow().get(failure_id).copied().unwrap_or(false)
    }

    async fn delay(&self, call: &str) {
        if let Some(latency) = self.latency.get(call) {
            tokio::time::sleep(*latency).await;
        }
    }
}

fn runway(designator: &str, heading_deg: u16, length_m: u32) -> Runway {
    Runway {
        designator: designator.to_string(),
        heading_deg,
        length_m,
    }
}

fn weather(table: &FxHashMap<String, String>, kind: &str, icao: &str) -> Result<WeatherReport, RemoteError> {
    table
        .get(icao)
        .map(|raw| WeatherReport {
            icao: icao.to_string(),
            raw: raw.clone(),
        })
        .ok_or_else(|| RemoteError::not_found(format!("no {kind} for {icao}")))
}

impl SimDataProvider for StaticProvider {
    async fn metar(&self, icao: &str) -> Result<WeatherReport, RemoteError> {
        self.delay("GetMetar").await;
        weather(&self.metars, "METAR", icao)
    }

    async fn taf(&self, icao: &str) -> Result<WeatherReport, RemoteError> {
        self.delay("GetTaf").await;
        weather(&self.tafs, "TAF", icao)
    }

    async fn runways(&self, icao: &str) -> Result<Vec<Runway>, RemoteError> {
        self.delay("GetRunways").await;
        self.runways
            .get(icao)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("no runway data for {icao}")))
    }

    async fn flight_plan(&self, pilot_id: &str) -> Result<FlightPlan, RemoteError> {
        self.delay("ImportFlightPlan").await;
        self.flight_plans
            .get(pilot_id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("no flight plan filed by pilot {pilot_id}")))
    }

    async fn set_failure(&self, failure_id: &str, active: bool) -> Result<FailureState, RemoteError> {
        self.delay(if active { "ActivateFailure" } else { "DeactivateFailure" })
            .await;
        let mut failures = self.failures.borrow_mut();
        let state = failures
            .get_mut(failure_id)
            .ok_or_else(|| RemoteError::not_found(format!("unknown failure {failure_id}")))?;
        *state = active;
        tracing::debug!(failure_id, active, "failure state changed");
        Ok(FailureState {
            failure_id: failure_id.to_string(),
            active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookups() {
        let provider = StaticProvider::demo();
        assert_eq!(provider.metar("EGLL").await.unwrap().icao, "EGLL");
        assert_eq!(provider.runways("KJFK").await.unwrap().len(), 4);
        assert_eq!(
            provider.flight_plan("123456").await.unwrap().destination,
            "EGLL"
        );
        let err = provider.taf("KJFK").await.unwrap_err();
        assert_eq!(err.to_string(), "not found: no TAF for KJFK");
    }

    #[tokio::test]
    async fn test_failure_toggle() {
        let provider = StaticProvider::demo();
        assert!(provider.set_failure("ENG1_FIRE", true).await.unwrap().active);
        assert!(provider.is_failure_active("ENG1_FIRE"));
        assert!(!provider.set_failure("ENG1_FIRE", false).await.unwrap().active);
        assert!(!provider.is_failure_active("ENG1_FIRE"));
        assert!(provider.set_failure("UNKNOWN", true).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let provider = StaticProvider::demo().with_latency("GetMetar", Duration::from_millis(750));
        let started = tokio::time::Instant::now();
        provider.metar("KJFK").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(750));
    }
}
