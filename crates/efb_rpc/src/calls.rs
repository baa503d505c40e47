//! Call catalogue
//!
//! The remote calls the tablet makes to the simulation side, with their
//! request and response payloads.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::protocol::Validate;
use crate::rpc_call;

/// Whether `code` is a syntactically valid ICAO location indicator
pub fn is_valid_icao(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Request keyed by an airport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcaoRequest {
    pub icao: String,
}

impl IcaoRequest {
    pub fn new(icao: impl Into<String>) -> Self {
        Self { icao: icao.into() }
    }
}

impl Validate for IcaoRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if is_valid_icao(&self.icao) {
            Ok(())
        } else {
            Err(ValidationError::Icao(self.icao.clone()))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightPlanRequest {
    pub pilot_id: String,
}

impl FlightPlanRequest {
    pub fn new(pilot_id: impl Into<String>) -> Self {
        Self {
            pilot_id: pilot_id.into(),
        }
    }
}

impl Validate for FlightPlanRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.pilot_id.trim().is_empty() {
            return Err(ValidationError::EmptyPilotId);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRequest {
    pub failure_id: String,
}

impl FailureRequest {
    pub fn new(failure_id: impl Into<String>) -> Self {
        Self {
            failure_id: failure_id.into(),
        }
    }
}

impl Validate for FailureRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_id.trim().is_empty() {
            return Err(ValidationError::EmptyFailureId);
        }
        Ok(())
    }
}

/// Raw METAR or TAF text for an airport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub icao: String,
    pub raw: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runway {
    /// e.g. `04L`
    pub designator: String,
    pub heading_deg: u16,
    pub length_m: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub origin: String,
    pub destination: String,
    pub route: Vec<String>,
    pub cruise_altitude_ft: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureState {
    pub failure_id: String,
    pub active: bool,
}

rpc_call! {
    /// Current METAR for an airport
    GetMetar: IcaoRequest => WeatherReport
}

rpc_call! {
    /// Current TAF for an airport
    GetTaf: IcaoRequest => WeatherReport
}

rpc_call! {
    GetRunways: IcaoRequest => Vec<Runway>
}

rpc_call! {
    /// Fetch the pilot's latest dispatched flight plan
    ImportFlightPlan: FlightPlanRequest => FlightPlan
}

rpc_call! {
    ActivateFailure: FailureRequest => FailureState
}

rpc_call! {
    DeactivateFailure: FailureRequest => FailureState
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcCall;

    #[test]
    fn test_icao_validation() {
        assert!(IcaoRequest::new("KJFK").validate().is_ok());
        assert!(IcaoRequest::new("K1A5").validate().is_ok());
        assert_eq!(
            IcaoRequest::new("ABC").validate(),
            Err(ValidationError::Icao("ABC".into()))
        );
        assert!(IcaoRequest::new("KJFKX").validate().is_err());
        assert!(IcaoRequest::new("KJ-K").validate().is_err());
        assert!(IcaoRequest::new("ÄBCD").validate().is_err());
    }

    #[test]
    fn test_identifier_validation() {
        assert_eq!(
            FlightPlanRequest::new("  ").validate(),
            Err(ValidationError::EmptyPilotId)
        );
        assert!(FlightPlanRequest::new("123456").validate().is_ok());
        assert_eq!(
            FailureRequest::new("").validate(),
            Err(ValidationError::EmptyFailureId)
        );
    }

    #[test]
    fn test_call_topics() {
        assert_eq!(GetMetar::request_topic(), "fpc_GetMetar");
        assert_eq!(ImportFlightPlan::response_topic(), "fps_ImportFlightPlan");
        assert_eq!(DeactivateFailure::NAME, "DeactivateFailure");
    }
}
