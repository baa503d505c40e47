//! EFB Request/Response Protocol
//!
//! Typed remote calls between the tablet UI and the simulation side, carried
//! over the [`efb_core::EventBus`]:
//!
//! - **Protocol**: `fpc_`/`fps_` topic pairs, correlation ids and
//!   discriminated replies ([`protocol`])
//! - **Calls**: weather, runways, flight plan import and failures
//!   ([`calls`])
//! - **Client**: validated, cancellable calls with per-kind timeouts
//!   ([`RpcClient`])
//! - **Responder**: the serving side backed by a [`SimDataProvider`]
//!   ([`Responder`], [`StaticProvider`])

pub mod calls;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod responder;

pub use calls::{
    is_valid_icao, ActivateFailure, DeactivateFailure, FailureRequest, FailureState, FlightPlan,
    FlightPlanRequest, GetMetar, GetRunways, GetTaf, IcaoRequest, ImportFlightPlan, Runway,
    WeatherReport,
};
pub use client::{PendingCall, RpcClient};
pub use config::RpcConfig;
pub use error::{RemoteError, RemoteErrorKind, RpcError, ValidationError};
pub use protocol::{
    CallId, Envelope, Reply, RpcCall, Validate, INITIALIZED_TOPIC, REQUEST_PREFIX, RESPONSE_PREFIX,
};
pub use provider::StaticProvider;
pub use responder::{Responder, SimDataProvider};
