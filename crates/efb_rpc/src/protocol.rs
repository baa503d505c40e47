//! Wire protocol
//!
//! Every call kind owns a fixed topic pair on the event bus: requests go to
//! `fpc_<Name>`, replies come back on `fps_<Name>`. Payloads are JSON text
//! so the responder can live on the far side of a process boundary.
//!
//! ```text
//! fpc_GetMetar  {"id":7,"body":{"icao":"KJFK"}}
//! fps_GetMetar  {"id":7,"body":{"status":"ok","data":{"icao":"KJFK","raw":"..."}}}
//! fps_GetMetar  {"id":8,"body":{"status":"err","data":{"kind":"not_found","message":"..."}}}
//! ```
//!
//! The `id` correlates a reply with its request, so several calls of the
//! same kind may be in flight at once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, ValidationError};

/// Prefix of request topics
pub const REQUEST_PREFIX: &str = "fpc_";

/// Prefix of response topics
pub const RESPONSE_PREFIX: &str = "fps_";

/// Published once by the responder when it is ready to serve
pub const INITIALIZED_TOPIC: &str = "fps_Initialized";

/// Correlation id of one call
pub type CallId = u64;

/// A payload tagged with its call's correlation id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<B> {
    pub id: CallId,
    pub body: B,
}

/// Discriminated reply body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "lowercase")]
pub enum Reply<T> {
    Ok(T),
    Err(RemoteError),
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Err(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, RemoteError>> for Reply<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(err) => Reply::Err(err),
        }
    }
}

/// Synchronous request checks, run by the client before publishing and
/// again by the responder on receipt
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// One logical remote call
pub trait RpcCall: 'static {
    /// Call name; also the suffix of both topics
    const NAME: &'static str;

    type Request: Validate + Serialize + DeserializeOwned + 'static;
    type Response: Serialize + DeserializeOwned + 'static;

    fn request_topic() -> String {
        request_topic(Self::NAME)
    }

    fn response_topic() -> String {
        response_topic(Self::NAME)
    }
}

pub fn request_topic(name: &str) -> String {
    format!("{REQUEST_PREFIX}{name}")
}

pub fn response_topic(name: &str) -> String {
    format!("{RESPONSE_PREFIX}{name}")
}

/// Declare a unit type implementing [`RpcCall`]
///
/// ```rust
/// use efb_rpc::{rpc_call, Validate, ValidationError};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// pub struct Ping;
///
/// impl Validate for Ping {
///     fn validate(&self) -> Result<(), ValidationError> {
///         Ok(())
///     }
/// }
///
/// rpc_call! {
///     /// Liveness check
///     GetPing: Ping => u64
/// }
///
/// use efb_rpc::RpcCall;
/// assert_eq!(GetPing::request_topic(), "fpc_GetPing");
/// ```
#[macro_export]
macro_rules! rpc_call {
    ($(#[$meta:meta])* $name:ident : $request:ty => $response:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name;

        impl $crate::RpcCall for $name {
            const NAME: &'static str = stringify!($name);
            type Request = $request;
            type Response = $response;
        }
    };
}
