//! Simulation side of the protocol
//!
//! The [`Responder`] listens on every request topic, answers each request
//! from a [`SimDataProvider`] on its own local task and always publishes
//! exactly one reply per well-formed request: the data, or a
//! [`RemoteError`] saying why there is none. Replies go out in completion
//! order, so a slow runway lookup never holds back a quick METAR.
//!
//! Requests are queued from the bus handlers to a worker task, which spawns
//! one [`tokio::task::spawn_local`] task per request. The responder must be
//! started from inside a [`tokio::task::LocalSet`].

use efb_core::{EventBus, Subscription};
use serde_json::Value;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::calls::{
    ActivateFailure, DeactivateFailure, FailureRequest, FailureState, FlightPlan,
    FlightPlanRequest, GetMetar, GetRunways, GetTaf, IcaoRequest, ImportFlightPlan, Runway,
    WeatherReport,
};
use crate::error::RemoteError;
use crate::protocol::{Envelope, Reply, RpcCall, Validate, INITIALIZED_TOPIC};

/// Backing lookups of the responder
#[allow(async_fn_in_trait)]
pub trait SimDataProvider {
    async fn metar(&self, icao: &str) -> Result<WeatherReport, RemoteError>;

    async fn taf(&self, icao: &str) -> Result<WeatherReport, RemoteError>;

    async fn runways(&self, icao: &str) -> Result<Vec<Runway>, RemoteError>;

    async fn flight_plan(&self, pilot_id: &str) -> Result<FlightPlan, RemoteError>;

    /// Switch a simulated system failure on or off
    async fn set_failure(&self, failure_id: &str, active: bool) -> Result<FailureState, RemoteError>;
}

type Job = Pin<Box<dyn Future<Output = ()>>>;

/// Serves every call kind on the bus until dropped
pub struct Responder {
    subscriptions: Vec<Subscription>,
    served: Rc<Cell<u64>>,
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl Responder {
    /// Subscribe all request topics and announce readiness
    ///
    /// # Panics
    ///
    /// Panics when called outside a [`tokio::task::LocalSet`], before any
    /// topic is subscribed.
    pub fn start<P: SimDataProvider + 'static>(bus: &EventBus, provider: Rc<P>) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::task::spawn_local(async move {
            while let Some(job) = queue.recv().await {
                tokio::task::spawn_local(job);
            }
        });
        let mut responder = Self {
            subscriptions: Vec::new(),
            served: Rc::new(Cell::new(0)),
            jobs,
            worker,
        };

        let p = Rc::clone(&provider);
        responder.serve::<GetMetar, _, _>(bus, move |req: IcaoRequest| {
            let p = Rc::clone(&p);
            async move { p.metar(&req.icao).await }
        });
        let p = Rc::clone(&provider);
        responder.serve::<GetTaf, _, _>(bus, move |req: IcaoRequest| {
            let p = Rc::clone(&p);
            async move { p.taf(&req.icao).await }
        });
        let p = Rc::clone(&provider);
        responder.serve::<GetRunways, _, _>(bus, move |req: IcaoRequest| {
            let p = Rc::clone(&p);
            async move { p.runways(&req.icao).await }
        });
        let p = Rc::clone(&provider);
        responder.serve::<ImportFlightPlan, _, _>(bus, move |req: FlightPlanRequest| {
            let p = Rc::clone(&p);
            async move { p.flight_plan(&req.pilot_id).await }
        });
        let p = Rc::clone(&provider);
        responder.serve::<ActivateFailure, _, _>(bus, move |req: FailureRequest| {
            let p = Rc::clone(&p);
            async move { p.set_failure(&req.failure_id, true).await }
        });
        let p = provider;
        responder.serve::<DeactivateFailure, _, _>(bus, move |req: FailureRequest| {
            let p = Rc::clone(&p);
            async move { p.set_failure(&req.failure_id, false).await }
        });

        bus.publish(INITIALIZED_TOPIC, "true".to_string());
        tracing::info!(calls = responder.subscriptions.len(), "responder initialized");
        responder
    }

    /// Number of replies published so far
    pub fn served(&self) -> u64 {
        self.served.get()
    }

    fn serve<C, F, Fut>(&mut self, bus: &EventBus, handler: F)
    where
        C: RpcCall,
        F: Fn(C::Request) -> Fut + 'static,
        Fut: Future<Output = Result<C::Response, RemoteError>> + 'static,
    {
        let reply_bus = bus.clone();
        let handler = Rc::new(handler);
        let served = Rc::clone(&self.served);
        let jobs = self.jobs.clone();

        let sub = bus
            .subscribe::<String>(&C::request_topic())
            .handle(move |raw| {
                let envelope: Envelope<C::Request> = match serde_json::from_str(raw) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        reject_malformed::<C>(&reply_bus, raw, &err);
                        return;
                    }
                };
                let Envelope { id, body } = envelope;
                let bus = reply_bus.clone();
                let handler = Rc::clone(&handler);
                let served = Rc::clone(&served);

                let job: Job = Box::pin(async move {
                    let result = match body.validate() {
                        Ok(()) => handler(body).await,
                        Err(err) => Err(RemoteError::rejected(err.to_string())),
                    };
                    if let Err(err) = &result {
                        tracing::debug!(call = C::NAME, id, %err, "request failed");
                    }
                    publish_reply::<C>(&bus, id, result.into());
                    served.set(served.get() + 1);
                });
                if jobs.send(job).is_err() {
                    tracing::warn!(call = C::NAME, id, "responder worker gone, request dropped");
                }
            });
        self.subscriptions.push(sub);
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.destroy();
        }
        self.worker.abort();
    }
}

fn publish_reply<C: RpcCall>(bus: &EventBus, id: u64, reply: Reply<C::Response>) {
    match serde_json::to_string(&Envelope { id, body: reply }) {
        Ok(payload) => bus.publish(&C::response_topic(), payload),
        Err(err) => {
            tracing::error!(call = C::NAME, id, %err, "failed to encode reply");
            let fallback: Reply<()> = Reply::Err(RemoteError::internal(err.to_string()));
            if let Ok(payload) = serde_json::to_string(&Envelope { id, body: fallback }) {
                bus.publish(&C::response_topic(), payload);
            }
        }
    }
}

/// Answer a request whose body did not decode, if its id is readable
fn reject_malformed<C: RpcCall>(bus: &EventBus, raw: &str, err: &serde_json::Error) {
    let id = serde_json::from_str::<Envelope<Value>>(raw).ok().map(|e| e.id);
    match id {
        Some(id) => {
            tracing::warn!(call = C::NAME, id, %err, "rejecting malformed request");
            publish_reply::<C>(bus, id, Reply::Err(RemoteError::rejected(err.to_string())));
        }
        None => tracing::warn!(call = C::NAME, %err, "dropping request without an id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::config::RpcConfig;
    use crate::error::{RemoteErrorKind, RpcError};
    use crate::provider::StaticProvider;
    use std::cell::RefCell;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn provider() -> Rc<StaticProvider> {
        Rc::new(
            StaticProvider::new()
                .with_metar("KJFK", "KJFK 121851Z 27012KT 10SM FEW045 18/09 A3002")
                .with_runways(
                    "KJFK",
                    vec![Runway {
                        designator: "04L".into(),
                        heading_deg: 44,
                        length_m: 3682,
                    }],
                )
                .with_failure("ENG1_FIRE"),
        )
    }

    #[tokio::test]
    async fn test_serves_provider_data() {
        LocalSet::new()
            .run_until(async {
                let bus = EventBus::new();
                let responder = Responder::start(&bus, provider());
                let client = RpcClient::new(&bus, RpcConfig::default());
                assert!(client.is_initialized());

                let metar = client.call::<GetMetar>(IcaoRequest::new("KJFK")).unwrap().await.unwrap();
                assert!(metar.raw.starts_with("KJFK 121851Z"));

                let runways = client.call::<GetRunways>(IcaoRequest::new("KJFK")).unwrap().await.unwrap();
                assert_eq!(runways[0].designator, "04L");

                let state = client
                    .call::<ActivateFailure>(FailureRequest::new("ENG1_FIRE"))
                    .unwrap()
                    .await
                    .unwrap();
                assert!(state.active);
                assert_eq!(responder.served(), 3);
            })
            .await;
    }

    #[tokio::test]
    async fn test_missing_data_is_a_remote_error() {
        LocalSet::new()
            .run_until(async {
                let bus = EventBus::new();
                let _responder = Responder::start(&bus, provider());
                let client = RpcClient::new(&bus, RpcConfig::default());

                let err = client.call::<GetTaf>(IcaoRequest::new("KJFK")).unwrap().await.unwrap_err();
                assert_eq!(err.remote().map(|e| e.kind), Some(RemoteErrorKind::NotFound));

                let err = client
                    .call::<DeactivateFailure>(FailureRequest::new("HYD_LOSS"))
                    .unwrap()
                    .await
                    .unwrap_err();
                assert!(matches!(err, RpcError::Remote { call: "DeactivateFailure", .. }));
            })
            .await;
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_remotely() {
        LocalSet::new()
            .run_until(async {
                let bus = EventBus::new();
                let _responder = Responder::start(&bus, provider());
                let replies = Rc::new(RefCell::new(Vec::new()));
                let sink = Rc::clone(&replies);
                let _sub = bus
                    .subscribe::<String>(&GetMetar::response_topic())
                    .handle(move |raw| sink.borrow_mut().push(raw.clone()));

                bus.publish(&GetMetar::request_topic(), r#"{"id":41,"body":{"icao":"AB"}}"#.to_string());
                bus.publish(&GetMetar::request_topic(), r#"{"id":42,"body":{"airport":1}}"#.to_string());
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }

                let decoded: Vec<Envelope<Reply<WeatherReport>>> = replies
                    .borrow()
                    .iter()
                    .map(|raw| serde_json::from_str(raw).unwrap())
                    .collect();
                assert_eq!(decoded.len(), 2);
                for reply in decoded {
                    let err = reply.body.into_result().unwrap_err();
                    assert_eq!(err.kind, RemoteErrorKind::Rejected);
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_in_completion_order() {
        LocalSet::new()
            .run_until(async {
                let bus = EventBus::new();
                let slow = provider().as_ref().clone().with_latency("GetRunways", Duration::from_millis(300));
                let slow = slow.with_latency("GetMetar", Duration::from_millis(20));
                let _responder = Responder::start(&bus, Rc::new(slow));
                let client = RpcClient::new(&bus, RpcConfig::default());

                let order = Rc::new(RefCell::new(Vec::new()));
                let runways = client.call::<GetRunways>(IcaoRequest::new("KJFK")).unwrap();
                let metar = client.call::<GetMetar>(IcaoRequest::new("KJFK")).unwrap();

                let first = Rc::clone(&order);
                let second = Rc::clone(&order);
                tokio::join!(
                    async move {
                        runways.await.unwrap();
                        first.borrow_mut().push("runways");
                    },
                    async move {
                        metar.await.unwrap();
                        second.borrow_mut().push("metar");
                    },
                );
                assert_eq!(*order.borrow(), vec!["metar", "runways"]);
            })
            .await;
    }

    #[tokio::test]
    #[should_panic]
    async fn test_start_requires_local_set() {
        let bus = EventBus::new();
        let _responder = Responder::start(&bus, provider());
    }

    #[tokio::test]
    async fn test_start_outside_local_set_subscribes_nothing() {
        let bus = EventBus::new();
        let started = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Responder::start(&bus, provider())
        }));
        assert!(started.is_err());
        assert_eq!(bus.subscriber_count(&GetMetar::request_topic()), 0);
        assert_eq!(bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_stops_serving() {
        LocalSet::new()
            .run_until(async {
                let bus = EventBus::new();
                let responder = Responder::start(&bus, provider());
                assert_eq!(bus.subscriber_count(&GetMetar::request_topic()), 1);
                drop(responder);
                assert_eq!(bus.subscriber_count(&GetMetar::request_topic()), 0);

                let client = RpcClient::new(&bus, RpcConfig::default());
                let err = client
                    .call_with_timeout::<GetMetar>(IcaoRequest::new("KJFK"), Some(Duration::from_millis(1)))
                    .unwrap()
                    .await
                    .unwrap_err();
                assert!(err.is_timeout());
            })
            .await;
    }
}
