//! Application root
//!
//! [`EfbApp`] creates the process-wide pieces once (event bus, RPC client,
//! notification center, host surface) and mounts the shell view:
//!
//! ```text
//! shell
//! ├── status          SIM READY / SIM CONNECTING
//! ├── switch          one page per tab, hidden pages paused
//! │   ├── map         runway list
//! │   ├── weather     METAR, TAF
//! │   ├── flightplan  imported route
//! │   └── failures    active failure list
//! └── list            notifications with live countdowns
//! ```
//!
//! User actions call the responder and report their outcome as a
//! notification.

use anyhow::{Context, Result};
use efb_core::{
    ArraySubject, EventBus, Notification, NotificationCenter, NotificationKind, Observable, Subject,
    Subscription,
};
use efb_rpc::{
    ActivateFailure, DeactivateFailure, FailureRequest, FailureState, FlightPlan, FlightPlanRequest,
    GetMetar, GetRunways, GetTaf, IcaoRequest, ImportFlightPlan, RpcCall, RpcClient, RpcError,
    Runway, WeatherReport,
};
use efb_view::{ListHandle, MemorySurface, Scope, Switch, SwitchHandle, ViewError, ViewId, ViewTree};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;

/// Tabs of the tablet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Page {
    Map,
    Weather,
    FlightPlan,
    Failures,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Map, Page::Weather, Page::FlightPlan, Page::Failures];

    pub fn title(self) -> &'static str {
        match self {
            Page::Map => "MAP",
            Page::Weather => "WEATHER",
            Page::FlightPlan => "FLIGHT PLAN",
            Page::Failures => "FAILURES",
        }
    }
}

/// Data the pages render, owned by the shell
#[derive(Clone, Default)]
struct SessionState {
    metar: Subject<Option<WeatherReport>>,
    taf: Subject<Option<WeatherReport>>,
    runways: ArraySubject<Runway>,
    flight_plan: Subject<Option<FlightPlan>>,
    active_failures: ArraySubject<String>,
}

pub struct EfbApp {
    bus: EventBus,
    client: RpcClient,
    notifications: Rc<NotificationCenter>,
    surface: Rc<RefCell<MemorySurface>>,
    tree: ViewTree,
    page: Subject<Page>,
    state: SessionState,
    shell: ViewId,
    switch: SwitchHandle<Page>,
    toasts: ListHandle<Notification>,
    tick_interval: Duration,
}

impl EfbApp {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let surface = Rc::new(RefCell::new(MemorySurface::new()));
        let root = surface.borrow().root();
        let tree = ViewTree::new(surface.clone());
        let bus = EventBus::new();
        let client = RpcClient::new(&bus, config.rpc.clone());
        let notifications = Rc::new(NotificationCenter::new(&config.notifications));
        let page = Subject::new(Page::Map);
        let state = SessionState::default();

        let mut mounted = None;
        let shell = tree
            .mount(None, root, "shell", |scope| {
                mounted = Some(build_shell(scope, &client, &notifications, &page, &state));
            })
            .context("Failed to mount shell view")?;
        let (switch, toasts) = mounted
            .context("Shell view did not render")?
            .context("Failed to build shell view")?;

        tracing::info!(nodes = tree.len(), "EFB shell mounted");
        Ok(Self {
            bus,
            client,
            notifications,
            surface,
            tree,
            page,
            state,
            shell,
            switch,
            toasts,
            tick_interval: config.notifications.tick_interval(),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn tree(&self) -> &ViewTree {
        &self.tree
    }

    pub fn surface(&self) -> &Rc<RefCell<MemorySurface>> {
        &self.surface
    }

    pub fn shell(&self) -> ViewId {
        self.shell
    }

    pub fn switch(&self) -> &SwitchHandle<Page> {
        &self.switch
    }

    pub fn notification_list(&self) -> &ListHandle<Notification> {
        &self.toasts
    }

    pub fn show_page(&self, page: Page) {
        self.page.set(page);
    }

    pub fn active_page(&self) -> Page {
        self.page.get()
    }

    /// Screen off: pause every view; in-flight calls keep running
    pub fn suspend(&self) {
        self.tree.pause(self.shell);
    }

    pub fn resume(&self) {
        self.tree.resume(self.shell);
    }

    /// Outline of everything currently visible
    pub fn render(&self) -> String {
        let surface = self.surface.borrow();
        surface.outline(surface.root())
    }

    pub fn visible_texts(&self) -> Vec<String> {
        let surface = self.surface.borrow();
        surface.visible_texts(surface.root())
    }

    // =========================================================================
    // User actions
    // =========================================================================

    pub async fn fetch_metar(&self, icao: &str) -> Result<WeatherReport> {
        let result = self.call::<GetMetar>(IcaoRequest::new(icao)).await;
        let report = self.report(result, &format!("METAR {icao}"), |r| {
            format!("METAR updated for {}", r.icao)
        })?;
        self.state.metar.set(Some(report.clone()));
        Ok(report)
    }

    pub async fn fetch_taf(&self, icao: &str) -> Result<WeatherReport> {
        let result = self.call::<GetTaf>(IcaoRequest::new(icao)).await;
        let report = self.report(result, &format!("TAF {icao}"), |r| {
            format!("TAF updated for {}", r.icao)
        })?;
        self.state.taf.set(Some(report.clone()));
        Ok(report)
    }

    pub async fn fetch_runways(&self, icao: &str) -> Result<Vec<Runway>> {
        let result = self.call::<GetRunways>(IcaoRequest::new(icao)).await;
        let runways = self.report(result, &format!("Runways {icao}"), |r| {
            format!("{} runways loaded for {icao}", r.len())
        })?;
        self.state.runways.set(runways.clone());
        Ok(runways)
    }

    pub async fn import_flight_plan(&self, pilot_id: &str) -> Result<FlightPlan> {
        let result = self
            .call::<ImportFlightPlan>(FlightPlanRequest::new(pilot_id))
            .await;
        let plan = self.report(result, "Flight plan import", |p| {
            format!("Flight plan {}-{} imported", p.origin, p.destination)
        })?;
        self.state.flight_plan.set(Some(plan.clone()));
        Ok(plan)
    }

    /// Activate or clear a simulated failure
    pub async fn set_failure(&self, failure_id: &str, active: bool) -> Result<FailureState> {
        let request = FailureRequest::new(failure_id);
        let result = if active {
            self.call::<ActivateFailure>(request).await
        } else {
            self.call::<DeactivateFailure>(request).await
        };
        let state = self.report(result, &format!("Failure {failure_id}"), |s| {
            let verb = if s.active { "activated" } else { "cleared" };
            format!("Failure {} {verb}", s.failure_id)
        })?;

        let failures = &self.state.active_failures;
        let listed = failures.position(|f| *f == state.failure_id).is_some();
        if state.active && !listed {
            failures.push(state.failure_id.clone());
        } else if !state.active && listed {
            failures.remove_where(|f| *f == state.failure_id);
        }
        Ok(state)
    }

    async fn call<C: RpcCall>(&self, request: C::Request) -> Result<C::Response, RpcError> {
        self.client.call::<C>(request)?.await
    }

    /// Turn an outcome into a notification
    fn report<T>(
        &self,
        result: Result<T, RpcError>,
        action: &str,
        success: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.notifications.show(NotificationKind::Success, success(&value));
                Ok(value)
            }
            Err(err) => {
                let kind = match err {
                    RpcError::Validation(_) => NotificationKind::Warning,
                    _ => NotificationKind::Error,
                };
                self.notifications.show(kind, format!("{action} failed: {err}"));
                Err(anyhow::Error::new(err).context(format!("{action} failed")))
            }
        }
    }

    // =========================================================================
    // Ticker
    // =========================================================================

    /// Advance notification countdowns by the elapsed time
    pub fn tick(&self, elapsed: Duration) -> usize {
        self.notifications.tick(elapsed).len()
    }

    /// Drive notification countdowns at the configured period, for `ticks`
    /// periods or forever
    pub async fn run_ticker(&self, ticks: Option<u64>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = interval.tick().await;
        let mut count = 0u64;

        while ticks.map_or(true, |limit| count < limit) {
            let now = interval.tick().await;
            let expired = self.notifications.tick(now - last);
            if !expired.is_empty() {
                tracing::debug!(expired = expired.len(), "notifications expired");
            }
            last = now;
            count += 1;
        }
    }
}

impl Drop for EfbApp {
    fn drop(&mut self) {
        self.tree.unmount(self.shell);
    }
}

fn build_shell(
    scope: &Scope<'_>,
    client: &RpcClient,
    notifications: &NotificationCenter,
    page: &Subject<Page>,
    state: &SessionState,
) -> Result<(SwitchHandle<Page>, ListHandle<Notification>), ViewError> {
    let status = client
        .initialized_state()
        .map(|ready| if *ready { "READY" } else { "CONNECTING" });
    scope.own(status.binding().clone());
    scope.child("status", |scope| {
        scope.bind_text(&status, |s| format!("SIM {s}"));
    });

    let switch = page_switch(state).mount(scope.tree(), Some(scope.id()), scope.element(), page)?;

    let toasts = efb_view::mount_list(
        scope.tree(),
        Some(scope.id()),
        scope.element(),
        notifications.active(),
        render_notification,
    )?;

    Ok((switch, toasts))
}

fn page_switch(state: &SessionState) -> Switch<Page> {
    let runways = state.runways.clone();
    let metar = state.metar.clone();
    let taf = state.taf.clone();
    let plan = state.flight_plan.clone();
    let failures = state.active_failures.clone();

    Switch::new()
        .page(Page::Map, "map", move |scope| {
            scope.child("title", |scope| scope.set_text(Page::Map.title()));
            scope.list(&runways, |scope, rwy, _, _| {
                scope.set_text(&format!(
                    "RWY {} {:03}° {} m",
                    rwy.designator, rwy.heading_deg, rwy.length_m
                ));
            });
        })
        .page(Page::Weather, "weather", move |scope| {
            scope.child("title", |scope| scope.set_text(Page::Weather.title()));
            scope.child("metar", |scope| {
                scope.bind_text(&metar, |report| weather_line("METAR", report));
            });
            scope.child("taf", |scope| {
                scope.bind_text(&taf, |report| weather_line("TAF", report));
            });
        })
        .page(Page::FlightPlan, "flightplan", move |scope| {
            scope.child("title", |scope| scope.set_text(Page::FlightPlan.title()));
            scope.child("route", |scope| {
                scope.bind_text(&plan, |plan| match plan {
                    Some(p) => format!(
                        "{} {} {} FL{}",
                        p.origin,
                        p.route.join(" "),
                        p.destination,
                        p.cruise_altitude_ft / 100
                    ),
                    None => "No flight plan loaded".to_string(),
                });
            });
        })
        .page(Page::Failures, "failures", move |scope| {
            scope.child("title", |scope| scope.set_text(Page::Failures.title()));
            scope.list(&failures, |scope, id, _, _| {
                scope.set_text(&format!("{id} ACTIVE"));
            });
        })
}

fn weather_line(label: &str, report: &Option<WeatherReport>) -> String {
    match report {
        Some(report) => report.raw.clone(),
        None => format!("{label} --"),
    }
}

fn render_notification(
    scope: &Scope<'_>,
    notification: &Notification,
    _index: usize,
    sink: &mut Vec<Subscription>,
) {
    let headline = format!("[{}] {}", notification.kind().label(), notification.text());
    match notification.remaining() {
        Some(remaining) => {
            let element = scope.element();
            let surface = scope.tree().surface();
            sink.push(remaining.sub(
                move |left| {
                    let text = format!("{headline} ({:.1}s)", left.as_secs_f32());
                    surface.borrow_mut().set_text(element, &text);
                },
                true,
            ));
        }
        None => scope.set_text(&headline),
    }
}
