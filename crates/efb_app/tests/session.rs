use efb_app::{AppConfig, EfbApp, Page};
use efb_core::NotificationKind;
use efb_rpc::{Responder, StaticProvider};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

async fn with_session<F, Fut>(provider: StaticProvider, f: F)
where
    F: FnOnce(Rc<EfbApp>, Rc<StaticProvider>) -> Fut,
    Fut: Future<Output = ()>,
{
    LocalSet::new()
        .run_until(async move {
            let app = Rc::new(EfbApp::new(&AppConfig::default()).unwrap());
            let provider = Rc::new(provider);
            let _responder = Responder::start(app.bus(), Rc::clone(&provider));
            app.client().initialized().await;
            f(app, provider).await;
        })
        .await;
}

fn shows(app: &EfbApp, text: &str) -> bool {
    app.visible_texts().iter().any(|t| t.contains(text))
}

#[tokio::test(start_paused = true)]
async fn test_status_follows_responder_readiness() {
    LocalSet::new()
        .run_until(async {
            let app = EfbApp::new(&AppConfig::default()).unwrap();
            assert!(shows(&app, "SIM CONNECTING"));

            let _responder = Responder::start(app.bus(), Rc::new(StaticProvider::demo()));
            app.client().initialized().await;
            assert!(shows(&app, "SIM READY"));
            assert!(!shows(&app, "SIM CONNECTING"));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_metar_shows_on_weather_page() {
    with_session(StaticProvider::demo(), |app, _| async move {
        app.show_page(Page::Weather);
        assert!(shows(&app, "METAR --"));

        let report = app.fetch_metar("EGLL").await.unwrap();
        assert!(shows(&app, &report.raw));
        assert!(shows(&app, "[success] METAR updated for EGLL"));
        assert_eq!(app.notifications().len(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_hidden_page_catches_up_when_shown() {
    with_session(StaticProvider::demo(), |app, _| async move {
        let weather = app.switch().page(&Page::Weather).unwrap();
        assert_eq!(app.active_page(), Page::Map);
        assert!(app.tree().is_paused(weather));

        let report = app.fetch_metar("KJFK").await.unwrap();
        assert!(!shows(&app, &report.raw));

        app.show_page(Page::Weather);
        assert!(!app.tree().is_paused(weather));
        assert!(app.tree().is_paused(app.switch().page(&Page::Map).unwrap()));
        assert!(shows(&app, &report.raw));
        assert_eq!(app.switch().active_key(), Some(Page::Weather));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_icao_is_reported_without_a_request() {
    with_session(StaticProvider::demo(), |app, _| async move {
        let published = app.bus().publish_count();

        let err = app.fetch_metar("KJ").await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid ICAO code"));
        assert_eq!(app.bus().publish_count(), published);

        let shown = app.notifications().active().get(0).unwrap();
        assert_eq!(shown.kind(), NotificationKind::Warning);
        assert!(shown.text().starts_with("METAR KJ failed"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_data_is_an_error_notification() {
    with_session(StaticProvider::demo(), |app, _| async move {
        assert!(app.fetch_taf("KJFK").await.is_err());
        let shown = app.notifications().active().get(0).unwrap();
        assert_eq!(shown.kind(), NotificationKind::Error);
        assert!(shown.text().contains("no TAF for KJFK"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_runways_and_flight_plan() {
    with_session(StaticProvider::demo(), |app, _| async move {
        assert_eq!(app.fetch_runways("KJFK").await.unwrap().len(), 4);
        assert!(shows(&app, "RWY 04L 044° 3682 m"));
        assert!(shows(&app, "RWY 31L 314° 4442 m"));

        app.fetch_runways("EGLL").await.unwrap();
        assert!(!shows(&app, "RWY 04L"));
        assert!(shows(&app, "RWY 27R 270° 3902 m"));

        app.show_page(Page::FlightPlan);
        assert!(shows(&app, "No flight plan loaded"));
        let plan = app.import_flight_plan("123456").await.unwrap();
        assert_eq!(plan.destination, "EGLL");
        assert!(shows(&app, "KJFK HAPIE DOVEY NATW LIMRI XETBO EGLL FL370"));

        assert!(app.import_flight_plan("").await.is_err());
        assert!(app.import_flight_plan("999999").await.is_err());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_toggling_updates_list() {
    with_session(StaticProvider::demo(), |app, provider| async move {
        app.show_page(Page::Failures);

        app.set_failure("ENG1_FIRE", true).await.unwrap();
        app.set_failure("PITOT_HEAT", true).await.unwrap();
        assert!(provider.is_failure_active("ENG1_FIRE"));
        assert!(shows(&app, "ENG1_FIRE ACTIVE"));
        assert!(shows(&app, "PITOT_HEAT ACTIVE"));

        // Activating twice keeps one row.
        app.set_failure("ENG1_FIRE", true).await.unwrap();
        let rows = app
            .visible_texts()
            .into_iter()
            .filter(|t| t == "ENG1_FIRE ACTIVE")
            .count();
        assert_eq!(rows, 1);

        app.set_failure("ENG1_FIRE", false).await.unwrap();
        assert!(!provider.is_failure_active("ENG1_FIRE"));
        assert!(!shows(&app, "ENG1_FIRE ACTIVE"));
        assert!(shows(&app, "PITOT_HEAT ACTIVE"));

        assert!(app.set_failure("NO_SUCH_FAILURE", true).await.is_err());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_notifications_count_down_and_expire() {
    with_session(StaticProvider::demo(), |app, _| async move {
        app.fetch_metar("KJFK").await.unwrap();
        assert!(shows(&app, "(5.0s)"));

        app.tick(Duration::from_millis(1500));
        assert!(shows(&app, "(3.5s)"));

        assert_eq!(app.tick(Duration::from_millis(3499)), 0);
        assert_eq!(app.notifications().len(), 1);
        assert_eq!(app.tick(Duration::from_millis(1)), 1);
        assert!(app.notifications().is_empty());
        assert!(app.notification_list().is_empty());
        assert!(!shows(&app, "METAR updated"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_ticker_expires_notifications() {
    with_session(StaticProvider::demo(), |app, _| async move {
        app.fetch_metar("KJFK").await.unwrap();
        app.run_ticker(Some(20)).await;
        assert_eq!(app.notifications().len(), 1);

        app.run_ticker(Some(40)).await;
        assert!(app.notifications().is_empty());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_suspend_freezes_screen() {
    with_session(StaticProvider::demo(), |app, _| async move {
        app.show_page(Page::Weather);
        app.suspend();
        assert!(app.tree().is_paused(app.shell()));

        let report = app.fetch_metar("CYQX").await.unwrap();
        assert!(!shows(&app, &report.raw));

        app.resume();
        assert!(shows(&app, &report.raw));
        // Hidden pages stay asleep.
        assert!(app.tree().is_paused(app.switch().page(&Page::Map).unwrap()));
    })
    .await;
}
