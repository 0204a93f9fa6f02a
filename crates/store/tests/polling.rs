use std::sync::Arc;
use std::time::Duration;

use civis_core::{
    CatalogResource, FeatureMeta, FetchTimeouts, FieldSelector, GeoPoint, Language, ResourceBinding, ResourceFormat, Row,
    RowSelection, Settings,
};
use civis_formats::NormalizeOptions;
use civis_hub::{MockReply, MockTransport, ResourceFetcher};
use civis_store::{BindingRegistry, Entity, EntityView, PollingBinder, RefreshOutcome, TRACKER_STATE};
use pretty_assertions::assert_eq;
use serde_json::json;

const URL: &str = "http://data.test/stations.json?lang=en";

fn fetcher(mock: &Arc<MockTransport>) -> ResourceFetcher {
    let t = Duration::from_millis(50);
    ResourceFetcher::new("http://catalog.test/api", mock.clone(), FetchTimeouts { api: t, resource: t, binary: t, wfs: t })
}

fn station(name: &str, t: f64) -> Row {
    Row::from_value(json!({"name": name, "measurements": [{"code": "t", "description": "temp"}], "t": t})).unwrap()
}

fn json_binding() -> ResourceBinding {
    ResourceBinding {
        title: "Stations".into(),
        language: Language::En,
        group_id: "weather".into(),
        package_id: "p1".into(),
        resource: CatalogResource {
            id: "r-json".into(),
            name: "Stations".into(),
            format_tag: "JSON".into(),
            url: "http://data.test/stations.json".into(),
        },
        format: ResourceFormat::Json,
        url: URL.into(),
        rows: RowSelection::single(0),
        fields: vec![FieldSelector::measurement("t")],
        columns: None,
        snapshot: vec![station("Bolzano", 21.4), station("Merano", 19.0)],
        created_ts: 1_700_000_000,
    }
}

fn sensor_values(binder: &PollingBinder) -> Vec<(Option<serde_json::Value>, bool)> {
    binder.entities().iter().map(|e| (e.value(), e.available())).collect()
}

#[tokio::test]
async fn timed_out_refresh_keeps_values_and_availability() {
    let mock = Arc::new(MockTransport::new());
    mock.route("http://data.test/stations.json", &[], MockReply::Hang);
    let binder = PollingBinder::new(json_binding(), fetcher(&mock), NormalizeOptions::default());
    let before = sensor_values(&binder);
    assert_eq!(before, vec![(Some(json!(21.4)), true)]);

    let outcome = binder.refresh().await;
    let RefreshOutcome::Retained(err) = outcome else { panic!("expected retained, got {outcome:?}") };
    assert_eq!(err.reason(), "cannot_connect");
    assert_eq!(sensor_values(&binder), before);
    assert_eq!(binder.current().epoch, 0);
}

#[tokio::test]
async fn successful_refresh_swaps_rows_and_bumps_epoch() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json(
        "http://data.test/stations.json",
        &[],
        json!([{"name": "Bolzano", "measurements": [{"code": "t", "description": "temp"}], "t": 23.0, "alt": 262}]),
    );
    let binder = PollingBinder::new(json_binding(), fetcher(&mock), NormalizeOptions::default());
    let mut epochs = binder.subscribe_epoch();

    assert_eq!(binder.refresh().await, RefreshOutcome::Updated { epoch: 1, rows: 1 });
    assert!(epochs.has_changed().unwrap());
    assert_eq!(*epochs.borrow_and_update(), 1);

    let Entity::Sensor(sensor) = &binder.entities()[0] else { panic!("sensor expected") };
    assert_eq!(sensor.value(), Some(json!(23.0)));
    assert_eq!(sensor.object_id(), "sensor.civis_bolzano_temp");
    let attrs = sensor.attributes();
    assert_eq!(attrs.get("alt"), Some(&json!(262)));
    assert!(!attrs.contains_key("t"));
    assert!(!attrs.contains_key("measurements"));
}

#[tokio::test]
async fn rows_vanishing_upstream_make_sensors_unavailable() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json("http://data.test/stations.json", &[], json!([]));
    let mut binding = json_binding();
    binding.rows = RowSelection::single(1);
    let binder = PollingBinder::new(binding, fetcher(&mock), NormalizeOptions::default());
    assert_eq!(sensor_values(&binder), vec![(Some(json!(19.0)), true)]);
    binder.refresh().await;
    assert_eq!(sensor_values(&binder), vec![(None, false)]);
}

#[tokio::test]
async fn concurrent_refresh_is_skipped() {
    let mock = Arc::new(MockTransport::new());
    mock.route("http://data.test/stations.json", &[], MockReply::Hang);
    let binder = PollingBinder::new(json_binding(), fetcher(&mock), NormalizeOptions::default());
    let (first, second) = tokio::join!(binder.refresh(), binder.refresh());
    assert!(matches!(first, RefreshOutcome::Retained(_)), "{first:?}");
    assert_eq!(second, RefreshOutcome::Skipped);
    // the guard is released afterwards
    assert!(matches!(binder.refresh().await, RefreshOutcome::Retained(_)));
}

#[tokio::test]
async fn trackers_are_fixed_points() {
    let feature = |id: &str, lat: f64, lon: f64| Row {
        fields: json!({"NAME_DE": format!("{id} DE"), "NAME_IT": format!("{id} IT"), "note": null})
            .as_object()
            .cloned()
            .unwrap(),
        feature: Some(FeatureMeta { id: Some(id.into()), point: Some(GeoPoint { latitude: lat, longitude: lon }) }),
    };
    let mut binding = json_binding();
    binding.format = ResourceFormat::Wfs;
    binding.rows = RowSelection::All;
    binding.fields.clear();
    binding.snapshot = vec![feature("a", 46.5, 11.3), feature("b", 46.6, 11.1)];

    let mock = Arc::new(MockTransport::new());
    let binder = PollingBinder::new(binding, fetcher(&mock), NormalizeOptions::default());
    let states: Vec<_> = binder.entities().iter().map(Entity::state).collect();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].name, "a DE - a IT");
    assert_eq!(states[0].value, Some(json!(TRACKER_STATE)));
    assert_eq!(states[0].latitude, Some(46.5));
    assert_eq!(states[1].longitude, Some(11.1));
    assert!(!states[0].attributes.contains_key("note"));

    // a failing refresh does not touch trackers
    binder.refresh().await;
    assert!(binder.entities().iter().all(|e| e.available()));
}

#[tokio::test]
async fn registry_activates_refreshes_and_deactivates() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json("http://data.test/stations.json", &[], json!([{"name": "Bolzano", "t": 30.5, "measurements": [{"code": "t", "description": "temp"}]}]));
    let settings = Settings { scan_interval: Duration::from_secs(3600), ..Settings::default() };
    let registry = BindingRegistry::new(fetcher(&mock), &settings);

    let binder = registry.activate("entry-1", json_binding());
    let mut epochs = binder.subscribe_epoch();
    tokio::time::timeout(Duration::from_secs(2), epochs.wait_for(|e| *e >= 1)).await.unwrap().unwrap();
    assert_eq!(registry.entities("entry-1")[0].value(), Some(json!(30.5)));
    assert_eq!(registry.entry_ids(), vec!["entry-1".to_string()]);

    let reloaded = registry.reload("entry-1", json_binding());
    assert!(!Arc::ptr_eq(&binder, &reloaded));
    assert_eq!(registry.entry_ids().len(), 1);

    assert!(registry.deactivate("entry-1"));
    assert!(!registry.deactivate("entry-1"));
    assert!(registry.binder("entry-1").is_none());
    assert!(registry.entities("entry-1").is_empty());
}
