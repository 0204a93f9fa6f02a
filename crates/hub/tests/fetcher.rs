use std::sync::Arc;
use std::time::Duration;

use civis_core::{FetchTimeouts, Language};
use civis_hub::{MockReply, MockTransport, Payload, ResourceFetcher};
use pretty_assertions::assert_eq;
use serde_json::json;

const BASE: &str = "http://catalog.test/api/3/action";

fn fast() -> FetchTimeouts {
    let t = Duration::from_millis(50);
    FetchTimeouts { api: t, resource: t, binary: t, wfs: t }
}

fn fetcher(mock: &Arc<MockTransport>) -> ResourceFetcher {
    ResourceFetcher::new(BASE, mock.clone(), fast()).with_language(Language::It)
}

#[tokio::test]
async fn api_unwraps_envelope_and_sends_language() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json(
        &format!("{BASE}/group_list"),
        &[("all_fields", "true")],
        json!({"success": true, "result": [{"id": "g1", "name": "weather", "display_name": "Weather"}, {"bogus": 1}]}),
    );
    let groups = fetcher(&mock).group_list().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "weather");
    let sent = mock.requests();
    assert!(sent[0].contains("lang=it"), "{sent:?}");
}

#[tokio::test]
async fn failed_envelope_and_bare_errors_are_connectivity() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json(
        &format!("{BASE}/group_show"),
        &[],
        json!({"success": false, "error": {"message": "Not found"}}),
    );
    let f = fetcher(&mock);
    let err = f.group_packages("nope").await.unwrap_err();
    assert_eq!(err.reason(), "cannot_connect");
    assert!(err.to_string().contains("Not found"));

    // unrouted endpoint: 404 with no envelope
    let err = f.package_resources("p").await.unwrap_err();
    assert_eq!(err.reason(), "cannot_connect");
}

#[tokio::test]
async fn packages_and_resources() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json(
        &format!("{BASE}/group_show"),
        &[("id", "g1")],
        json!({"success": true, "result": {"packages": [{"id": "p1", "title": "Meteo"}]}}),
    );
    mock.route_json(
        &format!("{BASE}/package_show"),
        &[("id", "p1")],
        json!({"success": true, "result": {"resources": [
            {"id": "r1", "name": "Stations", "format": "JSON", "url": "http://data.test/s.json"},
            {"id": "r2", "name": "Report", "format": "PDF", "url": "http://data.test/r.pdf"}
        ]}}),
    );
    let f = fetcher(&mock);
    let packages = f.group_packages("g1").await.unwrap();
    assert_eq!(packages[0].title, "Meteo");
    assert_eq!(packages[0].group_id, "g1");
    let resources = f.package_resources("p1").await.unwrap();
    assert_eq!(resources.len(), 2);
    assert!(resources[0].selectable());
    assert!(!resources[1].selectable());
}

#[tokio::test]
async fn timeouts_are_connectivity_errors() {
    let mock = Arc::new(MockTransport::new());
    mock.route("http://data.test/slow.json", &[], MockReply::Hang);
    let err = fetcher(&mock).fetch_json_or_features("http://data.test/slow.json").await.unwrap_err();
    assert_eq!(err.reason(), "cannot_connect");
}

#[tokio::test]
async fn xml_content_is_refetched_as_features() {
    let mock = Arc::new(MockTransport::new());
    mock.route_bytes("http://geo.test/wfs", &[], "text/xml; charset=utf-8", "<x/>");
    mock.route_json(
        "http://geo.test/wfs",
        &[("REQUEST", "GetFeature"), ("OUTPUTFORMAT", "application/json")],
        json!({"type": "FeatureCollection", "features": [{"id": "a"}, {"id": "b"}]}),
    );
    let payload = fetcher(&mock).fetch_json_or_features("http://geo.test/wfs?lang=it").await.unwrap();
    match payload {
        Payload::Features(f) => assert_eq!(f.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.hits("http://geo.test/wfs"), 2);
}

#[tokio::test]
async fn spreadsheet_mime_yields_placeholder() {
    let mock = Arc::new(MockTransport::new());
    mock.route_bytes(
        "http://data.test/book.xlsx",
        &[],
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        vec![0u8; 4],
    );
    let f = fetcher(&mock);
    let payload = f.fetch_json_or_features("http://data.test/book.xlsx").await.unwrap();
    assert_eq!(payload, Payload::SpreadsheetPlaceholder);
    let bytes = f.fetch_binary("http://data.test/book.xlsx").await.unwrap();
    assert_eq!(bytes.len(), 4);
}

#[tokio::test]
async fn invalid_json_is_a_format_error() {
    let mock = Arc::new(MockTransport::new());
    mock.route_bytes("http://data.test/broken.json", &[], "application/json", "{not json");
    let err = fetcher(&mock).fetch_json_or_features("http://data.test/broken.json").await.unwrap_err();
    assert_eq!(err.reason(), "invalid_format");
}

#[tokio::test]
async fn geo_features_graceful_and_strict() {
    let mock = Arc::new(MockTransport::new());
    mock.route_json(
        "http://geo.test/wfs",
        &[("TYPENAME", "layer:a"), ("COUNT", "1000"), ("SRSNAME", "EPSG:4326")],
        json!({"features": [{"id": 1}]}),
    );
    mock.route("http://geo.test/wfs", &[("TYPENAME", "layer:down")], MockReply::Fail("refused".into()));
    let f = fetcher(&mock);
    assert_eq!(f.fetch_geo_features("http://geo.test/wfs", "layer:a").await.len(), 1);
    assert!(f.fetch_geo_features("http://geo.test/wfs", "layer:down").await.is_empty());
    assert!(f.try_fetch_geo_features("http://geo.test/wfs", "layer:down").await.is_err());
}
