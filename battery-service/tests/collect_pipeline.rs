use battery_client::{load_latest, UnitStatus};
use battery_service::{
    collect,
    config::{CollectorConfig, RegistryConfig},
    PipelineError,
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn record(id: &str, name: &str, power_kw: f64) -> Value {
    json!({
        "EinheitMastrNummer": id,
        "EinheitName": name,
        "AnlagenbetreiberName": "Speicher GmbH",
        "BetriebsStatusId": 35,
        "Bruttoleistung": power_kw,
        "NutzbareSpeicherkapazitaet": power_kw * 2.0,
        "Batterietechnologie": 727,
        "Bundesland": "Bayern",
        "Breitengrad": 48.1,
        "Laengengrad": 11.6,
        "InbetriebnahmeDatum": "/Date(1672531200000)/"
    })
}

fn registry(server: &MockServer) -> RegistryConfig {
    RegistryConfig {
        base_url: server.uri(),
        page_size: 4,
        max_retries: 1,
        retry_backoff_ms: 1,
        max_backoff_ms: 2,
        timeout_secs: 5,
        ..RegistryConfig::default()
    }
}

fn collector(dir: &tempfile::TempDir) -> CollectorConfig {
    CollectorConfig {
        min_power_kw: 1000.0,
        output_dir: dir.path().to_path_buf(),
        ..CollectorConfig::default()
    }
}

async fn mount_two_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(header("Ocp-Apim-Subscription-Key", "test-key"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": [
                record("SEE0001", "Klein", 500.0),
                record("SEE0002", "Mittel", 2000.0),
                record("SEE0003", "Gross", 6000.0),
                { "EinheitMastrNummer": "SEE0004", "BetriebsStatusId": 35 }
            ],
            "Total": 5,
            "Ergebniscode": "OkWeitereDatenVorhanden"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": [record("SEE0002", "Mittel (umbenannt)", 2000.0)],
            "Total": 5,
            "Ergebniscode": "Ok"
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn collects_filters_dedups_and_persists() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let report = collect(&registry(&server), &collector(&dir), "test-key")
        .await
        .unwrap();

    let ids: Vec<_> = report.snapshot.units.iter().map(|u| u.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["SEE0002", "SEE0003"]);
    assert_eq!(report.snapshot.units[0].name, "Mittel (umbenannt)");
    assert!(report.snapshot.units.iter().all(|u| u.power_kw >= 1000.0));
    assert!(report.snapshot.units.iter().all(|u| u.status == UnitStatus::Operating));
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.below_threshold, 1);

    let written = report.written.clone().unwrap();
    assert!(written.archive_path.exists());
    assert_eq!(written.latest_path, dir.path().join("battery_units_latest.json"));

    let loaded = load_latest(&written.latest_path).unwrap();
    assert_eq!(loaded, report.snapshot);
}

#[tokio::test]
async fn unchanged_run_skips_rewrite() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": [record("SEE0010", "Solo", 3000.0)],
            "Ergebniscode": "Ok"
        })))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = CollectorConfig {
        skip_unchanged: true,
        ..collector(&dir)
    };

    let first = collect(&registry(&server), &cfg, "test-key").await.unwrap();
    assert!(first.written.is_some());

    let second = collect(&registry(&server), &cfg, "test-key").await.unwrap();
    assert!(second.written.is_none());
    assert_eq!(second.snapshot.units, first.snapshot.units);
}

#[tokio::test]
async fn rejected_key_fails_without_touching_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let latest = dir.path().join("battery_units_latest.json");
    std::fs::write(&latest, "previous").unwrap();

    let err = collect(&registry(&server), &collector(&dir), "wrong-key")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Auth(_)));
    assert_eq!(std::fs::read_to_string(&latest).unwrap(), "previous");
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let err = collect(&registry(&server), &collector(&dir), "test-key")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TransientFetch { page: 1, attempts: 2, .. }));
    assert!(!dir.path().join("battery_units_latest.json").exists());
}

#[tokio::test]
async fn storage_units_without_battery_code_are_dropped_by_default() {
    let server = MockServer::start().await;
    let mut unknown = record("SEE0021", "Schwungrad", 4000.0);
    unknown["Batterietechnologie"] = json!(999);
    let mut missing = record("SEE0022", "Ohne Angabe", 4000.0);
    missing.as_object_mut().unwrap().remove("Batterietechnologie");

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": [record("SEE0020", "Lithium", 4000.0), unknown, missing],
            "Ergebniscode": "Ok"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = collect(&registry(&server), &collector(&dir), "test-key")
        .await
        .unwrap();
    let ids: Vec<_> = report.snapshot.units.iter().map(|u| u.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["SEE0020"]);
    assert_eq!(report.not_battery, 2);

    let dir = tempfile::tempdir().unwrap();
    let keep_all = CollectorConfig {
        battery_only: false,
        ..collector(&dir)
    };
    let report = collect(&registry(&server), &keep_all, "test-key").await.unwrap();
    assert_eq!(report.snapshot.len(), 3);
    assert_eq!(report.not_battery, 0);
}
