//! End-to-end fetch -> parse -> upsert against a mock publisher and in-memory SQLite

use chrono::NaiveDate;
use land_registry::config::{Config, FetchOptions};
use land_registry::ingestion::fetch::SourceFetcher;
use land_registry::ingestion::parse::{open_records, ParseOptions};
use land_registry::ingestion::update::UpdateCoordinator;
use land_registry::ingestion::write::BatchUpserter;
use land_registry::ingestion::{ConflictPolicy, WriteStats};
use land_registry::store::{SaleStore, SchemaLayout};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const THREE_ROWS: &str = "\
\"{1}\",\"100000\",\"2021-01-01 00:00\",\"SW1A1AA\",\"T\",\"N\",\"F\",\"10\",\"\",\"DOWNING STREET\",\"\",\"LONDON\",\"CITY OF WESTMINSTER\",\"GREATER LONDON\",\"A\",\"A\"
\"{2}\",\"invalid\",\"2021-03-01 00:00\",\"SW1A2AA\",\"F\",\"N\",\"L\",\"1\",\"FLAT 4\",\"WHITEHALL\",\"\",\"LONDON\",\"CITY OF WESTMINSTER\",\"GREATER LONDON\",\"A\",\"A\"
\"{1}\",\"120000\",\"2021-06-01 00:00\",\"SW1A1AA\",\"T\",\"N\",\"F\",\"10\",\"\",\"DOWNING STREET\",\"\",\"LONDON\",\"CITY OF WESTMINSTER\",\"GREATER LONDON\",\"A\",\"C\"
";

fn fast_fetch() -> FetchOptions {
    FetchOptions {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn delta(dates: [&str; 2]) -> String {
    format!(
        "\"{{D1}}\",\"325000\",\"{} 00:00\",\"E2 7AA\",\"S\",\"N\",\"F\",\"3\",\"\",\"COLUMBIA ROAD\",\"\",\"LONDON\",\"TOWER HAMLETS\",\"GREATER LONDON\",\"A\",\"A\"\n\
         \"{{D2}}\",\"515000\",\"{} 00:00\",\"E2 7AB\",\"T\",\"N\",\"F\",\"9\",\"\",\"COLUMBIA ROAD\",\"\",\"LONDON\",\"TOWER HAMLETS\",\"GREATER LONDON\",\"A\",\"A\"\n",
        dates[0], dates[1]
    )
}

async fn publisher(body: String, expected_gets: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/2024/24-02-pp-monthly-update-new-version.csv"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2024/24-02-pp-monthly-update-new-version.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_gets)
        .mount(&server)
        .await;
    server
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
}

#[tokio::test]
async fn test_three_row_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pp-sample.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(THREE_ROWS))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("pp-sample.csv");
    let fetcher = SourceFetcher::new(fast_fetch()).unwrap();
    fetcher
        .download(&format!("{}/pp-sample.csv", server.uri()), &dest)
        .await
        .unwrap();

    let store = SaleStore::in_memory(SchemaLayout::Natural).await.unwrap();
    let stats = BatchUpserter::new(&store, ConflictPolicy::Upsert)
        .write_all(open_records(&dest, ParseOptions::default()).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.total_processed, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(store.count().await.unwrap(), 2);

    let first = store.search_postcode_prefix("SW1A1AA", 10).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "1");
    assert_eq!(first[0].price, 120_000);
    assert_eq!(first[0].transfer_date, "2021-06-01");

    let second = store.search_postcode_prefix("SW1A2AA", 10).await.unwrap();
    assert_eq!(second[0].id, "2");
    assert_eq!(second[0].price, 0);
}

#[tokio::test]
async fn test_update_twice_in_same_period_is_noop() {
    let server = publisher(delta(["2024-02-05", "2024-02-19"]), 1).await;
    let temp = tempfile::tempdir().unwrap();
    let config = Config {
        update_base_url: server.uri(),
        temp_dir: temp.path().to_path_buf(),
        fetch: fast_fetch(),
        ..Config::default()
    };
    let store = SaleStore::in_memory(SchemaLayout::Natural).await.unwrap();
    let fetcher = SourceFetcher::new(config.fetch.clone()).unwrap();

    let first = UpdateCoordinator::new(&store, &fetcher, &config)
        .run_update_on(today())
        .await;
    assert!(first.success, "{:?}", first);
    assert_eq!(first.stats.unwrap().new_records, 2);

    let second = UpdateCoordinator::new(&store, &fetcher, &config)
        .run_update_on(today())
        .await;
    assert!(second.success);
    assert_eq!(second.stats, Some(WriteStats::default()));
    assert_eq!(second.message, "Database is already up to date");
}

#[tokio::test]
async fn test_reingesting_same_delta_changes_nothing() {
    // dates older than the period, so the freshness check never short-circuits
    let server = publisher(delta(["2023-11-05", "2023-12-19"]), 2).await;
    let temp = tempfile::tempdir().unwrap();
    let config = Config {
        update_base_url: server.uri(),
        temp_dir: temp.path().to_path_buf(),
        fetch: fast_fetch(),
        ..Config::default()
    };
    let store = SaleStore::in_memory(SchemaLayout::Natural).await.unwrap();
    let fetcher = SourceFetcher::new(config.fetch.clone()).unwrap();

    let first = UpdateCoordinator::new(&store, &fetcher, &config)
        .run_update_on(today())
        .await;
    assert_eq!(first.stats.unwrap().new_records, 2);

    let second = UpdateCoordinator::new(&store, &fetcher, &config)
        .run_update_on(today())
        .await;
    assert!(second.success);
    let stats = second.stats.unwrap();
    assert_eq!(stats.total_processed, 2);
    assert_eq!(stats.succeeded(), 0);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_legacy_layout_runs_the_same_pipeline() {
    let server = publisher(delta(["2023-11-05", "2023-12-19"]), 1).await;
    let temp = tempfile::tempdir().unwrap();
    let config = Config {
        update_base_url: server.uri(),
        temp_dir: temp.path().to_path_buf(),
        fetch: fast_fetch(),
        schema_layout: SchemaLayout::Legacy,
        ..Config::default()
    };
    let store = SaleStore::in_memory(config.schema_layout).await.unwrap();
    let fetcher = SourceFetcher::new(config.fetch.clone()).unwrap();

    let outcome = UpdateCoordinator::new(&store, &fetcher, &config)
        .run_update_on(today())
        .await;

    assert!(outcome.success);
    assert_eq!(store.count().await.unwrap(), 2);
    let found = store.search_postcode_prefix("E27", 10).await.unwrap();
    assert_eq!(found.len(), 2);
}
