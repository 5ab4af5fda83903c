mod support;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use fare_scout::{
    DateOutcome, DatePrice, ErrorKind, FlightSearcher, ParallelConfig, ParallelSearcher,
    ProgressReporter, SearchOutcome, SearchParams, SearchRecorder, Store,
};
use support::{FakeBrowser, international_page, row, test_config};

fn parallel(fake: &FakeBrowser, max_concurrent: usize, max_date_range: usize) -> ParallelSearcher {
    let searcher = Arc::new(FlightSearcher::new(&test_config(), fake.launcher()));
    ParallelSearcher::new(
        searcher,
        &ParallelConfig {
            max_concurrent,
            max_date_range,
        },
    )
}

fn silent() -> Arc<ProgressReporter> {
    Arc::new(ProgressReporter::silent())
}

fn destinations(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[test]
fn concurrency_is_clamped() {
    let fake = FakeBrowser::new();
    assert_eq!(parallel(&fake, 0, 30).max_concurrent(), 1);
    assert_eq!(parallel(&fake, 3, 30).max_concurrent(), 3);
    assert_eq!(parallel(&fake, 16, 30).max_concurrent(), 4);
}

#[tokio::test]
async fn every_destination_gets_its_own_search() {
    let fake = FakeBrowser::new();
    international_page(
        &fake,
        vec![
            row("JAL", 320_000, "09:00", "11:20"),
            row("ANA", 290_000, "13:00", "15:25"),
        ],
    );
    let base = SearchParams::new("ICN", "NRT", "20260120").with_return("20260125");

    let outcomes = parallel(&fake, 2, 30)
        .search_destinations(
            &base,
            &destinations(&["NRT", "KIX", "BKK"]),
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    assert_eq!(
        outcomes.keys().cloned().collect::<Vec<_>>(),
        vec!["BKK", "KIX", "NRT"]
    );
    for outcome in outcomes.values() {
        let results = outcome.as_ref().unwrap().results().unwrap();
        assert_eq!(results[0].price, 290_000);
    }

    let navigations = fake.navigations();
    assert_eq!(navigations.len(), 3);
    assert!(navigations.iter().any(|url| url.contains("c:OSA")));
    assert!(navigations.iter().any(|url| url.contains("c:BKK")));
    // every session was closed
    assert_eq!(fake.close_steps().len(), 12);
}

#[tokio::test]
async fn one_failing_destination_does_not_sink_the_rest() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    let base = SearchParams::new("ICN", "NRT", "20260120");

    let outcomes = parallel(&fake, 2, 30)
        .search_destinations(
            &base,
            &destinations(&["NRT", "X1"]),
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    assert!(outcomes["NRT"].is_ok());
    assert!(outcomes["X1"].is_err());
    assert_eq!(fake.navigations().len(), 1);
}

#[tokio::test]
async fn crashed_destination_worker_still_reports() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    fake.panic_on_url("c:OSA");
    let base = SearchParams::new("ICN", "NRT", "20260120");

    let outcomes = parallel(&fake, 2, 30)
        .search_destinations(
            &base,
            &destinations(&["NRT", "KIX", "BKK"]),
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes["NRT"], Ok(SearchOutcome::Completed(_))));
    assert!(matches!(outcomes["BKK"], Ok(SearchOutcome::Completed(_))));
    match &outcomes["KIX"] {
        Err(err) => assert_eq!(err.kind(), ErrorKind::WorkerPanicked),
        Ok(other) => panic!("expected a worker failure, got {other:?}"),
    }
}

#[tokio::test]
async fn crashed_date_worker_is_marked_failed() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    fake.panic_on_url("-20260121?");
    let base = SearchParams::new("ICN", "NRT", "20260120");

    let outcomes = parallel(&fake, 2, 30)
        .search_date_range(
            &base,
            &destinations(&["20260120", "20260121"]),
            0,
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    assert_eq!(outcomes["20260120"].price(), Some(290_000));
    assert!(matches!(&outcomes["20260121"], DateOutcome::Failed(msg) if msg.contains("panicked")));
}

#[tokio::test]
async fn date_sweep_keeps_the_cheapest_fare_per_date() {
    let fake = FakeBrowser::new();
    international_page(
        &fake,
        vec![
            row("JAL", 320_000, "09:00", "11:20"),
            row("ANA", 290_000, "13:00", "15:25"),
        ],
    );
    let base = SearchParams::new("ICN", "NRT", "20260120");
    let dates = destinations(&["20260120", "20260121", "20260122"]);

    let outcomes = parallel(&fake, 2, 2)
        .search_date_range(&base, &dates, 3, &CancellationToken::new(), &silent())
        .await;

    // only the first two dates fit the range cap
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes["20260120"],
        DateOutcome::Found(DatePrice {
            min_price: 290_000,
            airline: "ANA".into()
        })
    );
    assert_eq!(outcomes["20260121"].price(), Some(290_000));

    let navigations = fake.navigations();
    assert!(navigations.iter().any(|url| url.contains("-20260123?")));
    assert!(navigations.iter().any(|url| url.contains("-20260124?")));
    assert!(!navigations.iter().any(|url| url.contains("20260122")));
}

#[tokio::test]
async fn unreadable_dates_ask_for_a_manual_search() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![]);
    fake.respond("international_fallback", serde_json::json!([]));
    let base = SearchParams::new("ICN", "NRT", "20260120");

    let outcomes = parallel(&fake, 2, 30)
        .search_date_range(
            &base,
            &destinations(&["20260120", "20260121"]),
            0,
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    assert!(outcomes.values().all(|o| *o == DateOutcome::ManualRequired));
    // extraction failures are not retried
    assert_eq!(fake.navigations().len(), 2);
}

#[tokio::test]
async fn cancelled_sweep_never_launches() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    let base = SearchParams::new("ICN", "NRT", "20260120");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = parallel(&fake, 2, 30)
        .search_date_range(
            &base,
            &destinations(&["20260120", "20260121", "20260122"]),
            0,
            &cancel,
            &silent(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.values().all(|o| *o == DateOutcome::Cancelled));
    assert!(fake.launches().is_empty());

    let by_destination = parallel(&fake, 2, 30)
        .search_destinations(&base, &destinations(&["NRT"]), &cancel, &silent())
        .await;
    assert!(matches!(by_destination["NRT"], Ok(SearchOutcome::Cancelled)));
}

#[tokio::test]
async fn workers_record_through_their_own_connections() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("flights.db")).await.unwrap();
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    let base = SearchParams::new("icn", "nrt", "20260120");

    let searcher = parallel(&fake, 3, 30)
        .with_recorder(SearchRecorder::new(store.clone(), &Default::default()));
    searcher
        .search_destinations(
            &base,
            &destinations(&["NRT", "KIX", "FUK"]),
            &CancellationToken::new(),
            &silent(),
        )
        .await;

    let mut conn = store.connect().await.unwrap();
    let stats = conn.get_stats().await.unwrap();
    assert_eq!(stats.snapshots, 3);
    assert_eq!(stats.search_logs, 3);
    assert_eq!(stats.price_history, 3);
    let popular = conn.get_popular_routes(10).await.unwrap();
    assert!(popular.iter().all(|r| r.origin == "ICN"));
}
