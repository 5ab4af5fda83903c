mod support;

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use fare_scout::{
    ErrorKind, FlightSearcher, SearchEvent, SearchParams, SearchRecorder, Store, spawn_search,
};
use support::{FakeBrowser, international_page, row, test_config};

async fn collect(rx: &mut UnboundedReceiver<SearchEvent>) -> Vec<SearchEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn searcher(fake: &FakeBrowser) -> Arc<FlightSearcher> {
    Arc::new(FlightSearcher::new(&test_config(), fake.launcher()))
}

fn icn_nrt() -> SearchParams {
    SearchParams::new("ICN", "NRT", "20260120")
}

#[tokio::test]
async fn stream_ends_with_exactly_one_success() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);

    let (handle, mut rx) = spawn_search(searcher(&fake), icn_nrt(), false, None);
    let events = collect(&mut rx).await;
    handle.join().await;

    let (last, progress) = events.split_last().unwrap();
    assert!(matches!(last, SearchEvent::Success(results) if results[0].price == 290_000));
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|e| !e.is_terminal()));
    assert!(
        progress
            .iter()
            .any(|e| matches!(e, SearchEvent::Progress(msg) if msg.starts_with("Loading https://")))
    );
}

#[tokio::test]
async fn failure_carries_its_kind() {
    let fake = FakeBrowser::new();
    fake.fail_all_engines();

    let (handle, mut rx) = spawn_search(searcher(&fake), icn_nrt(), false, None);
    let events = collect(&mut rx).await;
    handle.join().await;

    match events.last() {
        Some(SearchEvent::Failure { kind, message }) => {
            assert_eq!(*kind, ErrorKind::BrowserInit);
            assert!(!message.is_empty());
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn cancelling_the_handle_ends_the_stream() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);

    let (handle, mut rx) = spawn_search(searcher(&fake), icn_nrt(), false, None);
    // the task has not been polled yet on this runtime
    handle.cancel();
    let events = collect(&mut rx).await;
    handle.join().await;

    assert_eq!(events.last(), Some(&SearchEvent::Cancelled));
    assert!(fake.launches().is_empty());
}

#[tokio::test]
async fn handles_have_distinct_ids() {
    let fake = FakeBrowser::new();
    international_page(&fake, vec![row("ANA", 290_000, "13:00", "15:25")]);
    let searcher = searcher(&fake);

    let (first, mut rx1) = spawn_search(searcher.clone(), icn_nrt(), false, None);
    let (second, mut rx2) = spawn_search(searcher, icn_nrt(), false, None);
    assert_ne!(first.id(), second.id());

    collect(&mut rx1).await;
    collect(&mut rx2).await;
    first.join().await;
    second.join().await;
}

#[tokio::test]
async fn successful_search_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("flights.db")).await.unwrap();
    let fake = FakeBrowser::new();
    international_page(
        &fake,
        vec![
            row("JAL", 320_000, "09:00", "11:20"),
            row("ANA", 290_000, "13:00", "15:25"),
        ],
    );
    let recorder = SearchRecorder::new(store.clone(), &Default::default());

    let params = SearchParams::new("icn", "nrt", "2026-01-20");
    let (handle, mut rx) = spawn_search(searcher(&fake), params, false, Some(recorder));
    collect(&mut rx).await;
    handle.join().await;

    let mut conn = store.connect().await.unwrap();
    let snapshot = conn
        .get_last_search(&fare_scout::RouteKey::new("ICN", "NRT", "20260120"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.result_count, 2);
    assert_eq!(conn.get_price_history("ICN", "NRT", 30).await.unwrap().len(), 2);
}
