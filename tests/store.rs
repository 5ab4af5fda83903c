use tempfile::TempDir;

use fare_scout::store::{AlertState, Trend};
use fare_scout::store::NewPricePoint;
use fare_scout::{FlightResult, RouteKey, SearchParams, Store, StoreError, StoreConnection};

async fn open_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("data").join("flights.db"))
        .await
        .unwrap();
    (dir, store)
}

async fn connect(store: &Store) -> StoreConnection {
    store.connect().await.unwrap()
}

fn fare(airline: &str, price: i64, dep: &str) -> FlightResult {
    FlightResult {
        airline: airline.into(),
        price,
        departure_time: dep.into(),
        arrival_time: "12:00".into(),
        source: "Interpark (Auto)".into(),
        ..FlightResult::default()
    }
}

fn icn_nrt() -> SearchParams {
    SearchParams::new("ICN", "NRT", "20260120").with_return("20260125")
}

#[tokio::test]
async fn open_creates_missing_directories() {
    let (dir, store) = open_store().await;
    assert!(dir.path().join("data").join("flights.db").exists());
    assert_eq!(store.path(), dir.path().join("data").join("flights.db"));

    let mut conn = connect(&store).await;
    let stats = conn.get_stats().await.unwrap();
    assert_eq!(stats, Default::default());
}

#[tokio::test]
async fn favorites_round_trip_the_whole_fare() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let params = icn_nrt();
    let flight = fare("ANA", 290_000, "13:00");

    let id = conn.add_favorite(&flight, &params, "cheap").await.unwrap();
    assert!(conn.is_favorite(&flight, &params.route_key()).await.unwrap());
    assert!(
        !conn
            .is_favorite(&fare("ANA", 290_000, "14:00"), &params.route_key())
            .await
            .unwrap()
    );

    let saved = conn.get_favorite(id).await.unwrap();
    assert_eq!(saved.flight, flight);
    assert_eq!(saved.search_params, params);
    assert_eq!(saved.note, "cheap");
    assert_eq!(saved.return_date.as_deref(), Some("20260125"));

    assert!(conn.update_favorite_note(id, "book friday").await.unwrap());
    assert_eq!(conn.list_favorites().await.unwrap()[0].note, "book friday");

    assert!(conn.remove_favorite(id).await.unwrap());
    assert!(!conn.remove_favorite(id).await.unwrap());
    assert!(matches!(
        conn.get_favorite(id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn favorites_list_newest_first() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let params = icn_nrt();

    let first = conn
        .add_favorite(&fare("JAL", 320_000, "09:00"), &params, "")
        .await
        .unwrap();
    let second = conn
        .add_favorite(&fare("ANA", 290_000, "13:00"), &params, "")
        .await
        .unwrap();

    let ids: Vec<i64> = conn
        .list_favorites()
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn price_history_and_trend() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let route = RouteKey::new("ICN", "NRT", "20260120");

    conn.add_price_history(&NewPricePoint::new(route.clone(), Some("JAL".into()), 300_000))
        .await
        .unwrap();
    let written = conn
        .add_price_history_batch(&[
            NewPricePoint::new(route.clone(), Some("ANA".into()), 280_000),
            NewPricePoint::new(route.clone(), None, 310_000),
        ])
        .await
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(conn.add_price_history_batch(&[]).await.unwrap(), 0);

    let history = conn.get_price_history("ICN", "NRT", 30).await.unwrap();
    let prices: Vec<i64> = history.iter().map(|p| p.price).collect();
    assert_eq!(prices, vec![300_000, 280_000, 310_000]);
    assert_eq!(history[2].airline, None);
    assert!(conn.get_price_history("GMP", "CJU", 30).await.unwrap().is_empty());

    let trend = conn.get_price_trend("ICN", "NRT").await.unwrap();
    assert_eq!(trend.trend, Trend::Up);
    assert_eq!(trend.change, 30_000);
    assert_eq!(trend.min, 280_000);
    assert_eq!(trend.current, 310_000);

    let none = conn.get_price_trend("GMP", "CJU").await.unwrap();
    assert_eq!(none.trend, Trend::Unknown);
}

#[tokio::test]
async fn popular_routes_count_logged_searches() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let icn = icn_nrt();
    let gmp = SearchParams::new("GMP", "CJU", "20260301");

    for price in [300_000, 200_000] {
        conn.log_search(&fare_scout::store::SearchLogEntry::from_search(
            &icn,
            &[fare("ANA", price, "13:00")],
        ))
        .await
        .unwrap();
    }
    conn.log_search(&fare_scout::store::SearchLogEntry::from_search(&gmp, &[]))
        .await
        .unwrap();

    let routes = conn.get_popular_routes(10).await.unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!((routes[0].origin.as_str(), routes[0].count), ("ICN", 2));
    assert_eq!(routes[0].avg_price, Some(250_000.0));
    assert_eq!(routes[1].avg_price, None);

    assert_eq!(conn.get_popular_routes(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn alert_lifecycle() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let route = RouteKey::new("ICN", "NRT", "20260120");

    let id = conn
        .add_price_alert(&route, Some("20260125"), 300_000)
        .await
        .unwrap();
    let alert = &conn.get_active_alerts().await.unwrap()[0];
    assert_eq!(alert.id, id);
    assert_eq!(alert.state(), AlertState::ActiveUnwatched);

    // above target: watched, still active
    assert!(!conn.record_alert_check(id, 320_000).await.unwrap());
    let alert = &conn.get_active_alerts().await.unwrap()[0];
    assert_eq!(alert.state(), AlertState::WatchedNotTriggered);
    assert_eq!(alert.last_price, Some(320_000));

    // a zero price never triggers
    assert!(!conn.record_alert_check(id, 0).await.unwrap());

    assert!(conn.record_alert_check(id, 300_000).await.unwrap());
    assert!(conn.get_active_alerts().await.unwrap().is_empty());
    let all = conn.get_all_alerts().await.unwrap();
    assert_eq!(all[0].state(), AlertState::Triggered);
    assert!(!all[0].is_active);

    // triggering is one-shot
    assert!(!conn.record_alert_check(id, 250_000).await.unwrap());
    assert_eq!(conn.get_all_alerts().await.unwrap()[0].last_price, Some(250_000));

    assert!(conn.delete_alert(id).await.unwrap());
    assert!(!conn.delete_alert(id).await.unwrap());
}

#[tokio::test]
async fn paused_alerts_are_not_checked() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let route = RouteKey::new("GMP", "CJU", "20260301");

    let id = conn.add_price_alert(&route, None, 80_000).await.unwrap();
    assert!(conn.set_alert_active(id, false).await.unwrap());
    assert!(conn.get_active_alerts().await.unwrap().is_empty());
    assert_eq!(
        conn.get_all_alerts().await.unwrap()[0].state(),
        AlertState::Inactive
    );

    assert!(conn.set_alert_active(id, true).await.unwrap());
    assert_eq!(conn.get_active_alerts().await.unwrap().len(), 1);

    assert!(conn.mark_alert_triggered(id).await.unwrap());
    assert!(conn.get_active_alerts().await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_replaces_per_route_and_keeps_full_count() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let params = icn_nrt();
    let route = params.route_key();

    assert!(conn.get_last_search(&route).await.unwrap().is_none());

    let results = vec![
        fare("KAL", 410_000, "18:00"),
        fare("ANA", 290_000, "13:00"),
        fare("JAL", 320_000, "09:00"),
    ];
    assert_eq!(conn.save_last_search(&params, &results, 2).await.unwrap(), 2);

    let snapshot = conn.get_last_search(&route).await.unwrap().unwrap();
    assert_eq!(snapshot.result_count, 3);
    assert_eq!(snapshot.results.len(), 2);
    assert_eq!(snapshot.return_date.as_deref(), Some("20260125"));
    assert!(snapshot.hours_ago < 1.0);
    assert_eq!(snapshot.search_params(), params);

    conn.save_last_search(&params, &results[1..], 0).await.unwrap();
    let snapshot = conn.get_last_search(&route).await.unwrap().unwrap();
    let prices: Vec<i64> = snapshot.results.iter().map(|r| r.price).collect();
    assert_eq!(prices, vec![290_000, 320_000]);
    assert_eq!(conn.get_stats().await.unwrap().snapshots, 1);
}

#[tokio::test]
async fn concurrent_workers_write_their_own_snapshots() {
    let (_dir, store) = open_store().await;
    let destinations = ["NRT", "KIX", "FUK", "BKK"];

    let mut handles = Vec::new();
    for (i, dest) in destinations.iter().enumerate() {
        let store = store.clone();
        let dest = dest.to_string();
        handles.push(tokio::spawn(async move {
            let mut conn = store.connect().await.unwrap();
            let params = SearchParams::new("ICN", dest.as_str(), "20260120");
            let results = vec![fare("ANA", 100_000 + i as i64, "13:00")];
            conn.save_last_search(&params, &results, 0).await.unwrap();
            conn.close().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut conn = connect(&store).await;
    for (i, dest) in destinations.iter().enumerate() {
        let snapshot = conn
            .get_last_search(&RouteKey::new("ICN", *dest, "20260120"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.results[0].price, 100_000 + i as i64);
    }
    assert!(conn.latest_last_search().await.unwrap().is_some());
    assert_eq!(conn.clear_last_search().await.unwrap(), 4);
    assert!(conn.latest_last_search().await.unwrap().is_none());
}

#[tokio::test]
async fn closed_connection_reopens_on_next_use() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    conn.close().await;
    assert!(!conn.is_connected());

    let route = RouteKey::new("ICN", "NRT", "20260120");
    conn.add_price_alert(&route, None, 1).await.unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.get_stats().await.unwrap().price_alerts, 1);
}

#[tokio::test]
async fn stats_and_maintenance() {
    let (_dir, store) = open_store().await;
    let mut conn = connect(&store).await;
    let params = icn_nrt();
    let route = params.route_key();

    conn.add_favorite(&fare("ANA", 290_000, "13:00"), &params, "")
        .await
        .unwrap();
    conn.add_price_history(&NewPricePoint::new(route.clone(), None, 290_000))
        .await
        .unwrap();

    let stats = conn.get_stats().await.unwrap();
    assert_eq!(stats.favorites, 1);
    assert_eq!(stats.price_history, 1);

    // fresh rows survive cleanup
    assert_eq!(conn.cleanup_old_data(90).await.unwrap(), 0);
    conn.optimize().await.unwrap();
    assert_eq!(conn.get_stats().await.unwrap().price_history, 1);
}
