//! Route caching, stream recreation and teardown.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use stream_filter_chain::cluster::{ClusterInfo, ClusterManager};
use stream_filter_chain::filter::FilterHeadersStatus;
use stream_filter_chain::routing::Route;

fn clusters() -> Arc<ClusterManager> {
    let clusters = ClusterManager::default();
    clusters.insert(ClusterInfo {
        name: "payments-backend".to_string(),
        connect_timeout: Duration::from_millis(250),
        max_requests: 64,
    });
    Arc::new(clusters)
}

#[test]
fn test_route_is_evaluated_once_per_stream() {
    let recorder = Recorder::new()
        .with_route(Route::new("payments", "payments-backend").with_tracing_tag("team", "billing"));
    let mut manager = stream(Chain::new(), &recorder).with_cluster_lookup(clusters());

    manager.decode_headers(get("/pay"), true);
    assert_eq!(recorder.route_evaluations(), 1);

    assert_eq!(manager.route().unwrap().name(), "payments");
    assert_eq!(manager.route().unwrap().cluster(), "payments-backend");
    let cluster = manager.cluster_info().unwrap();
    assert_eq!(cluster.max_requests, 64);
    assert_eq!(cluster.connect_timeout, Duration::from_millis(250));
    assert_eq!(
        manager.tracing_tags(),
        &[("team".to_string(), "billing".to_string())]
    );
    assert_eq!(recorder.route_evaluations(), 1);
    assert_eq!(manager.stream_info().route_name.as_deref(), Some("payments"));
}

#[test]
fn test_cleared_route_cache_is_re_evaluated() {
    let log = new_log();
    let recorder = Recorder::new().with_route(Route::new("v1", "payments-backend"));
    let rerouter = recorder.clone();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let names = Arc::clone(&seen);
    let chain = Chain::new()
        .decoder(TestDecoder::new("a", &log).on_headers(move |cb, _end| {
            rerouter.set_route(Some(Route::new("v2", "unknown-backend")));
            cb.clear_route_cache();
            FilterHeadersStatus::Continue
        }))
        .decoder(TestDecoder::new("b", &log).on_headers(move |cb, _end| {
            let route = cb.route().unwrap();
            names.lock().unwrap().push(route.name().to_string());
            assert!(cb.cluster_info().is_none());
            FilterHeadersStatus::Continue
        }));
    let mut manager = stream(chain, &recorder).with_cluster_lookup(clusters());

    manager.decode_headers(get("/"), true);

    assert_eq!(*seen.lock().unwrap(), vec!["v2".to_string()]);
    assert_eq!(recorder.route_evaluations(), 2);
    assert_eq!(manager.stream_info().route_name.as_deref(), Some("v2"));
}

#[test]
fn test_missing_route_leaves_cache_empty() {
    let recorder = Recorder::new();
    let mut manager = stream(Chain::new(), &recorder);

    manager.decode_headers(get("/"), true);

    assert!(manager.route().is_none());
    assert!(manager.cluster_info().is_none());
    assert!(manager.tracing_tags().is_empty());
    assert!(manager.stream_info().route_name.is_none());
}

#[test]
fn test_bodiless_request_can_be_recreated() {
    let log = new_log();
    let recorder = Recorder::new().accepting_new_streams();
    let outcome = Arc::new(Mutex::new(None));
    let result = Arc::clone(&outcome);
    let chain = Chain::new()
        .decoder(TestDecoder::new("a", &log).on_headers(move |cb, _end| {
            *result.lock().unwrap() = Some(cb.recreate_stream());
            FilterHeadersStatus::StopIteration
        }))
        .decoder(TestDecoder::new("b", &log));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(get("/redirected"), true);

    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert_eq!(recorder.events(), vec![Wire::NewStream]);
    assert!(manager.state().recreated);
    assert!(manager.is_finished());
    assert_eq!(count_entries(&log, "b:headers end=true"), 0);
}

#[test]
fn test_request_with_body_cannot_be_recreated() {
    let log = new_log();
    let recorder = Recorder::new().accepting_new_streams();
    let outcome = Arc::new(Mutex::new(None));
    let result = Arc::clone(&outcome);
    let chain = Chain::new().decoder(TestDecoder::new("a", &log).on_trailers(move |cb| {
        *result.lock().unwrap() = Some(cb.recreate_stream());
        stream_filter_chain::FilterTrailersStatus::Continue
    }));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(post("/"), false);
    manager.decode_data(body("payload"), false);
    manager.decode_trailers(trailers());

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(recorder.count(&Wire::NewStream), 0);
    assert!(!manager.state().recreated);
    assert_eq!(recorder.count(&Wire::RequestTrailers), 1);
}

#[test]
fn test_refused_recreation_keeps_request_headers() {
    let log = new_log();
    let recorder = Recorder::new();
    let outcome = Arc::new(Mutex::new(None));
    let result = Arc::clone(&outcome);
    let chain = Chain::new().decoder(TestDecoder::new("a", &log).on_headers(move |cb, _end| {
        *result.lock().unwrap() = Some(cb.recreate_stream());
        FilterHeadersStatus::Continue
    }));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(get("/"), true);

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(recorder.events(), vec![Wire::RequestHeaders { end_stream: true }]);
    assert!(manager.request_headers().is_some());
}

#[test]
fn test_every_filter_is_destroyed_once() {
    let log = new_log();
    let recorder = Recorder::new();
    let chain = Chain::new()
        .decoder(TestDecoder::new("a", &log))
        .encoder(TestEncoder::new("b", &log));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(get("/"), true);
    manager.destroy();
    manager.destroy();
    drop(manager);

    assert_eq!(count_entries(&log, "a:destroy"), 1);
    assert_eq!(count_entries(&log, "b:destroy"), 1);
}

#[test]
fn test_dropped_stream_destroys_filters() {
    let log = new_log();
    let recorder = Recorder::new();
    let chain = Chain::new().decoder(TestDecoder::new("a", &log));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(post("/"), false);
    drop(manager);

    assert_eq!(entries(&log), vec!["a:headers end=false", "a:destroy"]);
}

#[test]
fn test_destroyed_stream_drops_frames() {
    let log = new_log();
    let recorder = Recorder::new();
    let chain = Chain::new().decoder(TestDecoder::new("a", &log));
    let mut manager = stream(chain, &recorder);

    manager.decode_headers(post("/"), false);
    manager.destroy();
    manager.decode_data(body("late"), true);
    manager.encode_headers(ok(), true);

    assert_eq!(recorder.events(), vec![Wire::RequestHeaders { end_stream: false }]);
    assert!(manager.is_finished());
}
