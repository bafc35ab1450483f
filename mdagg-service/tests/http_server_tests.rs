//! Integration tests for the mdagg HTTP API
//!
//! Tests cover:
//! - Health endpoint
//! - Artist and album lookups with edge cache headers
//! - MBID validation and JSON error bodies
//! - Album list filtering
//! - Search parameter validation
//! - Track search and search by type
//! - On-demand invalidation and its lock

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::Duration;
use helpers::*;
use mdagg_service::cache::CacheTier;
use mdagg_service::crawler::invalidate::LOCK_KEY;
use mdagg_service::models::{ReleaseGroupSummary, SearchHit, TrackHit};
use mdagg_service::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower::util::ServiceExt; // for `oneshot` method

const EDGE_TTL: i64 = 600;

/// Test helper: Create app over mock providers
fn setup_app(h: &Harness) -> axum::Router {
    let state = AppState {
        aggregator: h.aggregator.clone(),
        sweep: Arc::new(h.sweep()),
        registry: h.registry.clone(),
        edge_ttl: EDGE_TTL,
        startup_time: Instant::now(),
    };
    build_router(state)
}

fn catalog() -> Mocks {
    let db = MockDb::new()
        .with_artist(ARTIST_A, "Alpha")
        .with_artist(ARTIST_B, "Beta")
        .with_album(ALBUM_X, "Debut", &[ARTIST_A])
        .with_release(ALBUM_X, "rel-1", ARTIST_A);

    let summary = |id: &str, title: &str, primary: &str, statuses: &[&str]| ReleaseGroupSummary {
        id: id.to_string(),
        title: title.to_string(),
        primary_type: Some(primary.to_string()),
        release_statuses: statuses.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    db.artist_albums.lock().insert(
        ARTIST_A.to_string(),
        vec![
            summary(ALBUM_X, "Debut", "Album", &["Official"]),
            summary("2c1f6b4e-0d1b-4a8e-9d3e-6f0f2f1a9b01", "Single", "Single", &["Official"]),
            summary("3d2a7c5f-1e2c-4b9f-8e4f-7a1a3a2b8c02", "Bootleg", "Album", &["Bootleg"]),
        ],
    );
    *db.search_hits.lock() = vec![SearchHit {
        id: ARTIST_A.to_string(),
        score: 100,
    }];

    Mocks::new(db)
}

/// Test helper: Create request
fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn s_maxage(response: &axum::response::Response) -> i64 {
    let value = response
        .headers()
        .get(header::CACHE_CONTROL)
        .expect("Cache-Control header")
        .to_str()
        .unwrap();
    assert!(value.starts_with("public, "), "unexpected Cache-Control: {}", value);
    assert!(value.ends_with("max-age=0"), "unexpected Cache-Control: {}", value);

    value
        .split(", ")
        .find_map(|part| part.strip_prefix("s-maxage="))
        .and_then(|secs| secs.parse().ok())
        .expect("s-maxage directive")
}

// =============================================================================
// Health Endpoint
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app.oneshot(test_request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mdagg");
    assert!(body["version"].is_string());
    assert_eq!(body["providers"].as_array().unwrap().len(), 4);
    assert_eq!(body["providers"][0]["name"], "mockdb");
}

// =============================================================================
// Artist Endpoint
// =============================================================================

#[tokio::test]
async fn test_artist_returns_composite_and_albums() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", &format!("/artist/{}", ARTIST_A)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Base record TTL is an hour, capped by the edge TTL
    assert_eq!(s_maxage(&response), EDGE_TTL);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["id"], ARTIST_A);
    assert_eq!(body["artistName"], "Alpha");
    assert_eq!(body["overview"], "Overview text");
    assert_eq!(body["albums"].as_array().unwrap().len(), 3);
    assert_eq!(body["images"][0]["coverType"], "Logo");
}

#[tokio::test]
async fn test_artist_mbid_is_case_insensitive() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", &format!("/artist/{}", ARTIST_A.to_uppercase())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["id"], ARTIST_A);
}

#[tokio::test]
async fn test_artist_album_filters() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let uri = format!("/artist/{}?primTypes=album&releaseStatuses=official", ARTIST_A);
    let response = app.oneshot(test_request("GET", &uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    let albums = body["albums"].as_array().unwrap();
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0]["id"], ALBUM_X);
}

#[tokio::test]
async fn test_invalid_mbid_is_bad_request() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", "/artist/not-a-uuid"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_artist_is_not_found() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", &format!("/artist/{}", UNKNOWN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], "Artist not found");
}

#[tokio::test]
async fn test_unavailable_upstream_without_cache_is_503() {
    let mocks = catalog();
    *mocks.db.artist_error.lock() = Some(mdagg_service::error::ProviderError::Status(502));
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", &format!("/artist/{}", ARTIST_A)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "UNAVAILABLE");
}

// =============================================================================
// Album Endpoint
// =============================================================================

#[tokio::test]
async fn test_album_embeds_artists() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", &format!("/album/{}", ALBUM_X)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(s_maxage(&response) <= EDGE_TTL);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["title"], "Debut");
    assert_eq!(body["type"], "Album");
    assert_eq!(body["artists"][0]["id"], ARTIST_A);
    assert_eq!(body["releases"][0]["id"], "rel-1");
    assert_eq!(body["releases"][0]["media"][0]["format"], "CD");
    assert_eq!(body["releases"][0]["tracks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stale_fallback_has_short_edge_lifetime() {
    let mocks = catalog();
    let h = mocks.harness();
    h.aggregator.artist(ARTIST_A).await.unwrap();

    h.fast
        .expire(&format!("artist:{}", ARTIST_A), Duration::seconds(-1))
        .await
        .unwrap();
    h.artists.expire(ARTIST_A, Duration::seconds(-1)).await.unwrap();
    *mocks.db.artist_error.lock() = Some(mdagg_service::error::ProviderError::Status(503));

    let app = setup_app(&h);
    let response = app
        .oneshot(test_request("GET", &format!("/artist/{}", ARTIST_A)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Error TTL is five minutes
    let max_age = s_maxage(&response);
    assert!((295..=300).contains(&max_age), "s-maxage {}", max_age);
}

// =============================================================================
// Search Endpoints
// =============================================================================

#[tokio::test]
async fn test_search_artist() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app
        .oneshot(test_request("GET", "/search/artist?query=alpha&limit=5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["artistName"], "Alpha");
}

#[tokio::test]
async fn test_search_album_includes_tracks_only_on_request() {
    let mocks = catalog();
    *mocks.db.search_hits.lock() = vec![SearchHit {
        id: ALBUM_X.to_string(),
        score: 100,
    }];
    let h = mocks.harness();

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search/album?query=debut"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["title"], "Debut");
    assert_eq!(body[0]["releases"], json!([]));

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search/album?query=debut&includeTracks=true"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["releases"][0]["tracks"][1]["trackName"], "Song 2");
}

#[tokio::test]
async fn test_search_track() {
    let mocks = catalog();
    *mocks.db.track_hits.lock() = vec![TrackHit {
        track_name: "Song 1".to_string(),
        artist_name: "Alpha".to_string(),
        album_id: ALBUM_X.to_string(),
        ..Default::default()
    }];
    let h = mocks.harness();

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search/track?query=song&artist=Alpha&album=Debut"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["trackName"], "Song 1");
    assert_eq!(body[0]["albumId"], ALBUM_X);
    assert_eq!(mocks.db.calls(&mocks.db.track_search_calls), 1);
}

#[tokio::test]
async fn test_search_by_type() {
    let mocks = catalog();
    let h = mocks.harness();

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search?type=artist&query=alpha"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["artistName"], "Alpha");

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search?query=alpha"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["message"], "Invalid request: Type not provided");

    let response = setup_app(&h)
        .oneshot(test_request("GET", "/search?type=label&query=alpha"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["message"], "Invalid request: Unsupported search type label");
}

#[tokio::test]
async fn test_empty_search_is_bad_request() {
    let mocks = catalog();
    let h = mocks.harness();

    for uri in [
        "/search/artist?query=%20%20",
        "/search/artist",
        "/search/album?query=",
        "/search/track?query=",
    ] {
        let response = setup_app(&h).oneshot(test_request("GET", uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
    assert_eq!(mocks.db.calls(&mocks.db.search_calls), 0);
}

// =============================================================================
// Invalidation Endpoint
// =============================================================================

#[tokio::test]
async fn test_invalidate_runs_sweep() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app.oneshot(test_request("POST", "/invalidate")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body, json!({"purged": []}));
}

#[tokio::test]
async fn test_invalidate_conflict_while_locked() {
    let mocks = catalog();
    let h = mocks.harness();
    h.meta
        .set_if_absent(LOCK_KEY, json!("crawler"), Duration::minutes(5))
        .await
        .unwrap();
    let app = setup_app(&h);

    let response = app.oneshot(test_request("POST", "/invalidate")).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_invalidate_requires_post() {
    let mocks = catalog();
    let h = mocks.harness();
    let app = setup_app(&h);

    let response = app.oneshot(test_request("GET", "/invalidate")).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
