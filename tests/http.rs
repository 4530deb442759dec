//! REST API tests, driving the router in process.

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use datahub::config::HubConfig;
use datahub::server::{AppState, build_router};
use datahub::store::Backend;

const LIDO: &str = include_str!("fixtures/lido-sculpture.xml");

fn app() -> Router {
    let mut config = HubConfig::bundled().unwrap();
    config.storage.backend = Backend::Memory;
    let resolver = config.resolver(None).unwrap();
    build_router(Arc::new(AppState::new(resolver, config)))
}

fn lido_with_id(id: &str) -> String {
    LIDO.replace("rm-bk-ak-1", id)
}

async fn send(app: &Router, method: &str, uri: &str, body: impl Into<Body>) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/xml")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    send(app, "GET", uri, Body::empty()).await
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn post_creates_and_reports_location() {
    let app = app();
    let response = send(&app, "POST", "/data", LIDO).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/data/rm-bk-ak-1");
    let body = json(response).await;
    assert_eq!(body["recordIds"][0], "rm-bk-ak-1");
    assert_eq!(body["_links"]["self"]["href"], "/data/rm-bk-ak-1");

    let response = send(&app, "POST", "/data", LIDO).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json(response).await;
    assert_eq!(body["status"], 409);
    assert_eq!(body["type"], "conflict");
    assert!(body["error"].as_str().unwrap().contains("rm-bk-ak-1"));
}

#[tokio::test]
async fn bad_bodies_map_to_client_errors() {
    let app = app();
    let response = send(&app, "POST", "/data", "").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = send(&app, "POST", "/data", "<lido:lido").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["type"], "malformed_input");
}

#[tokio::test]
async fn get_negotiates_json_and_xml() {
    let app = app();
    send(&app, "POST", "/data", LIDO).await;

    let response = get(&app, "/data/urn:rm:bk-ak-1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["objectIds"][0], "https://example.org/objects/bk-ak-1");
    assert_eq!(
        body["json"]["lidoWrap"]["lido"]["objectPublishedID"]["#text"],
        "https://example.org/objects/bk-ak-1"
    );

    let response = get(&app, "/data/rm-bk-ak-1?format=xml").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/xml")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, LIDO.as_bytes());

    let response = get(&app, "/data/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_creates_then_replaces() {
    let app = app();
    let response = send(&app, "PUT", "/data/obj-2", lido_with_id("obj-2")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/data/obj-2");
    let id = json(response).await["id"].clone();

    let changed = lido_with_id("obj-2").replace(">Portrait<", ">Bust<");
    let response = send(&app, "PUT", "/data/obj-2", changed).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body = json(get(&app, "/data/obj-2").await).await;
    assert_eq!(body["id"], id);
    let sets: Vec<&str> = body["sets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(sets.contains(&"classification:bust"));
    assert!(!sets.contains(&"classification:portrait"));
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let app = app();
    send(&app, "POST", "/data", LIDO).await;

    let response = send(&app, "DELETE", "/data/rm-bk-ak-1", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(get(&app, "/data/rm-bk-ak-1").await.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "DELETE", "/data/rm-bk-ak-1", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_pages_filters_and_links() {
    let app = app();
    for id in ["obj-1", "obj-2", "obj-3"] {
        send(&app, "POST", "/data", lido_with_id(id)).await;
    }

    let body = json(get(&app, "/data").await).await;
    assert_eq!(body["limit"], 5);
    assert_eq!(body["total"], 3);
    assert_eq!(body["_embedded"]["records"].as_array().unwrap().len(), 3);

    let body = json(get(&app, "/data?limit=2&sort=recordIds,desc").await).await;
    let records = body["_embedded"]["records"].as_array().unwrap();
    assert_eq!(records[0]["recordIds"][0], "obj-3");
    assert_eq!(records.len(), 2);
    assert_eq!(
        body["_links"]["next"]["href"],
        "/data?offset=2&limit=2&sort=recordIds%2Cdesc"
    );
    assert!(body["_links"].get("previous").is_none());

    let body = json(get(&app, "/data?set=creator:hendrick_de_keyser&offset=2").await).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["_embedded"]["records"].as_array().unwrap().len(), 1);
    assert!(body["_links"].get("previous").is_some());

    assert_eq!(get(&app, "/data?limit=100").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(get(&app, "/data?sort=raw,asc").await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn offsets_past_the_end_give_empty_pages() {
    let app = app();
    send(&app, "POST", "/data", LIDO).await;

    for (uri, embedded) in [
        ("/data?offset=18446744073709551615", "records"),
        ("/sets?offset=18446744073709551615", "sets"),
        ("/data?offset=18446744073709551615&limit=99&set=creator:hendrick_de_keyser", "records"),
    ] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let body = json(response).await;
        assert!(body["_embedded"][embedded].as_array().unwrap().is_empty(), "{uri}");
        assert!(body["_links"].get("next").is_none(), "{uri}");
        assert!(body["_links"].get("previous").is_some(), "{uri}");
    }
}

#[tokio::test]
async fn sets_are_listed_and_addressable() {
    let app = app();
    send(&app, "POST", "/data", LIDO).await;

    let body = json(get(&app, "/sets?limit=10").await).await;
    assert_eq!(body["total"], 5);
    let specs: Vec<&str> = body["_embedded"]["sets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["spec"].as_str())
        .collect();
    assert_eq!(specs[0], "classification:fine_art_dutch");

    let body = json(get(&app, "/sets/creator:hendrick_de_keyser").await).await;
    assert_eq!(body["name"], "Hendrick de Keyser");

    assert_eq!(get(&app, "/sets/creator:nobody").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_counts() {
    let app = app();
    send(&app, "POST", "/data", LIDO).await;
    let body = json(get(&app, "/health").await).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["records"], 1);
    assert_eq!(body["rules"], 4);
}
