use std::{
    io,
    sync::{Arc, Mutex},
};

use actix_web::{App, http::StatusCode, test};
use m3u8_peek::{
    proxy::{FetchRequest, FetchResult, ProxySettings, init_http_client},
    server,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const PLAYLIST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXTINF:10,\nsegment1.ts\n#EXT-X-ENDLIST\n";

async fn playlist_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(PLAYLIST, "application/vnd.apple.mpegurl"),
        )
        .mount(&server)
        .await;
    server
}

macro_rules! app {
    ($settings:expr) => {{
        let settings = $settings;
        test::init_service(App::new().configure(server::routes(
            init_http_client(&settings).unwrap(),
            settings,
        )))
        .await
    }};
}

/// Collects formatted log output so tests can look at it
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn post(body: &impl serde::Serialize) -> actix_web::test::TestRequest {
    test::TestRequest::post().uri("/api/fetch-m3u8").set_json(body)
}

#[actix_web::test]
async fn relays_upstream_body_verbatim() {
    let upstream = playlist_server().await;
    let app = app!(ProxySettings::default());
    let url = format!("{}/playlist.m3u8", upstream.uri());

    let res = test::call_service(&app, post(&FetchRequest::new(&url)).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: FetchResult = test::read_body_json(res).await;
    assert_eq!(
        body,
        FetchResult::Content {
            content: PLAYLIST.to_string()
        }
    );

    // Same request, same answer
    let again: FetchResult =
        test::call_and_read_body_json(&app, post(&FetchRequest::new(&url)).to_request()).await;
    assert_eq!(again, body);
}

#[actix_web::test]
async fn plain_fetch_sends_no_spoofed_headers() {
    let upstream = playlist_server().await;
    let app = app!(ProxySettings::default());

    let req = post(&json!({ "url": format!("{}/playlist.m3u8", upstream.uri()) })).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("referer").is_none());
    assert!(received[0].headers.get("user-agent").is_none());
}

#[actix_web::test]
async fn empty_optional_headers_count_as_omitted() {
    let upstream = playlist_server().await;
    let app = app!(ProxySettings::default());

    let req = post(&json!({
        "url": format!("{}/playlist.m3u8", upstream.uri()),
        "referer": "",
        "userAgent": ""
    }))
    .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    assert!(received[0].headers.get("referer").is_none());
    assert!(received[0].headers.get("user-agent").is_none());
}

#[actix_web::test]
async fn forwards_spoofed_headers_exactly() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live.m3u8"))
        .and(header("referer", "https://player.example.com/watch"))
        .and(header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .expect(1)
        .mount(&upstream)
        .await;
    let app = app!(ProxySettings::default());

    let request = FetchRequest::new(format!("{}/live.m3u8", upstream.uri()))
        .with_referer("https://player.example.com/watch")
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)");
    let body: FetchResult = test::call_and_read_body_json(&app, post(&request).to_request()).await;

    assert_eq!(
        body,
        FetchResult::Content {
            content: PLAYLIST.to_string()
        }
    );
}

#[actix_web::test]
async fn missing_url_is_rejected_without_fetching() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;
    let app = app!(ProxySettings::default());

    for body in [json!({}), json!({ "url": "" }), json!({ "url": null, "referer": upstream.uri() })] {
        let res = test::call_service(&app, post(&body).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body, json!({ "error": "URL is required" }));
    }
}

#[actix_web::test]
async fn unreadable_body_gets_error_envelope() {
    let app = app!(ProxySettings::default());

    let req = test::TestRequest::post()
        .uri("/api/fetch-m3u8")
        .insert_header(("content-type", "application/json"))
        .set_payload("{ not json")
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({ "error": "Invalid request body" }));
}

#[actix_web::test]
async fn unreachable_upstream_is_a_generic_server_error() {
    // Nothing listens on the TCP port multiplexer port
    let url = "http://127.0.0.1:1/playlist.m3u8";
    let app = app!(ProxySettings::default());

    let res = test::call_service(&app, post(&FetchRequest::new(url)).to_request()).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({ "error": "Failed to fetch playlist" }));
}

#[actix_web::test]
async fn non_success_upstream_status_is_a_failure() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("geo blocked"))
        .mount(&upstream)
        .await;
    let app = app!(ProxySettings::default());

    let res = test::call_service(
        &app,
        post(&FetchRequest::new(format!("{}/playlist.m3u8", upstream.uri()))).to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({ "error": "Failed to fetch playlist" }));
}

#[actix_web::test]
async fn allow_list_blocks_other_hosts() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .expect(0)
        .mount(&upstream)
        .await;
    let app = app!(ProxySettings::new(["cdn.example.com".to_string()]));

    let res = test::call_service(
        &app,
        post(&FetchRequest::new(format!("{}/playlist.m3u8", upstream.uri()))).to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({ "error": "Destination host is not allowed" }));
}

#[actix_web::test]
async fn allow_list_lets_listed_hosts_through() {
    let upstream = playlist_server().await;
    let app = app!(ProxySettings::new(["127.0.0.1".to_string()]));

    let body: FetchResult = test::call_and_read_body_json(
        &app,
        post(&FetchRequest::new(format!("{}/playlist.m3u8", upstream.uri()))).to_request(),
    )
    .await;
    assert_eq!(
        body,
        FetchResult::Content {
            content: PLAYLIST.to_string()
        }
    );
}

#[actix_web::test]
async fn unreachable_upstream_is_logged_but_not_leaked() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = app!(ProxySettings::default());
    let res = test::call_service(
        &app,
        post(&FetchRequest::new("http://127.0.0.1:1/playlist.m3u8")).to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(test::read_body(res).await.to_vec()).unwrap();
    assert_eq!(body, r#"{"error":"Failed to fetch playlist"}"#);

    let logs = logs.contents();
    let line = logs
        .lines()
        .find(|line| line.contains("ERROR") && line.contains("Fetch error"))
        .unwrap_or_else(|| panic!("no upstream error logged in:\n{logs}"));
    assert!(line.contains("kind: Request"));
    assert!(!body.contains("kind: Request"));
    assert!(!body.contains("127.0.0.1"));
}

#[actix_web::test]
async fn redirect_off_the_allow_list_is_refused() {
    let foreign = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nFOREIGN"))
        .expect(0)
        .mount(&foreign)
        .await;
    // Same server, but under a host name the allow-list does not cover
    let foreign_url = format!("{}/secret.m3u8", foreign.uri()).replace("127.0.0.1", "localhost");

    let allowed = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hop.m3u8"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", foreign_url.as_str()))
        .expect(1)
        .mount(&allowed)
        .await;

    let app = app!(ProxySettings::new(["127.0.0.1".to_string()]));
    let res = test::call_service(
        &app,
        post(&FetchRequest::new(format!("{}/hop.m3u8", allowed.uri()))).to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body, json!({ "error": "Destination host is not allowed" }));
}

#[actix_web::test]
async fn redirect_within_the_allow_list_is_followed() {
    let upstream = playlist_server().await;
    Mock::given(method("GET"))
        .and(path("/hop.m3u8"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/playlist.m3u8", upstream.uri()).as_str()),
        )
        .mount(&upstream)
        .await;

    let app = app!(ProxySettings::new(["127.0.0.1".to_string()]));
    let body: FetchResult = test::call_and_read_body_json(
        &app,
        post(&FetchRequest::new(format!("{}/hop.m3u8", upstream.uri()))).to_request(),
    )
    .await;

    assert_eq!(
        body,
        FetchResult::Content {
            content: PLAYLIST.to_string()
        }
    );
}
