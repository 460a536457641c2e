use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use goesflux_core::config::UpstreamConfig;
use goesflux_core::types::Channel;
use goesflux_core::upstream::{FluxProvider, SwpcClient, UpstreamFetchError};

const ONE_DAY: &str = r#"[
    {"time_tag":"2024-05-10T12:00:00Z","satellite":16,"flux":1.5e-7,"electron_contaminaton":false,"energy":"0.05-0.4nm"},
    {"time_tag":"2024-05-10T12:00:00Z","satellite":16,"flux":2.0e-6,"electron_contaminaton":false,"energy":"0.1-0.8nm"}
]"#;

/// Serves each published feed span with a different failure mode.
async fn feed(Path((satellite, file)): Path<(String, String)>) -> Response {
    if satellite != "primary" {
        return StatusCode::NOT_FOUND.into_response();
    }
    match file.as_str() {
        "xrays-1-day.json" => ([("content-type", "application/json")], ONE_DAY).into_response(),
        "xrays-3-day.json" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable").into_response(),
        "xrays-7-day.json" => "<html>maintenance</html>".into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn swpc_client(satellite: &str) -> SwpcClient {
    let router = Router::new().route("/json/goes/{satellite}/{file}", get(feed));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    SwpcClient::new(&UpstreamConfig {
        base_url: format!("http://{addr}/"),
        satellite: satellite.to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn fetches_both_channels_from_the_one_day_feed() {
    let client = swpc_client("primary").await;

    let series = client.fetch_flux_series(1).await.unwrap();
    let channels: Vec<Channel> = series.samples.iter().map(|s| s.channel).collect();
    assert_eq!(channels, vec![Channel::Short, Channel::Long]);
}

#[tokio::test]
async fn server_error_maps_to_status() {
    let client = swpc_client("primary").await;

    let err = client.fetch_flux_series(2).await.unwrap_err();
    match err {
        UpstreamFetchError::Status { url, status } => {
            assert_eq!(status, 500);
            assert!(url.ends_with("/json/goes/primary/xrays-3-day.json"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_maps_to_decode() {
    let client = swpc_client("primary").await;

    let err = client.fetch_flux_series(5).await.unwrap_err();
    assert!(matches!(err, UpstreamFetchError::Decode { .. }));
}

#[tokio::test]
async fn unknown_satellite_is_a_status_error() {
    let client = swpc_client("secondary").await;

    let err = client.fetch_flux_series(1).await.unwrap_err();
    assert!(matches!(err, UpstreamFetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn unpublished_span_is_rejected_before_any_request() {
    let client = swpc_client("primary").await;

    assert!(matches!(
        client.fetch_flux_series(0).await,
        Err(UpstreamFetchError::UnsupportedWindow(0))
    ));
    assert!(matches!(
        client.fetch_flux_series(8).await,
        Err(UpstreamFetchError::UnsupportedWindow(8))
    ));
}
