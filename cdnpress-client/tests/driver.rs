//! Tests of single exchanges against an in-process response server.

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use cdnpress_client::driver::{self, Exchange, FaultPlan, FaultPoint, Outcome};
use cdnpress_client::{ClientConfig, DriverError};
use cdnpress_server::config::ServerConfig;
use cdnpress_test::server::TestServer;
use rand::SeedableRng;
use rand::rngs::SmallRng;

fn config(server: &TestServer) -> ClientConfig {
    ClientConfig {
        addr: Some(server.addr()),
        ..Default::default()
    }
}

async fn exchange(
    config: &ClientConfig,
    url: String,
    size: usize,
    plan: FaultPlan,
) -> Result<Outcome, DriverError> {
    let mut rng = SmallRng::seed_from_u64(42);
    let client = driver::build_client(config).unwrap();
    let exchange = Exchange::new(0, url, size, &mut rng);
    driver::execute(&client, config, &exchange, plan, &mut rng).await
}

#[tokio::test]
async fn completes_and_verifies_checksum() {
    cdnpress_test::tracing::init();
    let server = TestServer::new().await;
    let config = config(&server);

    let outcome = exchange(&config, server.url("/path0.js"), 100_000, FaultPlan::default())
        .await
        .unwrap();

    let Outcome::Completed(completed) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(completed.bytes, 100_000);
    assert!(!completed.measurement.cache_hit);
    assert!(completed.measurement.first_byte <= completed.measurement.full_response);
    assert!(!completed.close_connection);
}

#[tokio::test]
async fn checksum_covers_compressed_bytes() {
    let server = TestServer::new().await;
    let config = ClientConfig {
        compression: true,
        ..config(&server)
    };

    let outcome = exchange(&config, server.url("/path1.js"), 50_000, FaultPlan::default())
        .await
        .unwrap();

    let Outcome::Completed(completed) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!(completed.bytes > 0);
    assert!(completed.bytes < 50_000);
}

#[tokio::test]
async fn corrupted_checksum_fails() {
    let server = TestServer::new().await;
    let config = ClientConfig {
        corrupt_checksum: true,
        ..config(&server)
    };

    let error = exchange(&config, server.url("/path2.js"), 1024, FaultPlan::default())
        .await
        .unwrap_err();
    assert!(matches!(error, DriverError::ChecksumMismatch { .. }), "{error}");
}

#[tokio::test]
async fn wrong_checksum_from_server_fails() {
    let server = TestServer::with_router(axum::Router::new().fallback(|| async {
        let mut headers = HeaderMap::new();
        headers.insert("x-content-md5", "00000000000000000000000000000000".parse().unwrap());
        (headers, "xxxx")
    }))
    .await;
    let config = config(&server);

    let error = exchange(&config, server.url("/path3.js"), 4, FaultPlan::default())
        .await
        .unwrap_err();
    let DriverError::ChecksumMismatch {
        expected, computed, ..
    } = error
    else {
        panic!("expected a checksum mismatch");
    };
    assert_eq!(expected, "00000000000000000000000000000000");
    assert_eq!(computed, format!("{:x}", md5::compute(b"xxxx")));
}

#[tokio::test]
async fn verification_can_be_disabled() {
    let server = TestServer::new().await;
    let config = ClientConfig {
        corrupt_checksum: true,
        verify_checksum: false,
        ..config(&server)
    };

    let outcome = exchange(&config, server.url("/path4.js"), 1024, FaultPlan::default()).await;
    assert!(matches!(outcome, Ok(Outcome::Completed(_))));
}

#[tokio::test]
async fn error_status_fails() {
    let server = TestServer::with_router(
        axum::Router::new().fallback(|| async { StatusCode::NOT_FOUND }),
    )
    .await;
    let config = config(&server);

    let error = exchange(&config, server.url("/missing.js"), 1024, FaultPlan::default())
        .await
        .unwrap_err();
    assert!(
        matches!(error, DriverError::Status { status, .. } if status == StatusCode::NOT_FOUND),
        "{error}"
    );
}

#[tokio::test]
async fn refused_connection_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        addr: Some(addr.to_string()),
        ..Default::default()
    };
    let url = format!("http://{addr}/path0.js");

    let error = exchange(&config, url, 1024, FaultPlan::default())
        .await
        .unwrap_err();
    assert!(matches!(error, DriverError::Transport { .. }), "{error}");
}

#[tokio::test]
async fn send_close_aborts_before_body() {
    let server = TestServer::new().await;
    let config = config(&server);
    let plan = FaultPlan {
        send_close: true,
        ..Default::default()
    };

    let outcome = exchange(&config, server.url("/path5.js"), 1024, plan)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Aborted(FaultPoint::SendClose));
}

#[tokio::test]
async fn half_close_reads_at_least_half() {
    let server = TestServer::new().await;
    let config = config(&server);
    let plan = FaultPlan {
        recv_half_close: true,
        ..Default::default()
    };

    let outcome = exchange(&config, server.url("/path6.js"), 100_000, plan)
        .await
        .unwrap();
    let Outcome::Aborted(FaultPoint::RecvHalfClose { read }) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!(read >= 50_000, "read {read}");
    assert!(read < 100_000, "read {read}");
}

#[tokio::test]
async fn full_close_completes_and_requests_reconnect() {
    let server = TestServer::new().await;
    let config = config(&server);
    let plan = FaultPlan {
        recv_full_close: true,
        ..Default::default()
    };

    let outcome = exchange(&config, server.url("/path7.js"), 1024, plan)
        .await
        .unwrap();
    let Outcome::Completed(completed) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(completed.bytes, 1024);
    assert!(completed.close_connection);
}

#[tokio::test]
async fn detects_cache_hits() {
    let server = TestServer::with_router(axum::Router::new().fallback(|| async {
        let mut headers = HeaderMap::new();
        headers.insert("x-cache", "TCP_HIT from edge".parse().unwrap());
        (headers, "xx")
    }))
    .await;
    let config = config(&server);

    let outcome = exchange(&config, server.url("/path8.js"), 2, FaultPlan::default())
        .await
        .unwrap();
    let Outcome::Completed(completed) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!(completed.measurement.cache_hit);
}

#[tokio::test]
async fn server_closing_after_body_is_not_an_error() {
    let server = TestServer::with_config(ServerConfig {
        checksum: true,
        close_after_body_probability: 1.0,
        ..Default::default()
    })
    .await;
    let config = config(&server);

    let mut rng = SmallRng::seed_from_u64(7);
    let client = driver::build_client(&config).unwrap();
    for i in 0..5 {
        let exchange = Exchange::new(0, server.url(&format!("/path{i}.js")), 2048, &mut rng);
        let outcome = driver::execute(&client, &config, &exchange, FaultPlan::default(), &mut rng)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Completed(c) if c.bytes == 2048));
        // Let the client observe the close before the pooled connection is reused.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn host_header_override_is_sent() {
    let server = TestServer::with_router(axum::Router::new().fallback(
        |headers: HeaderMap| async move {
            match headers.get("host") {
                Some(host) if host == "cdn.example.com" => StatusCode::OK,
                _ => StatusCode::MISDIRECTED_REQUEST,
            }
        },
    ))
    .await;
    let config = ClientConfig {
        host_header: Some("cdn.example.com".into()),
        ..config(&server)
    };

    let outcome = exchange(&config, server.url("/path9.js"), 0, FaultPlan::default()).await;
    assert!(matches!(outcome, Ok(Outcome::Completed(_))), "{outcome:?}");

    let error = exchange(
        &ClientConfig {
            host_header: None,
            ..config
        },
        server.url("/path9.js"),
        0,
        FaultPlan::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(error, DriverError::Status { .. }), "{error}");
}
