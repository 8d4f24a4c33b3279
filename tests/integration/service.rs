//! JSON-lines service over a real socket

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use yaoxiang_playground::service::Service;
use yaoxiang_playground::util::config::PlaygroundConfig;

async fn start(config: PlaygroundConfig) -> (std::net::SocketAddr, oneshot::Sender<()>) {
    let listener = Service::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let service = Service::from_config(&config);
    tokio::spawn(async move {
        service
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    (addr, stop)
}

async fn exchange(
    addr: std::net::SocketAddr,
    lines: &[&str],
) -> Vec<Value> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    for line in lines {
        write_half.write_all(line.as_bytes()).await.unwrap();
        write_half.write_all(b"\n").await.unwrap();
    }
    write_half.shutdown().await.unwrap();

    let mut responses = Vec::new();
    let mut reader = BufReader::new(read_half).lines();
    while let Some(line) = reader.next_line().await.unwrap() {
        responses.push(serde_json::from_str(&line).unwrap());
    }
    responses
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_response_lines() {
    let (addr, stop) = start(PlaygroundConfig::default()).await;

    let responses = exchange(
        addr,
        &[
            r#"{"code": "pub fn Main() { println(\"hi\"); }"}"#,
            r#"{"code": "pub fn Main() { throw \"no\"; }"}"#,
            r#"{"code": "pub fn Main() { nope(); }"}"#,
            "",
            "not json",
        ],
    )
    .await;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0]["status"], 200);
    assert!(responses[0]["body"]
        .as_str()
        .unwrap()
        .starts_with("Output: hi, Elapsed Time: "));
    assert_eq!(responses[1]["status"], 500);
    assert_eq!(responses[1]["body"]["Error"], "no");
    assert_eq!(responses[2]["status"], 200);
    assert!(responses[2]["body"]
        .as_str()
        .unwrap()
        .starts_with("Compilation Error: (1,17): error E0202"));
    assert_eq!(responses[3]["status"], 400);
    assert!(responses[3]["body"]["Error"].is_string());

    let _ = stop.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_request_is_413() {
    let mut config = PlaygroundConfig::default();
    config.service.max_request_bytes = 64;
    let (addr, stop) = start(config).await;

    let big = format!(r#"{{"code": "{}"}}"#, "x".repeat(200));
    let responses = exchange(addr, &[&big, r#"{"code": ""}"#]).await;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["status"], 413);
    assert_eq!(responses[1]["status"], 200);

    let _ = stop.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_connections() {
    let (addr, stop) = start(PlaygroundConfig::default()).await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            tokio::spawn(async move {
                let line = format!(r#"{{"code": "pub fn Main() {{ print({}); }}"}}"#, i);
                let responses = exchange(addr, &[&line]).await;
                (i, responses)
            })
        })
        .collect();

    for task in tasks {
        let (i, responses) = task.await.unwrap();
        let body = responses[0]["body"].as_str().unwrap().to_string();
        assert!(body.starts_with(&format!("Output: {}, ", i)), "{}", body);
    }

    let _ = stop.send(());
}
