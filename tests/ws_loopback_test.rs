use broker_load_test::client::{
    ws_client_factory, AssociateRequest, AssociateResponse, ClientConfig,
};
use broker_load_test::config::Config;
use broker_load_test::console::AutoGate;
use broker_load_test::name_pool::NameGenerator;
use broker_load_test::orchestrator::ConnectionTest;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;
use tungstenite::Message;

/// Answer one WebSocket connection: reply to the association request,
/// then keep reading (pings are answered automatically) until the peer
/// closes.
fn serve(stream: TcpStream, respond_success: bool) {
    let mut ws = tungstenite::accept(stream).unwrap();
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => {
                let request: AssociateRequest = serde_json::from_str(&text).unwrap();
                assert_eq!(request.client_type, "agent");
                let response = if respond_success {
                    AssociateResponse::success()
                } else {
                    AssociateResponse::denied("loopback broker denies")
                };
                ws.send(Message::Text(serde_json::to_string(&response).unwrap()))
                    .unwrap();
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

fn spawn_loopback_broker(
    expected_connections: usize,
    respond_success: bool,
) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut workers = Vec::new();
        for _ in 0..expected_connections {
            let (stream, _) = listener.accept().unwrap();
            workers.push(thread::spawn(move || serve(stream, respond_success)));
        }
        for worker in workers {
            let _ = worker.join();
        }
    });
    (addr, handle)
}

fn loopback_config(results_dir: &TempDir, addr: SocketAddr, num_endpoints: u32) -> Config {
    let mut config = Config::default();
    config.num_runs = 1;
    config.num_endpoints = num_endpoints;
    config.endpoints_increment = 0;
    config.concurrency = 1;
    config.inter_run_pause_ms = 0;
    config.inter_endpoint_pause_ms = 1;
    config.broker_uris = vec![format!("ws://{}/", addr)];
    config.results_dir = results_dir.path().to_string_lossy().into_owned();
    config.agents = NameGenerator::generate("agent", 1, 8);
    config
}

#[test]
fn test_ws_client_connects_associates_and_closes() {
    // 1. Bind a loopback broker on an ephemeral port
    let (addr, broker) = spawn_loopback_broker(1, true);
    eprintln!("loopback broker bound to: {}", addr);

    let results_dir = TempDir::new().unwrap();
    let config = loopback_config(&results_dir, addr, 1);

    // 2. Drive one real WebSocket client through the factory
    let factory = ws_client_factory();
    let mut client = factory(ClientConfig::from_config(&config, "agent0001"));
    client.connect(1).unwrap();
    assert!(client.is_associated());

    // 3. Close handshake completes and the broker side winds down
    client.close().unwrap();
    broker.join().unwrap();
}

#[test]
fn test_campaign_over_real_websocket_loopback() {
    let (addr, broker) = spawn_loopback_broker(3, true);
    eprintln!("loopback broker bound to: {}", addr);

    let results_dir = TempDir::new().unwrap();
    let config = loopback_config(&results_dir, addr, 3);

    // A whole single-run campaign over real sockets
    let mut test = ConnectionTest::new(config, ws_client_factory(), Box::new(AutoGate)).unwrap();
    let summary = test.execute().unwrap();

    assert_eq!(summary.executed_runs, 1);
    assert_eq!(summary.total_attempted, 3);
    assert_eq!(summary.total_failures, 0);

    let csv = std::fs::read_to_string(test.log_path()).unwrap();
    assert!(csv.starts_with("3,1,0,"));

    broker.join().unwrap();
}

#[test]
fn test_denied_association_counts_as_failure() {
    let (addr, broker) = spawn_loopback_broker(2, false);

    let results_dir = TempDir::new().unwrap();
    let config = loopback_config(&results_dir, addr, 2);

    let mut test = ConnectionTest::new(config, ws_client_factory(), Box::new(AutoGate)).unwrap();
    let summary = test.execute().unwrap();

    // Both endpoints reached the broker but were denied association
    assert_eq!(summary.total_attempted, 2);
    assert_eq!(summary.total_failures, 2);

    broker.join().unwrap();
}
