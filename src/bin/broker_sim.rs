use broker_load_test::client::{AssociateRequest, AssociateResponse};
use clap::Parser;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tungstenite::Message;

#[derive(Parser)]
#[command(name = "broker-sim")]
struct Args {
    /// 待ち受けアドレス（host:port）
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_sim=info,broker_load_test=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let listener = match TcpListener::bind(&args.listen) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind '{}': {}", args.listen, e);
            std::process::exit(1);
        }
    };

    // accept ループがシャットダウンフラグを確認できるよう、
    // リスナーはノンブロッキングでポーリングする
    if let Err(e) = listener.set_nonblocking(true) {
        eprintln!("Failed to configure listener: {}", e);
        std::process::exit(1);
    }

    // ctrlc によるシグナルハンドリング（SIGINT/SIGTERM）
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived shutdown signal, stopping...");
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Failed to set signal handler: {}", e);
        std::process::exit(1);
    }

    info!("broker-sim listening on {}", args.listen);

    let active = Arc::new(AtomicUsize::new(0));

    // 接続受け付けループ
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let count = active.fetch_add(1, Ordering::SeqCst) + 1;
        info!("accepted connection from {} ({} active)", peer, count);

        let active_for_conn = active.clone();
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || {
                if let Err(e) = serve_connection(stream) {
                    warn!("connection from {} ended with error: {}", peer, e);
                }
                let left = active_for_conn.fetch_sub(1, Ordering::SeqCst) - 1;
                info!("connection from {} closed ({} active)", peer, left);
            });
        if let Err(e) = spawned {
            warn!("failed to spawn connection thread for {}: {}", peer, e);
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    info!("broker-sim shutting down ({} connections still active)", active.load(Ordering::SeqCst));
}

/// 1本のWebSocket接続を処理する。
///
/// Association Request を受けたら常に成功応答を返し、以後は相手が
/// 切断するまで読み続ける。keep-alive の ping に対する pong は
/// 次の read の際に tungstenite が自動で送り返す。
fn serve_connection(stream: TcpStream) -> anyhow::Result<()> {
    // accept ループから引き継いだノンブロッキング設定を戻す
    stream.set_nonblocking(false)?;
    let mut ws = tungstenite::accept(stream)
        .map_err(|e| anyhow::anyhow!("WebSocket handshake failed: {}", e))?;

    loop {
        match ws.read() {
            Ok(Message::Text(text)) => match serde_json::from_str::<AssociateRequest>(&text) {
                Ok(request) => {
                    info!(
                        "association from {} ({}, ttl {} s)",
                        request.sender, request.client_type, request.ttl_s
                    );
                    let reply = serde_json::to_string(&AssociateResponse::success())?;
                    ws.send(Message::Text(reply))?;
                }
                Err(e) => {
                    warn!("unsupported text frame: {}", e);
                    let reply =
                        serde_json::to_string(&AssociateResponse::denied("unsupported message"))?;
                    ws.send(Message::Text(reply))?;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(other) => {
                debug!("ignoring frame: {:?}", other);
            }
            Err(tungstenite::Error::ConnectionClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
