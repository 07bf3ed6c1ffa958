use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::client::BrokerClient;
use crate::error::BrokerLoadTestError;
use crate::teardown;

/// ping間のポーズ
const PING_PAUSE: Duration = Duration::from_millis(2);
const PING_PAUSE_MS: u64 = 2;

/// 設定されたチェック間隔から、全クライアントをping するのに
/// かかる時間の見積もりを引いた実際の待機間隔を返す。最低1秒
pub fn check_interval(configured_s: u64, max_clients: u64) -> Duration {
    let estimate_s = max_clients * PING_PAUSE_MS / 1000;
    if configured_s > estimate_s {
        Duration::from_secs(configured_s - estimate_s)
    } else {
        Duration::from_secs(1)
    }
}

struct KeepAliveShared {
    stop: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

/// 常設接続モードのキープアライブスレッド。
///
/// 接続タスクから引き渡されたバッチを保持し、一定間隔で
/// アソシエーション済みクライアントに ping を送り続ける。
/// stop() はスレッドを起こして終了させ、保持している全接続は
/// スレッド自身が終了時に閉じる
pub struct KeepAliveManager {
    shared: Arc<KeepAliveShared>,
    worker: Option<JoinHandle<()>>,
}

impl KeepAliveManager {
    /// キープアライブスレッドを起動する。クライアントのバッチは
    /// `intake` 経由で随時引き渡される。スレッドを作れなかった場合は
    /// 致命的エラー
    pub fn start(
        interval: Duration,
        intake: Receiver<Vec<Box<dyn BrokerClient>>>,
    ) -> Result<Self, BrokerLoadTestError> {
        let shared = Arc::new(KeepAliveShared {
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("keep-alive".to_string())
            .spawn(move || keep_alive_loop(thread_shared, intake, interval))
            .map_err(|e| {
                BrokerLoadTestError::Fatal(format!("failed to start keep-alive thread: {}", e))
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// 停止フラグを立ててからスレッドを起こし、終了を待つ。
    /// フラグ設定はロック取得前に行うので通知を取りこぼさない
    pub fn stop(mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        {
            let _guard = self.shared.lock.lock().unwrap();
            self.shared.wakeup.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("keep-alive thread panicked");
            }
        }
    }
}

fn keep_alive_loop(
    shared: Arc<KeepAliveShared>,
    intake: Receiver<Vec<Box<dyn BrokerClient>>>,
    interval: Duration,
) {
    let mut groups: Vec<Vec<Box<dyn BrokerClient>>> = Vec::new();

    loop {
        {
            let guard = shared.lock.lock().unwrap();
            if shared.stop.load(Ordering::SeqCst) {
                break;
            }
            // 通知またはタイムアウトで起きる
            let _ = shared.wakeup.wait_timeout(guard, interval).unwrap();
        }
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        // 前回のスイープ以降に引き渡されたバッチを取り込む
        while let Ok(batch) = intake.try_recv() {
            groups.push(batch);
        }

        'sweep: for group in groups.iter_mut() {
            for client in group.iter_mut() {
                // 停止要求はスイープ途中でも有効
                if shared.stop.load(Ordering::SeqCst) {
                    break 'sweep;
                }
                if client.is_associated() {
                    if let Err(e) = client.ping() {
                        error!("failed to ping client {} ({})", client.name(), e);
                    }
                    thread::sleep(PING_PAUSE);
                }
            }
        }
    }

    // 停止直前に届いたバッチも閉じる対象に含める
    while let Ok(batch) = intake.try_recv() {
        groups.push(batch);
    }
    info!(
        "keep-alive thread stopping - closing {} connection groups",
        groups.len()
    );
    teardown::close_all(groups);
}
