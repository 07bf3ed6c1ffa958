use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::client::{
    AssociationTimings, BrokerClient, ClientConfig, ClientFactory, ConnectionTimings,
};
use crate::error::BrokerLoadTestError;

/// テスト用の共通モッククライアント状態
/// - 呼び出し回数の記録
/// - オプションの失敗注入
/// - アソシエーション喪失のシミュレーション
pub struct MockClientState {
    pub name: String,
    pub connect_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub association_checks: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_connect_unexpected: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_close: AtomicBool,
    /// connect が戻るまでの人工遅延（ミリ秒）
    pub connect_delay_ms: AtomicU64,
    pub associated: AtomicBool,
    /// 0なら喪失しない。Nなら N 回目以降の is_associated が false を返す
    pub lose_association_after_checks: AtomicUsize,
}

impl MockClientState {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connect_calls: AtomicUsize::new(0),
            ping_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            association_checks: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_connect_unexpected: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            connect_delay_ms: AtomicU64::new(0),
            associated: AtomicBool::new(false),
            lose_association_after_checks: AtomicUsize::new(0),
        })
    }
}

/// BrokerClientのモック実装。状態はArcで共有されるため、
/// Boxで手放した後もテスト側から観察できる
pub struct MockClient {
    state: Arc<MockClientState>,
    connection_timings: ConnectionTimings,
    association_timings: AssociationTimings,
}

impl MockClient {
    pub fn new(name: &str) -> Self {
        Self {
            state: MockClientState::new(name),
            connection_timings: ConnectionTimings {
                tcp: Duration::from_micros(120),
                opening_handshake: Duration::from_micros(800),
            },
            association_timings: AssociationTimings {
                association: Duration::from_millis(15),
                session: Duration::from_millis(1000),
            },
        }
    }

    /// 共有状態への参照を取得する（Boxに包む前に呼ぶ）
    pub fn state(&self) -> Arc<MockClientState> {
        Arc::clone(&self.state)
    }

    /// connect が必ず失敗するモックにする
    pub fn with_connect_failure(self) -> Self {
        self.state.fail_connect.store(true, Ordering::Relaxed);
        self
    }

    /// connect が接続エラー以外（ClientError）で失敗するモックにする
    pub fn with_unexpected_connect_failure(self) -> Self {
        self.state
            .fail_connect_unexpected
            .store(true, Ordering::Relaxed);
        self
    }

    /// connect に人工遅延を入れたモックにする
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        self
    }

    /// ping が必ず失敗するモックにする
    pub fn with_ping_failure(self) -> Self {
        self.state.fail_ping.store(true, Ordering::Relaxed);
        self
    }

    /// N回目以降の is_associated が false を返すモックにする
    pub fn with_association_loss_after(self, checks: usize) -> Self {
        self.state
            .lose_association_after_checks
            .store(checks, Ordering::Relaxed);
        self
    }

    pub fn with_timings(
        mut self,
        connection: ConnectionTimings,
        association: AssociationTimings,
    ) -> Self {
        self.connection_timings = connection;
        self.association_timings = association;
        self
    }
}

impl BrokerClient for MockClient {
    fn connect(&mut self, _attempt_budget: u8) -> Result<(), BrokerLoadTestError> {
        self.state.connect_calls.fetch_add(1, Ordering::Relaxed);
        let delay_ms = self.state.connect_delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
        if self.state.fail_connect.load(Ordering::Relaxed) {
            return Err(BrokerLoadTestError::ConnectionError(
                "mock connect failure".to_string(),
            ));
        }
        if self.state.fail_connect_unexpected.load(Ordering::Relaxed) {
            return Err(BrokerLoadTestError::ClientError(
                "mock unexpected failure".to_string(),
            ));
        }
        self.state.associated.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_associated(&self) -> bool {
        let checks = self.state.association_checks.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.state.associated.load(Ordering::Relaxed) {
            return false;
        }
        let lose_after = self.state.lose_association_after_checks.load(Ordering::Relaxed);
        if lose_after > 0 && checks >= lose_after {
            self.state.associated.store(false, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn ping(&mut self) -> Result<(), BrokerLoadTestError> {
        self.state.ping_calls.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_ping.load(Ordering::Relaxed) {
            return Err(BrokerLoadTestError::ClientError(
                "mock ping failure".to_string(),
            ));
        }
        Ok(())
    }

    fn connection_timings(&self) -> ConnectionTimings {
        self.connection_timings
    }

    fn association_timings(&self) -> AssociationTimings {
        self.association_timings
    }

    fn close(&mut self) -> Result<(), BrokerLoadTestError> {
        self.state.close_calls.fetch_add(1, Ordering::Relaxed);
        self.state.associated.store(false, Ordering::Relaxed);
        if self.state.fail_close.load(Ordering::Relaxed) {
            return Err(BrokerLoadTestError::ClientError(
                "mock close failure".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.state.name
    }
}

/// モッククライアントのバッチを作成し、観察用の状態リストと共に返す
pub fn mock_batch(
    prefix: &str,
    count: usize,
) -> (Vec<Box<dyn BrokerClient>>, Vec<Arc<MockClientState>>) {
    let mut clients: Vec<Box<dyn BrokerClient>> = Vec::with_capacity(count);
    let mut states = Vec::with_capacity(count);
    for i in 0..count {
        let client = MockClient::new(&format!("{}{:04}", prefix, i + 1));
        states.push(client.state());
        clients.push(Box::new(client));
    }
    (clients, states)
}

/// ファクトリ経由で生成された全モッククライアントの記録
pub struct MockClientRegistry {
    pub states: Mutex<Vec<Arc<MockClientState>>>,
    pub fail_connect: AtomicBool,
    /// ここに載っている名前のクライアントだけ connect を失敗させる
    pub fail_connect_names: Mutex<Vec<String>>,
    pub connect_delay_ms: AtomicU64,
    pub lose_association_after_checks: AtomicUsize,
}

impl MockClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_connect_names: Mutex::new(Vec::new()),
            connect_delay_ms: AtomicU64::new(0),
            lose_association_after_checks: AtomicUsize::new(0),
        })
    }

    /// 指定名のクライアントの connect を失敗させる
    pub fn fail_connect_for(&self, name: &str) {
        self.fail_connect_names
            .lock()
            .unwrap()
            .push(name.to_string());
    }

    /// ClientFactoryを作成する。生成したクライアントの状態は
    /// レジストリに記録される
    pub fn factory(self: &Arc<Self>) -> ClientFactory {
        let registry = Arc::clone(self);
        Box::new(move |config: ClientConfig| {
            let mut client = MockClient::new(&config.common_name);
            if registry.fail_connect.load(Ordering::Relaxed)
                || registry
                    .fail_connect_names
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|n| n == &config.common_name)
            {
                client = client.with_connect_failure();
            }
            let delay_ms = registry.connect_delay_ms.load(Ordering::Relaxed);
            if delay_ms > 0 {
                client = client.with_connect_delay(Duration::from_millis(delay_ms));
            }
            let lose_after = registry
                .lose_association_after_checks
                .load(Ordering::Relaxed);
            if lose_after > 0 {
                client = client.with_association_loss_after(lose_after);
            }
            registry.states.lock().unwrap().push(client.state());
            Box::new(client)
        })
    }

    /// 記録された状態のスナップショット
    pub fn recorded_states(&self) -> Vec<Arc<MockClientState>> {
        self.states.lock().unwrap().clone()
    }
}
