use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Config;
use crate::error::BrokerLoadTestError;

/// クライアント名プール（共有リソース）
///
/// agent名を先に消費し、尽きたらcontroller名に切り替える。
/// ランごとに`reset`して先頭から再利用する。
pub struct NamePool {
    names: Vec<String>,
    index: AtomicUsize,
}

impl std::fmt::Debug for NamePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamePool")
            .field("names", &self.names)
            .field("index", &self.index.load(Ordering::Relaxed))
            .finish()
    }
}

impl NamePool {
    /// agent名とcontroller名から構築（この順で消費される）
    pub fn new(agents: Vec<String>, controllers: Vec<String>) -> Self {
        let mut names = agents;
        names.extend(controllers);
        Self {
            names,
            index: AtomicUsize::new(0),
        }
    }

    /// 設定のagents/controllersから構築
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.agents.clone(), config.controllers.clone())
    }

    /// 次のクライアント名を取得
    pub fn next_name(&self) -> Result<&str, BrokerLoadTestError> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed);
        self.names
            .get(idx)
            .map(|s| s.as_str())
            .ok_or(BrokerLoadTestError::NamePoolExhausted)
    }

    /// 消費位置を先頭に戻す
    pub fn reset(&self) {
        self.index.store(0, Ordering::Relaxed);
    }

    /// 残りの名前数
    pub fn remaining(&self) -> usize {
        self.names
            .len()
            .saturating_sub(self.index.load(Ordering::Relaxed))
    }

    /// プール全体の名前数
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// クライアント名生成
pub struct NameGenerator;

impl NameGenerator {
    /// 指定プレフィックスで連番のクライアント名を生成
    ///
    /// - Name format: `{prefix}{index:04}` (zero-padded to 4 digits)
    pub fn generate(prefix: &str, start: u32, count: u32) -> Vec<String> {
        (0..count)
            .map(|i| format!("{}{:04}", prefix, start + i))
            .collect()
    }
}
