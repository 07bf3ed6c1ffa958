// Configuration manager module
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::BrokerLoadTestError;

/// メイン設定構造体（接続テストキャンペーン全体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_runs: u32,
    pub num_endpoints: u32,
    pub endpoints_increment: u32,
    pub concurrency: u32,
    pub concurrency_increment: u32,
    pub inter_run_pause_ms: u64,
    pub inter_endpoint_pause_ms: u64,
    pub randomize_inter_endpoint_pause: bool,
    pub inter_endpoint_pause_rng_seed: u64,
    pub connection_timeout_ms: u64,
    pub connection_check_interval_s: u64,
    pub association_timeout_s: u64,
    pub association_request_ttl_s: u64,
    pub persist_connections: bool,
    pub show_stats: bool,
    pub broker_uris: Vec<String>,
    pub identity_dir: Option<String>,
    pub results_dir: String,
    pub agents: Vec<String>,
    pub controllers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_runs: 1,
            num_endpoints: 1,
            endpoints_increment: 0,
            concurrency: 1,
            concurrency_increment: 0,
            inter_run_pause_ms: 100,
            inter_endpoint_pause_ms: 100,
            randomize_inter_endpoint_pause: false,
            inter_endpoint_pause_rng_seed: 1,
            connection_timeout_ms: 1500,
            connection_check_interval_s: 15,
            association_timeout_s: 10,
            association_request_ttl_s: 10,
            persist_connections: false,
            show_stats: false,
            broker_uris: Vec::new(),
            identity_dir: None,
            results_dir: ".".to_string(),
            agents: Vec::new(),
            controllers: Vec::new(),
        }
    }
}

impl Config {
    /// 最終ラン（最大規模）のエンドポイント数
    pub fn final_num_endpoints(&self) -> u64 {
        self.num_endpoints as u64 + (self.num_runs as u64 - 1) * self.endpoints_increment as u64
    }

    /// 最終ラン（最大規模）の同時実行セット数
    pub fn final_concurrency(&self) -> u64 {
        self.concurrency as u64 + (self.num_runs as u64 - 1) * self.concurrency_increment as u64
    }

    /// 最終ランが必要とするクライアント名数。
    /// 名前は各ランの先頭から再利用されるため、これがプールサイズの要件となる
    pub fn max_clients_per_run(&self) -> u64 {
        self.final_num_endpoints() * self.final_concurrency()
    }

    /// 設定値のバリデーション
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.num_runs == 0 {
            errors.push("num_runs must be greater than 0".to_string());
        }
        if self.num_endpoints == 0 {
            errors.push("num_endpoints must be greater than 0".to_string());
        }
        if self.concurrency == 0 {
            errors.push("concurrency must be greater than 0".to_string());
        }
        if self.inter_endpoint_pause_ms == 0 {
            errors.push("inter_endpoint_pause_ms must be greater than 0".to_string());
        }
        if self.connection_timeout_ms == 0 {
            errors.push("connection_timeout_ms must be greater than 0".to_string());
        }
        if self.broker_uris.is_empty() {
            errors.push("broker_uris must contain at least one URI".to_string());
        }

        // 最終ランに必要なクライアント名数をチェック
        if self.num_runs > 0 && self.num_endpoints > 0 && self.concurrency > 0 {
            let needed = self.max_clients_per_run();
            let available = (self.agents.len() + self.controllers.len()) as u64;
            if available < needed {
                errors.push(format!(
                    "not enough client names: the largest run needs {} but agents + controllers provide {}",
                    needed, available
                ));
            }
        }

        if !Path::new(&self.results_dir).is_dir() {
            errors.push(format!(
                "results_dir '{}' does not exist or is not a directory",
                self.results_dir
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// JSON文字列から設定を読み込み、バリデーションを実行する
pub fn load_from_str(json: &str) -> Result<Config, BrokerLoadTestError> {
    let config: Config = serde_json::from_str(json)
        .map_err(|e| BrokerLoadTestError::ConfigError(format!("JSON parse error: {}", e)))?;

    config.validate().map_err(|errors| {
        BrokerLoadTestError::ConfigError(format!("Validation errors: {}", errors.join("; ")))
    })?;

    Ok(config)
}

/// JSONファイルから設定を読み込み、バリデーションを実行する
pub fn load_from_file(path: &Path) -> Result<Config, BrokerLoadTestError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    load_from_str(&content)
}
