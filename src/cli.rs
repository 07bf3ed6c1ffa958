// CLI subcommand definitions using clap derive macros
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::BrokerLoadTestError;
use crate::name_pool::NameGenerator;
use crate::reporter::{compare_summaries, CampaignSummary};

/// WebSocketブローカー接続負荷試験ツール
#[derive(Parser, Debug, PartialEq)]
#[command(name = "broker-load-test")]
pub enum Cli {
    /// 接続テストキャンペーンを実行する
    Run {
        /// JSON設定ファイルパス
        config: PathBuf,
        /// 設定に関わらず接続を維持してpingし続ける
        #[arg(long)]
        persist_connections: bool,
        /// 設定に関わらず接続タイミング統計を収集する
        #[arg(long)]
        show_stats: bool,
    },
    /// 雛形となる設定ファイルを生成する
    GenerateConfig {
        /// 生成するagent名の数
        #[arg(long)]
        agents: u32,
        /// 生成するcontroller名の数
        #[arg(long, default_value_t = 0)]
        controllers: u32,
        /// agent名プレフィックス
        #[arg(long, default_value = "agent")]
        prefix: String,
        /// ブローカーのWebSocket URI
        #[arg(long, default_value = "ws://127.0.0.1:8080/")]
        broker: String,
        /// 出力ファイルパス
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 2つのキャンペーンサマリを比較する
    Compare {
        /// 現在のサマリJSONファイル
        current: PathBuf,
        /// 過去のサマリJSONファイル
        previous: PathBuf,
    },
}

/// generate-configサブコマンドの実行
///
/// デフォルト設定にクライアント名とブローカーURIを埋めた
/// 設定ファイルをJSON形式で書き出す。
pub fn run_generate_config(
    agents: u32,
    controllers: u32,
    prefix: &str,
    broker: &str,
    output: &Path,
) -> Result<(), BrokerLoadTestError> {
    let config = Config {
        broker_uris: vec![broker.to_string()],
        agents: NameGenerator::generate(prefix, 1, agents),
        controllers: NameGenerator::generate("controller", 1, controllers),
        ..Config::default()
    };

    let json = serde_json::to_string_pretty(&config).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!("Failed to serialize config: {}", e))
    })?;
    std::fs::write(output, json).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!(
            "Failed to write config file '{}': {}",
            output.display(),
            e
        ))
    })?;
    Ok(())
}

/// compareサブコマンドの実行
///
/// 2つのサマリJSONファイルを読み込み、compare_summariesで比較し、
/// 比較レポートをJSON形式で標準出力に表示する。
pub fn run_compare(current_path: &Path, previous_path: &Path) -> Result<(), BrokerLoadTestError> {
    let current_json = std::fs::read_to_string(current_path).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!(
            "Failed to read current summary file '{}': {}",
            current_path.display(),
            e
        ))
    })?;
    let previous_json = std::fs::read_to_string(previous_path).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!(
            "Failed to read previous summary file '{}': {}",
            previous_path.display(),
            e
        ))
    })?;

    let current: CampaignSummary = serde_json::from_str(&current_json).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!("Failed to parse current summary JSON: {}", e))
    })?;
    let previous: CampaignSummary = serde_json::from_str(&previous_json).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!("Failed to parse previous summary JSON: {}", e))
    })?;

    let report = compare_summaries(&current, &previous);
    let report_json = serde_json::to_string_pretty(&report).map_err(|e| {
        BrokerLoadTestError::ConfigError(format!("Failed to serialize comparison report: {}", e))
    })?;
    println!("{}", report_json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    // === run サブコマンドテスト ===

    #[test]
    fn test_run_with_config_path_only() {
        let cli = Cli::try_parse_from(["broker-load-test", "run", "config.json"]);
        assert!(cli.is_ok());
        match cli.unwrap() {
            Cli::Run {
                config,
                persist_connections,
                show_stats,
            } => {
                assert_eq!(config, PathBuf::from("config.json"));
                assert!(!persist_connections);
                assert!(!show_stats);
            }
            _ => panic!("Expected Run"),
        }
    }

    #[test]
    fn test_run_with_override_flags() {
        let cli = Cli::try_parse_from([
            "broker-load-test",
            "run",
            "config.json",
            "--persist-connections",
            "--show-stats",
        ]);
        assert!(cli.is_ok());
        match cli.unwrap() {
            Cli::Run {
                persist_connections,
                show_stats,
                ..
            } => {
                assert!(persist_connections);
                assert!(show_stats);
            }
            _ => panic!("Expected Run"),
        }
    }

    #[test]
    fn test_run_missing_config_path() {
        let cli = Cli::try_parse_from(["broker-load-test", "run"]);
        assert!(cli.is_err());
    }

    // === generate-config サブコマンドテスト ===

    #[test]
    fn test_generate_config_with_required_args_only() {
        let cli = Cli::try_parse_from([
            "broker-load-test",
            "generate-config",
            "--agents",
            "100",
            "-o",
            "config.json",
        ]);
        assert!(cli.is_ok());
        match cli.unwrap() {
            Cli::GenerateConfig {
                agents,
                controllers,
                prefix,
                broker,
                output,
            } => {
                assert_eq!(agents, 100);
                assert_eq!(output, PathBuf::from("config.json"));
                // defaults
                assert_eq!(controllers, 0);
                assert_eq!(prefix, "agent");
                assert_eq!(broker, "ws://127.0.0.1:8080/");
            }
            _ => panic!("Expected GenerateConfig"),
        }
    }

    #[test]
    fn test_generate_config_with_all_args() {
        let cli = Cli::try_parse_from([
            "broker-load-test",
            "generate-config",
            "--agents",
            "50",
            "--controllers",
            "5",
            "--prefix",
            "endpoint",
            "--broker",
            "ws://broker.test.local:9000/",
            "--output",
            "/tmp/out.json",
        ]);
        assert!(cli.is_ok());
        match cli.unwrap() {
            Cli::GenerateConfig {
                agents,
                controllers,
                prefix,
                broker,
                output,
            } => {
                assert_eq!(agents, 50);
                assert_eq!(controllers, 5);
                assert_eq!(prefix, "endpoint");
                assert_eq!(broker, "ws://broker.test.local:9000/");
                assert_eq!(output, PathBuf::from("/tmp/out.json"));
            }
            _ => panic!("Expected GenerateConfig"),
        }
    }

    #[test]
    fn test_generate_config_missing_required_agents() {
        let cli = Cli::try_parse_from([
            "broker-load-test",
            "generate-config",
            "-o",
            "config.json",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_generate_config_missing_required_output() {
        let cli = Cli::try_parse_from(["broker-load-test", "generate-config", "--agents", "10"]);
        assert!(cli.is_err());
    }

    // === compare サブコマンドテスト ===

    #[test]
    fn test_compare_with_two_paths() {
        let cli = Cli::try_parse_from([
            "broker-load-test",
            "compare",
            "current.json",
            "previous.json",
        ]);
        assert!(cli.is_ok());
        match cli.unwrap() {
            Cli::Compare { current, previous } => {
                assert_eq!(current, PathBuf::from("current.json"));
                assert_eq!(previous, PathBuf::from("previous.json"));
            }
            _ => panic!("Expected Compare"),
        }
    }

    #[test]
    fn test_compare_missing_previous() {
        let cli = Cli::try_parse_from(["broker-load-test", "compare", "current.json"]);
        assert!(cli.is_err());
    }

    // === 共通エラーケーステスト ===

    #[test]
    fn test_no_subcommand_returns_error() {
        let cli = Cli::try_parse_from(["broker-load-test"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_invalid_subcommand_returns_error() {
        let cli = Cli::try_parse_from(["broker-load-test", "unknown-command"]);
        assert!(cli.is_err());
    }

    // === run_generate_config テスト ===

    use tempfile::TempDir;

    #[test]
    fn test_run_generate_config_creates_parseable_config() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("config.json");

        run_generate_config(5, 2, "agent", "ws://127.0.0.1:8080/", &output).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let config: Config = serde_json::from_str(&content).unwrap();
        assert_eq!(config.agents.len(), 5);
        assert_eq!(config.controllers.len(), 2);
        assert_eq!(config.agents[0], "agent0001");
        assert_eq!(config.agents[4], "agent0005");
        assert_eq!(config.controllers[0], "controller0001");
        assert_eq!(config.broker_uris, vec!["ws://127.0.0.1:8080/".to_string()]);
    }

    #[test]
    fn test_run_generate_config_uses_custom_prefix() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("config.json");

        run_generate_config(2, 0, "endpoint", "ws://10.0.0.1:8080/", &output).unwrap();

        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(config.agents, vec!["endpoint0001", "endpoint0002"]);
        assert!(config.controllers.is_empty());
    }

    #[test]
    fn test_run_generate_config_result_passes_validation() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("config.json");

        run_generate_config(10, 0, "agent", "ws://127.0.0.1:8080/", &output).unwrap();

        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_generate_config_unwritable_path_returns_error() {
        let result = run_generate_config(
            1,
            0,
            "agent",
            "ws://127.0.0.1:8080/",
            Path::new("/nonexistent/dir/config.json"),
        );
        assert!(matches!(
            result.unwrap_err(),
            BrokerLoadTestError::ConfigError(_)
        ));
    }

    // === run_compare テスト ===

    use crate::reporter::RunRecord;

    /// テスト用のCampaignSummaryを生成するヘルパー
    fn make_test_summary(num_failures: u64) -> CampaignSummary {
        let record = RunRecord {
            run: 1,
            num_endpoints: 10,
            concurrency: 2,
            num_failures,
            duration_ms: 1200,
            stats: None,
        };
        CampaignSummary::from_runs(Config::default(), vec![record], 1000, 1060)
    }

    #[test]
    fn test_run_compare_with_valid_json_files_returns_ok() {
        let dir = TempDir::new().unwrap();
        let current_path = dir.path().join("current.json");
        let previous_path = dir.path().join("previous.json");

        let current = make_test_summary(1);
        let previous = make_test_summary(4);
        std::fs::write(&current_path, serde_json::to_string_pretty(&current).unwrap()).unwrap();
        std::fs::write(
            &previous_path,
            serde_json::to_string_pretty(&previous).unwrap(),
        )
        .unwrap();

        let result = run_compare(&current_path, &previous_path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_run_compare_with_nonexistent_current_file_returns_error() {
        let dir = TempDir::new().unwrap();
        let current_path = dir.path().join("nonexistent.json");
        let previous_path = dir.path().join("previous.json");

        let previous = make_test_summary(0);
        std::fs::write(
            &previous_path,
            serde_json::to_string_pretty(&previous).unwrap(),
        )
        .unwrap();

        let result = run_compare(&current_path, &previous_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_compare_with_invalid_json_returns_error() {
        let dir = TempDir::new().unwrap();
        let current_path = dir.path().join("current.json");
        let previous_path = dir.path().join("previous.json");

        std::fs::write(&current_path, "not valid json").unwrap();
        std::fs::write(&previous_path, "also not valid").unwrap();

        let result = run_compare(&current_path, &previous_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_compare_with_identical_summaries_returns_ok() {
        let dir = TempDir::new().unwrap();
        let current_path = dir.path().join("current.json");
        let previous_path = dir.path().join("previous.json");

        let json = serde_json::to_string_pretty(&make_test_summary(2)).unwrap();
        std::fs::write(&current_path, &json).unwrap();
        std::fs::write(&previous_path, &json).unwrap();

        let result = run_compare(&current_path, &previous_path);
        assert!(result.is_ok());
    }
}
