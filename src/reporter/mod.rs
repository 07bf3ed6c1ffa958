// Reporter module - run log, campaign summary and comparison
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::BrokerLoadTestError;
use crate::run::RunResult;
use crate::stats::{PhaseSummary, TimingSnapshot};

/// 現在時刻のエポック秒（chronoなしの簡易実装）
pub fn epoch_seconds() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 実行ごとの追記専用CSVログ。
/// 起動時に1ファイルを開き、ラン完了のたびに1行追記する
#[derive(Debug)]
pub struct RunLog {
    file: File,
    path: PathBuf,
}

impl RunLog {
    /// results_dir に connection_test_<エポック秒>.csv を開く
    pub fn open(results_dir: &Path) -> Result<Self, BrokerLoadTestError> {
        Self::open_at(results_dir, epoch_seconds())
    }

    /// タイムスタンプを指定してログファイルを開く。
    /// 開けない場合は Fatal（ラン開始前に中断する）
    pub fn open_at(results_dir: &Path, timestamp: u64) -> Result<Self, BrokerLoadTestError> {
        let path = results_dir.join(format!("connection_test_{}.csv", timestamp));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                BrokerLoadTestError::Fatal(format!(
                    "failed to open results file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1ラン分のレコードを改行付きで追記する
    pub fn append_record(&mut self, record: &str) -> Result<(), BrokerLoadTestError> {
        writeln!(self.file, "{}", record)?;
        Ok(())
    }
}

/// 1ランの結果レコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    pub num_endpoints: u32,
    pub concurrency: u32,
    pub num_failures: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub stats: Option<TimingSnapshot>,
}

impl RunRecord {
    pub fn from_result(run: u32, result: &RunResult) -> Self {
        Self {
            run,
            num_endpoints: result.num_endpoints,
            concurrency: result.concurrency,
            num_failures: result.num_failures,
            duration_ms: result.duration_ms,
            stats: result.stats.clone(),
        }
    }
}

/// キャンペーン全体のサマリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub config: Config,
    pub runs: Vec<RunRecord>,
    pub total_attempted: u64,
    pub total_failures: u64,
    pub executed_runs: u32,
    pub started_at_epoch_s: u64,
    pub finished_at_epoch_s: u64,
}

impl CampaignSummary {
    /// ランレコードから合計値を計算してサマリを構築する
    pub fn from_runs(
        config: Config,
        runs: Vec<RunRecord>,
        started_at_epoch_s: u64,
        finished_at_epoch_s: u64,
    ) -> Self {
        let total_attempted = runs
            .iter()
            .map(|r| r.num_endpoints as u64 * r.concurrency as u64)
            .sum();
        let total_failures = runs.iter().map(|r| r.num_failures).sum();
        let executed_runs = runs.len() as u32;
        Self {
            config,
            runs,
            total_attempted,
            total_failures,
            executed_runs,
            started_at_epoch_s,
            finished_at_epoch_s,
        }
    }
}

/// 結果比較レポート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub failure_rate_change: f64,
    pub tcp_mean_change_pct: f64,
    pub handshake_mean_change_pct: f64,
    pub association_mean_change_pct: f64,
    pub session_mean_change_pct: f64,
    pub improvements: Vec<String>,
    pub regressions: Vec<String>,
}

/// JSONサマリをファイルに書き出す
pub fn write_json_summary(summary: &CampaignSummary, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// パーセンテージ変化を計算する。previous が 0 の場合は 0.0 を返す。
fn pct_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

fn failure_rate(summary: &CampaignSummary) -> f64 {
    if summary.total_attempted == 0 {
        0.0
    } else {
        summary.total_failures as f64 / summary.total_attempted as f64
    }
}

/// 全ランにわたるフェーズ平均（ms）。サンプル数で重み付けする
fn phase_mean_ms<F>(summary: &CampaignSummary, phase: F) -> f64
where
    F: Fn(&TimingSnapshot) -> &PhaseSummary,
{
    let mut total_ns: u128 = 0;
    let mut count: u64 = 0;
    for record in &summary.runs {
        if let Some(stats) = &record.stats {
            let p = phase(stats);
            total_ns += p.mean.as_nanos() * p.count as u128;
            count += p.count;
        }
    }
    if count == 0 {
        0.0
    } else {
        (total_ns / count as u128) as f64 / 1_000_000.0
    }
}

/// 2つのキャンペーンサマリを比較する
pub fn compare_summaries(
    current: &CampaignSummary,
    previous: &CampaignSummary,
) -> ComparisonReport {
    let failure_rate_change = failure_rate(current) - failure_rate(previous);

    let tcp_mean_change_pct = pct_change(
        phase_mean_ms(current, |s| &s.tcp),
        phase_mean_ms(previous, |s| &s.tcp),
    );
    let handshake_mean_change_pct = pct_change(
        phase_mean_ms(current, |s| &s.ws_handshake),
        phase_mean_ms(previous, |s| &s.ws_handshake),
    );
    let association_mean_change_pct = pct_change(
        phase_mean_ms(current, |s| &s.association),
        phase_mean_ms(previous, |s| &s.association),
    );
    let session_mean_change_pct = pct_change(
        phase_mean_ms(current, |s| &s.session),
        phase_mean_ms(previous, |s| &s.session),
    );

    let mut improvements = Vec::new();
    let mut regressions = Vec::new();

    // Failure rate: lower is better (negative change = improvement)
    if failure_rate_change < 0.0 {
        improvements.push(format!(
            "failure rate improved by {:.4}",
            failure_rate_change.abs()
        ));
    } else if failure_rate_change > 0.0 {
        regressions.push(format!(
            "failure rate regressed by {:.4}",
            failure_rate_change
        ));
    }

    // Latency phases: lower is better. Session duration is not a
    // latency metric, so it is reported but not classified.
    for (name, change) in [
        ("tcp connect mean", tcp_mean_change_pct),
        ("opening handshake mean", handshake_mean_change_pct),
        ("association mean", association_mean_change_pct),
    ] {
        if change < 0.0 {
            improvements.push(format!("{} improved by {:.1}%", name, change.abs()));
        } else if change > 0.0 {
            regressions.push(format!("{} regressed by {:.1}%", name, change));
        }
    }

    ComparisonReport {
        failure_rate_change,
        tcp_mean_change_pct,
        handshake_mean_change_pct,
        association_mean_change_pct,
        session_mean_change_pct,
        improvements,
        regressions,
    }
}
