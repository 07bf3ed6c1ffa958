// Connection test orchestrator module
//
// Coordinates a whole campaign: the ramping run schedule, the result
// log, client batch construction, Connection Task dispatch, the run
// timeout budget, and teardown or keepalive of the connections.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::client::{BrokerClient, ClientConfig, ClientFactory};
use crate::config::Config;
use crate::console::{format_duration_ms, red, ContinueGate};
use crate::dispatcher;
use crate::error::BrokerLoadTestError;
use crate::keepalive::{self, KeepAliveManager};
use crate::name_pool::NamePool;
use crate::pacing::{ExponentialPacer, RunPacing};
use crate::reporter::{self, CampaignSummary, RunLog, RunRecord};
use crate::run::{RunResult, RunSchedule};
use crate::stats::TimingCollector;
use crate::teardown;

/// Fixed part of the pause between runs; the rest grows with the size
/// of the run that is about to start.
const INTER_RUN_BASE_PAUSE_MS: u64 = 2000;

/// Connection test orchestrator - owns the campaign state and performs
/// the scheduled runs one after another.
pub struct ConnectionTest {
    config: Config,
    schedule: RunSchedule,
    name_pool: NamePool,
    client_factory: ClientFactory,
    gate: Box<dyn ContinueGate>,
    run_log: RunLog,
    log_timestamp: u64,
    records: Vec<RunRecord>,
    shutdown_flag: Arc<AtomicBool>,
}

impl std::fmt::Debug for ConnectionTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTest")
            .field("config", &self.config)
            .field("schedule", &self.schedule)
            .field("name_pool", &self.name_pool)
            .field("run_log", &self.run_log)
            .field("log_timestamp", &self.log_timestamp)
            .field("records", &self.records)
            .field("shutdown_flag", &self.shutdown_flag)
            .finish_non_exhaustive()
    }
}

impl ConnectionTest {
    /// Open the result log and build the campaign context.
    pub fn new(
        config: Config,
        client_factory: ClientFactory,
        gate: Box<dyn ContinueGate>,
    ) -> Result<Self, BrokerLoadTestError> {
        let log_timestamp = reporter::epoch_seconds();
        let run_log = RunLog::open_at(Path::new(&config.results_dir), log_timestamp)?;
        let schedule = RunSchedule::new(&config);
        let name_pool = NamePool::from_config(&config);

        Ok(Self {
            config,
            schedule,
            name_pool,
            client_factory,
            gate,
            run_log,
            log_timestamp,
            records: Vec::new(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Execute the whole campaign: print the setup summary, perform every
    /// scheduled run with a pause in between, then report the totals and
    /// write the JSON campaign summary next to the CSV log.
    pub fn execute(&mut self) -> Result<CampaignSummary, BrokerLoadTestError> {
        let campaign_start = Instant::now();
        let started_at_epoch_s = reporter::epoch_seconds();
        info!("Requested {} runs", self.config.num_runs);
        print!("{}", display_setup(&self.config));

        loop {
            println!("Starting {}", self.schedule);
            let result = self.perform_current_run()?;

            self.run_log.append_record(&result.to_csv_record())?;
            println!("{}", result);
            if let Some(stats) = &result.stats {
                println!("{}", stats);
            }
            self.records
                .push(RunRecord::from_result(self.schedule.idx, &result));

            self.schedule.advance();
            if self.schedule.idx > self.config.num_runs {
                break;
            }
            if self.is_shutdown_requested() {
                info!(
                    "shutdown requested - stopping after {} of {} runs",
                    self.records.len(),
                    self.config.num_runs
                );
                break;
            }
            // Be nice with the broker before ramping up further
            thread::sleep(Duration::from_millis(inter_run_pause_ms(
                &self.schedule,
                self.config.inter_run_pause_ms,
            )));
        }

        print!(
            "{}",
            display_execution_time(
                campaign_start.elapsed().as_millis() as u64,
                self.records.len() as u32,
                self.config.num_runs,
            )
        );

        let summary = CampaignSummary::from_runs(
            self.config.clone(),
            self.records.clone(),
            started_at_epoch_s,
            reporter::epoch_seconds(),
        );
        let summary_path = Path::new(&self.config.results_dir)
            .join(format!("connection_test_{}.json", self.log_timestamp));
        if let Err(e) = reporter::write_json_summary(&summary, &summary_path) {
            warn!(
                "failed to write campaign summary {}: {}",
                summary_path.display(),
                e
            );
        }

        Ok(summary)
    }

    /// Perform the currently scheduled run and return its finalized result.
    ///
    /// Worker threads hand their batch back on the handoff channel and
    /// report their failure count on the results channel. In persistent
    /// mode the Keep Alive Task owns the handoff receiver and closes every
    /// batch when stopped; otherwise the batches are drained and closed
    /// here once the operator releases the gate.
    fn perform_current_run(&mut self) -> Result<RunResult, BrokerLoadTestError> {
        let run = self.schedule.clone();
        let mut result = RunResult::new(&run);
        let collector = if self.config.show_stats {
            Some(Arc::new(TimingCollector::new()))
        } else {
            None
        };

        // Client names restart from the top of the pool on every run
        self.name_pool.reset();
        let batches = self.build_batches(&run)?;
        let pacing = build_run_pacing(&self.config, &run)?;

        let (results_tx, results_rx) = mpsc::channel();
        let (handoff_tx, handoff_rx) = mpsc::channel();
        let num_tasks = batches.len();
        dispatch_tasks(
            run.idx,
            batches,
            &pacing,
            collector.clone(),
            results_tx,
            handoff_tx,
        )?;

        // Display the timeout budget (the total pause may have been randomized)
        let timeout_budget_ms =
            pacing.max_total_pause.as_millis() as u64 + run.total_endpoint_timeout_ms;
        println!(
            "                timeout for establishing all connections {}",
            format_duration_ms(timeout_budget_ms)
        );

        let (keepalive, retained_rx) = if self.config.persist_connections {
            let interval = keepalive::check_interval(
                self.config.connection_check_interval_s,
                run.total_connections(),
            );
            let manager = match KeepAliveManager::start(interval, handoff_rx) {
                Ok(manager) => manager,
                Err(e) => {
                    println!("\n{}{}", red("   [ERROR]   "), e);
                    return Err(e);
                }
            };
            (Some(manager), None)
        } else {
            (None, Some(handoff_rx))
        };

        result.num_failures = collect_task_results(
            run.idx,
            &results_rx,
            num_tasks,
            run.num_endpoints,
            Duration::from_millis(timeout_budget_ms),
            collector.as_deref(),
        );

        println!("                done - closing connections and retrieving results");
        result.set_completion();
        if let Some(collector) = &collector {
            result.stats = Some(collector.snapshot());
        }
        info!(
            "Run #{} - got Connection Task results; about to close connections",
            run.idx
        );

        self.gate.wait();

        if let Some(manager) = keepalive {
            manager.stop();
            info!("Run #{} - Keep Alive Task completed", run.idx);
        } else if let Some(handoff_rx) = retained_rx {
            teardown::close_all(drain_batches(&handoff_rx));
        }

        Ok(result)
    }

    /// Build one batch of clients per Connection Task. Every client gets a
    /// distinct name from the pool; running out of names aborts the run.
    fn build_batches(
        &self,
        run: &RunSchedule,
    ) -> Result<Vec<Vec<Box<dyn BrokerClient>>>, BrokerLoadTestError> {
        let mut batches = Vec::with_capacity(run.concurrency as usize);
        for _ in 0..run.concurrency {
            let mut batch: Vec<Box<dyn BrokerClient>> =
                Vec::with_capacity(run.num_endpoints as usize);
            for _ in 0..run.num_endpoints {
                let name = self.name_pool.next_name()?;
                let client_config = ClientConfig::from_config(&self.config, name);
                batch.push((self.client_factory)(client_config));
            }
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Set up signal handling for SIGINT. When a signal is received, sets
    /// the shutdown flag; the flag is honored between runs, never mid-run.
    pub fn setup_signal_handler(&self) -> Result<(), BrokerLoadTestError> {
        let flag = self.shutdown_flag.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .map_err(|e| {
            BrokerLoadTestError::ConfigError(format!("Failed to set signal handler: {}", e))
        })
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Request shutdown (for testing or programmatic use).
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The run the campaign will perform next.
    pub fn schedule(&self) -> &RunSchedule {
        &self.schedule
    }

    /// Path of the append-only CSV result log.
    pub fn log_path(&self) -> &Path {
        self.run_log.path()
    }
}

/// Spawn one worker thread per batch. Each worker runs its Connection
/// Task, hands the batch back for teardown or keepalive, then reports its
/// failure count. Failing to spawn a worker aborts the whole run.
fn dispatch_tasks(
    run_idx: u32,
    batches: Vec<Vec<Box<dyn BrokerClient>>>,
    pacing: &RunPacing,
    collector: Option<Arc<TimingCollector>>,
    results_tx: Sender<(usize, u64)>,
    handoff_tx: Sender<Vec<Box<dyn BrokerClient>>>,
) -> Result<(), BrokerLoadTestError> {
    for (idx, batch) in batches.into_iter().enumerate() {
        let task_id = idx + 1;
        let schedule = pacing.schedules[idx].clone();
        let results_tx = results_tx.clone();
        let handoff_tx = handoff_tx.clone();
        let collector = collector.clone();

        let spawned = thread::Builder::new()
            .name(format!("conn-task-{}", task_id))
            .spawn(move || {
                let outcome =
                    dispatcher::run_connection_task(task_id, batch, &schedule, collector.as_deref());
                // The batch goes back first so keepalive or teardown can
                // pick it up even if nobody reads the failure count
                let _ = handoff_tx.send(outcome.clients);
                let _ = results_tx.send((outcome.task_id, outcome.num_failures));
            });

        match spawned {
            Ok(_) => debug!("Run #{} - started Connection Task {}", run_idx, task_id),
            Err(e) => {
                println!(
                    "\n{}failed to start Connection Task - thread error: {}",
                    red("   [ERROR]   "),
                    e
                );
                return Err(BrokerLoadTestError::Fatal(
                    "failed to start Connection Task threads".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Wait for every Connection Task to report, within the run's timeout
/// budget. The budget shrinks as time passes so one slow task cannot
/// extend the overall wait; tasks that do not report in time count their
/// whole batch as failed.
fn collect_task_results(
    run_idx: u32,
    results: &Receiver<(usize, u64)>,
    num_tasks: usize,
    endpoints_per_task: u32,
    budget: Duration,
    collector: Option<&TimingCollector>,
) -> u64 {
    let wait_start = Instant::now();
    let mut num_failures: u64 = 0;
    let mut completed = 0usize;

    while completed < num_tasks {
        let remaining = budget.saturating_sub(wait_start.elapsed());
        match results.recv_timeout(remaining) {
            Ok((_task_id, task_failures)) => {
                num_failures += task_failures;
                completed += 1;
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if completed < num_tasks {
        let missing = num_tasks - completed;
        warn!(
            "Run #{} - {} of {} Connection Tasks did not report within {}",
            run_idx,
            missing,
            num_tasks,
            format_duration_ms(budget.as_millis() as u64)
        );
        num_failures += missing as u64 * endpoints_per_task as u64;
        if let Some(collector) = collector {
            for _ in 0..missing {
                collector.record_failure_kind("task_timeout");
            }
        }
    }

    num_failures
}

/// Collect every batch the finished workers handed back. A batch still
/// held by a worker past the timeout budget is dropped together with its
/// connections once the worker's send fails against the closed channel.
fn drain_batches(
    handoff: &Receiver<Vec<Box<dyn BrokerClient>>>,
) -> Vec<Vec<Box<dyn BrokerClient>>> {
    let mut groups = Vec::new();
    while let Ok(batch) = handoff.try_recv() {
        groups.push(batch);
    }
    groups
}

/// Pacing for the run: one constant schedule shared by every task, or
/// per-endpoint pauses drawn from a seeded exponential distribution.
fn build_run_pacing(config: &Config, run: &RunSchedule) -> Result<RunPacing, BrokerLoadTestError> {
    if config.randomize_inter_endpoint_pause {
        let mut pacer = ExponentialPacer::new(config.inter_endpoint_pause_ms, run.rng_seed)?;
        Ok(RunPacing::randomized(
            run.num_endpoints,
            run.concurrency,
            &mut pacer,
        ))
    } else {
        Ok(RunPacing::constant(
            run.num_endpoints,
            run.concurrency,
            config.inter_endpoint_pause_ms,
        ))
    }
}

/// Pause before the run that is about to start, proportional to its size.
fn inter_run_pause_ms(next_run: &RunSchedule, inter_run_pause_ms: u64) -> u64 {
    INTER_RUN_BASE_PAUSE_MS
        + inter_run_pause_ms * next_run.num_endpoints as u64 * next_run.concurrency as u64
}

/// Setup summary displayed once, before the first run.
fn display_setup(config: &Config) -> String {
    let mut out = String::new();
    out.push_str("\nConnection test setup:\n");
    out.push_str(&format!(
        "  {} concurrent sets (+{} per run) of {} endpoints (+{} per run)\n",
        config.concurrency,
        config.concurrency_increment,
        config.num_endpoints,
        config.endpoints_increment
    ));
    out.push_str(&format!(
        "  {} runs, (2000 + {} * num_endpoints) ms pause between each run\n",
        config.num_runs, config.inter_run_pause_ms
    ));
    out.push_str(&format!(
        "  {} ms pause between each set connection",
        config.inter_endpoint_pause_ms
    ));
    if config.randomize_inter_endpoint_pause {
        out.push_str(" (mean value - exp. distribution)");
    }
    out.push_str(&format!(
        "\n  WebSocket connection timeout {} ms\n",
        config.connection_timeout_ms
    ));
    out.push_str(&format!(
        "  Association timeout {} s; Association Request TTL {} s\n",
        config.association_timeout_s, config.association_request_ttl_s
    ));
    out.push_str("  keep WebSocket connections alive: ");
    if config.persist_connections {
        out.push_str(&format!(
            "yes, by pinging every {} s\n\n",
            config.connection_check_interval_s
        ));
    } else {
        out.push_str("no\n\n");
    }
    out
}

/// Final console line: total elapsed time, noting a shortened campaign.
fn display_execution_time(elapsed_ms: u64, executed_runs: u32, configured_runs: u32) -> String {
    let minutes = elapsed_ms / 60_000;
    let seconds = (elapsed_ms % 60_000) / 1000;
    let mut out = format!("\nConnection test: finished in {} m {} s", minutes, seconds);

    if executed_runs < configured_runs {
        if executed_runs > 1 {
            out.push_str(&format!(
                "; only the first {} runs were executed\n\n",
                executed_runs
            ));
        } else {
            out.push_str("; only the first run was executed\n\n");
        }
    } else {
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use tempfile::TempDir;

    use crate::console::AutoGate;
    use crate::name_pool::NameGenerator;
    use crate::testutil::MockClientRegistry;

    // ===== Test Helpers =====

    fn make_config(results_dir: &TempDir, num_endpoints: u32, concurrency: u32) -> Config {
        let needed = (num_endpoints * concurrency) as usize;
        Config {
            num_runs: 1,
            num_endpoints,
            concurrency,
            inter_run_pause_ms: 0,
            inter_endpoint_pause_ms: 1,
            broker_uris: vec!["ws://127.0.0.1:9/".to_string()],
            results_dir: results_dir.path().to_string_lossy().into_owned(),
            agents: NameGenerator::generate("agent", 1, needed as u32),
            ..Config::default()
        }
    }

    fn make_test(config: Config, registry: &Arc<MockClientRegistry>) -> ConnectionTest {
        ConnectionTest::new(config, registry.factory(), Box::new(AutoGate))
            .expect("campaign context")
    }

    // ===== Full campaign tests =====

    #[test]
    fn single_run_campaign_reports_no_failures_on_success() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut test = make_test(make_config(&dir, 3, 1), &registry);

        let summary = test.execute().unwrap();

        assert_eq!(summary.executed_runs, 1);
        assert_eq!(summary.total_attempted, 3);
        assert_eq!(summary.total_failures, 0);

        let states = registry.recorded_states();
        assert_eq!(states.len(), 3);
        for state in &states {
            assert_eq!(state.connect_calls.load(Ordering::Relaxed), 1);
            assert_eq!(state.close_calls.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn campaign_ramps_endpoints_and_reuses_names_across_runs() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut config = make_config(&dir, 2, 1);
        config.num_runs = 2;
        config.endpoints_increment = 1;
        config.agents = NameGenerator::generate("agent", 1, 3);
        let mut test = make_test(config, &registry);

        let summary = test.execute().unwrap();

        assert_eq!(summary.executed_runs, 2);
        // 2 endpoints in the first run, 3 in the second
        assert_eq!(summary.total_attempted, 5);
        assert_eq!(summary.runs[0].num_endpoints, 2);
        assert_eq!(summary.runs[1].num_endpoints, 3);

        // agent0001 and agent0002 are used by both runs
        let states = registry.recorded_states();
        assert_eq!(states.len(), 5);
        assert_eq!(states[0].name, "agent0001");
        assert_eq!(states[2].name, "agent0001");
        assert_eq!(states[4].name, "agent0003");
    }

    #[test]
    fn failed_connects_are_counted_per_endpoint() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        registry.fail_connect_for("agent0002");
        let mut test = make_test(make_config(&dir, 2, 2), &registry);

        let summary = test.execute().unwrap();

        assert_eq!(summary.total_attempted, 4);
        assert_eq!(summary.total_failures, 1);
    }

    #[test]
    fn tasks_stuck_past_the_budget_fail_their_whole_batch() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        // Each connect takes far longer than the run's whole budget
        registry.connect_delay_ms.store(400, Ordering::Relaxed);
        let mut config = make_config(&dir, 2, 1);
        config.connection_timeout_ms = 1;
        config.association_timeout_s = 0;
        let mut test = make_test(config, &registry);

        let start = Instant::now();
        let summary = test.execute().unwrap();

        assert_eq!(summary.total_failures, 2);
        // The orchestrator must not wait for the stuck worker itself
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn campaign_appends_one_csv_record_per_run() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut config = make_config(&dir, 2, 1);
        config.num_runs = 2;
        let mut test = make_test(config, &registry);
        let log_path = test.log_path().to_path_buf();

        test.execute().unwrap();

        let contents = std::fs::read_to_string(log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2,1,0,"));
        assert!(lines[1].starts_with("2,1,0,"));
    }

    #[test]
    fn campaign_writes_a_json_summary_next_to_the_csv() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut test = make_test(make_config(&dir, 1, 1), &registry);

        test.execute().unwrap();

        let json_path = dir
            .path()
            .read_dir()
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .expect("summary file");
        let summary: CampaignSummary =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(summary.executed_runs, 1);
    }

    #[test]
    fn show_stats_attaches_a_snapshot_and_widens_the_csv_record() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut config = make_config(&dir, 3, 1);
        config.show_stats = true;
        let mut test = make_test(config, &registry);
        let log_path = test.log_path().to_path_buf();

        let summary = test.execute().unwrap();

        let stats = summary.runs[0].stats.as_ref().expect("snapshot");
        assert_eq!(stats.tcp.count, 3);
        assert_eq!(stats.association.count, 3);

        let contents = std::fs::read_to_string(log_path).unwrap();
        let first_line = contents.lines().next().unwrap();
        assert_eq!(first_line.split(',').count(), 20);
    }

    #[test]
    fn persistent_mode_closes_connections_through_the_keep_alive_task() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut config = make_config(&dir, 2, 2);
        config.persist_connections = true;
        let mut test = make_test(config, &registry);

        let summary = test.execute().unwrap();

        assert_eq!(summary.total_failures, 0);
        let states = registry.recorded_states();
        assert_eq!(states.len(), 4);
        for state in &states {
            assert_eq!(state.close_calls.load(Ordering::Relaxed), 1);
        }
    }

    // ===== Shutdown flag tests =====

    #[test]
    fn shutdown_request_stops_the_campaign_between_runs() {
        let dir = TempDir::new().unwrap();
        let registry = MockClientRegistry::new();
        let mut config = make_config(&dir, 1, 1);
        config.num_runs = 3;
        let mut test = make_test(config, &registry);

        assert!(!test.is_shutdown_requested());
        test.request_shutdown();
        assert!(test.is_shutdown_requested());

        let summary = test.execute().unwrap();
        assert_eq!(summary.executed_runs, 1);
    }

    // ===== collect_task_results tests =====

    #[test]
    fn collect_sums_failures_from_all_tasks() {
        let (tx, rx) = mpsc::channel();
        tx.send((1, 2u64)).unwrap();
        tx.send((2, 0u64)).unwrap();
        tx.send((3, 1u64)).unwrap();
        drop(tx);

        let failures = collect_task_results(1, &rx, 3, 5, Duration::from_secs(1), None);
        assert_eq!(failures, 3);
    }

    #[test]
    fn collect_charges_missing_tasks_with_their_whole_batch() {
        let (tx, rx) = mpsc::channel::<(usize, u64)>();
        tx.send((1, 1u64)).unwrap();
        // Task 2 never reports; keep its sender alive so the channel stays open
        let failures = collect_task_results(1, &rx, 2, 4, Duration::from_millis(20), None);
        drop(tx);
        assert_eq!(failures, 1 + 4);
    }

    #[test]
    fn collect_records_a_failure_kind_per_missing_task() {
        let (tx, rx) = mpsc::channel::<(usize, u64)>();
        let collector = TimingCollector::new();
        let failures =
            collect_task_results(1, &rx, 2, 3, Duration::from_millis(10), Some(&collector));
        drop(tx);

        assert_eq!(failures, 6);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.failure_kinds.get("task_timeout"), Some(&2));
    }

    // ===== Pacing helper tests =====

    #[test]
    fn randomized_pacing_is_deterministic_per_run_seed() {
        let mut config = Config {
            randomize_inter_endpoint_pause: true,
            inter_endpoint_pause_ms: 40,
            ..Config::default()
        };
        config.num_endpoints = 5;
        let run = RunSchedule::new(&config);

        let first = build_run_pacing(&config, &run).unwrap();
        let second = build_run_pacing(&config, &run).unwrap();
        assert_eq!(first.schedules, second.schedules);

        let mut next_run = run.clone();
        next_run.advance();
        let third = build_run_pacing(&config, &next_run).unwrap();
        assert_ne!(first.schedules, third.schedules);
    }

    #[test]
    fn constant_pacing_shares_one_schedule_per_task() {
        let config = Config {
            num_endpoints: 4,
            concurrency: 3,
            inter_endpoint_pause_ms: 25,
            ..Config::default()
        };
        let run = RunSchedule::new(&config);

        let pacing = build_run_pacing(&config, &run).unwrap();
        assert_eq!(pacing.schedules.len(), 3);
        assert_eq!(pacing.max_total_pause, Duration::from_millis(100));
    }

    // ===== Display helper tests =====

    #[test]
    fn setup_display_matches_the_expected_layout() {
        let config = Config {
            num_runs: 3,
            num_endpoints: 10,
            endpoints_increment: 5,
            concurrency: 2,
            concurrency_increment: 1,
            inter_run_pause_ms: 50,
            inter_endpoint_pause_ms: 100,
            connection_timeout_ms: 1500,
            association_timeout_s: 10,
            association_request_ttl_s: 10,
            ..Config::default()
        };

        let text = display_setup(&config);
        assert_eq!(
            text,
            "\nConnection test setup:\n\
             \x20 2 concurrent sets (+1 per run) of 10 endpoints (+5 per run)\n\
             \x20 3 runs, (2000 + 50 * num_endpoints) ms pause between each run\n\
             \x20 100 ms pause between each set connection\n\
             \x20 WebSocket connection timeout 1500 ms\n\
             \x20 Association timeout 10 s; Association Request TTL 10 s\n\
             \x20 keep WebSocket connections alive: no\n\n"
        );
    }

    #[test]
    fn setup_display_mentions_randomized_pacing_and_keepalive() {
        let config = Config {
            randomize_inter_endpoint_pause: true,
            persist_connections: true,
            connection_check_interval_s: 15,
            ..Config::default()
        };

        let text = display_setup(&config);
        assert!(text.contains(" (mean value - exp. distribution)\n"));
        assert!(text.contains("keep WebSocket connections alive: yes, by pinging every 15 s\n\n"));
    }

    #[test]
    fn execution_time_display_reports_minutes_and_seconds() {
        let text = display_execution_time(65_000, 3, 3);
        assert_eq!(text, "\nConnection test: finished in 1 m 5 s\n\n");
    }

    #[test]
    fn execution_time_display_notes_a_shortened_campaign() {
        assert!(display_execution_time(5_000, 2, 5)
            .ends_with("; only the first 2 runs were executed\n\n"));
        assert!(display_execution_time(5_000, 1, 5)
            .ends_with("; only the first run was executed\n\n"));
    }

    // ===== Inter-run pause tests =====

    #[test]
    fn inter_run_pause_scales_with_the_next_run_size() {
        let config = Config {
            num_endpoints: 10,
            concurrency: 2,
            inter_run_pause_ms: 50,
            ..Config::default()
        };
        let run = RunSchedule::new(&config);
        assert_eq!(inter_run_pause_ms(&run, 50), 2000 + 50 * 10 * 2);
        assert_eq!(inter_run_pause_ms(&run, 0), 2000);
    }

    // ===== Fatal setup tests =====

    #[test]
    fn missing_results_dir_is_fatal_at_construction() {
        let registry = MockClientRegistry::new();
        let config = Config {
            results_dir: "/nonexistent/results/dir".to_string(),
            ..Config::default()
        };

        let result = ConnectionTest::new(config, registry.factory(), Box::new(AutoGate));
        assert!(matches!(
            result.unwrap_err(),
            BrokerLoadTestError::Fatal(_)
        ));
    }
}
