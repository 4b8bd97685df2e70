//! Background scheduler driving one loop per scheduled rule

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::rule::MonitorRule;
use super::runner::Monitor;
use super::schedule::Schedule;

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the rule set is re-read to pick up added or re-enabled rules
    pub reconcile_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(1),
        }
    }
}

struct RuleLoop {
    handle: JoinHandle<()>,
}

/// State shared between the scheduler handle, the supervisor and rule loops
struct Shared {
    monitor: Arc<Monitor>,
    loops: Mutex<HashMap<String, RuleLoop>>,
    next_fire: Mutex<HashMap<String, DateTime<Utc>>>,
}

struct Running {
    stop_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

/// Fires rules on their own timetables.
///
/// Each enabled rule with a schedule gets its own task, so a slow rule never
/// delays another. A rule that overruns its period reschedules from the time
/// it finished.
pub struct MonitorScheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl MonitorScheduler {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self::with_config(monitor, SchedulerConfig::default())
    }

    pub fn with_config(monitor: Arc<Monitor>, config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                monitor,
                loops: Mutex::new(HashMap::new()),
                next_fire: Mutex::new(HashMap::new()),
            }),
            config,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Start scheduling. Returns false if already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("Scheduler is already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.reconcile_interval;

        let supervisor = tokio::spawn(async move {
            supervise(shared, interval, stop_rx).await;
        });

        *running = Some(Running { stop_tx, supervisor });
        tracing::info!("Monitor scheduler started");
        true
    }

    /// Stop scheduling and wait for in-flight executions to finish.
    ///
    /// Returns false if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(Running { stop_tx, supervisor }) = running.take() else {
            return false;
        };

        let _ = stop_tx.send(true);
        if let Err(e) = supervisor.await {
            tracing::error!(error = %e, "Scheduler supervisor ended abnormally");
        }

        // The supervisor no longer spawns; drain whatever loops exist
        let loops: Vec<(String, RuleLoop)> = self.shared.loops.lock().drain().collect();
        for (name, rule_loop) in loops {
            if let Err(e) = rule_loop.handle.await {
                tracing::error!(rule = %name, error = %e, "Rule loop ended abnormally");
            }
        }
        self.shared.next_fire.lock().clear();

        tracing::info!("Monitor scheduler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Next planned fire time of every rule with a live loop
    pub fn next_fire_times(&self) -> HashMap<String, DateTime<Utc>> {
        self.shared.next_fire.lock().clone()
    }

    /// Names of rules that currently have a loop
    pub fn active_rules(&self) -> Vec<String> {
        let loops = self.shared.loops.lock();
        let mut names: Vec<String> = loops
            .iter()
            .filter(|(_, l)| !l.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Keep exactly one loop alive for every enabled, scheduled rule
async fn supervise(shared: Arc<Shared>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *stop_rx.borrow() {
                    break;
                }
                reconcile(&shared, &stop_rx);
            }
            _ = stop_rx.changed() => {
                break;
            }
        }
    }
}

fn reconcile(shared: &Arc<Shared>, stop_rx: &watch::Receiver<bool>) {
    let rules = shared.monitor.store().scheduled();
    let mut loops = shared.loops.lock();

    // Forget loops that exited (rule removed, disabled or unschedulable)
    loops.retain(|_, l| !l.handle.is_finished());

    for rule in rules {
        if loops.contains_key(&rule.name) {
            continue;
        }
        tracing::debug!(rule = %rule.name, "Starting rule loop");
        let handle = tokio::spawn(rule_loop(
            Arc::clone(shared),
            rule.name.clone(),
            stop_rx.clone(),
        ));
        loops.insert(rule.name, RuleLoop { handle });
    }
}

/// Current snapshot of a rule if it should still be scheduled
fn schedulable(shared: &Shared, name: &str) -> Option<(MonitorRule, Schedule)> {
    let rule = shared.monitor.store().get(name)?;
    if !rule.enabled {
        return None;
    }
    let schedule = match Schedule::parse(rule.schedule.as_deref()?) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(rule = %name, error = %e, "Invalid schedule expression");
            return None;
        }
    };
    Some((rule, schedule))
}

async fn rule_loop(shared: Arc<Shared>, name: String, mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let Some((_, schedule)) = schedulable(&shared, &name) else {
            break;
        };
        let Some(next) = schedule.next_after(Utc::now()) else {
            tracing::warn!(rule = %name, schedule = %schedule, "Schedule never fires again");
            break;
        };
        shared.next_fire.lock().insert(name.clone(), next);

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop_rx.changed() => break,
        }

        // Re-read: the rule may have been disabled or removed while waiting
        let Some((rule, _)) = schedulable(&shared, &name) else {
            break;
        };
        tracing::info!(rule = %name, "Running scheduled monitor check");
        let result = shared.monitor.run_rule(&rule).await;
        if !result.success {
            tracing::warn!(
                rule = %name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Scheduled check failed"
            );
        }
    }

    shared.next_fire.lock().remove(&name);
    tracing::debug!(rule = %name, "Rule loop exited");
}
