//! Simulate command implementation.
//!
//! Runs a phone and a watch, each on its own runtime task, over an
//! in-memory link and replays a scripted scenario against them.

use super::{CliError, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use trivit_sync_engine::{
    spawn_replica, CounterStore, LoopbackLink, LoopbackTransport, MemoryCounterStore,
    PrimaryEngine, SecondaryEngine, SyncConfig, SyncError, SyncHandle, SyncResult, SyncStats,
    SyncStatus,
};
use trivit_sync_protocol::{Counter, CounterId, Role};

type Phone = PrimaryEngine<LoopbackTransport, MemoryCounterStore>;
type Watch = SecondaryEngine<LoopbackTransport, MemoryCounterStore>;

/// Upper bound on settle rounds after a step.
const MAX_SETTLE_ROUNDS: usize = 100;

/// A scripted phone/watch session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Whether the devices start in range.
    #[serde(default = "default_reachable")]
    pub reachable: bool,
    /// Counters on the phone at launch.
    #[serde(default)]
    pub phone: Vec<Counter>,
    /// Counters on the watch at launch.
    #[serde(default)]
    pub watch: Vec<Counter>,
    /// Steps to run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_reachable() -> bool {
    true
}

/// One scenario step. Counters are addressed by their position in the
/// acting device's list.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    /// Add one.
    Increment {
        /// Acting device.
        on: Role,
        /// Counter position.
        index: usize,
    },
    /// Remove one.
    Decrement {
        /// Acting device.
        on: Role,
        /// Counter position.
        index: usize,
    },
    /// Zero a counter.
    Reset {
        /// Acting device.
        on: Role,
        /// Counter position.
        index: usize,
    },
    /// Rename a counter.
    Rename {
        /// Acting device.
        on: Role,
        /// Counter position.
        index: usize,
        /// New title.
        title: String,
    },
    /// Delete a counter (soft on the phone, hard on the watch).
    Delete {
        /// Acting device.
        on: Role,
        /// Counter position.
        index: usize,
    },
    /// Restore the phone's most recently deleted counter.
    Restore,
    /// Create a counter.
    Create {
        /// Acting device.
        on: Role,
        /// Title.
        title: String,
        /// Palette index.
        #[serde(default, rename = "colorIndex")]
        color_index: u32,
    },
    /// Change reachability.
    SetReachable {
        /// New reachability.
        reachable: bool,
    },
    /// Press "sync now".
    SyncNow {
        /// Acting device.
        on: Role,
    },
    /// Deactivate one side's session.
    Deactivate {
        /// Affected device.
        on: Role,
    },
}

/// Outcome of a simulation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    /// Per-step log lines.
    pub steps: Vec<String>,
    /// Phone's counters, including soft-deleted ones.
    pub phone: Vec<Counter>,
    /// Watch's counters.
    pub watch: Vec<Counter>,
    /// Phone status.
    pub phone_status: StatusReport,
    /// Watch status.
    pub watch_status: StatusReport,
    /// Whether the watch holds exactly the phone's live counters.
    pub converged: bool,
    /// Payloads delivered over the link.
    pub delivered: u64,
}

/// Serializable status of one device.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Session activation state.
    pub activation: String,
    /// Peer reachability.
    pub reachable: bool,
    /// Outcome of the last sync.
    pub last_sync_succeeded: Option<bool>,
    /// Last error.
    pub last_error: Option<String>,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages dropped.
    pub messages_dropped: u64,
    /// Send failures.
    pub send_failures: u64,
}

impl StatusReport {
    fn new(status: &SyncStatus, stats: &SyncStats) -> Self {
        Self {
            activation: format!("{:?}", status.activation),
            reachable: status.is_reachable,
            last_sync_succeeded: status.last_sync_succeeded,
            last_error: status.last_error.clone(),
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            messages_dropped: stats.messages_dropped,
            send_failures: stats.send_failures,
        }
    }
}

/// Runs the simulate command.
pub fn run(scenario: Option<&Path>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let scenario = match scenario {
        Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
        None => demo_scenario(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(scenario))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

/// The built-in demo: the watch starts stale, then both sides edit and
/// the watch drops out of range for a while.
pub fn demo_scenario() -> Scenario {
    let water = Counter::new("Water", 4).with_count(5).with_sort_order(0);
    let coffee = Counter::new("Coffee", 1).with_count(2).with_sort_order(1);
    let stale = Counter::new("Stretch", 6).with_count(9).with_sort_order(2);

    Scenario {
        reachable: true,
        phone: vec![water.clone(), coffee.clone()],
        watch: vec![coffee.with_count(1), stale],
        steps: vec![
            Step::Increment {
                on: Role::Secondary,
                index: 0,
            },
            Step::Create {
                on: Role::Secondary,
                title: "Push-ups".into(),
                color_index: 2,
            },
            Step::SetReachable { reachable: false },
            Step::Increment {
                on: Role::Primary,
                index: 1,
            },
            Step::Delete {
                on: Role::Primary,
                index: 0,
            },
            Step::SetReachable { reachable: true },
            Step::Restore,
            Step::SyncNow { on: Role::Secondary },
        ],
    }
}

struct Simulation {
    link: LoopbackLink,
    phone: SyncHandle<Phone>,
    watch: SyncHandle<Watch>,
    phone_store: Arc<MemoryCounterStore>,
    watch_store: Arc<MemoryCounterStore>,
    tasks: Vec<JoinHandle<()>>,
    deleted: Vec<CounterId>,
}

/// Runs `scenario` to completion and reports the final state.
pub async fn simulate(scenario: Scenario) -> Result<SimulationReport, CliError> {
    let pair = LoopbackLink::pair(scenario.reachable);
    let phone_store = Arc::new(MemoryCounterStore::with_counters(scenario.phone));
    let watch_store = Arc::new(MemoryCounterStore::with_counters(scenario.watch));

    let phone = Arc::new(PrimaryEngine::new(
        SyncConfig::new("phone"),
        pair.primary,
        Arc::clone(&phone_store),
    ));
    let watch = Arc::new(SecondaryEngine::with_store(
        SyncConfig::new("watch"),
        pair.secondary,
        Arc::clone(&watch_store),
    ));
    let (phone, phone_task) = spawn_replica(phone, pair.primary_events);
    let (watch, watch_task) = spawn_replica(watch, pair.secondary_events);

    let mut sim = Simulation {
        link: pair.link,
        phone,
        watch,
        phone_store,
        watch_store,
        tasks: vec![phone_task, watch_task],
        deleted: Vec::new(),
    };
    sim.settle().await?;

    let mut log = vec![format!(
        "launch: phone {} counters, watch {} counters",
        sim.live_ids(Role::Primary).len(),
        sim.live_ids(Role::Secondary).len()
    )];
    for (index, step) in scenario.steps.iter().enumerate() {
        let line = sim.step(index, step).await?;
        sim.settle().await?;
        info!(step = index, "{line}");
        log.push(line);
    }

    sim.finish(log).await
}

impl Simulation {
    /// Lets both tasks drain their queues until no more payloads move.
    async fn settle(&self) -> Result<(), CliError> {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let before = self.link.delivered_count();
            self.phone.perform(|_| ()).await.map_err(stopped)?;
            self.watch.perform(|_| ()).await.map_err(stopped)?;
            if self.link.delivered_count() == before {
                return Ok(());
            }
        }
        Ok(())
    }

    fn live_ids(&self, role: Role) -> Vec<CounterId> {
        let store = match role {
            Role::Primary => &self.phone_store,
            Role::Secondary => &self.watch_store,
        };
        store
            .fetch_all(false)
            .map(|counters| counters.into_iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    fn target(&self, step: usize, on: Role, index: usize) -> Result<CounterId, CliError> {
        self.live_ids(on)
            .get(index)
            .copied()
            .ok_or_else(|| CliError::Scenario {
                step,
                reason: format!("{on} has no counter at position {index}"),
            })
    }

    async fn step(&mut self, index: usize, step: &Step) -> Result<String, CliError> {
        let fail = |err: SyncError| CliError::Scenario {
            step: index,
            reason: format!("{err}"),
        };

        let line = match step {
            Step::Increment { on, index: at } => {
                let id = self.target(index, *on, *at)?;
                let count = self
                    .edit(*on, id, |p, id| p.increment(id), |w, id| w.increment(id))
                    .await
                    .map_err(fail)?;
                format!("{on} increments {id} to {count}")
            }
            Step::Decrement { on, index: at } => {
                let id = self.target(index, *on, *at)?;
                let count = self
                    .edit(*on, id, |p, id| p.decrement(id), |w, id| w.decrement(id))
                    .await
                    .map_err(fail)?;
                format!("{on} decrements {id} to {count}")
            }
            Step::Reset { on, index: at } => {
                let id = self.target(index, *on, *at)?;
                self.edit(*on, id, |p, id| p.reset(id), |w, id| w.reset(id))
                    .await
                    .map_err(fail)?;
                format!("{on} resets {id}")
            }
            Step::Rename { on, index: at, title } => {
                let id = self.target(index, *on, *at)?;
                let (a, b) = (title.clone(), title.clone());
                self.edit(
                    *on,
                    id,
                    move |p, id| p.rename(id, a),
                    move |w, id| w.rename(id, b),
                )
                .await
                .map_err(fail)?;
                format!("{on} renames {id} to {title:?}")
            }
            Step::Delete { on, index: at } => {
                let id = self.target(index, *on, *at)?;
                let result = match on {
                    Role::Primary => self.phone.perform(move |p| p.delete_counter(id)).await,
                    Role::Secondary => self.watch.perform(move |w| w.delete_counter(id)).await,
                };
                flatten(result).map_err(fail)?;
                if *on == Role::Primary {
                    self.deleted.push(id);
                }
                format!("{on} deletes {id}")
            }
            Step::Restore => {
                let id = self.deleted.pop().ok_or_else(|| CliError::Scenario {
                    step: index,
                    reason: "nothing to restore".into(),
                })?;
                flatten(self.phone.perform(move |p| p.restore_counter(id)).await)
                    .map_err(fail)?;
                format!("primary restores {id}")
            }
            Step::Create {
                on,
                title,
                color_index,
            } => {
                let (title, color) = (title.clone(), *color_index);
                let line = format!("{on} creates {title:?}");
                let result = match on {
                    Role::Primary => self
                        .phone
                        .perform(move |p| p.create_counter(title, color).map(drop))
                        .await,
                    Role::Secondary => {
                        self.watch
                            .perform(move |w| w.create_counter(title, color))
                            .await
                    }
                };
                match flatten(result) {
                    Ok(()) => line,
                    Err(err) => format!("{line}, not sent: {err}"),
                }
            }
            Step::SetReachable { reachable } => {
                self.link.set_reachable(*reachable);
                if *reachable {
                    "devices back in range".to_string()
                } else {
                    "devices out of range".to_string()
                }
            }
            Step::SyncNow { on } => {
                let result = match on {
                    Role::Primary => self.phone.sync_now().await,
                    Role::Secondary => self.watch.sync_now().await,
                };
                match result {
                    Ok(()) => format!("{on} syncs now"),
                    Err(err) => format!("{on} sync now failed: {err}"),
                }
            }
            Step::Deactivate { on } => {
                self.link.deactivate(*on);
                format!("{on} session deactivated")
            }
        };
        Ok(line)
    }

    /// Runs a counter edit on the acting side; returns the new count.
    async fn edit<P, W>(&self, on: Role, id: CounterId, phone: P, watch: W) -> SyncResult<u64>
    where
        P: FnOnce(&Phone, CounterId) -> SyncResult<Counter> + Send + 'static,
        W: FnOnce(&Watch, CounterId) -> SyncResult<Counter> + Send + 'static,
    {
        let result = match on {
            Role::Primary => self.phone.perform(move |p| phone(p, id)).await,
            Role::Secondary => self.watch.perform(move |w| watch(w, id)).await,
        };
        flatten(result).map(|c| c.count)
    }

    async fn finish(self, steps: Vec<String>) -> Result<SimulationReport, CliError> {
        let phone_status = self.phone.status().await.map_err(stopped)?;
        let watch_status = self.watch.status().await.map_err(stopped)?;
        let phone_stats = self
            .phone
            .perform(|p| p.stats())
            .await
            .map_err(stopped)?;
        let watch_stats = self
            .watch
            .perform(|w| w.stats())
            .await
            .map_err(stopped)?;

        let mut phone_live = self.live_ids(Role::Primary);
        let mut watch_ids = self.live_ids(Role::Secondary);
        phone_live.sort();
        watch_ids.sort();

        let report = SimulationReport {
            steps,
            phone: self.phone_store.snapshot(),
            watch: self.watch_store.snapshot(),
            phone_status: StatusReport::new(&phone_status, &phone_stats),
            watch_status: StatusReport::new(&watch_status, &watch_stats),
            converged: phone_live == watch_ids,
            delivered: self.link.delivered_count(),
        };

        // A stop request only fails if the task is already gone.
        let _ = self.phone.shutdown();
        let _ = self.watch.shutdown();
        for task in self.tasks {
            let _ = task.await;
        }
        Ok(report)
    }
}

fn flatten<T>(result: SyncResult<SyncResult<T>>) -> SyncResult<T> {
    result.and_then(|inner| inner)
}

fn stopped(err: SyncError) -> CliError {
    CliError::Scenario {
        step: 0,
        reason: err.to_string(),
    }
}

fn print_text(report: &SimulationReport) {
    for (i, line) in report.steps.iter().enumerate() {
        println!("{i:>3}  {line}");
    }
    println!();
    print_counters("Phone", &report.phone);
    print_counters("Watch", &report.watch);
    print_status("Phone", &report.phone_status);
    print_status("Watch", &report.watch_status);
    println!();
    println!("Delivered: {} payloads", report.delivered);
    println!(
        "Converged: {}",
        if report.converged { "yes" } else { "no" }
    );
}

fn print_counters(device: &str, counters: &[Counter]) {
    println!("{device} counters:");
    if counters.is_empty() {
        println!("  (none)");
    }
    for counter in counters {
        let deleted = if counter.is_deleted() { "  [deleted]" } else { "" };
        println!(
            "  {:>3}  {:<20} {:>6}  {}{}",
            counter.sort_order, counter.title, counter.count, counter.id, deleted
        );
    }
}

fn print_status(device: &str, status: &StatusReport) {
    let last_sync = match status.last_sync_succeeded {
        Some(true) => "succeeded",
        Some(false) => "failed",
        None => "never",
    };
    println!(
        "{device}: {} reachable={} last sync {} sent={} received={} dropped={} failed={}",
        status.activation,
        status.reachable,
        last_sync,
        status.messages_sent,
        status.messages_received,
        status.messages_dropped,
        status.send_failures
    );
    if let Some(error) = &status.last_error {
        println!("  last error: {error}");
    }
}
