use crate::client::MessageClient;
use crate::control::{proxy_up, ControlPlane, ProxyProcess};
use crate::engine::outcome::Outcome;
use crate::engine::scheduler::Stage;
use crate::engine::verifier::Verifier;
use crate::fleet::broken::BrokenSet;
use crate::fleet::consumers::ConsumerSet;
use crate::fleet::failing::FailingSet;
use crate::fleet::publishers::PublisherSet;
use crate::fleet::DisconnectPolicy;
use crate::metrics;
use crate::stats::StatsProbe;
use churn_common::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything one run owns, wired together from a `Config`.
pub struct Harness<C: MessageClient> {
    config: Config,
    outcome: Outcome,
    control: Arc<dyn ControlPlane>,
    pub verifier: Arc<Verifier>,
    pub policy: Arc<DisconnectPolicy>,
    pub proxy: Arc<ProxyProcess>,
    pub stats: Arc<StatsProbe>,
    pub publishers: Arc<PublisherSet<C>>,
    pub consumers: Arc<ConsumerSet<C>>,
    pub failing: Arc<FailingSet<C>>,
    pub broken: Arc<BrokenSet<C>>,
}

impl<C: MessageClient> Harness<C> {
    pub fn new(
        config: Config,
        client: Arc<C>,
        control: Arc<dyn ControlPlane>,
        outcome: Outcome,
        startup_time: u64,
    ) -> Self {
        let verifier = Arc::new(Verifier::new(startup_time));
        let policy = Arc::new(DisconnectPolicy::new(config.run.tolerate_disconnects));

        let proxy = Arc::new(ProxyProcess::new(config.proxy.clone(), outcome.clone()));
        let stats = Arc::new(StatsProbe::new(
            config.stats.host.clone(),
            config.stats.port,
            Duration::from_millis(config.stats.timeout_ms),
            Arc::clone(&control),
            outcome.clone(),
        ));
        let publishers = Arc::new(PublisherSet::new(
            Arc::clone(&client),
            config.publishers.clone(),
            startup_time,
            Arc::clone(&policy),
            outcome.clone(),
        ));
        let consumers = Arc::new(ConsumerSet::new(
            Arc::clone(&client),
            config.consumers.clone(),
            Arc::clone(&verifier),
            config.run.consumer_prefetch,
            Arc::clone(&policy),
            outcome.clone(),
        ));
        let failing = Arc::new(FailingSet::new(
            Arc::clone(&client),
            config.failing.clone(),
            outcome.clone(),
        ));
        let broken = Arc::new(BrokenSet::new(
            client,
            config.broken.listen_ports.clone(),
            config.broken.endpoints.clone(),
            config.run.max_kill_delay_ms,
            outcome.clone(),
        ));

        Self {
            config,
            outcome,
            control,
            verifier,
            policy,
            proxy,
            stats,
            publishers,
            consumers,
            failing,
            broken,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.run.stage_poll_interval_ms)
    }

    /// The ordered stage plan: proxy up, routing, telemetry, consumers before
    /// publishers, the churn populations, then the soak period that ends the
    /// run.
    pub fn plan(&self) -> Vec<Stage> {
        let mut stages = Vec::new();

        let proxy_exe = self.config.proxy.executable.clone();
        let ctl_exe = self.config.proxy.control_executable.clone();
        stages.push(Stage::once("startup", move || async move {
            info!(proxy = %proxy_exe, ctl = %ctl_exe, "Starting integration test");
        }));

        let proxy = Arc::clone(&self.proxy);
        let outcome = self.outcome.clone();
        stages.push(Stage::new(
            "start proxy",
            move || async move {
                if let Err(e) = proxy.start() {
                    outcome.fail(e);
                }
            },
            proxy_up(&self.config.proxy, self.outcome.clone()),
        ));

        let control = Arc::clone(&self.control);
        let commands = self.config.control_commands.clone();
        let outcome = self.outcome.clone();
        stages.push(Stage::once("configure routing", move || async move {
            for command in commands {
                if let Err(e) = control.run(command).await {
                    outcome.fail(e);
                    return;
                }
            }
        }));

        let stats = Arc::clone(&self.stats);
        let probe = Arc::clone(&self.stats);
        stages.push(Stage::new(
            "stats probe",
            move || async move { stats.start().await },
            move || probe.received(),
        ));

        let consumers = Arc::clone(&self.consumers);
        let started = Arc::clone(&self.consumers);
        stages.push(Stage::new(
            "start consumers",
            move || async move { consumers.start() },
            move || started.started(),
        ));

        let publishers = Arc::clone(&self.publishers);
        let started = Arc::clone(&self.publishers);
        stages.push(Stage::new(
            "start publishers",
            move || async move { publishers.start() },
            move || started.started(),
        ));

        let failing = Arc::clone(&self.failing);
        stages.push(Stage::once("start failing connections", move || async move {
            failing.start()
        }));

        let broken = Arc::clone(&self.broken);
        let outcome = self.outcome.clone();
        stages.push(Stage::once("start severing servers", move || async move {
            if let Err(e) = broken.start_serving().await {
                outcome.fail(e.into());
            }
        }));

        let broken = Arc::clone(&self.broken);
        stages.push(Stage::once("start broken connections", move || async move {
            broken.start()
        }));

        let soak = Duration::from_secs(self.config.run.soak_secs);
        let publishers = Arc::clone(&self.publishers);
        let verifier = Arc::clone(&self.verifier);
        let outcome = self.outcome.clone();
        stages.push(Stage::once("soak", move || async move {
            info!(soak_secs = soak.as_secs(), "Soaking");
            tokio::spawn(async move {
                tokio::time::sleep(soak).await;
                publishers.print_stats(&verifier);
                info!(report = %metrics::render_metrics(), "Run metrics");
                outcome.succeed();
            });
        }));

        stages
    }

    /// Stops publisher loops and the proxy child. Connections are left to die
    /// with the process.
    pub async fn shutdown(&self) {
        self.publishers.stop();
        self.proxy.stop().await;
    }
}
