//! Ownership of every provider poller
//!
//! The registry builds one [`StatusPoller`] per provider, runs each in its own
//! task against a shared HTTP client, and answers summary queries from the
//! pollers' cached state.

use crate::bus::EventBus;
use crate::config::{Config, PoolConfig, ProviderConfig};
use crate::error::RegistryError;
use crate::events::{Incident, StatusSummary};
use crate::poller::{HttpFeed, PollerHandle, StatusFeed, StatusPoller};
use log::{debug, error, info, warn};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Stand-in deadline for grace periods too long to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Monitor {
    handle: PollerHandle,
    /// Present until the poller is launched
    poller: Option<StatusPoller>,
    task: Option<JoinHandle<()>>,
}

/// Lifecycle coordinator for every provider poller
///
/// Registration only builds pollers. `start_all` creates the HTTP client and
/// the connection bound shared by every poller and spawns one task per
/// provider; `stop_all` winds them down and releases the shared pool. The
/// query methods read the summaries cached by each poller and never block on
/// a tick in progress.
pub struct MonitorRegistry {
    bus: EventBus,
    request_timeout: Duration,
    stop_grace: Duration,
    pool: PoolConfig,
    monitors: Vec<Monitor>,
    started: bool,
    client: Option<Client>,
    permits: Option<Arc<Semaphore>>,
}

impl MonitorRegistry {
    /// Create an empty registry publishing to `bus`
    ///
    /// Timeouts and pool limits start at the configuration defaults; use the
    /// `with_*` builders or [`MonitorRegistry::from_config`] to change them.
    pub fn new(bus: EventBus) -> Self {
        let defaults = Config::default();
        Self {
            bus,
            request_timeout: defaults.request_timeout(),
            stop_grace: defaults.stop_grace(),
            pool: defaults.pool,
            monitors: Vec::new(),
            started: false,
            client: None,
            permits: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Build a registry with one poller per configured provider
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration; the poll interval override is applied here
    /// * `bus` - Bus every poller publishes to
    ///
    /// # Returns
    ///
    /// The registry, not yet started, or [`RegistryError::DuplicateProvider`]
    /// when two providers share a name.
    pub fn from_config(config: &Config, bus: EventBus) -> Result<Self, RegistryError> {
        let mut registry = Self::new(bus)
            .with_request_timeout(config.request_timeout())
            .with_stop_grace(config.stop_grace())
            .with_pool(config.pool);

        for provider in config.effective_providers() {
            registry.register(provider)?;
        }

        Ok(registry)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Create and retain a poller for `config` without starting it
    ///
    /// # Returns
    ///
    /// A handle for observing and stopping the poller. Fails when the name is
    /// already registered or the registry has been started.
    pub fn register(&mut self, config: ProviderConfig) -> Result<PollerHandle, RegistryError> {
        if self.started {
            return Err(RegistryError::AlreadyStarted);
        }
        if self.get_monitor(&config.name).is_some() {
            return Err(RegistryError::DuplicateProvider(config.name));
        }

        debug!(
            "Registering {} ({}, every {:.1}s)",
            config.name,
            config.base_url,
            config.poll_interval().as_secs_f64()
        );
        let poller = StatusPoller::new(config, self.bus.clone(), self.request_timeout);
        let handle = poller.handle();
        self.monitors.push(Monitor {
            handle: handle.clone(),
            poller: Some(poller),
            task: None,
        });

        Ok(handle)
    }

    /// Create the shared HTTP pool and launch every registered poller
    ///
    /// Fails with [`RegistryError::AlreadyStarted`] on any call after the first.
    pub fn start_all(&mut self) -> Result<(), RegistryError> {
        if self.started {
            return Err(RegistryError::AlreadyStarted);
        }

        let client = Client::builder()
            .timeout(self.request_timeout)
            .pool_max_idle_per_host(self.pool.max_idle_connections)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let permits = Arc::new(Semaphore::new(self.pool.max_connections));

        self.client = Some(client.clone());
        self.permits = Some(Arc::clone(&permits));

        info!(
            "Connection pool ready (max {} in flight, {} idle per host)",
            self.pool.max_connections, self.pool.max_idle_connections
        );

        self.start_all_with(|provider| {
            Arc::new(HttpFeed::new(client.clone(), Arc::clone(&permits), provider))
        })
    }

    /// Launch every registered poller against feeds built by `make_feed`
    pub fn start_all_with<F>(&mut self, mut make_feed: F) -> Result<(), RegistryError>
    where
        F: FnMut(&ProviderConfig) -> Arc<dyn StatusFeed>,
    {
        if self.started {
            return Err(RegistryError::AlreadyStarted);
        }
        self.started = true;

        for monitor in &mut self.monitors {
            if let Some(poller) = monitor.poller.take() {
                let feed = make_feed(poller.config());
                monitor.task = Some(tokio::spawn(poller.run(feed)));
            }
        }

        info!("Started {} monitors", self.monitors.len());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Stop every poller and release the shared connection pool
    ///
    /// Each poller is asked to stop, then given until the grace deadline to
    /// finish its current tick. Tasks still running at the deadline are
    /// cancelled and awaited.
    pub async fn stop_all(&mut self) {
        for monitor in &self.monitors {
            monitor.handle.stop();
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(self.stop_grace)
            .unwrap_or_else(|| now + FAR_FUTURE);
        for monitor in &mut self.monitors {
            let Some(mut task) = monitor.task.take() else {
                continue;
            };
            let provider = monitor.handle.provider();

            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => debug!("[{}] Poller task finished", provider),
                Ok(Err(e)) => error!("[{}] Poller task failed: {}", provider, e),
                Err(_) => {
                    warn!(
                        "[{}] Poller still busy after {:?}, cancelling",
                        provider, self.stop_grace
                    );
                    task.abort();
                    if let Err(e) = task.await {
                        if !e.is_cancelled() {
                            error!("[{}] Poller task failed: {}", provider, e);
                        }
                    }
                }
            }
        }

        if let Some(permits) = self.permits.take() {
            permits.close();
        }
        self.client = None;

        info!("Stopped {} monitors", self.monitors.len());
    }

    /// Latest summary of every poller that has completed a successful fetch
    pub fn get_summaries(&self) -> Vec<StatusSummary> {
        self.monitors
            .iter()
            .filter_map(|monitor| monitor.handle.summary())
            .collect()
    }

    /// Unresolved incidents across all cached summaries, tagged with their provider
    pub fn active_incidents(&self) -> Vec<(String, Incident)> {
        self.get_summaries()
            .into_iter()
            .flat_map(|summary| {
                let provider = summary.provider;
                summary
                    .active_incidents
                    .into_iter()
                    .map(move |incident| (provider.clone(), incident))
            })
            .collect()
    }

    pub fn get_monitor(&self, name: &str) -> Option<PollerHandle> {
        self.monitors
            .iter()
            .find(|monitor| monitor.handle.provider() == name)
            .map(|monitor| monitor.handle.clone())
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Provider names in registration order
    pub fn provider_names(&self) -> Vec<String> {
        self.monitors
            .iter()
            .map(|monitor| monitor.handle.provider().to_string())
            .collect()
    }
}

impl Drop for MonitorRegistry {
    fn drop(&mut self) {
        for monitor in &mut self.monitors {
            if let Some(task) = monitor.task.take() {
                task.abort();
            }
        }
    }
}
