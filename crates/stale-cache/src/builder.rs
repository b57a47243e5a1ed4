use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::{CacheConfig, Config, GlobalSwitch};
use crate::error::{ErrorHandler, Fault, log_fault};
use crate::facade::SelfLoadingCache;
use crate::store::{CacheKey, CacheStore};

/// The immutable settings of a [`SelfLoadingCache`].
///
/// These are fixed once the cache is built and apply to every key alike.
#[derive(Clone)]
pub struct FacadeConfig {
    name: Arc<str>,
    ttl: Duration,
    disabled: bool,
    global_switch: GlobalSwitch,
    on_fault: ErrorHandler,
    runtime: Option<Handle>,
    max_lazy_refreshes: isize,
}

impl FacadeConfig {
    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long loaded values are considered fresh.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the cache is turned off, either for this instance or process-wide.
    pub fn is_disabled(&self) -> bool {
        self.disabled || self.global_switch.is_disabled()
    }

    pub fn max_lazy_refreshes(&self) -> isize {
        self.max_lazy_refreshes
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn error_handler(&self) -> ErrorHandler {
        Arc::clone(&self.on_fault)
    }

    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.runtime.clone()
    }
}

impl fmt::Debug for FacadeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacadeConfig")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("disabled", &self.disabled)
            .field("global_switch", &self.global_switch)
            .field("custom_runtime", &self.runtime.is_some())
            .field("max_lazy_refreshes", &self.max_lazy_refreshes)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`SelfLoadingCache`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use stale_cache::{Config, MemoryStore, SelfLoadingCache};
/// # fn build() -> anyhow::Result<()> {
/// let config = Config::get(None)?;
/// let store = Arc::new(MemoryStore::<String, String>::from_config(&config.cache));
/// let cache = SelfLoadingCache::builder(store)
///     .name("users")
///     .with_config(&config)
///     .ttl(Duration::from_secs(60))
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct CacheBuilder<K, V> {
    store: Arc<dyn CacheStore<K, V>>,
    config: FacadeConfig,
}

impl<K, V> CacheBuilder<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore<K, V>>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            store,
            config: FacadeConfig {
                name: "default".into(),
                ttl: defaults.ttl,
                disabled: false,
                global_switch: GlobalSwitch::enabled(),
                on_fault: Arc::new(log_fault),
                runtime: None,
                max_lazy_refreshes: defaults.max_lazy_refreshes,
            },
        }
    }

    /// Sets the name used in logs and metrics.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Applies the cache defaults and the global switch of a [`Config`].
    pub fn with_config(self, config: &Config) -> Self {
        self.ttl(config.cache.ttl)
            .max_lazy_refreshes(config.cache.max_lazy_refreshes)
            .global_switch(config.caches_disabled)
    }

    /// How long loaded values are considered fresh.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Turns this one cache into a pass-through which always calls the loader.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.config.disabled = disabled;
        self
    }

    /// Sets the process-wide switch, see [`GlobalSwitch`].
    pub fn global_switch(mut self, switch: GlobalSwitch) -> Self {
        self.config.global_switch = switch;
        self
    }

    /// Replaces the default handler, which logs every absorbed [`Fault`].
    pub fn error_handler(mut self, handler: impl Fn(&Fault<'_>) + Send + Sync + 'static) -> Self {
        self.config.on_fault = Arc::new(handler);
        self
    }

    /// The runtime to spawn background refreshes on.
    ///
    /// Defaults to the runtime of the task which triggers the refresh.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.config.runtime = Some(runtime);
        self
    }

    /// Bounds the number of background refreshes running at the same time.
    pub fn max_lazy_refreshes(mut self, max: isize) -> Self {
        self.config.max_lazy_refreshes = max;
        self
    }

    pub fn build(mut self) -> SelfLoadingCache<K, V> {
        // The minimum value here is clamped to 1, as it would otherwise completely disable lazy
        // refreshes, and expired entries would be served forever.
        self.config.max_lazy_refreshes = self.config.max_lazy_refreshes.max(1);
        SelfLoadingCache::new(self.store, self.config)
    }
}
