//! Operations context for dependency injection

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vessel_car::{CarLookup, CarReader, CarUnpacker, DirCarReader, HttpCarReader};
use vessel_config::Config;
use vessel_errors::{Error, OpsError};
use vessel_events::{EventEmitter, EventSender};
use vessel_install::{InstallExecutor, Planner, ScriptBuilder};
use vessel_net::{NetClient, NetConfig};
use vessel_platform::Platform;
use vessel_recipe::{ScriptLoader, ScriptLookup};
use vessel_resources::{ResourceLimits, ResourceManager};
use vessel_signing::Keypair;
use vessel_store::{GarbageCollector, Profile, Store};

/// Operations context providing access to all system components
pub struct OpsCtx {
    /// Loaded configuration, with environment and CLI overrides applied
    pub config: Config,
    pub store: Store,
    pub net: NetClient,
    /// Recipe loader over the configured back-ends
    pub loader: ScriptLoader,
    /// Car lookup with configured overrides
    pub cars: CarLookup,
    pub resources: ResourceManager,
    pub platform: Arc<Platform>,
    /// Event sender for progress reporting
    pub tx: EventSender,
    /// Fired on user interrupt; checked by every installer
    pub cancel: CancellationToken,
}

impl EventEmitter for OpsCtx {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }
}

impl OpsCtx {
    /// Handle on the profile `name`
    #[must_use]
    pub fn profile(&self, name: &str) -> Profile {
        Profile::new(
            self.store.clone(),
            &self.config.profiles_path(),
            self.config.roots_path(),
            name,
        )
        .with_events(self.tx.clone())
    }

    #[must_use]
    pub fn planner(&self) -> Planner {
        Planner::new(self.store.clone())
            .with_cars(self.cars.clone())
            .with_events(self.tx.clone())
    }

    #[must_use]
    pub fn unpacker(&self) -> CarUnpacker {
        CarUnpacker::new(self.store.clone(), self.config.security.trusted_signers.clone())
            .with_events(self.tx.clone())
    }

    #[must_use]
    pub fn executor(&self) -> InstallExecutor {
        let builder = ScriptBuilder::new(
            self.store.clone(),
            self.config.build_path(),
            self.config.cache_path(),
            self.net.clone(),
            Arc::clone(&self.platform),
            self.tx.clone(),
        );
        let executor = InstallExecutor::new(
            builder,
            self.unpacker(),
            self.resources.clone(),
            self.tx.clone(),
        );
        match self.config.general.plan_deadline {
            0 => executor,
            secs => executor.with_deadline(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub fn collector(&self) -> GarbageCollector {
        GarbageCollector::new(self.store.clone(), self.config.roots_path()).with_events(self.tx.clone())
    }

    /// The configured car signing key
    ///
    /// # Errors
    ///
    /// Returns a signing error if the key file is missing or malformed.
    pub fn signing_key(&self) -> Result<Keypair, Error> {
        Keypair::load(&self.config.signing_key_path()?)
    }
}

/// Builder for [`OpsCtx`]
#[derive(Default)]
pub struct OpsContextBuilder {
    config: Option<Config>,
    net: Option<NetClient>,
    tx: Option<EventSender>,
    cancel: Option<CancellationToken>,
    platform: Option<Arc<Platform>>,
}

impl OpsContextBuilder {
    /// Create new context builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set network client; built from the config's `[network]` section otherwise
    #[must_use]
    pub fn with_net(mut self, net: NetClient) -> Self {
        self.net = Some(net);
        self
    }

    /// Set event sender
    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Arc<Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if the config or event sender is missing, or the
    /// network client cannot be created.
    pub fn build(self) -> Result<OpsCtx, Error> {
        let config = self.config.ok_or_else(|| OpsError::MissingComponent {
            component: "config".to_string(),
        })?;
        let tx = self.tx.ok_or_else(|| OpsError::MissingComponent {
            component: "event sender".to_string(),
        })?;

        let net = match self.net {
            Some(net) => net,
            None => NetClient::new(NetConfig::from(&config.network))?.with_events(tx.clone()),
        };

        let lookup = ScriptLookup::new(config.lookup_paths(), net.clone(), tx.clone());
        let loader = ScriptLoader::new(lookup, tx.clone());

        let mut cars = CarLookup::new(net.clone(), tx.clone());
        for (key, location) in &config.car_overrides {
            cars = cars.with_override(key.clone(), override_reader(location, &net, &tx));
        }

        let resources =
            ResourceManager::new(ResourceLimits::from_parallelism(config.general.parallelism));
        tracing::debug!(
            store = %config.store_path().display(),
            backends = ?config.lookup_paths(),
            builds = resources.limits().concurrent_builds,
            "operations context ready"
        );

        Ok(OpsCtx {
            store: Store::new(config.store_path()),
            platform: self.platform.unwrap_or_else(|| Arc::new(Platform::current())),
            cancel: self.cancel.unwrap_or_default(),
            config,
            net,
            loader,
            cars,
            resources,
            tx,
        })
    }
}

/// Reader for a configured override: a directory or URL base holding
/// `<id>.car` files, or the path of one such file
fn override_reader(location: &str, net: &NetClient, tx: &EventSender) -> Arc<dyn CarReader> {
    let base = if std::path::Path::new(location)
        .extension()
        .is_some_and(|ext| ext == "car")
    {
        location.rsplit_once('/').map_or(".", |(dir, _)| dir)
    } else {
        location
    };
    if base.starts_with("http://") || base.starts_with("https://") {
        Arc::new(HttpCarReader::new(base, net.clone(), tx.clone()))
    } else {
        Arc::new(DirCarReader::new(base))
    }
}
