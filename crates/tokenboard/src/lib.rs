#[cfg(feature = "rpc")]
pub mod abi;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
#[cfg(feature = "rpc")]
pub mod rpc;
pub mod store;
pub mod token;

use std::sync::Arc;

use error::Error;

// Re-exports for convenience
pub use chain::{ChainClient, StaticChainClient, TokenInfo, TokensInfo};
pub use config::DashboardConfig;
pub use coordinator::{ChainContext, RefreshCoordinator, RefreshOutcome, RefreshTrigger};
pub use registry::{RegistryEvent, SharedRegistry, SubscriptionId, TokenRegistry};
pub use store::{FileStore, MemoryStore, PreferenceStore};
pub use token::{Address, PreferenceSource, TokenAddressPreference, TokenRecord};

/// Context object shared by the trigger source and the view layer.
///
/// Owns the token registry and the refresh coordinator. Views read through
/// [`Dashboard::tokens`] and send commands through [`Dashboard::add_address`]
/// and [`Dashboard::set_favourite`]; the connection observer calls
/// [`Dashboard::refresh`] when the network, block, account or route changes.
/// Listeners registered with [`Dashboard::subscribe`] run after the registry
/// lock is released and may call back into the dashboard.
pub struct Dashboard {
    registry: SharedRegistry,
    coordinator: RefreshCoordinator,
}

impl Dashboard {
    /// Build the context, replaying persisted preferences from `store`.
    pub fn open(
        config: &DashboardConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PreferenceStore>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let registry = SharedRegistry::new(TokenRegistry::load(
            store,
            config.preference_key.clone(),
        )?);
        let coordinator = RefreshCoordinator::new(
            chain,
            registry.clone(),
            ChainContext {
                viewer: config.viewer_address.clone(),
                factory: config.factory_address.clone(),
            },
        );
        Ok(Self {
            registry,
            coordinator,
        })
    }

    /// Build the context against a JSON-RPC node configured in `config`.
    #[cfg(feature = "rpc")]
    pub fn connect(config: &DashboardConfig, store: Arc<dyn PreferenceStore>) -> Result<Self, Error> {
        let chain = Arc::new(rpc::RpcChainClient::from_config(config)?);
        Self::open(config, chain, store)
    }

    /// Run one refresh cycle for `trigger`.
    pub async fn refresh(&self, trigger: &RefreshTrigger) -> Result<RefreshOutcome, Error> {
        self.coordinator.exec_refresh(trigger).await
    }

    /// Displayable tokens, sorted by symbol.
    pub fn tokens(&self) -> Vec<TokenRecord> {
        self.registry.read().tokens_sorted()
    }

    /// Record for `address`, including tokens hidden from [`Dashboard::tokens`].
    pub fn token(&self, address: &Address) -> Option<TokenRecord> {
        self.registry.read().get(address).cloned()
    }

    /// Remember a user-entered token address; it is resolved on the next refresh.
    pub fn add_address(&self, address: &str) -> Result<Address, Error> {
        self.registry.update(|registry| registry.add_address(address))
    }

    pub fn set_favourite(&self, address: &str, favourite: bool) -> Result<(), Error> {
        let address = Address::new(address)?;
        self.registry
            .update(|registry| registry.set_favourite(&address, favourite))
    }

    /// Register a listener for registry changes.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.registry.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Switch the active account; pair with a `coinbase_changed` trigger.
    pub fn set_viewer(&self, viewer: Address) {
        self.coordinator.set_viewer(viewer);
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FOO: &str = "0x00000000000000000000000000000000000000a1";
    const ODD: &str = "0x00000000000000000000000000000000000000a2";
    const CUSTOM: &str = "0x00000000000000000000000000000000000000c1";

    fn config_json() -> &'static str {
        r#"{
            "viewerAddress": "0x0000000000000000000000000000000000000001",
            "factoryAddress": "0x0000000000000000000000000000000000000002"
        }"#
    }

    fn token_info(symbol: &str, balance: u64) -> TokenInfo {
        TokenInfo {
            decimals: 3,
            total_supply: BigUint::from(1_000_000u64),
            balance: BigUint::from(balance),
            allowance: BigUint::from(250u64),
            symbol: symbol.to_string(),
            name: format!("{symbol} Token"),
        }
    }

    fn chain() -> Arc<StaticChainClient> {
        let chain = StaticChainClient::new();
        chain.push_factory_token(Address::new(FOO).unwrap(), token_info("FOO", 1500));
        chain.push_factory_token(Address::new(ODD).unwrap(), token_info("123$", 1));
        chain.insert_token(Address::new(CUSTOM).unwrap(), token_info("CUST", 42));
        Arc::new(chain)
    }

    fn network_changed() -> RefreshTrigger {
        RefreshTrigger {
            network_changed: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_refresh_pipeline() {
        let config = DashboardConfig::from_json(config_json()).unwrap();
        let dashboard = Dashboard::open(&config, chain(), Arc::new(MemoryStore::new())).unwrap();

        dashboard.refresh(&network_changed()).await.unwrap();

        let tokens = dashboard.tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "FOO");
        assert_eq!(tokens[0].total_supply, "1000");
        assert_eq!(tokens[0].balance, "1.5");
        assert_eq!(tokens[0].allowance, "0.25");

        // Filtered from the view but still tracked.
        assert!(dashboard.token(&Address::new(ODD).unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_preferences_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig::from_json(config_json()).unwrap();

        {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let dashboard = Dashboard::open(&config, chain(), store).unwrap();
            dashboard.add_address(CUSTOM).unwrap();
            dashboard.set_favourite(FOO, true).unwrap();
            dashboard.set_favourite(CUSTOM, false).unwrap();
        }

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let dashboard = Dashboard::open(&config, chain(), store).unwrap();
        dashboard.refresh(&network_changed()).await.unwrap();

        let symbols: Vec<_> = dashboard
            .tokens()
            .into_iter()
            .map(|t| (t.symbol, t.favourite))
            .collect();
        assert_eq!(
            symbols,
            vec![("CUST".to_string(), false), ("FOO".to_string(), true)]
        );

        let registry = dashboard.registry().read();
        let custom = registry
            .preference(&Address::new(CUSTOM).unwrap())
            .unwrap();
        assert_eq!(custom.source, PreferenceSource::Custom);
    }

    #[tokio::test]
    async fn test_listeners_see_refresh_writes() {
        let config = DashboardConfig::from_json(config_json()).unwrap();
        let dashboard = Dashboard::open(&config, chain(), Arc::new(MemoryStore::new())).unwrap();

        let stats_updates = Arc::new(AtomicUsize::new(0));
        let counter = stats_updates.clone();
        dashboard.subscribe(move |event| {
            if matches!(event, RegistryEvent::StatsUpdated(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        dashboard.refresh(&network_changed()).await.unwrap();
        assert_eq!(stats_updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_listener_reads_dashboard_during_refresh() {
        let config = DashboardConfig::from_json(config_json()).unwrap();
        let dashboard = Arc::new(
            Dashboard::open(&config, chain(), Arc::new(MemoryStore::new())).unwrap(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let view = Arc::downgrade(&dashboard);
        dashboard.subscribe(move |event| {
            if let Some(dashboard) = view.upgrade() {
                sink.lock().unwrap().push((event.clone(), dashboard.tokens().len()));
            }
        });

        dashboard.refresh(&network_changed()).await.unwrap();
        dashboard.set_favourite(FOO, true).unwrap();

        let seen = seen.lock().unwrap();
        let foo = Address::new(FOO).unwrap();
        // Events are delivered after the registry is unlocked, so every
        // listener call sees the completed write.
        assert_eq!(seen[0], (RegistryEvent::TokenUpserted(foo.clone()), 1));
        assert!(seen.contains(&(RegistryEvent::StatsUpdated(foo.clone()), 1)));
        assert_eq!(seen.last(), Some(&(RegistryEvent::TokenUpserted(foo), 1)));
        assert!(dashboard.tokens()[0].favourite);
    }

    #[tokio::test]
    async fn test_viewer_switch() {
        let config = DashboardConfig::from_json(config_json()).unwrap();
        let dashboard = Dashboard::open(&config, chain(), Arc::new(MemoryStore::new())).unwrap();
        let viewer = Address::new("0x0000000000000000000000000000000000000009").unwrap();

        dashboard.set_viewer(viewer.clone());
        let outcome = dashboard
            .refresh(&RefreshTrigger {
                coinbase_changed: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));
        assert_eq!(dashboard.coordinator().context().viewer, viewer);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = DashboardConfig::from_json(config_json()).unwrap();
        config.preference_key = String::new();
        let result = Dashboard::open(&config, chain(), Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
