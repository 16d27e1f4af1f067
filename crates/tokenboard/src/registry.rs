use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use num_bigint::BigUint;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, StoreError};
use crate::store::PreferenceStore;
use crate::token::{scale_amount, Address, PreferenceSource, TokenAddressPreference, TokenRecord};

/// Default store key for the persisted preference map.
pub const DEFAULT_PREFERENCE_KEY: &str = "tokenAddressData";

/// Symbols shown in the token list: ASCII word characters only.
static DISPLAY_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?-u:\w)+$").expect("display symbol pattern is valid"));

/// Change notification delivered to registry listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    TokenUpserted(Address),
    StatsUpdated(Address),
    PreferenceChanged(Address),
}

/// Handle returned by [`TokenRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Authoritative address → token state, plus the user's remembered addresses.
///
/// Every successful write queues a [`RegistryEvent`]; [`SharedRegistry`]
/// delivers them once the write lock is released. Preference writes are
/// persisted to the store before they take effect, so a failed write leaves
/// the registry unchanged.
pub struct TokenRegistry {
    tokens: BTreeMap<Address, TokenRecord>,
    indices: BTreeSet<u64>,
    preferences: BTreeMap<Address, TokenAddressPreference>,
    store: Arc<dyn PreferenceStore>,
    preference_key: String,
    events: Vec<RegistryEvent>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("tokens", &self.tokens)
            .field("preferences", &self.preferences)
            .field("preference_key", &self.preference_key)
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl TokenRegistry {
    /// Create an empty registry backed by `store`.
    pub fn new(store: Arc<dyn PreferenceStore>, preference_key: impl Into<String>) -> Self {
        Self {
            tokens: BTreeMap::new(),
            indices: BTreeSet::new(),
            preferences: BTreeMap::new(),
            store,
            preference_key: preference_key.into(),
            events: Vec::new(),
        }
    }

    /// Create a registry and replay the preferences persisted under
    /// `preference_key`.
    pub fn load(
        store: Arc<dyn PreferenceStore>,
        preference_key: impl Into<String>,
    ) -> Result<Self, Error> {
        let mut registry = Self::new(store, preference_key);

        let Some(blob) = registry.store.get(&registry.preference_key)? else {
            return Ok(registry);
        };

        let saved: BTreeMap<String, TokenAddressPreference> = serde_json::from_str(&blob)
            .map_err(|e| StoreError::Parse(format!("{}: {e}", registry.preference_key)))?;

        for preference in saved.into_values() {
            info!(address = %preference.token_address, "Restoring token address preference");
            registry.restore_address(preference)?;
        }
        // Replayed state is the starting point, not a change.
        registry.events.clear();

        Ok(registry)
    }

    /// Drain the events queued by writes since the last call.
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Insert or replace the record for `address`.
    pub fn upsert_token(&mut self, address: &Address, mut record: TokenRecord) {
        record.token_address = address.clone();
        let index = record.index;
        if let Some(previous) = self.tokens.insert(address.clone(), record) {
            if let Some(old) = previous.index {
                self.indices.remove(&old);
            }
        }
        if let Some(index) = index {
            self.indices.insert(index);
        }
        self.events.push(RegistryEvent::TokenUpserted(address.clone()));
    }

    /// Rescale raw on-chain stats by the record's decimals and store them.
    pub fn upsert_stats(
        &mut self,
        address: &Address,
        total_supply: &BigUint,
        balance: &BigUint,
        allowance: &BigUint,
    ) -> Result<(), Error> {
        let record = self
            .tokens
            .get_mut(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))?;

        record.total_supply = scale_amount(total_supply, record.decimals);
        record.balance = scale_amount(balance, record.decimals);
        record.allowance = scale_amount(allowance, record.decimals);

        self.events.push(RegistryEvent::StatsUpdated(address.clone()));
        Ok(())
    }

    /// Remember a user-entered address as a custom favourite.
    pub fn add_address(&mut self, address: &str) -> Result<Address, Error> {
        let address = Address::new(address)?;
        info!(%address, "Adding custom token address");
        self.write_preference(TokenAddressPreference {
            token_address: address.clone(),
            source: PreferenceSource::Custom,
            favourite: true,
        })?;
        self.events.push(RegistryEvent::PreferenceChanged(address.clone()));
        Ok(address)
    }

    /// Insert a preference verbatim, e.g. when replaying persisted state.
    pub fn restore_address(&mut self, preference: TokenAddressPreference) -> Result<(), Error> {
        let address = preference.token_address.clone();
        self.write_preference(preference)?;
        self.events.push(RegistryEvent::PreferenceChanged(address));
        Ok(())
    }

    /// Set the favourite flag, keeping the preference's existing source.
    pub fn set_favourite(&mut self, address: &Address, favourite: bool) -> Result<(), Error> {
        let source = self
            .preferences
            .get(address)
            .map(|p| p.source)
            .unwrap_or_default();

        info!(%address, favourite, "Setting token favourite");
        self.write_preference(TokenAddressPreference {
            token_address: address.clone(),
            source,
            favourite,
        })?;

        let record_changed = match self.tokens.get_mut(address) {
            Some(record) if record.favourite != favourite => {
                record.favourite = favourite;
                true
            }
            _ => false,
        };

        self.events.push(RegistryEvent::PreferenceChanged(address.clone()));
        if record_changed {
            self.events.push(RegistryEvent::TokenUpserted(address.clone()));
        }
        Ok(())
    }

    /// Persist the map with `preference` applied, then commit it in memory.
    fn write_preference(&mut self, preference: TokenAddressPreference) -> Result<(), Error> {
        let mut next = self.preferences.clone();
        next.insert(preference.token_address.clone(), preference);

        let blob = serde_json::to_string(&next).map_err(|e| StoreError::Parse(e.to_string()))?;
        self.store.set(&self.preference_key, &blob)?;
        debug!(key = %self.preference_key, entries = next.len(), "Persisted token preferences");

        self.preferences = next;
        Ok(())
    }

    /// Record for `address`, if the registry has one.
    pub fn get(&self, address: &Address) -> Option<&TokenRecord> {
        self.tokens.get(address)
    }

    /// Whether the registry has a record for `address`.
    pub fn contains(&self, address: &Address) -> bool {
        self.tokens.contains_key(address)
    }

    /// Whether a record discovered at factory position `index` exists.
    pub fn contains_index(&self, index: u64) -> bool {
        self.indices.contains(&index)
    }

    /// Remembered preference for `address`.
    pub fn preference(&self, address: &Address) -> Option<&TokenAddressPreference> {
        self.preferences.get(address)
    }

    /// All remembered preferences, in address order.
    pub fn preferences(&self) -> impl Iterator<Item = &TokenAddressPreference> {
        self.preferences.values()
    }

    /// All registry addresses, in key order.
    pub fn addresses(&self) -> Vec<Address> {
        self.tokens.keys().cloned().collect()
    }

    /// Number of records, including ones hidden from the sorted view.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Records with a displayable symbol, sorted by symbol.
    pub fn tokens_sorted(&self) -> Vec<TokenRecord> {
        let mut results: Vec<TokenRecord> = self
            .tokens
            .values()
            .filter(|t| DISPLAY_SYMBOL.is_match(&t.symbol))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            compare_symbols(&a.symbol, &b.symbol)
                .then_with(|| a.token_address.cmp(&b.token_address))
        });
        results
    }
}

/// Collation order for display symbols: case-insensitive first, with
/// underscore before digits before letters. Symbols equal up to case put
/// lowercase first.
fn compare_symbols(a: &str, b: &str) -> Ordering {
    fn class(c: char) -> u8 {
        match c {
            '_' => 0,
            '0'..='9' => 1,
            c if c.is_ascii_alphabetic() => 2,
            _ => 3,
        }
    }
    let primary = |s: &str| {
        s.chars()
            .map(|c| (class(c), c.to_ascii_lowercase()))
            .collect::<Vec<_>>()
    };
    primary(a).cmp(&primary(b)).then_with(|| b.cmp(a))
}

#[derive(Default)]
struct Listeners {
    entries: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

/// Registry handle shared by the refresh coordinator and the view layer.
///
/// Writes go through [`SharedRegistry::update`], which delivers the queued
/// events after the write lock is released. Listeners may therefore read the
/// registry, or write to it, from inside a notification.
#[derive(Clone)]
pub struct SharedRegistry {
    registry: Arc<RwLock<TokenRegistry>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SharedRegistry {
    pub fn new(registry: TokenRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// Shared read access. Do not hold the guard across an await.
    pub fn read(&self) -> RwLockReadGuard<'_, TokenRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the write lock, then notify listeners of every event it
    /// queued.
    pub fn update<T>(&self, f: impl FnOnce(&mut TokenRegistry) -> T) -> T {
        let (result, events) = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut registry);
            (result, registry.take_events())
        };
        self.notify(&events);
        result
    }

    /// Register a listener invoked after every successful write.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.entries.len();
        listeners.entries.retain(|(existing, _)| *existing != id);
        listeners.entries.len() != before
    }

    fn notify(&self, events: &[RegistryEvent]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for event in events {
            for listener in &snapshot {
                listener(event);
            }
        }
    }
}
