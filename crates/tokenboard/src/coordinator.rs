//! Refresh coordinator: keeps the token registry in sync with the chain.
//!
//! At most one refresh cycle runs at a time. A trigger arriving while a cycle
//! is in flight is dropped, not queued; the next external trigger (usually
//! the next block) picks up whatever it missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, TokenInfo};
use crate::error::{ChainError, Error};
use crate::registry::SharedRegistry;
use crate::token::{scale_amount, Address, PreferenceSource, TokenRecord};

/// Why a refresh was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshTrigger {
    pub network_changed: bool,
    pub block_changed: bool,
    pub coinbase_changed: bool,
    /// Current route parameter of the view, compared against the previous cycle.
    pub route_param: Option<String>,
}

/// Result of one `exec_refresh` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another cycle was executing; the trigger was dropped.
    Skipped,
    /// Nothing changed since the previous cycle; no chain I/O was done.
    Unchanged,
    Refreshed {
        /// New factory tokens added to the registry.
        discovered: usize,
        /// Custom addresses resolved for the first time.
        resolved: usize,
        /// Records whose stats were refreshed.
        updated: usize,
    },
}

/// Addresses passed to the info calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    pub viewer: Address,
    pub factory: Address,
}

/// Scoped ownership of the executing flag. Dropping the guard always clears
/// the flag, so failed or cancelled cycles never lock out later triggers.
struct ExecutionGuard<'a> {
    executing: &'a AtomicBool,
    released: bool,
}

impl<'a> ExecutionGuard<'a> {
    fn acquire(executing: &'a AtomicBool) -> Option<Self> {
        executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                executing,
                released: false,
            })
    }

    /// Clear the flag, checking that nothing else cleared it first.
    fn release(mut self) -> Result<(), Error> {
        self.released = true;
        if self.executing.swap(false, Ordering::AcqRel) {
            Ok(())
        } else {
            Err(Error::GuardViolation(
                "executing flag cleared while a cycle held it".to_string(),
            ))
        }
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.executing.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    executing: AtomicBool,
    last_params: Mutex<Option<String>>,
}

/// Drives event-triggered synchronization of the registry with the chain.
pub struct RefreshCoordinator {
    chain: Arc<dyn ChainClient>,
    registry: SharedRegistry,
    context: Mutex<ChainContext>,
    state: RefreshState,
}

impl RefreshCoordinator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: SharedRegistry,
        context: ChainContext,
    ) -> Self {
        Self {
            chain,
            registry,
            context: Mutex::new(context),
            state: RefreshState::default(),
        }
    }

    /// Whether a cycle currently holds the execution guard.
    pub fn is_executing(&self) -> bool {
        self.state.executing.load(Ordering::Acquire)
    }

    /// Route parameter seen by the last cycle that passed the guard.
    pub fn last_params(&self) -> Option<String> {
        self.state
            .last_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Viewer and factory addresses the next cycle will query with.
    pub fn context(&self) -> ChainContext {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the active account. Takes effect from the next cycle.
    pub fn set_viewer(&self, viewer: Address) {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .viewer = viewer;
    }

    /// Run one refresh cycle unless one is already in flight.
    ///
    /// On failure the registry keeps everything merged before the failing
    /// call, and the guard is released so the next trigger can retry.
    pub async fn exec_refresh(&self, trigger: &RefreshTrigger) -> Result<RefreshOutcome, Error> {
        let Some(guard) = ExecutionGuard::acquire(&self.state.executing) else {
            debug!(?trigger, "Refresh already executing, dropping trigger");
            return Ok(RefreshOutcome::Skipped);
        };
        debug!(?trigger, "Refresh started");

        match self.run_cycle(trigger).await {
            Ok(outcome) => {
                if let Err(e) = guard.release() {
                    error!(error = %e, "Refresh guard released twice");
                    return Err(e);
                }
                debug!(?outcome, "Refresh finished");
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Refresh cycle failed");
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, trigger: &RefreshTrigger) -> Result<RefreshOutcome, Error> {
        let params_changed = {
            let mut last = self
                .state
                .last_params
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last != trigger.route_param {
                debug!(from = ?*last, to = ?trigger.route_param, "Route params changed");
                *last = trigger.route_param.clone();
                true
            } else {
                false
            }
        };

        if !(trigger.network_changed
            || trigger.block_changed
            || trigger.coinbase_changed
            || params_changed)
        {
            return Ok(RefreshOutcome::Unchanged);
        }

        let context = self.context();
        let discovered = self.discover(&context).await?;
        let resolved = self.resolve_custom(&context).await;
        let updated = self.refresh_stats(&context).await?;

        info!(discovered, resolved, updated, "Token registry refreshed");
        Ok(RefreshOutcome::Refreshed {
            discovered,
            resolved,
            updated,
        })
    }

    /// Add factory tokens the registry does not know yet. Always rescans from
    /// index 0; positions already present are skipped without chain calls.
    async fn discover(&self, context: &ChainContext) -> Result<usize, Error> {
        let count = self.chain.count_known_test_tokens().await?;
        let mut discovered = 0;

        for index in 0..count {
            let known = self.registry.read().contains_index(index);
            if known {
                continue;
            }

            let address = self.chain.token_at_index(index).await?;
            let present = self.registry.read().contains(&address);
            if present {
                continue;
            }

            let info = self
                .chain
                .get_token_info(&address, &context.viewer, &context.factory)
                .await?;

            debug!(index, %address, symbol = %info.symbol, "Discovered token");
            self.registry.update(|registry| {
                let favourite = registry
                    .preference(&address)
                    .map(|p| p.favourite)
                    .unwrap_or(false);
                registry.upsert_token(&address, build_record(Some(index), &address, info, favourite));
            });
            discovered += 1;
        }

        Ok(discovered)
    }

    /// Resolve custom addresses the user added but the registry lacks. A bad
    /// address only skips itself; it must not block the rest of the cycle.
    async fn resolve_custom(&self, context: &ChainContext) -> usize {
        let pending: Vec<(Address, bool)> = {
            let registry = self.registry.read();
            registry
                .preferences()
                .filter(|p| p.source == PreferenceSource::Custom)
                .filter(|p| !registry.contains(&p.token_address))
                .map(|p| (p.token_address.clone(), p.favourite))
                .collect()
        };

        let mut resolved = 0;
        for (address, favourite) in pending {
            let info = match self
                .chain
                .get_token_info(&address, &context.viewer, &context.factory)
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    warn!(%address, error = %e, "Could not resolve custom token");
                    continue;
                }
            };

            let inserted = self.registry.update(|registry| {
                if registry.contains(&address) {
                    return false;
                }
                registry.upsert_token(&address, build_record(None, &address, info, favourite));
                true
            });
            if inserted {
                resolved += 1;
            }
        }
        resolved
    }

    /// Refresh supply, balance and allowance of every registry token in one
    /// batched call.
    async fn refresh_stats(&self, context: &ChainContext) -> Result<usize, Error> {
        let addresses = self.registry.read().addresses();
        if addresses.is_empty() {
            return Ok(0);
        }

        let stats = self
            .chain
            .get_tokens_info(&addresses, &context.viewer, &context.factory)
            .await?;

        let expected = addresses.len();
        for (field, len) in [
            ("totalSupply", stats.total_supply.len()),
            ("balance", stats.balance.len()),
            ("allowance", stats.allowance.len()),
        ] {
            if len != expected {
                return Err(ChainError::Malformed(format!(
                    "{field} has {len} entries for {expected} tokens"
                ))
                .into());
            }
        }

        self.registry.update(|registry| -> Result<usize, Error> {
            for (i, address) in addresses.iter().enumerate() {
                registry.upsert_stats(
                    address,
                    &stats.total_supply[i],
                    &stats.balance[i],
                    &stats.allowance[i],
                )?;
            }
            Ok(expected)
        })
    }
}

fn build_record(index: Option<u64>, address: &Address, info: TokenInfo, favourite: bool) -> TokenRecord {
    TokenRecord {
        index,
        token_address: address.clone(),
        total_supply: scale_amount(&info.total_supply, info.decimals),
        balance: scale_amount(&info.balance, info.decimals),
        allowance: scale_amount(&info.allowance, info.decimals),
        symbol: info.symbol,
        name: info.name,
        decimals: info.decimals,
        favourite,
    }
}
