use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::error::ChainError;
use crate::token::Address;

/// Metadata and viewer stats for one token, as returned by the helper contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub decimals: u8,
    pub total_supply: BigUint,
    pub balance: BigUint,
    pub allowance: BigUint,
    pub symbol: String,
    pub name: String,
}

/// Batched stats, each array parallel to the requested address list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokensInfo {
    pub total_supply: Vec<BigUint>,
    pub balance: Vec<BigUint>,
    pub allowance: Vec<BigUint>,
}

/// Read-only contract calls against an Ethereum-compatible node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of tokens deployed by the test-token factory.
    async fn count_known_test_tokens(&self) -> Result<u64, ChainError>;

    /// Address of the factory token at `index`.
    async fn token_at_index(&self, index: u64) -> Result<Address, ChainError>;

    /// Combined metadata plus the viewer's balance and the viewer's allowance
    /// towards `factory`.
    async fn get_token_info(
        &self,
        token: &Address,
        viewer: &Address,
        factory: &Address,
    ) -> Result<TokenInfo, ChainError>;

    /// Stats for many tokens in one call.
    async fn get_tokens_info(
        &self,
        tokens: &[Address],
        viewer: &Address,
        factory: &Address,
    ) -> Result<TokensInfo, ChainError>;
}

#[derive(Debug, Default)]
struct StaticChainState {
    factory_tokens: Vec<Address>,
    tokens: HashMap<Address, TokenInfo>,
    token_info_calls: usize,
    tokens_info_calls: usize,
}

/// In-memory chain for testing and demos.
///
/// Tokens pushed with [`StaticChainClient::push_factory_token`] are visible to
/// discovery; tokens added with [`StaticChainClient::insert_token`] can only be
/// resolved by address.
#[derive(Debug, Default)]
pub struct StaticChainClient {
    state: Mutex<StaticChainState>,
}

impl StaticChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StaticChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_factory_token(&self, address: Address, info: TokenInfo) {
        let mut state = self.state();
        state.factory_tokens.push(address.clone());
        state.tokens.insert(address, info);
    }

    pub fn insert_token(&self, address: Address, info: TokenInfo) {
        self.state().tokens.insert(address, info);
    }

    /// Replace the viewer balance of a known token. Returns false if unknown.
    pub fn set_balance(&self, address: &Address, balance: BigUint) -> bool {
        match self.state().tokens.get_mut(address) {
            Some(info) => {
                info.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Number of `get_token_info` calls served so far.
    pub fn token_info_calls(&self) -> usize {
        self.state().token_info_calls
    }

    /// Number of `get_tokens_info` calls served so far.
    pub fn tokens_info_calls(&self) -> usize {
        self.state().tokens_info_calls
    }
}

#[async_trait]
impl ChainClient for StaticChainClient {
    async fn count_known_test_tokens(&self) -> Result<u64, ChainError> {
        Ok(self.state().factory_tokens.len() as u64)
    }

    async fn token_at_index(&self, index: u64) -> Result<Address, ChainError> {
        let state = self.state();
        usize::try_from(index)
            .ok()
            .and_then(|i| state.factory_tokens.get(i))
            .cloned()
            .ok_or_else(|| ChainError::Reverted(format!("no factory token at index {index}")))
    }

    async fn get_token_info(
        &self,
        token: &Address,
        _viewer: &Address,
        _factory: &Address,
    ) -> Result<TokenInfo, ChainError> {
        let mut state = self.state();
        state.token_info_calls += 1;
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ChainError::Reverted(format!("unknown token {token}")))
    }

    async fn get_tokens_info(
        &self,
        tokens: &[Address],
        _viewer: &Address,
        _factory: &Address,
    ) -> Result<TokensInfo, ChainError> {
        let mut state = self.state();
        state.tokens_info_calls += 1;

        let mut result = TokensInfo::default();
        for token in tokens {
            let info = state
                .tokens
                .get(token)
                .ok_or_else(|| ChainError::Reverted(format!("unknown token {token}")))?;
            result.total_supply.push(info.total_supply.clone());
            result.balance.push(info.balance.clone());
            result.allowance.push(info.allowance.clone());
        }
        Ok(result)
    }
}
