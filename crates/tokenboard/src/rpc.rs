//! JSON-RPC chain client issuing `eth_call`s against a node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abi::{self, AbiValue, Function};
use crate::chain::{ChainClient, TokenInfo, TokensInfo};
use crate::config::DashboardConfig;
use crate::error::{ChainError, Error};
use crate::token::Address;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallObject<'a>, &'static str),
}

#[derive(Debug, Serialize)]
struct CallObject<'a> {
    to: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Chain client backed by a JSON-RPC node, reading the test-token factory and
/// the token-tools helper contract.
#[derive(Debug)]
pub struct RpcChainClient {
    http: reqwest::Client,
    url: String,
    test_token_factory: Address,
    token_tools: Address,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(
        url: impl Into<String>,
        test_token_factory: Address,
        token_tools: Address,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            test_token_factory,
            token_tools,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, Error> {
        let missing = |field: &str| Error::Config(format!("{field} is required for the RPC client"));
        let url = config.rpc_url.clone().ok_or_else(|| missing("rpcUrl"))?;
        let factory = config
            .test_token_factory_address
            .clone()
            .ok_or_else(|| missing("testTokenFactoryAddress"))?;
        let tools = config
            .token_tools_address
            .clone()
            .ok_or_else(|| missing("tokenToolsAddress"))?;

        Self::new(
            url,
            factory,
            tools,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn eth_call(
        &self,
        to: &Address,
        function: &Function,
        args: &[AbiValue],
    ) -> Result<Vec<AbiValue>, ChainError> {
        let calldata = abi::encode_call(function, args)?;
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: (
                CallObject {
                    to: to.as_str(),
                    data: format!("0x{}", hex::encode(calldata)),
                },
                "latest",
            ),
        };
        debug!(to = %to, function = function.name, id = request.id, "eth_call");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Malformed(e.to_string()))?;

        let data = parse_response(response)?;
        Ok(abi::decode_output(function, &data)?)
    }
}

/// Extract return data from a JSON-RPC response.
fn parse_response(response: RpcResponse) -> Result<Vec<u8>, ChainError> {
    if let Some(err) = response.error {
        // Code 3 carries revert data; some nodes only say so in the message.
        if err.code == 3 || err.message.to_lowercase().contains("revert") {
            return Err(ChainError::Reverted(err.message));
        }
        return Err(ChainError::Transport(format!("rpc error {}: {}", err.code, err.message)));
    }

    let result = response
        .result
        .ok_or_else(|| ChainError::Malformed("response has neither result nor error".to_string()))?;
    hex::decode(result.trim_start_matches("0x"))
        .map_err(|e| ChainError::Malformed(format!("result is not hex: {e}")))
}

fn next_value(values: &mut std::vec::IntoIter<AbiValue>) -> Result<AbiValue, ChainError> {
    values
        .next()
        .ok_or_else(|| ChainError::Malformed("missing return value".to_string()))
}

fn uint_array(value: AbiValue) -> Result<Vec<BigUint>, ChainError> {
    value
        .into_array()?
        .into_iter()
        .map(|v| v.into_uint().map_err(ChainError::from))
        .collect()
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn count_known_test_tokens(&self) -> Result<u64, ChainError> {
        let mut values = self
            .eth_call(&self.test_token_factory, &abi::FAKE_TOKENS_LENGTH, &[])
            .await?
            .into_iter();
        let count = next_value(&mut values)?.into_uint()?;
        u64::try_from(&count).map_err(|_| ChainError::Malformed(format!("token count {count}")))
    }

    async fn token_at_index(&self, index: u64) -> Result<Address, ChainError> {
        let mut values = self
            .eth_call(
                &self.test_token_factory,
                &abi::FAKE_TOKENS,
                &[AbiValue::Uint(BigUint::from(index))],
            )
            .await?
            .into_iter();
        Ok(next_value(&mut values)?.into_address()?)
    }

    async fn get_token_info(
        &self,
        token: &Address,
        viewer: &Address,
        factory: &Address,
    ) -> Result<TokenInfo, ChainError> {
        let args = [
            AbiValue::address(token)?,
            AbiValue::address(viewer)?,
            AbiValue::address(factory)?,
        ];
        let mut values = self
            .eth_call(&self.token_tools, &abi::GET_TOKEN_INFO, &args)
            .await?
            .into_iter();

        let decimals = next_value(&mut values)?.into_uint()?;
        let decimals = u8::try_from(&decimals)
            .map_err(|_| ChainError::Malformed(format!("decimals {decimals} out of range")))?;

        Ok(TokenInfo {
            decimals,
            total_supply: next_value(&mut values)?.into_uint()?,
            balance: next_value(&mut values)?.into_uint()?,
            allowance: next_value(&mut values)?.into_uint()?,
            symbol: next_value(&mut values)?.into_string()?,
            name: next_value(&mut values)?.into_string()?,
        })
    }

    async fn get_tokens_info(
        &self,
        tokens: &[Address],
        viewer: &Address,
        factory: &Address,
    ) -> Result<TokensInfo, ChainError> {
        let token_values = tokens
            .iter()
            .map(AbiValue::address)
            .collect::<Result<Vec<_>, _>>()?;
        let args = [
            AbiValue::Array(token_values),
            AbiValue::address(viewer)?,
            AbiValue::address(factory)?,
        ];
        let mut values = self
            .eth_call(&self.token_tools, &abi::GET_TOKENS_INFO, &args)
            .await?
            .into_iter();

        Ok(TokensInfo {
            total_supply: uint_array(next_value(&mut values)?)?,
            balance: uint_array(next_value(&mut values)?)?,
            allowance: uint_array(next_value(&mut values)?)?,
        })
    }
}
