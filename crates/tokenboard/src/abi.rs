//! ABI codec for the fixed set of read-only contract calls the RPC client makes.
//!
//! Only the types those calls use are supported: `address`, `uint256`,
//! `string`, `address[]` and `uint256[]`.

use num_bigint::BigUint;
use tiny_keccak::{Hasher, Keccak};

use crate::error::AbiError;
use crate::token::Address;

const WORD: usize = 32;

/// Parameter types appearing in the dashboard's contract calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint256,
    String,
    AddressArray,
    Uint256Array,
}

impl ParamType {
    fn is_dynamic(self) -> bool {
        matches!(
            self,
            ParamType::String | ParamType::AddressArray | ParamType::Uint256Array
        )
    }

    fn name(self) -> &'static str {
        match self {
            ParamType::Address => "address",
            ParamType::Uint256 => "uint256",
            ParamType::String => "string",
            ParamType::AddressArray => "address[]",
            ParamType::Uint256Array => "uint256[]",
        }
    }
}

/// A contract function with its declared inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub name: &'static str,
    pub inputs: &'static [ParamType],
    pub outputs: &'static [ParamType],
}

/// `fakeTokensLength() -> uint256` on the test-token factory.
pub const FAKE_TOKENS_LENGTH: Function = Function {
    name: "fakeTokensLength",
    inputs: &[],
    outputs: &[ParamType::Uint256],
};

/// `fakeTokens(uint256) -> address` on the test-token factory.
pub const FAKE_TOKENS: Function = Function {
    name: "fakeTokens",
    inputs: &[ParamType::Uint256],
    outputs: &[ParamType::Address],
};

/// `getTokenInfo(token, viewer, factory)` on the token-tools contract:
/// decimals, total supply, balance, allowance, symbol, name.
pub const GET_TOKEN_INFO: Function = Function {
    name: "getTokenInfo",
    inputs: &[ParamType::Address, ParamType::Address, ParamType::Address],
    outputs: &[
        ParamType::Uint256,
        ParamType::Uint256,
        ParamType::Uint256,
        ParamType::Uint256,
        ParamType::String,
        ParamType::String,
    ],
};

/// `getTokensInfo(tokens, viewer, factory)` on the token-tools contract:
/// parallel total supply, balance and allowance arrays.
pub const GET_TOKENS_INFO: Function = Function {
    name: "getTokensInfo",
    inputs: &[ParamType::AddressArray, ParamType::Address, ParamType::Address],
    outputs: &[
        ParamType::Uint256Array,
        ParamType::Uint256Array,
        ParamType::Uint256Array,
    ],
};

impl Function {
    /// Canonical signature, e.g. `getTokensInfo(address[],address,address)`.
    pub fn signature(&self) -> String {
        let inputs: Vec<&str> = self.inputs.iter().map(|p| p.name()).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    /// First four bytes of the keccak-256 hash of the signature.
    pub fn selector(&self) -> [u8; 4] {
        let mut hasher = Keccak::v256();
        hasher.update(self.signature().as_bytes());
        let mut hash = [0u8; 32];
        hasher.finalize(&mut hash);
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

/// A value passed to or returned from a contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address([u8; 20]),
    Uint(BigUint),
    String(String),
    Array(Vec<AbiValue>),
}

impl AbiValue {
    /// Encode a dashboard address as an ABI address word.
    pub fn address(address: &Address) -> Result<Self, AbiError> {
        let hex_str = address.as_str().trim_start_matches("0x");
        let bytes = hex::decode(hex_str)
            .map_err(|e| AbiError::InvalidEncoding(format!("address {address}: {e}")))?;
        let addr: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            AbiError::InvalidEncoding(format!("address {address}: {} bytes, expected 20", b.len()))
        })?;
        Ok(AbiValue::Address(addr))
    }

    pub fn into_uint(self) -> Result<BigUint, AbiError> {
        match self {
            AbiValue::Uint(n) => Ok(n),
            other => Err(mismatch("uint", &other)),
        }
    }

    pub fn into_string(self) -> Result<String, AbiError> {
        match self {
            AbiValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    pub fn into_address(self) -> Result<Address, AbiError> {
        match self {
            AbiValue::Address(addr) => Address::new(&format!("0x{}", hex::encode(addr)))
                .map_err(|e| AbiError::InvalidEncoding(e.to_string())),
            other => Err(mismatch("address", &other)),
        }
    }

    pub fn into_array(self) -> Result<Vec<AbiValue>, AbiError> {
        match self {
            AbiValue::Array(items) => Ok(items),
            other => Err(mismatch("array", &other)),
        }
    }
}

fn mismatch(expected: &str, actual: &AbiValue) -> AbiError {
    AbiError::InvalidEncoding(format!("expected {expected}, got {actual:?}"))
}

/// Build calldata: selector followed by the encoded arguments.
pub fn encode_call(function: &Function, args: &[AbiValue]) -> Result<Vec<u8>, AbiError> {
    if args.len() != function.inputs.len() {
        return Err(AbiError::InvalidEncoding(format!(
            "{} expects {} arguments, got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        )));
    }

    let head_len = WORD * args.len();
    let mut head = function.selector().to_vec();
    let mut tail = Vec::new();

    for (ty, value) in function.inputs.iter().zip(args) {
        let encoded = encode_value(*ty, value)?;
        if ty.is_dynamic() {
            head.extend(usize_word(head_len + tail.len()));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }

    head.extend(tail);
    Ok(head)
}

fn encode_value(ty: ParamType, value: &AbiValue) -> Result<Vec<u8>, AbiError> {
    match (ty, value) {
        (ParamType::Address, AbiValue::Address(addr)) => {
            let mut word = vec![0u8; 12];
            word.extend_from_slice(addr);
            Ok(word)
        }
        (ParamType::Uint256, AbiValue::Uint(n)) => {
            let bytes = n.to_bytes_be();
            if bytes.len() > WORD {
                return Err(AbiError::InvalidEncoding("uint exceeds 256 bits".to_string()));
            }
            let mut word = vec![0u8; WORD - bytes.len()];
            word.extend(bytes);
            Ok(word)
        }
        (ParamType::AddressArray, AbiValue::Array(items)) => {
            let mut out = usize_word(items.len()).to_vec();
            for item in items {
                out.extend(encode_value(ParamType::Address, item)?);
            }
            Ok(out)
        }
        (ty, value) => Err(AbiError::InvalidEncoding(format!(
            "cannot encode {value:?} as {}",
            ty.name()
        ))),
    }
}

fn usize_word(n: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&(n as u64).to_be_bytes());
    word
}

/// Decode return data against the function's declared outputs.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
    function
        .outputs
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let head = i * WORD;
            if ty.is_dynamic() {
                let offset = read_usize(data, head)?;
                decode_dynamic(*ty, data, offset)
            } else {
                decode_static(*ty, data, head)
            }
        })
        .collect()
}

fn decode_static(ty: ParamType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    let word = read_word(data, offset)?;
    match ty {
        ParamType::Address => {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&word[12..]);
            Ok(AbiValue::Address(addr))
        }
        ParamType::Uint256 => Ok(AbiValue::Uint(BigUint::from_bytes_be(word))),
        other => Err(AbiError::InvalidEncoding(format!(
            "{} is not a static type",
            other.name()
        ))),
    }
}

fn decode_dynamic(ty: ParamType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    let len = read_usize(data, offset)?;
    let start = offset.saturating_add(WORD);

    match ty {
        ParamType::String => {
            let end = start.saturating_add(len);
            let bytes = data.get(start..end).ok_or(AbiError::DataTooShort {
                expected: end,
                actual: data.len(),
            })?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| AbiError::InvalidEncoding(format!("invalid UTF-8: {e}")))?;
            Ok(AbiValue::String(s.to_string()))
        }
        ParamType::AddressArray | ParamType::Uint256Array => {
            let element = if ty == ParamType::AddressArray {
                ParamType::Address
            } else {
                ParamType::Uint256
            };
            // Reject lengths the data cannot hold before allocating.
            let end = len.saturating_mul(WORD).saturating_add(start);
            if end > data.len() {
                return Err(AbiError::DataTooShort {
                    expected: end,
                    actual: data.len(),
                });
            }
            let items = (0..len)
                .map(|i| decode_static(element, data, start + i * WORD))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AbiValue::Array(items))
        }
        other => Err(AbiError::InvalidEncoding(format!(
            "{} is not a dynamic type",
            other.name()
        ))),
    }
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .ok_or(AbiError::DataTooShort {
            expected: offset.saturating_add(WORD),
            actual: data.len(),
        })
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let word = read_word(data, offset)?;
    if word[..24].iter().any(|&b| b != 0) {
        return Err(AbiError::InvalidEncoding("length or offset too large".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| AbiError::InvalidEncoding("length or offset too large".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint_word(n: u64) -> [u8; WORD] {
        usize_word(n as usize)
    }

    fn padded(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out.resize(bytes.len().div_ceil(WORD) * WORD, 0);
        out
    }

    #[test]
    fn test_signatures() {
        assert_eq!(FAKE_TOKENS_LENGTH.signature(), "fakeTokensLength()");
        assert_eq!(FAKE_TOKENS.signature(), "fakeTokens(uint256)");
        assert_eq!(
            GET_TOKEN_INFO.signature(),
            "getTokenInfo(address,address,address)"
        );
        assert_eq!(
            GET_TOKENS_INFO.signature(),
            "getTokensInfo(address[],address,address)"
        );
    }

    #[test]
    fn test_selector_computation() {
        // ERC20 balanceOf(address) = 0x70a08231
        let balance_of = Function {
            name: "balanceOf",
            inputs: &[ParamType::Address],
            outputs: &[ParamType::Uint256],
        };
        assert_eq!(hex::encode(balance_of.selector()), "70a08231");
    }

    #[test]
    fn test_encode_static_call() {
        let calldata = encode_call(&FAKE_TOKENS, &[AbiValue::Uint(BigUint::from(3u32))]).unwrap();
        assert_eq!(calldata.len(), 36);
        assert_eq!(&calldata[..4], &FAKE_TOKENS.selector());
        assert_eq!(calldata[35], 3);
    }

    #[test]
    fn test_encode_dynamic_array_call() {
        let a = AbiValue::address(&Address::new("0x00000000000000000000000000000000000000aa").unwrap())
            .unwrap();
        let viewer =
            AbiValue::address(&Address::new("0x00000000000000000000000000000000000000bb").unwrap())
                .unwrap();
        let calldata = encode_call(
            &GET_TOKENS_INFO,
            &[AbiValue::Array(vec![a.clone(), a]), viewer.clone(), viewer],
        )
        .unwrap();

        let body = &calldata[4..];
        // head: offset, viewer, factory; tail: length + 2 elements
        assert_eq!(body.len(), WORD * 6);
        assert_eq!(body[..32], uint_word(96));
        assert_eq!(body[63], 0xbb);
        assert_eq!(body[96..128], uint_word(2));
        assert_eq!(body[159], 0xaa);
    }

    #[test]
    fn test_encode_rejects_arity_and_type_mismatch() {
        assert!(encode_call(&FAKE_TOKENS, &[]).is_err());
        assert!(encode_call(&FAKE_TOKENS, &[AbiValue::String("3".to_string())]).is_err());
    }

    #[test]
    fn test_address_value_validation() {
        assert!(AbiValue::address(&Address::new("0x1234").unwrap()).is_err());
        assert!(AbiValue::address(&Address::new("0xzz").unwrap()).is_err());
    }

    #[test]
    fn test_decode_token_info_output() {
        let mut data = Vec::new();
        data.extend(uint_word(6));
        data.extend(uint_word(1_000_000));
        data.extend(uint_word(500_000));
        data.extend(uint_word(0));
        data.extend(uint_word(6 * 32)); // symbol offset
        data.extend(uint_word(8 * 32)); // name offset
        data.extend(uint_word(4));
        data.extend(padded(b"USDT"));
        data.extend(uint_word(10));
        data.extend(padded(b"Tether USD"));

        let mut values = decode_output(&GET_TOKEN_INFO, &data).unwrap().into_iter();
        assert_eq!(values.next().unwrap().into_uint().unwrap(), BigUint::from(6u32));
        assert_eq!(
            values.next().unwrap().into_uint().unwrap(),
            BigUint::from(1_000_000u32)
        );
        let _ = values.next();
        let _ = values.next();
        assert_eq!(values.next().unwrap().into_string().unwrap(), "USDT");
        assert_eq!(values.next().unwrap().into_string().unwrap(), "Tether USD");
    }

    #[test]
    fn test_decode_parallel_arrays() {
        let mut data = Vec::new();
        data.extend(uint_word(96));
        data.extend(uint_word(192));
        data.extend(uint_word(256));
        data.extend(uint_word(2));
        data.extend(uint_word(7));
        data.extend(uint_word(8));
        data.extend(uint_word(1));
        data.extend(uint_word(9));
        data.extend(uint_word(0));

        let values = decode_output(&GET_TOKENS_INFO, &data).unwrap();
        assert_eq!(
            values[0].clone().into_array().unwrap(),
            vec![AbiValue::Uint(BigUint::from(7u32)), AbiValue::Uint(BigUint::from(8u32))]
        );
        assert_eq!(
            values[1].clone().into_array().unwrap(),
            vec![AbiValue::Uint(BigUint::from(9u32))]
        );
        assert!(values[2].clone().into_array().unwrap().is_empty());
    }

    #[test]
    fn test_decode_truncated_data() {
        let result = decode_output(&GET_TOKEN_INFO, &uint_word(1));
        assert!(matches!(result, Err(AbiError::DataTooShort { .. })));

        // Array claiming more elements than the data holds.
        let mut data = Vec::new();
        data.extend(uint_word(96));
        data.extend(uint_word(96));
        data.extend(uint_word(96));
        data.extend(uint_word(1_000_000));
        assert!(matches!(
            decode_output(&GET_TOKENS_INFO, &data),
            Err(AbiError::DataTooShort { .. })
        ));
    }

    #[test]
    fn test_decode_address_is_normalized() {
        let mut word = [0u8; 32];
        word[12] = 0xB6;
        word[31] = 0xD8;
        let value = decode_output(&FAKE_TOKENS, &word).unwrap().remove(0);
        assert_eq!(
            value.into_address().unwrap().as_str(),
            "0xb6000000000000000000000000000000000000d8"
        );
    }
}
