//! Call encoding and batching for post-deployment configuration.
//!
//! Every configuration operation is validated against its ABI function before any
//! bytes are produced ([`PreparedCall::new`]). The prepared calls of a phase are then
//! folded into a single Multicall3 `aggregate3Value` call ([`aggregate`]) with
//! `allowFailure = false`, so the whole batch reverts if any sub-call reverts.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Address, Bytes, U256, address},
    sol,
    sol_types::SolCall,
};
use anyhow::Context;

use crate::{
    artifact::Artifact,
    error::{DeployError, Result},
};

/// Canonical Multicall3 deployment, present at the same address on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    struct Call3Value {
        address target;
        bool allowFailure;
        uint256 value;
        bytes callData;
    }

    struct CallResult {
        bool success;
        bytes returnData;
    }

    function aggregate3Value(Call3Value[] calls) external payable returns (CallResult[] returnData);
}

/// A configuration call whose arguments have been checked against its ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCall {
    pub target: Address,
    pub value: U256,
    /// Canonical signature of the called function, e.g. `grantRole(bytes32,address)`.
    pub signature: String,
    pub calldata: Bytes,
}

impl PreparedCall {
    /// Validate `args` against `function` and encode the call.
    pub fn new(
        target: Address,
        function: &Function,
        args: &[DynSolValue],
        value: U256,
    ) -> Result<Self> {
        let calldata = encode(function, args)?;
        Ok(Self {
            target,
            value,
            signature: function.signature(),
            calldata,
        })
    }
}

/// A sub-call recovered from aggregated calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCall {
    pub target: Address,
    pub allow_failure: bool,
    pub value: U256,
    pub calldata: Bytes,
}

/// Aggregated calldata for a batch of prepared calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub calldata: Bytes,
    /// Sum of the sub-call values, to be sent along with the aggregator call.
    pub value: U256,
    pub len: usize,
}

/// Check arity and the type of each argument against `params`.
pub fn validate_params(name: &str, params: &[Param], args: &[DynSolValue]) -> Result<()> {
    if params.len() != args.len() {
        return Err(DeployError::encoding(
            name,
            format!("expected {} argument(s), got {}", params.len(), args.len()),
        ));
    }

    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        let expected: DynSolType = param.resolve().map_err(|e| {
            DeployError::encoding(name, format!("unsupported parameter type `{}`: {e}", param.ty))
        })?;

        if !expected.matches(arg) {
            let actual = arg
                .as_type()
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let label = if param.name.is_empty() {
                format!("#{index}")
            } else {
                format!("#{index} `{}`", param.name)
            };
            return Err(DeployError::encoding(
                name,
                format!("argument {label} expects `{expected}`, got `{actual}`"),
            ));
        }

        if !fits_width(arg) {
            return Err(DeployError::encoding(
                name,
                format!("argument #{index} does not fit in `{expected}`"),
            ));
        }
    }

    Ok(())
}

/// Whether every integer in `value` lies within the range of its declared bit width.
fn fits_width(value: &DynSolValue) -> bool {
    match value {
        DynSolValue::Uint(v, bits) => *bits >= 256 || (*v >> *bits).is_zero(),
        DynSolValue::Int(i, bits) => {
            if *bits >= 256 {
                return true;
            }
            // Bits above the sign bit must all equal it.
            let high = i.into_raw() >> (*bits - 1);
            high.is_zero() || high == U256::MAX >> (*bits - 1)
        }
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => values.iter().all(fits_width),
        _ => true,
    }
}

/// Encode a function call: selector followed by the ABI-encoded arguments.
pub fn encode(function: &Function, args: &[DynSolValue]) -> Result<Bytes> {
    let signature = function.signature();
    validate_params(&signature, &function.inputs, args)?;

    function
        .abi_encode_input(args)
        .map(Bytes::from)
        .map_err(|e| DeployError::encoding(signature, e.to_string()))
}

/// Creation code for a unit: the artifact bytecode followed by the encoded constructor arguments.
pub fn creation_code(artifact: &Artifact, args: &[DynSolValue]) -> Result<Bytes> {
    let name = format!("{}.constructor", artifact.kind);

    let encoded_args = match artifact.abi.constructor() {
        Some(constructor) => {
            validate_params(&name, &constructor.inputs, args)?;
            constructor
                .abi_encode_input(args)
                .map_err(|e| DeployError::encoding(&name, e.to_string()))?
        }
        None if args.is_empty() => Vec::new(),
        None => {
            return Err(DeployError::encoding(
                name,
                format!("no constructor declared, got {} argument(s)", args.len()),
            ));
        }
    };

    let mut code = Vec::with_capacity(artifact.bytecode.len() + encoded_args.len());
    code.extend_from_slice(&artifact.bytecode);
    code.extend_from_slice(&encoded_args);
    Ok(code.into())
}

/// Select the overload of `name` accepting `args`.
///
/// Returns `Ok(None)` when the ABI declares no function called `name`.
pub fn select_function<'a>(
    abi: &'a JsonAbi,
    name: &str,
    args: &[DynSolValue],
) -> Result<Option<&'a Function>> {
    let Some(overloads) = abi.function(name) else {
        return Ok(None);
    };

    if let [only] = overloads.as_slice() {
        validate_params(&only.signature(), &only.inputs, args)?;
        return Ok(Some(only));
    }

    let mut matching = overloads
        .iter()
        .filter(|f| validate_params(name, &f.inputs, args).is_ok());

    match (matching.next(), matching.next()) {
        (Some(function), None) => Ok(Some(function)),
        (None, _) => Err(DeployError::encoding(
            name,
            format!("none of the {} overloads accepts the given arguments", overloads.len()),
        )),
        (Some(_), Some(_)) => Err(DeployError::encoding(
            name,
            "arguments match more than one overload",
        )),
    }
}

/// Fold prepared calls into a single `aggregate3Value` call, preserving their order.
pub fn aggregate(calls: &[PreparedCall]) -> Result<Batch> {
    let value = calls.iter().try_fold(U256::ZERO, |acc, call| {
        acc.checked_add(call.value)
            .ok_or_else(|| DeployError::encoding("aggregate3Value", "total call value overflows"))
    })?;

    let call = aggregate3ValueCall {
        calls: calls
            .iter()
            .map(|call| Call3Value {
                target: call.target,
                allowFailure: false,
                value: call.value,
                callData: call.calldata.clone(),
            })
            .collect(),
    };

    Ok(Batch {
        calldata: call.abi_encode().into(),
        value,
        len: calls.len(),
    })
}

/// Decode aggregated calldata back into its sub-calls.
pub fn decode_batch(calldata: &[u8]) -> anyhow::Result<Vec<DecodedCall>> {
    let call = aggregate3ValueCall::abi_decode(calldata, true)
        .context("Calldata is not an aggregate3Value call")?;

    Ok(call
        .calls
        .into_iter()
        .map(|c| DecodedCall {
            target: c.target,
            allow_failure: c.allowFailure,
            value: c.value,
            calldata: c.callData,
        })
        .collect())
}
