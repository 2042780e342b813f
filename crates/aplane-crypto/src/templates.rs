//! Generic template LogicSig providers.
//!
//! These key types hold no secret at all: the "key" is a compiled program
//! parameterized at creation time, and signing means supplying the runtime
//! arguments the program checks.

use aplane_core::types::Address;

use crate::provider::{
    parse_u64, require_param, ArgSpec, KeyFamily, KeyMaterial, MnemonicScheme, ParamMap,
    ParamSpec, ParamType, Provider, ProviderError,
};

// ── Timelock ─────────────────────────────────────────────────────────────────

/// Funds spendable only to `owner` and only after round `round`.
pub struct TimelockProvider;

pub const TIMELOCK_LABEL: &str = "timelock-v1";

const TIMELOCK_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "owner",
        label: "Owner address",
        ty: ParamType::Address,
        required: true,
        example: None,
    },
    ParamSpec {
        name: "round",
        label: "Unlock round",
        ty: ParamType::Uint64,
        required: true,
        example: Some("40000000"),
    },
];

impl TimelockProvider {
    fn parse(params: &ParamMap) -> Result<(Address, u64), ProviderError> {
        let owner_str = require_param(params, "owner")?;
        let owner = Address::from_string(owner_str).map_err(|e| ProviderError::InvalidParam {
            name: "owner",
            reason: e.to_string(),
        })?;
        let round = parse_u64("round", require_param(params, "round")?)?;
        Ok((owner, round))
    }
}

impl Provider for TimelockProvider {
    fn type_label(&self) -> &'static str {
        TIMELOCK_LABEL
    }

    fn family(&self) -> KeyFamily {
        KeyFamily::GenericTemplate
    }

    fn mnemonic_scheme(&self) -> MnemonicScheme {
        MnemonicScheme::NONE
    }

    fn creation_params(&self) -> &'static [ParamSpec] {
        TIMELOCK_PARAMS
    }

    fn runtime_args(&self) -> &'static [ArgSpec] {
        &[]
    }

    fn validate_params(&self, params: &ParamMap) -> Result<(), ProviderError> {
        Self::parse(params).map(|_| ())
    }

    fn generate(&self, params: &ParamMap) -> Result<KeyMaterial, ProviderError> {
        Ok(KeyMaterial {
            secret: None,
            public_key: Vec::new(),
            teal: Some(self.teal_source(params)?),
        })
    }

    fn build_args(
        &self,
        signature: Option<Vec<u8>>,
        _user_args: &ParamMap,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        if signature.is_some() {
            return Err(ProviderError::Unsupported);
        }
        Ok(Vec::new())
    }

    fn teal_source(&self, params: &ParamMap) -> Result<String, ProviderError> {
        let (owner, round) = Self::parse(params)?;
        Ok(format!(
            "#pragma version 6\n\
             txn FirstValid\n\
             int {round}\n\
             >\n\
             txn Receiver\n\
             addr {owner}\n\
             ==\n\
             &&\n"
        ))
    }
}

// ── Hashlock ─────────────────────────────────────────────────────────────────

/// Funds spendable by whoever presents a SHA-256 preimage of `image`.
pub struct HashlockProvider;

pub const HASHLOCK_LABEL: &str = "hashlock-v1";

const HASHLOCK_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "image",
    label: "SHA-256 image (hex)",
    ty: ParamType::Bytes,
    required: true,
    example: Some("64 hex characters"),
}];

const HASHLOCK_ARGS: &[ArgSpec] = &[ArgSpec {
    name: "preimage",
    label: "Preimage (hex)",
    ty: ParamType::Bytes,
}];

impl HashlockProvider {
    fn parse_image(params: &ParamMap) -> Result<Vec<u8>, ProviderError> {
        let image_hex = require_param(params, "image")?;
        let image = hex::decode(image_hex).map_err(|e| ProviderError::InvalidParam {
            name: "image",
            reason: e.to_string(),
        })?;
        if image.len() != 32 {
            return Err(ProviderError::InvalidParam {
                name: "image",
                reason: format!("expected 32 bytes, got {}", image.len()),
            });
        }
        Ok(image)
    }
}

impl Provider for HashlockProvider {
    fn type_label(&self) -> &'static str {
        HASHLOCK_LABEL
    }

    fn family(&self) -> KeyFamily {
        KeyFamily::GenericTemplate
    }

    fn mnemonic_scheme(&self) -> MnemonicScheme {
        MnemonicScheme::NONE
    }

    fn creation_params(&self) -> &'static [ParamSpec] {
        HASHLOCK_PARAMS
    }

    fn runtime_args(&self) -> &'static [ArgSpec] {
        HASHLOCK_ARGS
    }

    fn validate_params(&self, params: &ParamMap) -> Result<(), ProviderError> {
        Self::parse_image(params).map(|_| ())
    }

    fn generate(&self, params: &ParamMap) -> Result<KeyMaterial, ProviderError> {
        Ok(KeyMaterial {
            secret: None,
            public_key: Vec::new(),
            teal: Some(self.teal_source(params)?),
        })
    }

    fn build_args(
        &self,
        signature: Option<Vec<u8>>,
        user_args: &ParamMap,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        if signature.is_some() {
            return Err(ProviderError::Unsupported);
        }
        let preimage_hex = user_args
            .get("preimage")
            .ok_or(ProviderError::MissingArg("preimage"))?;
        let preimage = hex::decode(preimage_hex).map_err(|e| ProviderError::InvalidParam {
            name: "preimage",
            reason: e.to_string(),
        })?;
        Ok(vec![preimage])
    }

    fn teal_source(&self, params: &ParamMap) -> Result<String, ProviderError> {
        let image = Self::parse_image(params)?;
        Ok(format!(
            "#pragma version 6\n\
             arg 0\n\
             sha256\n\
             byte 0x{}\n\
             ==\n",
            hex::encode(image)
        ))
    }
}
