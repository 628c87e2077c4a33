use crate::errors::PaytollError;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use zeroize::Zeroize as _;

/// The process-wide signing identity. Present only when a secret was resolved at startup.
#[derive(Clone)]
pub struct WalletIdentity {
    signer: PrivateKeySigner,
}

impl std::fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("address", &self.address().to_string())
            .finish_non_exhaustive()
    }
}

impl WalletIdentity {
    /// Build the identity from a `0x`-prefixed, 32-byte hex private key.
    pub fn from_secret(secret: &str) -> Result<Self, PaytollError> {
        let trimmed = secret.trim();
        let Some(hex_part) = trimmed.strip_prefix("0x") else {
            return Err(PaytollError::Config(
                "private key must start with 0x".into(),
            ));
        };
        let mut bytes = hex::decode(hex_part)
            .map_err(|e| PaytollError::Config(format!("private key is not valid hex: {e}")))?;
        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(PaytollError::Config(format!(
                "private key must be 32 bytes, got {len}"
            )));
        }
        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|e| PaytollError::Config(format!("invalid private key: {e}")));
        bytes.zeroize();
        Ok(Self { signer: signer? })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub const fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[cfg(test)]
pub mod test_support {
    use super::WalletIdentity;

    /// Well-known throwaway key; never funded.
    pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    pub fn test_wallet() -> eyre::Result<WalletIdentity> {
        Ok(WalletIdentity::from_secret(TEST_KEY)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_checksummed_address_from_key() -> eyre::Result<()> {
        let w = test_support::test_wallet()?;
        assert_eq!(
            w.address().to_string(),
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );
        assert!(format!("{w:?}").contains("0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"));
        Ok(())
    }

    #[test]
    fn rejects_malformed_secrets() {
        for bad in ["deadbeef", "0xnothex", "0x1234"] {
            assert!(
                matches!(WalletIdentity::from_secret(bad), Err(PaytollError::Config(_))),
                "{bad} should be rejected"
            );
        }
    }
}
