//! Deterministic simulated accounts.

use crate::randomness::SimRng;

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Bytes of the public-key digest used as an address.
const ADDRESS_LEN: usize = 20;

/// A simulated account: an Ed25519 key pair and its derived address.
///
/// Keys are generated from a simulation stream, so the same stream state
/// always yields the same account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Private key
    pub signing_key: SigningKey,

    /// Public key bytes
    pub pub_key: Vec<u8>,

    /// Uppercase hex of the first 20 bytes of SHA-256(pub_key)
    pub address: String,
}

impl Account {
    /// Wraps an existing signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let pub_key = signing_key.verifying_key().to_bytes().to_vec();
        let digest = Sha256::digest(&pub_key);
        let address = hex::encode_upper(&digest[..ADDRESS_LEN]);

        Self {
            signing_key,
            pub_key,
            address,
        }
    }

    /// Generates an account from the stream.
    pub fn random(rng: &mut SimRng) -> Self {
        Self::from_signing_key(SigningKey::generate(rng))
    }

    /// Returns the verifying half of the key pair.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Uppercase hex of the public key.
    pub fn pub_key_hex(&self) -> String {
        hex::encode_upper(&self.pub_key)
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.pub_key == other.pub_key
    }
}

impl Eq for Account {}

/// Generates `n` accounts from the stream, in order.
///
/// Drawing more accounts never changes the first ones.
pub fn random_accounts(rng: &mut SimRng, n: usize) -> Vec<Account> {
    (0..n).map(|_| Account::random(rng)).collect()
}
