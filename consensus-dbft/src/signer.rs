//! ed25519 signer backed by a validator keypair.

use {
    crate::{collaborators::Signer, error::SignerError},
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    solana_signer::Signer as _,
    std::sync::Arc,
};

/// Signs with the local validator's keypair.
#[derive(Debug, Clone)]
pub struct KeypairSigner {
    keypair: Arc<Keypair>,
}

impl KeypairSigner {
    pub fn new(keypair: Arc<Keypair>) -> Self {
        Self { keypair }
    }
}

impl Signer for KeypairSigner {
    fn public_key(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.keypair
            .try_sign_message(message)
            .map_err(|err| SignerError(err.to_string()))
    }

    fn verify(&self, pubkey: &Pubkey, message: &[u8], signature: &Signature) -> bool {
        signature.verify(pubkey.as_ref(), message)
    }
}
