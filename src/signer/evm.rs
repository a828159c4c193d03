//! secp256k1 signing for EVM transactions, EIP-191 messages and EIP-712 data

use k256::ecdsa::SigningKey;

use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::evm::{checksum_address, keccak256, EvmTransaction, RecoverableSignature, TypedData};
use crate::vault::EvmKey;

use super::{ArtifactKind, SignedArtifact};

/// Sign a prehash; the signature is normalized to low-s
pub fn sign_hash(key: &SigningKey, hash: &[u8; 32]) -> Result<RecoverableSignature> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| Error::SignFailed(format!("ecdsa: {}", e)))?;

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(RecoverableSignature {
        r,
        s,
        recovery_id: recovery_id.to_byte(),
    })
}

/// EIP-191 `personal_sign` digest
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    keccak256(&prefixed)
}

/// 65-byte `r || s || v` with v in {27, 28}
pub fn to_rsv(sig: &RecoverableSignature) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[..32].copy_from_slice(&sig.r);
    out[32..64].copy_from_slice(&sig.s);
    out[64] = 27 + sig.recovery_id;
    out
}

fn message_artifact(sig: &RecoverableSignature) -> SignedArtifact {
    let rsv = to_rsv(sig);
    SignedArtifact {
        chain: Chain::Evm,
        kind: ArtifactKind::Message,
        signature: format!("0x{}", hex::encode(rsv)),
        raw: rsv.to_vec(),
    }
}

pub fn sign_personal_message(key: &EvmKey, message: &[u8]) -> Result<SignedArtifact> {
    let sig = sign_hash(&key.signing_key, &personal_message_hash(message))?;
    Ok(message_artifact(&sig))
}

pub fn sign_typed_data(key: &EvmKey, data: &TypedData) -> Result<SignedArtifact> {
    let sig = sign_hash(&key.signing_key, &data.signing_hash()?)?;
    Ok(message_artifact(&sig))
}

/// Signed raw transaction; the artifact signature is the transaction hash
pub fn sign_transaction(
    key: &EvmKey,
    tx: &EvmTransaction,
    default_chain_id: u64,
) -> Result<SignedArtifact> {
    if let Some(from) = tx.from {
        if from != key.address {
            return Err(Error::SignFailed(format!(
                "transaction is from {} but key is {}",
                checksum_address(&from),
                key.checksum_address()
            )));
        }
    }

    let chain_id = tx.chain_id.unwrap_or(default_chain_id);
    let payload = tx.signing_payload(chain_id)?;
    let sig = sign_hash(&key.signing_key, &keccak256(&payload))?;
    let raw = tx.encode_signed(chain_id, &sig)?;
    let hash = keccak256(&raw);

    Ok(SignedArtifact {
        chain: Chain::Evm,
        kind: ArtifactKind::Transaction,
        signature: format!("0x{}", hex::encode(hash)),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::WalletId;
    use crate::evm::{address_from_uncompressed, parse_address, Word};
    use crate::vault::derivation::{evm_key, seed_from_mnemonic};
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn key() -> EvmKey {
        let seed = seed_from_mnemonic(PHRASE).unwrap();
        evm_key(&seed, WalletId(0)).unwrap()
    }

    fn recover(hash: &[u8; 32], rsv: &[u8]) -> [u8; 20] {
        let sig = Signature::from_slice(&rsv[..64]).unwrap();
        let recid = RecoveryId::from_byte(rsv[64] - 27).unwrap();
        let vk = VerifyingKey::recover_from_prehash(hash, &sig, recid).unwrap();
        address_from_uncompressed(vk.to_encoded_point(false).as_bytes()).unwrap()
    }

    #[test]
    fn test_personal_sign_recovers_to_wallet() {
        let key = key();
        let artifact = sign_personal_message(&key, b"hello").unwrap();
        assert_eq!(artifact.raw.len(), 65);
        assert!(artifact.raw[64] == 27 || artifact.raw[64] == 28);
        assert_eq!(recover(&personal_message_hash(b"hello"), &artifact.raw), key.address);
    }

    #[test]
    fn test_transaction_from_other_account_refused() {
        let tx = EvmTransaction {
            from: Some(parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap()),
            nonce: Some(0),
            gas: Some(21_000),
            max_fee_per_gas: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            sign_transaction(&key(), &tx, 1),
            Err(Error::SignFailed(_))
        ));
    }

    #[test]
    fn test_signed_legacy_transaction_recovers() {
        let key = key();
        let tx = EvmTransaction {
            to: Some(parse_address("0x3535353535353535353535353535353535353535").unwrap()),
            value: Word::from_u128(1),
            gas: Some(21_000),
            gas_price: Some(20_000_000_000),
            nonce: Some(9),
            ..Default::default()
        };
        let artifact = sign_transaction(&key, &tx, 1).unwrap();
        assert_eq!(artifact.signature, format!("0x{}", hex::encode(keccak256(&artifact.raw))));

        let hash = keccak256(&tx.signing_payload(1).unwrap());
        let sig = sign_hash(&key.signing_key, &hash).unwrap();
        assert_eq!(recover(&hash, &to_rsv(&sig)), key.address);
    }
}
