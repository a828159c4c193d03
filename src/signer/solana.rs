//! ed25519 signing for Solana transactions and messages

use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;

use crate::chain::Chain;
use crate::decoder::solana::signer_index;
use crate::error::{Error, Result};

use super::{ArtifactKind, SignedArtifact};

/// Place the wallet signature at its signer slot
///
/// Other signer slots are left as they are, so a dapp that pays the fee can
/// co-sign the returned transaction.
pub fn sign_transaction(keypair: &Keypair, tx: &VersionedTransaction) -> Result<SignedArtifact> {
    let signed = place_signature(keypair, tx)?;
    artifact(keypair, &signed)
}

/// Sign a transaction the wallet will submit itself; every slot must be filled
pub fn sign_for_broadcast(keypair: &Keypair, tx: &VersionedTransaction) -> Result<SignedArtifact> {
    let signed = place_signature(keypair, tx)?;
    let missing = signed
        .signatures
        .iter()
        .filter(|sig| **sig == Signature::default())
        .count();
    if missing > 0 {
        return Err(Error::SignFailed(format!(
            "{} of {} signatures missing; transaction cannot be broadcast",
            missing,
            signed.signatures.len()
        )));
    }
    artifact(keypair, &signed)
}

fn place_signature(keypair: &Keypair, tx: &VersionedTransaction) -> Result<VersionedTransaction> {
    let mut signed = tx.clone();
    let wallet = keypair.pubkey();

    let index = signer_index(&signed.message, &wallet).ok_or_else(|| {
        Error::SignFailed(format!("{} is not a required signer", wallet))
    })?;
    if index >= signed.signatures.len() {
        return Err(Error::SignFailed(format!(
            "signer index {} outside {} signature slots",
            index,
            signed.signatures.len()
        )));
    }

    let message = signed.message.serialize();
    signed.signatures[index] = keypair.sign_message(&message);
    Ok(signed)
}

fn artifact(keypair: &Keypair, signed: &VersionedTransaction) -> Result<SignedArtifact> {
    let raw = bincode::serialize(signed)?;
    // Fee payer signature once present, otherwise the wallet's own
    let signature = match signed.signatures.first() {
        Some(first) if *first != Signature::default() => *first,
        _ => {
            let index = signer_index(&signed.message, &keypair.pubkey()).unwrap_or(0);
            signed.signatures.get(index).copied().unwrap_or_default()
        }
    };

    Ok(SignedArtifact {
        chain: Chain::Solana,
        kind: ArtifactKind::Transaction,
        raw,
        signature: signature.to_string(),
    })
}

/// Detached signature over raw bytes
pub fn sign_message(keypair: &Keypair, message: &[u8]) -> SignedArtifact {
    let signature = keypair.sign_message(message);
    SignedArtifact {
        chain: Chain::Solana,
        kind: ArtifactKind::Message,
        raw: signature.as_ref().to_vec(),
        signature: signature.to_string(),
    }
}
