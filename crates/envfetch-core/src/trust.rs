//! Web-of-trust validation for environment signers.
//!
//! A signer is trusted either directly, by appearing in the
//! creator-trusted keyset with a matching fingerprint, or transitively,
//! through a chain of invitation signatures that terminates at an entry
//! of the creator-trusted keyset. Each link of the chain requires two
//! certifications: the inviter over the invite key, and the invite key
//! over the invited keyable's own key.

use std::collections::HashSet;

use crate::engine::PgpEngine;
use crate::error::{Result, TrustError};
use crate::types::{Keyable, Signer, SignerRole, TrustedKeyables};

/// The trusted keysets extracted from one envelope. `creator` is the
/// root of trust; the other two are the pools a signer may chain through
/// depending on its role.
#[derive(Debug, Clone, Copy)]
pub struct TrustChain<'a> {
    pub creator: &'a TrustedKeyables,
    pub signer: Option<&'a TrustedKeyables>,
    pub overrides: Option<&'a TrustedKeyables>,
}

/// Decide whether the signer's key is trusted under the given chain.
pub fn verify_signer_trusted(
    engine: &dyn PgpEngine,
    signer: &Signer,
    chain: &TrustChain<'_>,
) -> Result<()> {
    if locate(engine, signer, chain.creator)?.is_some() {
        // Direct trust.
        return Ok(());
    }

    let pool = match signer.role {
        SignerRole::Environment => chain.signer,
        SignerRole::Overrides => chain.overrides,
    }
    .ok_or_else(|| TrustError::NotTrusted {
        id: signer.id.clone(),
    })?;

    let keyable = locate(engine, signer, pool)?.ok_or_else(|| TrustError::NotTrusted {
        id: signer.id.clone(),
    })?;

    trusted_root(engine, &signer.id, keyable, pool, chain.creator)?;
    Ok(())
}

/// Look the signer up by id and, if present, require the keyset entry to
/// carry the same primary-key fingerprint the signer declared.
pub fn locate<'a>(
    engine: &dyn PgpEngine,
    signer: &Signer,
    keyables: &'a TrustedKeyables,
) -> Result<Option<&'a Keyable>> {
    let Some(entry) = keyables.get(&signer.id) else {
        return Ok(None);
    };
    let entry_fingerprint = engine.read_public_key(&entry.pubkey)?.fingerprint;
    if entry_fingerprint != signer.fingerprint {
        return Err(TrustError::FingerprintMismatch {
            id: signer.id.clone(),
        }
        .into());
    }
    Ok(Some(entry))
}

/// Walk `invitedById` edges from the subject until an inviter is found in
/// the root keyset, verifying each invitation along the way.
///
/// Returns the ids verified on this walk, in walk order. The list is a
/// pure by-product; nothing downstream consumes it.
pub fn trusted_root(
    engine: &dyn PgpEngine,
    subject_id: &str,
    subject: &Keyable,
    pool: &TrustedKeyables,
    root: &TrustedKeyables,
) -> Result<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(subject_id.to_string());

    let mut newly_verified = Vec::new();
    let mut current_id = subject_id.to_string();
    let mut current = subject;

    loop {
        let inviter_id = current
            .invited_by_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TrustError::MissingInviter {
                id: current_id.clone(),
            })?;

        if !visited.insert(inviter_id.to_string()) {
            return Err(TrustError::CircularChain {
                id: inviter_id.to_string(),
            }
            .into());
        }

        let (inviter, at_root) = match root.get(inviter_id) {
            Some(keyable) => (keyable, true),
            None => match pool.get(inviter_id) {
                Some(keyable) => (keyable, false),
                None => {
                    return Err(TrustError::NoTrustedRoot {
                        id: current_id.clone(),
                    }
                    .into());
                }
            },
        };

        verify_invitation(engine, &current_id, current, inviter)?;
        newly_verified.push(current_id.clone());

        if at_root {
            return Ok(newly_verified);
        }
        current_id = inviter_id.to_string();
        current = inviter;
    }
}

/// The two mandatory signature checks of one invitation link.
fn verify_invitation(
    engine: &dyn PgpEngine,
    id: &str,
    subject: &Keyable,
    inviter: &Keyable,
) -> Result<()> {
    let invite_pubkey = subject
        .invite_pubkey
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| TrustError::MissingInviteKey { id: id.to_string() })?;

    engine
        .verify_key_signed_by(invite_pubkey, &inviter.pubkey)
        .map_err(|_| TrustError::InviteNotSigned { id: id.to_string() })?;
    engine
        .verify_key_signed_by(&subject.pubkey, invite_pubkey)
        .map_err(|_| TrustError::PubkeyNotSigned { id: id.to_string() })?;
    Ok(())
}
