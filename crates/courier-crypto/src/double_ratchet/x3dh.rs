//! X3DH key agreement.
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)   only when the bundle carried a one-time pre-key
//! SK  = HKDF(0xFF * 32 || DH1 || DH2 || DH3 [|| DH4])
//! ```
//!
//! Without a one-time pre-key the agreement still succeeds; the first
//! message then lacks one-time forward secrecy and the result is marked
//! `degraded`.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::{
    error::RatchetError,
    kdf::kdf_x3dh,
    keys::{IdentityKeyPair, KeyPair, LocalKeys, PreKeyBundle},
};

/// Initiator data the responder needs to repeat the agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyHeader {
    /// Initiator identity agreement key
    pub identity_dh: [u8; 32],
    /// Initiator ephemeral public key
    pub ephemeral: [u8; 32],
    /// Signed pre-key the initiator used
    pub signed_prekey_id: u32,
    /// One-time pre-key the initiator used, if any
    pub one_time_prekey_id: Option<u32>,
}

/// Result of an agreement on either side.
pub struct Agreement {
    /// Initial root key material
    pub shared_secret: [u8; 32],
    /// Both identities, initiator first; bound into every message
    pub associated_data: [u8; 64],
    /// True when no one-time pre-key took part
    pub degraded: bool,
}

impl Drop for Agreement {
    fn drop(&mut self) {
        self.shared_secret.zeroize();
    }
}

/// Initiator side. Verifies the bundle before any DH is computed.
pub fn initiate(
    identity: &IdentityKeyPair,
    bundle: &PreKeyBundle,
    ephemeral_seed: [u8; 32],
) -> Result<(Agreement, PreKeyHeader), RatchetError> {
    bundle.verify()?;

    let ephemeral = KeyPair::from_seed(ephemeral_seed);
    let mut outputs = vec![
        identity.dh_pair().dh(&bundle.signed_prekey),
        ephemeral.dh(&bundle.identity_dh),
        ephemeral.dh(&bundle.signed_prekey),
    ];
    if let Some((_, one_time)) = &bundle.one_time_prekey {
        outputs.push(ephemeral.dh(one_time));
    }

    let header = PreKeyHeader {
        identity_dh: identity.dh_public(),
        ephemeral: ephemeral.public_bytes(),
        signed_prekey_id: bundle.signed_prekey_id,
        one_time_prekey_id: bundle.one_time_prekey.map(|(id, _)| id),
    };

    let agreement = Agreement {
        shared_secret: kdf_x3dh(&outputs),
        associated_data: associated_data(&identity.dh_public(), &bundle.identity_dh),
        degraded: bundle.one_time_prekey.is_none(),
    };
    Ok((agreement, header))
}

/// Responder side. Reads, but does not consume, the named one-time pre-key;
/// the session consumes it once the first message authenticates.
pub fn respond(local: &LocalKeys, header: &PreKeyHeader) -> Result<Agreement, RatchetError> {
    let signed_id = local.signed_prekey().id();
    if header.signed_prekey_id != signed_id {
        return Err(RatchetError::UnknownSignedPreKey {
            expected: signed_id,
            got: header.signed_prekey_id,
        });
    }

    let signed = local.signed_pair();
    let mut outputs = vec![
        signed.dh(&header.identity_dh),
        local.identity().dh_pair().dh(&header.ephemeral),
        signed.dh(&header.ephemeral),
    ];
    if let Some(id) = header.one_time_prekey_id {
        let one_time =
            local.peek_one_time(id).ok_or(RatchetError::UnknownOneTimePreKey(id))?;
        outputs.push(one_time.dh(&header.ephemeral));
    }

    Ok(Agreement {
        shared_secret: kdf_x3dh(&outputs),
        associated_data: associated_data(&header.identity_dh, &local.identity().dh_public()),
        degraded: header.one_time_prekey_id.is_none(),
    })
}

fn associated_data(initiator: &[u8; 32], responder: &[u8; 32]) -> [u8; 64] {
    let mut ad = [0u8; 64];
    ad[..32].copy_from_slice(initiator);
    ad[32..].copy_from_slice(responder);
    ad
}
