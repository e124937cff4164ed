//! Emergency backup verification.
//!
//! Order of checks:
//! 1. re-derive the session key from the package timestamp
//! 2. decrypt and compare against SHA-512 of the offered payload
//! 3. the signature must be strictly newer than the stored profile

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use std::fmt;
use std::time::SystemTime;

use crate::exchange::KeyIssuer;
use crate::kdf::timestamp_to_system_time;
use crate::signature::SignaturePackage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Hash mismatch, bad padding, or wrong key
    InvalidSignature,
    /// Signed before the stored profile was last written
    Stale,
    /// Offer could not be decoded
    Malformed,
    /// Character name failed the name policy
    ForbiddenName,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::Stale => "stale",
            Self::Malformed => "malformed",
            Self::ForbiddenName => "forbidden_name",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

pub struct BackupVerifier<'a> {
    issuer: &'a KeyIssuer,
}

impl<'a> BackupVerifier<'a> {
    pub fn new(issuer: &'a KeyIssuer) -> Self {
        Self { issuer }
    }

    /// Check `signature` over `payload`. `stored_modified` is the last-write
    /// time of the profile the server already holds, if any.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: &SignaturePackage,
        stored_modified: Option<SystemTime>,
    ) -> Verdict {
        let expected = Sha512::digest(payload);
        let key = self.issuer.rederive(signature.timestamp);

        match signature.decrypt_hash(&key) {
            Some(hash) if bool::from(hash.as_slice().ct_eq(expected.as_slice())) => {}
            _ => return Verdict::Rejected(RejectReason::InvalidSignature),
        }

        let Some(signed_at) = timestamp_to_system_time(signature.timestamp) else {
            return Verdict::Rejected(RejectReason::Stale);
        };
        match stored_modified {
            Some(modified) if signed_at <= modified => Verdict::Rejected(RejectReason::Stale),
            _ => Verdict::Accepted,
        }
    }
}
