#![forbid(unsafe_code)]

//! Identity primitives: signed bearer tokens and password hashing.
//!
//! A token is `base64url(claims_json) "." base64url(signature)` where the
//! signature is an Ed25519 detached signature over the exact claims bytes.
//! Tokens expire 24 hours after issue and are not renewable. The signing
//! seed persists as a 32-byte file under the data root so tokens survive
//! restarts.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng as SaltOsRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Payload embedded in every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Not two dot-separated base64url segments carrying JSON claims.
    Malformed,
    /// Well-formed but the signature does not check out.
    BadSignature,
    /// Signature fine, expiry in the past.
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed token"),
            Self::BadSignature => write!(f, "invalid token signature"),
            Self::Expired => write!(f, "token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct TokenSigner {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl TokenSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Loads the signing seed from `path`, generating and persisting a fresh
    /// one on first start.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read(path)
                .with_context(|| format!("reading token key {}", path.display()))?;
            let seed: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow!("token key {} must be exactly 32 bytes", path.display()))?;
            return Ok(Self::from_seed(seed));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let signing = SigningKey::generate(&mut rand_core::OsRng);
        std::fs::write(path, signing.to_bytes())
            .with_context(|| format!("writing token key {}", path.display()))?;
        let verifying = signing.verifying_key();
        Ok(Self { signing, verifying })
    }

    /// Issues a bearer token for `user_id`/`username`, valid 24 hours from
    /// `now` (unix seconds).
    pub fn issue(&self, user_id: i64, username: &str, now: i64) -> String {
        let claims = Claims {
            user_id,
            username: username.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let payload = serde_json::to_vec(&claims).expect("claims serialize");
        let signature = self.signing.sign(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }

    /// Decodes and verifies a token against `now` (unix seconds).
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature_raw = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature =
            Signature::from_slice(&signature_raw).map_err(|_| TokenError::Malformed)?;

        self.verifying
            .verify(&payload, &signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Hashes a password with Argon2id and a fresh random salt, returning the
/// PHC string to store.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut SaltOsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("hashing password: {err}"))?;
    Ok(hash.to_string())
}

/// Checks a password against a stored PHC hash. Unparsable hashes count as
/// a mismatch rather than an error.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Pulls the credential out of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let rest = header.strip_prefix("Bearer ")?;
    let token = rest.trim();
    if token.is_empty() { None } else { Some(token) }
}
