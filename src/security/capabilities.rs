use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Which single-shot executor a capability authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Shell,
    File,
    Web,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Shell => write!(f, "shell"),
            ExecutorKind::File => write!(f, "file"),
            ExecutorKind::Web => write!(f, "web"),
        }
    }
}

/// A single mount exposed to a file/shell executor container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Network policy for a capability: no egress, or an explicit domain allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkPolicy {
    None,
    Allow { allowed_domains: Vec<String> },
}

/// A capability grant: everything one executor invocation is authorized to do.
///
/// Minted fresh per dispatch, never persisted, never exposed to the LLM or
/// bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub executor_kind: ExecutorKind,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    pub network: NetworkPolicy,
    pub timeout_seconds: u64,
    pub max_output_bytes: usize,
}

const ISSUER: &str = "secureclaw-gateway";
/// Buffer added to `timeout_seconds` for token expiry. Exceeds the
/// dispatcher's hard wait so a legitimately-running executor never faces
/// an expired token before the dispatcher itself would have killed it.
const EXPIRY_BUFFER_SECONDS: u64 = 30;

/// Wraps the raw HMAC signing key. Manual `Debug` redacts the key so it can
/// never end up in a log line by accident.
#[derive(Clone)]
pub struct CapabilitySecret(String);

impl CapabilitySecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the raw secret for the one legitimate in-crate use: writing it
    /// into an executor container's environment at dispatch time.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CapabilitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilitySecret(REDACTED)")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    cap: Capability,
    iss: String,
    iat: u64,
    exp: u64,
}

/// Mint a signed, opaque bearer token for the given capability.
pub fn mint(capability: &Capability, secret: &CapabilitySecret) -> Result<String> {
    let iat = now_unix();
    let claims = Claims {
        cap: capability.clone(),
        iss: ISSUER.to_string(),
        iat,
        exp: iat + capability.timeout_seconds + EXPIRY_BUFFER_SECONDS,
    };

    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.0.as_bytes());
    encode(&header, &claims, &key).map_err(|e| CoreError::Auth(format!("mint failed: {e}")))
}

/// Verify and decode a capability token, additionally checking that it
/// authorizes the expected executor kind.
///
/// Any failure here (bad signature, expired, wrong issuer, wrong kind) is
/// fatal to the caller: an executor must exit nonzero before performing any
/// privileged action.
pub fn verify(token: &str, secret: &CapabilitySecret, expected_kind: ExecutorKind) -> Result<Capability> {
    let key = DecodingKey::from_secret(secret.0.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &key, &validation)
        .map_err(|e| CoreError::Auth(format!("verification failed: {e}")))?;

    if data.claims.iss != ISSUER {
        return Err(CoreError::Auth("wrong issuer".to_string()));
    }
    if data.claims.cap.executor_kind != expected_kind {
        return Err(CoreError::Auth(format!(
            "wrong executor kind: token grants {} but {} was expected",
            data.claims.cap.executor_kind, expected_kind
        )));
    }

    Ok(data.claims.cap)
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Does `host` fall under one of `allowed_domains`? A host is allowed if it
/// equals an entry exactly or is a subdomain of one (`api.example.com`
/// matches `example.com`, but `evilexample.com` does not).
pub fn host_allowed(allowed_domains: &[String], host: &str) -> bool {
    allowed_domains
        .iter()
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
}

#[cfg(test)]
mod host_allowed_tests {
    use super::host_allowed;

    #[test]
    fn exact_match_allowed() {
        assert!(host_allowed(&["example.com".to_string()], "example.com"));
    }

    #[test]
    fn subdomain_allowed() {
        assert!(host_allowed(&["example.com".to_string()], "api.example.com"));
    }

    #[test]
    fn lookalike_domain_rejected() {
        assert!(!host_allowed(&["example.com".to_string()], "evilexample.com"));
    }

    #[test]
    fn unrelated_host_rejected() {
        assert!(!host_allowed(&["example.com".to_string()], "evil.com"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_capability(timeout_seconds: u64) -> Capability {
        Capability {
            executor_kind: ExecutorKind::Shell,
            mounts: vec![Mount {
                host_path: "/data/workspace".into(),
                container_path: "/workspace".into(),
                read_only: false,
            }],
            network: NetworkPolicy::None,
            timeout_seconds,
            max_output_bytes: 65536,
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let secret = CapabilitySecret::new("test-secret");
        let cap = shell_capability(30);
        let token = mint(&cap, &secret).unwrap();
        let verified = verify(&token, &secret, ExecutorKind::Shell).unwrap();
        assert_eq!(verified.timeout_seconds, 30);
        assert_eq!(verified.max_output_bytes, 65536);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let cap = shell_capability(30);
        let token = mint(&cap, &CapabilitySecret::new("secret-a")).unwrap();
        let result = verify(&token, &CapabilitySecret::new("secret-b"), ExecutorKind::Shell);
        assert!(result.is_err());
    }

    #[test]
    fn verify_rejects_wrong_executor_kind() {
        let secret = CapabilitySecret::new("test-secret");
        let cap = shell_capability(30);
        let token = mint(&cap, &secret).unwrap();
        let result = verify(&token, &secret, ExecutorKind::Web);
        assert!(matches!(result, Err(CoreError::Auth(_))));
    }

    #[test]
    fn verify_rejects_expired_token() {
        let secret = CapabilitySecret::new("test-secret");
        let mut cap = shell_capability(30);
        // Force iat + timeout + buffer into the past.
        cap.timeout_seconds = 0;
        let claims = Claims {
            cap: cap.clone(),
            iss: ISSUER.to_string(),
            iat: 1,
            exp: 2,
        };
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.0.as_bytes());
        let token = encode(&header, &claims, &key).unwrap();

        let result = verify(&token, &secret, ExecutorKind::Shell);
        assert!(result.is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer() {
        let secret = CapabilitySecret::new("test-secret");
        let cap = shell_capability(30);
        let claims = Claims {
            cap,
            iss: "someone-else".to_string(),
            iat: now_unix(),
            exp: now_unix() + 60,
        };
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.0.as_bytes());
        let token = encode(&header, &claims, &key).unwrap();

        let result = verify(&token, &secret, ExecutorKind::Shell);
        assert!(result.is_err());
    }

    #[test]
    fn capability_secret_debug_is_redacted() {
        let secret = CapabilitySecret::new("super-secret-value");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("REDACTED"));
    }
}
