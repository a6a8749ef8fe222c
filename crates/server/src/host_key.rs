//! Host key policy for outgoing SSH connections.
//!
//! The NAS appliances this talks to usually present self-generated keys that
//! change on firmware reset, so the default is `AcceptAny`: every key is
//! trusted and nothing is remembered. Operators who want verification pin one
//! or more SHA-256 fingerprints (`SHA256:<base64>`, as printed by
//! `ssh-keygen -lf`) with `--host-key-fingerprint`.

use base64::engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD};
use base64::Engine;
use ring::digest::{digest, SHA256};
use russh::keys::PublicKeyBase64;

const FINGERPRINT_PREFIX: &str = "SHA256:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust any presented key (no pinning, no known-hosts store)
    AcceptAny,
    /// Only accept keys whose fingerprint is in the list
    Pinned(Vec<String>),
}

impl HostKeyPolicy {
    /// Build a policy from CLI input. An empty list means `AcceptAny`.
    pub fn from_fingerprints(fingerprints: &[String]) -> Self {
        let pinned: Vec<String> = fingerprints
            .iter()
            .map(|f| normalize(f))
            .filter(|f| !f.is_empty())
            .collect();
        if pinned.is_empty() {
            HostKeyPolicy::AcceptAny
        } else {
            HostKeyPolicy::Pinned(pinned)
        }
    }

    pub fn accepts(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Pinned(pinned) => {
                let candidate = normalize(fingerprint);
                pinned.iter().any(|p| *p == candidate)
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptAny => "accept-any",
            HostKeyPolicy::Pinned(_) => "pinned",
        }
    }
}

/// OpenSSH-style SHA-256 fingerprint of a server key.
pub fn fingerprint(key: &russh::keys::PublicKey) -> String {
    let blob = BASE64.decode(key.public_key_base64()).unwrap_or_default();
    fingerprint_of_blob(&blob)
}

/// Fingerprint of the raw wire-format key blob.
pub fn fingerprint_of_blob(blob: &[u8]) -> String {
    let hash = digest(&SHA256, blob);
    format!("{FINGERPRINT_PREFIX}{}", BASE64_NO_PAD.encode(hash.as_ref()))
}

fn normalize(fingerprint: &str) -> String {
    let trimmed = fingerprint.trim();
    let body = trimmed.strip_prefix(FINGERPRINT_PREFIX).unwrap_or(trimmed);
    let body = body.trim_end_matches('=');
    if body.is_empty() {
        return String::new();
    }
    format!("{FINGERPRINT_PREFIX}{body}")
}
