//! Registry entry types.

use crate::crypto::{Identity, SignatureVerifier};
use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::{Host, Url};

/// Maximum length of a full name in bytes.
pub const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single dot-separated label.
const MAX_LABEL_LEN: usize = 63;

/// Type tag of a record attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    /// IP address of the named node
    Ip,
    /// Port of the named node
    Port,
    /// Role marker (`peer`, `bootstrap`, ...)
    Role,
    /// Full endpoint URL
    Endpoint,
    /// Free-form text
    Txt,
}

impl RecordKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Ip => "IP",
            RecordKind::Port => "PORT",
            RecordKind::Role => "ROLE",
            RecordKind::Endpoint => "ENDPOINT",
            RecordKind::Txt => "TXT",
        }
    }
}

/// A typed key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub value: String,
}

impl Record {
    /// Create a record.
    pub fn new(kind: RecordKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Endpoint URL record.
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::new(RecordKind::Endpoint, url)
    }

    /// Role marker record.
    pub fn role(role: impl Into<String>) -> Self {
        Self::new(RecordKind::Role, role)
    }
}

/// A named, owner-signed record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique, dot-namespaced key
    pub name: String,

    /// Owner identity
    pub owner: String,

    /// Ordered typed records
    #[serde(default)]
    pub records: Vec<Record>,

    /// Proof-of-work solution
    pub nonce: u64,

    /// Creation/update time (unix millis)
    pub timestamp: u64,

    /// Absolute expiry (unix millis)
    pub expires: u64,

    /// Hex Ed25519 signature over [`Entry::canonical_bytes`]
    #[serde(default)]
    pub signature: String,

    /// Hex Ed25519 public key
    #[serde(default)]
    pub public_key: String,
}

impl Entry {
    /// Create an unsigned entry.
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        records: Vec<Record>,
        nonce: u64,
        timestamp: u64,
        expires: u64,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            records,
            nonce,
            timestamp,
            expires,
            signature: String::new(),
            public_key: String::new(),
        }
    }

    /// Canonical bytes covered by the signature.
    ///
    /// Compact JSON with sorted keys over every field except the signature.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let records: Vec<Value> = self
            .records
            .iter()
            .map(|r| json!({ "type": r.kind.as_str(), "value": r.value }))
            .collect();

        json!({
            "expires": self.expires,
            "name": self.name,
            "nonce": self.nonce,
            "owner": self.owner,
            "publicKey": self.public_key,
            "records": records,
            "timestamp": self.timestamp,
        })
        .to_string()
        .into_bytes()
    }

    /// Attach the identity's public key and sign.
    pub fn signed_by(mut self, identity: &Identity) -> Self {
        self.public_key = identity.public_key_hex();
        self.signature = identity.sign(&self.canonical_bytes());
        self
    }

    /// Check the signature with the given verifier.
    pub fn verify_signature(&self, verifier: &dyn SignatureVerifier) -> bool {
        verifier.verify(&self.canonical_bytes(), &self.signature, &self.public_key)
    }

    /// Content identifier: Blake3 over canonical bytes, signature and tombstone flag.
    pub fn content_id(&self, tombstone: bool) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.canonical_bytes());
        hasher.update(b"|");
        hasher.update(self.signature.as_bytes());
        hasher.update(b"|");
        hasher.update(&[tombstone as u8]);
        hex::encode(hasher.finalize().as_bytes())
    }

    /// First record value of the given kind.
    pub fn record(&self, kind: RecordKind) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.value.as_str())
    }

    /// All endpoint URLs, in record order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.kind == RecordKind::Endpoint)
            .map(|r| r.value.as_str())
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires <= now
    }

    /// Structural checks that need neither clock nor crypto.
    pub fn validate_shape(&self) -> Result<()> {
        if !validate_name(&self.name) {
            return Err(RegistryError::Malformed(format!("invalid name {:?}", self.name)));
        }
        if self.owner.is_empty() {
            return Err(RegistryError::Malformed("empty owner".into()));
        }
        if self.expires <= self.timestamp {
            return Err(RegistryError::Malformed(format!(
                "expires {} must exceed timestamp {}",
                self.expires, self.timestamp
            )));
        }
        if self.signature.is_empty() || self.public_key.is_empty() {
            return Err(RegistryError::Malformed("entry is not signed".into()));
        }
        Ok(())
    }
}

/// Check a name against the registry grammar: dot-separated labels of
/// ASCII alphanumerics, `-` or `_`, at least two labels.
pub fn validate_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name.contains('.') {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// Split an http(s) endpoint URL into host and port (scheme default when absent).
pub(crate) fn endpoint_host_port(endpoint: &str) -> Option<(String, u16)> {
    let url = Url::parse(endpoint).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = match url.host()? {
        Host::Domain(d) => d.to_string(),
        Host::Ipv4(a) => a.to_string(),
        Host::Ipv6(a) => a.to_string(),
    };
    Some((host, url.port_or_known_default()?))
}
