//! Signing identities and the statements they write into volumes.
//!
//! When a volume closes, each registered identity signs a statement listing
//! the hash of every stream stored in it. A statement is two members: the
//! text, one `{subject} aff4:hash={hex}` line per stream, and `{statement}.sig`
//! holding the Ed25519 signature. Loading a volume verifies statements
//! against the certificate stored with the identity and seals the attested
//! hashes so later properties cannot override them.

use aff4_crypto::{Certificate, Signature, SigningIdentity};
use aff4_store::TripleStore;
use aff4_types::predicates::{self, CERTIFICATE, COMMON_NAME, HASH, STATEMENT, STORED, TYPE};
use aff4_types::{Urn, Value};
use tracing::{debug, warn};

use crate::error::{Aff4Error, Aff4Result};
use crate::resolver::Resolver;

const IDENTITY_PREFIX: &str = "aff4://identity/";
const SIGNATURE_SUFFIX: &str = ".sig";

/// A signed statement ready to be stored.
#[derive(Debug, Clone)]
pub struct Statement {
    pub urn: Urn,
    pub text: String,
    pub signature: Vec<u8>,
}

/// An identity known to the resolver. Identities loaded from volumes only
/// verify; registered ones also sign.
pub struct Identity {
    urn: Urn,
    certificate: Certificate,
    signer: Option<SigningIdentity>,
}

impl Identity {
    /// Record a signing identity in the store.
    pub(crate) fn register(resolver: &Resolver, signer: SigningIdentity) -> Aff4Result<Self> {
        let certificate = signer.certificate().clone();
        let urn = identity_urn(&certificate);
        resolver.set(&urn, TYPE, predicates::TYPE_IDENTITY)?;
        resolver.set(&urn, COMMON_NAME, certificate.subject.as_str())?;
        resolver.set(&urn, CERTIFICATE, certificate.to_text().into_bytes())?;
        Ok(Self {
            urn,
            certificate,
            signer: Some(signer),
        })
    }

    /// An identity described by stored attributes.
    pub(crate) fn open(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        Ok(Self {
            urn: urn.clone(),
            certificate: certificate_of(resolver, urn)?,
            signer: None,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    /// Sign the hashes of every stream stored in `volume`.
    ///
    /// Returns `None` when this identity cannot sign or there is nothing
    /// to attest.
    pub fn statement(&self, resolver: &Resolver, volume: &Urn) -> Aff4Result<Option<Statement>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let store = resolver.store();
        let mut lines: Vec<String> = store
            .query(None, Some(HASH), None)
            .into_iter()
            .filter(|t| t.predicate == HASH)
            .filter(|t| store.resolve_urns(&t.subject, STORED).contains(volume))
            .filter_map(|t| {
                let hash = t.value.as_str()?.to_string();
                Some(format!("{} {}={}", t.subject, HASH, hash))
            })
            .collect();
        if lines.is_empty() {
            return Ok(None);
        }
        lines.sort();
        let mut text = lines.join("\n");
        text.push('\n');

        let urn = self.urn.join(&uuid::Uuid::new_v4().to_string());
        let signature = signer.sign(text.as_bytes()).to_bytes().to_vec();
        resolver.add_unique(&self.urn, STATEMENT, &urn)?;
        resolver.add_unique(&self.urn, STORED, volume)?;
        debug!(identity = %self.urn, statement = %urn, subjects = lines.len(), "signed statement");
        Ok(Some(Statement {
            urn,
            text,
            signature,
        }))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("urn", &self.urn)
            .field("subject", &self.certificate.subject)
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

/// `aff4://identity/<public key hex>`.
pub fn identity_urn(certificate: &Certificate) -> Urn {
    Urn::new(format!("{IDENTITY_PREFIX}{}", certificate.public_key.to_hex()))
}

/// The certificate stored for `identity`.
pub fn certificate_of(resolver: &Resolver, identity: &Urn) -> Aff4Result<Certificate> {
    let bytes = resolver.store().resolve_bytes(identity, CERTIFICATE)?;
    let certificate = Certificate::parse(&String::from_utf8_lossy(&bytes))?;
    if identity_urn(&certificate) != *identity {
        return Err(Aff4Error::Integrity {
            subject: identity.to_string(),
            reason: "certificate key does not match the identity".into(),
        });
    }
    Ok(certificate)
}

/// The member holding the signature of `statement`.
pub fn signature_urn(statement: &Urn) -> Urn {
    Urn::new(format!("{statement}{SIGNATURE_SUFFIX}"))
}

/// Parse statement text into (subject, hash) pairs.
pub fn parse_statement(text: &str) -> Aff4Result<Vec<(Urn, String)>> {
    let prefix = format!("{HASH}=");
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            line.split_once(' ')
                .and_then(|(subject, rest)| {
                    let hash = rest.trim().strip_prefix(&prefix)?;
                    Some((Urn::from(subject), hash.to_string()))
                })
                .ok_or_else(|| Aff4Error::CorruptArchive(format!("bad statement line: {line}")))
        })
        .collect()
}

/// Check `signature` over `text` and return the attested pairs.
pub fn verify_statement(
    certificate: &Certificate,
    text: &[u8],
    signature: &[u8],
) -> Aff4Result<Vec<(Urn, String)>> {
    let integrity = |reason: String| Aff4Error::Integrity {
        subject: certificate.subject.clone(),
        reason,
    };
    let signature = Signature::from_slice(signature).map_err(|e| integrity(e.to_string()))?;
    certificate
        .public_key
        .verify(text, &signature)
        .map_err(|e| integrity(e.to_string()))?;
    let text = std::str::from_utf8(text).map_err(|e| integrity(e.to_string()))?;
    parse_statement(text)
}

/// Pin `subject`'s hash to an attested value.
pub(crate) fn seal_hash(resolver: &Resolver, subject: &Urn, hash: &str) {
    let store = resolver.store();
    if store.is_sealed(subject, HASH) {
        let current = store.resolve_string(subject, HASH).unwrap_or_default();
        if current != hash {
            warn!(%subject, sealed = %current, attested = hash, "conflicting attested hashes");
        }
        return;
    }
    if let Err(e) = store.set(subject, HASH, Value::String(hash.to_string())) {
        warn!(%subject, error = %e, "could not record attested hash");
        return;
    }
    store.seal(subject, HASH);
}
