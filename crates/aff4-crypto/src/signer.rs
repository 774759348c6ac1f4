use std::fmt;

use crate::error::{CryptoError, CryptoResult};

/// Ed25519 signing key (private).
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public).
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Parse the hex secret held in a key file.
    pub fn from_hex(text: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected a 32-byte secret".into()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// The corresponding public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message))
    }
}

impl VerifyingKey {
    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Create from raw 32-byte public key.
    pub fn from_bytes(bytes: [u8; 32]) -> CryptoResult<Self> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn from_hex(text: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected a 32-byte public key".into()))?;
        Self::from_bytes(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&arr)))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

/// A minimal certificate: a subject name bound to an Ed25519 public key.
///
/// Text form, one `key=value` per line:
///
/// ```text
/// subject=Examiner 7
/// public_key=3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub subject: String,
    pub public_key: VerifyingKey,
}

impl Certificate {
    pub fn new(subject: impl Into<String>, public_key: VerifyingKey) -> Self {
        Self {
            subject: subject.into(),
            public_key,
        }
    }

    pub fn parse(text: &str) -> CryptoResult<Self> {
        let mut subject = None;
        let mut public_key = None;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| CryptoError::MalformedCertificate(format!("bad line: {line}")))?;
            match key.trim() {
                "subject" => subject = Some(value.trim().to_string()),
                "public_key" => {
                    public_key = Some(VerifyingKey::from_hex(value).map_err(|e| {
                        CryptoError::MalformedCertificate(format!("public_key: {e}"))
                    })?)
                }
                _ => {}
            }
        }
        Ok(Self {
            subject: subject
                .filter(|s| !s.is_empty())
                .ok_or_else(|| CryptoError::MalformedCertificate("missing subject".into()))?,
            public_key: public_key
                .ok_or_else(|| CryptoError::MalformedCertificate("missing public_key".into()))?,
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "subject={}\npublic_key={}\n",
            self.subject,
            self.public_key.to_hex()
        )
    }
}

/// A signing key together with the certificate that names it.
pub struct SigningIdentity {
    key: SigningKey,
    certificate: Certificate,
}

impl SigningIdentity {
    /// Pair a key with its certificate; they must agree on the public key.
    pub fn new(key: SigningKey, certificate: Certificate) -> CryptoResult<Self> {
        if key.verifying_key() != certificate.public_key {
            return Err(CryptoError::MalformedCertificate(format!(
                "certificate for {} does not match the signing key",
                certificate.subject
            )));
        }
        Ok(Self { key, certificate })
    }

    /// Load from the text of a key file and a certificate file.
    pub fn from_texts(key_text: &str, cert_text: &str) -> CryptoResult<Self> {
        Self::new(SigningKey::from_hex(key_text)?, Certificate::parse(cert_text)?)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.certificate.subject)
            .finish_non_exhaustive()
    }
}
