//! DSSE envelopes, signing, and verification.
//!
//! The envelope wire format is `payloadType` + base64 `payload` +
//! `signatures`. Signatures cover the pre-authentication encoding (PAE)
//! of the payload, not the raw bytes, so the payload type is bound into
//! the signature.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{Error, Result};

/// A DSSE envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// base64 of the payload bytes.
    pub payload: String,
    pub payload_type: String,
    pub signatures: Vec<Signature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    /// base64 of the signature bytes.
    pub sig: String,
}

impl Envelope {
    /// Decode the payload bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.payload)
            .map_err(|err| Error::Signing(format!("bad payload encoding: {err}")))
    }
}

/// DSSE pre-authentication encoding:
/// `DSSEv1 <len(type)> <type> <len(body)> <body>`.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// Something that can sign PAE bytes. The pipeline treats signing as
/// remote: implementations may call out to a KMS; the in-process
/// ed25519 signer exists for tests and local runs.
pub trait Signer: Send + Sync {
    fn key_id(&self) -> String;
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// In-process ed25519 signer.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

/// Stable key id: hex sha256 of the raw public key.
fn key_id_of(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl Signer for Ed25519Signer {
    fn key_id(&self) -> String {
        key_id_of(&self.key.verifying_key())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Sign a payload into an envelope.
pub fn sign_envelope(
    signer: &dyn Signer,
    payload_type: &str,
    payload: &[u8],
) -> Result<Envelope> {
    let message = pae(payload_type, payload);
    let sig = signer.sign(&message)?;
    Ok(Envelope {
        payload: BASE64.encode(payload),
        payload_type: payload_type.to_string(),
        signatures: vec![Signature {
            keyid: Some(signer.key_id()),
            sig: BASE64.encode(sig),
        }],
    })
}

/// Verifies envelopes against a configured public key set.
pub struct EnvelopeVerifier {
    keys: Vec<VerifyingKey>,
}

impl EnvelopeVerifier {
    pub fn new(keys: impl IntoIterator<Item = VerifyingKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Verify that every signature on the envelope validates under at
    /// least one configured key, and that at least one signature exists.
    pub fn verify(&self, envelope: &Envelope) -> Result<()> {
        if envelope.signatures.is_empty() {
            return Err(Error::Signing("envelope has no signatures".to_string()));
        }
        let payload = envelope.payload_bytes()?;
        let message = pae(&envelope.payload_type, &payload);
        for signature in &envelope.signatures {
            let bytes = BASE64
                .decode(&signature.sig)
                .map_err(|err| Error::Signing(format!("bad signature encoding: {err}")))?;
            let sig = ed25519_dalek::Signature::from_slice(&bytes)
                .map_err(|err| Error::Signing(format!("bad signature: {err}")))?;
            let valid = self.keys.iter().any(|key| {
                let id_matches = signature
                    .keyid
                    .as_ref()
                    .is_none_or(|keyid| *keyid == key_id_of(key));
                id_matches && key.verify(&message, &sig).is_ok()
            });
            if !valid {
                return Err(Error::Signing(
                    "signature does not verify under configured keys".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    fn signer() -> Ed25519Signer {
        Ed25519Signer::from_bytes(&[7u8; 32])
    }

    #[test]
    fn pae_layout() {
        pretty_assert_eq!(
            pae("application/example", b"hello"),
            b"DSSEv1 19 application/example 5 hello".to_vec()
        );
    }

    #[test]
    fn sign_verify_roundtrip() {
        let signer = signer();
        let envelope =
            sign_envelope(&signer, "application/vnd.in-toto+json", b"{\"x\":1}").unwrap();
        pretty_assert_eq!(envelope.payload_bytes().unwrap(), b"{\"x\":1}".to_vec());

        let verifier = EnvelopeVerifier::new([signer.verifying_key()]);
        verifier.verify(&envelope).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signer = signer();
        let mut envelope =
            sign_envelope(&signer, "application/vnd.in-toto+json", b"{\"x\":1}").unwrap();
        envelope.payload = BASE64.encode(b"{\"x\":2}");

        let verifier = EnvelopeVerifier::new([signer.verifying_key()]);
        assert!(matches!(
            verifier.verify(&envelope),
            Err(Error::Signing(_))
        ));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let envelope =
            sign_envelope(&signer(), "application/vnd.in-toto+json", b"payload").unwrap();
        let other = Ed25519Signer::from_bytes(&[9u8; 32]);
        let verifier = EnvelopeVerifier::new([other.verifying_key()]);
        assert!(verifier.verify(&envelope).is_err());
    }
}
