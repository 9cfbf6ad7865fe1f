//! Certificates, public keys and TA signature verification
//!
//! Vendors disagree on how TAs are signed, so verification tries a list of
//! [`SignatureScheme`]s in order and reports the first one that matches.
//! The exhaustive list covers SHA-224, SHA-256, SHA-384 and SHA-512, each with
//! PKCS#1 v1.5 padding first and PSS second. TEEGRIS images are only ever
//! checked against SHA-256 ([`verify_canonical`]).
//!
//! A failed check is `false`, never an error.

use core::convert::TryFrom;
use core::fmt;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use enum_iterator::Sequence;
use rsa::{
    pkcs1::DecodeRsaPublicKey as _,
    pkcs8::DecodePublicKey as _,
    PaddingScheme, PublicKey as _, PublicKeyParts as _, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use x509_parser::{certificate::X509Certificate, prelude::FromDer as _};

use crate::util::{format_bytes, hex_serialize};

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Sequence, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn digest(&self, message: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha224 => sha2::Sha224::digest(message).to_vec(),
            HashAlgorithm::Sha256 => sha2::Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(message).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(message).to_vec(),
        }
    }

    fn rsa_hash(&self) -> rsa::Hash {
        match self {
            HashAlgorithm::Sha224 => rsa::Hash::SHA2_224,
            HashAlgorithm::Sha256 => rsa::Hash::SHA2_256,
            HashAlgorithm::Sha384 => rsa::Hash::SHA2_384,
            HashAlgorithm::Sha512 => rsa::Hash::SHA2_512,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Sequence, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Padding {
    Pkcs1v15,
    Pss,
}

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignatureScheme {
    pub hash: HashAlgorithm,
    pub padding: Padding,
}

impl SignatureScheme {
    pub const CANONICAL: [SignatureScheme; 2] = [
        SignatureScheme { hash: HashAlgorithm::Sha256, padding: Padding::Pkcs1v15 },
        SignatureScheme { hash: HashAlgorithm::Sha256, padding: Padding::Pss },
    ];

    /// Every hash with every padding, hashes outermost.
    pub fn exhaustive() -> Vec<SignatureScheme> {
        enum_iterator::all::<HashAlgorithm>()
            .flat_map(|hash| enum_iterator::all::<Padding>().map(move |padding| SignatureScheme { hash, padding }))
            .collect()
    }

    pub fn padding_scheme(&self) -> PaddingScheme {
        use rand::rngs::OsRng;
        match (self.padding, self.hash) {
            (Padding::Pkcs1v15, hash) => PaddingScheme::new_pkcs1v15_sign(Some(hash.rsa_hash())),
            (Padding::Pss, HashAlgorithm::Sha224) => PaddingScheme::new_pss::<sha2::Sha224, _>(OsRng),
            (Padding::Pss, HashAlgorithm::Sha256) => PaddingScheme::new_pss::<sha2::Sha256, _>(OsRng),
            (Padding::Pss, HashAlgorithm::Sha384) => PaddingScheme::new_pss::<sha2::Sha384, _>(OsRng),
            (Padding::Pss, HashAlgorithm::Sha512) => PaddingScheme::new_pss::<sha2::Sha512, _>(OsRng),
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let padding = match self.padding {
            Padding::Pkcs1v15 => "PKCS#1 v1.5",
            Padding::Pss => "PSS",
        };
        let hash = match self.hash {
            HashAlgorithm::Sha224 => "SHA-224",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        write!(f, "{} / {}", hash, padding)
    }
}

#[derive(Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Sha256Hash(#[serde(serialize_with = "hex_serialize")] pub [u8; 32]);

impl Sha256Hash {
    pub fn of(data: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&sha2::Sha256::digest(data));
        Sha256Hash(hash)
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_bytes(&self.0, f)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An RSA public key
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKey(pub RsaPublicKey);

impl PublicKey {
    /// Loads a key from an X.509 certificate, a SubjectPublicKeyInfo or a PKCS#1 key,
    /// each either DER or PEM encoded.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match pem::parse(bytes) {
            Ok(pem) => {
                trace!("PEM block {:?}", pem.tag);
                Self::from_der(&pem.contents)
            }
            Err(_) => Self::from_der(bytes),
        }
    }

    fn from_der(der: &[u8]) -> Result<Self> {
        if let Ok(certificate) = Certificate::try_from_der(der) {
            return certificate
                .public_key()
                .cloned()
                .ok_or_else(|| anyhow!("certificate does not carry an RSA key"));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(PublicKey(key));
        }
        RsaPublicKey::from_pkcs1_der(der)
            .map(PublicKey)
            .map_err(|e| anyhow!("no RSA public key found: {}", e))
    }

    /// SHA256 over the big endian modulus followed by the big endian exponent
    pub fn fingerprint(&self) -> Sha256Hash {
        let n = self.0.n();
        let e = self.0.e();
        trace!("n = {}, e = {}", n, e);

        let mut hasher = sha2::Sha256::new();
        hasher.update(n.to_bytes_be());
        hasher.update(e.to_bytes_be());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Sha256Hash(hash)
    }

    /// First scheme of `schemes` under which `signature` is valid for `message`.
    pub fn verify_scheme(
        &self,
        message: &[u8],
        signature: &[u8],
        schemes: &[SignatureScheme],
    ) -> Option<SignatureScheme> {
        schemes.iter().copied().find(|scheme| {
            let hashed = scheme.hash.digest(message);
            match self.0.verify(scheme.padding_scheme(), &hashed, signature) {
                Ok(()) => true,
                Err(e) => {
                    trace!("{}: {}", scheme, e);
                    false
                }
            }
        })
    }
}

/// Summary of a certificate for reports
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: Option<NaiveDateTime>,
    pub not_after: Option<NaiveDateTime>,
    pub sha256: Sha256Hash,
}

/// A parsed X.509 certificate.
///
/// Everything reports need is extracted while parsing; only the DER is kept.
#[derive(Clone, Debug)]
pub struct Certificate {
    der: Vec<u8>,
    info: CertificateInfo,
    organizational_units: Vec<String>,
    public_key: Option<PublicKey>,
}

impl Certificate {
    /// Parses the certificate at the start of `der`. Trailing bytes are ignored.
    pub fn try_from_der(der: &[u8]) -> Result<Self> {
        let (rest, certificate) = X509Certificate::from_der(der)?;
        let der = &der[..der.len() - rest.len()];

        let spki = certificate.public_key();
        trace!("alg: {:?}", spki.algorithm.algorithm);
        let public_key = if spki.algorithm.algorithm == oid_registry::OID_PKCS1_RSAENCRYPTION {
            RsaPublicKey::from_pkcs1_der(&spki.subject_public_key.data).ok().map(PublicKey)
        } else {
            None
        };

        let organizational_units = certificate
            .subject()
            .iter_organizational_unit()
            .filter_map(|attribute| attribute.as_str().ok())
            .map(String::from)
            .collect();

        let validity = certificate.validity();
        let info = CertificateInfo {
            subject: certificate.subject().to_string(),
            issuer: certificate.issuer().to_string(),
            serial: certificate.raw_serial_as_string(),
            not_before: NaiveDateTime::from_timestamp_opt(validity.not_before.timestamp(), 0),
            not_after: NaiveDateTime::from_timestamp_opt(validity.not_after.timestamp(), 0),
            sha256: Sha256Hash::of(der),
        };

        Ok(Self { der: Vec::from(der), info, organizational_units, public_key })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// Subject OU attribute values, in certificate order.
    pub fn organizational_units(&self) -> &[String] {
        &self.organizational_units
    }

    /// `None` if the key is not RSA.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn fingerprint(&self) -> Sha256Hash {
        self.info.sha256
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = anyhow::Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        match pem::parse(bytes) {
            Ok(pem) => Certificate::try_from_der(&pem.contents),
            Err(_) => Certificate::try_from_der(bytes),
        }
    }
}

/// Checks `signature` over `message` against the key in `certificate` with `schemes`.
pub fn verify_scheme(
    message: &[u8],
    certificate: &[u8],
    signature: &[u8],
    schemes: &[SignatureScheme],
) -> Option<SignatureScheme> {
    let key = match PublicKey::from_bytes(certificate) {
        Ok(key) => key,
        Err(e) => {
            debug!("no usable public key: {}", e);
            return None;
        }
    };
    let scheme = key.verify_scheme(message, signature, schemes);
    debug!("signature scheme: {:?}", scheme);
    scheme
}

/// Tries all hash and padding combinations.
pub fn verify(message: &[u8], certificate: &[u8], signature: &[u8]) -> bool {
    verify_scheme(message, certificate, signature, &SignatureScheme::exhaustive()).is_some()
}

/// SHA-256 only, PKCS#1 v1.5 then PSS.
pub fn verify_canonical(message: &[u8], certificate: &[u8], signature: &[u8]) -> bool {
    verify_scheme(message, certificate, signature, &SignatureScheme::CANONICAL).is_some()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use rsa::{pkcs1::DecodeRsaPrivateKey as _, RsaPrivateKey};

    pub(crate) const SIGNING_KEY: &str = include_str!("../tests/data/signing-key.pem");
    pub(crate) const CERTIFICATE: &[u8] = include_bytes!("../tests/data/ta-signer.der");

    pub(crate) fn sign(message: &[u8], scheme: SignatureScheme) -> Vec<u8> {
        let key = RsaPrivateKey::from_pkcs1_pem(SIGNING_KEY).unwrap();
        let hashed = scheme.hash.digest(message);
        key.sign(scheme.padding_scheme(), &hashed).unwrap()
    }

    #[test]
    fn exhaustive_order() {
        let schemes = SignatureScheme::exhaustive();
        assert_eq!(schemes.len(), 8);
        assert_eq!(schemes[0], SignatureScheme { hash: HashAlgorithm::Sha224, padding: Padding::Pkcs1v15 });
        assert_eq!(schemes[1], SignatureScheme { hash: HashAlgorithm::Sha224, padding: Padding::Pss });
        assert_eq!(schemes[7], SignatureScheme { hash: HashAlgorithm::Sha512, padding: Padding::Pss });
        assert_eq!(&schemes[2..4], &SignatureScheme::CANONICAL[..]);
    }

    #[test]
    fn pkcs1v15_sha256() {
        let message = b"trusted application payload";
        let signature = sign(message, SignatureScheme::CANONICAL[0]);
        assert!(verify(message, CERTIFICATE, &signature));
        assert!(verify_canonical(message, CERTIFICATE, &signature));

        let mut tampered = message.to_vec();
        tampered[3] ^= 1;
        assert!(!verify(&tampered, CERTIFICATE, &signature));

        let mut signature = signature;
        signature[100] ^= 0x80;
        assert!(!verify(message, CERTIFICATE, &signature));
    }

    #[test]
    fn pss_and_other_hashes() {
        let message = b"another payload";
        let pss = SignatureScheme { hash: HashAlgorithm::Sha256, padding: Padding::Pss };
        let signature = sign(message, pss);
        assert_eq!(
            verify_scheme(message, CERTIFICATE, &signature, &SignatureScheme::exhaustive()),
            Some(pss),
        );

        let sha384 = SignatureScheme { hash: HashAlgorithm::Sha384, padding: Padding::Pkcs1v15 };
        let signature = sign(message, sha384);
        assert!(verify(message, CERTIFICATE, &signature));
        // the canonical path never tries SHA-384
        assert!(!verify_canonical(message, CERTIFICATE, &signature));
    }

    #[test]
    fn unusable_certificate_is_false() {
        assert!(!verify(b"message", b"not a certificate", &[0u8; 256]));
        assert!(!verify(b"message", CERTIFICATE, &[]));
    }

    #[test]
    fn key_encodings() {
        let certificate = Certificate::try_from_der(CERTIFICATE).unwrap();
        assert_eq!(certificate.der().len(), CERTIFICATE.len());
        assert!(certificate.info().subject.contains("TA Signer"));
        assert_eq!(certificate.fingerprint(), Sha256Hash::of(CERTIFICATE));

        let from_certificate = certificate.public_key().unwrap().clone();
        let private = RsaPrivateKey::from_pkcs1_pem(SIGNING_KEY).unwrap();
        assert_eq!(from_certificate, PublicKey(private.to_public_key()));

        let pem = pem::encode(&pem::Pem { tag: "CERTIFICATE".to_string(), contents: CERTIFICATE.to_vec() });
        let from_pem = PublicKey::from_bytes(pem.as_bytes()).unwrap();
        assert_eq!(from_pem.fingerprint(), from_certificate.fingerprint());
    }

    #[test]
    fn trailing_bytes_after_certificate() {
        let mut bytes = CERTIFICATE.to_vec();
        bytes.extend_from_slice(b"trailing junk");
        let certificate = Certificate::try_from_der(&bytes).unwrap();
        assert_eq!(certificate.der(), CERTIFICATE);
    }
}
