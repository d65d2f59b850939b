//! Serving-certificate operations
//!
//! The proxy terminates TLS with a certificate signed by the deployment's
//! serving CA. Issuance policy lives outside this process; this module only
//! mints the proxy's own serving cert from CA material handed to it.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;

/// Validity of minted serving certificates, in days.
const CERT_VALIDITY_DAYS: i64 = 365;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// CA material could not be parsed
    #[error("failed to parse CA material: {0}")]
    Parse(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

fn validity_window(days: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(days))
}

/// A serving CA held as PEM blobs.
#[derive(Clone, Debug)]
pub struct ServingCa {
    ca_cert_pem: String,
    ca_key_pem: String,
}

impl ServingCa {
    /// Create a new self-signed serving CA. Deployments normally load an
    /// existing CA with [`ServingCa::from_pem`]; this is for harnesses.
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = validity_window(10 * 365);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to create CA cert: {e}"))
        })?;

        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem: key_pair.serialize_pem(),
        })
    }

    /// Load a CA from PEM blobs, validating that both parse.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to parse CA key: {e}")))?;

        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: key_pem.to_string(),
        })
    }

    /// The CA certificate PEM, for distribution to clients.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Mint a TLS serving certificate for the given SANs, signed by this
    /// CA. DNS names and IP addresses are both accepted.
    ///
    /// Returns `(cert_pem, key_pem)`.
    pub fn make_server_cert(&self, sans: &[&str]) -> Result<(String, String)> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("weft-front-proxy".to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = validity_window(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = sans
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.to_string())
                        .map(SanType::DnsName)
                        .map_err(|e| {
                            PkiError::CertificateGeneration(format!(
                                "invalid DNS name '{san}': {e}"
                            ))
                        })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let server_key = KeyPair::generate()
            .map_err(|e| PkiError::KeyGeneration(format!("failed to generate server key: {e}")))?;

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::Parse(format!("failed to load CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::Parse(format!("failed to create issuer: {e}")))?;

        let cert = params.signed_by(&server_key, &issuer).map_err(|e| {
            PkiError::CertificateGeneration(format!("failed to sign server cert: {e}"))
        })?;

        Ok((cert.pem(), server_key.serialize_pem()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_creation_produces_pem() {
        let ca = ServingCa::new("weft serving CA").unwrap();
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_server_cert_for_dns_and_ip_sans() {
        let ca = ServingCa::new("weft serving CA").unwrap();
        let (cert_pem, key_pem) = ca.make_server_cert(&["localhost", "192.168.1.10"]).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_ca_round_trips_through_pem() {
        let ca = ServingCa::new("weft serving CA").unwrap();
        let reloaded = ServingCa::from_pem(&ca.ca_cert_pem, &ca.ca_key_pem).unwrap();
        let (cert_pem, _) = reloaded.make_server_cert(&["localhost"]).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let err = ServingCa::from_pem("not a cert", "not a key").unwrap_err();
        assert!(matches!(err, PkiError::Parse(_)));
    }
}
