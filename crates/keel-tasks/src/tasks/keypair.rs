//! Certificates and keys kept in the keystore

use async_trait::async_trait;
use rand::Rng;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use serde::Serialize;
use tracing::info;

use keel_common::{Error, Result};
use keel_secrets::{Keyset, KeysetItem, KeysetType, Keystore};

use crate::changes::Changes;
use crate::context::Context;
use crate::delta::DeltaTask;
use crate::lifecycle::Lifecycle;
use crate::output::Output;
use crate::targets::TerraformTarget;
use crate::task::TaskKey;

/// Kind of [`Keypair`] tasks
pub const KEYPAIR_KIND: &str = "Keypair";

/// CA validity in years
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Leaf certificate validity in years
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// What a keypair is used for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum KeypairType {
    /// Self-signed certificate authority
    #[default]
    Ca,
    /// Client authentication
    Client,
    /// Server authentication
    Server,
}

/// A certificate plus private key stored as a keyset
///
/// CAs are self-signed; other keypairs are signed by the primary item of
/// the `signer` keyset, which must be another keypair task.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Keypair {
    /// Keyset name
    pub name: String,
    /// Subject common name
    pub subject: String,
    /// Certificate usage
    #[serde(rename = "type")]
    pub keypair_type: KeypairType,
    /// Signing keypair, for non-CA types
    pub signer: Option<String>,
    /// DNS names and IP addresses, sorted
    pub alternate_names: Vec<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    /// PEM certificate of the primary item, once known
    #[serde(skip)]
    pub certificate: Output<String>,
}

impl Keypair {
    /// Self-signed CA
    pub fn ca(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            keypair_type: KeypairType::Ca,
            signer: None,
            alternate_names: Vec::new(),
            lifecycle: Lifecycle::Sync,
            certificate: Output::new(),
        }
    }

    /// Certificate signed by `signer`
    pub fn signed(
        name: impl Into<String>,
        subject: impl Into<String>,
        keypair_type: KeypairType,
        signer: impl Into<String>,
        mut alternate_names: Vec<String>,
    ) -> Self {
        alternate_names.sort();
        alternate_names.dedup();
        Self {
            name: name.into(),
            subject: subject.into(),
            keypair_type,
            signer: Some(signer.into()),
            alternate_names,
            lifecycle: Lifecycle::Sync,
            certificate: Output::new(),
        }
    }

    fn params(&self) -> Result<CertificateParams> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(self.subject.clone()));
        params.distinguished_name = dn;

        let years = match self.keypair_type {
            KeypairType::Ca => {
                params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
                params.key_usages = vec![
                    KeyUsagePurpose::KeyCertSign,
                    KeyUsagePurpose::CrlSign,
                    KeyUsagePurpose::DigitalSignature,
                ];
                CA_VALIDITY_YEARS
            }
            KeypairType::Client => {
                params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
                params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
                CERT_VALIDITY_YEARS
            }
            KeypairType::Server => {
                params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyEncipherment,
                ];
                params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
                CERT_VALIDITY_YEARS
            }
        };
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::days(years * 365);

        params.subject_alt_names = self
            .alternate_names
            .iter()
            .map(|name| match name.parse::<std::net::IpAddr>() {
                Ok(ip) => Ok(SanType::IpAddress(ip)),
                Err(_) => Ia5String::try_from(name.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| Error::invalid_field("alternateNames", format!("{name}: {e}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(params)
    }

    /// Shape of the keypair stored in `keyset`, for diffing
    fn from_keyset(&self, keyset: &Keyset) -> Result<Option<Self>> {
        let Some(certificate) = keyset.primary().and_then(|i| i.public_material.clone()) else {
            return Ok(None);
        };
        let parsed = CertificateParams::from_ca_cert_pem(&certificate)
            .map_err(|e| Error::invalid_input(format!("parsing certificate {}: {e}", self.name)))?;

        let subject = match parsed.distinguished_name.get(&DnType::CommonName) {
            Some(DnValue::Utf8String(s)) => s.clone(),
            _ => String::new(),
        };
        let keypair_type = match (&parsed.is_ca, &self.keypair_type) {
            (IsCa::Ca(_), _) => KeypairType::Ca,
            (_, KeypairType::Ca) => KeypairType::Server,
            (_, other) => *other,
        };
        let mut alternate_names: Vec<String> = parsed
            .subject_alt_names
            .iter()
            .filter_map(|san| match san {
                SanType::DnsName(name) => Some(name.as_str().to_string()),
                SanType::IpAddress(ip) => Some(ip.to_string()),
                _ => None,
            })
            .collect();
        alternate_names.sort();

        Ok(Some(Self {
            subject,
            keypair_type,
            alternate_names,
            certificate: Output::with_value(certificate),
            ..self.clone()
        }))
    }

    async fn issue<C>(&self, ctx: &Context<C>) -> Result<()> {
        let keystore = ctx.keystore()?;
        let mut params = self.params()?;
        let serial: u64 = rand::thread_rng().gen_range(1..i64::MAX as u64);
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()));

        let key = KeyPair::generate()
            .map_err(|e| Error::fatal("keypair", format!("generating key for {}: {e}", self.name)))?;
        let certificate = match (&self.keypair_type, &self.signer) {
            (KeypairType::Ca, _) => params.self_signed(&key),
            (_, Some(signer)) => {
                let signer_keyset = keystore
                    .find_keyset(signer)
                    .await?
                    .ok_or_else(|| Error::try_again_later(format!("signer {signer} not yet created")))?;
                let primary = signer_keyset
                    .primary()
                    .ok_or_else(|| Error::try_again_later(format!("signer {signer} has no primary")))?;
                let (Some(ca_cert), Some(ca_key)) = (&primary.public_material, &primary.private_material) else {
                    return Err(Error::invalid_input(format!("signer {signer} has no key material")));
                };
                let ca_key = KeyPair::from_pem(ca_key)
                    .map_err(|e| Error::invalid_input(format!("parsing key of {signer}: {e}")))?;
                let issuer = Issuer::from_ca_cert_pem(ca_cert, &ca_key)
                    .map_err(|e| Error::invalid_input(format!("loading issuer {signer}: {e}")))?;
                params.signed_by(&key, &issuer)
            }
            (_, None) => {
                return Err(Error::required_field(format!("{KEYPAIR_KIND}/{} signer", self.name)));
            }
        }
        .map_err(|e| Error::fatal("keypair", format!("issuing certificate {}: {e}", self.name)))?;

        let pem = certificate.pem();
        let mut keyset = keystore
            .find_keyset(&self.name)
            .await?
            .unwrap_or_else(|| Keyset::empty(&self.name, KeysetType::Keypair));
        keyset.add_item(
            KeysetItem::keypair(serial.to_string(), pem.clone(), key.serialize_pem()),
            true,
        );
        keystore.store_keyset(&keyset).await?;
        self.certificate.set(pem);
        info!(keypair = %self.name, serial, "issued certificate");
        Ok(())
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> DeltaTask<C> for Keypair {
    const KIND: &'static str = KEYPAIR_KIND;

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<TaskKey> {
        self.signer
            .iter()
            .map(|s| TaskKey::new(KEYPAIR_KIND, s.clone()))
            .collect()
    }

    async fn find(&self, ctx: &Context<C>) -> Result<Option<Self>> {
        let Some(keyset) = ctx.keystore()?.find_keyset(&self.name).await? else {
            return Ok(None);
        };
        let actual = self.from_keyset(&keyset)?;
        if let Some(pem) = actual.as_ref().and_then(|a| a.certificate.get()) {
            self.certificate.set(pem);
        }
        Ok(actual)
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        if self.subject.is_empty() {
            return Err(Error::required_field(format!("{KEYPAIR_KIND}/{} subject", self.name)));
        }
        if self.keypair_type != KeypairType::Ca && self.signer.is_none() {
            return Err(Error::required_field(format!("{KEYPAIR_KIND}/{} signer", self.name)));
        }
        Ok(())
    }

    async fn render_api(&self, ctx: &Context<C>, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        self.issue(ctx).await
    }

    async fn render_terraform(
        &self,
        ctx: &Context<C>,
        _target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        self.issue(ctx).await
    }
}
