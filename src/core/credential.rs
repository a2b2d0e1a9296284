//! Credential decoding: consent cookies and capability tokens
//!
//! The two credential shapes fail in opposite directions:
//! - A consent cookie that cannot be decoded becomes an empty [`ConsentState`]
//!   (nothing granted beyond the essential default).
//! - A capability token that cannot be decoded is a [`CredentialError`], which the
//!   engine turns into an `InvalidCapability` denial.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest capability token accepted, in bytes of transport encoding
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

/// Longest consent cookie value accepted; longer values decode as empty
pub const MAX_CONSENT_LEN: usize = 4 * 1024;

const PADDING_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PADDING_INDIFFERENT);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PADDING_INDIFFERENT);

/// Why a capability credential was rejected
///
/// Every variant maps to the same `InvalidCapability` outcome; the distinction only
/// shows up in logs.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Capability token is empty")]
    Empty,

    #[error("Capability token exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("Capability token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Capability token is not a valid grant: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Capability grant expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("Capability grant rejected: {0}")]
    Rejected(String),
}

/// Consent categories a caller has explicitly granted
///
/// Absent categories are not granted. Only JSON `true` grants a category; any other
/// value, including the string `"true"`, counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentState {
    categories: BTreeMap<String, bool>,
}

impl ConsentState {
    /// Consent state with nothing granted
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decode a `user-consent` cookie value
    ///
    /// Never fails: anything that is not a percent-encoded JSON object decodes to the
    /// empty state.
    pub fn decode(raw: &str) -> Self {
        if raw.len() > MAX_CONSENT_LEN {
            tracing::debug!("Consent cookie exceeds {} bytes, ignoring", MAX_CONSENT_LEN);
            return Self::empty();
        }

        let decoded = match percent_decode_str(raw).decode_utf8() {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("Consent cookie is not UTF-8 after decoding: {}", e);
                return Self::empty();
            }
        };

        let object: serde_json::Map<String, serde_json::Value> =
            match serde_json::from_str(&decoded) {
                Ok(object) => object,
                Err(e) => {
                    tracing::debug!("Consent cookie is not a JSON object: {}", e);
                    return Self::empty();
                }
            };

        let categories = object
            .into_iter()
            .filter_map(|(category, value)| value.as_bool().map(|granted| (category, granted)))
            .collect();

        ConsentState { categories }
    }

    /// Decode an optional cookie value; a missing cookie is the empty state
    pub fn from_cookie(raw: Option<&str>) -> Self {
        raw.map(Self::decode).unwrap_or_default()
    }

    /// Record a category as granted
    pub fn grant(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into(), true);
        self
    }

    /// Record a category as explicitly withheld
    pub fn withhold(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into(), false);
        self
    }

    /// True if the category was granted
    pub fn is_granted(&self, category: &str) -> bool {
        self.categories.get(category).copied().unwrap_or(false)
    }

    /// Granted categories in name order
    pub fn granted(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(category, _)| category.clone())
            .collect()
    }

    /// Percent-encoded JSON, suitable as a cookie value
    pub fn encode(&self) -> String {
        let json = serde_json::Value::Object(
            self.categories
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::Bool(*v)))
                .collect(),
        );
        utf8_percent_encode(&json.to_string(), NON_ALPHANUMERIC).to_string()
    }
}

/// Claims carried by a capability token
///
/// Transport form: base64 of `{"capabilities": [...], "iat": n, "exp": n?, "issuer": s?}`.
/// Timestamps may carry a fraction; `iat` rounds down and `exp` rounds up, so a grant
/// stays valid for every whole second before its exact expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    /// Granted capabilities
    pub capabilities: Vec<String>,

    /// Issue time, unix seconds
    #[serde(rename = "iat", deserialize_with = "deserialize_issued_at")]
    pub issued_at: i64,

    /// Expiry, unix seconds; `None` never expires
    #[serde(
        rename = "exp",
        default,
        deserialize_with = "deserialize_expires_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<i64>,

    /// Issuing authority, if stated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Whole unix seconds from a JSON number, rounding any fraction with `round`
fn unix_seconds(number: &serde_json::Number, round: fn(f64) -> f64) -> Option<i64> {
    if let Some(seconds) = number.as_i64() {
        return Some(seconds);
    }
    if let Some(seconds) = number.as_u64() {
        return Some(i64::try_from(seconds).unwrap_or(i64::MAX));
    }
    // Float to int casts saturate
    number
        .as_f64()
        .filter(|seconds| seconds.is_finite())
        .map(|seconds| round(seconds) as i64)
}

fn deserialize_issued_at<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    unix_seconds(&number, f64::floor).ok_or_else(|| D::Error::custom("iat out of range"))
}

fn deserialize_expires_at<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    Option::<serde_json::Number>::deserialize(deserializer)?
        .map(|number| {
            unix_seconds(&number, f64::ceil).ok_or_else(|| D::Error::custom("exp out of range"))
        })
        .transpose()
}

impl CapabilityGrant {
    /// Grant issued at `issued_at` with no expiry and no issuer
    pub fn new<I, S>(capabilities: I, issued_at: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CapabilityGrant {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            issued_at,
            expires_at: None,
            issuer: None,
        }
    }

    /// Expire `seconds` after issue
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(self.issued_at.saturating_add(seconds));
        self
    }

    /// Expire at an absolute time
    pub fn expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Name the issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Decode the base64 JSON transport form, without checking expiry
    ///
    /// Accepts the standard and URL-safe alphabets, padded or not.
    pub fn decode(raw: &str) -> Result<Self, CredentialError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CredentialError::Empty);
        }
        if raw.len() > MAX_TOKEN_LEN {
            return Err(CredentialError::TooLong { max: MAX_TOKEN_LEN });
        }

        let bytes = match STANDARD_LENIENT.decode(raw) {
            Ok(bytes) => bytes,
            Err(_) => URL_SAFE_LENIENT.decode(raw)?,
        };

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encode to the unsigned transport form
    pub fn encode(&self) -> Result<String, CredentialError> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD_LENIENT.encode(json))
    }

    /// Expired once `now` reaches `expires_at`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    /// Reject the grant if it has expired at `now`
    pub fn validate_at(self, now: i64) -> Result<Self, CredentialError> {
        match self.expires_at {
            Some(expires_at) if now >= expires_at => Err(CredentialError::Expired { expires_at }),
            _ => Ok(self),
        }
    }

    /// True if the capability is granted, by exact name
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// True if every listed capability is granted
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.has(r))
    }
}

/// Turns a raw capability credential into verified claims
///
/// Expiry is checked by the engine against its own clock reading, so implementations
/// only need to establish that the token is well-formed and authentic.
pub trait CapabilityVerifier: Send + Sync {
    fn verify(&self, raw: &str) -> Result<CapabilityGrant, CredentialError>;
}

impl<V: CapabilityVerifier + ?Sized> CapabilityVerifier for Box<V> {
    fn verify(&self, raw: &str) -> Result<CapabilityGrant, CredentialError> {
        (**self).verify(raw)
    }
}

/// Decodes unsigned base64 JSON tokens
///
/// Performs no authenticity check: anyone can mint a token this verifier accepts.
/// Suitable only where the gateway sits behind a trusted issuer on a closed network.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedTokenVerifier;

impl CapabilityVerifier for UnsignedTokenVerifier {
    fn verify(&self, raw: &str) -> Result<CapabilityGrant, CredentialError> {
        CapabilityGrant::decode(raw)
    }
}

/// Wraps a verifier and only accepts grants from listed issuers
///
/// Grants without an issuer are rejected.
pub struct TrustedIssuers<V> {
    inner: V,
    issuers: Vec<String>,
}

impl<V: CapabilityVerifier> TrustedIssuers<V> {
    pub fn new<I, S>(inner: V, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TrustedIssuers {
            inner,
            issuers: issuers.into_iter().map(Into::into).collect(),
        }
    }
}

impl<V: CapabilityVerifier> CapabilityVerifier for TrustedIssuers<V> {
    fn verify(&self, raw: &str) -> Result<CapabilityGrant, CredentialError> {
        let grant = self.inner.verify(raw)?;
        match grant.issuer.as_deref() {
            Some(issuer) if self.issuers.iter().any(|i| i == issuer) => Ok(grant),
            Some(issuer) => Err(CredentialError::Rejected(format!(
                "issuer '{}' is not trusted",
                issuer
            ))),
            None => Err(CredentialError::Rejected("grant names no issuer".to_string())),
        }
    }
}
