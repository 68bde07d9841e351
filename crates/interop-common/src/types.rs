//! Scalar types of the Backend Interfaces wire format
//!
//! Identifiers are fixed-size byte strings encoded as uppercase hex without a
//! `0x` prefix. Decoding is lenient: a `0x`/`0X` prefix and mixed case are
//! accepted. A value of the wrong length is a malformed message.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{InteropError, Result};

/// Decode a hex string, tolerating a `0x` prefix and mixed case
fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(digits)
        .map_err(|e| InteropError::malformed(format!("invalid {} hex: {}", what, s)).with_source(e))
}

macro_rules! fixed_hex_type {
    ($(#[$meta:meta])* $name:ident, $len:expr, $what:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode_upper(self.0))
            }
        }

        impl FromStr for $name {
            type Err = InteropError;

            fn from_str(s: &str) -> Result<Self> {
                let bytes = decode_hex(s, $what)?;
                let arr: [u8; $len] = bytes.as_slice().try_into().map_err(|_| {
                    InteropError::malformed(format!(
                        "{} must be {} bytes, got {}",
                        $what,
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

fixed_hex_type!(
    /// 64-bit extended unique identifier (DevEUI, JoinEUI, NSID)
    Eui64, 8, "EUI-64"
);

fixed_hex_type!(
    /// 24-bit LoRaWAN network identifier
    NetId, 3, "NetID"
);

fixed_hex_type!(
    /// 32-bit device address
    DevAddr, 4, "DevAddr"
);

fixed_hex_type!(
    /// IEEE organizationally unique identifier, six hex digits
    Oui, 3, "OUI"
);

impl Eui64 {
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn from_u64(v: u64) -> Self {
        Self(v.to_be_bytes())
    }
}

/// Variable-length byte string, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Buffer(pub Vec<u8>);

impl Buffer {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for Buffer {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl FromStr for Buffer {
    type Err = InteropError;

    fn from_str(s: &str) -> Result<Self> {
        decode_hex(s, "buffer").map(Self)
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An EUI-64 prefix: the top `length` bits of `eui`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPrefix", into = "RawPrefix")]
pub struct Eui64Prefix {
    eui: Eui64,
    length: u8,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPrefix {
    prefix: Eui64,
    length: u8,
}

impl TryFrom<RawPrefix> for Eui64Prefix {
    type Error = InteropError;

    fn try_from(raw: RawPrefix) -> Result<Self> {
        Eui64Prefix::new(raw.prefix, raw.length)
    }
}

impl From<Eui64Prefix> for RawPrefix {
    fn from(p: Eui64Prefix) -> Self {
        RawPrefix {
            prefix: p.eui,
            length: p.length,
        }
    }
}

impl Eui64Prefix {
    pub fn new(eui: Eui64, length: u8) -> Result<Self> {
        if length > 64 {
            return Err(InteropError::malformed(format!(
                "EUI-64 prefix length {} exceeds 64 bits",
                length
            )));
        }
        Ok(Self { eui, length })
    }

    pub fn eui(&self) -> Eui64 {
        self.eui
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    fn mask(length: u8) -> u64 {
        if length == 0 {
            0
        } else {
            u64::MAX << (64 - u32::from(length))
        }
    }

    /// Prefix bits with everything past `length` cleared
    pub fn masked_value(&self) -> u64 {
        self.eui.to_u64() & Self::mask(self.length)
    }

    pub fn matches(&self, eui: &Eui64) -> bool {
        let mask = Self::mask(self.length);
        eui.to_u64() & mask == self.eui.to_u64() & mask
    }

    /// Whether some EUI matches both prefixes
    pub fn overlaps(&self, other: &Eui64Prefix) -> bool {
        let mask = Self::mask(self.length.min(other.length));
        self.eui.to_u64() & mask == other.eui.to_u64() & mask
    }
}

impl fmt::Display for Eui64Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.eui, self.length)
    }
}

/// LoRaWAN MAC version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MacVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.0.1")]
    V1_0_1,
    #[serde(rename = "1.0.2")]
    V1_0_2,
    #[serde(rename = "1.0.3")]
    V1_0_3,
    #[serde(rename = "1.0.4")]
    V1_0_4,
    #[serde(rename = "1.1")]
    V1_1,
}

impl MacVersion {
    /// LoRaWAN 1.0.x devices share a single network session key
    pub fn is_legacy(&self) -> bool {
        *self < MacVersion::V1_1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MacVersion::V1_0 => "1.0",
            MacVersion::V1_0_1 => "1.0.1",
            MacVersion::V1_0_2 => "1.0.2",
            MacVersion::V1_0_3 => "1.0.3",
            MacVersion::V1_0_4 => "1.0.4",
            MacVersion::V1_1 => "1.1",
        }
    }
}

impl fmt::Display for MacVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join Accept RX1 delay in seconds, 0..=15
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u8")]
pub struct RxDelay(u8);

impl RxDelay {
    pub const MAX: u8 = 15;

    pub fn new(seconds: u8) -> Result<Self> {
        if seconds > Self::MAX {
            return Err(InteropError::malformed(format!(
                "RxDelay {} out of range (max: {})",
                seconds,
                Self::MAX
            )));
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u64> for RxDelay {
    type Error = InteropError;

    fn try_from(v: u64) -> Result<Self> {
        let seconds = u8::try_from(v)
            .map_err(|_| InteropError::malformed(format!("RxDelay {} out of range", v)))?;
        RxDelay::new(seconds)
    }
}

impl From<RxDelay> for u8 {
    fn from(d: RxDelay) -> Self {
        d.0
    }
}

/// AES-128 session key, possibly wrapped with a key encryption key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawKeyEnvelope", into = "RawKeyEnvelope")]
pub enum KeyEnvelope {
    /// Encrypted key bytes, to be unwrapped with the KEK named by the label
    Wrapped { kek_label: String, encrypted_key: Vec<u8> },
    /// Raw key
    Plain { key: [u8; 16] },
}

#[derive(Serialize, Deserialize)]
struct RawKeyEnvelope {
    #[serde(rename = "KEKLabel", default, skip_serializing_if = "String::is_empty")]
    kek_label: String,
    #[serde(rename = "AESKey")]
    aes_key: Buffer,
}

impl TryFrom<RawKeyEnvelope> for KeyEnvelope {
    type Error = InteropError;

    fn try_from(raw: RawKeyEnvelope) -> Result<Self> {
        if !raw.kek_label.is_empty() {
            return Ok(KeyEnvelope::Wrapped {
                kek_label: raw.kek_label,
                encrypted_key: raw.aes_key.0,
            });
        }
        let key: [u8; 16] = raw.aes_key.0.as_slice().try_into().map_err(|_| {
            InteropError::malformed(format!(
                "plain AES key must be 16 bytes, got {}",
                raw.aes_key.len()
            ))
        })?;
        Ok(KeyEnvelope::Plain { key })
    }
}

impl From<KeyEnvelope> for RawKeyEnvelope {
    fn from(env: KeyEnvelope) -> Self {
        match env {
            KeyEnvelope::Wrapped {
                kek_label,
                encrypted_key,
            } => RawKeyEnvelope {
                kek_label,
                aes_key: Buffer(encrypted_key),
            },
            KeyEnvelope::Plain { key } => RawKeyEnvelope {
                kek_label: String::new(),
                aes_key: Buffer(key.to_vec()),
            },
        }
    }
}

impl KeyEnvelope {
    pub fn kek_label(&self) -> Option<&str> {
        match self {
            KeyEnvelope::Wrapped { kek_label, .. } => Some(kek_label),
            KeyEnvelope::Plain { .. } => None,
        }
    }
}

/// OUI of The Things Industries
pub const TTI_VENDOR_ID: Oui = Oui([0xEC, 0x65, 0x6E]);

/// Vendor-specific header extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVendorExtension", into = "RawVendorExtension")]
pub struct VendorExtension {
    pub vendor_id: Oui,
    pub object: VendorObject,
}

/// Typed view on the extension object, keyed by vendor
#[derive(Debug, Clone, PartialEq)]
pub enum VendorObject {
    Tti(TtiExtension),
    Opaque(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TtiExtension {
    /// Tenant of the home Network Server
    #[serde(rename = "HTenantID", default, skip_serializing_if = "String::is_empty")]
    pub h_tenant_id: String,
    /// Cluster address of the home Network Server
    #[serde(rename = "HNSAddress", default, skip_serializing_if = "String::is_empty")]
    pub h_ns_address: String,
}

impl TtiExtension {
    /// Wire object; empty fields are left out
    fn into_object(self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if !self.h_tenant_id.is_empty() {
            object.insert("HTenantID".to_string(), self.h_tenant_id.into());
        }
        if !self.h_ns_address.is_empty() {
            object.insert("HNSAddress".to_string(), self.h_ns_address.into());
        }
        serde_json::Value::Object(object)
    }
}

#[derive(Serialize, Deserialize)]
struct RawVendorExtension {
    #[serde(rename = "VendorID")]
    vendor_id: Oui,
    #[serde(rename = "Object", default)]
    object: serde_json::Value,
}

impl TryFrom<RawVendorExtension> for VendorExtension {
    type Error = InteropError;

    fn try_from(raw: RawVendorExtension) -> Result<Self> {
        let object = if raw.vendor_id == TTI_VENDOR_ID {
            if raw.object.is_null() {
                VendorObject::Tti(TtiExtension::default())
            } else {
                VendorObject::Tti(serde_json::from_value(raw.object)?)
            }
        } else {
            VendorObject::Opaque(raw.object)
        };
        Ok(VendorExtension {
            vendor_id: raw.vendor_id,
            object,
        })
    }
}

impl From<VendorExtension> for RawVendorExtension {
    fn from(ext: VendorExtension) -> Self {
        let object = match ext.object {
            VendorObject::Tti(tti) => tti.into_object(),
            VendorObject::Opaque(v) => v,
        };
        RawVendorExtension {
            vendor_id: ext.vendor_id,
            object,
        }
    }
}

impl VendorExtension {
    pub fn tti(h_tenant_id: impl Into<String>, h_ns_address: impl Into<String>) -> Self {
        Self {
            vendor_id: TTI_VENDOR_ID,
            object: VendorObject::Tti(TtiExtension {
                h_tenant_id: h_tenant_id.into(),
                h_ns_address: h_ns_address.into(),
            }),
        }
    }
}
