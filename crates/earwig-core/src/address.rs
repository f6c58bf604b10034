//! Bluetooth device address parsing and canonicalization.
//!
//! Every address entering the system goes through [`DeviceAddress`] exactly
//! once, before any external command is issued. The canonical lowercase form
//! is the unique key of the device registry, so equality and hashing are
//! defined over it.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Six colon-separated 2-hex-digit octets, case-insensitive.
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([0-9a-f]{2}:){5}[0-9a-f]{2}$").expect("address regex is valid")
});

/// A validated Bluetooth device address in canonical lowercase form.
///
/// Immutable once constructed; equality is canonical-string equality, so
/// `"AA:BB:CC:DD:EE:FF"` and `"aa:bb:cc:dd:ee:ff"` parse to equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Parses and canonicalizes an address string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] when the input does not match six
    /// colon-separated hex-octet groups. Fatal, never retried.
    pub fn parse(value: &str) -> Result<Self> {
        if ADDRESS_RE.is_match(value) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidAddress(value.to_string()))
        }
    }

    /// The canonical lowercase representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase, underscore-separated form used in PulseAudio object names
    /// (`bluez_card.AA_BB_CC_DD_EE_FF`).
    #[must_use]
    pub fn pulse_suffix(&self) -> String {
        self.0.to_ascii_uppercase().replace(':', "_")
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

/// Bluetooth addressing mode of a target.
///
/// Closed enumeration; both the numeric controller representation and the
/// persisted name round-trip through the fallible parse functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    /// Classic (non-Low-Energy) radio mode.
    #[default]
    #[serde(rename = "BR_EDR")]
    BrEdr,
    /// Low Energy, public address.
    #[serde(rename = "LE_PUBLIC")]
    LePublic,
    /// Low Energy, random address.
    #[serde(rename = "LE_RANDOM")]
    LeRandom,
}

impl AddressType {
    /// Numeric value passed to `btmgmt -t`.
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            Self::BrEdr => 0,
            Self::LePublic => 1,
            Self::LeRandom => 2,
        }
    }

    /// Parses the numeric controller representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddressType`] for any value outside `0..=2`.
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::BrEdr),
            1 => Ok(Self::LePublic),
            2 => Ok(Self::LeRandom),
            other => Err(Error::InvalidAddressType(other.to_string())),
        }
    }

    /// The persisted name (`BR_EDR`, `LE_PUBLIC`, `LE_RANDOM`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BrEdr => "BR_EDR",
            Self::LePublic => "LE_PUBLIC",
            Self::LeRandom => "LE_RANDOM",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AddressType {
    type Err = Error;

    /// Accepts either the name or the numeric representation.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BR_EDR" => Ok(Self::BrEdr),
            "LE_PUBLIC" => Ok(Self::LePublic),
            "LE_RANDOM" => Ok(Self::LeRandom),
            other => match other.parse::<u8>() {
                Ok(value) => Self::from_value(value),
                Err(_) => Err(Error::InvalidAddressType(s.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_case_input_canonicalizes_to_lowercase() {
        let address = DeviceAddress::parse("AA:bb:CC:dd:EE:ff").unwrap();
        assert_eq!(address.as_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn equality_is_canonical() {
        let upper = DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
        let lower = DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "gg:bb:cc:dd:ee:ff",
            "aabbccddeeff",
            "aa-bb-cc-dd-ee-ff",
            "aa:bb:cc:dd:ee:f",
        ] {
            let err = DeviceAddress::parse(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidAddress(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn pulse_suffix_is_upper_underscored() {
        let address = DeviceAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(address.pulse_suffix(), "AA_BB_CC_DD_EE_FF");
    }

    #[test]
    fn serde_round_trips_canonical_string() {
        let address = DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn address_type_round_trips_numeric_and_name() {
        for ty in [AddressType::BrEdr, AddressType::LePublic, AddressType::LeRandom] {
            assert_eq!(AddressType::from_value(ty.value()).unwrap(), ty);
            assert_eq!(ty.name().parse::<AddressType>().unwrap(), ty);
            assert_eq!(ty.value().to_string().parse::<AddressType>().unwrap(), ty);
        }
    }

    #[test]
    fn address_type_rejects_unknown_values() {
        assert!(matches!(
            AddressType::from_value(3),
            Err(Error::InvalidAddressType(_))
        ));
        assert!(matches!(
            "LE_BOGUS".parse::<AddressType>(),
            Err(Error::InvalidAddressType(_))
        ));
    }

    #[test]
    fn address_type_serde_uses_persisted_names() {
        let json = serde_json::to_string(&AddressType::BrEdr).unwrap();
        assert_eq!(json, "\"BR_EDR\"");
        let back: AddressType = serde_json::from_str("\"LE_RANDOM\"").unwrap();
        assert_eq!(back, AddressType::LeRandom);
    }
}
