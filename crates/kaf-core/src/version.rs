//! Kafka release versions and the protocol versions they speak.
//!
//! Releases before 1.0 are written with four components (`0.10.2.0`),
//! later ones with three (`2.8.1`). The configured release caps the request
//! versions the client sends, which matters for brokers too old to answer
//! `ApiVersions`.

use std::fmt;
use std::str::FromStr;

use kafka_protocol::messages::ApiKey;

use crate::error::ConfigError;

/// A Kafka release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KafkaVersion([u16; 4]);

impl KafkaVersion {
    pub const V0_10_0_0: Self = Self([0, 10, 0, 0]);
    pub const V0_10_1_0: Self = Self([0, 10, 1, 0]);
    pub const V0_10_2_0: Self = Self([0, 10, 2, 0]);
    pub const V0_11_0_0: Self = Self([0, 11, 0, 0]);
    pub const V1_0_0_0: Self = Self([1, 0, 0, 0]);
    pub const V1_1_0_0: Self = Self([1, 1, 0, 0]);
    pub const V2_0_0_0: Self = Self([2, 0, 0, 0]);
    pub const V2_1_0_0: Self = Self([2, 1, 0, 0]);
    pub const V2_2_0_0: Self = Self([2, 2, 0, 0]);
    pub const V2_3_0_0: Self = Self([2, 3, 0, 0]);
    pub const V2_4_0_0: Self = Self([2, 4, 0, 0]);
    pub const V2_8_0_0: Self = Self([2, 8, 0, 0]);
    pub const V3_0_0_0: Self = Self([3, 0, 0, 0]);

    /// Version assumed when a cluster does not configure one.
    pub const DEFAULT: Self = Self::V1_1_0_0;

    /// Build a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16, build: u16) -> Self {
        Self([major, minor, patch, build])
    }

    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidVersion`] if the string is not a Kafka version.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidVersion(format!("invalid version `{s}`"));

        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u16>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let version = match parts.as_slice() {
            // 0.x releases carry four components; three are accepted as x.y.z.0.
            [0, minor, patch, build] => Self([0, *minor, *patch, *build]),
            [0, minor, patch] => Self([0, *minor, *patch, 0]),
            [major, minor, patch] if *major >= 1 => Self([*major, *minor, *patch, 0]),
            [major, minor] if *major >= 1 => Self([*major, *minor, 0, 0]),
            _ => return Err(invalid()),
        };

        if version.0[0] == 0 && version.0[1] < 8 {
            return Err(invalid());
        }
        Ok(version)
    }

    /// Whether brokers of this release answer `ApiVersions`.
    #[must_use]
    pub fn supports_api_versions(&self) -> bool {
        *self >= Self::V0_10_0_0
    }

    /// Whether brokers of this release support `SaslAuthenticate`.
    #[must_use]
    pub fn supports_sasl_authenticate(&self) -> bool {
        *self >= Self::V1_0_0_0
    }

    /// Highest request version of `api_key` a broker of this release accepts.
    ///
    /// Returns `None` if the API does not exist in this release. APIs the
    /// client never sends are not capped.
    #[must_use]
    pub fn max_api_version(&self, api_key: ApiKey) -> Option<i16> {
        let table: &[(KafkaVersion, i16)] = match api_key {
            ApiKey::ApiVersionsKey => &[
                (Self::V0_10_0_0, 0),
                (Self::V0_11_0_0, 1),
                (Self::V2_0_0_0, 2),
                (Self::V2_4_0_0, 3),
            ],
            ApiKey::MetadataKey => &[
                (Self::new(0, 8, 0, 0), 0),
                (Self::V0_10_0_0, 1),
                (Self::V0_10_1_0, 2),
                (Self::V0_11_0_0, 4),
                (Self::V1_0_0_0, 5),
                (Self::V2_0_0_0, 6),
                (Self::V2_1_0_0, 7),
                (Self::V2_3_0_0, 8),
                (Self::V2_4_0_0, 9),
                (Self::V2_8_0_0, 11),
                (Self::V3_0_0_0, 12),
            ],
            ApiKey::ListOffsetsKey => &[
                (Self::new(0, 8, 0, 0), 0),
                (Self::V0_10_1_0, 1),
                (Self::V0_11_0_0, 2),
                (Self::V2_0_0_0, 3),
                (Self::V2_1_0_0, 4),
                (Self::V2_2_0_0, 5),
            ],
            ApiKey::SaslHandshakeKey => &[(Self::V0_10_0_0, 0), (Self::V1_0_0_0, 1)],
            ApiKey::SaslAuthenticateKey => &[
                (Self::V1_0_0_0, 0),
                (Self::V2_0_0_0, 1),
                (Self::V2_4_0_0, 2),
            ],
            ApiKey::CreateTopicsKey => &[
                (Self::V0_10_1_0, 0),
                (Self::V0_10_2_0, 1),
                (Self::V0_11_0_0, 2),
                (Self::V2_0_0_0, 3),
                (Self::V2_4_0_0, 5),
            ],
            ApiKey::DeleteTopicsKey => &[
                (Self::V0_10_1_0, 0),
                (Self::V0_11_0_0, 1),
                (Self::V2_0_0_0, 2),
                (Self::V2_1_0_0, 3),
                (Self::V2_4_0_0, 4),
            ],
            _ => return Some(i16::MAX),
        };

        table
            .iter()
            .rev()
            .find(|(since, _)| self >= since)
            .map(|(_, max)| *max)
    }
}

impl Default for KafkaVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for KafkaVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, build] = self.0;
        if major == 0 {
            write!(f, "{major}.{minor}.{patch}.{build}")
        } else {
            write!(f, "{major}.{minor}.{patch}")
        }
    }
}
