use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Japan,
    Usa,
    Export,
    Korea,
    Australia,
}

#[derive(Debug, Error)]
#[error("unknown cabinet region: {0:?}")]
pub struct ParseRegionError(String);

impl Region {
    fn as_str(self) -> &'static str {
        match self {
            Region::Japan => "japan",
            Region::Usa => "usa",
            Region::Export => "export",
            Region::Korea => "korea",
            Region::Australia => "australia",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ParseRegionError;

    /// `"unknown"` aliases `Japan`, per the source's `REGION_UNKNOWN`
    /// default — documented here rather than modeled as a sixth region.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "japan" | "unknown" => Ok(Region::Japan),
            "usa" => Ok(Region::Usa),
            "export" => Ok(Region::Export),
            "korea" => Ok(Region::Korea),
            "australia" => Ok(Region::Australia),
            other => Err(ParseRegionError(other.to_string())),
        }
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_aliases_japan() {
        assert_eq!(Region::from_str("unknown").unwrap(), Region::Japan);
    }

    #[test]
    fn round_trips_through_yaml() {
        for region in [Region::Japan, Region::Usa, Region::Export, Region::Korea, Region::Australia] {
            let yaml = serde_yaml::to_string(&region).unwrap();
            let parsed: Region = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(parsed, region);
        }
    }

    #[test]
    fn rejects_unknown_region_string() {
        assert!(Region::from_str("mars").is_err());
    }
}
