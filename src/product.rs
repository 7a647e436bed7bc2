use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// GEDI products distributed by the LP.DAAC archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Product {
    #[serde(rename = "GEDI01_B")]
    #[value(name = "GEDI01_B")]
    Gedi01B,
    #[serde(rename = "GEDI02_A")]
    #[value(name = "GEDI02_A")]
    Gedi02A,
    #[serde(rename = "GEDI02_B")]
    #[value(name = "GEDI02_B")]
    Gedi02B,
}

impl Product {
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Gedi01B => "GEDI01_B",
            Self::Gedi02A => "GEDI02_A",
            Self::Gedi02B => "GEDI02_B",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Gedi01B => "Level 1B Geolocated Waveforms",
            Self::Gedi02A => "Level 2A Elevation and Height Metrics",
            Self::Gedi02B => "Level 2B Canopy Cover and Vertical Profile Metrics",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
