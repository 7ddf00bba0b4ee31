//! School records as read from the dataset.
//!
//! Field names follow the dataset's camelCase JSON. Everything beyond
//! `name`, `tier`, `location` and the acceptance rates is opaque display data
//! that only the popup formatter looks at.

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

/// A longitude/latitude pair, stored as `[lng, lat]` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub lng: f64,
    pub lat: f64,
}

impl Coordinate {
    /// `(0, 0)` stands for "no real coordinate". A genuine point on the
    /// equator at the prime meridian is indistinguishable from it.
    pub const UNSET: Coordinate = Coordinate { lng: 0.0, lat: 0.0 };

    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_unset(&self) -> bool {
        self.lng == 0.0 && self.lat == 0.0
    }

    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && self.lng.abs() <= 180.0
            && self.lat.abs() <= 90.0
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([lng, lat]: [f64; 2]) -> Self {
        Self { lng, lat }
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(c: Coordinate) -> Self {
        [c.lng, c.lat]
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lng, self.lat)
    }
}

/// Ranking tier. Any label outside the eight known ones is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tier {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    Eighth,
    Unknown(String),
}

impl Tier {
    pub const ALL: [Tier; 8] = [
        Tier::First,
        Tier::Second,
        Tier::Third,
        Tier::Fourth,
        Tier::Fifth,
        Tier::Sixth,
        Tier::Seventh,
        Tier::Eighth,
    ];

    pub fn label(&self) -> &str {
        match self {
            Tier::First => "第一梯队",
            Tier::Second => "第二梯队",
            Tier::Third => "第三梯队",
            Tier::Fourth => "第四梯队",
            Tier::Fifth => "第五梯队",
            Tier::Sixth => "第六梯队",
            Tier::Seventh => "第七梯队",
            Tier::Eighth => "第八梯队",
            Tier::Unknown(label) => label,
        }
    }
}

impl From<&str> for Tier {
    fn from(label: &str) -> Self {
        Tier::ALL
            .into_iter()
            .find(|t| t.label() == label)
            .unwrap_or_else(|| Tier::Unknown(label.to_string()))
    }
}

impl From<String> for Tier {
    fn from(label: String) -> Self {
        Tier::from(label.as_str())
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> Self {
        tier.label().to_string()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default)]
    pub advantages: Option<String>,
    #[serde(default)]
    pub education_path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRecord {
    pub name: String,
    pub tier: Tier,
    pub address: Option<String>,
    pub location: Option<Coordinate>,
    pub score: Option<u32>,
    pub district_rank: Option<String>,
    pub enrollment_2024: Option<u32>,
    pub enrollment_2025: Option<u32>,
    pub applicants: Option<u32>,
    pub acceptance_rate: Option<String>,
    pub acceptance_rate_2025: Option<String>,
    pub description: Option<String>,
    pub features: Option<Features>,
}

impl SchoolRecord {
    pub fn new(name: impl Into<String>, tier: impl Into<Tier>) -> Self {
        Self {
            name: name.into(),
            tier: tier.into(),
            address: None,
            location: None,
            score: None,
            district_rank: None,
            enrollment_2024: None,
            enrollment_2025: None,
            applicants: None,
            acceptance_rate: None,
            acceptance_rate_2025: None,
            description: None,
            features: None,
        }
    }

    pub fn with_location(mut self, location: Coordinate) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_rate_2025(mut self, rate: impl Into<String>) -> Self {
        self.acceptance_rate_2025 = Some(rate.into());
        self
    }

    /// The rate shown on the badge: this year's acceptance rate.
    pub fn badge_rate(&self) -> &str {
        self.acceptance_rate_2025.as_deref().unwrap_or("0%")
    }

    /// True when the record has no usable coordinate of its own.
    pub fn needs_location(&self) -> bool {
        self.location.map_or(true, |c| c.is_unset())
    }
}

pub fn parse_records(json: &str) -> serde_json::Result<Vec<SchoolRecord>> {
    serde_json::from_str(json)
}

pub fn load_records(path: &Path) -> anyhow::Result<Vec<SchoolRecord>> {
    let body = fs::read_to_string(path)?;
    Ok(parse_records(&body)?)
}
