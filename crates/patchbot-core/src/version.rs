//! Baseline version ordering.
//!
//! Version strings such as `9.8`, `9.8.beta4` or `9.8.rc1` are split at
//! digit/non-digit boundaries and on punctuation. Numeric components compare
//! numerically, textual ones lexically, and every version ends with a
//! terminal marker that sorts before anything else. This gives
//! `6.6 < 6.6.beta4 < 6.6.rc0 < 6.6.rc1 < 6.6.1 < 6.7`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Component {
    End,
    Text(String),
    Number(u64),
}

fn flush(current: &mut String, numeric: bool, components: &mut Vec<Component>) {
    if current.is_empty() {
        return;
    }
    let component = match (numeric, current.parse::<u64>()) {
        (true, Ok(n)) => Component::Number(n),
        _ => Component::Text(current.clone()),
    };
    components.push(component);
    current.clear();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseVersion {
    raw: String,
    components: Vec<Component>,
}

impl BaseVersion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let mut components = Vec::new();
        let mut current = String::new();
        let mut numeric = false;

        for c in raw.chars() {
            if c.is_ascii_digit() {
                if !numeric {
                    flush(&mut current, numeric, &mut components);
                    numeric = true;
                }
                current.push(c);
            } else if c.is_alphanumeric() {
                if numeric {
                    flush(&mut current, numeric, &mut components);
                    numeric = false;
                }
                current.push(c);
            } else {
                flush(&mut current, numeric, &mut components);
            }
        }
        flush(&mut current, numeric, &mut components);
        components.push(Component::End);

        Self {
            raw: raw.to_string(),
            components,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for BaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for BaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for BaseVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for BaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for BaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
