//! Known vulnerabilities of TAs
//!
//! ```toml
//! [[vulnerability]]
//! key = "d78d338b1ac349e09f65f4efe179739d"
//!
//! [[vulnerability.disclosures]]
//! disclosure-start = "7/2020"
//! patch = "12/2020"
//! source = "scanner"
//! class = "param-confusion"
//!
//! [[vulnerability.disclosures]]
//! disclosure-start = "12/2021"
//! patch = "2/2022"
//! id = "CVE-2020-14125"
//! source = "public"
//! class = "heap-overflow"
//! ```
//!
//! A key is either a TA identity or the file-name key of a TA.

use core::convert::TryFrom;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::date::Month;

/// Source value marking a publicly disclosed vulnerability.
pub const PUBLIC: &str = "public";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Disclosure {
    /// Month the vendor learned about the issue
    pub disclosure_start: Month,
    /// Month the fix shipped
    pub patch: Month,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub class: String,
}

impl Disclosure {
    pub fn is_public(&self) -> bool {
        self.source == PUBLIC
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Vulnerability {
    pub key: String,
    pub disclosures: Vec<Disclosure>,
}

impl Vulnerability {
    /// The disclosure with the latest start; the earlier entry wins a tie.
    pub fn latest(&self) -> Option<&Disclosure> {
        let mut disclosures = self.disclosures.iter();
        let first = disclosures.next()?;
        Some(disclosures.fold(first, |latest, disclosure| {
            if disclosure.disclosure_start > latest.disclosure_start {
                disclosure
            } else {
                latest
            }
        }))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
struct DatabaseFile {
    #[serde(default)]
    vulnerability: Vec<Vulnerability>,
}

/// Vulnerabilities by key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VulnerabilityDatabase {
    entries: BTreeMap<String, Vulnerability>,
}

impl VulnerabilityDatabase {
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let file: DatabaseFile = toml::from_str(toml)?;
        let mut database = Self::default();
        for vulnerability in file.vulnerability {
            database.insert(vulnerability);
        }
        Ok(database)
    }

    /// Loads and merges several database files.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<Self> {
        let mut database = Self::default();
        for path in paths {
            let path = path.as_ref();
            let filename = path.to_str().with_context(|| format!("Non UTF-8 path {:?}", path))?;
            database.merge(Self::try_from(filename)?);
        }
        Ok(database)
    }

    /// Disclosures for the same key accumulate.
    pub fn insert(&mut self, vulnerability: Vulnerability) {
        match self.entries.get_mut(&vulnerability.key) {
            Some(existing) => existing.disclosures.extend(vulnerability.disclosures),
            None => {
                self.entries.insert(vulnerability.key.clone(), vulnerability);
            }
        }
    }

    pub fn merge(&mut self, other: VulnerabilityDatabase) {
        for (_, vulnerability) in other.entries {
            self.insert(vulnerability);
        }
    }

    /// Looks up by identity first, then by file-name key.
    pub fn lookup(&self, identity: &str, key: &str) -> Option<&Vulnerability> {
        self.entries.get(identity).or_else(|| self.entries.get(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vulnerability> {
        self.entries.values()
    }
}

impl TryFrom<&'_ str> for VulnerabilityDatabase {
    type Error = anyhow::Error;
    fn try_from(filename: &str) -> anyhow::Result<Self> {
        let toml = fs::read_to_string(filename)
            .with_context(|| format!("Failed to read vulnerability database from {}", filename))?;
        let database = Self::from_toml(&toml)
            .with_context(|| format!("Failed to parse vulnerability database {}", filename))?;
        debug!("{}: {} vulnerable TAs", filename, database.len());
        Ok(database)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn disclosure(start: &str, patch: &str, id: Option<&str>) -> Disclosure {
        Disclosure {
            disclosure_start: start.parse().unwrap(),
            patch: patch.parse().unwrap(),
            id: id.map(String::from),
            source: if id.is_some() { PUBLIC } else { "scanner" }.to_string(),
            class: "param-confusion".to_string(),
        }
    }

    const DATABASE: &str = r#"
        [[vulnerability]]
        key = "d78d338b1ac349e09f65f4efe179739d"

        [[vulnerability.disclosures]]
        disclosure-start = "7/2020"
        patch = "12/2020"
        source = "scanner"
        class = "param-confusion"

        [[vulnerability.disclosures]]
        disclosure-start = "12/2021"
        patch = "2/2022"
        id = "CVE-2020-14125"
        source = "public"
        class = "heap-overflow"

        [[vulnerability]]
        key = "soter64"
        disclosures = [{ disclosure-start = "12/2021", patch = "6/2022", source = "scanner", class = "oob" }]
    "#;

    #[test]
    fn parses_and_picks_latest() {
        let database = VulnerabilityDatabase::from_toml(DATABASE).unwrap();
        assert_eq!(database.len(), 2);

        let vulnerability = database.lookup("d78d338b1ac349e09f65f4efe179739d", "x").unwrap();
        let latest = vulnerability.latest().unwrap();
        assert_eq!(latest.id.as_deref(), Some("CVE-2020-14125"));
        assert!(latest.is_public());
        assert_eq!(latest.patch, "2/2022".parse::<Month>().unwrap());

        // identity misses, file-name key hits
        assert!(database.lookup("KEYMST", "soter64").is_some());
        assert!(database.lookup("KEYMST", "keymaster").is_none());
    }

    #[test]
    fn ties_keep_the_first() {
        let vulnerability = Vulnerability {
            key: "ta".to_string(),
            disclosures: vec![
                disclosure("6/2021", "8/2021", Some("CVE-1")),
                disclosure("6/2021", "9/2021", Some("CVE-2")),
                disclosure("1/2021", "3/2021", Some("CVE-3")),
            ],
        };
        assert_eq!(vulnerability.latest().unwrap().id.as_deref(), Some("CVE-1"));
        assert_eq!(Vulnerability { key: "ta".to_string(), disclosures: Vec::new() }.latest(), None);
    }

    #[test]
    fn merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("samsung.toml");
        let second = dir.path().join("more.toml");
        fs::write(&first, DATABASE).unwrap();
        fs::write(&second, r#"
            [[vulnerability]]
            key = "soter64"
            disclosures = [{ disclosure-start = "1/2023", patch = "3/2023", id = "CVE-2023-1", source = "public", class = "oob" }]
        "#).unwrap();

        let database = VulnerabilityDatabase::load(&[&first, &second]).unwrap();
        assert_eq!(database.len(), 2);
        let soter = database.lookup("soter64", "soter64").unwrap();
        assert_eq!(soter.disclosures.len(), 2);
        assert_eq!(soter.latest().unwrap().id.as_deref(), Some("CVE-2023-1"));

        assert!(VulnerabilityDatabase::load(&[dir.path().join("missing.toml")]).is_err());
        fs::write(&second, "[[vulnerability]]\nkey = \"x\"\ndisclosures = [{ patch = \"13/2023\" }]\n").unwrap();
        assert!(VulnerabilityDatabase::load(&[&second]).is_err());
    }
}
