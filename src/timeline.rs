//! Version histories
//!
//! Records of the same TA are grouped per (vendor, device, region, identity)
//! and ordered by firmware build date. The sort is stable, so versions built
//! on the same date keep the order they were extracted in.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::record::{Identity, TaRecord};

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryKey {
    pub vendor: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub identity: Identity,
}

impl HistoryKey {
    pub fn of(record: &TaRecord) -> Self {
        Self {
            vendor: record.vendor.clone(),
            device: record.device.clone(),
            region: record.region.clone(),
            identity: record.identity.clone(),
        }
    }
}

/// All observations of one TA on one device (and region), oldest first.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct History {
    pub key: HistoryKey,
    pub records: Vec<TaRecord>,
}

impl History {
    /// Never empty.
    pub fn first(&self) -> &TaRecord {
        &self.records[0]
    }

    pub fn first_build(&self) -> NaiveDateTime {
        self.first().firmware_build_date
    }

    /// Key for vulnerability lookups, taken from the oldest observation.
    pub fn vulnerability_key(&self) -> &str {
        &self.first().vulnerability_key
    }
}

/// Groups `records` into histories, in key order.
pub fn build(records: impl IntoIterator<Item = TaRecord>) -> Vec<History> {
    let mut groups: BTreeMap<HistoryKey, Vec<TaRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(HistoryKey::of(&record)).or_default().push(record);
    }
    groups
        .into_iter()
        .map(|(key, mut records)| {
            records.sort_by_key(|record| record.firmware_build_date);
            trace!("{:?}: {} versions", key, records.len());
            History { key, records }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::path::PathBuf;

    use chrono::NaiveDate;

    use crate::format::TeeFormat;

    pub(crate) fn built(year: i32, month: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    pub(crate) fn record(vendor: &str, identity: &str, counter: u32, build_date: NaiveDateTime) -> TaRecord {
        TaRecord {
            identity: Identity(identity.to_string()),
            tee_format: TeeFormat::Kinibi,
            rollback_counter: Some(counter),
            security_version_tier: 2,
            signature_verified: None,
            source_file_path: PathBuf::from(format!("{}.tlbin", identity)),
            vulnerability_key: identity.to_string(),
            vendor: vendor.to_string(),
            device: "device".to_string(),
            region: None,
            firmware_version: build_date.format("%y%m%d").to_string(),
            firmware_build_date: build_date,
        }
    }

    #[test]
    fn vendors_are_kept_apart() {
        let histories = build(vec![
            record("samsung", "keymaster", 1, built(2021, 5)),
            record("oppo", "keymaster", 3, built(2021, 1)),
            record("samsung", "keymaster", 2, built(2021, 1)),
        ]);
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].key.vendor, "oppo");
        assert_eq!(histories[1].key.vendor, "samsung");
        let counters: Vec<_> = histories[1].records.iter().map(|record| record.counter()).collect();
        assert_eq!(counters, vec![2, 1]);
        assert_eq!(histories[1].first_build(), built(2021, 1));
    }

    #[test]
    fn regions_and_ties() {
        let mut europe = record("samsung", "ta", 1, built(2020, 3));
        europe.region = Some("EUX".to_string());
        let mut first = record("samsung", "ta", 7, built(2020, 3));
        first.firmware_version = "first".to_string();
        let mut second = record("samsung", "ta", 8, built(2020, 3));
        second.firmware_version = "second".to_string();

        let histories = build(vec![europe, first, second]);
        assert_eq!(histories.len(), 2);
        // `None` sorts before any region
        assert_eq!(histories[0].key.region, None);
        let versions: Vec<_> = histories[0].records.iter().map(|record| record.firmware_version.as_str()).collect();
        assert_eq!(versions, vec!["first", "second"]);
        assert_eq!(histories[1].key.region.as_deref(), Some("EUX"));
    }
}
