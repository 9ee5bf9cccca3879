use std::collections::BTreeMap;

use tracing::debug;

use crate::schema::{CanonicalRecord, DataSource};

fn overlay<T: Clone>(base: &mut Option<T>, new: &Option<T>) {
    if new.is_some() {
        *base = new.clone();
    }
}

/// Fold `new` into `base`: non-null fields of `new` win, nulls keep `base`.
/// The hazard flags belong to `hazard_item` and only move with it.
fn overlay_record(base: &mut CanonicalRecord, new: &CanonicalRecord) {
    overlay(&mut base.registration_date, &new.registration_date);
    overlay(&mut base.product_type, &new.product_type);
    overlay(&mut base.top_level_product_type, &new.top_level_product_type);
    overlay(&mut base.upper_product_type, &new.upper_product_type);
    overlay(&mut base.product_name, &new.product_name);
    overlay(&mut base.origin_country, &new.origin_country);
    overlay(&mut base.notifying_country, &new.notifying_country);
    overlay(&mut base.hazard_category, &new.hazard_category);
    overlay(&mut base.hazard_item, &new.hazard_item);
    overlay(&mut base.full_text, &new.full_text);
    if new.hazard_item.is_some() {
        base.analyzable = new.analyzable;
        base.interest_item = new.interest_item;
    }
}

/// Merge incoming records into an existing collection keyed by
/// `(data_source, source_detail)`.
///
/// Later records overwrite earlier ones field by field, including duplicates
/// within `incoming`. The result is ordered by key.
pub fn merge(existing: &[CanonicalRecord], incoming: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut by_key: BTreeMap<(DataSource, String), CanonicalRecord> = BTreeMap::new();
    for r in existing.iter().chain(incoming) {
        match by_key.get_mut(&r.key()) {
            Some(base) => overlay_record(base, r),
            None => {
                by_key.insert(r.key(), r.clone());
            }
        }
    }
    debug!(
        existing = existing.len(),
        incoming = incoming.len(),
        merged = by_key.len(),
        "Merged records"
    );
    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(detail: &str) -> CanonicalRecord {
        CanonicalRecord {
            registration_date: None,
            data_source: DataSource::Fda,
            source_detail: detail.to_string(),
            product_type: None,
            top_level_product_type: None,
            upper_product_type: None,
            product_name: None,
            origin_country: None,
            notifying_country: None,
            hazard_category: None,
            hazard_item: None,
            full_text: None,
            analyzable: false,
            interest_item: false,
        }
    }

    #[test]
    fn null_does_not_erase() {
        let mut old = record("IA-1");
        old.product_name = Some("A".into());
        old.origin_country = Some("KR".into());
        let mut new = record("IA-1");
        new.product_name = Some("B".into());

        let merged = merge(&[old], &[new]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].product_name.as_deref(), Some("B"));
        assert_eq!(merged[0].origin_country.as_deref(), Some("KR"));
    }

    #[test]
    fn distinct_keys_kept_and_sorted() {
        let a = record("IA-2");
        let b = record("IA-1");
        let mut c = record("IA-1");
        c.data_source = DataSource::Rasff;
        let merged = merge(&[a], &[c, b]);
        let keys: Vec<_> = merged.iter().map(|r| r.key()).collect();
        assert_eq!(
            keys,
            vec![
                (DataSource::Fda, "IA-1".to_string()),
                (DataSource::Fda, "IA-2".to_string()),
                (DataSource::Rasff, "IA-1".to_string()),
            ]
        );
    }

    #[test]
    fn duplicates_within_incoming_fold_in_order() {
        let mut first = record("IA-1");
        first.registration_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        first.analyzable = true;
        let mut second = record("IA-1");
        second.hazard_item = Some("Salmonella".into());

        let merged = merge(&[], &[first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].registration_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(merged[0].hazard_item.as_deref(), Some("Salmonella"));
        assert!(!merged[0].analyzable);
    }

    #[test]
    fn category_only_update_keeps_flags() {
        let mut old = record("IA-99-01");
        old.registration_date = NaiveDate::from_ymd_opt(2024, 5, 20);
        old.product_name = Some("Frozen Shrimp".into());
        old.origin_country = Some("Korea, Republic of".into());
        old.hazard_item = Some("Salmonella".into());
        old.analyzable = true;
        old.interest_item = true;
        let mut new = record("IA-99-01");
        new.hazard_category = Some("Chemical".into());

        let merged = merge(&[old.clone()], &[new]);
        assert_eq!(merged.len(), 1);
        let mut expected = old;
        expected.hazard_category = Some("Chemical".into());
        assert_eq!(merged[0], expected);
    }

    #[test]
    fn newer_hazard_brings_its_flags() {
        let mut old = record("IA-1");
        old.hazard_item = Some("Salmonella".into());
        old.analyzable = true;
        let mut new = record("IA-1");
        new.hazard_item = Some("Aflatoxin".into());
        new.interest_item = true;

        let merged = merge(&[old], &[new]);
        assert_eq!(merged[0].hazard_item.as_deref(), Some("Aflatoxin"));
        assert!(!merged[0].analyzable);
        assert!(merged[0].interest_item);
    }

    #[test]
    fn merging_is_associative() {
        let mut a = record("IA-1");
        a.product_name = Some("A".into());
        a.full_text = Some("first".into());
        let mut b = record("IA-1");
        b.product_name = Some("B".into());
        let mut c = record("IA-1");
        c.hazard_category = Some("Pathogen".into());
        c.full_text = Some("third".into());
        let d = record("IA-9");

        let stepwise = merge(&merge(&[a.clone()], &[b.clone(), d.clone()]), &[c.clone()]);
        let grouped = merge(&[a], &merge(&[b, d], &[c]));
        assert_eq!(stepwise, grouped);
    }

    #[test]
    fn merge_with_nothing_is_identity() {
        let mut a = record("IA-1");
        a.product_name = Some("A".into());
        assert_eq!(merge(&[a.clone()], &[]), vec![a.clone()]);
        assert_eq!(merge(&[], &[a.clone()]), vec![a]);
    }
}
