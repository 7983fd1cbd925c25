/*!
 * Consolidation of consolidated-layout records
 *
 * Records sharing a grouping key are merged into the first one seen, with
 * their quantities summed. Physicians, nurses and nursing technicians are
 * grouped by facility, competency, occupation and procedure alone; every
 * other occupation also keeps age and origin apart.
 */

use std::collections::HashMap;

use tracing::debug;

use crate::data_types::{BpaMode, Record};
use crate::dictionary::is_strict_occupation;

/// Grouping key of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConsolidationKey {
    /// Strict occupations: facility, competency, occupation, procedure
    Procedure(String, String, String, String),
    /// Other occupations: also age and origin
    ProcedureAgeOrigin(String, String, String, String, String, String),
}

impl ConsolidationKey {
    pub fn of(record: &Record) -> Self {
        let facility = record.facility_id.clone();
        let competency = record.competency.clone();
        let occupation = record.occupation_code.clone();
        let procedure = record.procedure_code.clone();

        if is_strict_occupation(record.occupation_code.trim()) {
            ConsolidationKey::Procedure(facility, competency, occupation, procedure)
        } else {
            ConsolidationKey::ProcedureAgeOrigin(
                facility,
                competency,
                occupation,
                procedure,
                record.age.clone(),
                record.origin.clone(),
            )
        }
    }
}

/// Merge records sharing a [`ConsolidationKey`]
///
/// Output order is first-seen order; the surviving record keeps the fields
/// of the first occurrence and the summed quantity. Individualized records
/// are returned untouched, each one is a distinct encounter.
pub fn consolidate(records: Vec<Record>, mode: BpaMode) -> Vec<Record> {
    if mode == BpaMode::Individualized {
        return records;
    }

    let input = records.len();
    let mut positions: HashMap<ConsolidationKey, usize> = HashMap::with_capacity(input);
    let mut merged: Vec<Record> = Vec::with_capacity(input);

    for record in records {
        let key = ConsolidationKey::of(&record);
        match positions.get(&key) {
            Some(&index) => {
                let existing = &mut merged[index];
                existing.quantity = existing.quantity.saturating_add(record.quantity);
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(record);
            }
        }
    }

    debug!(input, output = merged.len(), "records consolidated");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cbo: &str, procedure: &str, age: &str, origin: &str, quantity: u32) -> Record {
        Record::consolidated("1234567", "202309", cbo, procedure, age, quantity, origin)
    }

    #[test]
    fn test_non_strict_sums_matching_rows() {
        let merged = consolidate(
            vec![
                record("515105", "0301010072", "25", "BPA", 1),
                record("515105", "0301010072", "25", "BPA", 2),
            ],
            BpaMode::Consolidated,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 3);
    }

    #[test]
    fn test_non_strict_keeps_age_and_origin_apart() {
        let merged = consolidate(
            vec![
                record("515105", "0301010072", "25", "BPA", 1),
                record("515105", "0301010072", "30", "BPA", 1),
                record("515105", "0301010072", "25", "EXT", 1),
            ],
            BpaMode::Consolidated,
        );
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_strict_occupation_ignores_age_and_origin() {
        let merged = consolidate(
            vec![
                record("225125", "0301010072", "25", "BPA", 1),
                record("225125", "0301010072", "70", "EXT", 4),
                record("223505", "0301010072", "25", "BPA", 1),
            ],
            BpaMode::Consolidated,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].quantity, 5);
        // first occurrence's fields survive
        assert_eq!(merged[0].age, "25");
        assert_eq!(merged[0].origin, "BPA");
        assert_eq!(merged[1].occupation_code, "223505");
    }

    #[test]
    fn test_first_seen_order() {
        let merged = consolidate(
            vec![
                record("225125", "0401010058", "", "BPA", 1),
                record("225125", "0301010072", "", "BPA", 1),
                record("225125", "0401010058", "", "BPA", 1),
            ],
            BpaMode::Consolidated,
        );
        let codes: Vec<&str> = merged.iter().map(|r| r.procedure_code.as_str()).collect();
        assert_eq!(codes, vec!["0401010058", "0301010072"]);
    }

    #[test]
    fn test_individualized_is_untouched() {
        let records = vec![
            record("225125", "0301010072", "25", "BPA", 1),
            record("225125", "0301010072", "25", "BPA", 1),
        ];
        assert_eq!(consolidate(records.clone(), BpaMode::Individualized), records);
    }
}
