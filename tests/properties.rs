//! Property tests for the export engine and the consolidator

use bpa::consolidate::consolidate;
use bpa::export::{checksum, generate};
use bpa::schema::{CONSOLIDATED_WIDTH, HEADER_WIDTH, INDIVIDUALIZED_WIDTH};
use bpa::{BpaMode, HeaderConfig, PatientAddress, Record};
use proptest::prelude::*;

fn header() -> HeaderConfig {
    HeaderConfig {
        competency: "202310".to_string(),
        tax_id: "11306581000100".to_string(),
        ..HeaderConfig::default()
    }
}

fn consolidated_record() -> impl Strategy<Value = Record> {
    (
        prop::sample::select(vec!["1234567", "7654321", "2477963"]),
        prop::sample::select(vec!["202310", "202309"]),
        prop::sample::select(vec!["225125", "223505", "322205", "515105"]),
        prop::sample::select(vec!["0301010072", "0401010058", "0214010074", "0301100012"]),
        "[0-9]{1,3}",
        1u32..5000,
        prop::sample::select(vec!["BPA", "EXT"]),
    )
        .prop_map(|(facility, competency, cbo, procedure, age, quantity, origin)| {
            Record::consolidated(facility, competency, cbo, procedure, &age, quantity, origin)
        })
}

fn individualized_record() -> impl Strategy<Value = Record> {
    (
        consolidated_record(),
        "[0-9]{15}",
        "[a-zA-Zçãéô ]{0,40}",
        "[a-zA-Zàú 0-9]{0,45}",
        prop::sample::select(vec!["M", "F", ""]),
        "[0-9]{0,12}",
    )
        .prop_map(|(mut record, id, name, street, sex, phone)| {
            record.professional_id = id.clone();
            record.patient_id = id;
            record.patient_name = name;
            record.sex = sex.to_string();
            record.attendance_date = "20231005".to_string();
            record.address = PatientAddress {
                street,
                phone,
                ..PatientAddress::default()
            };
            record
        })
}

/// (facility, competency, sheet, sequence) of each consolidated detail line
fn positions(content: &str) -> Vec<(String, String, u32, u32)> {
    content
        .split_terminator("\r\n")
        .skip(1)
        .map(|line| {
            (
                line[2..9].to_string(),
                line[9..15].to_string(),
                line[21..24].parse().unwrap(),
                line[24..26].parse().unwrap(),
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn every_line_has_its_layout_width(
        consolidated in prop::collection::vec(consolidated_record(), 0..60),
        individualized in prop::collection::vec(individualized_record(), 0..30),
    ) {
        let document = generate(&header(), &consolidated, BpaMode::Consolidated);
        let mut lines = document.lines();
        prop_assert_eq!(lines.next().map(str::len), Some(HEADER_WIDTH));
        for line in lines {
            prop_assert_eq!(line.len(), CONSOLIDATED_WIDTH);
            prop_assert!(line.starts_with("02"));
        }

        let document = generate(&header(), &individualized, BpaMode::Individualized);
        for line in document.lines().skip(1) {
            prop_assert_eq!(line.len(), INDIVIDUALIZED_WIDTH);
            prop_assert!(line.starts_with("03"));
            prop_assert!(line.is_ascii());
        }
    }

    #[test]
    fn checksum_ignores_record_order(
        records in prop::collection::vec(consolidated_record(), 0..80),
        shift in 0usize..80,
    ) {
        let mut reversed = records.clone();
        reversed.reverse();
        let mut rotated = records.clone();
        if !rotated.is_empty() {
            let by = shift % rotated.len();
            rotated.rotate_left(by);
        }

        let expected = checksum(&records);
        prop_assert_eq!(&checksum(&reversed), &expected);
        prop_assert_eq!(&checksum(&rotated), &expected);
        prop_assert_eq!(expected.len(), 4);
    }

    #[test]
    fn consolidation_is_idempotent(records in prop::collection::vec(consolidated_record(), 0..80)) {
        let once = consolidate(records.clone(), BpaMode::Consolidated);
        let twice = consolidate(once.clone(), BpaMode::Consolidated);
        prop_assert_eq!(&once, &twice);

        let total: u64 = records.iter().map(|r| u64::from(r.quantity)).sum();
        let merged: u64 = once.iter().map(|r| u64::from(r.quantity)).sum();
        prop_assert_eq!(total, merged);
    }

    #[test]
    fn sheets_hold_at_most_twenty_and_number_from_one(
        records in prop::collection::vec(consolidated_record(), 0..120),
    ) {
        let mut header = header();
        for competency in ["202310", "202309"] {
            header.competency = competency.to_string();
            let document = generate(&header, &records, BpaMode::Consolidated);

            let mut previous: Option<(String, String, u32, u32)> = None;
            let mut max_sheets = 0u32;
            for current in positions(&document.content) {
                let (ref facility, ref competency, sheet, sequence) = current;
                prop_assert!((1..=20).contains(&sequence));
                match &previous {
                    Some((f, c, s, q)) if f == facility && c == competency => {
                        if sheet == *s {
                            prop_assert_eq!(sequence, q + 1);
                        } else {
                            prop_assert_eq!(sheet, s + 1);
                            prop_assert_eq!(*q, 20);
                            prop_assert_eq!(sequence, 1);
                        }
                    }
                    Some((_, _, s, _)) => {
                        max_sheets += s;
                        prop_assert_eq!((sheet, sequence), (1, 1));
                    }
                    None => prop_assert_eq!((sheet, sequence), (1, 1)),
                }
                previous = Some(current);
            }
            if let Some((_, _, s, _)) = previous {
                max_sheets += s;
            }
            prop_assert_eq!(document.total_sheets, max_sheets);
        }
    }

    #[test]
    fn only_the_header_competency_is_written(records in prop::collection::vec(consolidated_record(), 0..80)) {
        let document = generate(&header(), &records, BpaMode::Consolidated);
        for line in document.lines().skip(1) {
            prop_assert_eq!(&line[9..15], "202310");
            prop_assert_ne!(&line[26..36], "0301100012");
        }
        let kept = records
            .iter()
            .filter(|r| r.competency == "202310" && r.procedure_code != "0301100012")
            .count();
        prop_assert_eq!(document.detail_count, kept);
    }
}
