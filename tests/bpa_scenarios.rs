//! End-to-end generation scenarios
//!
//! These tests drive the public API the way a caller would: text in,
//! fixed-width document out.

use bpa::prelude::*;
use bpa::normalize::{normalize_age_at, normalize_competency, normalize_procedure};
use bpa::schema::{CONSOLIDATED_WIDTH, HEADER_WIDTH, INDIVIDUALIZED_WIDTH};
use chrono::NaiveDate;

fn header(competency: &str) -> HeaderConfig {
    HeaderConfig {
        competency: competency.to_string(),
        responsible: "SECRETARIA DE SAÚDE".to_string(),
        acronym: "SMS".to_string(),
        tax_id: "11306581000100".to_string(),
        ..HeaderConfig::default()
    }
}

fn slot(age: usize) -> Record {
    Record::consolidated("1234567", "202310", "515105", "0301010072", &format!("{:03}", age), 1, "BPA")
}

#[test]
fn scenario_a_duplicates_are_summed() {
    let records = vec![
        Record::consolidated("1234567", "202310", "515105", "0301010072", "030", 1, "BPA"),
        Record::consolidated("1234567", "202310", "515105", "0301010072", "030", 2, "BPA"),
    ];
    let merged = consolidate(records, BpaMode::Consolidated);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].quantity, 3);

    let document = bpa::generate(&header("202310"), &merged, BpaMode::Consolidated);
    let detail = document.lines().nth(1).unwrap();
    assert_eq!(&detail[39..45], "000003");
}

#[test]
fn scenario_b_suture_depends_on_column_context() {
    assert_eq!(normalize_procedure("SUTURA", "BPA ENFERMAGEM"), "0401010066");
    assert_eq!(normalize_procedure("SUTURA", "BPA MEDICO"), "0401010058");
    assert_eq!(normalize_procedure("sutura", "bpa médico"), "0401010058");
}

#[test]
fn scenario_c_competency_formats() {
    assert_eq!(normalize_competency("25/09/2023"), "202309");
    assert_eq!(normalize_competency("09/2023"), "202309");
}

#[test]
fn scenario_d_age_from_birth_date() {
    let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    assert_eq!(normalize_age_at("10/05/1980", today), "43");
}

#[test]
fn scenario_e_twenty_five_records_fill_two_sheets() {
    let records: Vec<Record> = (0..25).map(slot).collect();
    let document = bpa::generate(&header("202310"), &records, BpaMode::Consolidated);

    assert_eq!(document.detail_count, 25);
    assert_eq!(document.total_sheets, 2);

    let lines: Vec<&str> = document.lines().collect();
    assert_eq!(lines.len(), 26);
    let head = lines[0];
    assert_eq!(&head[0..7], "01#BPA#");
    assert_eq!(&head[7..13], "202310");
    assert_eq!(&head[13..19], "000026");
    assert_eq!(&head[19..25], "000002");
    assert_eq!(&head[25..29], "2203");

    // sheet and sequence of the first, 20th, 21st and last details
    let position = |line: &str| line[21..26].to_string();
    assert_eq!(position(lines[1]), "00101");
    assert_eq!(position(lines[20]), "00120");
    assert_eq!(position(lines[21]), "00201");
    assert_eq!(position(lines[25]), "00205");
}

#[test]
fn scenario_e_sheet_numbering_restarts_per_facility() {
    let mut records: Vec<Record> = (0..21).map(slot).collect();
    records.extend((0..3).map(|age| {
        let mut record = slot(age);
        record.facility_id = "7654321".to_string();
        record
    }));

    let document = bpa::generate(&header("202310"), &records, BpaMode::Consolidated);
    assert_eq!(document.total_sheets, 3);
    assert_eq!(document.contexts.len(), 2);
    assert_eq!(document.contexts[0].sheets, 2);
    assert_eq!(document.contexts[1].sheets, 1);

    let lines: Vec<&str> = document.lines().collect();
    assert_eq!(&lines[22][2..9], "7654321");
    assert_eq!(&lines[22][21..26], "00101");
}

#[test]
fn scenario_f_forbidden_procedure_in_physician_column() {
    let text = "CNES;DATA;PROCEDIMENTO BPA MEDICO;QTD\n\
        1234567;10/10/2023;0301100012;1\n\
        1234567;10/10/2023;Consulta medica em atencao especializada;1\n";
    let batch = BpaBatchBuilder::new()
        .header(header("202310"))
        .input_text(text)
        .build()
        .unwrap();

    assert_eq!(batch.report().forbidden_procedure, 1);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.records()[0].occupation_code, "225125");
    assert_eq!(batch.records()[0].procedure_code, "0301010072");

    let document = batch.generate();
    assert!(!document.content.contains("0301100012"));
}

#[test]
fn scenario_f_engine_excludes_forbidden_code_from_any_source() {
    let records = vec![
        Record::consolidated("1234567", "202310", "223505", "0301100012", "030", 4, "BPA"),
        slot(30),
    ];
    let document = bpa::generate(&header("202310"), &records, BpaMode::Consolidated);
    assert_eq!(document.detail_count, 1);
    assert_eq!(document.excluded.forbidden_procedure, 1);
}

#[test]
fn other_competencies_never_reach_the_document() {
    let mut september = slot(1);
    september.competency = "202309".to_string();
    let records = vec![slot(2), september];

    let document = bpa::generate(&header("10/2023"), &records, BpaMode::Consolidated);
    assert_eq!(document.detail_count, 1);
    assert_eq!(document.excluded.other_competency, 1);
    assert!(document.lines().skip(1).all(|line| &line[9..15] == "202310"));
}

#[test]
fn empty_input_gives_header_only_document() {
    let document = bpa::generate(&header("202310"), &[], BpaMode::Consolidated);
    assert_eq!(document.total_sheets, 0);
    assert_eq!(document.line_count, 1);
    assert_eq!(document.content.len(), HEADER_WIDTH + 2);
    assert!(document.content.ends_with("\r\n"));
    assert_eq!(&document.header_line()[25..29], "1111");
}

#[test]
fn individualized_lines_have_fixed_width() {
    let text = "CNES\tDATA\tCBO\tPROCEDIMENTO\tNOME PACIENTE\tCNS PACIENTE\tCNS PROFISSIONAL\tSEXO\tDT NASC\tMUNICIPIO\tCID\n\
        2477963\t03/10/2023\t225125\t0301010072\tJosé Antônio Conceição\t898001234567890\t700000000000001\tMasculino\t1975-03-09\t315780\tJ06.9\n\
        2477963\t04/10/2023\t223505\tSutura\tAna\t\t700000000000002\tF\t\t315780\t\n";
    let batch = BpaBatchBuilder::new()
        .header(header("202310"))
        .mode(BpaMode::Individualized)
        .reference_date(NaiveDate::from_ymd_opt(2023, 10, 31).unwrap())
        .input_text(text)
        .build()
        .unwrap();
    assert_eq!(batch.len(), 2);

    let document = batch.generate();
    let lines: Vec<&str> = document.lines().collect();
    assert_eq!(lines[0].len(), HEADER_WIDTH);
    for line in &lines[1..] {
        assert_eq!(line.len(), INDIVIDUALIZED_WIDTH);
        assert!(line.starts_with("03"));
        assert!(line.is_ascii());
    }
    assert!(document.content.contains("JOSE ANTONIO CONCEICAO"));
}

#[test]
fn consolidated_file_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("producao.csv");
    std::fs::write(
        &input,
        "\u{feff}CNES,DATA,CBO,CODIGO PROCEDIMENTO,IDADE,QUANTIDADE\n\
         1234567,2023-10-02,515105,\"0301010072\",30,2\n\
         1234567,2023-10-03,515105,0301010072,30,1\n\
         ,2023-10-03,515105,0301010072,30,1\n",
    )
    .unwrap();

    let batch = BpaBatchBuilder::new()
        .header(header("202310"))
        .input_file(&input)
        .build()
        .unwrap();
    assert_eq!(batch.report().lines_read, 3);
    assert_eq!(batch.report().empty_facility, 1);
    assert_eq!(batch.len(), 1);

    let document = batch.generate();
    assert_eq!(document.default_file_name(), "BPA_202310_SMS.txt");
    let output = dir.path().join(document.default_file_name());
    document.write_to(&output).unwrap();

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written, document.content);
    let lines: Vec<&str> = written.split_terminator("\r\n").collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].len(), CONSOLIDATED_WIDTH);
    assert_eq!(lines[1], "021234567202310515105001010301010072030000003BPA");
}

#[test]
fn invalid_header_is_reported_with_every_problem() {
    let bad = HeaderConfig {
        competency: "2023".to_string(),
        tax_id: "123".to_string(),
        responsible: String::new(),
        ..HeaderConfig::default()
    };
    match bad.validate() {
        Err(BpaError::InvalidHeader { problems }) => assert!(problems.len() >= 3),
        other => panic!("expected invalid header, got {:?}", other),
    }
    assert!(header("202310").validate().is_ok());
}
