/*!
 * BPA document generation
 *
 * Filters, sorts and paginates the final record set, serializes every
 * record to its fixed-width detail line, computes the verification digit
 * and prepends the header line. Generation is a pure function of the
 * header, the records and the mode; writing the result to disk is a
 * separate step.
 */

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    data_types::{BpaMode, HeaderConfig, Record},
    dictionary::FORBIDDEN_PROCEDURE_CODE,
    normalize::{digits_only, normalize_full_date},
    schema::{render_line, LayoutField, CONSOLIDATED_LAYOUT, HEADER_LAYOUT, INDIVIDUALIZED_LAYOUT},
    BpaError, Result,
};

/// Detail lines per sheet
pub const LINES_PER_SHEET: u32 = 20;

/// Modulus of the verification digit
pub const CHECKSUM_MODULUS: u64 = 1111;

/// Street type code written in every individualized line
pub const STREET_TYPE_CODE: &str = "081";

/// Line terminator of the document
pub const LINE_ENDING: &str = "\r\n";

/// Where a detail line sits in the paper form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SheetPosition {
    pub sheet: u32,
    pub sequence: u32,
}

/// What moving to the next sorted record means for pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// No record was placed yet
    FirstRecord,
    /// Same facility and competency, room left on the sheet
    SameSheet,
    /// Same facility and competency, the sheet already holds its limit
    SheetFull,
    /// Facility or competency differs from the previous record
    ContextChanged,
}

/// Pagination state carried from one sorted record to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationState {
    /// Current sheet within the current context
    pub sheet: u32,
    /// Position of the last record on the current sheet
    pub sequence: u32,
    /// Highest sheet used in the current context
    pub max_sheet_in_context: u32,
    /// Sheets of every completed context
    pub total_sheets: u32,
}

impl PaginationState {
    /// Classify the step from `previous` to `current`
    pub fn classify(&self, previous: Option<&Record>, current: &Record) -> PageEvent {
        match previous {
            None => PageEvent::FirstRecord,
            Some(prev) if prev.context_key() != current.context_key() => PageEvent::ContextChanged,
            Some(_) if self.sequence >= LINES_PER_SHEET => PageEvent::SheetFull,
            Some(_) => PageEvent::SameSheet,
        }
    }

    /// State after placing one record under `event`
    pub fn advance(self, event: PageEvent) -> Self {
        match event {
            PageEvent::FirstRecord => Self {
                sheet: 1,
                sequence: 1,
                max_sheet_in_context: 1,
                total_sheets: 0,
            },
            PageEvent::SameSheet => Self {
                sequence: self.sequence + 1,
                ..self
            },
            PageEvent::SheetFull => Self {
                sheet: self.sheet + 1,
                sequence: 1,
                max_sheet_in_context: self.max_sheet_in_context.max(self.sheet + 1),
                ..self
            },
            PageEvent::ContextChanged => Self {
                sheet: 1,
                sequence: 1,
                max_sheet_in_context: 1,
                total_sheets: self.total_sheets + self.max_sheet_in_context,
            },
        }
    }

    pub fn position(&self) -> SheetPosition {
        SheetPosition {
            sheet: self.sheet,
            sequence: self.sequence,
        }
    }

    /// Total sheets once the last record is placed
    pub fn finish(self) -> u32 {
        self.total_sheets + self.max_sheet_in_context
    }
}

/// Sheet count of one facility and competency group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSheets {
    pub facility_id: String,
    pub competency: String,
    pub records: usize,
    pub sheets: u32,
}

/// Result of paginating a sorted record list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// One position per record, in record order
    pub positions: Vec<SheetPosition>,
    pub total_sheets: u32,
    pub contexts: Vec<ContextSheets>,
}

/// Assign sheet and sequence numbers to already sorted records
pub fn paginate(records: &[Record]) -> Pagination {
    let mut positions = Vec::with_capacity(records.len());
    let mut contexts: Vec<ContextSheets> = Vec::new();
    let mut state = PaginationState::default();
    let mut previous: Option<&Record> = None;

    for record in records {
        let event = state.classify(previous, record);
        state = state.advance(event);

        if matches!(event, PageEvent::FirstRecord | PageEvent::ContextChanged) {
            if event == PageEvent::ContextChanged {
                debug!(
                    facility = %record.facility_id,
                    competency = %record.competency,
                    sheets_so_far = state.total_sheets,
                    "pagination context changed"
                );
            }
            contexts.push(ContextSheets {
                facility_id: record.facility_id.clone(),
                competency: record.competency.clone(),
                records: 0,
                sheets: 0,
            });
        }
        if let Some(context) = contexts.last_mut() {
            context.records += 1;
            context.sheets = state.max_sheet_in_context;
        }

        positions.push(state.position());
        previous = Some(record);
    }

    Pagination {
        positions,
        total_sheets: state.finish(),
        contexts,
    }
}

/// Verification digit: sum of procedure code plus quantity over every
/// record, modulo 1111, plus 1111
pub fn checksum(records: &[Record]) -> String {
    let sum = records.iter().fold(0u64, |acc, record| {
        let procedure = digits_only(&record.procedure_code).parse::<u64>().unwrap_or(0);
        let value = (procedure + u64::from(record.quantity)) % CHECKSUM_MODULUS;
        (acc + value) % CHECKSUM_MODULUS
    });
    format!("{:04}", sum + CHECKSUM_MODULUS)
}

/// Sort order of detail lines
///
/// Facility, competency, then (individualized only) occupation and
/// professional, then occupation, procedure, age and origin.
pub fn compare_records(a: &Record, b: &Record, mode: BpaMode) -> Ordering {
    let context = a
        .facility_id
        .cmp(&b.facility_id)
        .then_with(|| a.competency.cmp(&b.competency));

    let professional = match mode {
        BpaMode::Individualized => a
            .occupation_code
            .cmp(&b.occupation_code)
            .then_with(|| a.professional_id.cmp(&b.professional_id)),
        BpaMode::Consolidated => Ordering::Equal,
    };

    context
        .then(professional)
        .then_with(|| a.occupation_code.cmp(&b.occupation_code))
        .then_with(|| a.procedure_code.cmp(&b.procedure_code))
        .then_with(|| a.age.cmp(&b.age))
        .then_with(|| a.origin.cmp(&b.origin))
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Serializer of one detail record layout
pub trait DetailSerializer {
    /// Layout the serializer writes
    fn mode(&self) -> BpaMode;

    fn layout(&self) -> &'static [LayoutField];

    /// Fixed-width detail line of `record` at `position`
    fn serialize(&self, record: &Record, position: SheetPosition) -> String;
}

/// Record 02
pub struct ConsolidatedSerializer;

impl DetailSerializer for ConsolidatedSerializer {
    fn mode(&self) -> BpaMode {
        BpaMode::Consolidated
    }

    fn layout(&self) -> &'static [LayoutField] {
        &CONSOLIDATED_LAYOUT
    }

    fn serialize(&self, record: &Record, position: SheetPosition) -> String {
        let sheet = position.sheet.to_string();
        let sequence = position.sequence.to_string();
        let quantity = record.quantity.to_string();
        render_line(
            self.layout(),
            &[
                self.mode().record_tag(),
                &record.facility_id,
                &record.competency,
                &record.occupation_code,
                &sheet,
                &sequence,
                &record.procedure_code,
                &record.age,
                &quantity,
                &record.origin,
            ],
        )
    }
}

/// Record 03
pub struct IndividualizedSerializer;

impl DetailSerializer for IndividualizedSerializer {
    fn mode(&self) -> BpaMode {
        BpaMode::Individualized
    }

    fn layout(&self) -> &'static [LayoutField] {
        &INDIVIDUALIZED_LAYOUT
    }

    fn serialize(&self, record: &Record, position: SheetPosition) -> String {
        let sheet = position.sheet.to_string();
        let sequence = position.sequence.to_string();
        let quantity = record.quantity.to_string();
        let attendance_date = normalize_full_date(&record.attendance_date, &record.competency);
        let birth_date = normalize_full_date(&record.birth_date, &record.competency);
        let address = &record.address;

        render_line(
            self.layout(),
            &[
                self.mode().record_tag(),
                &record.facility_id,
                &record.competency,
                &record.professional_id,
                &record.occupation_code,
                &attendance_date,
                &sheet,
                &sequence,
                &record.procedure_code,
                &record.patient_id,
                &record.sex,
                &record.municipality_code,
                &record.diagnosis_code,
                &record.age,
                &quantity,
                or_default(&record.care_character, "01"),
                &record.authorization_number,
                &record.origin,
                &record.patient_name,
                &birth_date,
                or_default(&record.race, "03"),
                or_default(&record.ethnicity, "0000"),
                or_default(&record.nationality, "010"),
                &record.service_code,
                &record.classification_code,
                &record.team_sequence,
                &record.team_area,
                &record.company_tax_id,
                &address.postal_code,
                STREET_TYPE_CODE,
                &address.street,
                &address.complement,
                or_default(&address.number, "00000"),
                &address.neighborhood,
                or_default(&address.phone, "00000000000"),
                &address.email,
                "",
            ],
        )
    }
}

/// Serializer for `mode`
pub fn serializer_for(mode: BpaMode) -> Box<dyn DetailSerializer> {
    match mode {
        BpaMode::Consolidated => Box::new(ConsolidatedSerializer),
        BpaMode::Individualized => Box::new(IndividualizedSerializer),
    }
}

/// Records left out of the document, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExclusionCounts {
    pub other_competency: usize,
    pub forbidden_procedure: usize,
    pub invalid: usize,
}

impl ExclusionCounts {
    pub fn total(&self) -> usize {
        self.other_competency + self.forbidden_procedure + self.invalid
    }
}

/// Filter and sanitize records for one document, then sort them
///
/// Keeps records of the header competency, reduces facility ids and
/// occupation codes to digits and removes the forbidden procedure code and
/// records that cannot be billed.
pub fn prepare_records(header: &HeaderConfig, records: &[Record], mode: BpaMode) -> (Vec<Record>, ExclusionCounts) {
    let target = header.target_competency();
    let mut excluded = ExclusionCounts::default();

    let mut kept: Vec<Record> = records
        .iter()
        .filter_map(|record| {
            if record.competency != target {
                excluded.other_competency += 1;
                return None;
            }
            if record.procedure_code == FORBIDDEN_PROCEDURE_CODE {
                excluded.forbidden_procedure += 1;
                return None;
            }
            let mut record = record.clone();
            record.facility_id = digits_only(&record.facility_id);
            record.occupation_code = digits_only(&record.occupation_code);
            if !record.is_valid() {
                excluded.invalid += 1;
                return None;
            }
            Some(record)
        })
        .collect();

    kept.sort_by(|a, b| compare_records(a, b, mode));
    (kept, excluded)
}

/// Header line (record 01)
pub fn header_line(header: &HeaderConfig, detail_count: usize, total_sheets: u32, checksum: &str) -> String {
    let competency = header.target_competency();
    let line_count = (detail_count + 1).to_string();
    let sheets = total_sheets.to_string();
    let jurisdiction = header.jurisdiction.flag().to_string();
    render_line(
        &HEADER_LAYOUT,
        &[
            "01",
            "#BPA#",
            &competency,
            &line_count,
            &sheets,
            checksum,
            &header.responsible,
            &header.acronym,
            &header.tax_id,
            &header.destination,
            &jurisdiction,
            &header.version,
        ],
    )
}

/// A generated BPA document and its tallies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BpaDocument {
    /// Header plus detail lines, CRLF-terminated
    #[serde(skip)]
    pub content: String,
    pub mode: BpaMode,
    /// Header competency, `AAAAMM`
    pub competency: String,
    pub acronym: String,
    pub detail_count: usize,
    /// Header line included
    pub line_count: usize,
    pub total_sheets: u32,
    pub checksum: String,
    pub contexts: Vec<ContextSheets>,
    pub excluded: ExclusionCounts,
}

impl BpaDocument {
    /// `BPA_{competency}_{acronym}.txt`, `EXPORT` standing in for a blank acronym
    pub fn default_file_name(&self) -> String {
        let acronym = self.acronym.trim();
        let acronym = if acronym.is_empty() { "EXPORT" } else { acronym };
        format!("BPA_{}_{}.txt", self.competency, acronym)
    }

    /// Lines without their terminators
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.split_terminator(LINE_ENDING)
    }

    pub fn header_line(&self) -> &str {
        self.lines().next().unwrap_or("")
    }

    /// Summary as pretty JSON (content excluded)
    pub fn summary_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the document bytes to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let export_error = |e: std::io::Error| BpaError::Export {
            message: format!("cannot write {}: {}", path.display(), e),
            path: Some(path.to_path_buf()),
        };

        let file = File::create(path).map_err(export_error)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(self.content.as_bytes()).map_err(export_error)?;
        writer.flush().map_err(export_error)?;

        info!(path = %path.display(), bytes = self.content.len(), "document written");
        Ok(())
    }
}

/// Generates documents for one header and layout
#[derive(Debug, Clone)]
pub struct BpaExporter {
    header: HeaderConfig,
    mode: BpaMode,
}

impl BpaExporter {
    pub fn new(header: HeaderConfig, mode: BpaMode) -> Self {
        Self { header, mode }
    }

    pub fn header(&self) -> &HeaderConfig {
        &self.header
    }

    pub fn mode(&self) -> BpaMode {
        self.mode
    }

    /// Build the document for `records`
    ///
    /// Never fails: records that cannot be written are excluded and counted.
    /// No records gives a header-only document with zero sheets.
    pub fn generate(&self, records: &[Record]) -> BpaDocument {
        let (records, excluded) = prepare_records(&self.header, records, self.mode);
        let pagination = paginate(&records);
        let serializer = serializer_for(self.mode);
        let checksum = checksum(&records);

        let mut content = header_line(&self.header, records.len(), pagination.total_sheets, &checksum);
        content.push_str(LINE_ENDING);
        for (record, position) in records.iter().zip(&pagination.positions) {
            content.push_str(&serializer.serialize(record, *position));
            content.push_str(LINE_ENDING);
        }

        info!(
            mode = %self.mode,
            details = records.len(),
            sheets = pagination.total_sheets,
            checksum = %checksum,
            excluded = excluded.total(),
            "document generated"
        );

        BpaDocument {
            content,
            mode: self.mode,
            competency: self.header.target_competency(),
            acronym: self.header.acronym.clone(),
            detail_count: records.len(),
            line_count: records.len() + 1,
            total_sheets: pagination.total_sheets,
            checksum,
            contexts: pagination.contexts,
            excluded,
        }
    }
}

/// Generate the document for `records` under `header` in `mode`
pub fn generate(header: &HeaderConfig, records: &[Record], mode: BpaMode) -> BpaDocument {
    BpaExporter::new(header.clone(), mode).generate(records)
}
