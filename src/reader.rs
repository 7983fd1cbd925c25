/*!
 * Row mapper for delimited procedure sheets
 *
 * Turns pasted or exported spreadsheet text into canonical [`Record`]s:
 * every line is split on its own delimiter, every field is resolved through
 * the [`ColumnMapping`] and normalized, and rows that cannot be billed are
 * dropped and counted in a [`MappingReport`]. Nothing in here fails on bad
 * cells; only reading the input file itself can return an error.
 *
 * Also parses the two auxiliary lookup sheets used by the individualized
 * layout (professional name to CNS, patient name to street address).
 */

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
#[cfg(feature = "progress")]
use std::time::Instant;

use chrono::{Local, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::{debug, info};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    data_types::{BpaMode, PatientAddress, Record},
    dictionary::{ProcedureContext, FORBIDDEN_PROCEDURE_CODE},
    normalize::{
        digits_only, normalize_age_at, normalize_competency, normalize_full_date, normalize_key,
        normalize_procedure, normalize_sex, parse_quantity, strip_diacritics,
    },
    schema::{ColumnMapping, Field},
    BpaError, Result,
};

/// Name-keyed auxiliary table (cleaned name -> value)
pub type NameLookup = HashMap<String, String>;

/// Lines between two progress callbacks
#[cfg(feature = "progress")]
const PROGRESS_INTERVAL: usize = 1000;

/// Progress information for long mapping runs
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Data lines processed so far
    pub current_lines: usize,
    /// Data lines in the input
    pub total_lines: usize,
    /// Time elapsed since mapping started
    pub elapsed_time: Duration,
    /// Current processing rate
    pub lines_per_second: f64,
}

/// Why a data line did not become a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    EmptyFacility,
    EmptyProcedure,
    NonPositiveQuantity,
    OtherCompetency,
    ForbiddenProcedure,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::EmptyFacility => "empty facility id",
            DropReason::EmptyProcedure => "empty procedure code",
            DropReason::NonPositiveQuantity => "quantity not positive",
            DropReason::OtherCompetency => "competency differs from the target",
            DropReason::ForbiddenProcedure => "procedure not billable in physician context",
        };
        f.write_str(text)
    }
}

/// Outcome counters of one mapping run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingReport {
    /// Non-blank data lines seen (header row excluded)
    pub lines_read: usize,
    /// Records produced
    pub records: usize,
    pub empty_facility: usize,
    pub empty_procedure: usize,
    pub non_positive_quantity: usize,
    pub other_competency: usize,
    pub forbidden_procedure: usize,
}

impl MappingReport {
    fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::EmptyFacility => self.empty_facility += 1,
            DropReason::EmptyProcedure => self.empty_procedure += 1,
            DropReason::NonPositiveQuantity => self.non_positive_quantity += 1,
            DropReason::OtherCompetency => self.other_competency += 1,
            DropReason::ForbiddenProcedure => self.forbidden_procedure += 1,
        }
    }

    /// Drops for one reason
    pub fn count(&self, reason: DropReason) -> usize {
        match reason {
            DropReason::EmptyFacility => self.empty_facility,
            DropReason::EmptyProcedure => self.empty_procedure,
            DropReason::NonPositiveQuantity => self.non_positive_quantity,
            DropReason::OtherCompetency => self.other_competency,
            DropReason::ForbiddenProcedure => self.forbidden_procedure,
        }
    }

    /// Total dropped lines
    pub fn dropped(&self) -> usize {
        self.empty_facility
            + self.empty_procedure
            + self.non_positive_quantity
            + self.other_competency
            + self.forbidden_procedure
    }
}

/// Records produced by [`RowMapper::map`] and the run's counters
#[derive(Debug, Clone, Default)]
pub struct MappedRows {
    pub records: Vec<Record>,
    pub report: MappingReport,
}

/// Facts derived once per run from the procedure column header
struct ProcedureColumn {
    header: String,
    signalled: Option<ProcedureContext>,
}

impl ProcedureColumn {
    fn new(header: String) -> Self {
        let signalled = ProcedureContext::signalled_by(&header);
        Self { header, signalled }
    }
}

/// Maps delimited text to canonical records
pub struct RowMapper {
    mode: BpaMode,
    mapping: ColumnMapping,
    has_header_row: bool,
    /// Header text of the procedure column, when it cannot be read from the input
    procedure_header: Option<String>,
    /// Keep only records of this competency
    competency_filter: Option<String>,
    professionals: NameLookup,
    patient_addresses: NameLookup,
    /// "Today" for age computation
    reference_date: NaiveDate,
    #[cfg(feature = "progress")]
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl RowMapper {
    /// Create a mapper for `mode` expecting a header row
    pub fn new(mode: BpaMode, mapping: ColumnMapping) -> Self {
        Self {
            mode,
            mapping,
            has_header_row: true,
            procedure_header: None,
            competency_filter: None,
            professionals: NameLookup::new(),
            patient_addresses: NameLookup::new(),
            reference_date: Local::now().date_naive(),
            #[cfg(feature = "progress")]
            progress_callback: None,
            #[cfg(feature = "progress")]
            show_progress_bar: false,
        }
    }

    /// Whether the first non-blank line holds column names
    pub fn with_header_row(mut self, has_header_row: bool) -> Self {
        self.has_header_row = has_header_row;
        self
    }

    /// Header text of the procedure column
    ///
    /// Without it the header row cell of the mapped procedure column is
    /// used, if there is one.
    pub fn with_procedure_header(mut self, header: impl Into<String>) -> Self {
        self.procedure_header = Some(header.into());
        self
    }

    /// Drop records whose competency differs from `competency` (normalized)
    pub fn with_competency_filter(mut self, competency: &str) -> Self {
        self.competency_filter = Some(normalize_competency(competency));
        self
    }

    /// Professional name -> CNS table, keys as built by [`clean_professional_key`]
    pub fn with_professionals(mut self, lookup: NameLookup) -> Self {
        self.professionals = lookup;
        self
    }

    /// Patient name -> street table, keys as built by [`normalize_key`]
    pub fn with_patient_addresses(mut self, lookup: NameLookup) -> Self {
        self.patient_addresses = lookup;
        self
    }

    /// Date ages are computed against
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = date;
        self
    }

    #[cfg(feature = "progress")]
    /// Set a progress callback function
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    pub fn mode(&self) -> BpaMode {
        self.mode
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Map every data line of `text`
    pub fn map(&self, text: &str) -> MappedRows {
        let mut lines = text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());

        let header_cells = if self.has_header_row {
            lines.next().map(|(_, line)| split_line(line))
        } else {
            None
        };

        let procedure = ProcedureColumn::new(
            self.procedure_header
                .clone()
                .or_else(|| {
                    let index = self.mapping.column(Field::Procedure)?;
                    header_cells.as_ref()?.get(index).cloned()
                })
                .unwrap_or_default(),
        );
        debug!(
            header = %procedure.header,
            context = ?procedure.signalled,
            "procedure column context"
        );

        let data_lines: Vec<(usize, &str)> = lines.collect();
        let total = data_lines.len();
        let mut report = MappingReport::default();
        let mut records = Vec::with_capacity(total);

        #[cfg(feature = "progress")]
        let start_time = Instant::now();

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        for (done, (index, line)) in data_lines.into_iter().enumerate() {
            report.lines_read += 1;
            let cells = split_line(line);

            match self.map_row(&cells, &procedure) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(line = index + 1, %reason, "row dropped");
                    report.record_drop(reason);
                }
            }

            #[cfg(feature = "progress")]
            {
                if let Some(ref pb) = progress_bar {
                    pb.inc(1);
                }

                let current = done + 1;
                if let Some(ref callback) = self.progress_callback {
                    if current % PROGRESS_INTERVAL == 0 || current == total {
                        let elapsed = start_time.elapsed();
                        let lines_per_second = if elapsed.as_secs_f64() > 0.0 {
                            current as f64 / elapsed.as_secs_f64()
                        } else {
                            0.0
                        };
                        callback(ProgressInfo {
                            current_lines: current,
                            total_lines: total,
                            elapsed_time: elapsed,
                            lines_per_second,
                        });
                    }
                }
            }
            #[cfg(not(feature = "progress"))]
            let _ = done;
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        report.records = records.len();
        info!(
            mode = %self.mode,
            lines = report.lines_read,
            records = report.records,
            dropped = report.dropped(),
            "rows mapped"
        );

        MappedRows { records, report }
    }

    fn map_row(&self, cells: &[String], procedure: &ProcedureColumn) -> std::result::Result<Record, DropReason> {
        let m = &self.mapping;

        let facility_id = m.value_or_default(Field::FacilityId, cells).to_string();
        if facility_id.is_empty() {
            return Err(DropReason::EmptyFacility);
        }

        let procedure_code = normalize_procedure(m.value(Field::Procedure, cells), &procedure.header);
        if procedure_code.is_empty() {
            return Err(DropReason::EmptyProcedure);
        }

        let raw_quantity = m.value_or_default(Field::Quantity, cells);
        let quantity = if raw_quantity.is_empty() { 1 } else { parse_quantity(raw_quantity) };
        if quantity <= 0 {
            return Err(DropReason::NonPositiveQuantity);
        }

        let raw_competency = m.value_or_default(Field::Competency, cells);
        let competency = normalize_competency(raw_competency);
        if let Some(target) = &self.competency_filter {
            if &competency != target {
                return Err(DropReason::OtherCompetency);
            }
        }

        if procedure.signalled == Some(ProcedureContext::Physician) && procedure_code == FORBIDDEN_PROCEDURE_CODE {
            return Err(DropReason::ForbiddenProcedure);
        }

        let occupation_code = match procedure.signalled {
            Some(context) => context.occupation_code().to_string(),
            None => m.value_or_default(Field::OccupationCode, cells).to_string(),
        };

        let origin = match m.value_or_default(Field::Origin, cells) {
            "" => "BPA".to_string(),
            origin => origin.to_string(),
        };

        let mut record = Record {
            facility_id,
            competency,
            occupation_code,
            procedure_code,
            age: normalize_age_at(m.value(Field::Age, cells), self.reference_date),
            quantity: u32::try_from(quantity).unwrap_or(u32::MAX),
            origin,
            ..Default::default()
        };

        if self.mode == BpaMode::Individualized {
            self.fill_individualized(&mut record, cells, raw_competency);
        }

        Ok(record)
    }

    fn fill_individualized(&self, record: &mut Record, cells: &[String], raw_competency: &str) {
        let m = &self.mapping;

        let raw_birth = m.value(Field::BirthDate, cells).trim();
        if !raw_birth.is_empty() {
            if record.age.is_empty() {
                record.age = normalize_age_at(raw_birth, self.reference_date);
            }
            record.birth_date = normalize_full_date(raw_birth, &record.competency);
        }

        record.professional_name = m.value_or_default(Field::ProfessionalName, cells).to_string();
        record.professional_id =
            self.resolve_professional(m.value_or_default(Field::ProfessionalId, cells), &record.professional_name);

        let raw_date = match m.value(Field::AttendanceDate, cells) {
            "" => raw_competency,
            date => date,
        };
        record.attendance_date = normalize_full_date(raw_date, &record.competency);

        let patient_id = match m.value(Field::PatientId, cells).trim() {
            "" => m.value(Field::PatientTaxId, cells),
            id => id,
        };
        record.patient_id = digits_only(patient_id);
        record.patient_name = m.value(Field::PatientName, cells).to_string();
        record.sex = normalize_sex(m.value(Field::Sex, cells));
        record.municipality_code = m.value_or_default(Field::MunicipalityCode, cells).to_string();
        record.diagnosis_code = m
            .value(Field::DiagnosisCode, cells)
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        record.race = m.value_or_default(Field::Race, cells).to_string();
        record.nationality = "010".to_string();
        record.care_character = "01".to_string();

        let street = match m.value(Field::Street, cells) {
            "" => self
                .patient_addresses
                .get(&normalize_key(&record.patient_name))
                .map(String::as_str)
                .unwrap_or_else(|| m.default_value(Field::Street)),
            street => street,
        };

        record.address = PatientAddress {
            postal_code: m.value_or_default(Field::PostalCode, cells).to_string(),
            street: street.to_string(),
            number: m.value_or_default(Field::AddressNumber, cells).to_string(),
            neighborhood: m.value_or_default(Field::Neighborhood, cells).to_string(),
            phone: m.value_or_default(Field::Phone, cells).to_string(),
            ..Default::default()
        };
    }

    /// A numeric identifier is kept; anything else goes through the
    /// professional table, first by the name column, then by the raw
    /// identifier cell read as a name.
    fn resolve_professional(&self, raw_id: &str, name: &str) -> String {
        let raw = raw_id.trim();
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            return raw.to_string();
        }

        [name, raw]
            .iter()
            .map(|candidate| clean_professional_key(candidate))
            .filter(|key| !key.is_empty())
            .find_map(|key| self.professionals.get(&key).cloned())
            .unwrap_or_else(|| raw.to_string())
    }
}

/// Delimiter of one line: tab, else semicolon, else comma
pub fn detect_delimiter(line: &str) -> u8 {
    if line.contains('\t') {
        b'\t'
    } else if line.contains(';') {
        b';'
    } else {
        b','
    }
}

fn clean_cell(cell: &str) -> String {
    let cell = cell.trim();
    let unquoted = if cell.len() >= 2 && cell.starts_with('"') && cell.ends_with('"') {
        &cell[1..cell.len() - 1]
    } else {
        cell
    };
    unquoted.to_string()
}

fn split_with(line: &str, delimiter: u8) -> Vec<String> {
    if delimiter == b'\t' {
        return line.split('\t').map(clean_cell).collect();
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(clean_cell).collect(),
        _ => line.split(char::from(delimiter)).map(clean_cell).collect(),
    }
}

/// Split one line on its own delimiter, trimming and unquoting every cell
///
/// Semicolon and comma lines honour double quotes, so `"1,5",2` has two
/// cells.
pub fn split_line(line: &str) -> Vec<String> {
    split_with(line, detect_delimiter(line))
}

/// Column labels of the input
///
/// With a header row these are its cells; without one, `Dados 1`,
/// `Dados 2`, ... for as many columns as the first line has.
pub fn read_headers(text: &str, has_header_row: bool) -> Vec<String> {
    let Some(first) = text.lines().find(|line| !line.trim().is_empty()) else {
        return Vec::new();
    };
    let cells = split_line(first);
    if has_header_row {
        cells
    } else {
        (1..=cells.len()).map(|i| format!("Dados {}", i)).collect()
    }
}

/// Read a delimited text file, dropping a leading byte-order mark
pub fn read_input_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| BpaError::io_at(e, path))?;
    debug!(path = %path.display(), bytes = text.len(), "input file read");
    Ok(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text))
}

/// Lookup key for professional names: normalized, with one leading title
/// (`DR`, `DRA`, `ENF`, `MEDICO`, `MED`) removed
pub fn clean_professional_key(name: &str) -> String {
    let key = normalize_key(name);
    for title in ["DR", "DRA", "ENF", "MEDICO", "MED"] {
        if let Some(rest) = key.strip_prefix(title) {
            if rest.starts_with(char::is_whitespace) {
                return rest.trim().to_string();
            }
        }
    }
    key
}

fn parse_lookup(
    text: &str,
    name_terms: &[&str],
    value_terms: &[&str],
    key_of: fn(&str) -> String,
    value_of: fn(&str) -> String,
) -> NameLookup {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return NameLookup::new();
    };

    let delimiter = detect_delimiter(header_line);
    let headers: Vec<String> = split_with(header_line, delimiter)
        .iter()
        .map(|h| strip_diacritics(&h.to_lowercase()))
        .collect();
    let find = |terms: &[&str]| headers.iter().position(|h| terms.iter().any(|t| h.contains(t)));

    let (Some(name_index), Some(value_index)) = (find(name_terms), find(value_terms)) else {
        debug!(?headers, "lookup sheet lacks the name or value column");
        return NameLookup::new();
    };

    let mut lookup = NameLookup::new();
    for line in lines {
        let cells = split_with(line, delimiter);
        if let (Some(name), Some(value)) = (cells.get(name_index), cells.get(value_index)) {
            let key = key_of(name);
            let value = value_of(value);
            if !key.is_empty() && !value.is_empty() {
                lookup.insert(key, value);
            }
        }
    }
    lookup
}

/// Parse a professional sheet into a name -> CNS table
///
/// The name column is the first header mentioning `nome`, `profissional`
/// or `medico`; the identifier column the first mentioning `cns`, `cartao`
/// or `sus`. Returns an empty table when either is missing.
pub fn parse_professional_lookup(text: &str) -> NameLookup {
    let lookup = parse_lookup(
        text,
        &["nome", "profissional", "medico"],
        &["cns", "cartao", "sus"],
        clean_professional_key,
        digits_only,
    );
    debug!(entries = lookup.len(), "professional lookup parsed");
    lookup
}

/// Parse a patient sheet into a name -> street table
pub fn parse_patient_address_lookup(text: &str) -> NameLookup {
    let lookup = parse_lookup(
        text,
        &["nome", "paciente"],
        &["endereco", "logradouro", "rua"],
        normalize_key,
        |value| value.trim().to_uppercase(),
    );
    debug!(entries = lookup.len(), "patient address lookup parsed");
    lookup
}
