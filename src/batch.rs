/*!
 * One-call pipeline from delimited text to a BPA document
 *
 * Provides a builder that gathers the input sheet, the optional lookup
 * sheets and the generation settings, then runs mapping and consolidation.
 * The resulting [`BpaBatch`] holds the canonical records and renders the
 * export document on demand.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::{
    config::BpaConfig,
    consolidate::consolidate,
    data_types::{BpaMode, HeaderConfig, Record},
    export::{BpaDocument, BpaExporter},
    reader::{
        parse_patient_address_lookup, parse_professional_lookup, read_headers, read_input_file, MappingReport,
        NameLookup, RowMapper,
    },
    schema::{ColumnMapping, Field, FieldDefaults},
    BpaError, Result,
};

/// Where a sheet comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Text already in memory
    Text(String),
    /// Delimited text file on disk
    File(PathBuf),
}

impl InputSource {
    /// The sheet's text
    pub fn read(&self) -> Result<String> {
        match self {
            InputSource::Text(text) => Ok(text.clone()),
            InputSource::File(path) => read_input_file(path),
        }
    }
}

/// Builder for a generation run
///
/// # Example
/// ```no_run
/// # use bpa::batch::BpaBatchBuilder;
/// # use bpa::BpaMode;
/// let batch = BpaBatchBuilder::new()
///     .input_file("data/procedimentos.tsv")
///     .mode(BpaMode::Consolidated)
///     .competency("202310")
///     .build()?;
/// batch.generate().write_to("BPA_202310_SMS.txt")?;
/// # Ok::<(), bpa::BpaError>(())
/// ```
pub struct BpaBatchBuilder {
    input: Option<InputSource>,
    professionals: Option<InputSource>,
    patients: Option<InputSource>,
    header: HeaderConfig,
    mode: BpaMode,
    consolidate: Option<bool>,
    has_header_row: bool,
    columns: BTreeMap<Field, usize>,
    overrides: BTreeMap<Field, usize>,
    defaults: FieldDefaults,
    procedure_header: Option<String>,
    reference_date: Option<NaiveDate>,
    filter_competency: bool,
    #[cfg(feature = "progress")]
    show_progress: bool,
}

impl Default for BpaBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BpaBatchBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            input: None,
            professionals: None,
            patients: None,
            header: HeaderConfig::default(),
            mode: BpaMode::Consolidated,
            consolidate: None,
            has_header_row: true,
            columns: BTreeMap::new(),
            overrides: BTreeMap::new(),
            defaults: FieldDefaults::default(),
            procedure_header: None,
            reference_date: None,
            filter_competency: false,
            #[cfg(feature = "progress")]
            show_progress: false,
        }
    }

    /// Start from a loaded configuration
    pub fn from_config(config: &BpaConfig) -> Self {
        Self {
            header: config.header.clone(),
            mode: config.mode,
            consolidate: Some(config.consolidate),
            has_header_row: config.has_header_row,
            columns: config.columns.clone(),
            defaults: config.defaults.clone(),
            ..Self::new()
        }
    }

    /// Use pasted text as the main sheet
    pub fn input_text(mut self, text: impl Into<String>) -> Self {
        self.input = Some(InputSource::Text(text.into()));
        self
    }

    /// Read the main sheet from a file
    pub fn input_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.input = Some(InputSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Professional name to CNS sheet
    pub fn professionals_text(mut self, text: impl Into<String>) -> Self {
        self.professionals = Some(InputSource::Text(text.into()));
        self
    }

    pub fn professionals_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.professionals = Some(InputSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Patient name to street sheet
    pub fn patients_text(mut self, text: impl Into<String>) -> Self {
        self.patients = Some(InputSource::Text(text.into()));
        self
    }

    pub fn patients_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.patients = Some(InputSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn header(mut self, header: HeaderConfig) -> Self {
        self.header = header;
        self
    }

    /// Set the header competency
    pub fn competency(mut self, competency: impl Into<String>) -> Self {
        self.header.competency = competency.into();
        self
    }

    pub fn mode(mut self, mode: BpaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable consolidation (on by default for BPA-C)
    pub fn consolidate(mut self, consolidate: bool) -> Self {
        self.consolidate = Some(consolidate);
        self
    }

    /// Whether the first line of the main sheet holds column names
    pub fn has_header_row(mut self, has_header_row: bool) -> Self {
        self.has_header_row = has_header_row;
        self
    }

    /// Map one field to a column index
    ///
    /// Once any column is set, auto-detection is skipped.
    pub fn column(mut self, field: Field, index: usize) -> Self {
        self.columns.insert(field, index);
        self
    }

    pub fn columns(mut self, columns: BTreeMap<Field, usize>) -> Self {
        self.columns = columns;
        self
    }

    /// Point one field at a column on top of the resolved mapping
    ///
    /// Unlike [`column`](Self::column) this keeps auto-detection for every
    /// other field.
    pub fn override_column(mut self, field: Field, index: usize) -> Self {
        self.overrides.insert(field, index);
        self
    }

    /// Set the fallback value of one field
    pub fn default_value(mut self, field: Field, value: impl Into<String>) -> Self {
        self.defaults.set(field, value);
        self
    }

    pub fn defaults(mut self, defaults: FieldDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Header text of the procedure column, for inputs without a header row
    pub fn procedure_header(mut self, header: impl Into<String>) -> Self {
        self.procedure_header = Some(header.into());
        self
    }

    /// Date ages are computed against (today by default)
    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Drop rows of other competencies while mapping
    ///
    /// They are excluded at generation either way; filtering early makes
    /// them show up in the [`MappingReport`].
    pub fn filter_competency(mut self, filter: bool) -> Self {
        self.filter_competency = filter;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar while mapping
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Read the sheets, map the rows and consolidate them
    pub fn build(self) -> Result<BpaBatch> {
        let input = self.input.ok_or_else(BpaError::missing_input)?;
        let text = input.read()?;
        info!(bytes = text.len(), mode = %self.mode, "input loaded");

        let headers = read_headers(&text, self.has_header_row);
        let mut mapping = if self.columns.is_empty() {
            ColumnMapping::auto_detect(&headers, &self.defaults)
        } else {
            ColumnMapping::new(&self.columns, &self.defaults)
        };
        for (field, index) in &self.overrides {
            mapping = mapping.with_column(*field, *index);
        }
        if self.has_header_row && !headers.is_empty() {
            mapping.check_columns(headers.len())?;
        }
        info!(columns = headers.len(), mapped = mapping.columns().len(), "column mapping resolved");

        let professionals = load_lookup(self.professionals.as_ref(), parse_professional_lookup)?;
        let patients = load_lookup(self.patients.as_ref(), parse_patient_address_lookup)?;

        let mut mapper = RowMapper::new(self.mode, mapping.clone())
            .with_header_row(self.has_header_row)
            .with_professionals(professionals)
            .with_patient_addresses(patients);
        if let Some(header) = &self.procedure_header {
            mapper = mapper.with_procedure_header(header.clone());
        }
        if let Some(date) = self.reference_date {
            mapper = mapper.with_reference_date(date);
        }
        if self.filter_competency {
            mapper = mapper.with_competency_filter(&self.header.competency);
        }
        #[cfg(feature = "progress")]
        {
            mapper = mapper.with_progress_bar(self.show_progress);
        }

        let mapped = mapper.map(&text);
        let mapped_count = mapped.records.len();

        let consolidating = self.consolidate.unwrap_or(true) && self.mode == BpaMode::Consolidated;
        let records = if consolidating {
            consolidate(mapped.records, self.mode)
        } else {
            mapped.records
        };
        info!(mapped = mapped_count, records = records.len(), consolidated = consolidating, "records ready");

        Ok(BpaBatch {
            header: self.header,
            mode: self.mode,
            headers,
            mapping,
            records,
            report: mapped.report,
        })
    }
}

fn load_lookup(source: Option<&InputSource>, parse: fn(&str) -> NameLookup) -> Result<NameLookup> {
    match source {
        Some(source) => Ok(parse(&source.read()?)),
        None => Ok(NameLookup::new()),
    }
}

/// Mapped, consolidated records of one run
#[derive(Debug, Clone)]
pub struct BpaBatch {
    header: HeaderConfig,
    mode: BpaMode,
    headers: Vec<String>,
    mapping: ColumnMapping,
    records: Vec<Record>,
    report: MappingReport,
}

impl BpaBatch {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Counters of the mapping stage
    pub fn report(&self) -> &MappingReport {
        &self.report
    }

    /// Mapping the rows were read with
    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Column labels of the main sheet
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn header(&self) -> &HeaderConfig {
        &self.header
    }

    pub fn mode(&self) -> BpaMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render the export document
    pub fn generate(&self) -> BpaDocument {
        BpaExporter::new(self.header.clone(), self.mode).generate(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CONSOLIDATED_WIDTH, HEADER_WIDTH, INDIVIDUALIZED_WIDTH};

    const SHEET: &str = "CNES;DATA;CBO;CODIGO PROCEDIMENTO;IDADE;QTD\n\
        1234567;10/10/2023;225125;0301010072;25;1\n\
        1234567;11/10/2023;225125;0301010072;40;2\n\
        1234567;12/10/2023;515105;0301010072;25;1\n";

    fn builder() -> BpaBatchBuilder {
        BpaBatchBuilder::new()
            .competency("202310")
            .reference_date(NaiveDate::from_ymd_opt(2023, 10, 31).unwrap())
    }

    #[test]
    fn test_missing_input() {
        let err = BpaBatchBuilder::new().build().unwrap_err();
        assert!(matches!(err, BpaError::MissingInput { .. }));
    }

    #[test]
    fn test_auto_detected_consolidated_run() {
        let batch = builder().input_text(SHEET).build().unwrap();
        assert_eq!(batch.headers().len(), 6);
        assert_eq!(batch.mapping().column(Field::Procedure), Some(3));
        assert_eq!(batch.report().lines_read, 3);
        // strict physician rows merge across ages
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].quantity, 3);

        let document = batch.generate();
        assert_eq!(document.detail_count, 2);
        assert_eq!(document.total_sheets, 1);
        let lines: Vec<&str> = document.lines().collect();
        assert_eq!(lines[0].len(), HEADER_WIDTH);
        assert!(lines[1..].iter().all(|line| line.len() == CONSOLIDATED_WIDTH));
    }

    #[test]
    fn test_consolidation_can_be_disabled() {
        let batch = builder().input_text(SHEET).consolidate(false).build().unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_explicit_column_out_of_range() {
        let err = builder()
            .input_text(SHEET)
            .column(Field::FacilityId, 0)
            .column(Field::Procedure, 9)
            .build()
            .unwrap_err();
        assert!(matches!(err, BpaError::InvalidMapping { .. }));
    }

    #[test]
    fn test_override_keeps_detected_columns() {
        let text = "CNES;DATA;CBO;DESCRICAO;CODIGO;QTD\n\
            1234567;10/10/2023;225125;Consulta;0301010072;1\n";
        let batch = builder()
            .input_text(text)
            .override_column(Field::Procedure, 4)
            .build()
            .unwrap();
        assert_eq!(batch.mapping().column(Field::FacilityId), Some(0));
        assert_eq!(batch.mapping().column(Field::Procedure), Some(4));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records()[0].procedure_code, "0301010072");

        let err = builder()
            .input_text(text)
            .override_column(Field::Procedure, 6)
            .build()
            .unwrap_err();
        assert!(matches!(err, BpaError::InvalidMapping { .. }));
    }

    #[test]
    fn test_competency_filter_reports_drops() {
        let text = format!("{}1234567;10/09/2023;225125;0301010072;25;1\n", SHEET);
        let batch = builder().input_text(text).filter_competency(true).build().unwrap();
        assert_eq!(batch.report().other_competency, 1);
    }

    #[test]
    fn test_individualized_run_with_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("atendimentos.csv");
        std::fs::write(
            &input,
            "CNES;DATA;CBO;PROCEDIMENTO;NOME PACIENTE;CNS PACIENTE;PROFISSIONAL;SEXO;DT NASC\n\
             1234567;15/10/2023;225125;0301010072;Maria da Silva;898001234567890;Dr Joao Souza;F;01/02/1980\n",
        )
        .unwrap();

        let batch = builder()
            .input_file(&input)
            .mode(BpaMode::Individualized)
            .professionals_text("Nome;CNS\nJoao Souza;700 0000 0000 0001\n")
            .patients_text("Paciente;Endereco\nMaria da Silva;Rua das Flores\n")
            .build()
            .unwrap();

        let record = &batch.records()[0];
        assert_eq!(record.professional_id, "700000000000001");
        assert_eq!(record.patient_id, "898001234567890");
        assert_eq!(record.sex, "F");
        assert_eq!(record.birth_date, "19800201");
        assert_eq!(record.age, "43");
        assert_eq!(record.address.street, "RUA DAS FLORES");

        let document = batch.generate();
        assert!(document.lines().skip(1).all(|line| line.len() == INDIVIDUALIZED_WIDTH));
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::ConfigBuilder::new()
            .competency("202310")
            .consolidate(false)
            .default_value(Field::FacilityId, "7654321")
            .build();
        let batch = BpaBatchBuilder::from_config(&config)
            .input_text("PROCEDIMENTO\n0301010072\n0301010072\n")
            .build()
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].facility_id, "7654321");
    }
}
