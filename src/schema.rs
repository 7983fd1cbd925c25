/*!
 * Schema definitions for BPA input and output
 *
 * Input side: the canonical fields a spreadsheet column can be mapped to,
 * how each field is resolved (a column index or a fixed default value) and
 * the header-name heuristics used to guess a mapping.
 *
 * Output side: the fixed-width layouts of the header line (record 01), the
 * consolidated detail line (record 02) and the individualized detail line
 * (record 03), as ordered width tables.
 */

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::normalize::{pad_alpha, pad_num, strip_diacritics};
use crate::{BpaError, Result};

/// Canonical input field a column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    FacilityId,
    Competency,
    OccupationCode,
    Procedure,
    Age,
    Quantity,
    Origin,
    ProfessionalName,
    ProfessionalId,
    AttendanceDate,
    PatientId,
    /// Patient tax id, used when the patient id column is blank
    PatientTaxId,
    Sex,
    MunicipalityCode,
    DiagnosisCode,
    PatientName,
    BirthDate,
    Race,
    Phone,
    PostalCode,
    Street,
    AddressNumber,
    Neighborhood,
}

impl Field {
    /// Every field, in display order
    pub const ALL: [Field; 23] = [
        Field::FacilityId,
        Field::Competency,
        Field::OccupationCode,
        Field::Procedure,
        Field::Age,
        Field::Quantity,
        Field::Origin,
        Field::ProfessionalName,
        Field::ProfessionalId,
        Field::AttendanceDate,
        Field::PatientId,
        Field::PatientTaxId,
        Field::Sex,
        Field::MunicipalityCode,
        Field::DiagnosisCode,
        Field::PatientName,
        Field::BirthDate,
        Field::Race,
        Field::Phone,
        Field::PostalCode,
        Field::Street,
        Field::AddressNumber,
        Field::Neighborhood,
    ];

    /// Configuration key of the field (`facility_id`, `procedure`, ...)
    pub fn key(&self) -> &'static str {
        match self {
            Field::FacilityId => "facility_id",
            Field::Competency => "competency",
            Field::OccupationCode => "occupation_code",
            Field::Procedure => "procedure",
            Field::Age => "age",
            Field::Quantity => "quantity",
            Field::Origin => "origin",
            Field::ProfessionalName => "professional_name",
            Field::ProfessionalId => "professional_id",
            Field::AttendanceDate => "attendance_date",
            Field::PatientId => "patient_id",
            Field::PatientTaxId => "patient_tax_id",
            Field::Sex => "sex",
            Field::MunicipalityCode => "municipality_code",
            Field::DiagnosisCode => "diagnosis_code",
            Field::PatientName => "patient_name",
            Field::BirthDate => "birth_date",
            Field::Race => "race",
            Field::Phone => "phone",
            Field::PostalCode => "postal_code",
            Field::Street => "street",
            Field::AddressNumber => "address_number",
            Field::Neighborhood => "neighborhood",
        }
    }

    /// Fields only the individualized layout writes
    pub fn is_individualized_only(&self) -> bool {
        !matches!(
            self,
            Field::FacilityId
                | Field::Competency
                | Field::OccupationCode
                | Field::Procedure
                | Field::Age
                | Field::Quantity
                | Field::Origin
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = BpaError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.key() == wanted)
            .ok_or_else(|| BpaError::InvalidMapping {
                field: s.to_string(),
                message: format!(
                    "unknown field; expected one of: {}",
                    Field::ALL.iter().map(|f| f.key()).collect::<Vec<_>>().join(", ")
                ),
            })
    }
}

// Serialized as the plain configuration key
impl Serialize for Field {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

/// Fallback values for fields without a column (or with an empty cell)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDefaults(BTreeMap<Field, String>);

impl Default for FieldDefaults {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert(Field::Origin, "BPA".to_string());
        values.insert(Field::Race, "03".to_string());
        Self(values)
    }
}

impl FieldDefaults {
    /// No fallback values at all
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Default for `field`, empty when none is configured
    pub fn get(&self, field: Field) -> &str {
        self.0.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &String)> {
        self.0.iter()
    }
}

/// How one field gets its raw value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    /// Read the cell at this zero-based column index
    Mapped(usize),
    /// Use this value for every row
    Fixed(String),
}

/// Resolution strategy for every canonical field
///
/// Built once from explicit column indices plus the defaults bag; fields
/// without an index become [`ColumnSource::Fixed`]. Mapped fields keep their
/// default around as the fallback for empty cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    sources: BTreeMap<Field, ColumnSource>,
    defaults: FieldDefaults,
}

impl ColumnMapping {
    /// Resolve every field from explicit indices and defaults
    pub fn new(columns: &BTreeMap<Field, usize>, defaults: &FieldDefaults) -> Self {
        let sources = Field::ALL
            .iter()
            .map(|field| {
                let source = match columns.get(field) {
                    Some(index) => ColumnSource::Mapped(*index),
                    None => ColumnSource::Fixed(defaults.get(*field).to_string()),
                };
                (*field, source)
            })
            .collect();
        Self {
            sources,
            defaults: defaults.clone(),
        }
    }

    /// Guess the mapping from header names, see [`detect_columns`]
    pub fn auto_detect(headers: &[String], defaults: &FieldDefaults) -> Self {
        Self::new(&detect_columns(headers), defaults)
    }

    /// Point `field` at a column, replacing whatever it had
    pub fn with_column(mut self, field: Field, index: usize) -> Self {
        self.sources.insert(field, ColumnSource::Mapped(index));
        self
    }

    /// Detach `field` from its column and use the default instead
    pub fn without_column(mut self, field: Field) -> Self {
        let fixed = ColumnSource::Fixed(self.defaults.get(field).to_string());
        self.sources.insert(field, fixed);
        self
    }

    pub fn source(&self, field: Field) -> &ColumnSource {
        // every field is inserted by `new`
        &self.sources[&field]
    }

    /// Column index of `field`, if it is mapped
    pub fn column(&self, field: Field) -> Option<usize> {
        match self.source(field) {
            ColumnSource::Mapped(index) => Some(*index),
            ColumnSource::Fixed(_) => None,
        }
    }

    pub fn default_value(&self, field: Field) -> &str {
        self.defaults.get(field)
    }

    /// Explicit indices only, the form stored in configuration
    pub fn columns(&self) -> BTreeMap<Field, usize> {
        self.sources
            .iter()
            .filter_map(|(field, source)| match source {
                ColumnSource::Mapped(index) => Some((*field, *index)),
                ColumnSource::Fixed(_) => None,
            })
            .collect()
    }

    /// Raw value of `field` in a split row
    ///
    /// Mapped fields read their cell (empty when the row is short), fixed
    /// fields return their value.
    pub fn value<'a>(&'a self, field: Field, cells: &'a [String]) -> &'a str {
        match self.source(field) {
            ColumnSource::Mapped(index) => cells.get(*index).map(String::as_str).unwrap_or(""),
            ColumnSource::Fixed(value) => value,
        }
    }

    /// Raw value of `field`, or its default when the cell is empty
    pub fn value_or_default<'a>(&'a self, field: Field, cells: &'a [String]) -> &'a str {
        let value = self.value(field, cells);
        if value.is_empty() {
            self.default_value(field)
        } else {
            value
        }
    }

    /// Refuse mappings pointing past the last column of the header row
    pub fn check_columns(&self, column_count: usize) -> Result<()> {
        for (field, source) in &self.sources {
            if let ColumnSource::Mapped(index) = source {
                if *index >= column_count {
                    return Err(BpaError::InvalidMapping {
                        field: field.key().to_string(),
                        message: format!(
                            "column {} does not exist, the input has {} columns",
                            index, column_count
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Header name reduced for matching: lowercase, no diacritics, `[a-z0-9]` only
fn match_key(header: &str) -> String {
    strip_diacritics(&header.to_lowercase())
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Guess column indices from header names
///
/// Later columns win for most fields. Competency prefers a column literally
/// named `J - DATA`, then the first date column that is neither a birth nor
/// an attendance date. A procedure column whose header names both `BPA` and
/// `MEDICO` wins over generic procedure columns.
pub fn detect_columns(headers: &[String]) -> BTreeMap<Field, usize> {
    let mut columns = BTreeMap::new();
    let mut physician_procedure = false;

    for (index, header) in headers.iter().enumerate() {
        let h = match_key(header);
        let has = |needle: &str| h.contains(needle);

        if has("cnes") {
            columns.insert(Field::FacilityId, index);
        }

        if h == "jdata" {
            columns.insert(Field::Competency, index);
        } else if !columns.contains_key(&Field::Competency)
            && has("data")
            && !has("nasc")
            && !has("atend")
        {
            columns.insert(Field::Competency, index);
        }

        if has("cbo") || has("ocupacao") {
            columns.insert(Field::OccupationCode, index);
        }

        if !physician_procedure && has("medico") && has("bpa") {
            columns.insert(Field::Procedure, index);
            physician_procedure = true;
        }
        if !physician_procedure && !columns.contains_key(&Field::Procedure) {
            if (has("cod") && has("proc")) || has("procedimento") {
                columns.insert(Field::Procedure, index);
            }
        }

        if has("datadenascimento") || has("dtnasc") {
            columns.insert(Field::BirthDate, index);
        }
        if has("atend") && has("data") {
            columns.insert(Field::AttendanceDate, index);
        }
        if has("idade") {
            columns.insert(Field::Age, index);
        }
        if has("quantidade") || has("qtd") {
            columns.insert(Field::Quantity, index);
        }
        if has("origem") || has("fonte") {
            columns.insert(Field::Origin, index);
        }

        if has("nome") && (has("paciente") || has("usuario") || h == "nome") {
            columns.insert(Field::PatientName, index);
        }

        let is_card = has("cns") || has("cartao");
        if has("profissional") || (has("medico") && !has("bpa") && !has("proc")) {
            if has("nome") || !is_card {
                columns.insert(Field::ProfessionalName, index);
            }
            if is_card {
                columns.insert(Field::ProfessionalId, index);
            }
        }
        if is_card {
            if has("paciente") {
                columns.insert(Field::PatientId, index);
            } else if !columns.contains_key(&Field::ProfessionalId) {
                columns.insert(Field::ProfessionalId, index);
            }
        }

        if has("cpf") && !has("medico") && !has("prof") {
            columns.insert(Field::PatientTaxId, index);
        }
        if has("sexo") || has("genero") {
            columns.insert(Field::Sex, index);
        }
        if has("raca") || has("cor") {
            columns.insert(Field::Race, index);
        }
        if has("municipio") || has("ibge") {
            columns.insert(Field::MunicipalityCode, index);
        }
        if has("cid") && !has("cidade") {
            columns.insert(Field::DiagnosisCode, index);
        }
        if has("telefone") || has("celular") {
            columns.insert(Field::Phone, index);
        }
        if has("cep") {
            columns.insert(Field::PostalCode, index);
        }
        if has("endereco") || has("logradouro") || has("rua") {
            columns.insert(Field::Street, index);
        }
        if has("bairro") {
            columns.insert(Field::Neighborhood, index);
        }
    }

    columns
}

/// Padding rule of one fixed-width position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Digits only, zero-padded on the left
    Numeric,
    /// Uppercase ASCII, space-padded on the right
    Alpha,
}

/// One position block of a fixed-width line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutField {
    pub name: &'static str,
    pub width: usize,
    pub kind: FieldKind,
}

const fn num(name: &'static str, width: usize) -> LayoutField {
    LayoutField { name, width, kind: FieldKind::Numeric }
}

const fn alpha(name: &'static str, width: usize) -> LayoutField {
    LayoutField { name, width, kind: FieldKind::Alpha }
}

/// Header line (record 01)
pub const HEADER_LAYOUT: [LayoutField; 12] = [
    num("record_tag", 2),
    alpha("marker", 5),
    num("competency", 6),
    num("line_count", 6),
    num("sheet_count", 6),
    num("checksum", 4),
    alpha("responsible", 30),
    alpha("acronym", 6),
    num("tax_id", 14),
    alpha("destination", 40),
    alpha("jurisdiction", 1),
    alpha("version", 10),
];

/// Consolidated detail line (record 02)
pub const CONSOLIDATED_LAYOUT: [LayoutField; 10] = [
    num("record_tag", 2),
    num("facility_id", 7),
    num("competency", 6),
    alpha("occupation_code", 6),
    num("sheet", 3),
    num("sequence", 2),
    num("procedure_code", 10),
    num("age", 3),
    num("quantity", 6),
    alpha("origin", 3),
];

/// Individualized detail line (record 03)
pub const INDIVIDUALIZED_LAYOUT: [LayoutField; 37] = [
    num("record_tag", 2),
    num("facility_id", 7),
    num("competency", 6),
    num("professional_id", 15),
    alpha("occupation_code", 6),
    num("attendance_date", 8),
    num("sheet", 3),
    num("sequence", 2),
    num("procedure_code", 10),
    num("patient_id", 15),
    alpha("sex", 1),
    num("municipality_code", 6),
    alpha("diagnosis_code", 4),
    num("age", 3),
    num("quantity", 6),
    num("care_character", 2),
    num("authorization_number", 13),
    alpha("origin", 3),
    alpha("patient_name", 30),
    num("birth_date", 8),
    num("race", 2),
    num("ethnicity", 4),
    num("nationality", 3),
    num("service_code", 3),
    num("classification_code", 3),
    num("team_sequence", 8),
    num("team_area", 4),
    num("company_tax_id", 14),
    num("postal_code", 8),
    num("street_type", 3),
    alpha("street", 30),
    alpha("complement", 10),
    alpha("number", 5),
    alpha("neighborhood", 30),
    alpha("phone", 11),
    alpha("email", 40),
    alpha("reserved", 10),
];

/// Total width of a layout
pub const fn line_width(layout: &[LayoutField]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < layout.len() {
        total += layout[i].width;
        i += 1;
    }
    total
}

pub const HEADER_WIDTH: usize = line_width(&HEADER_LAYOUT);
pub const CONSOLIDATED_WIDTH: usize = line_width(&CONSOLIDATED_LAYOUT);
pub const INDIVIDUALIZED_WIDTH: usize = line_width(&INDIVIDUALIZED_LAYOUT);

/// Render values into a fixed-width line, one value per layout block
///
/// Missing trailing values render as empty fields.
pub fn render_line(layout: &[LayoutField], values: &[&str]) -> String {
    debug_assert_eq!(layout.len(), values.len(), "one value per layout block");
    let mut line = String::with_capacity(line_width(layout));
    for (index, field) in layout.iter().enumerate() {
        let value = values.get(index).copied().unwrap_or("");
        match field.kind {
            FieldKind::Numeric => line.push_str(&pad_num(value, field.width)),
            FieldKind::Alpha => line.push_str(&pad_alpha(value, field.width)),
        }
    }
    line
}
