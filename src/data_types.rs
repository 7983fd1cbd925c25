/*!
 * Data type definitions for BPA records
 *
 * The header (record 01) settings for one generation run and the canonical
 * procedure record every input row is mapped into, for both the
 * consolidated (BPA-C, record 02) and individualized (BPA-I, record 03)
 * layouts.
 */

use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::normalize::{digits_only, normalize_competency};
use crate::{BpaError, Result};

/// Output layout selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BpaMode {
    /// Consolidated layout: one line per procedure/age/origin aggregate
    #[default]
    #[serde(rename = "BPA-C")]
    Consolidated,
    /// Individualized layout: one line per patient encounter
    #[serde(rename = "BPA-I")]
    Individualized,
}

impl BpaMode {
    /// Record identification tag of the detail lines
    pub fn record_tag(&self) -> &'static str {
        match self {
            BpaMode::Consolidated => "02",
            BpaMode::Individualized => "03",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BpaMode::Consolidated => "BPA-C",
            BpaMode::Individualized => "BPA-I",
        }
    }
}

impl fmt::Display for BpaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BpaMode {
    type Err = BpaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "BPA-C" | "C" | "CONSOLIDATED" => Ok(BpaMode::Consolidated),
            "BPA-I" | "I" | "INDIVIDUALIZED" => Ok(BpaMode::Individualized),
            _ => Err(BpaError::invalid_mode(s)),
        }
    }
}

/// Body the file is addressed to (state or municipal health secretariat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Jurisdiction {
    #[serde(rename = "E")]
    State,
    #[default]
    #[serde(rename = "M")]
    Municipal,
}

impl Jurisdiction {
    /// Single-character flag written verbatim in the header line
    pub fn flag(&self) -> char {
        match self {
            Jurisdiction::State => 'E',
            Jurisdiction::Municipal => 'M',
        }
    }
}

impl FromStr for Jurisdiction {
    type Err = BpaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "E" => Ok(Jurisdiction::State),
            "M" => Ok(Jurisdiction::Municipal),
            other => Err(BpaError::InvalidHeader {
                problems: vec![format!("jurisdiction must be 'E' or 'M', found '{}'", other)],
            }),
        }
    }
}

/// Header (record 01) settings for one generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Billing period; any spelling the competency normalizer accepts
    pub competency: String,
    /// Issuing entity name (up to 30 characters)
    pub responsible: String,
    /// Issuing entity acronym (up to 6 characters)
    pub acronym: String,
    /// Issuing entity tax id (CNPJ, 14 digits)
    pub tax_id: String,
    /// Destination entity (up to 40 characters)
    pub destination: String,
    pub jurisdiction: Jurisdiction,
    /// Exporting system version tag (up to 10 characters)
    pub version: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            competency: Local::now().date_naive().format("%Y%m").to_string(),
            responsible: "SECRETARIA DE SAUDE".to_string(),
            acronym: "SMS".to_string(),
            tax_id: String::new(),
            destination: "SECRETARIA MUNICIPAL DE SAUDE".to_string(),
            jurisdiction: Jurisdiction::Municipal,
            version: "BPA_MAG".to_string(),
        }
    }
}

impl HeaderConfig {
    /// Competency in canonical `AAAAMM` form (may be short if unreadable)
    pub fn target_competency(&self) -> String {
        normalize_competency(&self.competency)
    }

    /// Check every header value against the layout and report all problems
    /// at once.
    ///
    /// Generation never calls this; it is for callers that want to refuse
    /// producing a file the receiving system would reject.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let competency = self.target_competency();
        if competency.len() != 6 || !competency.chars().all(|c| c.is_ascii_digit()) {
            problems.push(format!(
                "competency '{}' does not normalize to AAAAMM (got '{}')",
                self.competency, competency
            ));
        } else {
            let month: u32 = competency[4..].parse().unwrap_or(0);
            if !(1..=12).contains(&month) {
                problems.push(format!("competency month '{}' is not between 01 and 12", &competency[4..]));
            }
        }

        let tax_id = digits_only(&self.tax_id);
        if tax_id.len() != 14 {
            problems.push(format!("tax id must have 14 digits, found {}", tax_id.len()));
        }

        if self.responsible.trim().is_empty() {
            problems.push("responsible entity name is required".to_string());
        }

        for (name, value, max) in [
            ("responsible entity name", &self.responsible, 30),
            ("acronym", &self.acronym, 6),
            ("destination entity", &self.destination, 40),
            ("version tag", &self.version, 10),
        ] {
            let len = value.trim().chars().count();
            if len > max {
                problems.push(format!("{} has {} characters, the layout allows {}", name, len, max));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BpaError::InvalidHeader { problems })
        }
    }
}

/// Patient address block of the individualized layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PatientAddress {
    /// CEP, 8 digits
    pub postal_code: String,
    /// Street descriptor (up to 30 characters)
    pub street: String,
    pub complement: String,
    pub number: String,
    pub neighborhood: String,
    pub phone: String,
    pub email: String,
}

/// One billable procedure occurrence
///
/// The first block of fields is shared by both layouts; the rest is only
/// written by the individualized layout and may stay empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Record {
    /// Facility registry id (CNES, 7 digits)
    pub facility_id: String,
    /// Billing period, `AAAAMM`
    pub competency: String,
    /// Occupation code (CBO)
    pub occupation_code: String,
    /// Procedure code (10 digits)
    pub procedure_code: String,
    pub age: String,
    pub quantity: u32,
    /// Origin tag (up to 3 characters)
    pub origin: String,

    pub professional_name: String,
    /// Professional health-system id (CNS, 15 digits)
    pub professional_id: String,
    /// Attendance date, `AAAAMMDD`
    pub attendance_date: String,
    /// Patient CNS, or tax id when no CNS is known
    pub patient_id: String,
    pub patient_name: String,
    pub sex: String,
    /// Residence municipality (IBGE, 6 digits)
    pub municipality_code: String,
    /// Diagnosis code (CID-10)
    pub diagnosis_code: String,
    /// Birth date, `AAAAMMDD`
    pub birth_date: String,
    pub race: String,
    pub ethnicity: String,
    pub nationality: String,
    /// Care character (01 = elective)
    pub care_character: String,
    pub authorization_number: String,
    pub service_code: String,
    pub classification_code: String,
    pub team_sequence: String,
    pub team_area: String,
    /// Employer tax id (CNPJ)
    pub company_tax_id: String,
    pub address: PatientAddress,
}

impl Record {
    /// Create a consolidated-layout record with the shared fields
    pub fn consolidated(
        facility_id: &str,
        competency: &str,
        occupation_code: &str,
        procedure_code: &str,
        age: &str,
        quantity: u32,
        origin: &str,
    ) -> Self {
        Self {
            facility_id: facility_id.to_string(),
            competency: competency.to_string(),
            occupation_code: occupation_code.to_string(),
            procedure_code: procedure_code.to_string(),
            age: age.to_string(),
            quantity,
            origin: origin.to_string(),
            ..Default::default()
        }
    }

    /// A record without a facility, a procedure code or a positive quantity
    /// cannot be billed
    pub fn is_valid(&self) -> bool {
        !self.facility_id.trim().is_empty()
            && !self.procedure_code.trim().is_empty()
            && self.quantity > 0
    }

    /// Grouping context for sheet numbering
    pub fn context_key(&self) -> (&str, &str) {
        (&self.facility_id, &self.competency)
    }
}
