/*!
 * # BPA (Boletim de Produção Ambulatorial) Export Library
 *
 * A Rust library for turning tabular ambulatory procedure records into the
 * fixed-width BPA-C (consolidated) and BPA-I (individualized) files accepted
 * by the national ambulatory billing system.
 *
 * ## Features
 *
 * - 🧭 **Column Mapping**: Detects the usual spreadsheet headers or takes explicit indices
 * - 🔤 **Smart Normalization**: Dates, ages, sex codes and free-text procedure names
 * - ➕ **Consolidation**: Merges duplicate consolidated rows and sums their quantities
 * - 📄 **Exact Layouts**: Fixed-width lines, 20-record sheets and the module-1111 control digit
 * - ⚙️ **Layered Configuration**: Built-in defaults, a TOML file and `BPA_*` variables
 *
 * ## Quick Start
 *
 * ```no_run
 * use bpa::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let batch = BpaBatchBuilder::new()
 *     .input_file("data/procedimentos.tsv")
 *     .mode(BpaMode::Consolidated)
 *     .competency("202310")
 *     .build()?;
 *
 * println!("{} records, {} dropped", batch.len(), batch.report().dropped());
 *
 * let document = batch.generate();
 * document.write_to(document.default_file_name())?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Generating From Records
 *
 * The export engine is a pure function of the header, the records and the
 * layout. It never fails: records of other competencies, the forbidden
 * procedure and records without facility, procedure or quantity are left
 * out and counted.
 *
 * ```
 * use bpa::prelude::*;
 *
 * let header = HeaderConfig {
 *     competency: "202310".to_string(),
 *     ..HeaderConfig::default()
 * };
 * let records = vec![Record::consolidated("1234567", "202310", "225125", "0301010072", "025", 1, "BPA")];
 *
 * let document = bpa::generate(&header, &records, BpaMode::Consolidated);
 * assert_eq!(document.detail_count, 1);
 * assert_eq!(document.total_sheets, 1);
 * ```
 *
 * ## Configuration
 *
 * ```no_run
 * # use bpa::prelude::*;
 * # fn main() -> Result<()> {
 * // defaults <- ~/.config/bpa/config.toml <- BPA_* environment
 * let config = BpaConfig::load(None)?;
 * let batch = BpaBatchBuilder::from_config(&config)
 *     .input_text("CNES;PROCEDIMENTO\n1234567;0301010072\n")
 *     .build()?;
 * # Ok(())
 * # }
 * ```
 */

// Re-export error types from root
pub use error::{BpaError, ErrorContext, Result};
pub use data_types::{BpaMode, HeaderConfig, Jurisdiction, PatientAddress, Record};
pub use export::{generate, BpaDocument};

// Public modules
pub mod batch;
pub mod config;
pub mod consolidate;
pub mod data_types;
pub mod dictionary;
pub mod error;
pub mod export;
pub mod normalize;
pub mod reader;
pub mod schema;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use bpa::prelude::*;
/// ```
pub mod prelude {
    pub use crate::batch::{BpaBatch, BpaBatchBuilder};
    pub use crate::config::{BpaConfig, ConfigBuilder};
    pub use crate::consolidate::consolidate;
    pub use crate::data_types::*;
    pub use crate::error::{BpaError, Result};
    pub use crate::export::{BpaDocument, BpaExporter};
    pub use crate::reader::{MappingReport, RowMapper};
    pub use crate::schema::{ColumnMapping, Field, FieldDefaults};
}

/// Map, consolidate and render pasted text in one call
///
/// Columns are auto-detected from the header row and consolidation follows
/// the layout (on for BPA-C).
pub fn generate_from_text(header: &HeaderConfig, text: &str, mode: BpaMode) -> Result<BpaDocument> {
    let batch = batch::BpaBatchBuilder::new()
        .header(header.clone())
        .mode(mode)
        .input_text(text)
        .build()?;
    Ok(batch.generate())
}
