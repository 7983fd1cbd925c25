/*!
 * Procedure code dictionaries
 *
 * Free-text procedure descriptions, as typed by the people filling in the
 * spreadsheets, mapped to their 10-digit SIGTAP codes. The same description
 * can bill under a different code depending on which professional performed
 * it, so there is one table per professional context.
 *
 * Keys are stored in lookup form: uppercase, no diacritics.
 */

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::normalize::normalize_key;

/// Occupation code (CBO) for a physician (clinical practitioner)
pub const CBO_PHYSICIAN: &str = "225125";

/// Occupation code (CBO) for a nurse
pub const CBO_NURSE: &str = "223505";

/// Occupation code (CBO) for a nursing technician
pub const CBO_NURSING_TECHNICIAN: &str = "322205";

/// Occupation codes whose consolidated rows ignore age and origin
pub const STRICT_OCCUPATION_CODES: [&str; 3] = [CBO_PHYSICIAN, CBO_NURSE, CBO_NURSING_TECHNICIAN];

/// Medication administration; never billed from the physician sheet and
/// excluded from every generated file.
pub const FORBIDDEN_PROCEDURE_CODE: &str = "0301100012";

const PHYSICIAN_ENTRIES: &[(&str, &str)] = &[
    ("ELETROCARDIOGRAMA", "0211020036"),
    ("CONSULTA MEDICA EM ATENCAO ESPECIALIZADA", "0301010072"),
    ("ATENDIMENTO MEDICO EM UNIDADE DE PRONTO ATENDIMENTO", "0301060096"),
    ("EXERESE DE TUMOR DE PELE E ANEXOS / CISTO SEBACEO / LIPOMA", "0401010074"),
    ("TESTE RAPIDO PARA DETECCAO DE INFECCAO PELO HIV", "0214010058"),
    ("TESTE RADIO PARA SIFILIS", "0214010074"),
    ("TESTE RAPIDO PARA SIFILIS", "0214010074"),
    ("DRENAGEM DE ABSCESSO", "0401010031"),
    ("RETIRADA DE CORPO ESTRANHO DA CAVIDADE AUDITIVA E NASAL", "0404010300"),
    ("TAMPONAMENTO NASAL ANTERIOR E/OU POSTERIOR", "0404010342"),
    ("REMOCAO DE CERUMEN DE CONDUTO AUDITIVO EXTERNO UNI / BILATERAL", "0404010270"),
    ("RETIRADA DE CORPO ESTRANHO SUBCUTANEO", "0401010112"),
    ("INCISAO E DRENAGEM DE ABSCESSO", "0401010104"),
    ("EXCISAO DE LESAO E/OU SUTURA DE FERIMENTO DA PELE ANEXOS E MUCOSA", "0401010058"),
    ("CURATIVO GRAU II C/ OU S/ DEBRIDAMENTO", "0401010015"),
    ("ATENDIMENTO DE URGENCIA EM ATENCAO ESPECIALIZADA", "0301060061"),
    ("CONSULTA MEDICA EM SAUDE DO TRABALHADOR", "0301010056"),
    ("PROVA DO LACO", "0202020509"),
    ("DEBRIDAMENTO DE ULCERA / NECROSE", "0415040043"),
    ("SUTURA", "0401010058"),
];

const NURSING_ENTRIES: &[(&str, &str)] = &[
    ("ADMINISTRACAO DE MEDICAMENTOS NA ATENCAO ESPECIALIZADA", "0301100012"),
    ("ATIVIDADE EDUCATIVA / ORIENTACAO EM GRUPO NA ATENCAO ESPECIALIZADA", "0101010028"),
    ("CONSULTA/ATENDIMENTO DOMICILIAR NA ATENCAO ESPECIALIZADA", "0301010161"),
    ("CURATIVO GRAU II C/ OU S/ DEBRIDAMENTO", "0401010015"),
    (
        "CONSULTA DE PROFISSIONAIS DE NIVEL SUPERIOR NA ATENCAO ESPECIALIZADA (EXCETO MEDICO)",
        "0301010048",
    ),
    ("TESTE RAPIDO PARA SIFILIS", "0214010074"),
    ("TESTE RAPIDO PARA DETECCAO DE INFECCAO PELO HIV", "0214010058"),
    ("TESTE NAO TREPONEMICO P/ DETECCAO DE SIFILIS", "0202031110"),
    ("TESTE FTA-ABS IGG P/ DIAGNOSTICO DA SIFILIS", "0202031128"),
    ("TESTE FTA-ABS IGM P/ DIAGNOSTICO DA SIFILIS", "0202031136"),
    ("ELETROCARDIOGRAMA", "0211020036"),
    ("RETIRADA DE CORPO ESTRANHO SUBCUTANEO", "0401010112"),
    ("RETIRADA DE PONTOS", "0301100152"),
    ("CATETERISMO VESICAL DE DEMORA", "0301100055"),
    ("SUTURA", "0401010066"),
];

const TECHNICIAN_ENTRIES: &[(&str, &str)] = &[
    ("COLETA EXTERNA DE LEITE MATERNO (POR DOADORA)", "0101040032"),
    ("PROVA DO LACO", "0202020509"),
    ("TESTE RAPIDO PARA DETECCAO DE HIV NA GESTANTE OU PAI/PARCEIRO", "0214010040"),
    ("TESTE RAPIDO PARA DETECCAO DE INFECCAO PELO HIV", "0214010058"),
    ("TESTE RAPIDO PARA SIFILIS", "0214010074"),
    ("ELETROCARDIOGRAMA", "0211020036"),
    ("ADMINISTRACAO DE MEDICAMENTOS NA ATENCAO ESPECIALIZADA", "0301100012"),
    ("RETIRADA DE PONTOS", "0301100152"),
];

lazy_static::lazy_static! {
    static ref PHYSICIAN: HashMap<&'static str, &'static str> = PHYSICIAN_ENTRIES.iter().copied().collect();
    static ref NURSING: HashMap<&'static str, &'static str> = NURSING_ENTRIES.iter().copied().collect();
    static ref TECHNICIAN: HashMap<&'static str, &'static str> = TECHNICIAN_ENTRIES.iter().copied().collect();
}

/// Professional context a procedure column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureContext {
    Physician,
    Nursing,
    Technician,
}

impl ProcedureContext {
    /// Fallback scan order when the primary dictionary misses
    pub const SCAN_ORDER: [ProcedureContext; 3] = [
        ProcedureContext::Physician,
        ProcedureContext::Nursing,
        ProcedureContext::Technician,
    ];

    /// Dictionary selection from a column header.
    ///
    /// Technician/auxiliary wins over nursing ("TEC ENFERMAGEM" is a
    /// technician column); anything unrecognised is read as physician.
    pub fn from_header(header: &str) -> Self {
        let key = normalize_key(header);
        if key.contains("TEC") || key.contains("AUX") {
            ProcedureContext::Technician
        } else if key.contains("ENFERMAGEM") {
            ProcedureContext::Nursing
        } else {
            ProcedureContext::Physician
        }
    }

    /// Professional category explicitly signalled by a BPA sheet header.
    ///
    /// Unlike [`ProcedureContext::from_header`] this needs the `BPA` marker
    /// and returns `None` when the header names no category, so a plain
    /// "PROCEDIMENTO" column does not force an occupation code.
    pub fn signalled_by(header: &str) -> Option<Self> {
        let key = normalize_key(header);
        if !key.contains("BPA") {
            return None;
        }
        let technical = key.contains("TEC") || key.contains("AUX");
        if technical {
            Some(ProcedureContext::Technician)
        } else if key.contains("ENFERMAGEM") {
            Some(ProcedureContext::Nursing)
        } else if key.contains("MEDICO") {
            Some(ProcedureContext::Physician)
        } else {
            None
        }
    }

    /// Occupation code (CBO) billed for this professional category
    pub fn occupation_code(&self) -> &'static str {
        match self {
            ProcedureContext::Physician => CBO_PHYSICIAN,
            ProcedureContext::Nursing => CBO_NURSE,
            ProcedureContext::Technician => CBO_NURSING_TECHNICIAN,
        }
    }

    /// The description → code table for this context
    pub fn dictionary(&self) -> &'static HashMap<&'static str, &'static str> {
        match self {
            ProcedureContext::Physician => &*PHYSICIAN,
            ProcedureContext::Nursing => &*NURSING,
            ProcedureContext::Technician => &*TECHNICIAN,
        }
    }
}

impl fmt::Display for ProcedureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureContext::Physician => write!(f, "physician"),
            ProcedureContext::Nursing => write!(f, "nursing"),
            ProcedureContext::Technician => write!(f, "technician"),
        }
    }
}

/// Look up a normalized description, `context` first, then every
/// dictionary in [`ProcedureContext::SCAN_ORDER`].
pub fn lookup(key: &str, context: ProcedureContext) -> Option<&'static str> {
    context.dictionary().get(key).copied().or_else(|| {
        ProcedureContext::SCAN_ORDER
            .iter()
            .find_map(|ctx| ctx.dictionary().get(key).copied())
    })
}

/// True when `code` belongs to one of the strict consolidation categories
pub fn is_strict_occupation(code: &str) -> bool {
    STRICT_OCCUPATION_CODES.contains(&code)
}
