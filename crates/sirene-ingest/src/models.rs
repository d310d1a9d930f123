//! SIRENE record models and the accept/project step
//!
//! Each record type knows which CSV columns it needs and how to turn one raw
//! row into a typed record. Rows that fail the predicate are rejected silently
//! by returning `None`.

use serde::{Deserialize, Serialize};

use crate::parser::Row;

/// Administrative status value of an active unit
pub const ACTIVE_STATUS: &str = "A";

/// Column names of the SIRENE stock files
pub mod columns {
    pub const SIREN: &str = "siren";
    pub const SIRET: &str = "siret";
    pub const NUMERO_VOIE: &str = "numeroVoieEtablissement";
    pub const TYPE_VOIE: &str = "typeVoieEtablissement";
    pub const LIBELLE_VOIE: &str = "libelleVoieEtablissement";
    pub const CODE_POSTAL: &str = "codePostalEtablissement";
    pub const LIBELLE_COMMUNE: &str = "libelleCommuneEtablissement";
    pub const ETAT_ETABLISSEMENT: &str = "etatAdministratifEtablissement";

    pub const NOM: &str = "nomUniteLegale";
    pub const PRENOM_USUEL: &str = "prenomUsuelUniteLegale";
    pub const DENOMINATION: &str = "denominationUniteLegale";
    pub const ETAT_UNITE_LEGALE: &str = "etatAdministratifUniteLegale";
}

/// The two kinds of SIRENE extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// StockEtablissement: one row per site (SIRET)
    Establishment,
    /// StockUniteLegale: one row per legal entity (SIREN)
    LegalUnit,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Establishment => "establishment",
            RecordKind::LegalUnit => "legal_unit",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type that can be filtered and projected out of a CSV row
pub trait SireneRecord: Sized + Send + Sync + 'static {
    const KIND: RecordKind;

    /// Columns that must be present in the header
    const REQUIRED_COLUMNS: &'static [&'static str];

    /// Apply the acceptance predicate and project the row, or reject it
    fn from_row(row: &Row<'_>) -> Option<Self>;

    /// Store key of the record
    fn key(&self) -> &str;
}

/// Address and identity of an active establishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentRecord {
    pub siren: Option<String>,
    /// Unique key in the store
    pub siret: String,
    pub numero_voie: Option<String>,
    pub type_voie: Option<String>,
    pub libelle_voie: Option<String>,
    pub code_postal: Option<String>,
    pub libelle_commune: Option<String>,
}

impl SireneRecord for EstablishmentRecord {
    const KIND: RecordKind = RecordKind::Establishment;

    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        columns::SIREN,
        columns::SIRET,
        columns::NUMERO_VOIE,
        columns::TYPE_VOIE,
        columns::LIBELLE_VOIE,
        columns::CODE_POSTAL,
        columns::LIBELLE_COMMUNE,
        columns::ETAT_ETABLISSEMENT,
    ];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let siret = row.get(columns::SIRET);
        if siret.is_empty() || row.get(columns::ETAT_ETABLISSEMENT) != ACTIVE_STATUS {
            return None;
        }

        Some(Self {
            siren: non_empty(row.get(columns::SIREN)),
            siret: siret.to_string(),
            numero_voie: non_empty(row.get(columns::NUMERO_VOIE)),
            type_voie: non_empty(row.get(columns::TYPE_VOIE)),
            libelle_voie: non_empty(row.get(columns::LIBELLE_VOIE)),
            code_postal: non_empty(row.get(columns::CODE_POSTAL)),
            libelle_commune: non_empty(row.get(columns::LIBELLE_COMMUNE)),
        })
    }

    fn key(&self) -> &str {
        &self.siret
    }
}

/// Name fields of an active legal unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalUnitRecord {
    /// Matches every establishment row of the unit
    pub siren: String,
    pub nom: Option<String>,
    pub prenom_usuel: Option<String>,
    pub denomination: Option<String>,
}

impl SireneRecord for LegalUnitRecord {
    const KIND: RecordKind = RecordKind::LegalUnit;

    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        columns::SIREN,
        columns::NOM,
        columns::PRENOM_USUEL,
        columns::DENOMINATION,
        columns::ETAT_UNITE_LEGALE,
    ];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let siren = row.get(columns::SIREN);
        if siren.is_empty() || row.get(columns::ETAT_UNITE_LEGALE) != ACTIVE_STATUS {
            return None;
        }

        let nom = non_empty(row.get(columns::NOM));
        let prenom_usuel = non_empty(row.get(columns::PRENOM_USUEL));
        let denomination = non_empty(row.get(columns::DENOMINATION));
        if nom.is_none() && prenom_usuel.is_none() && denomination.is_none() {
            return None;
        }

        Some(Self {
            siren: siren.to_string(),
            nom,
            prenom_usuel,
            denomination,
        })
    }

    fn key(&self) -> &str {
        &self.siren
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
