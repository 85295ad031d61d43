//! The seven FAERS tables and their canonical column sets
//!
//! Column names follow the upstream ASCII release headers, lower-cased. All
//! columns are carried as TEXT: the upstream files mix encodings, partial
//! dates and free-text fields, so typing is deferred to consumers. DEMO is
//! the parent table; the six child tables cascade on `primaryid`.

/// One of the seven FAERS tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Demo,
    Drug,
    Reac,
    Outc,
    Rpsr,
    Ther,
    Indi,
}

/// All tables in load order (DEMO first, the cascading parent)
pub const ALL_TABLES: [Table; 7] = [
    Table::Demo,
    Table::Drug,
    Table::Reac,
    Table::Outc,
    Table::Rpsr,
    Table::Ther,
    Table::Indi,
];

impl Table {
    /// Lower-case table name, identical to the upstream file prefix
    pub fn name(&self) -> &'static str {
        match self {
            Table::Demo => "demo",
            Table::Drug => "drug",
            Table::Reac => "reac",
            Table::Outc => "outc",
            Table::Rpsr => "rpsr",
            Table::Ther => "ther",
            Table::Indi => "indi",
        }
    }

    /// Look up a table by its lower-case name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "demo" => Some(Table::Demo),
            "drug" => Some(Table::Drug),
            "reac" => Some(Table::Reac),
            "outc" => Some(Table::Outc),
            "rpsr" => Some(Table::Rpsr),
            "ther" => Some(Table::Ther),
            "indi" => Some(Table::Indi),
            _ => None,
        }
    }

    /// Canonical column set for this table
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Demo => &[
                "primaryid",
                "caseid",
                "caseversion",
                "i_f_code",
                "event_dt",
                "mfr_dt",
                "init_fda_dt",
                "fda_dt",
                "rept_cod",
                "auth_num",
                "mfr_num",
                "mfr_sndr",
                "lit_ref",
                "age",
                "age_cod",
                "age_grp",
                "sex",
                "e_sub",
                "wt",
                "wt_cod",
                "rept_dt",
                "to_mfr",
                "occp_cod",
                "reporter_country",
                "occr_country",
            ],
            Table::Drug => &[
                "primaryid",
                "caseid",
                "drug_seq",
                "role_cod",
                "drugname",
                "prod_ai",
                "val_vbm",
                "route",
                "dose_vbm",
                "cum_dose_chr",
                "cum_dose_unit",
                "dechal",
                "rechal",
                "lot_num",
                "exp_dt",
                "nda_num",
                "dose_amt",
                "dose_unit",
                "dose_form",
                "dose_freq",
            ],
            Table::Reac => &["primaryid", "caseid", "pt", "drug_rec_act"],
            Table::Outc => &["primaryid", "caseid", "outc_cod"],
            Table::Rpsr => &["primaryid", "caseid", "rpsr_cod"],
            Table::Ther => &[
                "primaryid",
                "caseid",
                "dsg_drug_seq",
                "start_dt",
                "end_dt",
                "dur",
                "dur_cod",
            ],
            Table::Indi => &["primaryid", "caseid", "indi_drug_seq", "indi_pt"],
        }
    }

    /// Index of a column within [`Self::columns`]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns().iter().position(|c| *c == column)
    }
}

/// A parsed row aligned to a table's canonical column set.
///
/// `values.len()` always equals `table.columns().len()`; absent source fields
/// are `None` and load as NULL.
pub type Row = Vec<Option<String>>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tables_start_with_identity_columns() {
        for table in ALL_TABLES {
            assert_eq!(table.columns()[0], "primaryid", "table {}", table.name());
            assert_eq!(table.columns()[1], "caseid", "table {}", table.name());
        }
    }

    #[test]
    fn test_from_name_round_trip() {
        for table in ALL_TABLES {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("drugs"), None);
    }

    #[test]
    fn test_demo_has_dedup_columns() {
        assert!(Table::Demo.column_index("fda_dt").is_some());
        assert!(Table::Demo.column_index("caseid").is_some());
    }
}
