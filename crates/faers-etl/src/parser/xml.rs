//! ICH E2B XML parser
//!
//! Event-driven streaming over `<safetyreport>` elements: one report is
//! buffered at a time, projected into rows for the seven tables, and
//! released before the next element is read. A report whose
//! `safetyreportnullification` flag is set contributes its CASEID to the
//! nullification set and emits nothing.
//!
//! Element-to-column mapping (paths relative to `<safetyreport>`):
//!
//! | Path | Column |
//! |---|---|
//! | `safetyreportid` | primaryid (all tables) |
//! | `case/caseid` | caseid (all tables) |
//! | `receiptdate` | demo.fda_dt |
//! | `occurcountry` | demo.occr_country |
//! | `primarysource/reportercountry` | demo.reporter_country |
//! | `primarysource/qualification` | rpsr.rpsr_cod |
//! | `patient/patientsex` | demo.sex |
//! | `patient/patientonsetage` | demo.age |
//! | `patient/patientonsetageunit` | demo.age_cod |
//! | `patient/drug/drugsequencenumber` | drug.drug_seq |
//! | `patient/drug/drugcharacterization` | drug.role_cod |
//! | `patient/drug/medicinalproduct` | drug.drugname |
//! | `patient/drug/drugstartdate` | ther.start_dt |
//! | `patient/drug/drugindication/indicationmeddrapt` | indi.indi_pt |
//! | `patient/reaction/reactionmeddrapt` | reac.pt |
//! | `summary/result` | outc.outc_cod |

use crate::models::{Row, Table};
use crate::staging::StagingWriter;
use faers_common::{FaersError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::io::BufRead;
use tracing::{debug, warn};

/// Result of parsing one XML stream
pub struct XmlOutcome {
    pub nullified_caseids: HashSet<String>,
    /// Reports skipped because their identifiers were missing
    pub skipped_reports: u64,
}

#[derive(Default)]
struct DrugEntry {
    seq: Option<String>,
    role_cod: Option<String>,
    drugname: Option<String>,
    start_dt: Option<String>,
    indication: Option<String>,
}

/// Accumulator for the `<safetyreport>` element currently being read
#[derive(Default)]
struct ReportBuilder {
    primaryid: Option<String>,
    caseid: Option<String>,
    nullified: bool,
    fda_dt: Option<String>,
    occr_country: Option<String>,
    reporter_country: Option<String>,
    qualification: Option<String>,
    sex: Option<String>,
    age: Option<String>,
    age_cod: Option<String>,
    summary_result: Option<String>,
    has_patient: bool,
    has_primarysource: bool,
    has_summary: bool,
    drugs: Vec<DrugEntry>,
    reactions: Vec<Option<String>>,
}

impl ReportBuilder {
    fn accept_text(&mut self, path: &[String], text: String) {
        let segments: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
        match segments.as_slice() {
            ["safetyreportid"] => self.primaryid = Some(text),
            ["safetyreportnullification"] => {
                self.nullified = text == "1" || text.eq_ignore_ascii_case("true");
            },
            ["case", "caseid"] => self.caseid = Some(text),
            ["receiptdate"] => self.fda_dt = Some(text),
            ["occurcountry"] => self.occr_country = Some(text),
            ["primarysource", "reportercountry"] => self.reporter_country = Some(text),
            ["primarysource", "qualification"] => self.qualification = Some(text),
            ["patient", "patientsex"] => self.sex = Some(text),
            ["patient", "patientonsetage"] => self.age = Some(text),
            ["patient", "patientonsetageunit"] => self.age_cod = Some(text),
            ["patient", "drug", "drugsequencenumber"] => {
                if let Some(drug) = self.drugs.last_mut() {
                    drug.seq = Some(text);
                }
            },
            ["patient", "drug", "drugcharacterization"] => {
                if let Some(drug) = self.drugs.last_mut() {
                    drug.role_cod = Some(text);
                }
            },
            ["patient", "drug", "medicinalproduct"] => {
                if let Some(drug) = self.drugs.last_mut() {
                    drug.drugname = Some(text);
                }
            },
            ["patient", "drug", "drugstartdate"] => {
                if let Some(drug) = self.drugs.last_mut() {
                    drug.start_dt = Some(text);
                }
            },
            ["patient", "drug", "drugindication", "indicationmeddrapt"] => {
                if let Some(drug) = self.drugs.last_mut() {
                    drug.indication = Some(text);
                }
            },
            ["patient", "reaction", "reactionmeddrapt"] => {
                if let Some(reaction) = self.reactions.last_mut() {
                    *reaction = Some(text);
                }
            },
            ["summary", "result"] => self.summary_result = Some(text),
            _ => {},
        }
    }

    fn open_element(&mut self, path: &[String]) {
        let segments: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
        match segments.as_slice() {
            ["patient"] => self.has_patient = true,
            ["primarysource"] => self.has_primarysource = true,
            ["summary"] => self.has_summary = true,
            ["patient", "drug"] => self.drugs.push(DrugEntry::default()),
            ["patient", "reaction"] => self.reactions.push(None),
            _ => {},
        }
    }

    /// Project the finished report into staged rows
    fn emit(self, writer: &mut StagingWriter) -> Result<()> {
        let primaryid = self.primaryid.clone();
        let caseid = self.caseid.clone();

        let set =
            |row: &mut Row, table: Table, column: &str, value: &Option<String>| {
                if let Some(idx) = table.column_index(column) {
                    row[idx] = value.clone();
                }
            };

        if self.has_patient {
            let mut row: Row = vec![None; Table::Demo.columns().len()];
            set(&mut row, Table::Demo, "primaryid", &primaryid);
            set(&mut row, Table::Demo, "caseid", &caseid);
            set(&mut row, Table::Demo, "fda_dt", &self.fda_dt);
            set(&mut row, Table::Demo, "sex", &self.sex);
            set(&mut row, Table::Demo, "age", &self.age);
            set(&mut row, Table::Demo, "age_cod", &self.age_cod);
            set(&mut row, Table::Demo, "reporter_country", &self.reporter_country);
            set(&mut row, Table::Demo, "occr_country", &self.occr_country);
            writer.append(Table::Demo, row)?;
        }

        if self.has_primarysource {
            let mut row: Row = vec![None; Table::Rpsr.columns().len()];
            set(&mut row, Table::Rpsr, "primaryid", &primaryid);
            set(&mut row, Table::Rpsr, "caseid", &caseid);
            set(&mut row, Table::Rpsr, "rpsr_cod", &self.qualification);
            writer.append(Table::Rpsr, row)?;
        }

        for drug in &self.drugs {
            let mut row: Row = vec![None; Table::Drug.columns().len()];
            set(&mut row, Table::Drug, "primaryid", &primaryid);
            set(&mut row, Table::Drug, "caseid", &caseid);
            set(&mut row, Table::Drug, "drug_seq", &drug.seq);
            set(&mut row, Table::Drug, "role_cod", &drug.role_cod);
            set(&mut row, Table::Drug, "drugname", &drug.drugname);
            writer.append(Table::Drug, row)?;

            if drug.indication.is_some() {
                let mut row: Row = vec![None; Table::Indi.columns().len()];
                set(&mut row, Table::Indi, "primaryid", &primaryid);
                set(&mut row, Table::Indi, "caseid", &caseid);
                set(&mut row, Table::Indi, "indi_drug_seq", &drug.seq);
                set(&mut row, Table::Indi, "indi_pt", &drug.indication);
                writer.append(Table::Indi, row)?;
            }

            let mut row: Row = vec![None; Table::Ther.columns().len()];
            set(&mut row, Table::Ther, "primaryid", &primaryid);
            set(&mut row, Table::Ther, "caseid", &caseid);
            set(&mut row, Table::Ther, "dsg_drug_seq", &drug.seq);
            set(&mut row, Table::Ther, "start_dt", &drug.start_dt);
            writer.append(Table::Ther, row)?;
        }

        for reaction in &self.reactions {
            let mut row: Row = vec![None; Table::Reac.columns().len()];
            set(&mut row, Table::Reac, "primaryid", &primaryid);
            set(&mut row, Table::Reac, "caseid", &caseid);
            set(&mut row, Table::Reac, "pt", reaction);
            writer.append(Table::Reac, row)?;
        }

        if self.has_summary {
            let mut row: Row = vec![None; Table::Outc.columns().len()];
            set(&mut row, Table::Outc, "primaryid", &primaryid);
            set(&mut row, Table::Outc, "caseid", &caseid);
            set(&mut row, Table::Outc, "outc_cod", &self.summary_result);
            writer.append(Table::Outc, row)?;
        }

        Ok(())
    }
}

/// Parse an E2B XML stream into the staging writer
pub fn parse_xml_stream<R: BufRead>(
    source: R,
    writer: &mut StagingWriter,
) -> Result<XmlOutcome> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut nullified_caseids = HashSet::new();
    let mut skipped_reports = 0u64;
    let mut reports = 0u64;

    // Path of element names inside the current <safetyreport>, or None
    // between reports
    let mut report: Option<(ReportBuilder, Vec<String>)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(FaersError::parse(
                    "XML stream".to_string(),
                    format!("at byte {}: {}", reader.buffer_position(), e),
                ))
            },
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if let Some((builder, path)) = report.as_mut() {
                    path.push(name);
                    builder.open_element(path);
                } else if name == "safetyreport" {
                    report = Some((ReportBuilder::default(), Vec::new()));
                }
            },
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if let Some((builder, path)) = report.as_mut() {
                    path.push(name);
                    builder.open_element(path);
                    path.pop();
                }
            },
            Ok(Event::Text(t)) => {
                if let Some((builder, path)) = report.as_mut() {
                    if !path.is_empty() {
                        let text = t
                            .unescape()
                            .map_err(|e| {
                                FaersError::parse("XML stream".to_string(), e.to_string())
                            })?
                            .trim()
                            .to_string();
                        if !text.is_empty() {
                            builder.accept_text(path, text);
                        }
                    }
                }
            },
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                let report_complete = match report.as_mut() {
                    Some((_, path)) => {
                        if path.is_empty() && name == "safetyreport" {
                            true
                        } else {
                            path.pop();
                            false
                        }
                    },
                    None => false,
                };
                if report_complete {
                    // Report complete: emit or record nullification
                    if let Some((builder, _)) = report.take() {
                        reports += 1;
                        match (&builder.primaryid, &builder.caseid) {
                            (Some(_), Some(caseid)) => {
                                if builder.nullified {
                                    nullified_caseids.insert(caseid.clone());
                                } else {
                                    builder.emit(writer)?;
                                }
                            },
                            _ => {
                                warn!("Skipping safetyreport without primaryid/caseid");
                                skipped_reports += 1;
                            },
                        }
                    }
                }
            },
            Ok(_) => {},
        }
        buf.clear();
    }

    debug!(reports, nullified = nullified_caseids.len(), skipped = skipped_reports, "XML parse complete");
    Ok(XmlOutcome { nullified_caseids, skipped_reports })
}
