//! Spec CSV + SMT side-file persistence
//!
//! One CSV row per spec with columns `Spec Type, Indirect Call, Spec Input,
//! Spec Output, Spec Cond SMT, Spec Orders`; the condition column names a
//! sibling `.smt` file holding `to_smt2()` of data-dependency ∧ tree. Order
//! specs `$`-join their outputs and `before_after` pairs. Loading reverses
//! all of it; malformed rows and missing side files are skipped with a
//! warning, never fatal.

use super::domain::{
    SingleSrcMultiSinkSpec, SingleSrcSingleSinkSpec, SpecSet, SpecType,
};
use crate::features::enhanced_trace::{InputKind, OutputKind};
use crate::shared::models::{PatchSpecError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CSV_HEADER: [&str; 6] = [
    "Spec Type",
    "Indirect Call",
    "Spec Input",
    "Spec Output",
    "Spec Cond SMT",
    "Spec Orders",
];

const ORDER_SEPARATOR: char = '$';

/// Write the spec set. The CSV is assembled in memory, written to a sibling
/// temp file, and renamed over the destination only once everything (side
/// files included) is on disk, so a failure at any point leaves no partial
/// CSV at the output path.
pub fn write_specs(path: &Path, specs: &SpecSet) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .map_err(PatchSpecError::from)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("specs")
        .to_string();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut side_files: Vec<(PathBuf, String)> = Vec::new();
    let mut row_index = 0usize;

    for spec in specs.single_sink() {
        let cond_file = match &spec.cond_smt {
            Some(script) => {
                let name = format!("{}.{}.smt", stem, row_index);
                side_files.push((dir.join(&name), script.clone()));
                name
            }
            None => String::new(),
        };
        let input = spec.input.to_spec_string();
        let output = spec.output.to_spec_string();
        writer
            .write_record([
                spec.spec_type().as_str(),
                spec.indirect_call.as_str(),
                input.as_str(),
                output.as_str(),
                cond_file.as_str(),
                "",
            ])
            .map_err(PatchSpecError::from)?;
        row_index += 1;
    }

    for spec in &specs.order_changed {
        let outputs: Vec<String> = spec.outputs.iter().map(|o| o.to_spec_string()).collect();
        let orders: Vec<String> = spec
            .order_map
            .iter()
            .map(|(before, after)| format!("{}_{}", before, after))
            .collect();
        let input = spec.input.to_spec_string();
        let outputs = outputs.join(&ORDER_SEPARATOR.to_string());
        let orders = orders.join(&ORDER_SEPARATOR.to_string());
        writer
            .write_record([
                SpecType::MustReach.as_str(),
                spec.indirect_call.as_str(),
                input.as_str(),
                outputs.as_str(),
                "",
                orders.as_str(),
            ])
            .map_err(PatchSpecError::from)?;
        row_index += 1;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PatchSpecError::internal(format!("csv buffer: {}", e)))?;

    // side files first, then the CSV through a temp sibling: the output path
    // never holds a truncated file, whatever fails mid-way
    for (side_path, content) in side_files {
        fs::write(side_path, content)?;
    }
    let tmp_path = temp_sibling(path);
    if let Err(err) = fs::write(&tmp_path, bytes).and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    info!(rows = row_index, path = %path.display(), "spec CSV written");
    Ok(())
}

/// `specs.csv` → `specs.csv.tmp`, next to the destination so the rename
/// stays on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "specs.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load a spec CSV written by [`write_specs`]. Rows with unknown tags are
/// skipped with a warning; loading continues.
pub fn load_specs(path: &Path) -> Result<SpecSet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            PatchSpecError::config(format!("cannot open spec file: {}", e))
                .with_file(path.display().to_string())
        })?;

    {
        let headers = reader.headers().map_err(PatchSpecError::from)?;
        if headers.iter().ne(CSV_HEADER.iter().copied()) {
            return Err(PatchSpecError::config(format!(
                "unexpected spec CSV header: {:?}",
                headers
            )));
        }
    }

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut specs = SpecSet::default();
    for (row_number, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                warn!(row = row_number, %err, "unreadable spec row skipped");
                continue;
            }
        };
        match parse_row(&record, &dir) {
            Ok(ParsedRow::Single(spec)) => {
                if spec.is_buggy {
                    specs.removed.push(spec);
                } else {
                    specs.added.push(spec);
                }
            }
            Ok(ParsedRow::Multi(spec)) => specs.order_changed.push(spec),
            Err(err) => {
                warn!(row = row_number, %err, "malformed spec row skipped");
            }
        }
    }
    info!(specs = specs.len(), path = %path.display(), "spec CSV loaded");
    Ok(specs)
}

enum ParsedRow {
    Single(SingleSrcSingleSinkSpec),
    Multi(SingleSrcMultiSinkSpec),
}

fn parse_row(record: &csv::StringRecord, dir: &Path) -> Result<ParsedRow> {
    let field = |i: usize| record.get(i).unwrap_or("").trim();
    let spec_type = SpecType::parse(field(0))?;
    let indirect_call = field(1).to_string();
    let input = InputKind::parse(field(2))?;
    let orders = field(5);

    if orders.is_empty() {
        let output = OutputKind::parse(field(3))?;
        let cond_smt = load_side_file(dir, field(4));
        Ok(ParsedRow::Single(SingleSrcSingleSinkSpec {
            input,
            output,
            cond_smt,
            is_buggy: spec_type == SpecType::MustNotReach,
            indirect_call,
        }))
    } else {
        let outputs: Vec<OutputKind> = field(3)
            .split(ORDER_SEPARATOR)
            .map(OutputKind::parse)
            .collect::<Result<_>>()?;
        let order_map: Vec<(u32, u32)> = orders
            .split(ORDER_SEPARATOR)
            .map(|pair| {
                let (before, after) = pair.split_once('_').ok_or_else(|| {
                    PatchSpecError::spec_malformed(format!("bad order pair: {:?}", pair))
                })?;
                let before = before.parse::<u32>().map_err(|_| {
                    PatchSpecError::spec_malformed(format!("bad order pair: {:?}", pair))
                })?;
                let after = after.parse::<u32>().map_err(|_| {
                    PatchSpecError::spec_malformed(format!("bad order pair: {:?}", pair))
                })?;
                Ok((before, after))
            })
            .collect::<Result<_>>()?;
        if outputs.len() != order_map.len() {
            return Err(PatchSpecError::spec_malformed(
                "outputs and orders disagree in length",
            ));
        }
        Ok(ParsedRow::Multi(SingleSrcMultiSinkSpec {
            input,
            outputs,
            order_map,
            indirect_call,
        }))
    }
}

fn load_side_file(dir: &Path, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(err) => {
            warn!(path = %path.display(), %err, "SMT side file missing; condition dropped");
            None
        }
    }
}
