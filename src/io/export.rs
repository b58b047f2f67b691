//! CSV export for the step records and session outcomes of a run.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::NaiveDateTime;

use crate::sim::session::SessionOutcome;
use crate::sim::tree::CapacityTree;
use crate::sim::types::StepRecord;

/// Column header for the session outcome export.
const OUTCOME_HEADER: &str = "session,vehicle,status,outlet,arrival,connected,departed,soc_arrival,soc_final";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn timestamp(t: NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Exports the load profile to a CSV file at the given path.
///
/// One column per outlet, named after the outlet and ordered as in the tree.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_load_profile(
    records: &[StepRecord],
    tree: &CapacityTree,
    path: &Path,
) -> io::Result<()> {
    let file = File::create(path)?;
    write_load_profile(records, tree, io::BufWriter::new(file))
}

/// Writes the load profile as CSV to any writer.
///
/// # Arguments
///
/// * `records` - Step records of the run, in order
/// * `tree` - The site the records were produced on (for outlet names)
/// * `writer` - Destination implementing `Write`
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_load_profile(
    records: &[StepRecord],
    tree: &CapacityTree,
    writer: impl Write,
) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = vec!["step".to_string(), "time".to_string()];
    header.extend(tree.outlets().iter().map(|o| tree.node(*o).name.clone()));
    header.push("storage_kw".to_string());
    header.push("storage_soe_kwh".to_string());
    wtr.write_record(&header)?;

    for r in records {
        let mut row = vec![r.step.to_string(), timestamp(r.time)];
        row.extend(tree.outlets().iter().map(|o| {
            let kw = r.outlet_power_kw.get(o).copied().unwrap_or(0.0);
            format!("{kw:.4}")
        }));
        row.push(format!("{:.4}", r.storage_kw));
        row.push(format!("{:.4}", r.storage_soe_kwh));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports session outcomes to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_outcomes(
    outcomes: &[SessionOutcome],
    tree: &CapacityTree,
    path: &Path,
) -> io::Result<()> {
    let file = File::create(path)?;
    write_outcomes(outcomes, tree, io::BufWriter::new(file))
}

/// Writes session outcomes as CSV to any writer.
///
/// Times that never happened (a rejected session's connect time, say) are
/// left empty.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_outcomes(
    outcomes: &[SessionOutcome],
    tree: &CapacityTree,
    writer: impl Write,
) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(OUTCOME_HEADER.split(','))?;

    for o in outcomes {
        wtr.write_record(&[
            o.id.to_string(),
            o.vehicle.clone(),
            o.status.to_string(),
            o.outlet.map(|n| tree.node(n).name.clone()).unwrap_or_default(),
            timestamp(o.arrival_time),
            o.connected_at.map(timestamp).unwrap_or_default(),
            o.ended_at.map(timestamp).unwrap_or_default(),
            format!("{:.4}", o.soc_arrival),
            format!("{:.4}", o.soc_final),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
