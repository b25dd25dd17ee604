//! JSON persistence for allocation data
//!
//! Three documents are supported: the allocation log
//! (`{"allocations": [..]}`, losslessly round-trippable), the timeline
//! array, and the store summary object. Writers are generic over
//! [`std::io::Write`] so tests can serialize into in-memory buffers and
//! production code into files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{AllocationEvent, ExportError, TimelinePoint};

#[derive(Serialize)]
struct EventDocumentRef<'a> {
    allocations: &'a [AllocationEvent],
}

#[derive(Deserialize)]
struct EventDocument {
    allocations: Vec<AllocationEvent>,
}

/// Serialize the allocation log as `{"allocations": [..]}`.
pub fn write_events<W: Write>(writer: W, events: &[AllocationEvent]) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, &EventDocumentRef { allocations: events })?;
    Ok(())
}

/// Parse an allocation log previously written by [`write_events`].
pub fn read_events<R: Read>(reader: R) -> Result<Vec<AllocationEvent>, ExportError> {
    let document: EventDocument = serde_json::from_reader(reader)?;
    Ok(document.allocations)
}

/// Write the allocation log to a file.
pub fn write_events_file(path: &Path, events: &[AllocationEvent]) -> Result<(), ExportError> {
    let file = File::create(path)?;
    write_events(BufWriter::new(file), events)
}

/// Read an allocation log from a file.
pub fn read_events_file(path: &Path) -> Result<Vec<AllocationEvent>, ExportError> {
    let file = File::open(path)?;
    read_events(BufReader::new(file))
}

/// Serialize a timeline as a JSON array ordered by ascending timestamp.
pub fn write_timeline<W: Write>(writer: W, points: &[TimelinePoint]) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, points)?;
    Ok(())
}

/// Write a timeline to a file.
pub fn write_timeline_file(path: &Path, points: &[TimelinePoint]) -> Result<(), ExportError> {
    let file = File::create(path)?;
    write_timeline(BufWriter::new(file), points)
}

/// Write a store summary (as produced by `EventStore::summary`) to a file.
pub fn write_summary_file(path: &Path, summary: &serde_json::Value) -> Result<(), ExportError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)?;
    Ok(())
}
