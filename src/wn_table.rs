// Unified event table
//
// All runs of a result folder-set live in one table. The run parameters are
// stored once per run and every row points at its run, which is how the
// filename parameters get broadcast onto each event of the file they came
// from without copying the prefix string into every row.

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::wn_interface::{EventRecord, PacketEvent, ParamValue, RunParams};

/// A stored row: the event plus the index of the run it belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TableRow {
    pub(crate) run: u32,
    pub(crate) record: EventRecord,
}

/// Borrowed view of one joined row (event x run parameters)
#[derive(Debug, Clone, Copy)]
pub struct Row<'t> {
    pub run: usize,
    pub params: &'t RunParams,
    pub record: &'t EventRecord,
}

/// Concatenation of every run's events, each joined with its run parameters.
///
/// Row order follows the order runs were added and carries no meaning for
/// the metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    runs: Vec<RunParams>,
    rows: Vec<TableRow>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the events of a single run
    pub fn from_run(params: RunParams, records: Vec<EventRecord>) -> Self {
        let mut table = Self::new();
        table.push_run(params, records);
        table
    }

    /// Add one run and all its events. Returns the run index.
    pub fn push_run<I>(&mut self, params: RunParams, records: I) -> usize
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let run = self.runs.len();
        self.runs.push(params);
        self.rows.extend(records.into_iter().map(|record| TableRow {
            run: run as u32,
            record,
        }));
        run
    }

    /// Move all runs of `other` to the end of this table
    pub fn append(&mut self, other: EventTable) {
        let offset = self.runs.len() as u32;
        self.runs.extend(other.runs);
        self.rows.extend(other.rows.into_iter().map(|row| TableRow {
            run: row.run + offset,
            record: row.record,
        }));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn runs(&self) -> &[RunParams] {
        &self.runs
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|row| self.join(row))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(move |row| self.join(row))
    }

    pub fn par_rows(&self) -> impl IndexedParallelIterator<Item = Row<'_>> + '_ {
        self.rows.par_iter().map(move |row| self.join(row))
    }

    fn join<'t>(&'t self, row: &'t TableRow) -> Row<'t> {
        Row {
            run: row.run as usize,
            params: &self.runs[row.run as usize],
            record: &row.record,
        }
    }

    /// Distinct prefixes, sorted
    pub fn prefixes(&self) -> Vec<ParamValue> {
        let mut prefixes: Vec<ParamValue> = self.runs.iter().map(|r| r.prefix.clone()).collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    /// Per-run selection mask: `true` for runs whose prefix matches
    /// (every run when `prefix` is `None`)
    pub fn run_mask(&self, prefix: Option<&ParamValue>) -> Vec<bool> {
        self.runs
            .iter()
            .map(|run| prefix.map_or(true, |p| run.prefix == *p))
            .collect()
    }

    /// Number of rows of each event class, in code order
    pub fn event_counts(&self) -> IndexMap<PacketEvent, usize> {
        let mut counts: IndexMap<PacketEvent, usize> =
            PacketEvent::ALL.iter().map(|e| (*e, 0)).collect();
        for row in &self.rows {
            if let Some(count) = counts.get_mut(&row.record.event) {
                *count += 1;
            }
        }
        counts
    }

    pub(crate) fn raw_rows(&self) -> &[TableRow] {
        &self.rows
    }

    /// Rebuild a table from stored parts. Returns `None` when a row points at
    /// a run that does not exist.
    pub(crate) fn from_raw(runs: Vec<RunParams>, rows: Vec<TableRow>) -> Option<Self> {
        if rows.iter().any(|row| row.run as usize >= runs.len()) {
            return None;
        }
        Some(Self { runs, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64, src: u32, event: PacketEvent) -> EventRecord {
        EventRecord {
            time,
            src,
            dst: src,
            size: 100,
            event,
        }
    }

    #[test]
    fn test_every_row_carries_its_run() {
        let mut table = EventTable::new();
        table.push_run(
            RunParams::new("aloha", 10, 1),
            vec![record(0.1, 1, PacketEvent::Generated); 3],
        );
        table.push_run(
            RunParams::new("aloha", 20, 1),
            vec![record(0.2, 2, PacketEvent::Generated); 2],
        );

        assert_eq!(table.len(), 5);
        assert_eq!(table.run_count(), 2);

        let lambdas: Vec<_> = table.rows().map(|r| r.params.lambda.clone()).collect();
        assert_eq!(
            lambdas,
            vec![
                ParamValue::Numeric(10),
                ParamValue::Numeric(10),
                ParamValue::Numeric(10),
                ParamValue::Numeric(20),
                ParamValue::Numeric(20),
            ]
        );
    }

    #[test]
    fn test_append_reindexes_runs() {
        let mut first = EventTable::from_run(
            RunParams::new("aloha", 10, 1),
            vec![record(0.1, 1, PacketEvent::Generated)],
        );
        let second = EventTable::from_run(
            RunParams::new("realistic", 10, 1),
            vec![record(0.5, 4, PacketEvent::QueueDropped)],
        );

        first.append(second);

        let last = first.row(1).unwrap();
        assert_eq!(last.run, 1);
        assert_eq!(last.params.prefix, ParamValue::Text("realistic".to_string()));
        assert_eq!(last.record.src, 4);
    }

    #[test]
    fn test_prefixes_and_mask() {
        let mut table = EventTable::new();
        table.push_run(RunParams::new("b", 10, 1), vec![]);
        table.push_run(RunParams::new("a", 10, 1), vec![]);
        table.push_run(RunParams::new("b", 20, 1), vec![]);

        assert_eq!(
            table.prefixes(),
            vec![
                ParamValue::Text("a".to_string()),
                ParamValue::Text("b".to_string())
            ]
        );

        let b = ParamValue::Text("b".to_string());
        assert_eq!(table.run_mask(Some(&b)), vec![true, false, true]);
        assert_eq!(table.run_mask(None), vec![true, true, true]);
    }

    #[test]
    fn test_event_counts() {
        let table = EventTable::from_run(
            RunParams::new("aloha", 10, 1),
            vec![
                record(0.1, 1, PacketEvent::Generated),
                record(0.2, 1, PacketEvent::Generated),
                record(0.3, 1, PacketEvent::QueueDropped),
            ],
        );

        let counts = table.event_counts();
        assert_eq!(counts[&PacketEvent::Generated], 2);
        assert_eq!(counts[&PacketEvent::QueueDropped], 1);
        assert_eq!(counts[&PacketEvent::Received], 0);
        assert_eq!(counts.len(), PacketEvent::ALL.len());
    }

    #[test]
    fn test_from_raw_rejects_dangling_run() {
        let rows = vec![TableRow {
            run: 3,
            record: record(0.0, 1, PacketEvent::Generated),
        }];
        assert!(EventTable::from_raw(vec![RunParams::new("a", 1, 1)], rows).is_none());
    }
}
