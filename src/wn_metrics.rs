// Metrics engine
//
// Every metric is one grouped reduction over the unified table: rows are
// restricted to the event classes the metric looks at, grouped by lambda and
// optionally by a node column, folded into an accumulator per group and
// finally turned into one value per group.
//
// Groups are reduced in parallel (rayon fold + reduce). Output rows are
// sorted by key so repeated runs print and export identically.

use std::fmt;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use indexmap::IndexMap;
use log::info;
use rayon::prelude::*;

use crate::wn_interface::{EventRecord, EventSet, NodeId, PacketEvent, ParamValue, SimTime};
use crate::wn_table::{EventTable, Row};

/// Bytes per MiB, rates are reported in MiB/s
pub const MIB: f64 = 1024.0 * 1024.0;

/// Midpoint of the simulator's 32..1500 byte packet size range
pub const DEFAULT_PACKET_SIZE: f64 = (1500.0 + 32.0) / 2.0;

/// Default link bit rate (bits/s)
pub const DEFAULT_DATA_RATE: f64 = 8_000_000.0;

/// Analytic offered load in MiB/s for `n_nodes` Poisson sources of rate
/// `lambda` packets/s sending `packet_size` bytes on average.
pub fn offered_load(lambda: f64, n_nodes: usize, packet_size: f64) -> f64 {
    lambda * n_nodes as f64 * packet_size * 8.0 / MIB
}

// ============================================================================
// Metrics and grouping keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    OfferedLoad,
    DropRate,
    CollisionRate,
    Throughput,
    ChannelLossRate,
    QueueLength,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::OfferedLoad => "offered_load",
            Metric::DropRate => "drop_rate",
            Metric::CollisionRate => "collision_rate",
            Metric::Throughput => "throughput",
            Metric::ChannelLossRate => "channel_loss_rate",
            Metric::QueueLength => "queue_length",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Node column a metric is grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColumn {
    Src,
    Dst,
}

impl NodeColumn {
    pub fn name(self) -> &'static str {
        match self {
            NodeColumn::Src => "src",
            NodeColumn::Dst => "dst",
        }
    }

    fn pick(self, record: &EventRecord) -> NodeId {
        match self {
            NodeColumn::Src => record.src,
            NodeColumn::Dst => record.dst,
        }
    }
}

/// Group key: lambda, plus the node when grouping per node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub lambda: ParamValue,
    pub node: Option<NodeId>,
}

impl GroupKey {
    fn of(row: &Row<'_>, column: Option<NodeColumn>) -> Self {
        Self {
            lambda: row.params.lambda.clone(),
            node: column.map(|c| c.pick(row.record)),
        }
    }
}

// ============================================================================
// Generic grouped reduction
// ============================================================================

/// Per-group fold of a metric.
///
/// `restrict` selects the rows the metric looks at, the accumulator collects
/// them and `finish` turns a group's accumulator into the metric value.
pub trait Reducer: Sync {
    type Acc: Default + Send;

    fn restrict(&self) -> EventSet {
        EventSet::ALL
    }

    fn add(&self, acc: &mut Self::Acc, record: &EventRecord);

    fn merge(&self, acc: &mut Self::Acc, other: Self::Acc);

    fn finish(&self, acc: &Self::Acc) -> f64;
}

/// Group `rows` by `column` and lambda and reduce each group to one value.
///
/// Only groups with at least one row in the restricted set exist. An empty
/// input gives an empty output.
pub fn group_reduce<'t, I, R>(rows: I, column: Option<NodeColumn>, reducer: &R) -> Vec<(GroupKey, f64)>
where
    I: ParallelIterator<Item = Row<'t>>,
    R: Reducer,
{
    let restrict = reducer.restrict();
    let groups = rows
        .filter(|row| restrict.contains(row.record.event))
        .fold(HashMap::new, |mut groups: HashMap<GroupKey, R::Acc>, row| {
            reducer.add(groups.entry(GroupKey::of(&row, column)).or_default(), row.record);
            groups
        })
        .reduce(HashMap::new, |mut left, right| {
            for (key, acc) in right {
                match left.entry(key) {
                    Entry::Occupied(mut entry) => reducer.merge(entry.get_mut(), acc),
                    Entry::Vacant(entry) => {
                        entry.insert(acc);
                    }
                }
            }
            left
        });

    let mut out: Vec<(GroupKey, f64)> = groups
        .into_iter()
        .map(|(key, acc)| {
            let value = reducer.finish(&acc);
            (key, value)
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Bit rate of one event class: `sum(size * 8) / sim_time` in MiB/s.
///
/// Undefined (NaN) when no simulated time has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct BitRate {
    pub event: PacketEvent,
    pub sim_time: SimTime,
}

impl Reducer for BitRate {
    type Acc = u64;

    fn restrict(&self) -> EventSet {
        EventSet::of(&[self.event])
    }

    fn add(&self, bytes: &mut u64, record: &EventRecord) {
        *bytes += record.size as u64;
    }

    fn merge(&self, bytes: &mut u64, other: u64) {
        *bytes += other;
    }

    fn finish(&self, bytes: &u64) -> f64 {
        if self.sim_time <= 0.0 {
            return f64::NAN;
        }
        (*bytes as f64 * 8.0) / self.sim_time / MIB
    }
}

/// Ratio of event counts inside a group: `count(numerator) / count(denominator)`.
///
/// A group without denominator rows yields NaN, whatever the numerator.
#[derive(Debug, Clone, Copy)]
pub struct EventRatio {
    pub restrict: EventSet,
    pub numerator: EventSet,
    pub denominator: EventSet,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RatioAcc {
    pub numerator: u64,
    pub denominator: u64,
}

impl Reducer for EventRatio {
    type Acc = RatioAcc;

    fn restrict(&self) -> EventSet {
        self.restrict
    }

    fn add(&self, acc: &mut RatioAcc, record: &EventRecord) {
        if self.numerator.contains(record.event) {
            acc.numerator += 1;
        }
        if self.denominator.contains(record.event) {
            acc.denominator += 1;
        }
    }

    fn merge(&self, acc: &mut RatioAcc, other: RatioAcc) {
        acc.numerator += other.numerator;
        acc.denominator += other.denominator;
    }

    fn finish(&self, acc: &RatioAcc) -> f64 {
        if acc.denominator == 0 {
            return f64::NAN;
        }
        acc.numerator as f64 / acc.denominator as f64
    }
}

/// Mean of the `size` column over one event class
#[derive(Debug, Clone, Copy)]
pub struct MeanSize {
    pub event: PacketEvent,
}

impl Reducer for MeanSize {
    type Acc = (u64, u64);

    fn restrict(&self) -> EventSet {
        EventSet::of(&[self.event])
    }

    fn add(&self, acc: &mut (u64, u64), record: &EventRecord) {
        acc.0 += record.size as u64;
        acc.1 += 1;
    }

    fn merge(&self, acc: &mut (u64, u64), other: (u64, u64)) {
        acc.0 += other.0;
        acc.1 += other.1;
    }

    fn finish(&self, acc: &(u64, u64)) -> f64 {
        if acc.1 == 0 {
            return f64::NAN;
        }
        acc.0 as f64 / acc.1 as f64
    }
}

const DROP_RATE: EventRatio = EventRatio {
    restrict: EventSet::ALL,
    numerator: EventSet::of(&[PacketEvent::QueueDropped]),
    denominator: EventSet::of(&[PacketEvent::Generated]),
};

const COLLISION_RATE: EventRatio = EventRatio {
    restrict: EventSet::of(&[PacketEvent::Received, PacketEvent::Corrupted]),
    numerator: EventSet::of(&[PacketEvent::Corrupted]),
    denominator: EventSet::of(&[PacketEvent::Received, PacketEvent::Corrupted]),
};

const CHANNEL_LOSS_RATE: EventRatio = EventRatio {
    restrict: EventSet::of(&[
        PacketEvent::Received,
        PacketEvent::Corrupted,
        PacketEvent::CorruptedByChannel,
    ]),
    numerator: EventSet::of(&[PacketEvent::CorruptedByChannel]),
    denominator: EventSet::of(&[
        PacketEvent::Received,
        PacketEvent::Corrupted,
        PacketEvent::CorruptedByChannel,
    ]),
};

// ============================================================================
// Summary tables
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub lambda: ParamValue,
    /// `None` for tables grouped by lambda only
    pub node: Option<NodeId>,
    pub value: f64,
    /// Analytic offered load for this row's lambda (NaN if lambda is not numeric)
    pub ol: f64,
}

/// One metric, one row per group
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub metric: Metric,
    pub prefix: Option<ParamValue>,
    pub node_column: Option<NodeColumn>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of the group (`lambda`, `node`)
    pub fn get(&self, lambda: &ParamValue, node: Option<NodeId>) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.lambda == *lambda && row.node == node)
            .map(|row| row.value)
    }

    /// Rows whose value is defined, the ones a plot can draw
    pub fn defined_rows(&self) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().filter(|row| !row.value.is_nan())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Run-level constants of an analysis
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    /// Link bit rate (bits/s). Carried along for rate metrics; the current
    /// formulas normalize by simulated time instead.
    pub data_rate: f64,
    /// Number of sending nodes, used for the analytic offered load
    pub n_nodes: usize,
    /// Mean packet size (bytes), used for the analytic offered load
    pub packet_size: f64,
    /// Group drop, collision and throughput by lambda only
    pub coarse: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            data_rate: DEFAULT_DATA_RATE,
            n_nodes: 1,
            packet_size: DEFAULT_PACKET_SIZE,
            coarse: false,
        }
    }
}

/// Computes the summary tables over a table, or over the runs of one prefix.
pub struct MetricsEngine<'t> {
    table: &'t EventTable,
    params: EngineParams,
    prefix: Option<ParamValue>,
    selected: Vec<bool>,
    sim_time: SimTime,
}

impl<'t> MetricsEngine<'t> {
    /// Engine over every run of the table
    pub fn new(table: &'t EventTable, params: EngineParams) -> Self {
        Self::for_prefix(table, params, None)
    }

    /// Engine over the runs whose prefix equals `prefix` (all runs for `None`).
    /// `sim_time` is the largest event time among the selected rows.
    pub fn for_prefix(
        table: &'t EventTable,
        params: EngineParams,
        prefix: Option<&ParamValue>,
    ) -> Self {
        let selected = table.run_mask(prefix);
        let mut engine = Self {
            table,
            params,
            prefix: prefix.cloned(),
            selected,
            sim_time: 0.0,
        };
        let sim_time = engine
            .rows()
            .map(|row| row.record.time)
            .reduce(|| 0.0, f64::max);
        engine.sim_time = sim_time;
        engine
    }

    pub fn sim_time(&self) -> SimTime {
        self.sim_time
    }

    pub fn prefix(&self) -> Option<&ParamValue> {
        self.prefix.as_ref()
    }

    fn rows(&self) -> impl ParallelIterator<Item = Row<'t>> + '_ {
        let selected = &self.selected;
        self.table.par_rows().filter(move |row| selected[row.run])
    }

    fn grouping(&self, column: NodeColumn) -> Option<NodeColumn> {
        if self.params.coarse {
            None
        } else {
            Some(column)
        }
    }

    fn summarize_with<R: Reducer>(
        &self,
        metric: Metric,
        column: Option<NodeColumn>,
        reducer: &R,
    ) -> SummaryTable {
        let rows = group_reduce(self.rows(), column, reducer)
            .into_iter()
            .map(|(key, value)| SummaryRow {
                ol: key.lambda.as_f64().map_or(f64::NAN, |lambda| {
                    offered_load(lambda, self.params.n_nodes, self.params.packet_size)
                }),
                lambda: key.lambda,
                node: key.node,
                value,
            })
            .collect();

        SummaryTable {
            metric,
            prefix: self.prefix.clone(),
            node_column: column,
            rows,
        }
    }

    /// Generated bit rate per (src, lambda), MiB/s
    pub fn offered_load(&self) -> SummaryTable {
        let reducer = BitRate {
            event: PacketEvent::Generated,
            sim_time: self.sim_time,
        };
        self.summarize_with(Metric::OfferedLoad, Some(NodeColumn::Src), &reducer)
    }

    /// Queue drops over generated packets per (src, lambda)
    pub fn drop_rate(&self) -> SummaryTable {
        self.summarize_with(Metric::DropRate, self.grouping(NodeColumn::Src), &DROP_RATE)
    }

    /// Corrupted over received-or-corrupted per (dst, lambda)
    pub fn collision_rate(&self) -> SummaryTable {
        self.summarize_with(
            Metric::CollisionRate,
            self.grouping(NodeColumn::Dst),
            &COLLISION_RATE,
        )
    }

    /// Received bit rate per (dst, lambda), MiB/s
    pub fn throughput(&self) -> SummaryTable {
        let reducer = BitRate {
            event: PacketEvent::Received,
            sim_time: self.sim_time,
        };
        self.summarize_with(Metric::Throughput, self.grouping(NodeColumn::Dst), &reducer)
    }

    /// Channel-caused corruption over all reception outcomes per (dst, lambda)
    pub fn channel_loss_rate(&self) -> SummaryTable {
        self.summarize_with(
            Metric::ChannelLossRate,
            self.grouping(NodeColumn::Dst),
            &CHANNEL_LOSS_RATE,
        )
    }

    /// Mean sampled queue length per (src, lambda)
    pub fn queue_length(&self) -> SummaryTable {
        let reducer = MeanSize {
            event: PacketEvent::QueueSize,
        };
        self.summarize_with(Metric::QueueLength, Some(NodeColumn::Src), &reducer)
    }

    /// Event class counts of the selected rows
    pub fn event_counts(&self) -> IndexMap<PacketEvent, usize> {
        let counts = self
            .rows()
            .fold(
                || [0usize; PacketEvent::COUNT],
                |mut counts, row| {
                    counts[row.record.event.code() as usize] += 1;
                    counts
                },
            )
            .reduce(
                || [0usize; PacketEvent::COUNT],
                |mut left, right| {
                    for (l, r) in left.iter_mut().zip(right) {
                        *l += r;
                    }
                    left
                },
            );
        PacketEvent::ALL.iter().map(|e| (*e, counts[e.code() as usize])).collect()
    }

    /// All tables for this engine's selection
    pub fn summarize(&self) -> MetricsSummary {
        MetricsSummary {
            prefix: self.prefix.clone(),
            sim_time: self.sim_time,
            runs: self.selected.iter().filter(|s| **s).count(),
            event_counts: self.event_counts(),
            offered_load: self.offered_load(),
            drop_rate: self.drop_rate(),
            collision_rate: self.collision_rate(),
            throughput: self.throughput(),
            channel_loss_rate: self.channel_loss_rate(),
            queue_length: self.queue_length(),
        }
    }
}

/// Every table computed for one prefix (or for the whole table)
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub prefix: Option<ParamValue>,
    pub sim_time: SimTime,
    pub runs: usize,
    pub event_counts: IndexMap<PacketEvent, usize>,
    pub offered_load: SummaryTable,
    pub drop_rate: SummaryTable,
    pub collision_rate: SummaryTable,
    pub throughput: SummaryTable,
    pub channel_loss_rate: SummaryTable,
    pub queue_length: SummaryTable,
}

impl MetricsSummary {
    pub fn tables(&self) -> [&SummaryTable; 6] {
        [
            &self.offered_load,
            &self.drop_rate,
            &self.collision_rate,
            &self.throughput,
            &self.channel_loss_rate,
            &self.queue_length,
        ]
    }

    /// Log a short description of the analyzed runs
    pub fn log_summary(&self) {
        let label = self
            .prefix
            .as_ref()
            .map_or_else(|| "all".to_string(), |p| p.to_string());
        info!(
            "[{}] runs: {} sim_time: {:.3}s",
            label, self.runs, self.sim_time
        );
        for (event, count) in &self.event_counts {
            if *count > 0 {
                info!("[{}]   {:<26} {}", label, event.name(), count);
            }
        }
        for table in self.tables() {
            let defined = table.defined_rows().count();
            info!(
                "[{}]   {:<18} {} group(s), {} undefined",
                label,
                table.metric.name(),
                table.len(),
                table.len() - defined
            );
        }
    }
}

/// One summary per prefix present in the table
pub fn summarize_by_prefix(table: &EventTable, params: &EngineParams) -> Vec<MetricsSummary> {
    table
        .prefixes()
        .iter()
        .map(|prefix| MetricsEngine::for_prefix(table, params.clone(), Some(prefix)).summarize())
        .collect()
}
