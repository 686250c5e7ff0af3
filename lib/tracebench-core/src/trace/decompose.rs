use std::collections::BTreeMap;

use crate::{table::TableRecord, trace::CallEdge};

/// A maximal run of overlapping child calls under one parent.
///
/// Children whose intervals touch or overlap are merged into a single step, and sequential calls each get their own
/// step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    /// Position of the step under its parent, starting at zero.
    pub index: usize,

    /// Earliest start time of any member.
    pub start_time: i64,

    /// Latest end time of any member.
    pub end_time: i64,

    /// Span IDs of the child calls in this step.
    pub members: Vec<String>,
}

impl Step {
    /// Returns the wall-clock time covered by this step.
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// Merges child call intervals into steps.
///
/// Children are expected in ascending start order. A child that starts at or before the end of the current step joins
/// it, extending the step's end if needed; any other child closes the current step and opens a new one.
pub fn merge_steps<'a, I>(children: I) -> Vec<Step>
where
    I: IntoIterator<Item = (&'a str, i64, i64)>,
{
    let mut steps = Vec::new();
    let mut current: Option<Step> = None;

    for (child_id, start_time, end_time) in children {
        match current.as_mut() {
            Some(step) if start_time <= step.end_time => {
                step.end_time = step.end_time.max(end_time);
                step.members.push(child_id.to_string());
            }
            _ => {
                let index = steps.len() + usize::from(current.is_some());
                if let Some(closed) = current.take() {
                    steps.push(closed);
                }
                current = Some(Step {
                    index,
                    start_time,
                    end_time,
                    members: vec![child_id.to_string()],
                });
            }
        }
    }

    steps.extend(current);
    steps
}

/// Returns the parent's exclusive duration: its duration minus the time covered by its child steps.
pub fn exclusive_duration(parent_duration: i64, steps: &[Step]) -> i64 {
    parent_duration - steps.iter().map(Step::duration).sum::<i64>()
}

/// A call edge annotated with its step and its parent's exclusive duration.
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposedEdge {
    /// The underlying call edge.
    pub edge: CallEdge,

    /// Index of the step the child belongs to.
    pub step: usize,

    /// Duration of that step.
    pub step_duration: i64,

    /// Parent duration not spent waiting on any child.
    pub exact_parent_duration: i64,
}

impl TableRecord for DecomposedEdge {
    fn columns() -> &'static [&'static str] {
        &[
            "trace_id",
            "trace_time",
            "start_time",
            "end_time",
            "parent_id",
            "child_id",
            "child_operation",
            "parent_operation",
            "child_ms",
            "child_pod",
            "parent_ms",
            "parent_pod",
            "parent_duration",
            "child_duration",
            "step",
            "merged_child_duration",
            "exact_parent_duration",
        ]
    }

    fn cells(&self) -> Vec<String> {
        let mut cells = self.edge.cells();
        cells.push(self.step.to_string());
        cells.push(self.step_duration.to_string());
        cells.push(self.exact_parent_duration.to_string());
        cells
    }
}

/// Counters describing a decomposition.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecompositionSummary {
    /// Number of distinct `(trace, parent)` groups.
    pub parents: usize,

    /// Number of steps across all parents.
    pub steps: usize,

    /// Number of rows dropped because the parent's exclusive duration was not positive.
    pub dropped_rows: usize,
}

/// Result of decomposing a set of call edges.
#[derive(Clone, Debug, Default)]
pub struct Decomposition {
    /// Retained edges, grouped by `(trace_id, parent_id)` and ordered by child start time within each group.
    pub edges: Vec<DecomposedEdge>,

    /// Decomposition counters.
    pub summary: DecompositionSummary,
}

/// Decomposes call edges into steps and computes each parent's exclusive duration.
///
/// Edges are grouped by `(trace_id, parent_id)`. Within a group, children are sorted by start time (ties keep their
/// input order) and merged with [`merge_steps`]. Every edge in the group then carries the same exclusive duration.
/// Groups whose exclusive duration is zero or negative, which happens with clock skew or asynchronous children
/// outliving their parent, are dropped and counted in [`DecompositionSummary::dropped_rows`].
pub fn decompose(edges: Vec<CallEdge>) -> Decomposition {
    let mut groups: BTreeMap<(String, String), Vec<CallEdge>> = BTreeMap::new();
    for edge in edges {
        groups
            .entry((edge.trace_id.clone(), edge.parent_id.clone()))
            .or_default()
            .push(edge);
    }

    let mut decomposition = Decomposition::default();
    for (_, mut children) in groups {
        children.sort_by_key(|edge| edge.start_time);

        let steps = merge_steps(
            children
                .iter()
                .map(|edge| (edge.child_id.as_str(), edge.start_time, edge.end_time)),
        );

        decomposition.summary.parents += 1;
        decomposition.summary.steps += steps.len();

        // All children of one parent report the same parent duration.
        let parent_duration = children[0].parent_duration;
        let exact_parent_duration = exclusive_duration(parent_duration, &steps);
        if exact_parent_duration <= 0 {
            decomposition.summary.dropped_rows += children.len();
            continue;
        }

        let mut step_of_child = Vec::with_capacity(children.len());
        for step in &steps {
            step_of_child.extend(step.members.iter().map(|_| (step.index, step.duration())));
        }

        decomposition
            .edges
            .extend(
                children
                    .into_iter()
                    .zip(step_of_child)
                    .map(|(edge, (step, step_duration))| DecomposedEdge {
                        edge,
                        step,
                        step_duration,
                        exact_parent_duration,
                    }),
            );
    }

    decomposition
}
