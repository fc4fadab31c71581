//! Split crude clusters into tight sub-clusters by seeded greedy growth.
//!
//! Each sub-cluster is seeded with the most intense unassigned signal of its crude
//! cluster, then grown one signal at a time by taking the unassigned signal nearest
//! to either of its extreme masses. Growth stops when the PPM spread of the
//! sub-cluster jumps by more than [`RefinerParams::closest_signal_max_deviation_ppm`]
//! in one step, when the spread exceeds [`RefinerParams::max_mz_deviation_ppm`], or
//! when no unassigned signal would remain. The signal that broke the rule is
//! returned to the unassigned pool and a new sub-cluster is seeded.
//!
//! The unassigned signals of a crude cluster are kept over its mass-sorted runs of
//! equal masses. Because growth always takes the nearest unassigned mass, no
//! unassigned signal can lie strictly inside a growing sub-cluster's mass range, so
//! the two candidates of every step are the nearest runs with unassigned members on
//! either side of that range. Runs whose members have all been closed into earlier
//! sub-clusters are skipped through path-compressed links.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{argsort, argsort_descending, ppm_spread};

use super::{cluster_members, reindex_clusters, ClusterId, EXCLUDED};

/// Parameters controlling sub-cluster growth
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RefinerParams {
    /// The largest increase of a sub-cluster's PPM spread accepted in one growth step
    pub closest_signal_max_deviation_ppm: f64,
    /// The largest PPM spread a sub-cluster may reach, if any
    pub max_mz_deviation_ppm: Option<f64>,
    /// A hard cap on the number of growth steps spent on one crude cluster. Once
    /// reached, every remaining signal of that crude cluster becomes its own
    /// sub-cluster.
    pub max_growth_steps: Option<usize>,
}

impl Default for RefinerParams {
    fn default() -> Self {
        Self {
            closest_signal_max_deviation_ppm: 15.0,
            max_mz_deviation_ppm: None,
            max_growth_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Free,
    Current,
    Closed,
}

/// Reusable buffers for growing the sub-clusters of one crude cluster. Indices
/// named `k` are local signal positions within the crude cluster, `p` are positions
/// in mass-sorted order and `r` are run indices.
#[derive(Debug, Default)]
struct GrowthWorkspace {
    mz: Vec<f64>,
    intensity: Vec<f64>,
    state: Vec<SignalState>,

    by_mz: Vec<usize>,
    sorted_position: Vec<usize>,
    run_of: Vec<usize>,

    run_start: Vec<usize>,
    run_end: Vec<usize>,
    run_value: Vec<f64>,
    run_free: Vec<usize>,
    run_head: Vec<usize>,
    left_link: Vec<isize>,
    right_link: Vec<usize>,

    by_intensity: Vec<usize>,
    intensity_rank: Vec<usize>,
    seed_cursor: usize,
    returned_seeds: BinaryHeap<Reverse<usize>>,

    current: Vec<usize>,
    free_count: usize,
}

impl GrowthWorkspace {
    fn load(&mut self, members: &[usize], mz: &[f64], intensity: &[f64]) {
        let n = members.len();
        self.mz.clear();
        self.mz.extend(members.iter().map(|i| mz[*i]));
        self.intensity.clear();
        self.intensity.extend(members.iter().map(|i| intensity[*i]));
        self.state.clear();
        self.state.resize(n, SignalState::Free);

        self.by_mz = argsort(&self.mz);
        self.sorted_position.clear();
        self.sorted_position.resize(n, 0);
        self.run_of.clear();
        self.run_of.resize(n, 0);
        self.run_start.clear();
        self.run_end.clear();
        self.run_value.clear();
        for (p, k) in self.by_mz.iter().copied().enumerate() {
            self.sorted_position[k] = p;
            let value = self.mz[k];
            if self.run_value.last().map(|v| *v != value).unwrap_or(true) {
                if !self.run_start.is_empty() {
                    self.run_end.push(p);
                }
                self.run_start.push(p);
                self.run_value.push(value);
            }
            self.run_of[k] = self.run_value.len() - 1;
        }
        if !self.run_start.is_empty() {
            self.run_end.push(n);
        }
        let n_runs = self.run_start.len();
        self.run_free.clear();
        self.run_free.extend(
            self.run_start
                .iter()
                .zip(self.run_end.iter())
                .map(|(s, e)| e - s),
        );
        self.run_head.clear();
        self.run_head.extend_from_slice(&self.run_start);
        self.left_link.clear();
        self.left_link.extend((0..n_runs).map(|r| r as isize));
        self.right_link.clear();
        self.right_link.extend(0..n_runs);

        self.by_intensity = argsort_descending(&self.intensity);
        self.intensity_rank.clear();
        self.intensity_rank.resize(n, 0);
        for (rank, k) in self.by_intensity.iter().copied().enumerate() {
            self.intensity_rank[k] = rank;
        }
        self.seed_cursor = 0;
        self.returned_seeds.clear();
        self.current.clear();
        self.free_count = n;
    }

    /// The most intense free signal, lowest position first among equals
    fn next_seed(&mut self) -> Option<usize> {
        while let Some(Reverse(rank)) = self.returned_seeds.peek().copied() {
            if self.state[self.by_intensity[rank]] == SignalState::Free {
                break;
            }
            self.returned_seeds.pop();
        }
        while self.seed_cursor < self.by_intensity.len()
            && self.state[self.by_intensity[self.seed_cursor]] != SignalState::Free
        {
            self.seed_cursor += 1;
        }
        let from_cursor = (self.seed_cursor < self.by_intensity.len()).then_some(self.seed_cursor);
        let from_returned = self.returned_seeds.peek().map(|Reverse(rank)| *rank);
        match (from_cursor, from_returned) {
            (Some(a), Some(b)) if b < a => {
                self.returned_seeds.pop();
                Some(self.by_intensity[b])
            }
            (Some(a), _) => {
                self.seed_cursor += 1;
                Some(self.by_intensity[a])
            }
            (None, Some(b)) => {
                self.returned_seeds.pop();
                Some(self.by_intensity[b])
            }
            (None, None) => None,
        }
    }

    /// The free member of run `r` with the lowest local position
    fn run_head_member(&mut self, r: usize) -> usize {
        let mut head = self.run_head[r];
        while self.state[self.by_mz[head]] != SignalState::Free {
            head += 1;
        }
        self.run_head[r] = head;
        self.by_mz[head]
    }

    /// The nearest run at or below `start` with free members. Runs passed over
    /// here lie outside the growing sub-cluster, so they are fully closed and
    /// can be skipped permanently.
    fn find_left(&mut self, start: isize) -> Option<usize> {
        let mut cursor = start;
        while cursor >= 0 {
            let r = cursor as usize;
            if self.run_free[r] > 0 {
                break;
            }
            let link = self.left_link[r];
            cursor = if link == cursor { cursor - 1 } else { link };
        }
        let mut node = start;
        while node > cursor {
            let r = node as usize;
            let link = self.left_link[r];
            self.left_link[r] = cursor;
            node = if link == node { node - 1 } else { link };
        }
        (cursor >= 0).then_some(cursor as usize)
    }

    /// The nearest run at or above `start` with free members, see [`GrowthWorkspace::find_left`]
    fn find_right(&mut self, start: usize) -> Option<usize> {
        let n_runs = self.run_start.len();
        let mut cursor = start;
        while cursor < n_runs {
            if self.run_free[cursor] > 0 {
                break;
            }
            let link = self.right_link[cursor];
            cursor = if link == cursor { cursor + 1 } else { link };
        }
        let mut node = start;
        while node < cursor && node < n_runs {
            let link = self.right_link[node];
            self.right_link[node] = cursor;
            node = if link == node { node + 1 } else { link };
        }
        (cursor < n_runs).then_some(cursor)
    }

    fn take(&mut self, k: usize) {
        self.state[k] = SignalState::Current;
        self.run_free[self.run_of[k]] -= 1;
        self.free_count -= 1;
        self.current.push(k);
    }

    fn give_back(&mut self, k: usize) {
        self.state[k] = SignalState::Free;
        let r = self.run_of[k];
        self.run_free[r] += 1;
        self.run_head[r] = self.run_head[r].min(self.sorted_position[k]);
        self.free_count += 1;
        self.returned_seeds.push(Reverse(self.intensity_rank[k]));
        self.current.pop();
    }

    fn close(&mut self, label: ClusterId, members: &[usize], out: &mut [ClusterId]) {
        for k in self.current.drain(..) {
            self.state[k] = SignalState::Closed;
            out[members[k]] = label;
        }
    }
}

/// The nearer of two candidate signals to `target`, preferring the lower
/// local position when both are equally near
#[inline]
fn nearer(
    target: f64,
    left: Option<(usize, f64)>,
    right: Option<(usize, f64)>,
) -> Option<(usize, f64)> {
    let left = left.map(|(k, v)| (k, (v - target).abs()));
    let right = right.map(|(k, v)| (k, (v - target).abs()));
    match (left, right) {
        (Some(l), Some(r)) => {
            if r.1 < l.1 || (r.1 == l.1 && r.0 < l.0) {
                Some(r)
            } else {
                Some(l)
            }
        }
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

/// Re-partitions crude clusters into tight sub-clusters.
///
/// See the [module documentation](self) for the growth rule.
#[derive(Debug, Clone, Default)]
pub struct ClusterRefiner {
    pub params: RefinerParams,
}

impl From<RefinerParams> for ClusterRefiner {
    fn from(params: RefinerParams) -> Self {
        Self::new(params)
    }
}

impl ClusterRefiner {
    pub fn new(params: RefinerParams) -> Self {
        Self { params }
    }

    /// Refine the crude assignment `ids` of signals with masses `mz` and intensities
    /// `intensity`.
    ///
    /// Returns one densely reindexed cluster id per signal. Every signal of a crude
    /// cluster ends up in exactly one sub-cluster, single-signal crude clusters keep
    /// their own cluster, and [`EXCLUDED`] signals stay excluded.
    pub fn refine(&self, mz: &[f64], intensity: &[f64], ids: &[ClusterId]) -> Vec<ClusterId> {
        let mut out = ids.to_vec();
        let mut next_label = ids.iter().copied().max().unwrap_or(EXCLUDED) + 1;
        let mut workspace = GrowthWorkspace::default();

        for (crude_id, members) in cluster_members(ids) {
            if members.len() < 2 {
                continue;
            }
            let produced = self.grow_sub_clusters(
                &members,
                mz,
                intensity,
                &mut workspace,
                &mut next_label,
                &mut out,
            );
            if produced > 1 {
                debug!(
                    "Split crude cluster {crude_id} of {} signals into {produced} sub-clusters",
                    members.len()
                );
            }
        }
        reindex_clusters(&out)
    }

    fn grow_sub_clusters(
        &self,
        members: &[usize],
        mz: &[f64],
        intensity: &[f64],
        ws: &mut GrowthWorkspace,
        next_label: &mut ClusterId,
        out: &mut [ClusterId],
    ) -> usize {
        let closest_max = self.params.closest_signal_max_deviation_ppm;
        let spread_max = self.params.max_mz_deviation_ppm;
        let step_cap = self.params.max_growth_steps.unwrap_or(usize::MAX);

        ws.load(members, mz, intensity);
        let mut steps = 0usize;
        let mut capped = false;
        let mut produced = 0usize;

        while let Some(seed) = ws.next_seed() {
            ws.take(seed);
            let mut lo_run = ws.run_of[seed];
            let mut hi_run = lo_run;
            let mut sum_mz = ws.mz[seed];
            let mut last_spread = 0.0;

            while ws.free_count > 0 && !capped {
                if steps >= step_cap {
                    warn!(
                        "Growth step cap of {step_cap} reached in a crude cluster of {} signals, remaining signals are left as singletons",
                        members.len()
                    );
                    capped = true;
                    break;
                }
                steps += 1;

                let lo_value = ws.run_value[lo_run];
                let hi_value = ws.run_value[hi_run];
                let left_run = if ws.run_free[lo_run] > 0 {
                    Some(lo_run)
                } else {
                    ws.find_left(lo_run as isize - 1)
                };
                let right_run = if ws.run_free[hi_run] > 0 {
                    Some(hi_run)
                } else {
                    ws.find_right(hi_run + 1)
                };
                let left = left_run.map(|r| (ws.run_head_member(r), ws.run_value[r]));
                let right = right_run.map(|r| (ws.run_head_member(r), ws.run_value[r]));

                let top = nearer(hi_value, left, right);
                let low = nearer(lo_value, left, right);
                let chosen = match (top, low) {
                    (Some(t), Some(l)) => {
                        if t.1 < l.1 {
                            t.0
                        } else {
                            l.0
                        }
                    }
                    _ => break,
                };

                ws.take(chosen);
                let chosen_run = ws.run_of[chosen];
                let chosen_value = ws.mz[chosen];
                if chosen_value < lo_value {
                    lo_run = chosen_run;
                }
                if chosen_value > hi_value {
                    hi_run = chosen_run;
                }
                sum_mz += chosen_value;
                let mean_mz = sum_mz / ws.current.len() as f64;
                let spread = ppm_spread(ws.run_value[lo_run], ws.run_value[hi_run], mean_mz);

                let accept = ws.free_count > 0
                    && (spread - last_spread) <= closest_max
                    && spread_max.map(|m| spread <= m).unwrap_or(true);
                if accept {
                    last_spread = spread;
                } else {
                    ws.give_back(chosen);
                    break;
                }
            }

            let label = *next_label;
            *next_label += 1;
            ws.close(label, members, out);
            produced += 1;
        }
        produced
    }
}
