//! Weighted copyset selector.
//!
//! General-purpose strategy: satisfies every scope of a replication property
//! at once (e.g. `{rack: 3, node: 5}`) and spreads load in proportion to
//! per-shard weights.
//!
//! # Algorithm
//!
//! Each call first picks a candidate pool: writable shards with no soft-avoid
//! flag if they can satisfy the property, all writable shards otherwise.
//!
//! 1. **Proportional draw**: randomized systematic sampling over the pool.
//!    Inclusion probabilities start at `r * w / W` and are capped per domain:
//!    at a scope with factor `f` no domain may carry more than `r - f + 1`
//!    copies (one copy per node), and the excess is handed to the other
//!    domains. The sampling order keeps every domain contiguous, so a domain
//!    whose inclusion sums to `s` receives `floor(s)` or `ceil(s)` copies.
//!    Accepted if the drawn set satisfies every scope; retried a few times
//!    otherwise.
//! 2. **Constructive fallback**: grow the copyset one weighted draw at a time.
//!    With `m` slots left, a scope whose missing domain count equals `m` is
//!    tight, and the next shard must open a new domain at every tight scope.
//!    Locations nest, so a shard in a new domain at a wide scope is also new at
//!    every narrower one; a feasible pool therefore never dead-ends.
//!
//! With locality enabled, the first copy goes to the appending node's domain
//! (at the property's biggest replication scope) whenever that domain has an
//! eligible shard. Such calls always take the constructive path.
//!
//! Load is proportional to weight in the statistical limit whenever the
//! topology allows it. The selector reports (once, at construction) domains
//! whose share cannot be honored: those the caps hold below their share, and
//! those that must appear in every copyset but weigh less than one copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use corelib::{EpochMetaData, LogId, NodeId, NodeLocationScope, NodeSetState, NodesConfiguration, ShardId};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::copyset::CopySet;
use crate::error::SelectionError;
use crate::selector::CopySetSelector;
use crate::stats::{SelectionStats, Stat};

/// Systematic draws tried before falling back to constructive selection.
const PROPORTIONAL_ATTEMPTS: usize = 4;

/// Slack when comparing weight shares against what the topology allows.
const BIAS_TOLERANCE: f64 = 1e-6;

/// One scope requirement with its domains interned to dense indices.
#[derive(Debug)]
struct Requirement {
    scope: NodeLocationScope,
    factor: usize,
    domain_names: Vec<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    shard: ShardId,
    weight: f64,
    /// Domain index per requirement, same order as `requirements`.
    domains: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Locality {
    requirement: usize,
    domain: usize,
}

#[derive(Debug)]
pub struct WeightedSelector {
    log_id: LogId,
    replication_factor: usize,
    /// Broadest scope first; the last entry is always NODE with factor `r`.
    requirements: Vec<Requirement>,
    candidates: Vec<Candidate>,
    locality: Option<Locality>,
    nodeset_state: Arc<NodeSetState>,
    stats: Arc<SelectionStats>,
    print_bias_warnings: bool,
}

impl WeightedSelector {
    /// Build the selector for one epoch.
    ///
    /// Candidates are the writable members of the storage set with a positive
    /// weight and a location at every required scope.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_id: LogId,
        epoch: &EpochMetaData,
        nodeset_state: Arc<NodeSetState>,
        config: &NodesConfiguration,
        my_node_id: Option<NodeId>,
        locality_enabled: bool,
        stats: Arc<SelectionStats>,
        print_bias_warnings: bool,
    ) -> Self {
        let replication_factor = epoch.replication.replication_factor();

        let mut scopes: Vec<(NodeLocationScope, usize)> = epoch
            .replication
            .iter()
            .filter(|(scope, factor)| *scope != NodeLocationScope::Node && *factor > 1)
            .collect();
        scopes.sort_by(|a, b| b.0.cmp(&a.0));
        scopes.push((NodeLocationScope::Node, replication_factor));

        let mut requirements: Vec<Requirement> = scopes
            .iter()
            .map(|(scope, factor)| Requirement {
                scope: *scope,
                factor: *factor,
                domain_names: Vec::new(),
            })
            .collect();
        let mut interned: Vec<HashMap<String, usize>> = vec![HashMap::new(); requirements.len()];

        let mut candidates = Vec::new();
        for shard in config.writer_view(&epoch.shards) {
            let weight = epoch.weight_of(&shard);
            if weight <= 0.0 {
                debug!(%log_id, %shard, "shard has no weight, never selected");
                continue;
            }
            let names: Option<Vec<String>> = requirements
                .iter()
                .map(|req| config.domain_of(shard, req.scope))
                .collect();
            let Some(names) = names else {
                warn!(
                    %log_id,
                    %shard,
                    "shard has no location at a replication scope, excluding it from copysets"
                );
                continue;
            };
            let mut domains = Vec::with_capacity(requirements.len());
            for (idx, (req, name)) in requirements.iter_mut().zip(names).enumerate() {
                let next = req.domain_names.len();
                let domain = *interned[idx].entry(name.clone()).or_insert(next);
                if domain == next {
                    req.domain_names.push(name);
                }
                domains.push(domain);
            }
            candidates.push(Candidate { shard, weight, domains });
        }

        let locality = if locality_enabled {
            let scope = epoch.replication.biggest_replication_scope();
            my_node_id.and_then(|node| {
                let requirement = requirements.iter().position(|r| r.scope == scope)?;
                let name = config.domain_of(ShardId { node, shard: 0 }, scope)?;
                let domain = *interned[requirement].get(&name)?;
                Some(Locality { requirement, domain })
            })
        } else {
            None
        };

        let selector = Self {
            log_id,
            replication_factor,
            requirements,
            candidates,
            locality,
            nodeset_state,
            stats,
            print_bias_warnings,
        };
        debug!(
            %log_id,
            replication = %epoch.replication,
            candidates = selector.candidates.len(),
            locality = selector.locality.is_some(),
            "built weighted selector"
        );
        selector.report_bias();
        selector
    }

    pub fn locality_enabled(&self) -> bool {
        self.locality.is_some()
    }

    pub fn print_bias_warnings(&self) -> bool {
        self.print_bias_warnings
    }

    /// Shards the selector may ever pick.
    pub fn candidates(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.candidates.iter().map(|c| c.shard)
    }

    /// Report domains whose weight share cannot be matched by any valid
    /// copyset distribution.
    ///
    /// A domain is biased when the per-domain caps grant it fewer copies than
    /// its weight asks for, or when exactly `f` domains exist (so each holds
    /// at least one copy) and its weight asks for less than one.
    fn report_bias(&self) {
        let total: f64 = self.candidates.iter().map(|c| c.weight).sum();
        let r = self.replication_factor;
        if total <= 0.0 || r == 0 {
            return;
        }

        let everyone: Vec<usize> = (0..self.candidates.len()).collect();
        let granted_per_candidate = self.inclusion_probabilities(&everyone);

        let mut biased = false;
        for (idx, req) in self.requirements.iter().enumerate() {
            let mut wanted = vec![0.0; req.domain_names.len()];
            let mut granted = vec![0.0; req.domain_names.len()];
            for (candidate, inclusion) in self.candidates.iter().zip(&granted_per_candidate) {
                wanted[candidate.domains[idx]] += r as f64 * candidate.weight / total;
                granted[candidate.domains[idx]] += inclusion;
            }
            let floor = if wanted.len() == req.factor { 1.0 } else { 0.0 };

            for (domain, (want, got)) in wanted.iter().zip(&granted).enumerate() {
                if *want <= got + BIAS_TOLERANCE && *want >= floor - BIAS_TOLERANCE {
                    continue;
                }
                biased = true;
                if self.print_bias_warnings {
                    warn!(
                        log_id = %self.log_id,
                        scope = %req.scope,
                        domain = %req.domain_names[domain],
                        expected_copies = want,
                        granted_copies = got,
                        min_copies = floor,
                        "weight share cannot be honored, load will be biased"
                    );
                } else {
                    debug!(
                        log_id = %self.log_id,
                        scope = %req.scope,
                        domain = %req.domain_names[domain],
                        expected_copies = want,
                        granted_copies = got,
                        "weight share cannot be honored"
                    );
                }
            }
        }

        if biased {
            self.stats.bump(if self.print_bias_warnings {
                Stat::BiasWarningPrinted
            } else {
                Stat::BiasWarningSuppressed
            });
        }
    }

    /// Most copies a domain at `level` may carry while `f` domains stay
    /// reachable.
    fn domain_cap(&self, level: usize) -> f64 {
        (self.replication_factor + 1).saturating_sub(self.requirements[level].factor) as f64
    }

    /// Split `members` (positions into `pool`) by their domain at `level`.
    fn group_by_domain(&self, pool: &[usize], members: &[usize], level: usize) -> Vec<Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &pos in members {
            groups
                .entry(self.candidates[pool[pos]].domains[level])
                .or_default()
                .push(pos);
        }
        groups.into_values().collect()
    }

    fn group_weight(&self, pool: &[usize], members: &[usize]) -> f64 {
        members.iter().map(|&pos| self.candidates[pool[pos]].weight).sum()
    }

    /// Most inclusion `members` can absorb under the caps at `level` and
    /// every narrower level.
    fn absorbable(&self, pool: &[usize], members: &[usize], level: usize) -> f64 {
        if level == self.requirements.len() {
            return members.len() as f64;
        }
        let cap = self.domain_cap(level);
        self.group_by_domain(pool, members, level)
            .iter()
            .map(|group| cap.min(self.absorbable(pool, group, level + 1)))
            .sum()
    }

    /// Hand `budget` copies to `members`, level by level, in proportion to
    /// weight within the caps.
    fn allocate(&self, pool: &[usize], members: &[usize], level: usize, budget: f64, out: &mut [f64]) {
        if level == self.requirements.len() {
            let weights: Vec<f64> = members.iter().map(|&pos| self.candidates[pool[pos]].weight).collect();
            let shares = water_fill(&weights, &vec![1.0; members.len()], budget);
            for (&pos, share) in members.iter().zip(shares) {
                out[pos] = share;
            }
            return;
        }

        let cap = self.domain_cap(level);
        let groups = self.group_by_domain(pool, members, level);
        let weights: Vec<f64> = groups.iter().map(|group| self.group_weight(pool, group)).collect();
        let caps: Vec<f64> = groups
            .iter()
            .map(|group| cap.min(self.absorbable(pool, group, level + 1)))
            .collect();
        for (group, share) in groups.iter().zip(water_fill(&weights, &caps, budget)) {
            self.allocate(pool, group, level + 1, share, out);
        }
    }

    /// Inclusion probability per `pool` entry, summing to `r` when the pool
    /// can carry it.
    fn inclusion_probabilities(&self, pool: &[usize]) -> Vec<f64> {
        let mut out = vec![0.0; pool.len()];
        let everyone: Vec<usize> = (0..pool.len()).collect();
        self.allocate(pool, &everyone, 0, self.replication_factor as f64, &mut out);
        out
    }

    /// Random order over `members` in which every domain, at every level, is
    /// one contiguous run.
    fn nested_order<R: Rng + ?Sized>(
        &self,
        pool: &[usize],
        mut members: Vec<usize>,
        level: usize,
        rng: &mut R,
        order: &mut Vec<usize>,
    ) {
        if level == self.requirements.len() {
            members.shuffle(rng);
            order.extend(members);
            return;
        }
        let mut groups = self.group_by_domain(pool, &members, level);
        groups.shuffle(rng);
        for group in groups {
            self.nested_order(pool, group, level + 1, rng, order);
        }
    }

    /// Fail unless `pool` can satisfy every requirement.
    fn check_feasible(&self, pool: &[usize]) -> Result<(), SelectionError> {
        let r = self.replication_factor;
        if pool.len() < r {
            return Err(SelectionError::InsufficientWritableShards {
                required: r,
                available: pool.len(),
            });
        }
        // Narrowest first, so a shortage of nodes is reported as such.
        for (idx, req) in self.requirements.iter().enumerate().rev() {
            let mut seen = vec![false; req.domain_names.len()];
            let mut distinct = 0;
            for &c in pool {
                let domain = self.candidates[c].domains[idx];
                if !seen[domain] {
                    seen[domain] = true;
                    distinct += 1;
                }
            }
            if distinct < req.factor {
                return Err(SelectionError::InsufficientDomains {
                    scope: req.scope,
                    required: req.factor,
                    available: distinct,
                });
            }
        }
        Ok(())
    }

    fn satisfies(&self, picked: &[usize]) -> bool {
        self.requirements.iter().enumerate().all(|(idx, req)| {
            let mut seen = vec![false; req.domain_names.len()];
            let mut distinct = 0;
            for &c in picked {
                let domain = self.candidates[c].domains[idx];
                if !seen[domain] {
                    seen[domain] = true;
                    distinct += 1;
                }
            }
            distinct >= req.factor
        })
    }

    /// Randomized systematic sampling over a domain-contiguous order. `None`
    /// when the draw falls short or violates a requirement.
    fn draw_proportional<R: Rng + ?Sized>(&self, pool: &[usize], rng: &mut R) -> Option<Vec<usize>> {
        let r = self.replication_factor;
        let inclusion = self.inclusion_probabilities(pool);

        let mut order = Vec::with_capacity(pool.len());
        self.nested_order(pool, (0..pool.len()).collect(), 0, rng, &mut order);

        let mut picked = Vec::with_capacity(r);
        let mut next_point: f64 = rng.gen();
        let mut cumulative = 0.0;
        for pos in order {
            cumulative += inclusion[pos];
            if next_point < cumulative && picked.len() < r {
                picked.push(pool[pos]);
                next_point += 1.0;
            }
        }

        if picked.len() == r && self.satisfies(&picked) {
            Some(picked)
        } else {
            None
        }
    }

    /// Grow the copyset one weighted draw at a time, never closing the door
    /// on a requirement. `pool` must be feasible.
    fn draw_constructive<R: Rng + ?Sized>(
        &self,
        pool: &[usize],
        rng: &mut R,
    ) -> Result<Vec<usize>, SelectionError> {
        let r = self.replication_factor;
        let mut remaining: Vec<usize> = pool.to_vec();
        let mut represented: Vec<Vec<bool>> = self
            .requirements
            .iter()
            .map(|req| vec![false; req.domain_names.len()])
            .collect();
        let mut counts = vec![0usize; self.requirements.len()];
        let mut picked = Vec::with_capacity(r);

        for step in 0..r {
            let slots = r - step;
            let tight: Vec<bool> = self
                .requirements
                .iter()
                .zip(&counts)
                .map(|(req, count)| req.factor.saturating_sub(*count) >= slots)
                .collect();

            let mut eligible: Vec<usize> = (0..remaining.len())
                .filter(|&pos| {
                    let candidate = &self.candidates[remaining[pos]];
                    tight
                        .iter()
                        .enumerate()
                        .all(|(idx, is_tight)| !is_tight || !represented[idx][candidate.domains[idx]])
                })
                .collect();

            if step == 0 {
                if let Some(locality) = self.locality {
                    let local: Vec<usize> = eligible
                        .iter()
                        .copied()
                        .filter(|&pos| {
                            self.candidates[remaining[pos]].domains[locality.requirement] == locality.domain
                        })
                        .collect();
                    if !local.is_empty() {
                        eligible = local;
                    }
                }
            }

            if eligible.is_empty() {
                // Unreachable for a feasible pool; report the tight scope.
                let idx = tight.iter().position(|t| *t).unwrap_or(self.requirements.len() - 1);
                let req = &self.requirements[idx];
                return Err(SelectionError::InsufficientDomains {
                    scope: req.scope,
                    required: req.factor,
                    available: counts[idx],
                });
            }

            let choice = match WeightedIndex::new(eligible.iter().map(|&pos| self.candidates[remaining[pos]].weight)) {
                Ok(dist) => eligible[dist.sample(rng)],
                Err(_) => eligible[rng.gen_range(0..eligible.len())],
            };
            let c = remaining.swap_remove(choice);
            for (idx, domain) in self.candidates[c].domains.iter().enumerate() {
                if !represented[idx][*domain] {
                    represented[idx][*domain] = true;
                    counts[idx] += 1;
                }
            }
            picked.push(c);
        }
        Ok(picked)
    }
}

/// Split `budget` in proportion to `weights`, never giving an entry more than
/// its cap; what a capped entry cannot take goes to the others.
fn water_fill(weights: &[f64], caps: &[f64], budget: f64) -> Vec<f64> {
    let mut shares = vec![0.0; weights.len()];
    let mut capped = vec![false; weights.len()];

    loop {
        let taken: f64 = caps.iter().zip(&capped).filter(|(_, c)| **c).map(|(cap, _)| *cap).sum();
        let remaining = budget - taken;
        let total: f64 = weights.iter().zip(&capped).filter(|(_, c)| !**c).map(|(w, _)| *w).sum();
        if total <= 0.0 || remaining <= 0.0 {
            break;
        }

        let mut newly_capped = false;
        for idx in 0..weights.len() {
            if !capped[idx] && remaining * weights[idx] / total >= caps[idx] {
                capped[idx] = true;
                shares[idx] = caps[idx];
                newly_capped = true;
            }
        }
        if newly_capped {
            continue;
        }

        for idx in 0..weights.len() {
            if !capped[idx] {
                shares[idx] = remaining * weights[idx] / total;
            }
        }
        break;
    }
    shares
}

impl CopySetSelector for WeightedSelector {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        let mut ideal = Vec::new();
        let mut writable = Vec::new();
        for (idx, candidate) in self.candidates.iter().enumerate() {
            match self.nodeset_state.get(candidate.shard) {
                Some(reason) if reason.is_ideal() => {
                    ideal.push(idx);
                    writable.push(idx);
                }
                Some(reason) if reason.is_writable() => writable.push(idx),
                _ => {}
            }
        }

        let pool = if self.check_feasible(&ideal).is_ok() {
            ideal
        } else {
            self.check_feasible(&writable)?;
            writable
        };

        let mut picked = None;
        if self.locality.is_none() {
            for _ in 0..PROPORTIONAL_ATTEMPTS {
                picked = self.draw_proportional(&pool, rng);
                if picked.is_some() {
                    break;
                }
            }
        }
        let picked = match picked {
            Some(picked) => picked,
            None => self.draw_constructive(&pool, rng)?,
        };

        Ok(CopySet::new(picked.into_iter().map(|c| self.candidates[c].shard).collect()))
    }

    fn nodeset_state(&self) -> &Arc<NodeSetState> {
        &self.nodeset_state
    }

    fn name(&self) -> &'static str {
        "WeightedSelector"
    }
}
