//! Rolling per-entity signals and per-portfolio risk summaries.
//!
//! This is the only shared-mutation point in the service. Each portfolio owns
//! a write mutex and a published summary; writers serialize on the mutex and
//! swap in a fresh summary `Arc`, readers only clone the published `Arc`.
//! Entity state lives in a sharded map. Locks are taken entity first, then
//! portfolio, and never in the reverse order.

use crate::dedupe::DedupeWindow;
use crate::error::AggregatorError;
use crate::types::event::RiskEvent;
use crate::types::portfolio::{EntitySnapshot, PortfolioSummary};
use crate::types::score::{RiskTier, ScoreResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// Default number of recent event ids remembered per entity
pub const DEFAULT_DEDUPE_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer result for the entity was already applied
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Duplicate,
}

struct EntityState {
    portfolio_id: Option<String>,
    snapshot: EntitySnapshot,
    last_scored_at: Option<DateTime<Utc>>,
    /// Created on the first event; scored-only entities carry none
    seen_events: Option<DedupeWindow<String>>,
}

impl EntityState {
    fn new() -> Self {
        Self {
            portfolio_id: None,
            snapshot: EntitySnapshot::default(),
            last_scored_at: None,
            seen_events: None,
        }
    }

    fn first_seen(&mut self, event_id: &str, dedupe_window: usize) -> bool {
        self.seen_events
            .get_or_insert_with(|| DedupeWindow::new(dedupe_window))
            .first_seen(event_id.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
struct Member {
    score: f64,
    tier: RiskTier,
    scored_at: DateTime<Utc>,
}

/// Ordered key for a score in `[0, 1]`; `+ 0.0` folds `-0.0` into `0.0`
fn score_key(score: f64) -> u64 {
    (score.max(0.0) + 0.0).to_bits()
}

struct PortfolioState {
    portfolio_id: String,
    members: HashMap<String, Member>,
    score_sum: f64,
    /// Multiset of member scores, for the running maximum
    scores: BTreeMap<u64, u32>,
    tiers: BTreeMap<RiskTier, u64>,
    event_count: u64,
    events_by_type: BTreeMap<String, u64>,
}

impl PortfolioState {
    fn new(portfolio_id: &str) -> Self {
        Self {
            portfolio_id: portfolio_id.to_string(),
            members: HashMap::new(),
            score_sum: 0.0,
            scores: BTreeMap::new(),
            tiers: BTreeMap::new(),
            event_count: 0,
            events_by_type: BTreeMap::new(),
        }
    }

    fn add(&mut self, member: Member) {
        self.score_sum += member.score;
        *self.scores.entry(score_key(member.score)).or_insert(0) += 1;
        *self.tiers.entry(member.tier).or_insert(0) += 1;
    }

    fn subtract(&mut self, member: Member) {
        self.score_sum -= member.score;
        let key = score_key(member.score);
        if let Some(count) = self.scores.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.scores.remove(&key);
            }
        }
        if let Some(count) = self.tiers.get_mut(&member.tier) {
            *count = count.saturating_sub(1);
        }
        if self.members.is_empty() {
            self.score_sum = 0.0;
        }
    }

    /// Replace the entity's contribution unless `member` is older
    fn upsert_member(&mut self, entity_id: &str, member: Member) -> bool {
        if let Some(previous) = self.members.get(entity_id).copied() {
            if previous.scored_at > member.scored_at {
                return false;
            }
            self.members.remove(entity_id);
            self.subtract(previous);
        }
        self.members.insert(entity_id.to_string(), member);
        self.add(member);
        true
    }

    /// Drop the entity unless its stored score is newer than `as_of`
    fn remove_member(&mut self, entity_id: &str, as_of: DateTime<Utc>) -> bool {
        match self.members.get(entity_id).copied() {
            Some(previous) if previous.scored_at <= as_of => {
                self.members.remove(entity_id);
                self.subtract(previous);
                true
            }
            _ => false,
        }
    }

    fn record_event(&mut self, event_type: &str) -> bool {
        self.event_count += 1;
        *self.events_by_type.entry(event_type.to_string()).or_insert(0) += 1;
        true
    }

    fn summary(&self) -> PortfolioSummary {
        let entity_count = self.members.len() as u64;
        let mean_score = if entity_count > 0 {
            (self.score_sum / entity_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let max_score = self
            .scores
            .keys()
            .next_back()
            .map(|bits| f64::from_bits(*bits))
            .unwrap_or(0.0);

        let mut summary = PortfolioSummary::empty(self.portfolio_id.clone());
        summary.entity_count = entity_count;
        summary.mean_score = mean_score;
        summary.max_score = max_score;
        for (tier, count) in &self.tiers {
            summary.tier_distribution.insert(*tier, *count);
        }
        summary.event_count = self.event_count;
        summary.events_by_type = self.events_by_type.clone();
        summary
    }
}

struct PortfolioCell {
    state: Mutex<PortfolioState>,
    published: RwLock<Arc<PortfolioSummary>>,
}

impl PortfolioCell {
    fn new(portfolio_id: &str) -> Self {
        Self {
            state: Mutex::new(PortfolioState::new(portfolio_id)),
            published: RwLock::new(Arc::new(PortfolioSummary::empty(portfolio_id))),
        }
    }

    /// Apply `f` under the portfolio's write lock and publish a new summary
    /// when it reports a change
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut PortfolioState) -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = f(&mut state);
        if changed {
            let summary = Arc::new(state.summary());
            *self.published.write().unwrap_or_else(PoisonError::into_inner) = summary;
        }
        changed
    }

    fn snapshot(&self) -> Arc<PortfolioSummary> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct PortfolioAggregator {
    portfolios: DashMap<String, Arc<PortfolioCell>>,
    entities: DashMap<String, EntityState>,
    dedupe_window: usize,
}

impl PortfolioAggregator {
    pub fn new() -> Self {
        Self::with_dedupe_window(DEFAULT_DEDUPE_WINDOW)
    }

    /// `dedupe_window` bounds how many recent event ids are remembered per entity
    pub fn with_dedupe_window(dedupe_window: usize) -> Self {
        Self {
            portfolios: DashMap::new(),
            entities: DashMap::new(),
            dedupe_window,
        }
    }

    fn cell(&self, portfolio_id: &str) -> Arc<PortfolioCell> {
        if let Some(cell) = self.portfolios.get(portfolio_id) {
            return cell.clone();
        }
        self.portfolios
            .entry(portfolio_id.to_string())
            .or_insert_with(|| Arc::new(PortfolioCell::new(portfolio_id)))
            .clone()
    }

    /// Fold a score into its entity and portfolio. Results older than the
    /// entity's latest applied result are ignored.
    ///
    /// The entity entry stays locked until both portfolio cells are updated.
    pub fn apply_score(&self, result: &ScoreResult) -> ApplyOutcome {
        let mut entity = self
            .entities
            .entry(result.entity_id.clone())
            .or_insert_with(EntityState::new);

        if entity
            .last_scored_at
            .is_some_and(|applied| applied > result.scored_at)
        {
            debug!(entity_id = %result.entity_id, "Ignoring stale score result");
            return ApplyOutcome::Stale;
        }

        entity.last_scored_at = Some(result.scored_at);
        entity.snapshot.last_score = Some(result.score);

        let previous = entity.portfolio_id.clone();
        if let Some(portfolio_id) = &result.portfolio_id {
            entity.portfolio_id = Some(portfolio_id.clone());
        }

        let member = Member {
            score: result.score,
            tier: result.tier,
            scored_at: result.scored_at,
        };

        if let Some(previous) = previous.filter(|p| entity.portfolio_id.as_ref() != Some(p)) {
            let cell = self.portfolios.get(&previous).map(|c| c.clone());
            if let Some(cell) = cell {
                cell.update(|state| state.remove_member(&result.entity_id, result.scored_at));
            }
        }

        if let Some(portfolio_id) = &entity.portfolio_id {
            self.cell(portfolio_id)
                .update(|state| state.upsert_member(&result.entity_id, member));
        }

        ApplyOutcome::Applied
    }

    /// Fold an event into its entity's signals and its portfolio's counters.
    /// A repeated (entity id, event id) pair is a no-op.
    pub fn apply_event(&self, event: &RiskEvent) -> EventOutcome {
        let portfolio = {
            let mut entity = self
                .entities
                .entry(event.entity_id.clone())
                .or_insert_with(EntityState::new);

            if !entity.first_seen(&event.event_id, self.dedupe_window) {
                return EventOutcome::Duplicate;
            }

            entity.snapshot.event_count += 1;
            entity.snapshot.severity_total += event.severity();
            let at = event.occurred_at.unwrap_or(event.ingested_at);
            if entity.snapshot.last_event_at.map_or(true, |last| at > last) {
                entity.snapshot.last_event_at = Some(at);
            }
            if entity.portfolio_id.is_none() {
                entity.portfolio_id = event.portfolio_id.clone();
            }
            event
                .portfolio_id
                .clone()
                .or_else(|| entity.portfolio_id.clone())
        };

        if let Some(portfolio_id) = portfolio {
            self.cell(&portfolio_id)
                .update(|state| state.record_event(&event.event_type));
        }

        EventOutcome::Applied
    }

    /// Latest fully-applied summary for a portfolio
    pub fn get_summary(&self, portfolio_id: &str) -> Result<Arc<PortfolioSummary>, AggregatorError> {
        self.portfolios
            .get(portfolio_id)
            .map(|cell| cell.snapshot())
            .ok_or_else(|| AggregatorError::UnknownPortfolio(portfolio_id.to_string()))
    }

    pub fn entity_snapshot(&self, entity_id: &str) -> Option<EntitySnapshot> {
        self.entities.get(entity_id).map(|e| e.snapshot.clone())
    }

    pub fn portfolio_count(&self) -> usize {
        self.portfolios.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl Default for PortfolioAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::EntityKind;
    use chrono::Duration;
    use serde_json::Map;

    fn result(entity: &str, portfolio: Option<&str>, score: f64, tier: RiskTier, at: DateTime<Utc>) -> ScoreResult {
        ScoreResult {
            score_id: format!("{}-{}", entity, at.timestamp_nanos_opt().unwrap_or_default()),
            entity_id: entity.to_string(),
            entity_kind: EntityKind::Company,
            portfolio_id: portfolio.map(str::to_string),
            score,
            tier,
            model_version: "test".to_string(),
            factors: vec![],
            scored_at: at,
        }
    }

    fn event(event_id: &str, entity: &str, portfolio: Option<&str>) -> RiskEvent {
        RiskEvent {
            event_id: event_id.to_string(),
            entity_id: entity.to_string(),
            event_type: "incident".to_string(),
            portfolio_id: portfolio.map(str::to_string),
            payload: Map::new(),
            occurred_at: None,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_aggregates() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("p"), 0.2, RiskTier::Low, now));
        aggregator.apply_score(&result("b", Some("p"), 0.5, RiskTier::Medium, now));
        aggregator.apply_score(&result("c", Some("p"), 0.8, RiskTier::High, now));

        let summary = aggregator.get_summary("p").unwrap();
        assert_eq!(summary.entity_count, 3);
        assert!((summary.mean_score - 0.5).abs() < 1e-9);
        assert_eq!(summary.max_score, 0.8);
        assert_eq!(summary.tier_distribution[&RiskTier::Low], 1);
        assert_eq!(summary.tier_distribution[&RiskTier::Medium], 1);
        assert_eq!(summary.tier_distribution[&RiskTier::High], 1);
        assert_eq!(summary.tier_distribution[&RiskTier::Critical], 0);
    }

    #[test]
    fn test_rescore_replaces_previous_contribution() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("p"), 0.9, RiskTier::Critical, now));
        aggregator.apply_score(&result("b", Some("p"), 0.4, RiskTier::Medium, now));
        aggregator.apply_score(&result("a", Some("p"), 0.1, RiskTier::Low, now + Duration::seconds(1)));

        let summary = aggregator.get_summary("p").unwrap();
        assert_eq!(summary.entity_count, 2);
        assert_eq!(summary.max_score, 0.4);
        assert!((summary.mean_score - 0.25).abs() < 1e-9);
        assert_eq!(summary.tier_distribution[&RiskTier::Critical], 0);
        assert_eq!(summary.tier_distribution[&RiskTier::Low], 1);
    }

    #[test]
    fn test_stale_result_ignored() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("p"), 0.3, RiskTier::Medium, now));
        let outcome = aggregator.apply_score(&result("a", Some("p"), 0.95, RiskTier::Critical, now - Duration::seconds(5)));

        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(aggregator.get_summary("p").unwrap().max_score, 0.3);
        assert_eq!(aggregator.entity_snapshot("a").unwrap().last_score, Some(0.3));
    }

    #[test]
    fn test_entity_moves_between_portfolios() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("old"), 0.6, RiskTier::Medium, now));
        aggregator.apply_score(&result("a", Some("new"), 0.7, RiskTier::High, now + Duration::seconds(1)));

        assert_eq!(aggregator.get_summary("old").unwrap().entity_count, 0);
        assert_eq!(aggregator.get_summary("old").unwrap().max_score, 0.0);
        assert_eq!(aggregator.get_summary("new").unwrap().entity_count, 1);
    }

    #[test]
    fn test_unscoped_rescore_keeps_membership() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("p"), 0.6, RiskTier::Medium, now));
        aggregator.apply_score(&result("a", None, 0.2, RiskTier::Low, now + Duration::seconds(1)));

        let summary = aggregator.get_summary("p").unwrap();
        assert_eq!(summary.entity_count, 1);
        assert_eq!(summary.max_score, 0.2);
    }

    #[test]
    fn test_duplicate_event_applied_once() {
        let aggregator = PortfolioAggregator::new();
        let evt = event("evt-1", "a", Some("p"));

        assert_eq!(aggregator.apply_event(&evt), EventOutcome::Applied);
        let once = aggregator.get_summary("p").unwrap();
        let snapshot_once = aggregator.entity_snapshot("a").unwrap();

        assert_eq!(aggregator.apply_event(&evt), EventOutcome::Duplicate);
        let twice = aggregator.get_summary("p").unwrap();

        assert_eq!(*once, *twice);
        assert_eq!(once.event_count, 1);
        assert_eq!(aggregator.entity_snapshot("a").unwrap(), snapshot_once);
    }

    #[test]
    fn test_same_event_id_on_other_entity_is_distinct() {
        let aggregator = PortfolioAggregator::new();

        aggregator.apply_event(&event("evt-1", "a", Some("p")));
        assert_eq!(
            aggregator.apply_event(&event("evt-1", "b", Some("p"))),
            EventOutcome::Applied
        );
        assert_eq!(aggregator.get_summary("p").unwrap().event_count, 2);
    }

    #[test]
    fn test_event_uses_entity_membership() {
        let aggregator = PortfolioAggregator::new();
        aggregator.apply_score(&result("a", Some("p"), 0.5, RiskTier::Medium, Utc::now()));
        aggregator.apply_event(&event("evt-1", "a", None));

        let summary = aggregator.get_summary("p").unwrap();
        assert_eq!(summary.event_count, 1);
        assert_eq!(summary.events_by_type["incident"], 1);

        let snapshot = aggregator.entity_snapshot("a").unwrap();
        assert_eq!(snapshot.event_count, 1);
        assert_eq!(snapshot.severity_total, 1.0);
    }

    #[test]
    fn test_scored_entities_carry_no_dedupe_state() {
        let aggregator = PortfolioAggregator::new();
        aggregator.apply_score(&result("a", Some("p"), 0.5, RiskTier::Medium, Utc::now()));
        assert!(aggregator.entities.get("a").unwrap().seen_events.is_none());

        aggregator.apply_event(&event("evt-1", "a", None));
        let entity = aggregator.entities.get("a").unwrap();
        assert_eq!(entity.seen_events.as_ref().map(DedupeWindow::len), Some(1));
    }

    #[test]
    fn test_concurrent_moves_keep_single_membership() {
        let now = Utc::now();
        for round in 0..200 {
            let aggregator = PortfolioAggregator::new();
            let entity = format!("e{}", round);
            let first = result(&entity, Some("A"), 0.4, RiskTier::Medium, now);
            let second = result(&entity, Some("B"), 0.8, RiskTier::High, now + Duration::seconds(1));

            std::thread::scope(|scope| {
                scope.spawn(|| aggregator.apply_score(&first));
                scope.spawn(|| aggregator.apply_score(&second));
            });

            let count = |p: &str| aggregator.get_summary(p).map_or(0, |s| s.entity_count);
            assert_eq!(count("A") + count("B"), 1, "round {}", round);
            assert_eq!(count("B"), 1, "round {}", round);
            assert_eq!(aggregator.get_summary("B").unwrap().max_score, 0.8);
        }
    }

    #[test]
    fn test_equal_timestamp_result_is_applied() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        aggregator.apply_score(&result("a", Some("p"), 0.3, RiskTier::Medium, now));
        let outcome = aggregator.apply_score(&result("a", Some("p"), 0.6, RiskTier::Medium, now));

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(aggregator.get_summary("p").unwrap().max_score, 0.6);
    }

    #[test]
    fn test_unknown_portfolio() {
        let aggregator = PortfolioAggregator::new();
        assert_eq!(
            aggregator.get_summary("nope").unwrap_err(),
            AggregatorError::UnknownPortfolio("nope".to_string())
        );
    }

    #[test]
    fn test_concurrent_updates_across_portfolios() {
        let aggregator = PortfolioAggregator::new();
        let now = Utc::now();

        std::thread::scope(|scope| {
            for p in 0..4 {
                let aggregator = &aggregator;
                scope.spawn(move || {
                    for e in 0..250 {
                        let entity = format!("p{}-e{}", p, e);
                        let portfolio = format!("p{}", p);
                        aggregator.apply_score(&result(&entity, Some(&portfolio), 0.5, RiskTier::Medium, now));
                        aggregator.apply_event(&event("evt", &entity, Some(&portfolio)));
                        aggregator.apply_event(&event("evt", &entity, Some(&portfolio)));
                    }
                });
            }
        });

        for p in 0..4 {
            let summary = aggregator.get_summary(&format!("p{}", p)).unwrap();
            assert_eq!(summary.entity_count, 250);
            assert_eq!(summary.event_count, 250);
            assert_eq!(summary.tier_distribution[&RiskTier::Medium], 250);
        }
        assert_eq!(aggregator.entity_count(), 1000);
    }
}
