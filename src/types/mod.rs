//! Type definitions for the risk scoring service

pub mod event;
pub mod portfolio;
pub mod request;
pub mod score;

pub use event::RiskEvent;
pub use portfolio::{EntitySnapshot, PortfolioSummary};
pub use request::{AttributeValue, EntityKind, ScoreRequest};
pub use score::{RiskTier, ScoreResult, TierThresholds};
