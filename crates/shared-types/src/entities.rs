//! # Core Domain Entities
//!
//! Plain values produced by the matching, monitoring and fork-detection
//! services. They carry no behavior beyond (de)serialization.
//!
//! ## Wire Names
//!
//! Payload fields keep the names used by the existing producers
//! (`CorrelationID`, `TeamNames`, `BookmakerBundle`, ...) so that messages
//! written by other services decode without translation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlation identifier grouping events about one logical match or fork.
pub type CorrelationId = i64;

/// Bookmaker -> match page URL.
pub type BookmakerBundle = HashMap<Bookmaker, String>;

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// Esports discipline a match belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SportType {
    #[serde(rename = "counter-strike")]
    CounterStrike,
    #[serde(rename = "dota2")]
    Dota2,
    #[serde(rename = "league-of-legends")]
    LeagueOfLegends,
    #[serde(rename = "valorant")]
    Valorant,
    #[serde(rename = "rainbow-six")]
    RainbowSix,
}

/// Bookmakers the pipeline scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bookmaker {
    #[serde(rename = "parivision")]
    Parivision,
    #[serde(rename = "fonbet")]
    Fonbet,
    #[serde(rename = "olimp-bet")]
    OlimpBet,
    #[serde(rename = "bet-boom")]
    BetBoom,
    #[serde(rename = "winline")]
    Winline,
}

impl Bookmaker {
    /// All known bookmakers.
    pub const ALL: [Bookmaker; 5] = [
        Bookmaker::Parivision,
        Bookmaker::Fonbet,
        Bookmaker::OlimpBet,
        Bookmaker::BetBoom,
        Bookmaker::Winline,
    ];
}

/// Betting market a quoted price belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "match-winner")]
    MatchWinner,
    #[serde(rename = "total-maps")]
    TotalMaps,
    #[serde(rename = "main-handicap")]
    MainHandicap,
    #[serde(rename = "main-total")]
    MainTotal,
    #[serde(rename = "painting")]
    Painting,
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// A two-sided price on one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bet {
    pub bet_market: MarketType,
    pub less: f64,
    pub more: f64,
}

/// The same match identified across several bookmakers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchBundle {
    #[serde(rename = "CorrelationID")]
    pub correlation_id: CorrelationId,
    pub team_names: Vec<String>,
    pub bookmaker_bundle: BookmakerBundle,
}

/// A snapshot of the odds currently quoted for a bundled match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchMonitoring {
    #[serde(rename = "CorrelationID")]
    pub correlation_id: CorrelationId,
    pub sport_type: SportType,
    pub team_names: Vec<String>,
    pub bookmaker_bundle: BookmakerBundle,
    pub bets: HashMap<Bookmaker, Bet>,
    pub timestamp: DateTime<Utc>,
}

/// An arbitrage opportunity detected across bookmakers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fork {
    #[serde(rename = "CorrelationID")]
    pub correlation_id: CorrelationId,
    pub team_names: Vec<String>,
    pub bookmaker_bundle: BookmakerBundle,
    pub timestamp: DateTime<Utc>,
}
