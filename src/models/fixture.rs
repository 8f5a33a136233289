use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type FixtureId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Outcome {
    Home,
    Away,
    Draw,
}

/// A scheduled match. Written by the sync collaborator, read by settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: FixtureId,
    pub external_id: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: DateTime<Utc>,
    /// Provider status code, e.g. "NS", "1H", "FT"
    pub status: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

/// Result row returned by a fixture source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureResult {
    pub external_id: String,
    pub status: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

impl Fixture {
    pub fn new(
        external_id: &str,
        home_team: &str,
        away_team: &str,
        kickoff: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            kickoff,
            status: "NS".to_string(),
            home_score: None,
            away_score: None,
        }
    }

    pub fn is_finished(&self, finished_statuses: &[String]) -> bool {
        finished_statuses.iter().any(|s| *s == self.status)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.kickoff <= now
    }

    pub fn outcome(&self) -> Option<Outcome> {
        let (home, away) = (self.home_score?, self.away_score?);
        Some(match home.cmp(&away) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Less => Outcome::Away,
            std::cmp::Ordering::Equal => Outcome::Draw,
        })
    }

    /// Exact-score comparison; `None` until both final scores are known.
    pub fn matches_guess(&self, home_guess: u32, away_guess: u32) -> Option<bool> {
        let (home, away) = (self.home_score?, self.away_score?);
        Some(home == home_guess && away == away_guess)
    }

    pub fn apply_result(&mut self, result: &FixtureResult) {
        self.status = result.status.clone();
        self.home_score = result.home_score;
        self.away_score = result.away_score;
    }
}
