use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::fixture::{Fixture, FixtureId};
use super::pool::PoolId;

pub type TicketId = Uuid;

/// Predicted final score for one fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guess {
    pub fixture_id: FixtureId,
    pub home_guess: u32,
    pub away_guess: u32,
}

/// Raw guess as submitted; validated before it becomes a [`Guess`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessInput {
    pub fixture_id: FixtureId,
    pub home_guess: i64,
    pub away_guess: i64,
}

impl Guess {
    pub fn correct(&self, fixture: &Fixture) -> Option<bool> {
        fixture.matches_guess(self.home_guess, self.away_guess)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub pool_id: PoolId,
    pub owner: AccountId,
    pub guesses: Vec<Guess>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// True only when every guess is known to be correct.
    /// An unfinished or missing fixture never counts as a hit.
    pub fn won(&self, fixtures: &HashMap<FixtureId, Fixture>) -> bool {
        !self.guesses.is_empty()
            && self.guesses.iter().all(|guess| {
                fixtures
                    .get(&guess.fixture_id)
                    .and_then(|fixture| guess.correct(fixture))
                    == Some(true)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixture::FixtureResult;

    fn fixture(score: Option<(u32, u32)>) -> Fixture {
        let mut fixture = Fixture::new("77", "Time A", "Time B", Utc::now());
        if let Some((home, away)) = score {
            fixture.apply_result(&FixtureResult {
                external_id: "77".to_string(),
                status: "FT".to_string(),
                home_score: Some(home),
                away_score: Some(away),
            });
        }
        fixture
    }

    fn ticket(guesses: Vec<Guess>) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            pool_id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            guesses,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ticket_won_requires_all_correct() {
        let f1 = fixture(Some((1, 0)));
        let f2 = fixture(Some((2, 1)));
        let fixtures: HashMap<_, _> = [(f1.id, f1.clone()), (f2.id, f2.clone())].into_iter().collect();

        let winner = ticket(vec![
            Guess { fixture_id: f1.id, home_guess: 1, away_guess: 0 },
            Guess { fixture_id: f2.id, home_guess: 2, away_guess: 1 },
        ]);
        let loser = ticket(vec![
            Guess { fixture_id: f1.id, home_guess: 1, away_guess: 0 },
            Guess { fixture_id: f2.id, home_guess: 1, away_guess: 1 },
        ]);

        assert!(winner.won(&fixtures));
        assert!(!loser.won(&fixtures));
    }

    #[test]
    fn test_unfinished_fixture_never_wins() {
        let f1 = fixture(None);
        let fixtures: HashMap<_, _> = [(f1.id, f1.clone())].into_iter().collect();
        let t = ticket(vec![Guess { fixture_id: f1.id, home_guess: 0, away_guess: 0 }]);

        assert_eq!(t.guesses[0].correct(&f1), None);
        assert!(!t.won(&fixtures));
    }

    #[test]
    fn test_empty_ticket_never_wins() {
        assert!(!ticket(vec![]).won(&HashMap::new()));
    }
}
