// Restart-vote consensus for one round.
//
// A `VoteRound` collects one ballot per connection. Once `QUORUM` ballots
// are in, the round is decided: YES only if every ballot was YES, NO
// otherwise (a 1/1 split ends the pairing). Deciding clears the round so
// the next game starts from {0, 0}. A connection that leaves takes its
// ballot with it, so the tally only ever counts players still connected.
//
// This module is pure bookkeeping. `Session::record_vote` owns the
// broadcasts that go with each outcome.

use std::collections::BTreeMap;

use connect4_protocol::{Vote, VoteTally};

use crate::session::ConnectionId;

/// Ballots needed to decide a round. Fixed at the session capacity: if a
/// player leaves before voting, the round never decides.
pub const QUORUM: u32 = 2;

/// What happened to a single ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counted; still waiting for more ballots.
    Pending(VoteTally),
    /// This connection already voted this round; nothing changed.
    Duplicate(VoteTally),
    /// The ballot completed the round. `tally` is the final count before the
    /// round was cleared.
    Decided { tally: VoteTally, result: Vote },
}

#[derive(Debug, Default)]
pub struct VoteRound {
    tally: VoteTally,
    ballots: BTreeMap<ConnectionId, Vote>,
}

impl VoteRound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> VoteTally {
        self.tally
    }

    /// Record `vote` from `voter`.
    pub fn cast(&mut self, voter: ConnectionId, vote: Vote) -> VoteOutcome {
        if self.ballots.contains_key(&voter) {
            return VoteOutcome::Duplicate(self.tally);
        }
        self.ballots.insert(voter, vote);
        self.tally.record(vote);

        if self.tally.total() < QUORUM {
            return VoteOutcome::Pending(self.tally);
        }

        let tally = self.tally;
        let result = if tally.yes == QUORUM { Vote::Yes } else { Vote::No };
        self.clear();
        VoteOutcome::Decided { tally, result }
    }

    /// Remove the ballot cast by `voter`, if any. Returns the withdrawn
    /// vote.
    pub fn withdraw(&mut self, voter: ConnectionId) -> Option<Vote> {
        let vote = self.ballots.remove(&voter)?;
        self.tally.retract(vote);
        Some(vote)
    }

    /// Start a fresh round.
    pub fn clear(&mut self) {
        self.tally = VoteTally::default();
        self.ballots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    #[test]
    fn first_ballot_is_pending() {
        let mut round = VoteRound::new();
        assert_eq!(
            round.cast(A, Vote::Yes),
            VoteOutcome::Pending(VoteTally { yes: 1, no: 0 })
        );
    }

    #[test]
    fn unanimous_yes_restarts() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::Yes);
        assert_eq!(
            round.cast(B, Vote::Yes),
            VoteOutcome::Decided {
                tally: VoteTally { yes: 2, no: 0 },
                result: Vote::Yes,
            }
        );
        assert_eq!(round.tally(), VoteTally::default());
    }

    #[test]
    fn split_vote_ends_the_pairing() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::Yes);
        assert_eq!(
            round.cast(B, Vote::No),
            VoteOutcome::Decided {
                tally: VoteTally { yes: 1, no: 1 },
                result: Vote::No,
            }
        );

        let mut round = VoteRound::new();
        round.cast(A, Vote::No);
        assert!(matches!(
            round.cast(B, Vote::Yes),
            VoteOutcome::Decided {
                result: Vote::No,
                ..
            }
        ));
    }

    #[test]
    fn double_no_ends_the_pairing() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::No);
        assert!(matches!(
            round.cast(B, Vote::No),
            VoteOutcome::Decided {
                tally: VoteTally { yes: 0, no: 2 },
                result: Vote::No,
            }
        ));
    }

    #[test]
    fn second_ballot_from_same_connection_is_ignored() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::Yes);
        assert_eq!(
            round.cast(A, Vote::No),
            VoteOutcome::Duplicate(VoteTally { yes: 1, no: 0 })
        );
        assert_eq!(round.tally(), VoteTally { yes: 1, no: 0 });
    }

    #[test]
    fn decided_round_accepts_fresh_ballots() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::Yes);
        round.cast(B, Vote::Yes);
        assert_eq!(
            round.cast(A, Vote::No),
            VoteOutcome::Pending(VoteTally { yes: 0, no: 1 })
        );
    }

    #[test]
    fn withdrawn_ballot_leaves_the_tally() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::Yes);
        assert_eq!(round.withdraw(A), Some(Vote::Yes));
        assert_eq!(round.tally(), VoteTally::default());
        assert_eq!(round.withdraw(A), None);

        // A later pair of ballots still needs both players.
        assert_eq!(
            round.cast(B, Vote::Yes),
            VoteOutcome::Pending(VoteTally { yes: 1, no: 0 })
        );
    }

    #[test]
    fn withdrawing_a_non_voter_changes_nothing() {
        let mut round = VoteRound::new();
        round.cast(A, Vote::No);
        assert_eq!(round.withdraw(B), None);
        assert_eq!(round.tally(), VoteTally { yes: 0, no: 1 });
    }
}
