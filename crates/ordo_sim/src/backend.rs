//! Unanimous-vote backend over the simulated bus.
//!
//! The originator sends its envelope to every peer, each peer judges it
//! once and votes back, and once all `world_size - 1` votes are in the
//! originator broadcasts the decision together with the envelope. Peers
//! surface approved decisions and raw broadcasts through
//! `checkout_approved`. A rank's own proposal never comes back through its
//! own checkout.

use crate::bus::{Endpoint, Message};
use bytes::Bytes;
use ordo_coordinator::{Judge, Mode, VoteStatus, VotingBackend, VotingError};
use ordo_core::{ProposalId, Rank};
use ordo_proposal::{Proposal, WireDecode};
use std::collections::VecDeque;

/// Bus hops between a submission and its arrival in every peer's checkout.
///
/// A voted proposal travels Propose, Vote, Decision; a broadcast travels once.
#[must_use]
pub const fn delivery_hops(mode: Mode) -> u64 {
    match mode {
        Mode::Voted => 3,
        Mode::Broadcast => 1,
    }
}

struct Ballot {
    id: ProposalId,
    number: u64,
    envelope: Bytes,
    yes: usize,
    no: usize,
    status: VoteStatus,
}

/// Voting backend for one simulated rank
pub struct BusBackend<J> {
    endpoint: Endpoint,
    judge: J,
    next_ballot: u64,
    mine: Option<Ballot>,
    approved: VecDeque<Bytes>,
    finalized: bool,
}

impl<J: Judge> BusBackend<J> {
    /// Attach a backend to a bus endpoint
    #[must_use]
    pub fn new(endpoint: Endpoint, judge: J) -> Self {
        Self {
            endpoint,
            judge,
            next_ballot: 0,
            mine: None,
            approved: VecDeque::new(),
            finalized: false,
        }
    }

    /// Rank owning this backend
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.endpoint.rank()
    }

    fn peers(&self) -> usize {
        self.endpoint.world_size().saturating_sub(1)
    }

    fn ensure_open(&self) -> Result<(), VotingError> {
        if self.finalized {
            Err(VotingError::Finalized)
        } else {
            Ok(())
        }
    }

    fn handle(&mut self, from: Rank, message: Message) {
        match message {
            Message::Propose { origin, ballot, envelope } => {
                let verdict = self.judge.judge(&envelope);
                tracing::debug!(rank = %self.rank(), origin = %origin, ballot, ?verdict, "voted");
                self.endpoint.send(
                    origin,
                    Message::Vote {
                        voter: self.rank(),
                        ballot,
                        yes: verdict.is_accept(),
                    },
                );
            }
            Message::Vote { voter, ballot, yes } => self.count_vote(voter, ballot, yes),
            Message::Decision { origin, ballot, approved, envelope } => {
                if approved {
                    self.surface(from, envelope);
                } else {
                    tracing::debug!(rank = %self.rank(), origin = %origin, ballot, "peer proposal denied");
                }
            }
            Message::Broadcast { envelope, .. } => self.surface(from, envelope),
        }
    }

    fn count_vote(&mut self, voter: Rank, ballot: u64, yes: bool) {
        let peers = self.peers();
        let Some(mine) = self.mine.as_mut().filter(|b| b.number == ballot) else {
            tracing::debug!(rank = %self.endpoint.rank(), voter = %voter, ballot, "vote for stale ballot");
            return;
        };
        if mine.status != VoteStatus::InProgress {
            return;
        }

        if yes {
            mine.yes += 1;
        } else {
            mine.no += 1;
        }
        if mine.yes + mine.no < peers {
            return;
        }

        let approved = mine.no == 0;
        mine.status = if approved {
            VoteStatus::Approved
        } else {
            VoteStatus::Denied
        };
        let decision = Message::Decision {
            origin: self.endpoint.rank(),
            ballot,
            approved,
            envelope: mine.envelope.clone(),
        };
        tracing::debug!(
            rank = %self.endpoint.rank(),
            id = %mine.id,
            ballot,
            yes = mine.yes,
            no = mine.no,
            "ballot decided"
        );
        self.endpoint.broadcast(decision);
    }

    fn surface(&mut self, from: Rank, envelope: Bytes) {
        if let Err(err) = Proposal::decode(&envelope) {
            tracing::warn!(rank = %self.rank(), from = %from, error = %err, "dropping malformed envelope");
            return;
        }
        self.approved.push_back(envelope);
    }
}

impl<J: Judge> VotingBackend for BusBackend<J> {
    fn make_progress(&mut self) -> Result<(), VotingError> {
        self.ensure_open()?;
        for (from, message) in self.endpoint.poll() {
            self.handle(from, message);
        }
        Ok(())
    }

    fn submit_for_voting(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError> {
        self.ensure_open()?;
        if let Some(outstanding) = self.mine.as_ref().filter(|b| b.status == VoteStatus::InProgress) {
            return Err(VotingError::Busy(outstanding.id));
        }

        self.next_ballot += 1;
        let number = self.next_ballot;
        let status = if self.peers() == 0 {
            VoteStatus::Approved
        } else {
            self.endpoint.broadcast(Message::Propose {
                origin: self.rank(),
                ballot: number,
                envelope: envelope.clone(),
            });
            VoteStatus::InProgress
        };

        self.mine = Some(Ballot {
            id,
            number,
            envelope,
            yes: 0,
            no: 0,
            status,
        });
        Ok(())
    }

    fn submit_broadcast(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError> {
        self.ensure_open()?;
        tracing::debug!(rank = %self.rank(), id = %id, "broadcast");
        let origin = self.rank();
        self.endpoint.broadcast(Message::Broadcast { origin, envelope });
        Ok(())
    }

    fn check_state(&mut self, id: ProposalId) -> Result<VoteStatus, VotingError> {
        Ok(self
            .mine
            .as_ref()
            .filter(|b| b.id == id)
            .map_or(VoteStatus::Unknown, |b| b.status))
    }

    fn checkout_approved(&mut self) -> Result<Option<Bytes>, VotingError> {
        Ok(self.approved.pop_front())
    }

    fn remove_my_proposal(&mut self) -> Result<(), VotingError> {
        self.mine = None;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), VotingError> {
        self.finalized = true;
        tracing::debug!(rank = %self.rank(), in_flight = self.endpoint.in_flight(), "backend finalized");
        Ok(())
    }
}
