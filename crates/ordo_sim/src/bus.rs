//! In-process message bus between simulated ranks.
//!
//! Every rank owns an [`Endpoint`] holding a sender to every rank and its
//! own inbox. A send is stamped with a delivery time of now plus a seeded
//! random jitter; the receiver holds packets back until that time. Delivery
//! times on a link never decrease, so each link stays FIFO while links
//! reorder freely against each other.

use crate::seed::SimSeed;
use bytes::Bytes;
use ordo_core::{Rank, SharedClock, Timestamp};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

/// Bus message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask every peer to vote on a proposal
    Propose {
        /// Originating rank
        origin: Rank,
        /// Originator-local ballot number
        ballot: u64,
        /// Proposal envelope
        envelope: Bytes,
    },
    /// One peer's vote, sent back to the originator
    Vote {
        /// Voting rank
        voter: Rank,
        /// Ballot voted on
        ballot: u64,
        /// Yes or no
        yes: bool,
    },
    /// Outcome of a ballot, with the envelope so peers keep no ballot state
    Decision {
        /// Originating rank
        origin: Rank,
        /// Decided ballot
        ballot: u64,
        /// Whether every vote was yes
        approved: bool,
        /// Proposal envelope
        envelope: Bytes,
    },
    /// Unconditional dissemination
    Broadcast {
        /// Originating rank
        origin: Rank,
        /// Proposal envelope
        envelope: Bytes,
    },
}

/// Jitter applied to outgoing packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jitter {
    /// Maximum added delay in microseconds
    pub max_us: u64,
}

impl Jitter {
    /// No delay
    #[must_use]
    pub const fn none() -> Self {
        Self { max_us: 0 }
    }

    /// Uniform delay in `0..=max_us`
    #[must_use]
    pub const fn up_to(max_us: u64) -> Self {
        Self { max_us }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> u64 {
        if self.max_us == 0 {
            0
        } else {
            rng.gen_range(0..=self.max_us)
        }
    }
}

#[derive(Debug)]
struct Packet {
    from: Rank,
    deliver_at: Timestamp,
    message: Message,
}

/// One rank's connection to the bus
pub struct Endpoint {
    rank: Rank,
    peers: Vec<UnboundedSender<Packet>>,
    inbox: UnboundedReceiver<Packet>,
    held: Vec<Packet>,
    last_deliver: Vec<Timestamp>,
    jitter: Jitter,
    rng: ChaCha8Rng,
    clock: SharedClock,
}

/// Connect `world_size` ranks, returning their endpoints in rank order
#[must_use]
pub fn connect(world_size: usize, clock: SharedClock, seed: &SimSeed, jitter: Jitter) -> Vec<Endpoint> {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..world_size).map(|_| mpsc::unbounded_channel()).unzip();

    Rank::all(world_size)
        .zip(receivers)
        .map(|(rank, inbox)| Endpoint {
            rank,
            peers: senders.clone(),
            inbox,
            held: Vec::new(),
            last_deliver: vec![Timestamp::zero(); world_size],
            jitter,
            rng: seed.for_rank(rank).into_rng(),
            clock: clock.clone(),
        })
        .collect()
}

impl Endpoint {
    /// Rank owning this endpoint
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks on the bus
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.peers.len()
    }

    /// Send to one rank
    ///
    /// Sends to ranks that already left the bus are dropped.
    pub fn send(&mut self, to: Rank, message: Message) {
        let slot = to.as_usize();
        let Some(sender) = self.peers.get(slot) else {
            tracing::warn!(rank = %self.rank, to = %to, "send to rank outside the bus");
            return;
        };

        let delay = self.jitter.sample(&mut self.rng);
        let deliver_at = self.clock.now().saturating_add_micros(delay).max(self.last_deliver[slot]);
        self.last_deliver[slot] = deliver_at;

        let packet = Packet {
            from: self.rank,
            deliver_at,
            message,
        };
        if sender.send(packet).is_err() {
            tracing::debug!(rank = %self.rank, to = %to, "peer left the bus, dropping message");
        }
    }

    /// Send to every other rank
    pub fn broadcast(&mut self, message: Message) {
        for to in Rank::all(self.world_size()) {
            if to != self.rank {
                self.send(to, message.clone());
            }
        }
    }

    /// Pull every packet whose delivery time has passed, in arrival order
    pub fn poll(&mut self) -> Vec<(Rank, Message)> {
        loop {
            match self.inbox.try_recv() {
                Ok(packet) => self.held.push(packet),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if self.held.is_empty() {
            return Vec::new();
        }

        let now = self.clock.now();
        let (due, later): (Vec<Packet>, Vec<Packet>) =
            self.held.drain(..).partition(|packet| packet.deliver_at <= now);
        self.held = later;
        due.into_iter().map(|packet| (packet.from, packet.message)).collect()
    }

    /// Packets received but not yet due
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::ManualClock;
    use proptest::prelude::*;

    fn broadcast(origin: u32, tag: u8) -> Message {
        Message::Broadcast {
            origin: Rank::new(origin),
            envelope: Bytes::from(vec![tag]),
        }
    }

    #[test]
    fn test_send_and_poll() {
        let clock = ManualClock::new(Timestamp::from_micros(100));
        let mut endpoints = connect(2, clock.shared(), &SimSeed::default(), Jitter::none());
        let mut b = endpoints.pop().unwrap();
        let mut a = endpoints.pop().unwrap();

        a.send(Rank::new(1), broadcast(0, 1));
        let received = b.poll();
        assert_eq!(received, vec![(Rank::new(0), broadcast(0, 1))]);
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_broadcast_skips_self() {
        let clock = ManualClock::new(Timestamp::zero());
        let mut endpoints = connect(3, clock.shared(), &SimSeed::default(), Jitter::none());
        endpoints[1].broadcast(broadcast(1, 7));

        assert_eq!(endpoints[0].poll().len(), 1);
        assert!(endpoints[1].poll().is_empty());
        assert_eq!(endpoints[2].poll().len(), 1);
    }

    #[test]
    fn test_jitter_holds_until_due() {
        let clock = ManualClock::new(Timestamp::zero());
        let mut endpoints = connect(2, clock.shared(), &SimSeed::default(), Jitter::up_to(1_000));
        for tag in 0..20 {
            endpoints[0].send(Rank::new(1), broadcast(0, tag));
        }

        let mut received = endpoints[1].poll();
        clock.advance(1_000);
        received.extend(endpoints[1].poll());
        assert_eq!(endpoints[1].in_flight(), 0);

        let tags: Vec<u8> = received
            .into_iter()
            .map(|(_, message)| match message {
                Message::Broadcast { envelope, .. } => envelope[0],
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(tags, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_same_seed_same_delays() {
        let delays = |seed: u64| {
            let clock = ManualClock::new(Timestamp::zero());
            let mut endpoints = connect(2, clock.shared(), &SimSeed::from_literal(seed), Jitter::up_to(500));
            for tag in 0..8 {
                endpoints[0].send(Rank::new(1), broadcast(0, tag));
            }
            endpoints[1].poll();
            let mut stamps: Vec<u64> = endpoints[1].held.iter().map(|p| p.deliver_at.as_micros()).collect();
            stamps.sort_unstable();
            stamps
        };
        assert_eq!(delays(7), delays(7));
    }

    #[test]
    fn test_send_to_departed_rank_is_dropped() {
        let clock = ManualClock::new(Timestamp::zero());
        let mut endpoints = connect(2, clock.shared(), &SimSeed::default(), Jitter::none());
        drop(endpoints.pop());
        endpoints[0].send(Rank::new(1), broadcast(0, 1));
        endpoints[0].broadcast(broadcast(0, 2));
    }

    proptest! {
        #[test]
        fn prop_links_stay_fifo_within_jitter(
            seed in any::<u64>(),
            max_us in 0u64..5_000,
            sends in proptest::collection::vec((0u32..3, 0u64..2_000), 1..60)
        ) {
            let clock = ManualClock::new(Timestamp::zero());
            let mut endpoints = connect(4, clock.shared(), &SimSeed::from_literal(seed), Jitter::up_to(max_us));
            let mut latest = Timestamp::zero();
            for (seq, (origin, gap)) in sends.iter().enumerate() {
                clock.advance(*gap);
                latest = clock.peek();
                endpoints[*origin as usize].send(Rank::new(3), broadcast(*origin, seq as u8));
            }

            let mut received = endpoints[3].poll();
            clock.set(latest.saturating_add_micros(max_us));
            received.extend(endpoints[3].poll());
            prop_assert_eq!(received.len(), sends.len());
            prop_assert_eq!(endpoints[3].in_flight(), 0);

            for origin in 0..3u32 {
                let arrived: Vec<u8> = received
                    .iter()
                    .filter(|(from, _)| *from == Rank::new(origin))
                    .map(|(_, message)| match message {
                        Message::Broadcast { envelope, .. } => envelope[0],
                        other => panic!("unexpected {:?}", other),
                    })
                    .collect();
                let sent: Vec<u8> = sends
                    .iter()
                    .enumerate()
                    .filter(|(_, (o, _))| *o == origin)
                    .map(|(seq, _)| seq as u8)
                    .collect();
                prop_assert_eq!(arrived, sent);
            }
        }
    }
}
