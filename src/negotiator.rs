//! Transfer negotiation state machines.
//!
//! [`OfferBook`] is the sender side: it fans an offer out to every newly
//! seen peer, commits to the first acceptance, and withdraws everything
//! else. [`OfferLedger`] is the receiver side: auto-accept in receive mode,
//! auto-cancel in send-only mode. Both are pure state: callers feed them
//! relay messages and send whatever messages they emit, which keeps every
//! race (duplicate accepts, late rejects) resolvable by plain membership
//! checks and makes the logic testable without a relay.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::protocol::{ClientInfo, RelayMessage, TransferAction};

/// Metadata describing the file attached to an offer.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
}

/// Outcome of feeding an action message to the [`OfferBook`].
#[derive(Debug)]
pub enum Acceptance {
    /// First valid acceptance: start this transfer and deliver the cancels.
    Committed {
        transfer_id: String,
        target_id: String,
        cancels: Vec<RelayMessage>,
    },
    /// Stale, duplicate, or irrelevant action; nothing to do.
    Ignored,
}

/// Sender-side negotiation state for a single run.
///
/// Invariants: each peer is offered at most once, every offer id maps to
/// exactly one target, and at most one transfer is ever committed.
pub struct OfferBook {
    self_id: String,
    file: FileMeta,
    contacted: HashSet<String>,
    /// Transfer id -> target peer, for offers an ACCEPT is still honorable for.
    valid_offers: HashMap<String, String>,
    /// One recorded cancellation per offer sent, delivered to losers on commit.
    cancellations: Vec<RelayMessage>,
    committed: Option<String>,
}

impl OfferBook {
    pub fn new(self_id: String, file: FileMeta) -> Self {
        Self {
            self_id,
            file,
            contacted: HashSet::new(),
            valid_offers: HashMap::new(),
            cancellations: Vec::new(),
            committed: None,
        }
    }

    pub fn transfer_in_progress(&self) -> bool {
        self.committed.is_some()
    }

    /// Handle a roster snapshot: offer the file to every peer not yet
    /// contacted. Once a transfer is committed, no further offers go out.
    pub fn on_roster(&mut self, clients: &[ClientInfo]) -> Vec<RelayMessage> {
        if self.committed.is_some() {
            return Vec::new();
        }

        let mut offers = Vec::new();
        for client in clients {
            if client.client_id == self.self_id || self.contacted.contains(&client.client_id) {
                continue;
            }

            let transfer_id = Uuid::new_v4().to_string();
            offers.push(RelayMessage::Transfer {
                transfer_id: transfer_id.clone(),
                file_name: self.file.file_name.clone(),
                file_size: self.file.file_size,
                file_type: self.file.file_type.clone(),
                target_id: client.client_id.clone(),
                client_id: None,
            });
            self.cancellations.push(RelayMessage::Action {
                transfer_id: transfer_id.clone(),
                action: TransferAction::Cancel,
                target_id: client.client_id.clone(),
                client_id: None,
            });
            self.valid_offers.insert(transfer_id, client.client_id.clone());
            self.contacted.insert(client.client_id.clone());
        }
        offers
    }

    /// Handle an accept/reject for one of our offers. The first acceptance
    /// whose id is still honorable wins; everything else is ignored.
    pub fn on_action(&mut self, transfer_id: &str, action: TransferAction) -> Acceptance {
        match action {
            TransferAction::Accept => {
                if self.committed.is_some() {
                    return Acceptance::Ignored;
                }
                let Some(target_id) = self.valid_offers.remove(transfer_id) else {
                    return Acceptance::Ignored;
                };

                self.committed = Some(transfer_id.to_string());
                self.valid_offers.clear();

                // Withdraw every losing offer; each cancellation was recorded
                // exactly once when its offer went out, so draining the list
                // here delivers each exactly once.
                let cancels = std::mem::take(&mut self.cancellations)
                    .into_iter()
                    .filter(|msg| !matches!(msg, RelayMessage::Action { transfer_id: id, .. } if id == transfer_id))
                    .collect();

                Acceptance::Committed {
                    transfer_id: transfer_id.to_string(),
                    target_id,
                    cancels,
                }
            }
            TransferAction::Reject => {
                self.valid_offers.remove(transfer_id);
                Acceptance::Ignored
            }
            // Peers do not cancel our offers in this protocol.
            TransferAction::Cancel => Acceptance::Ignored,
        }
    }
}

/// An inbound offer remembered until its connection descriptor arrives.
#[derive(Debug, Clone)]
pub struct InboundOffer {
    pub file: FileMeta,
    pub from: String,
}

/// Receiver-side offer policy: remember and accept everything in receive
/// mode, cancel everything in send-only mode.
pub struct OfferLedger {
    accept_inbound: bool,
    offers: HashMap<String, InboundOffer>,
}

impl OfferLedger {
    pub fn new(accept_inbound: bool) -> Self {
        Self {
            accept_inbound,
            offers: HashMap::new(),
        }
    }

    /// Handle an incoming offer, returning the action message to send back.
    pub fn on_offer(&mut self, transfer_id: &str, file: FileMeta, from: &str) -> RelayMessage {
        let action = if self.accept_inbound {
            self.offers.insert(
                transfer_id.to_string(),
                InboundOffer {
                    file,
                    from: from.to_string(),
                },
            );
            TransferAction::Accept
        } else {
            TransferAction::Cancel
        };

        RelayMessage::Action {
            transfer_id: transfer_id.to_string(),
            action,
            target_id: from.to_string(),
            client_id: None,
        }
    }

    pub fn get(&self, transfer_id: &str) -> Option<&InboundOffer> {
        self.offers.get(transfer_id)
    }

    /// Forget an offer (withdrawn by the sender or reached a terminal state).
    pub fn discard(&mut self, transfer_id: &str) -> Option<InboundOffer> {
        self.offers.remove(transfer_id)
    }
}
