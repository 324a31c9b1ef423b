use drop_rs::negotiator::{Acceptance, FileMeta, OfferBook, OfferLedger};
use drop_rs::protocol::{RelayMessage, TransferAction};

fn meta() -> FileMeta {
    FileMeta {
        file_name: "report.pdf".to_string(),
        file_size: 2048,
        file_type: "application/pdf".to_string(),
    }
}

fn roster(ids: &[&str]) -> Vec<drop_rs::protocol::ClientInfo> {
    ids.iter()
        .map(|id| drop_rs::protocol::ClientInfo {
            client_id: id.to_string(),
            client_name: None,
        })
        .collect()
}

/// Extract (transfer_id, target_id) pairs from outbound offer messages.
fn offered(messages: &[RelayMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .map(|msg| match msg {
            RelayMessage::Transfer {
                transfer_id,
                target_id,
                ..
            } => (transfer_id.clone(), target_id.clone()),
            other => panic!("expected transfer offer, got {other:?}"),
        })
        .collect()
}

#[test]
fn first_acceptance_wins_and_cancels_the_rest() {
    let mut book = OfferBook::new("a".to_string(), meta());

    let offers = offered(&book.on_roster(&roster(&["a", "b", "c"])));
    assert_eq!(offers.len(), 2, "one offer per peer, none to self");
    let (id_b, _) = offers.iter().find(|(_, t)| t == "b").unwrap().clone();
    let (id_c, _) = offers.iter().find(|(_, t)| t == "c").unwrap().clone();
    assert_ne!(id_b, id_c);

    let Acceptance::Committed {
        transfer_id,
        target_id,
        cancels,
    } = book.on_action(&id_c, TransferAction::Accept)
    else {
        panic!("first acceptance must commit");
    };
    assert_eq!(transfer_id, id_c);
    assert_eq!(target_id, "c");

    // exactly one cancellation, addressed to the losing peer
    assert_eq!(cancels.len(), 1);
    match &cancels[0] {
        RelayMessage::Action {
            transfer_id,
            action,
            target_id,
            ..
        } => {
            assert_eq!(transfer_id, &id_b);
            assert_eq!(target_id, "b");
            assert!(matches!(action, TransferAction::Cancel));
        }
        other => panic!("expected cancel action, got {other:?}"),
    }
}

#[test]
fn no_new_offers_after_commit() {
    let mut book = OfferBook::new("a".to_string(), meta());
    let offers = offered(&book.on_roster(&roster(&["a", "b"])));
    assert!(matches!(
        book.on_action(&offers[0].0, TransferAction::Accept),
        Acceptance::Committed { .. }
    ));

    // a newcomer joining later must not receive an offer
    assert!(book.on_roster(&roster(&["a", "b", "d"])).is_empty());
    assert!(book.transfer_in_progress());
}

#[test]
fn accept_after_reject_is_stale() {
    let mut book = OfferBook::new("a".to_string(), meta());
    let offers = offered(&book.on_roster(&roster(&["a", "b"])));
    let (id_b, _) = offers[0].clone();

    assert!(matches!(
        book.on_action(&id_b, TransferAction::Reject),
        Acceptance::Ignored
    ));
    // the rejected offer id can no longer commit
    assert!(matches!(
        book.on_action(&id_b, TransferAction::Accept),
        Acceptance::Ignored
    ));
}

#[test]
fn second_acceptance_is_ignored() {
    let mut book = OfferBook::new("a".to_string(), meta());
    let offers = offered(&book.on_roster(&roster(&["a", "b", "c"])));
    let (id_b, _) = offers.iter().find(|(_, t)| t == "b").unwrap().clone();
    let (id_c, _) = offers.iter().find(|(_, t)| t == "c").unwrap().clone();

    assert!(matches!(
        book.on_action(&id_b, TransferAction::Accept),
        Acceptance::Committed { .. }
    ));
    assert!(matches!(
        book.on_action(&id_c, TransferAction::Accept),
        Acceptance::Ignored
    ));
}

#[test]
fn send_only_ledger_cancels_and_remembers_nothing() {
    let mut ledger = OfferLedger::new(false);
    let reply = ledger.on_offer("t1", meta(), "b");
    match reply {
        RelayMessage::Action {
            action, target_id, ..
        } => {
            assert!(matches!(action, TransferAction::Cancel));
            assert_eq!(target_id, "b");
        }
        other => panic!("expected cancel action, got {other:?}"),
    }
    assert!(ledger.get("t1").is_none());
}

#[test]
fn receive_ledger_accepts_and_remembers() {
    let mut ledger = OfferLedger::new(true);
    let reply = ledger.on_offer("t1", meta(), "b");
    assert!(matches!(
        reply,
        RelayMessage::Action {
            action: TransferAction::Accept,
            ..
        }
    ));
    assert_eq!(ledger.get("t1").unwrap().from, "b");

    ledger.discard("t1");
    assert!(ledger.get("t1").is_none());
}
