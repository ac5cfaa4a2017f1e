use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use borsh::BorshSerialize;
use log::LevelFilter;
use qbft_rs::{
    controller::{Controller, ControllerError},
    instance::Stage,
    storage::decided_store::{DecidedStore, StorageError},
    types::{
        committee::{Committee, Operator, Share, ShareError},
        crypto_primitives::Keypair,
        data_types::{Height, OperatorID, Round, Value},
        signed_messages::{
            CommitData, Message, MessageType, PrepareData, RoundChangeData, SignedMessage,
        },
    },
};

mod common;

use crate::common::{
    harness::{configuration, Cluster, DOMAIN},
    keys,
    logging::setup_logger,
    mem_db::MemDB,
    network::OutboxNetwork,
};

fn value_at(height: u64) -> Value {
    Value::new(format!("duty data at height {}", height).into_bytes())
}

/// Sign a message as `signer` with its share of the cluster's validator key.
fn sign<P: BorshSerialize>(
    cluster: &Cluster,
    signer: u64,
    msg_type: MessageType,
    height: u64,
    round: u64,
    payload: &P,
) -> SignedMessage {
    let signer = OperatorID::new(signer);
    let message = Message::new(
        msg_type,
        Height::new(height),
        Round::new(round),
        cluster.identifier,
        payload,
    )
    .unwrap();
    SignedMessage::sign(message, signer, &cluster.shares[&signer].keypair, DOMAIN).unwrap()
}

fn commit_by(
    cluster: &Cluster,
    signers: &[u64],
    height: u64,
    round: u64,
    value: Value,
) -> SignedMessage {
    let commits: Vec<SignedMessage> = signers
        .iter()
        .map(|signer| {
            sign(
                cluster,
                *signer,
                MessageType::Commit,
                height,
                round,
                &CommitData {
                    value: value.clone(),
                },
            )
        })
        .collect();
    SignedMessage::aggregate_all(&commits).unwrap()
}

fn last_round_change(cluster: &Cluster, operator: OperatorID) -> Option<SignedMessage> {
    DecidedStore::new(cluster.stores[&operator].clone(), true)
        .last_round_change(&cluster.identifier)
        .unwrap()
}

#[test]
fn heights_must_strictly_increase_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide height 1, keeping a copy of its proposal.
    let mut cluster = Cluster::new(4);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    let (_, proposal) = cluster.pending().remove(0);
    cluster.deliver_all(now);

    // 2. Height 1 cannot be started again, nor can any height at or below it.
    let operator = OperatorID::new(1);
    assert!(matches!(
        cluster.start(operator, 1, value_at(1), now),
        Err(ControllerError::HeightNotIncreasing { .. })
    ));
    assert!(matches!(
        cluster.start(operator, 0, value_at(0), now),
        Err(ControllerError::HeightNotIncreasing { .. })
    ));

    // 3. Heights do not need to be consecutive.
    cluster.start_all(3, |_| value_at(3), now);
    cluster.deliver_all(now);
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.decided_value(operator, 3), Some(value_at(3)));
        assert_eq!(cluster.decided_value(operator, 2), None);
    }

    // 4. Messages for heights below the highest decided height are rejected.
    assert!(matches!(
        cluster.process(operator, proposal, now),
        Err(ControllerError::StaleMessage { .. })
    ));
}

#[test]
fn decided_message_for_a_future_height_moves_the_controller_forward_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide heights 1 and 2 without operator 4.
    let mut cluster = Cluster::new(4);
    let lagging = OperatorID::new(4);
    cluster.set_offline(lagging);
    let now = Instant::now();
    for height in 1..=2 {
        cluster.start_all(height, |_| value_at(height), now);
        cluster.deliver_all(now);
    }

    // 2. Operator 4 receives the decided message of height 2 directly.
    cluster.set_online(lagging);
    let decided = cluster.highest_decided(OperatorID::new(1)).unwrap();
    assert!(cluster.process(lagging, decided, now).unwrap().is_none());

    // 3. It stored the decided message, and will not start height 2 or below.
    assert_eq!(
        cluster.highest_decided(lagging).unwrap().height(),
        Height::new(2)
    );
    assert_eq!(
        cluster.controllers[&lagging].current_height(),
        Some(Height::new(2))
    );
    assert!(matches!(
        cluster.start(lagging, 2, value_at(2), now),
        Err(ControllerError::HeightNotIncreasing { .. })
    ));

    // 4. With no decided record of its own to sync from, the earlier height stays missing.
    assert_eq!(cluster.decided_value(lagging, 1), None);

    // 5. It takes part in the next height normally.
    cluster.start_all(3, |_| value_at(3), now);
    cluster.deliver_all(now);
    assert_eq!(cluster.decided_value(lagging, 3), Some(value_at(3)));
    assert_eq!(cluster.decided[&lagging].len(), 1);
}

#[test]
fn gap_below_a_decided_message_is_synced_from_peers_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide height 1 with everyone, then heights 2 and 5 without operator 4.
    let mut cluster = Cluster::new(4);
    let lagging = OperatorID::new(4);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    cluster.deliver_all(now);

    cluster.set_offline(lagging);
    for height in [2, 5] {
        cluster.start_all(height, |_| value_at(height), now);
        cluster.deliver_all(now);
    }

    // 2. Operator 4 receives the decided message of height 5, more than one height above its own
    //    highest decided height.
    cluster.set_online(lagging);
    let decided = cluster.highest_decided(OperatorID::new(1)).unwrap();
    assert_eq!(decided.height(), Height::new(5));
    cluster.process(lagging, decided, now).unwrap();

    // 3. It fetched every height in between that its peers had decided.
    let heights: Vec<Height> = cluster.controllers[&lagging]
        .decided_in_range(Height::new(1), Height::new(5))
        .unwrap()
        .iter()
        .map(|decided| decided.height())
        .collect();
    assert_eq!(heights, vec![Height::new(1), Height::new(2), Height::new(5)]);
    assert_eq!(cluster.decided_value(lagging, 2), Some(value_at(2)));
}

#[test]
fn sync_continues_past_pages_without_decided_heights_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Peers answer history requests two heights at a time. Decide height 1 with everyone, then
    //    heights 5, 6 and 8 without operator 4. Heights 2 to 4 and 7 are never decided.
    let mut cluster = Cluster::with_request_limit(4, configuration(), true, 2);
    let lagging = OperatorID::new(4);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    cluster.deliver_all(now);

    cluster.set_offline(lagging);
    for height in [5, 6, 8] {
        cluster.start_all(height, |_| value_at(height), now);
        cluster.deliver_all(now);
    }

    // 2. Operator 4 receives the decided message of height 8. The first pages it requests hold no
    //    decided heights.
    cluster.set_online(lagging);
    let decided = cluster.highest_decided(OperatorID::new(1)).unwrap();
    cluster.process(lagging, decided, now).unwrap();

    // 3. It still fetched the decided heights further up.
    let heights: Vec<Height> = cluster.controllers[&lagging]
        .decided_in_range(Height::new(1), Height::new(8))
        .unwrap()
        .iter()
        .map(|decided| decided.height())
        .collect();
    assert_eq!(
        heights,
        [1, 5, 6, 8].into_iter().map(Height::new).collect::<Vec<_>>()
    );
}

#[test]
fn lagging_operator_catches_up_on_start_and_on_future_messages_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide height 1 without operator 4.
    let mut cluster = Cluster::new(4);
    let lagging = OperatorID::new(4);
    cluster.set_offline(lagging);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    cluster.deliver_all(now);
    assert!(cluster.highest_decided(lagging).is_none());

    // 2. Initializing operator 4's controller fetches its peers' highest decided message.
    cluster.set_online(lagging);
    cluster.controllers.get_mut(&lagging).unwrap().init().unwrap();
    assert_eq!(
        cluster.highest_decided(lagging).unwrap().height(),
        Height::new(1)
    );

    // 3. Decide height 2 without operator 4 again, keeping a copy of a message from it.
    cluster.set_offline(lagging);
    cluster.start_all(2, |_| value_at(2), now);
    let (_, proposal) = cluster.pending().remove(0);
    cluster.deliver_all(now);

    // 4. A message for a height that operator 4 has no instance for is dropped, but makes it catch up.
    cluster.set_online(lagging);
    assert!(cluster.process(lagging, proposal, now).unwrap().is_none());
    assert_eq!(
        cluster.highest_decided(lagging).unwrap().height(),
        Height::new(2)
    );
    assert_eq!(cluster.stage(lagging), None);
}

#[test]
fn history_disabled_keeps_only_the_highest_decided_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide heights 1 and 2 without keeping history.
    let mut cluster = Cluster::with_configuration(4, configuration(), false);
    let now = Instant::now();
    for height in 1..=2 {
        cluster.start_all(height, |_| value_at(height), now);
        cluster.deliver_all(now);
    }

    // 2. Only the highest decided message is kept, and history cannot be read.
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.stage(operator), Some(Stage::Decided));
        let highest = cluster.highest_decided(operator).unwrap();
        assert_eq!(highest.height(), Height::new(2));
        assert_eq!(highest.value().unwrap(), value_at(2));
        assert!(matches!(
            cluster.controllers[&operator].decided_in_range(Height::new(1), Height::new(2)),
            Err(ControllerError::StorageError(StorageError::HistoryDisabled))
        ));
    }
}

#[test]
fn only_validated_round_changes_are_persisted_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide height 1.
    let mut cluster = Cluster::new(4);
    let operator = OperatorID::new(1);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    cluster.deliver_all(now);
    assert_eq!(cluster.stage(operator), Some(Stage::Decided));

    // 2. A round change signed by a key outside the committee, claiming to be operator 2, reaches the
    //    decided instance. It is ignored and not stored.
    let outsider = Keypair::from_seed(&[42u8; 32]).unwrap();
    let message = Message::new(
        MessageType::RoundChange,
        Height::new(1),
        Round::new(99),
        cluster.identifier,
        &RoundChangeData { prepared: None },
    )
    .unwrap();
    let forged = SignedMessage::sign(message, OperatorID::new(2), &outsider, DOMAIN).unwrap();
    assert!(cluster.process(operator, forged.clone(), now).unwrap().is_none());
    assert_eq!(last_round_change(&cluster, operator), None);

    // 3. A running instance rejects the same kind of forgery, and stores nothing.
    cluster.start_all(2, |_| value_at(2), now);
    cluster.discard_pending();
    let mut forged = forged;
    forged.message.height = Height::new(2);
    assert!(cluster.process(operator, forged, now).is_err());
    assert_eq!(last_round_change(&cluster, operator), None);

    // 4. A round change signed by a committee member is stored.
    let round_change = sign(
        &cluster,
        2,
        MessageType::RoundChange,
        2,
        2,
        &RoundChangeData { prepared: None },
    );
    cluster.process(operator, round_change.clone(), now).unwrap();
    assert_eq!(last_round_change(&cluster, operator), Some(round_change));
}

#[test]
fn decided_message_from_another_round_with_the_same_value_is_accepted_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Decide height 1 in round 1.
    let mut cluster = Cluster::new(4);
    let operator = OperatorID::new(1);
    let now = Instant::now();
    cluster.start_all(1, |_| value_at(1), now);
    cluster.deliver_all(now);
    let stored = cluster.highest_decided(operator).unwrap();
    assert_eq!(stored.round(), Round::new(1));
    assert!(stored.signers.len() < 4);

    // 2. A quorum that committed the same value in round 2 is not a conflict, and with no more
    //    signers than the stored record it changes nothing.
    let same_size = commit_by(&cluster, &[2, 3, 4], 1, 2, value_at(1));
    assert!(cluster.process(operator, same_size, now).unwrap().is_none());
    assert_eq!(cluster.highest_decided(operator).unwrap(), stored);

    // 3. The same value signed by every operator replaces the stored record.
    let everyone = commit_by(&cluster, &[1, 2, 3, 4], 1, 2, value_at(1));
    assert!(cluster.process(operator, everyone.clone(), now).unwrap().is_none());
    assert_eq!(cluster.highest_decided(operator).unwrap(), everyone);
    assert_eq!(cluster.decided_value(operator, 1), Some(value_at(1)));

    // 4. A quorum for a different value is a conflict.
    let conflicting = commit_by(&cluster, &[2, 3, 4], 1, 3, value_at(2));
    assert!(matches!(
        cluster.process(operator, conflicting, now),
        Err(ControllerError::ConflictingDecided { .. })
    ));
}

#[test]
fn messages_at_a_height_without_an_instance_are_rejected_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Operator 4 misses heights 1 and 2, then learns of height 2 from its decided message.
    let mut cluster = Cluster::new(4);
    let lagging = OperatorID::new(4);
    cluster.set_offline(lagging);
    let now = Instant::now();
    for height in 1..=2 {
        cluster.start_all(height, |_| value_at(height), now);
        cluster.deliver_all(now);
    }
    cluster.set_online(lagging);
    let decided = cluster.highest_decided(OperatorID::new(1)).unwrap();
    cluster.process(lagging, decided, now).unwrap();
    assert_eq!(cluster.stage(lagging), None);
    assert_eq!(
        cluster.controllers[&lagging].current_height(),
        Some(Height::new(2))
    );

    // 2. It has no instance for height 2, so a prepare for height 2 is rejected.
    let prepare = sign(
        &cluster,
        1,
        MessageType::Prepare,
        2,
        1,
        &PrepareData { value: value_at(2) },
    );
    assert!(matches!(
        cluster.process(lagging, prepare, now),
        Err(ControllerError::NoInstanceForHeight { .. })
    ));

    // 3. A prepare for height 3 is a future message.
    let prepare = sign(
        &cluster,
        1,
        MessageType::Prepare,
        3,
        1,
        &PrepareData { value: value_at(3) },
    );
    assert!(cluster.process(lagging, prepare, now).unwrap().is_none());
}

#[test]
fn empty_committee_cannot_start_an_instance_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Take an operator's share, and replace its committee with one that has no operators.
    let (committee, shares) = keys::committee(4, 7);
    let identifier = keys::attester(committee.validator_public_key());
    let share = shares.into_iter().next().unwrap();
    let operator = share.operator_id;
    let share = Share {
        committee: Arc::new(Committee::new(
            *committee.validator_public_key(),
            Vec::<Operator>::new(),
        )),
        ..share
    };

    // 2. Starting an instance fails instead of selecting a leader.
    let mut controller = Controller::new(
        configuration(),
        share,
        identifier,
        DecidedStore::new(MemDB::new(), true),
        OutboxNetwork::new(
            operator,
            Arc::new(Mutex::new(VecDeque::new())),
            Arc::new(Mutex::new(BTreeMap::new())),
        ),
        None,
        None,
    );
    assert!(matches!(
        controller.start_instance(Height::new(1), value_at(1), Instant::now()),
        Err(ControllerError::InvalidShare(ShareError::EmptyCommittee))
    ));
    assert!(controller.instance().is_none());
}
