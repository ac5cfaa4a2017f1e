use std::time::{Duration, Instant};

use log::LevelFilter;
use qbft_rs::{
    instance::Stage,
    types::{
        data_types::{OperatorID, Round, Value},
        signed_messages::MessageType,
    },
};

mod common;

use crate::common::{
    harness::{Cluster, DOMAIN, ROUND_TIMEOUT},
    logging::setup_logger,
};

fn value_of(operator: OperatorID) -> Value {
    Value::new(format!("duty data of operator {}", operator).into_bytes())
}

#[test]
fn all_operators_decide_the_leaders_value_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start height 1 on a committee of 4 and deliver everything.
    let mut cluster = Cluster::new(4);
    let now = Instant::now();
    cluster.start_all(1, value_of, now);
    cluster.deliver_all(now);

    // 2. Every operator decided the first-round leader's value exactly once.
    let leader = cluster.leader(1, 1);
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.stage(operator), Some(Stage::Decided));
        assert_eq!(cluster.decided[&operator].len(), 1);
        assert_eq!(cluster.decided_value(operator, 1), Some(value_of(leader)));
    }

    // 3. The stored decided message is a valid aggregated Commit quorum from the first round.
    let decided = cluster.highest_decided(OperatorID::new(1)).unwrap();
    assert_eq!(decided.msg_type(), MessageType::Commit);
    assert_eq!(decided.round(), Round::FIRST);
    assert!(decided.signers.len() >= cluster.committee.quorum());
    assert!(decided.verify(&cluster.committee, DOMAIN).is_ok());
}

#[test]
fn offline_leader_is_replaced_after_a_round_change_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Take the first-round leader offline and start everyone else.
    let mut cluster = Cluster::new(4);
    let leader = cluster.leader(1, 1);
    cluster.set_offline(leader);
    let now = Instant::now();
    cluster.start_all(1, value_of, now);
    cluster.deliver_all(now);

    // 2. Nothing is proposed, so nobody moves past the proposal stage.
    for operator in cluster.operator_ids() {
        if operator != leader {
            assert_eq!(cluster.stage(operator), Some(Stage::Proposal));
        }
    }

    // 3. Just before the first round times out, ticking does nothing.
    let almost = now + ROUND_TIMEOUT - Duration::from_millis(1);
    cluster.tick_all(almost);
    assert!(cluster.pending().is_empty());

    // 4. Once it times out, everyone broadcasts a round change, and the second-round leader proposes
    //    its own value.
    let later = now + ROUND_TIMEOUT;
    cluster.tick_all(later);
    assert!(cluster
        .pending()
        .iter()
        .all(|(_, msg)| msg.msg_type() == MessageType::RoundChange && msg.round() == Round::new(2)));
    cluster.deliver_all(later);

    let second_leader = cluster.leader(1, 2);
    assert_ne!(second_leader, leader);
    for operator in cluster.operator_ids() {
        if operator == leader {
            continue;
        }
        assert_eq!(cluster.stage(operator), Some(Stage::Decided));
        let decided = cluster.highest_decided(operator).unwrap();
        assert_eq!(decided.round(), Round::new(2));
        assert_eq!(decided.value().unwrap(), value_of(second_leader));
    }
}

#[test]
fn partial_quorum_of_round_changes_pulls_laggards_forward_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Take the first-round leader offline and start everyone else.
    let mut cluster = Cluster::new(4);
    let leader = cluster.leader(1, 1);
    cluster.set_offline(leader);
    let now = Instant::now();
    cluster.start_all(1, value_of, now);

    // 2. Only two operators notice the timeout.
    let later = now + ROUND_TIMEOUT;
    let laggard = cluster
        .operator_ids()
        .into_iter()
        .find(|operator| *operator != leader)
        .unwrap();
    for operator in cluster.operator_ids() {
        if operator != leader && operator != laggard {
            cluster.tick(operator, later);
        }
    }
    assert_eq!(cluster.pending().len(), 2);

    // 3. Their two round changes are a partial quorum, so the laggard joins the second round without
    //    timing out, which completes the quorum of round changes.
    cluster.deliver_all(later);
    for operator in cluster.operator_ids() {
        if operator != leader {
            assert_eq!(cluster.stage(operator), Some(Stage::Decided));
            assert_eq!(cluster.highest_decided(operator).unwrap().round(), Round::new(2));
        }
    }
}

#[test]
fn prepared_value_survives_a_round_change_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Deliver the first round, except for Commit messages.
    let mut cluster = Cluster::new(4);
    cluster.set_filter(Box::new(|_, _, msg| msg.msg_type() != MessageType::Commit));
    let now = Instant::now();
    cluster.start_all(1, value_of, now);
    cluster.deliver_all(now);

    // 2. Everyone prepared the first-round leader's value, but nobody decided.
    let leader = cluster.leader(1, 1);
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.stage(operator), Some(Stage::Commit));
        let prepared = cluster.controllers[&operator]
            .instance()
            .unwrap()
            .state()
            .prepared
            .clone()
            .unwrap();
        assert_eq!(prepared.round, Round::FIRST);
        assert_eq!(prepared.value, value_of(leader));
    }

    // 3. After the round change, the second-round leader must re-propose the prepared value instead of
    //    its own.
    cluster.clear_filter();
    let later = now + ROUND_TIMEOUT;
    cluster.tick_all(later);
    cluster.deliver_all(later);

    let second_leader = cluster.leader(1, 2);
    assert_ne!(value_of(second_leader), value_of(leader));
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.stage(operator), Some(Stage::Decided));
        let decided = cluster.highest_decided(operator).unwrap();
        assert_eq!(decided.round(), Round::new(2));
        assert_eq!(decided.value().unwrap(), value_of(leader));
    }
}

#[test]
fn operators_never_decide_different_values_test() {
    setup_logger(LevelFilter::Trace);

    for seed in 0..10u64 {
        // 1. Deliver messages in a random order, and hide the first-round proposal from one operator.
        let mut cluster = Cluster::new(4);
        cluster.shuffle_deliveries(seed);
        let blind = OperatorID::new(1 + seed % 4);
        cluster.set_filter(Box::new(move |_, to, msg| {
            !(to == blind && msg.msg_type() == MessageType::Proposal)
        }));
        let now = Instant::now();
        cluster.start_all(1, value_of, now);
        cluster.deliver_all(now);

        // 2. Everyone decides, including the operator that never saw the proposal, and on one value.
        let values: Vec<Value> = cluster
            .operator_ids()
            .into_iter()
            .map(|operator| cluster.decided_value(operator, 1).unwrap())
            .collect();
        assert!(
            values.windows(2).all(|pair| pair[0] == pair[1]),
            "seed {} decided {:?}",
            seed,
            values
        );
    }
}

#[test]
fn instance_stops_past_the_maximum_round_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start an instance whose messages are never delivered.
    let mut config = common::harness::configuration();
    config.instance.max_round = Round::new(2);
    let mut cluster = Cluster::with_configuration(4, config, true);
    let now = Instant::now();
    cluster.start_all(1, value_of, now);
    cluster.discard_pending();

    // 2. The first round times out into the second.
    let second_round = now + ROUND_TIMEOUT;
    cluster.tick_all(second_round);
    cluster.discard_pending();
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.controllers[&operator].instance().unwrap().round(), Round::new(2));
    }

    // 3. The second round lasts twice as long as the first, and timing it out stops the instance.
    cluster.tick_all(second_round + ROUND_TIMEOUT);
    assert_eq!(cluster.stage(OperatorID::new(1)), Some(Stage::Proposal));
    cluster.tick_all(second_round + ROUND_TIMEOUT * 2);
    for operator in cluster.operator_ids() {
        assert_eq!(cluster.stage(operator), Some(Stage::Stopped));
        assert!(cluster.controllers[&operator].next_deadline().is_none());
    }
    assert!(cluster.pending().is_empty());
}
