// Integration tests for the log replayer: skill-tree expansion, decay,
// the negative-amount child-propagation rule, and justification output.

use tally_core::{Address, DecayRate, ReputationKey, TallyError, UpdateLogEntry};
use tally_engine::{HonestPolicy, InMemorySkillTree, ReplayOutcome, Replayer, ReputationState};
use tally_trie::BackendKind;

const COLONY: Address = Address([0x0c; 20]);
const USER: Address = Address([0x0e; 20]);

fn identity_decay() -> DecayRate {
    DecayRate {
        numerator: 1,
        denominator: 1,
    }
}

fn halving_decay() -> DecayRate {
    DecayRate {
        numerator: 1,
        denominator: 2,
    }
}

/// Chain the prefix sums the on-chain log would carry.
fn with_prefix_sums(previous_leaf_count: u64, mut log: Vec<UpdateLogEntry>) -> Vec<UpdateLogEntry> {
    let mut running = previous_leaf_count;
    for entry in log.iter_mut() {
        entry.n_previous_updates = running;
        running += entry.n_updates;
    }
    log
}

fn entry(skill: u64, amount: i128, n_updates: u64) -> UpdateLogEntry {
    UpdateLogEntry {
        user: USER,
        amount,
        skill,
        colony: COLONY,
        n_updates,
        n_previous_updates: 0,
    }
}

fn key(skill: u64, user: Address) -> ReputationKey {
    ReputationKey::new(COLONY, skill, user)
}

/// Skill 1 is a root with one child, skill 2.
fn one_child_tree() -> InMemorySkillTree {
    let mut tree = InMemorySkillTree::new();
    tree.add_skill(1, None);
    tree.add_skill(2, Some(1));
    tree
}

async fn replay(
    previous: &ReputationState,
    log: Vec<UpdateLogEntry>,
    decay: DecayRate,
    tree: &InMemorySkillTree,
) -> Result<ReplayOutcome, TallyError> {
    Replayer::new(previous.backend())
        .replay_pass(previous, &log, &decay, tree, &HonestPolicy)
        .await
}

#[tokio::test]
async fn negative_amount_over_zero_origin_yields_zero_child_delta() {
    // Scenario B: a 4-update entry penalizing a skill whose origin value is
    // still 0 must produce an effective child delta of exactly 0, not a
    // division error.
    let tree = one_child_tree();
    let previous = ReputationState::new(BackendKind::Incremental);
    let log = with_prefix_sums(0, vec![entry(1, -1_000, 4)]);

    let outcome = replay(&previous, log, identity_decay(), &tree)
        .await
        .expect("replay succeeds");

    assert_eq!(outcome.total_updates, 4);
    assert_eq!(outcome.justification.len(), 5);
    for record in outcome.justification.entries().iter().filter_map(|e| e.update.as_ref()) {
        assert_eq!(record.value_after.amount, 0);
    }
    // The child slots wrote a zero delta, not an error.
    let child_records: Vec<_> = outcome
        .justification
        .entries()
        .iter()
        .filter_map(|e| e.update.as_ref())
        .filter(|r| r.key.skill == 2)
        .collect();
    assert_eq!(child_records.len(), 2);
    for record in child_records {
        assert_eq!(record.delta, 0);
    }
}

#[tokio::test]
async fn replay_is_idempotent_across_backends() {
    for backend in [BackendKind::Reference, BackendKind::Incremental] {
        let tree = one_child_tree();
        let previous = ReputationState::new(backend);
        let log = with_prefix_sums(0, vec![entry(1, 500, 2), entry(2, 300, 4)]);

        let first = replay(&previous, log.clone(), halving_decay(), &tree)
            .await
            .unwrap();
        let second = replay(&previous, log, halving_decay(), &tree)
            .await
            .unwrap();

        assert_eq!(first.state.root_hash(), second.state.root_hash());
        assert_eq!(first.state.leaf_count(), second.state.leaf_count());
        assert_eq!(
            first.justification.root_hash(),
            second.justification.root_hash()
        );
        assert_eq!(first.justification.entries(), second.justification.entries());
    }
}

#[tokio::test]
async fn both_backends_agree_on_final_roots() {
    let tree = one_child_tree();
    let log_template = vec![entry(1, 500, 2), entry(2, -40, 4), entry(1, 7, 2)];
    let mut roots = Vec::new();
    for backend in [BackendKind::Reference, BackendKind::Incremental] {
        let previous = ReputationState::new(backend);
        let outcome = replay(
            &previous,
            with_prefix_sums(0, log_template.clone()),
            identity_decay(),
            &tree,
        )
        .await
        .unwrap();
        roots.push((outcome.state.root_hash(), outcome.justification.root_hash()));
    }
    assert_eq!(roots[0], roots[1]);
}

#[tokio::test]
async fn uids_survive_subsequent_passes() {
    let tree = one_child_tree();
    let genesis = ReputationState::new(BackendKind::Incremental);

    let first = replay(
        &genesis,
        with_prefix_sums(0, vec![entry(1, 100, 2)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();
    let colony_uid = first.state.get(&key(1, Address::ZERO)).unwrap().uid;
    let user_uid = first.state.get(&key(1, USER)).unwrap().uid;
    assert_eq!(colony_uid, 1);
    assert_eq!(user_uid, 2);

    // Second pass touches the same keys and creates new ones under skill 2.
    let second = replay(
        &first.state,
        with_prefix_sums(first.state.leaf_count(), vec![entry(1, 50, 2), entry(2, 10, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();

    assert_eq!(second.state.get(&key(1, Address::ZERO)).unwrap().uid, colony_uid);
    assert_eq!(second.state.get(&key(1, USER)).unwrap().uid, user_uid);
    // Brand-new keys continue the uid sequence with no reuse.
    let mut uids: Vec<u64> = second
        .state
        .leaves_in_order()
        .iter()
        .map(|(_, v)| v.uid)
        .collect();
    uids.sort_unstable();
    let expected: Vec<u64> = (1..=second.state.leaf_count()).collect();
    assert_eq!(uids, expected);
}

#[tokio::test]
async fn zero_amount_is_treated_as_non_negative() {
    // Boundary pin for the polarity rule: an amount of exactly 0 produces
    // no child updates. A 2-update entry on a skill with children replays
    // through the parents-and-self path only.
    let tree = one_child_tree();
    let previous = ReputationState::new(BackendKind::Incremental);
    let outcome = replay(
        &previous,
        with_prefix_sums(0, vec![entry(1, 0, 2)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();
    assert!(outcome
        .justification
        .entries()
        .iter()
        .filter_map(|e| e.update.as_ref())
        .all(|r| r.key.skill == 1));

    // The same shape with child slots allocated is a malformed log for a
    // non-negative amount.
    let previous = ReputationState::new(BackendKind::Incremental);
    let result = replay(
        &previous,
        with_prefix_sums(0, vec![entry(1, 0, 4)]),
        identity_decay(),
        &tree,
    )
    .await;
    assert!(matches!(result, Err(TallyError::Malformed(_))));

    // A strictly negative amount with the same 4-update shape does address
    // the child skill.
    let previous = ReputationState::new(BackendKind::Incremental);
    let outcome = replay(
        &previous,
        with_prefix_sums(0, vec![entry(1, -1, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();
    assert!(outcome
        .justification
        .entries()
        .iter()
        .filter_map(|e| e.update.as_ref())
        .any(|r| r.key.skill == 2));
}

#[tokio::test]
async fn decay_pass_halves_amounts_in_insertion_order() {
    let tree = one_child_tree();
    let genesis = ReputationState::new(BackendKind::Incremental);
    let seeded = replay(
        &genesis,
        with_prefix_sums(0, vec![entry(1, 100, 2), entry(2, 60, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();
    let before = seeded.state.leaves_in_order();

    // Empty log: the pass is pure decay of every existing leaf.
    let decayed = replay(&seeded.state, Vec::new(), halving_decay(), &tree)
        .await
        .unwrap();

    assert_eq!(decayed.total_updates, seeded.state.leaf_count());
    let after = decayed.state.leaves_in_order();
    assert_eq!(before.len(), after.len());
    for ((key_before, value_before), (key_after, value_after)) in
        before.iter().zip(after.iter())
    {
        assert_eq!(key_before, key_after);
        assert_eq!(value_before.uid, value_after.uid);
        assert_eq!(value_after.amount, value_before.amount / 2);
    }
    // Decay records are emitted in preserved insertion order.
    for (i, record) in decayed
        .justification
        .entries()
        .iter()
        .take(before.len())
        .enumerate()
    {
        assert_eq!(record.update.as_ref().unwrap().key, before[i].0);
    }
}

#[tokio::test]
async fn negative_entries_propagate_proportionally_to_children() {
    let tree = one_child_tree();
    let genesis = ReputationState::new(BackendKind::Incremental);
    // Seed both skills at 100 for the colony and the user: granting to the
    // child skill (one parent) raises the parent by the full amount.
    let seeded = replay(
        &genesis,
        with_prefix_sums(0, vec![entry(2, 100, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();
    assert_eq!(seeded.state.get(&key(1, Address::ZERO)).unwrap().amount, 100);
    assert_eq!(seeded.state.get(&key(2, USER)).unwrap().amount, 100);

    // Penalize skill 1 by 50: the child (skill 2) loses 50 * 100/100 = 50.
    let penalized = replay(
        &seeded.state,
        with_prefix_sums(seeded.state.leaf_count(), vec![entry(1, -50, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();

    for user in [Address::ZERO, USER] {
        assert_eq!(penalized.state.get(&key(1, user)).unwrap().amount, 50);
        assert_eq!(penalized.state.get(&key(2, user)).unwrap().amount, 50);
    }
    // Child slots recorded the origin consultation.
    let child_record = penalized
        .justification
        .entries()
        .iter()
        .filter_map(|e| e.update.as_ref())
        .find(|r| r.key.skill == 2 && r.key.user == USER)
        .unwrap();
    let origin = child_record.origin_proof.as_ref().unwrap();
    assert_eq!(origin.key, key(1, USER));
    assert!(!origin.is_adjacency_substitute());
    assert_eq!(child_record.delta, -50);
}

#[tokio::test]
async fn absent_consulted_keys_record_adjacency_substitutes() {
    let tree = one_child_tree();
    let genesis = ReputationState::new(BackendKind::Incremental);
    // Seed only skill 1; skill 2 entries do not exist yet.
    let seeded = replay(
        &genesis,
        with_prefix_sums(0, vec![entry(1, 100, 2)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();

    let penalized = replay(
        &seeded.state,
        with_prefix_sums(seeded.state.leaf_count(), vec![entry(1, -10, 4)]),
        identity_decay(),
        &tree,
    )
    .await
    .unwrap();

    let child_record = penalized
        .justification
        .entries()
        .iter()
        .filter_map(|e| e.update.as_ref())
        .find(|r| r.key.skill == 2 && r.key.user == Address::ZERO)
        .unwrap();
    // The child key did not exist, so its consulted proof is the nearest
    // existing neighbor standing in for a non-existence proof.
    let substitute = child_record.child_proof.as_ref().unwrap();
    assert_eq!(substitute.adjacent_for, Some(key(2, Address::ZERO)));
    assert_ne!(substitute.key, key(2, Address::ZERO));
    assert_eq!(child_record.delta, 0);
    assert_eq!(child_record.value_before, None);
    assert_eq!(child_record.value_after.amount, 0);
}
