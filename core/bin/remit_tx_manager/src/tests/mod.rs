// Built-in deps
use std::time::Duration;
// External uses
use futures::channel::mpsc;
// Workspace uses
use remit_types::{Address, PaymentMessage, TxStatus};
// Local uses
use self::mock::{BroadcastFailure, MockDatabase, MockEthereum};
use self::test_data::{address_of, keypair, signed_tx, transfer_row, NETWORK_ID};
use crate::ethereum_interface::NodeTxStatus;
use crate::tasks::{Task, TaskDispatcher};
use crate::TransactionQueueManager;


type MockManager = TransactionQueueManager<MockEthereum, MockDatabase>;

fn manager_with(
    db: MockDatabase,
    ethereum: MockEthereum,
) -> (MockManager, mpsc::UnboundedReceiver<Task>) {
    let (dispatcher, tasks) = TaskDispatcher::new();
    (
        TransactionQueueManager::new(db, ethereum, dispatcher, NETWORK_ID),
        tasks,
    )
}

fn drain(tasks: &mut mpsc::UnboundedReceiver<Task>) -> Vec<Task> {
    let mut drained = Vec::new();
    while let Ok(Some(task)) = tasks.try_next() {
        drained.push(task);
    }
    drained
}

fn notifications_for(tasks: &[Task], address: Address) -> Vec<PaymentMessage> {
    tasks
        .iter()
        .filter_map(|task| match task {
            Task::SendNotification {
                address: recipient,
                message,
            } if *recipient == address => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn retriggers(tasks: &[Task]) -> Vec<Address> {
    tasks
        .iter()
        .filter_map(|task| match task {
            Task::ProcessTransactionQueue(address) => Some(*address),
            _ => None,
        })
        .collect()
}

/// Happy path: a covered row goes out, both endpoints are notified and the
/// recipient's queue is re-examined.
#[tokio::test]
async fn broadcasts_a_covered_transaction() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(recipient));
    let tx_hash = tx.hash;

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 10u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(vec![tx]), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Unconfirmed));
    assert_eq!(manager.ethereum.sent_count().await, 1);

    let tasks = drain(&mut tasks);
    let sender_pns = notifications_for(&tasks, sender_address);
    assert_eq!(sender_pns.len(), 1);
    assert_eq!(sender_pns[0].status, TxStatus::Unconfirmed);
    assert_eq!(sender_pns[0].tx_hash, tx_hash);
    assert_eq!(notifications_for(&tasks, recipient).len(), 1);
    assert!(retriggers(&tasks).contains(&recipient));
}

/// A nonce gap fails the row at the gap and everything behind it.
#[tokio::test]
async fn nonce_gap_cascades_to_error() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 1, 1, Some(recipient)),
        signed_tx(2, &sender, 7, 3, 1, 1, Some(recipient)),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 100u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, _tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Unconfirmed));
    assert_eq!(manager.db.status_of(2).await, Some(TxStatus::Error));
    assert_eq!(manager.ethereum.sent_count().await, 1);
}

/// An unaffordable row with enough optimistic inbound funds parks the queue
/// instead of failing it, and does not re-trigger the sender by itself.
#[tokio::test]
async fn insufficient_balance_with_pending_inbound_parks_the_queue() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let funder = Address::repeat_byte(0xcc);
    let txs = vec![
        // cost 5, balance only 1
        signed_tx(1, &sender, 5, 3, 2, 1, Some(recipient)),
        transfer_row(
            8,
            funder,
            sender_address,
            0,
            10,
            Some(TxStatus::Unconfirmed),
            None,
        ),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 1u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Queued));
    assert_eq!(manager.ethereum.sent_count().await, 0);

    let tasks = drain(&mut tasks);
    // Parking is announced as "unconfirmed"; users never see "queued".
    let sender_pns = notifications_for(&tasks, sender_address);
    assert_eq!(sender_pns.len(), 1);
    assert_eq!(sender_pns[0].status, TxStatus::Unconfirmed);
    // No fresh inbound confirmation, so the queue waits for an external
    // event instead of re-triggering itself.
    assert!(!retriggers(&tasks).contains(&sender_address));
}

/// An inbound row confirmed past the snapshot block re-triggers the parked
/// queue so it can re-evaluate against a fresher balance.
#[tokio::test]
async fn fresh_inbound_confirmation_retriggers_a_parked_queue() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let funder = Address::repeat_byte(0xcc);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 2, 1, Some(Address::repeat_byte(0xbb))),
        transfer_row(
            8,
            funder,
            sender_address,
            0,
            10,
            Some(TxStatus::Confirmed),
            Some(8),
        ),
    ];

    let db = MockDatabase::with_transactions(txs);
    db.set_last_blocknumber(5).await;
    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 1u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, mut tasks) = manager_with(db, ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Queued));
    let tasks = drain(&mut tasks);
    assert!(retriggers(&tasks).contains(&sender_address));
}

/// Even optimistic inbound funds cannot cover the row: it fails, and so does
/// everything behind it.
#[tokio::test]
async fn impossible_balance_cascades_to_error() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 2, 1, Some(recipient)),
        signed_tx(2, &sender, 6, 3, 2, 1, Some(recipient)),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 1u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Error));
    assert_eq!(manager.db.status_of(2).await, Some(TxStatus::Error));
    assert_eq!(manager.ethereum.sent_count().await, 0);

    // Nobody had heard of these payments, so only the sender is told.
    let tasks = drain(&mut tasks);
    assert_eq!(notifications_for(&tasks, sender_address).len(), 2);
    assert!(notifications_for(&tasks, recipient).is_empty());
}

/// A row whose signature recovers to somebody else never reaches the network.
#[tokio::test]
async fn spoofed_signature_cascades_to_error() {
    let imposter = keypair();
    let victim = keypair();
    let victim_address = address_of(&victim);
    let mut spoofed = signed_tx(1, &imposter, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
    spoofed.from = victim_address;
    let follower = {
        let mut tx = signed_tx(2, &imposter, 6, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
        tx.from = victim_address;
        tx
    };

    let ethereum = MockEthereum::default();
    ethereum.set_balance(victim_address, 100u64).await;
    ethereum.set_nonce(victim_address, 5).await;
    let (manager, _tasks) = manager_with(
        MockDatabase::with_transactions(vec![spoofed, follower]),
        ethereum,
    );

    manager.process_transaction_queue(victim_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Error));
    assert_eq!(manager.db.status_of(2).await, Some(TxStatus::Error));
    assert_eq!(manager.ethereum.sent_count().await, 0);
}

/// A structured node rejection fails the row and the queue behind it.
#[tokio::test]
async fn rejected_broadcast_cascades_to_error() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb))),
        signed_tx(2, &sender, 6, 3, 1, 1, Some(Address::repeat_byte(0xbb))),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 100u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    ethereum.fail_broadcasts(BroadcastFailure::Rejected).await;
    let (manager, _tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Error));
    assert_eq!(manager.db.status_of(2).await, Some(TxStatus::Error));
}

/// A transport-level failure aborts the pass without classifying any rows:
/// the queue is left intact for the next trigger.
#[tokio::test]
async fn transport_failure_leaves_the_queue_untouched() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb))),
        signed_tx(2, &sender, 6, 3, 1, 1, Some(Address::repeat_byte(0xbb))),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 100u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    ethereum.fail_broadcasts(BroadcastFailure::Unreachable).await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, None);
    assert_eq!(manager.db.status_of(2).await, None);
    assert!(drain(&mut tasks).is_empty());
}

/// The expected nonce and the working balance come from the in-flight rows
/// when there are any; the network nonce is not consulted.
#[tokio::test]
async fn uses_inflight_rows_for_nonce_and_balance() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let txs = vec![
        transfer_row(
            9,
            sender_address,
            Address::repeat_byte(0xdd),
            5,
            4_000,
            Some(TxStatus::Unconfirmed),
            None,
        ),
        signed_tx(1, &sender, 6, 3, 2, 1, Some(Address::repeat_byte(0xbb))),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 100_000u64).await;
    // Poisoned on purpose: with in-flight rows present the network nonce
    // must not be used.
    ethereum.set_nonce(sender_address, 99).await;
    let (manager, _tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Unconfirmed));
    assert_eq!(manager.ethereum.sent_count().await, 1);
}

/// In-flight debits exceeding the snapshot balance must not underflow; the
/// shortfall counts against the pending inbound funds instead.
#[tokio::test]
async fn inflight_overdraft_parks_instead_of_underflowing() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let funder = Address::repeat_byte(0xcc);
    let txs = vec![
        // cost 61_000 against a balance of 10_000
        transfer_row(
            9,
            sender_address,
            Address::repeat_byte(0xdd),
            5,
            40_000,
            Some(TxStatus::Unconfirmed),
            None,
        ),
        signed_tx(1, &sender, 6, 1, 0, 0, Some(Address::repeat_byte(0xbb))),
        transfer_row(
            8,
            funder,
            sender_address,
            0,
            100_000,
            Some(TxStatus::Unconfirmed),
            None,
        ),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 10_000u64).await;
    let (manager, _tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Queued));
    assert_eq!(manager.ethereum.sent_count().await, 0);
}

/// A parked queue drains silently once the balance arrives: the transition
/// `queued` → `unconfirmed` was already announced at parking time.
#[tokio::test]
async fn parked_queue_drains_silently_once_funded() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let funder = Address::repeat_byte(0xcc);
    let txs = vec![
        signed_tx(1, &sender, 5, 3, 2, 1, Some(recipient)),
        transfer_row(
            8,
            funder,
            sender_address,
            0,
            10,
            Some(TxStatus::Unconfirmed),
            None,
        ),
    ];

    let ethereum = MockEthereum::default();
    ethereum.set_balance(sender_address, 1u64).await;
    ethereum.set_nonce(sender_address, 5).await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(txs), ethereum);

    manager.process_transaction_queue(sender_address).await;
    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Queued));
    drain(&mut tasks);

    manager.ethereum.set_balance(sender_address, 10u64).await;
    manager.process_transaction_queue(sender_address).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Unconfirmed));
    assert_eq!(manager.ethereum.sent_count().await, 1);
    let tasks = drain(&mut tasks);
    assert!(notifications_for(&tasks, sender_address).is_empty());
    assert!(notifications_for(&tasks, recipient).is_empty());
    assert!(retriggers(&tasks).contains(&recipient));
}

/// An empty queue pass touches nothing and dispatches nothing.
#[tokio::test]
async fn empty_queue_is_a_no_op() {
    let (manager, mut tasks) = manager_with(MockDatabase::default(), MockEthereum::default());

    manager
        .process_transaction_queue(Address::repeat_byte(0xaa))
        .await;

    assert_eq!(manager.db.status_write_count().await, 0);
    assert!(drain(&mut tasks).is_empty());
}

/// Updating a row to the status it already has is a complete no-op.
#[tokio::test]
async fn repeated_update_is_a_no_op() {
    let sender = keypair();
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
        tx.status = Some(TxStatus::Unconfirmed);
        tx
    };
    let (manager, mut tasks) = manager_with(
        MockDatabase::with_transactions(vec![tx]),
        MockEthereum::default(),
    );

    manager
        .update_transaction(1, TxStatus::Unconfirmed)
        .await
        .unwrap();

    assert_eq!(manager.db.status_write_count().await, 0);
    assert!(drain(&mut tasks).is_empty());
}

/// `confirmed` is terminal: an attempted overwrite is dropped entirely.
#[tokio::test]
async fn confirmed_rows_are_never_overwritten() {
    let sender = keypair();
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
        tx.status = Some(TxStatus::Confirmed);
        tx.blocknumber = Some(100);
        tx
    };
    let (manager, mut tasks) = manager_with(
        MockDatabase::with_transactions(vec![tx]),
        MockEthereum::default(),
    );

    manager.update_transaction(1, TxStatus::Error).await.unwrap();

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Confirmed));
    assert_eq!(manager.db.status_write_count().await, 0);
    assert!(drain(&mut tasks).is_empty());
}

/// `error` is deliberately not protected the same way: a later confirmation
/// observation wins over the earlier classification.
#[tokio::test]
async fn confirmation_resurrects_an_errored_row() {
    let sender = keypair();
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
        tx.status = Some(TxStatus::Error);
        tx
    };
    let tx_hash = tx.hash;

    let ethereum = MockEthereum::default();
    ethereum
        .add_tx_status(
            tx_hash,
            NodeTxStatus {
                blocknumber: Some(123),
            },
        )
        .await;
    let (manager, _tasks) = manager_with(MockDatabase::with_transactions(vec![tx]), ethereum);

    manager
        .update_transaction(1, TxStatus::Confirmed)
        .await
        .unwrap();

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Confirmed));
    assert_eq!(manager.db.blocknumber_of(1).await, Some(123));
}

/// The sanity sweep confirms rows the block monitor has missed, taking the
/// block number the node reports.
#[tokio::test]
async fn sanity_check_confirms_mined_transactions() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(recipient));
        tx.status = Some(TxStatus::Unconfirmed);
        tx
    };
    let tx_hash = tx.hash;

    let ethereum = MockEthereum::default();
    ethereum
        .add_tx_status(
            tx_hash,
            NodeTxStatus {
                blocknumber: Some(123),
            },
        )
        .await;
    let (manager, mut tasks) = manager_with(MockDatabase::with_transactions(vec![tx]), ethereum);

    manager.sanity_check(Duration::ZERO).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Confirmed));
    assert_eq!(manager.db.blocknumber_of(1).await, Some(123));
    let tasks = drain(&mut tasks);
    let retriggered = retriggers(&tasks);
    assert!(retriggered.contains(&sender_address));
    assert!(retriggered.contains(&recipient));
}

/// A broadcast row the node no longer knows is failed by the sweep.
#[tokio::test]
async fn sanity_check_errors_vanished_transactions() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let recipient = Address::repeat_byte(0xbb);
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(recipient));
        tx.status = Some(TxStatus::Unconfirmed);
        tx
    };
    let (manager, mut tasks) = manager_with(
        MockDatabase::with_transactions(vec![tx]),
        MockEthereum::default(),
    );

    manager.sanity_check(Duration::ZERO).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Error));
    let tasks = drain(&mut tasks);
    assert_eq!(notifications_for(&tasks, sender_address).len(), 1);
    assert_eq!(notifications_for(&tasks, recipient).len(), 1);
    assert!(retriggers(&tasks).contains(&sender_address));
}

/// Stale rows without any unconfirmed sibling only warrant a fresh pass.
#[tokio::test]
async fn sanity_check_retriggers_stale_senders_without_unconfirmed_rows() {
    let sender = keypair();
    let sender_address = address_of(&sender);
    let tx = {
        let mut tx = signed_tx(1, &sender, 5, 3, 1, 1, Some(Address::repeat_byte(0xbb)));
        tx.status = Some(TxStatus::Queued);
        tx
    };
    let (manager, mut tasks) = manager_with(
        MockDatabase::with_transactions(vec![tx]),
        MockEthereum::default(),
    );

    manager.sanity_check(Duration::ZERO).await;

    assert_eq!(manager.db.status_of(1).await, Some(TxStatus::Queued));
    assert_eq!(manager.db.status_write_count().await, 0);
    assert!(retriggers(&drain(&mut tasks)).contains(&sender_address));
}

/// The sweep keeps itself scheduled with its own period.
#[tokio::test]
async fn sanity_check_reschedules_itself() {
    let (manager, mut tasks) = manager_with(MockDatabase::default(), MockEthereum::default());
    let frequency = Duration::from_secs(60);

    manager.sanity_check(frequency).await;

    assert_eq!(
        drain(&mut tasks),
        vec![Task::SanityCheck {
            frequency,
            delay: frequency,
        }],
    );
}
