//! Integration tests for `AggregateHost`.

use std::sync::Arc;

use async_trait::async_trait;
use evolog_aggregate::host::AggregateHost;
use evolog_aggregate::rehydrator::{Rehydrated, Rehydrator, SnapshottedRehydrator, StateRehydrator};
use evolog_aggregate::snapshotter::Snapshotter;
use evolog_core::aggregate::{Aggregate, DispatchRegistry};
use evolog_core::error::DomainError;
use evolog_core::handler::CommandHandler;
use evolog_core::message::{Envelope, EventMessage};
use evolog_core::payload::{Payload, SerializedPayload, Variant};
use evolog_core::storage::StorageBackend;
use evolog_event_store::event_store::EventStore;
use evolog_event_store::in_memory::{InMemorySnapshotStore, InMemoryStorage};
use evolog_test_support::{
    Account, AccountCommand, AccountEvent, AccountState, FixedClock, MisregisteredAccount,
    RecordingBus, command_message, fixed_now,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

struct Fixture<A: Aggregate> {
    storage: Arc<InMemoryStorage>,
    bus: Arc<RecordingBus<EventMessage>>,
    events: Arc<EventStore<A>>,
    registry: Arc<DispatchRegistry<A>>,
    host: AggregateHost<A>,
}

fn fixture<A: Aggregate>(publish_failures: usize) -> Fixture<A> {
    let storage = Arc::new(InMemoryStorage::new());
    let bus = Arc::new(RecordingBus::<EventMessage>::failing_times(publish_failures));
    let events = Arc::new(EventStore::new(
        storage.clone(),
        bus.clone(),
        Arc::new(FixedClock(fixed_now())),
    ));
    let registry = Arc::new(A::registry());
    let rehydrator = Arc::new(Rehydrator::new(Arc::clone(&events), Arc::clone(&registry)));
    let host = AggregateHost::new(Arc::clone(&registry), rehydrator, Arc::clone(&events));
    Fixture {
        storage,
        bus,
        events,
        registry,
        host,
    }
}

impl<A: Aggregate> Fixture<A> {
    async fn state(&self, stream_id: &str) -> Option<Rehydrated<A::State>> {
        Rehydrator::new(Arc::clone(&self.events), Arc::clone(&self.registry))
            .try_rehydrate_state(stream_id)
            .await
            .unwrap()
    }
}

/// Always reports the stream as unwritten, like a writer that lost a race.
struct StaleRehydrator;

#[async_trait]
impl StateRehydrator<Account> for StaleRehydrator {
    async fn try_rehydrate_state(
        &self,
        _stream_id: &str,
    ) -> Result<Option<Rehydrated<AccountState>>, DomainError> {
        Ok(None)
    }

    async fn try_rehydrate_state_at(
        &self,
        stream_id: &str,
        version: i64,
    ) -> Result<Rehydrated<AccountState>, DomainError> {
        Err(DomainError::VersionNotReached {
            stream_id: stream_id.to_owned(),
            requested: version,
            latest: 0,
        })
    }
}

/// A second aggregate whose only command shares its name with the
/// account's `Deposit`.
#[derive(Debug)]
struct Savings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SavingsDeposit {
    account_id: String,
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum SavingsCommand {
    Deposit(SavingsDeposit),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct InterestAccrued {
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum SavingsEvent {
    InterestAccrued(InterestAccrued),
}

impl Payload for SavingsCommand {
    const NAMESPACE: &'static str = Savings::STATE_KIND;
    const TYPE_NAMES: &'static [&'static str] = &["Deposit"];

    fn type_name(&self) -> &'static str {
        "Deposit"
    }
}

impl Payload for SavingsEvent {
    const NAMESPACE: &'static str = Savings::STATE_KIND;
    const TYPE_NAMES: &'static [&'static str] = &["InterestAccrued"];

    fn type_name(&self) -> &'static str {
        "InterestAccrued"
    }
}

impl Variant<SavingsCommand> for SavingsDeposit {
    const TYPE_NAME: &'static str = "Deposit";

    fn project(payload: &SavingsCommand) -> Option<&Self> {
        let SavingsCommand::Deposit(inner) = payload;
        Some(inner)
    }
}

impl Variant<SavingsEvent> for InterestAccrued {
    const TYPE_NAME: &'static str = "InterestAccrued";

    fn project(payload: &SavingsEvent) -> Option<&Self> {
        let SavingsEvent::InterestAccrued(inner) = payload;
        Some(inner)
    }
}

impl Aggregate for Savings {
    const STATE_KIND: &'static str = "Savings";
    type State = i64;
    type Command = SavingsCommand;
    type Event = SavingsEvent;

    fn seed(_stream_id: &str) -> i64 {
        0
    }

    fn target_stream(command: &SavingsCommand) -> String {
        let SavingsCommand::Deposit(deposit) = command;
        deposit.account_id.clone()
    }

    fn registry() -> DispatchRegistry<Self> {
        DispatchRegistry::new()
            .on_command::<SavingsDeposit, _>(|_state: &i64, command: &SavingsDeposit| {
                Ok(vec![SavingsEvent::InterestAccrued(InterestAccrued {
                    amount: command.amount,
                })])
            })
            .on_event::<InterestAccrued, _>(|state: i64, event: &InterestAccrued| {
                state + event.amount
            })
    }
}

// --- execute ---

#[tokio::test]
async fn test_command_on_new_stream_starts_from_seed() {
    // Arrange
    let f = fixture::<Account>(0);
    let message = command_message(&AccountCommand::open("acc-1", "alice"));

    // Act
    let appended = f.host.execute(&message).await.unwrap();

    // Assert
    assert_eq!(appended, 1);
    let state = f.state("acc-1").await.unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.state.owner.as_deref(), Some("alice"));
    assert_eq!(state.state.account_id, "acc-1");
}

#[tokio::test]
async fn test_appended_events_continue_the_command_causal_chain() {
    // Arrange
    let f = fixture::<Account>(0);
    let message = command_message(&AccountCommand::open("acc-1", "alice"));

    // Act
    f.host.execute(&message).await.unwrap();

    // Assert
    let stored = f.events.query_event_messages("acc-1").await.unwrap();
    assert_eq!(stored[0].process_id, message.process_id);
    assert_eq!(stored[0].predecessor_id, Some(message.id));
    assert_eq!(stored[0].initiator.as_deref(), Some("test-client"));
    assert_eq!(stored[0].payload, AccountEvent::opened("alice"));
    let published = f.bus.batches();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "acc-1");
    assert_eq!(published[0].1[0].predecessor_id, Some(message.id));
}

#[tokio::test]
async fn test_successive_commands_append_at_next_version() {
    // Arrange
    let f = fixture::<Account>(0);
    let commands = [
        AccountCommand::open("acc-1", "alice"),
        AccountCommand::deposit("acc-1", 50),
        AccountCommand::withdraw("acc-1", 20),
    ];

    // Act
    for command in &commands {
        f.host.execute(&command_message(command)).await.unwrap();
    }

    // Assert
    let state = f.state("acc-1").await.unwrap();
    assert_eq!(state.version, 3);
    assert_eq!(state.state.balance, 30);
    let versions: Vec<i64> = f
        .bus
        .batches()
        .iter()
        .flat_map(|(_, batch)| batch.iter().map(|m| m.payload.version))
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_rejected_command_appends_nothing() {
    // Arrange
    let f = fixture::<Account>(0);
    f.host
        .execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await
        .unwrap();

    // Act
    let result = f
        .host
        .execute(&command_message(&AccountCommand::withdraw("acc-1", 5)))
        .await;

    // Assert
    assert!(matches!(result, Err(DomainError::Rejected(_))));
    assert_eq!(f.state("acc-1").await.unwrap().version, 1);
    assert_eq!(f.bus.attempts(), 1);
}

#[tokio::test]
async fn test_command_producing_no_events_appends_nothing() {
    // Arrange
    let f = fixture::<Account>(0);
    f.host
        .execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await
        .unwrap();

    // Act
    let appended = f
        .host
        .execute(&command_message(&AccountCommand::withdraw("acc-1", 0)))
        .await
        .unwrap();

    // Assert
    assert_eq!(appended, 0);
    assert_eq!(f.state("acc-1").await.unwrap().version, 1);
    assert_eq!(f.bus.attempts(), 1);
}

#[tokio::test]
async fn test_unknown_command_type_is_unresolvable() {
    // Arrange
    let f = fixture::<Account>(0);
    let message = Envelope::originate(
        SerializedPayload {
            type_name: "Account.CloseAccount".into(),
            data: json!({"account_id": "acc-1"}),
        },
        None,
    );

    // Act
    let can_handle = f.host.can_handle(&message);
    let result = f.host.execute(&message).await;

    // Assert
    assert!(!can_handle);
    assert!(matches!(result, Err(DomainError::UnresolvableType(_))));
}

#[tokio::test]
async fn test_same_command_name_on_another_aggregate_is_not_handled() {
    // Arrange
    let account = fixture::<Account>(0);
    let savings = fixture::<Savings>(0);
    let message = command_message(&AccountCommand::deposit("acc-1", 5));

    // Act
    let account_handles = account.host.can_handle(&message);
    let savings_handles = savings.host.can_handle(&message);
    let result = savings.host.execute(&message).await;

    // Assert
    assert!(account_handles);
    assert!(!savings_handles);
    assert!(matches!(result, Err(DomainError::UnresolvableType(_))));
    assert!(savings.state("acc-1").await.is_none());
    assert_eq!(savings.bus.attempts(), 0);
}

#[tokio::test]
async fn test_command_is_routed_by_its_qualified_name() {
    // Arrange
    let savings = fixture::<Savings>(0);
    let command = SavingsCommand::Deposit(SavingsDeposit {
        account_id: "acc-1".into(),
        amount: 7,
    });
    let message = Envelope::originate(command.encode().unwrap(), None);

    // Act
    let can_handle = savings.host.can_handle(&message);
    let appended = savings.host.execute(&message).await.unwrap();

    // Assert
    assert_eq!(message.payload.type_name, "Savings.Deposit");
    assert!(can_handle);
    assert_eq!(appended, 1);
    let stored = savings
        .storage
        .query_by_stream_from_version("Savings", "acc-1", 1)
        .await
        .unwrap();
    assert_eq!(stored[0].event_type, "Savings.InterestAccrued");
    assert_eq!(savings.state("acc-1").await.unwrap().state, 7);
}

#[tokio::test]
async fn test_malformed_command_body_is_a_serialization_error() {
    // Arrange
    let f = fixture::<Account>(0);
    let message = Envelope::originate(
        SerializedPayload {
            type_name: "Account.Deposit".into(),
            data: json!({"account_id": "acc-1", "amount": "lots"}),
        },
        None,
    );

    // Act
    let result = f.host.execute(&message).await;

    // Assert
    assert!(matches!(result, Err(DomainError::Serialization(_))));
}

#[tokio::test]
async fn test_lost_race_surfaces_concurrency_conflict() {
    // Arrange
    let f = fixture::<Account>(0);
    f.host
        .execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await
        .unwrap();
    let stale = AggregateHost::new(
        Arc::clone(&f.registry),
        Arc::new(StaleRehydrator),
        Arc::clone(&f.events),
    );

    // Act
    let result = stale
        .execute(&command_message(&AccountCommand::open("acc-1", "mallory")))
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(DomainError::ConcurrencyConflict {
            expected: 0,
            actual: 1,
            ..
        })
    ));
    let state = f.state("acc-1").await.unwrap();
    assert_eq!(state.state.owner.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_publish_failure_is_reported_but_events_are_kept() {
    // Arrange
    let f = fixture::<Account>(1);

    // Act
    let result = f
        .host
        .execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await;
    let next = f
        .host
        .execute(&command_message(&AccountCommand::deposit("acc-1", 5)))
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(DomainError::TransientPublishFailure { .. })
    ));
    assert_eq!(next.unwrap(), 1);
    assert_eq!(f.state("acc-1").await.unwrap().version, 2);
    assert_eq!(f.bus.batches().len(), 2);
    assert!(
        f.storage
            .query_tickets_for("Account", "acc-1")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_host_over_snapshotted_rehydrator() {
    // Arrange
    let f = fixture::<Account>(0);
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let rehydrator = Arc::new(SnapshottedRehydrator::new(
        Arc::clone(&f.events),
        Arc::clone(&f.registry),
        snapshots.clone(),
    ));
    let host = AggregateHost::new(
        Arc::clone(&f.registry),
        rehydrator.clone(),
        Arc::clone(&f.events),
    );
    host.execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await
        .unwrap();
    host.execute(&command_message(&AccountCommand::deposit("acc-1", 8)))
        .await
        .unwrap();
    Snapshotter::new(rehydrator, snapshots)
        .take_snapshot("acc-1")
        .await
        .unwrap();

    // Act
    host.execute(&command_message(&AccountCommand::withdraw("acc-1", 3)))
        .await
        .unwrap();

    // Assert
    let state = f.state("acc-1").await.unwrap();
    assert_eq!(state.version, 3);
    assert_eq!(state.state.balance, 5);
}

// --- registration guards ---

#[tokio::test]
async fn test_unbound_command_is_unhandleable() {
    // Arrange
    let f = fixture::<MisregisteredAccount>(0);
    let message = command_message(&AccountCommand::withdraw("acc-1", 1));

    // Act
    let can_handle = f.host.can_handle(&message);
    let result = f.host.execute(&message).await;

    // Assert
    assert!(!can_handle);
    match result {
        Err(e @ DomainError::UnhandleableCommand(_)) => {
            assert_eq!(e.to_string(), "cannot execute command of type Withdraw");
        }
        other => panic!("expected UnhandleableCommand, got {other:?}"),
    }
}

#[tokio::test]
async fn test_produced_event_without_folder_is_never_appended() {
    // Arrange
    let f = fixture::<MisregisteredAccount>(0);
    f.host
        .execute(&command_message(&AccountCommand::open("acc-1", "alice")))
        .await
        .unwrap();
    let message = command_message(&AccountCommand::deposit("acc-1", 5));

    // Act
    let can_handle = f.host.can_handle(&message);
    let result = f.host.execute(&message).await;

    // Assert
    assert!(can_handle);
    match result {
        Err(e @ DomainError::UnhandleableEvent(_)) => {
            assert_eq!(e.to_string(), "cannot handle event of type Deposited");
        }
        other => panic!("expected UnhandleableEvent, got {other:?}"),
    }
    assert_eq!(f.state("acc-1").await.unwrap().version, 1);
    assert_eq!(f.bus.attempts(), 1);
}

// --- CommandHandler ---

#[tokio::test]
async fn test_host_runs_as_a_command_handler() {
    // Arrange
    let f = fixture::<Account>(0);
    let handler: &dyn CommandHandler = &f.host;
    let message = command_message(&AccountCommand::open("acc-1", "alice"));

    // Act
    let can_handle = handler.can_handle(&message);
    handler.handle(&message).await.unwrap();

    // Assert
    assert!(can_handle);
    assert_eq!(f.state("acc-1").await.unwrap().version, 1);
}
