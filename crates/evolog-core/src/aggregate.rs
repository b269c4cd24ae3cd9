//! Aggregate abstraction and its dispatch registry.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DomainError;
use crate::payload::{Payload, Variant};

/// An aggregate kind: the state a stream folds into, and the commands and
/// events it understands.
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// Stable name of the state kind. Part of every stored event's key.
    const STATE_KIND: &'static str;

    /// The folded state.
    type State: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Closed set of commands this aggregate accepts.
    type Command: Payload;

    /// Closed set of events this aggregate produces and folds.
    type Event: Payload;

    /// State of a stream before its first event.
    fn seed(stream_id: &str) -> Self::State;

    /// The stream a command is addressed to.
    fn target_stream(command: &Self::Command) -> String;

    /// Binds command producers and event folders.
    fn registry() -> DispatchRegistry<Self>;
}

type Producer<A> = Box<
    dyn Fn(
            &<A as Aggregate>::State,
            &<A as Aggregate>::Command,
        ) -> Result<Vec<<A as Aggregate>::Event>, DomainError>
        + Send
        + Sync,
>;

type Folder<A> = Box<
    dyn Fn(
            <A as Aggregate>::State,
            &<A as Aggregate>::Event,
        ) -> Result<<A as Aggregate>::State, DomainError>
        + Send
        + Sync,
>;

/// Registration table mapping command types to event producers and event
/// types to state folders, keyed by registered type name.
///
/// Built once per aggregate kind. Lookups that miss are reported as
/// `UnhandleableCommand` / `UnhandleableEvent`.
pub struct DispatchRegistry<A: Aggregate> {
    producers: HashMap<&'static str, Producer<A>>,
    folders: HashMap<&'static str, Folder<A>>,
}

impl<A: Aggregate> DispatchRegistry<A> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            producers: HashMap::new(),
            folders: HashMap::new(),
        }
    }

    /// Binds the command type `C` to a producer of candidate events.
    #[must_use]
    pub fn on_command<C, F>(mut self, producer: F) -> Self
    where
        C: Variant<A::Command>,
        F: Fn(&A::State, &C) -> Result<Vec<A::Event>, DomainError> + Send + Sync + 'static,
    {
        self.producers.insert(
            C::TYPE_NAME,
            Box::new(move |state, command| {
                let command = C::project(command).ok_or_else(|| {
                    DomainError::UnhandleableCommand(command.type_name().to_owned())
                })?;
                producer(state, command)
            }),
        );
        self
    }

    /// Binds the event type `E` to a state folder.
    #[must_use]
    pub fn on_event<E, F>(mut self, folder: F) -> Self
    where
        E: Variant<A::Event>,
        F: Fn(A::State, &E) -> A::State + Send + Sync + 'static,
    {
        self.folders.insert(
            E::TYPE_NAME,
            Box::new(move |state, event| {
                let event = E::project(event).ok_or_else(|| {
                    DomainError::UnhandleableEvent(event.type_name().to_owned())
                })?;
                Ok(folder(state, event))
            }),
        );
        self
    }

    /// Whether a producer is bound for the command type name.
    #[must_use]
    pub fn handles_command(&self, type_name: &str) -> bool {
        self.producers.contains_key(type_name)
    }

    /// Whether a folder is bound for the event type name.
    #[must_use]
    pub fn handles_event(&self, type_name: &str) -> bool {
        self.folders.contains_key(type_name)
    }

    /// Runs the producer bound to the command's type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnhandleableCommand` if no producer is bound, or
    /// whatever the producer returns.
    pub fn produce(
        &self,
        state: &A::State,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DomainError> {
        let type_name = command.type_name();
        let producer = self
            .producers
            .get(type_name)
            .ok_or_else(|| DomainError::UnhandleableCommand(type_name.to_owned()))?;
        producer(state, command)
    }

    /// Applies one event to the state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnhandleableEvent` if no folder is bound.
    pub fn fold(&self, state: A::State, event: &A::Event) -> Result<A::State, DomainError> {
        let type_name = event.type_name();
        let folder = self
            .folders
            .get(type_name)
            .ok_or_else(|| DomainError::UnhandleableEvent(type_name.to_owned()))?;
        folder(state, event)
    }

    /// Checks that every event could be folded by this aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnhandleableEvent` naming the first event type
    /// without a folder.
    pub fn ensure_foldable(&self, events: &[A::Event]) -> Result<(), DomainError> {
        match events.iter().find(|e| !self.handles_event(e.type_name())) {
            Some(event) => Err(DomainError::UnhandleableEvent(
                event.type_name().to_owned(),
            )),
            None => Ok(()),
        }
    }
}

impl<A: Aggregate> Default for DispatchRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> fmt::Debug for DispatchRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.producers.keys().collect();
        let mut events: Vec<_> = self.folders.keys().collect();
        commands.sort();
        events.sort();
        f.debug_struct("DispatchRegistry")
            .field("state_kind", &A::STATE_KIND)
            .field("commands", &commands)
            .field("events", &events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Bump {
        id: String,
        by: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Reset {
        id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum TallyCommand {
        Bump(Bump),
        Reset(Reset),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Bumped {
        by: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum TallyEvent {
        Bumped(Bumped),
        Cleared,
    }

    impl Payload for TallyCommand {
        const NAMESPACE: &'static str = "Tally";
        const TYPE_NAMES: &'static [&'static str] = &["Bump", "Reset"];

        fn type_name(&self) -> &'static str {
            match self {
                Self::Bump(_) => "Bump",
                Self::Reset(_) => "Reset",
            }
        }
    }

    impl Payload for TallyEvent {
        const NAMESPACE: &'static str = "Tally";
        const TYPE_NAMES: &'static [&'static str] = &["Bumped", "Cleared"];

        fn type_name(&self) -> &'static str {
            match self {
                Self::Bumped(_) => "Bumped",
                Self::Cleared => "Cleared",
            }
        }
    }

    impl Variant<TallyCommand> for Bump {
        const TYPE_NAME: &'static str = "Bump";

        fn project(payload: &TallyCommand) -> Option<&Self> {
            match payload {
                TallyCommand::Bump(c) => Some(c),
                TallyCommand::Reset(_) => None,
            }
        }
    }

    impl Variant<TallyEvent> for Bumped {
        const TYPE_NAME: &'static str = "Bumped";

        fn project(payload: &TallyEvent) -> Option<&Self> {
            match payload {
                TallyEvent::Bumped(e) => Some(e),
                TallyEvent::Cleared => None,
            }
        }
    }

    struct Tally;

    impl Aggregate for Tally {
        const STATE_KIND: &'static str = "Tally";
        type State = i64;
        type Command = TallyCommand;
        type Event = TallyEvent;

        fn seed(_stream_id: &str) -> i64 {
            0
        }

        fn target_stream(command: &TallyCommand) -> String {
            match command {
                TallyCommand::Bump(c) => c.id.clone(),
                TallyCommand::Reset(c) => c.id.clone(),
            }
        }

        fn registry() -> DispatchRegistry<Self> {
            DispatchRegistry::new()
                .on_command::<Bump, _>(|_state: &i64, c: &Bump| {
                    Ok(vec![TallyEvent::Bumped(Bumped { by: c.by })])
                })
                .on_event::<Bumped, _>(|state: i64, e: &Bumped| state + e.by)
        }
    }

    #[test]
    fn test_produce_and_fold_through_bindings() {
        let registry = Tally::registry();
        let command = TallyCommand::Bump(Bump {
            id: "t-1".into(),
            by: 3,
        });

        let events = registry.produce(&Tally::seed("t-1"), &command).unwrap();
        let state = registry.fold(0, &events[0]).unwrap();

        assert_eq!(state, 3);
    }

    #[test]
    fn test_unbound_command_is_unhandleable() {
        let registry = Tally::registry();
        let command = TallyCommand::Reset(Reset { id: "t-1".into() });

        let result = registry.produce(&0, &command);

        match result {
            Err(DomainError::UnhandleableCommand(name)) => assert_eq!(name, "Reset"),
            other => panic!("expected UnhandleableCommand, got {other:?}"),
        }
    }

    #[test]
    fn test_unbound_event_is_unhandleable() {
        let registry = Tally::registry();

        let fold = registry.fold(0, &TallyEvent::Cleared);
        let check = registry.ensure_foldable(&[
            TallyEvent::Bumped(Bumped { by: 1 }),
            TallyEvent::Cleared,
        ]);

        assert!(matches!(fold, Err(DomainError::UnhandleableEvent(_))));
        match check {
            Err(DomainError::UnhandleableEvent(name)) => assert_eq!(name, "Cleared"),
            other => panic!("expected UnhandleableEvent, got {other:?}"),
        }
    }

    #[test]
    fn test_binding_lookup_by_name() {
        let registry = Tally::registry();

        assert!(registry.handles_command("Bump"));
        assert!(!registry.handles_command("Reset"));
        assert!(registry.handles_event("Bumped"));
        assert!(!registry.handles_event("Cleared"));
    }
}
