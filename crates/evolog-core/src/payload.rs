//! Payload type registry.
//!
//! Command and event payloads are closed, per-aggregate enums. Each enum
//! lists the stable names it can carry (`TYPE_NAMES`) and maps values to
//! names (`type_name`), which together stand in for a name ⇄ type registry.
//! The default encoding expects the enum to be adjacently tagged with
//! `#[serde(tag = "type", content = "data")]`, so the variant name is the
//! registered name and the variant body becomes the stored data.
//!
//! On the wire and in storage a name is qualified by the payload's
//! namespace (`Account.Deposit`). Aggregate payloads use the aggregate's
//! state kind as their namespace, so two aggregates can both have a
//! `Deposit` command without either one resolving the other's.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

const TAG: &str = "type";
const CONTENT: &str = "data";
const SEPARATOR: char = '.';

/// A payload split into its qualified name and serialized body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPayload {
    /// Qualified type name, `<namespace>.<name>`.
    pub type_name: String,
    /// Serialized body.
    pub data: Value,
}

/// A closed set of command or event payload types.
pub trait Payload: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Qualifies every name of this payload. For aggregate commands and
    /// events this is the aggregate's state kind.
    const NAMESPACE: &'static str;

    /// Every type name this payload can carry, unqualified.
    const TYPE_NAMES: &'static [&'static str];

    /// The registered name of this value's type, unqualified.
    fn type_name(&self) -> &'static str;

    /// The name this value is stored and sent under.
    fn qualified_name(&self) -> String {
        qualify::<Self>(self.type_name())
    }

    /// Splits the payload into its qualified name and serialized body.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnresolvableType` if the value's name is not
    /// registered, or `DomainError::Serialization` if the body cannot be
    /// serialized.
    fn encode(&self) -> Result<SerializedPayload, DomainError> {
        let type_name = registered_name::<Self>(self.type_name())?;
        let value = serde_json::to_value(self)
            .map_err(|e| DomainError::Serialization(format!("{type_name}: {e}")))?;
        let Value::Object(mut map) = value else {
            return Err(DomainError::Serialization(format!(
                "{type_name} did not serialize to a tagged object"
            )));
        };
        Ok(SerializedPayload {
            type_name: qualify::<Self>(type_name),
            data: map.remove(CONTENT).unwrap_or(Value::Null),
        })
    }

    /// Rebuilds a payload from its qualified name and serialized body.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnresolvableType` for a name outside this
    /// payload's namespace or not registered in it, or
    /// `DomainError::Serialization` if the body does not match the type.
    fn decode(serialized: &SerializedPayload) -> Result<Self, DomainError> {
        let type_name = resolve_name::<Self>(&serialized.type_name)?;
        let mut map = serde_json::Map::new();
        map.insert(TAG.to_owned(), Value::String(type_name.to_owned()));
        map.insert(CONTENT.to_owned(), serialized.data.clone());
        serde_json::from_value(Value::Object(map))
            .map_err(|e| DomainError::Serialization(format!("{type_name}: {e}")))
    }
}

/// Qualifies a name with the payload's namespace.
#[must_use]
pub fn qualify<P: Payload>(type_name: &str) -> String {
    format!("{}{SEPARATOR}{type_name}", P::NAMESPACE)
}

/// Looks an unqualified name up in the payload's registered names.
///
/// # Errors
///
/// Returns `DomainError::UnresolvableType` if the name is not registered.
pub fn registered_name<P: Payload>(name: &str) -> Result<&'static str, DomainError> {
    P::TYPE_NAMES
        .iter()
        .copied()
        .find(|registered| *registered == name)
        .ok_or_else(|| {
            DomainError::UnresolvableType(format!(
                "{name} is not registered in {}",
                P::NAMESPACE
            ))
        })
}

/// Resolves a qualified name to the registered, unqualified name.
///
/// # Errors
///
/// Returns `DomainError::UnresolvableType` if the name belongs to another
/// namespace or is not registered in this one.
pub fn resolve_name<P: Payload>(qualified: &str) -> Result<&'static str, DomainError> {
    let name = qualified
        .strip_prefix(P::NAMESPACE)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .ok_or_else(|| {
            DomainError::UnresolvableType(format!(
                "{qualified} is not in the {} namespace",
                P::NAMESPACE
            ))
        })?;
    registered_name::<P>(name)
}

/// One concrete payload type inside a payload enum.
///
/// Lets a dispatch registry bind a function to a single command or event
/// type while still storing it against the enum.
pub trait Variant<P: Payload>: Sized + 'static {
    /// The registered, unqualified name of this variant. Must match what
    /// `P::type_name` reports for values of this variant.
    const TYPE_NAME: &'static str;

    /// Borrows the variant out of the enum, if the enum holds it.
    fn project(payload: &P) -> Option<&Self>;
}
