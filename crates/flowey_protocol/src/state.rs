//! The versioned state document.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Version;
use serde_json::{Map, Value};

/// Name of the mandatory version entry.
pub const VERSION_FIELD: &str = "version";

/// A user's state document.
///
/// An arbitrary JSON object carrying a mandatory integer `version` entry in
/// `[0, 1_000_000)`. Two states are equal when their objects are deeply equal,
/// the `version` entry included.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    fields: Map<String, Value>,
    version: Version,
}

impl State {
    /// Parses a state from its JSON text.
    ///
    /// # Errors
    ///
    /// Fails if the text is not a JSON object with a valid `version` entry.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    /// Builds a state from an already parsed object.
    ///
    /// # Errors
    ///
    /// Fails if the object lacks a valid `version` entry.
    pub fn from_fields(fields: Map<String, Value>) -> ProtocolResult<Self> {
        let raw = fields
            .get(VERSION_FIELD)
            .ok_or(ProtocolError::MissingVersion)?;
        let number = raw
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidVersion(raw.to_string()))?;
        let version = Version::new(number).ok_or(ProtocolError::VersionOutOfRange(number))?;
        Ok(Self { fields, version })
    }

    /// Returns the version of this state.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the full object, `version` included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a single entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns this state with its version replaced.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.fields
            .insert(VERSION_FIELD.to_string(), Value::from(version.get()));
        self.version = version;
        self
    }

    /// Returns this state with its version advanced by one (wrapping).
    #[must_use]
    pub fn next_version(self) -> Self {
        let next = self.version.next();
        self.with_version(next)
    }

    /// Serializes the state to JSON text.
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

impl Default for State {
    /// The state of a user that has never written one: `{"version": 0}`.
    fn default() -> Self {
        let mut fields = Map::new();
        fields.insert(VERSION_FIELD.to_string(), Value::from(0u32));
        Self {
            fields,
            version: Version::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_state() {
        let state = State::parse(r#"{"version":5,"text":"a"}"#).unwrap();
        assert_eq!(state.version().get(), 5);
        assert_eq!(state.get("text"), Some(&Value::from("a")));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            State::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert_eq!(State::parse("[1,2]"), Err(ProtocolError::NotAnObject));
        assert_eq!(State::parse("5"), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn parse_rejects_bad_versions() {
        assert_eq!(
            State::parse(r#"{"text":"a"}"#),
            Err(ProtocolError::MissingVersion)
        );
        assert!(matches!(
            State::parse(r#"{"version":"5"}"#),
            Err(ProtocolError::InvalidVersion(_))
        ));
        assert!(matches!(
            State::parse(r#"{"version":-1}"#),
            Err(ProtocolError::InvalidVersion(_))
        ));
        assert!(matches!(
            State::parse(r#"{"version":1.5}"#),
            Err(ProtocolError::InvalidVersion(_))
        ));
        assert_eq!(
            State::parse(r#"{"version":1000000}"#),
            Err(ProtocolError::VersionOutOfRange(1_000_000))
        );
    }

    #[test]
    fn equality_is_deep_and_order_independent() {
        let a = State::parse(r#"{"version":1,"nested":{"x":[1,2]},"flag":true}"#).unwrap();
        let b = State::parse(r#"{"flag":true,"nested":{"x":[1,2]},"version":1}"#).unwrap();
        let c = State::parse(r#"{"flag":true,"nested":{"x":[2,1]},"version":1}"#).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn version_participates_in_equality() {
        let a = State::parse(r#"{"version":1,"text":"a"}"#).unwrap();
        let b = State::parse(r#"{"version":2,"text":"a"}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn next_version_updates_field() {
        let state = State::parse(r#"{"version":999999,"text":"z"}"#).unwrap();
        let next = state.next_version();
        assert_eq!(next.version(), Version::ZERO);
        assert_eq!(next.get(VERSION_FIELD), Some(&Value::from(0u32)));
        assert_eq!(next.get("text"), Some(&Value::from("z")));
    }

    #[test]
    fn to_json_reparses_to_equal_state() {
        let state = State::parse(r#"{"version":7,"items":[1,"two",null]}"#).unwrap();
        assert_eq!(State::parse(&state.to_json()).unwrap(), state);
    }

    #[test]
    fn default_is_version_zero() {
        let state = State::default();
        assert_eq!(state.version(), Version::ZERO);
        assert_eq!(state, State::parse(r#"{"version":0}"#).unwrap());
    }
}
