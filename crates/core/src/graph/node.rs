//! Node kinds and the per-kind payload.
//!
//! The payload is a tagged union keyed by [`NodeKind`]. Each variant spells
//! out its field set, and [`Payload::fields`] enumerates them exhaustively so
//! the diff engine can compare two nodes field by field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::NodeId;
use crate::errors::GraphError;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The kind tag of a dialogue node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Question,
    Answer,
    AutomatedAction,
    Transition,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Question => write!(f, "question"),
            Self::Answer => write!(f, "answer"),
            Self::AutomatedAction => write!(f, "automated_action"),
            Self::Transition => write!(f, "transition"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(Self::Question),
            "answer" => Ok(Self::Answer),
            "automated_action" => Ok(Self::AutomatedAction),
            "transition" => Ok(Self::Transition),
            other => Err(format!("unknown node kind '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// A game-state flag checked before, or set after, a node plays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flag {
    pub uuid: String,
    pub value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<i64>,
}

impl Flag {
    pub fn new(uuid: impl Into<String>, value: bool) -> Self {
        Self {
            uuid: uuid.into(),
            value,
            param: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload variants
// ---------------------------------------------------------------------------

/// Payload of spoken lines (questions and answers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogLine {
    /// Localized text handle.
    pub text: String,
    pub condition: Option<String>,
    pub check_flags: Vec<Flag>,
    pub set_flags: Vec<Flag>,
    pub animation: Option<String>,
}

impl DialogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            condition: None,
            check_flags: Vec::new(),
            set_flags: Vec::new(),
            animation: None,
        }
    }
}

/// Payload of a node that runs a script without player input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStep {
    pub script: String,
    pub condition: Option<String>,
    pub check_flags: Vec<Flag>,
    pub set_flags: Vec<Flag>,
}

/// Payload of a node that hands control to another scene or dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStep {
    pub destination: Option<String>,
    pub condition: Option<String>,
    pub check_flags: Vec<Flag>,
    pub set_flags: Vec<Flag>,
}

/// Kind-dependent node payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Question(DialogLine),
    Answer(DialogLine),
    AutomatedAction(ActionStep),
    Transition(TransitionStep),
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A diffable field of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Field {
    /// The kind tag; a change replaces the whole payload.
    Kind,
    Text,
    Condition,
    CheckFlags,
    SetFlags,
    Animation,
    Script,
    Destination,
    /// An unrecognized sub-field preserved verbatim.
    Opaque(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind => write!(f, "kind"),
            Self::Text => write!(f, "text"),
            Self::Condition => write!(f, "condition"),
            Self::CheckFlags => write!(f, "check_flags"),
            Self::SetFlags => write!(f, "set_flags"),
            Self::Animation => write!(f, "animation"),
            Self::Script => write!(f, "script"),
            Self::Destination => write!(f, "destination"),
            Self::Opaque(key) => write!(f, "opaque:{}", key),
        }
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = s.strip_prefix("opaque:") {
            return Ok(Self::Opaque(key.to_string()));
        }
        match s {
            "kind" => Ok(Self::Kind),
            "text" => Ok(Self::Text),
            "condition" => Ok(Self::Condition),
            "check_flags" => Ok(Self::CheckFlags),
            "set_flags" => Ok(Self::SetFlags),
            "animation" => Ok(Self::Animation),
            "script" => Ok(Self::Script),
            "destination" => Ok(Self::Destination),
            other => Err(format!("unknown field '{}'", other)),
        }
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.to_string()
    }
}

impl TryFrom<String> for Field {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The value of one field, as compared and written by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Optional field not set, or opaque key not present.
    Absent,
    Ref(String),
    Flags(Vec<Flag>),
    Payload(Box<Payload>),
    Opaque(Value),
}

impl FieldValue {
    fn from_optional(value: &Option<String>) -> Self {
        match value {
            Some(v) => Self::Ref(v.clone()),
            None => Self::Absent,
        }
    }

    fn into_required_ref(self, field: &Field) -> Result<String, GraphError> {
        match self {
            Self::Ref(v) => Ok(v),
            other => Err(invalid_value(field, &other)),
        }
    }

    fn into_optional_ref(self, field: &Field) -> Result<Option<String>, GraphError> {
        match self {
            Self::Ref(v) => Ok(Some(v)),
            Self::Absent => Ok(None),
            other => Err(invalid_value(field, &other)),
        }
    }

    fn into_flags(self, field: &Field) -> Result<Vec<Flag>, GraphError> {
        match self {
            Self::Flags(flags) => Ok(flags),
            Self::Absent => Ok(Vec::new()),
            other => Err(invalid_value(field, &other)),
        }
    }

    /// Short human-readable rendering used in logs and reports.
    pub fn summary(&self) -> String {
        match self {
            Self::Absent => "<absent>".to_string(),
            Self::Ref(v) => v.clone(),
            Self::Flags(flags) => format!("{} flag(s)", flags.len()),
            Self::Payload(payload) => format!("{} payload", payload.kind()),
            Self::Opaque(value) => value.to_string(),
        }
    }
}

fn invalid_value(field: &Field, value: &FieldValue) -> GraphError {
    GraphError::InvalidFieldValue {
        field: field.to_string(),
        detail: format!("unexpected value {}", value.summary()),
    }
}

// ---------------------------------------------------------------------------
// Payload accessors
// ---------------------------------------------------------------------------

impl Payload {
    pub fn question(text: impl Into<String>) -> Self {
        Self::Question(DialogLine::new(text))
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer(DialogLine::new(text))
    }

    pub fn action(script: impl Into<String>) -> Self {
        Self::AutomatedAction(ActionStep {
            script: script.into(),
            condition: None,
            check_flags: Vec::new(),
            set_flags: Vec::new(),
        })
    }

    pub fn transition(destination: Option<String>) -> Self {
        Self::Transition(TransitionStep {
            destination,
            condition: None,
            check_flags: Vec::new(),
            set_flags: Vec::new(),
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Question(_) => NodeKind::Question,
            Self::Answer(_) => NodeKind::Answer,
            Self::AutomatedAction(_) => NodeKind::AutomatedAction,
            Self::Transition(_) => NodeKind::Transition,
        }
    }

    /// Every field this kind carries, with its current value.
    pub fn fields(&self) -> Vec<(Field, FieldValue)> {
        match self {
            Self::Question(line) | Self::Answer(line) => vec![
                (Field::Text, FieldValue::Ref(line.text.clone())),
                (Field::Condition, FieldValue::from_optional(&line.condition)),
                (Field::CheckFlags, FieldValue::Flags(line.check_flags.clone())),
                (Field::SetFlags, FieldValue::Flags(line.set_flags.clone())),
                (Field::Animation, FieldValue::from_optional(&line.animation)),
            ],
            Self::AutomatedAction(step) => vec![
                (Field::Script, FieldValue::Ref(step.script.clone())),
                (Field::Condition, FieldValue::from_optional(&step.condition)),
                (Field::CheckFlags, FieldValue::Flags(step.check_flags.clone())),
                (Field::SetFlags, FieldValue::Flags(step.set_flags.clone())),
            ],
            Self::Transition(step) => vec![
                (Field::Destination, FieldValue::from_optional(&step.destination)),
                (Field::Condition, FieldValue::from_optional(&step.condition)),
                (Field::CheckFlags, FieldValue::Flags(step.check_flags.clone())),
                (Field::SetFlags, FieldValue::Flags(step.set_flags.clone())),
            ],
        }
    }

    /// Current value of `field`, or `None` when this kind has no such field.
    pub fn get(&self, field: &Field) -> Option<FieldValue> {
        if *field == Field::Kind {
            return Some(FieldValue::Payload(Box::new(self.clone())));
        }
        self.fields()
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, value)| value)
    }

    /// Overwrite one field. Writing [`Field::Kind`] replaces the payload.
    pub fn set(&mut self, field: &Field, value: FieldValue) -> Result<(), GraphError> {
        let kind = self.kind();
        match (self, field) {
            (payload, Field::Kind) => match value {
                FieldValue::Payload(replacement) => *payload = *replacement,
                other => return Err(invalid_value(field, &other)),
            },
            (Self::Question(line) | Self::Answer(line), Field::Text) => {
                line.text = value.into_required_ref(field)?;
            }
            (Self::Question(line) | Self::Answer(line), Field::Animation) => {
                line.animation = value.into_optional_ref(field)?;
            }
            (Self::AutomatedAction(step), Field::Script) => {
                step.script = value.into_required_ref(field)?;
            }
            (Self::Transition(step), Field::Destination) => {
                step.destination = value.into_optional_ref(field)?;
            }
            (payload, Field::Condition) => {
                *payload.condition_mut() = value.into_optional_ref(field)?;
            }
            (payload, Field::CheckFlags) => {
                *payload.check_flags_mut() = value.into_flags(field)?;
            }
            (payload, Field::SetFlags) => {
                *payload.set_flags_mut() = value.into_flags(field)?;
            }
            _ => {
                return Err(GraphError::FieldNotApplicable {
                    kind: kind.to_string(),
                    field: field.to_string(),
                })
            }
        }
        Ok(())
    }

    fn condition_mut(&mut self) -> &mut Option<String> {
        match self {
            Self::Question(line) | Self::Answer(line) => &mut line.condition,
            Self::AutomatedAction(step) => &mut step.condition,
            Self::Transition(step) => &mut step.condition,
        }
    }

    fn check_flags_mut(&mut self) -> &mut Vec<Flag> {
        match self {
            Self::Question(line) | Self::Answer(line) => &mut line.check_flags,
            Self::AutomatedAction(step) => &mut step.check_flags,
            Self::Transition(step) => &mut step.check_flags,
        }
    }

    fn set_flags_mut(&mut self) -> &mut Vec<Flag> {
        match self {
            Self::Question(line) | Self::Answer(line) => &mut line.set_flags,
            Self::AutomatedAction(step) => &mut step.set_flags,
            Self::Transition(step) => &mut step.set_flags,
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A dialogue node: identity, typed payload and opaque sub-fields.
///
/// Outgoing edges are not stored on the node; they live in the graph's
/// per-source edge table so cycles need no ownership between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub opaque: BTreeMap<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            opaque: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach an opaque sub-field.
    pub fn with_opaque(mut self, key: impl Into<String>, value: Value) -> Self {
        self.opaque.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    /// All payload fields followed by every opaque key.
    pub fn fields(&self) -> Vec<(Field, FieldValue)> {
        let mut fields = self.payload.fields();
        fields.extend(
            self.opaque
                .iter()
                .map(|(k, v)| (Field::Opaque(k.clone()), FieldValue::Opaque(v.clone()))),
        );
        fields
    }

    /// Current value of `field`. Opaque keys that are not present read as
    /// [`FieldValue::Absent`].
    pub fn field(&self, field: &Field) -> Option<FieldValue> {
        match field {
            Field::Opaque(key) => Some(
                self.opaque
                    .get(key)
                    .cloned()
                    .map_or(FieldValue::Absent, FieldValue::Opaque),
            ),
            other => self.payload.get(other),
        }
    }

    pub fn set_field(&mut self, field: &Field, value: FieldValue) -> Result<(), GraphError> {
        match (field, value) {
            (Field::Opaque(key), FieldValue::Absent) => {
                self.opaque.remove(key);
                Ok(())
            }
            (Field::Opaque(key), FieldValue::Opaque(v)) => {
                self.opaque.insert(key.clone(), v);
                Ok(())
            }
            (Field::Opaque(_), other) => Err(invalid_value(field, &other)),
            (other, value) => self.payload.set(other, value),
        }
    }
}
