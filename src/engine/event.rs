//! Decoding of single lines from the engine's live event feed.
use serde_json::{Map, Value};

use super::parser::{first_string, get_string};

const TYPE_KEYS: &[&str] = &["Type", "type"];
const STATUS_KEYS: &[&str] = &["Status", "status", "Action"];
const ID_KEYS: &[&str] = &["ID", "Id", "id"];
const NAME_KEYS: &[&str] = &["Name", "name"];
const IMAGE_KEYS: &[&str] = &["Image", "image", "from"];

/// The only event type relevant to the container view.
pub const CONTAINER_EVENT_TYPE: &str = "container";

/// One decoded event line. Transient: applied and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveEvent {
    pub kind: String,
    /// Lifecycle verb, lower-cased.
    pub status: String,
    pub id: String,
    pub name: String,
    pub image: String,
}

impl LiveEvent {
    pub fn is_container_event(&self) -> bool {
        self.kind.eq_ignore_ascii_case(CONTAINER_EVENT_TYPE)
    }

    /// Events carrying neither id nor name cannot be correlated with any record.
    pub fn is_identifiable(&self) -> bool {
        !self.id.is_empty() || !self.name.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is not a JSON object")]
    NotAnObject,
}

/// Parses one non-blank line of the event feed.
///
/// Keys are looked up case-tolerantly across engine flavours. Name and image
/// fall back to `Actor.Attributes` when the top level does not carry them.
pub fn parse_event(line: &str) -> Result<LiveEvent, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(item) = value else {
        return Err(ParseError::NotAnObject);
    };

    let attributes = actor_attributes(&item);
    let mut name = first_string(&item, NAME_KEYS);
    let mut image = first_string(&item, IMAGE_KEYS);
    if let Some(attributes) = attributes {
        if name.is_empty() {
            name = get_string(attributes, "name");
        }
        if image.is_empty() {
            image = get_string(attributes, "image");
        }
    }

    Ok(LiveEvent {
        kind: first_string(&item, TYPE_KEYS),
        status: first_string(&item, STATUS_KEYS).to_lowercase(),
        id: first_string(&item, ID_KEYS),
        name,
        image,
    })
}

fn actor_attributes(item: &Map<String, Value>) -> Option<&Map<String, Value>> {
    item.get("Actor")?.get("Attributes")?.as_object()
}
