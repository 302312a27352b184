use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque settings bag for the notifier.
///
/// Read here: `sender`, `recipients` (string or list), `subject`, and
/// `command` for [`crate::SendmailNotifier`]. Everything else, such as
/// `host`, `port` or `username`, is passed through untouched for other
/// notifier implementations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotifierConfig(pub Map<String, Value>);

impl NotifierConfig {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn sender(&self) -> Option<&str> {
        self.get_str("sender")
    }

    pub fn subject(&self) -> &str {
        self.get_str("subject").unwrap_or("Batch report")
    }

    pub fn recipients(&self) -> Vec<String> {
        match self.0.get("recipients") {
            Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            _ => vec![],
        }
    }
}

impl From<Map<String, Value>> for NotifierConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
