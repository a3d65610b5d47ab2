use serde::{Deserialize, Serialize};

/// Who a bearer token speaks for: a parent acting through the web UI, or a
/// monitored child device syncing in the background.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Device,
}
