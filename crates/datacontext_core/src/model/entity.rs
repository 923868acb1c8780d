//! Entity capability trait.

use crate::model::key::RecordKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record kind persisted as one JSON document per row.
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Client {
///     client_id: Option<String>,
///     name: Option<String>,
/// }
///
/// impl Entity for Client {
///     type Key = String;
///     const COLLECTION: &'static str = "Client";
///     const KEY_FIELD: &'static str = "client_id";
///
///     fn key(&self) -> Option<String> {
///         self.client_id.clone()
///     }
///
///     fn set_key(&mut self, key: String) {
///         self.client_id = Some(key);
///     }
/// }
/// ```
pub trait Entity: Default + Serialize + DeserializeOwned {
    type Key: RecordKey;

    /// Default collection name; repositories may override it.
    const COLLECTION: &'static str;

    /// Serialized name of the key field, usable in predicates and sort keys.
    const KEY_FIELD: &'static str;

    /// Current key, `None` while unassigned.
    fn key(&self) -> Option<Self::Key>;

    fn set_key(&mut self, key: Self::Key);
}
