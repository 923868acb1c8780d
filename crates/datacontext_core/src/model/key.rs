//! Record keys and key-assignment policies.

use rusqlite::types::Value;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

/// A primary key value.
///
/// Keys are stored in the `record_key` column using their SQL form, so two
/// keys are equal in the store exactly when their SQL values are equal.
pub trait RecordKey: Clone + PartialEq + Debug {
    fn to_sql(&self) -> Value;

    /// Builds the key for auto-numbered records; `None` when the key type
    /// cannot hold a number.
    fn from_auto_number(_next: i64) -> Option<Self> {
        None
    }

    /// Builds the key for UUID-keyed records; `None` when unsupported.
    fn from_uuid(_id: Uuid) -> Option<Self> {
        None
    }
}

impl RecordKey for String {
    fn to_sql(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_uuid(id: Uuid) -> Option<Self> {
        Some(id.to_string())
    }
}

impl RecordKey for i64 {
    fn to_sql(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_auto_number(next: i64) -> Option<Self> {
        Some(next)
    }
}

impl RecordKey for i32 {
    fn to_sql(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_auto_number(next: i64) -> Option<Self> {
        i32::try_from(next).ok()
    }
}

impl RecordKey for u32 {
    fn to_sql(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_auto_number(next: i64) -> Option<Self> {
        u32::try_from(next).ok()
    }
}

impl RecordKey for Uuid {
    fn to_sql(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_uuid(id: Uuid) -> Option<Self> {
        Some(id)
    }
}

/// Stable text identity of a stored key, used to match rows across fetches.
pub(crate) fn key_identity(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(number) => format!("i:{number}"),
        Value::Real(number) => format!("r:{number}"),
        Value::Text(text) => format!("t:{text}"),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("b:{hex}")
        }
    }
}

/// How a repository assigns keys to records it creates.
pub enum PrimaryKeyStrategy<K> {
    /// The caller sets the key.
    None,
    /// Current record count of the collection plus one. Not collision-free
    /// when records are created concurrently or deleted in between.
    AutoNumber,
    /// A fresh random UUID in canonical hyphenated form.
    Uuid,
    /// Caller-supplied generator.
    Custom(Box<dyn Fn() -> K>),
}

impl<K> PrimaryKeyStrategy<K> {
    pub fn custom(generator: impl Fn() -> K + 'static) -> Self {
        Self::Custom(Box::new(generator))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AutoNumber => "auto_number",
            Self::Uuid => "uuid",
            Self::Custom(_) => "custom",
        }
    }
}

impl<K: RecordKey> PrimaryKeyStrategy<K> {
    /// Whether `K` can represent keys produced by this strategy.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::AutoNumber => K::from_auto_number(1).is_some(),
            Self::Uuid => K::from_uuid(Uuid::nil()).is_some(),
            Self::None | Self::Custom(_) => true,
        }
    }
}

impl<K> Default for PrimaryKeyStrategy<K> {
    fn default() -> Self {
        Self::None
    }
}

impl<K> Debug for PrimaryKeyStrategy<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
