//! Raw and decoded chain values.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::identity::{Identifiable, Identifier};

/// Raw bytes observed for one storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainStorageItem {
    pub identifier: Identifier,
    pub data: Vec<u8>,
}

impl ChainStorageItem {
    pub fn new(identifier: impl Into<Identifier>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            data: data.into(),
        }
    }
}

impl Identifiable for ChainStorageItem {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// A single change delivered by a storage-change stream or applied to a
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataProviderChange<T> {
    Insert(T),
    Update(T),
    Delete(Identifier),
}

impl<T> DataProviderChange<T> {
    /// The new item carried by an insert or update.
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Insert(item) | Self::Update(item) => Some(item),
            Self::Delete(_) => None,
        }
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Insert(item) | Self::Update(item) => Some(item),
            Self::Delete(_) => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }
}

/// Fold a batch of changes left to right into its final value.
///
/// Inserts and updates replace the candidate, deletes clear it. A delete
/// followed by an insert in the same batch resolves to the insert.
/// Returns `None` for an empty batch so callers can tell "nothing
/// happened" apart from "deleted" (`Some(None)`).
pub fn fold_changes<T, I>(changes: I) -> Option<Option<T>>
where
    I: IntoIterator<Item = DataProviderChange<T>>,
{
    changes
        .into_iter()
        .fold(None, |_, change| Some(change.into_item()))
}

/// Latest raw state held for an identifier.
///
/// Payload and error are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RawItem {
    /// Deleted, or nothing observed yet.
    #[default]
    Absent,
    Present(ChainStorageItem),
    Failed(StreamError),
}

impl RawItem {
    pub fn from_option(item: Option<ChainStorageItem>) -> Self {
        match item {
            Some(item) => Self::Present(item),
            None => Self::Absent,
        }
    }

    pub fn payload(&self) -> Option<&ChainStorageItem> {
        match self {
            Self::Present(item) => Some(item),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Value comparison against an incoming payload, ignoring errors.
    pub fn holds(&self, item: Option<&ChainStorageItem>) -> bool {
        match (self, item) {
            (Self::Absent, None) => true,
            (Self::Present(current), Some(new)) => current == new,
            _ => false,
        }
    }
}

/// A decoded value tagged with the identifier it was decoded for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedValue<T> {
    pub identifier: Identifier,
    pub item: T,
}

impl<T> DecodedValue<T> {
    pub fn new(identifier: impl Into<Identifier>, item: T) -> Self {
        Self {
            identifier: identifier.into(),
            item,
        }
    }

    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T> Identifiable for DecodedValue<T> {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(data: &[u8]) -> ChainStorageItem {
        ChainStorageItem::new("X", data.to_vec())
    }

    #[test]
    fn test_fold_last_update_wins() {
        let folded = fold_changes(vec![
            DataProviderChange::Insert(item(b"1")),
            DataProviderChange::Update(item(b"2")),
        ]);
        assert_eq!(folded, Some(Some(item(b"2"))));
    }

    #[test]
    fn test_fold_delete_clears() {
        let folded = fold_changes(vec![
            DataProviderChange::Insert(item(b"1")),
            DataProviderChange::Delete(Identifier::from("X")),
        ]);
        assert_eq!(folded, Some(None));
    }

    #[test]
    fn test_fold_insert_after_delete_wins() {
        let folded = fold_changes(vec![
            DataProviderChange::Delete(Identifier::from("X")),
            DataProviderChange::Insert(item(b"3")),
        ]);
        assert_eq!(folded, Some(Some(item(b"3"))));
    }

    #[test]
    fn test_fold_empty_batch() {
        let folded = fold_changes(Vec::<DataProviderChange<ChainStorageItem>>::new());
        assert_eq!(folded, None);
    }

    #[test]
    fn test_raw_item_holds() {
        assert!(RawItem::Absent.holds(None));
        assert!(RawItem::Present(item(b"a")).holds(Some(&item(b"a"))));
        assert!(!RawItem::Present(item(b"a")).holds(Some(&item(b"b"))));
        assert!(!RawItem::Present(item(b"a")).holds(None));

        let failed = RawItem::Failed(StreamError::TransportFailed {
            identifier: Identifier::from("X"),
            reason: "down".to_string(),
        });
        assert!(!failed.holds(None));
        assert!(failed.payload().is_none());
        assert!(failed.error().is_some());
    }

    #[test]
    fn test_decoded_value_equality_includes_identifier() {
        assert_eq!(DecodedValue::new("X", 1u32), DecodedValue::new("X", 1u32));
        assert_ne!(DecodedValue::new("X", 1u32), DecodedValue::new("Y", 1u32));
    }

    fn arb_change() -> impl Strategy<Value = DataProviderChange<ChainStorageItem>> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..8)
                .prop_map(|data| DataProviderChange::Insert(ChainStorageItem::new("X", data))),
            prop::collection::vec(any::<u8>(), 0..8)
                .prop_map(|data| DataProviderChange::Update(ChainStorageItem::new("X", data))),
            Just(DataProviderChange::Delete(Identifier::from("X"))),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The folded value of a non-empty batch is always its last change.
        #[test]
        fn prop_fold_matches_last_change(changes in prop::collection::vec(arb_change(), 1..16)) {
            let expected = changes.last().cloned().and_then(DataProviderChange::into_item);
            prop_assert_eq!(fold_changes(changes), Some(expected));
        }
    }
}
