//! Transferable extraction over payload graphs.
//!
//! The extractor walks a payload tree and collects its handoff-capable
//! buffers in document order. The walk depth is bounded so pathological
//! inputs cannot stall a dispatch; buffers below the cutoff are simply not
//! reported as transferables.

use crate::payload::Payload;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum nesting depth visited by the extractor.
pub const MAX_TRANSFER_WALK_DEPTH: usize = 32;

/// Handoff behavior for one direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    /// Hand buffer ownership to the peer (zero-copy).
    Transfer,
    /// Deep-copy buffers so the sender retains independent storage.
    Keep,
}

/// Per-call override of the extractor's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOverride {
    /// Override for the argument direction.
    pub args: Option<TransferMode>,
    /// Override for the result direction.
    pub result: Option<TransferMode>,
}

impl TransferOverride {
    /// Effective argument mode (defaults to transfer).
    #[must_use]
    pub fn args_mode(&self) -> TransferMode {
        self.args.unwrap_or(TransferMode::Transfer)
    }

    /// Effective result mode (defaults to transfer).
    #[must_use]
    pub fn result_mode(&self) -> TransferMode {
        self.result.unwrap_or(TransferMode::Transfer)
    }
}

/// The ordered handoff set computed for one payload.
#[derive(Debug, Clone, Default)]
pub struct TransferList {
    buffers: Vec<Bytes>,
    truncated: bool,
}

impl TransferList {
    /// Number of buffers in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns true when no buffers were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total payload bytes across the set.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// True when the walk hit the depth bound and may have missed buffers.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    /// Iterate the collected buffers in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.buffers.iter()
    }
}

/// Walk `payload` and collect its transferable buffers in document order.
///
/// O(n) in the payload graph, bounded to [`MAX_TRANSFER_WALK_DEPTH`] levels.
#[must_use]
pub fn extract_transferables(payload: &Payload) -> TransferList {
    let mut list = TransferList::default();
    walk(payload, 0, &mut list);
    list
}

fn walk(payload: &Payload, depth: usize, list: &mut TransferList) {
    if depth > MAX_TRANSFER_WALK_DEPTH {
        list.truncated = true;
        return;
    }
    match payload {
        Payload::Blob(buffer) => list.buffers.push(buffer.clone()),
        Payload::List(items) => {
            for item in items {
                walk(item, depth + 1, list);
            }
        },
        Payload::Map(entries) => {
            for value in entries.values() {
                walk(value, depth + 1, list);
            }
        },
        Payload::Null
        | Payload::Bool(_)
        | Payload::Int(_)
        | Payload::Float(_)
        | Payload::Text(_) => {},
    }
}

/// Deep-copy every buffer in `payload` so the returned tree owns storage
/// independent of the original. Used for `keep`-mode handoff.
#[must_use]
pub fn detach_blobs(payload: &Payload) -> Payload {
    match payload {
        Payload::Blob(buffer) => Payload::Blob(Bytes::copy_from_slice(buffer)),
        Payload::List(items) => Payload::List(items.iter().map(detach_blobs).collect()),
        Payload::Map(entries) => Payload::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), detach_blobs(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extracts_buffers_in_document_order() {
        let payload = Payload::map([
            ("a", Payload::blob(vec![1u8])),
            (
                "b",
                Payload::List(vec![Payload::from(1), Payload::blob(vec![2u8, 3])]),
            ),
        ]);

        let list = extract_transferables(&payload);
        assert_eq!(list.len(), 2);
        assert_eq!(list.total_bytes(), 3);
        assert!(!list.truncated());

        let sizes: Vec<usize> = list.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn walk_depth_is_bounded() {
        let mut payload = Payload::blob(vec![9u8]);
        for _ in 0..(MAX_TRANSFER_WALK_DEPTH + 4) {
            payload = Payload::List(vec![payload]);
        }

        let list = extract_transferables(&payload);
        assert!(list.is_empty());
        assert!(list.truncated());
    }

    #[test]
    fn detach_blobs_copies_storage() {
        let shared = Bytes::from_static(b"shared");
        let payload = Payload::List(vec![Payload::Blob(shared.clone()), Payload::from(1)]);

        let detached = detach_blobs(&payload);
        let Payload::List(items) = &detached else {
            panic!("expected list");
        };
        let Some(Payload::Blob(copy)) = items.first() else {
            panic!("expected blob");
        };

        assert_eq!(copy.as_ref(), shared.as_ref());
        // Independent allocation, not another handle on the same storage.
        assert_ne!(copy.as_ptr(), shared.as_ptr());
    }

    fn arbitrary_payload(depth: u32) -> BoxedStrategy<Payload> {
        let leaf = prop_oneof![
            Just(Payload::Null),
            any::<bool>().prop_map(Payload::Bool),
            any::<i64>().prop_map(Payload::Int),
            ".{0,8}".prop_map(|text| Payload::text(&text)),
            proptest::collection::vec(any::<u8>(), 0..16)
                .prop_map(|bytes| Payload::blob(bytes)),
        ];
        if depth == 0 {
            return leaf.boxed();
        }
        let inner = arbitrary_payload(depth - 1);
        prop_oneof![
            leaf,
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Payload::List),
            proptest::collection::btree_map("[a-z]{1,4}".prop_map(Box::from), inner, 0..4)
                .prop_map(Payload::Map),
        ]
        .boxed()
    }

    fn count_blobs(payload: &Payload) -> usize {
        match payload {
            Payload::Blob(_) => 1,
            Payload::List(items) => items.iter().map(count_blobs).sum(),
            Payload::Map(entries) => entries.values().map(count_blobs).sum(),
            _ => 0,
        }
    }

    proptest! {
        #[test]
        fn extraction_finds_every_blob_within_depth(payload in arbitrary_payload(4)) {
            let list = extract_transferables(&payload);
            // Generated trees stay far below the walk bound.
            prop_assert!(!list.truncated());
            prop_assert_eq!(list.len(), count_blobs(&payload));
        }
    }
}
