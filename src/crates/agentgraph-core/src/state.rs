//! Typed graph state and per-field reducers
//!
//! Graph state is a plain Rust struct. Nodes never mutate it directly: they
//! return a partial *update*, and the executor folds that update into the
//! state one field at a time, using the merge policy declared for the field.
//!
//! ```text
//!   state ──▶ node ──▶ update { documents: Some(..), attempts: None, .. }
//!     ▲                                │
//!     └──── Reducer::reduce per field ◀┘
//! ```
//!
//! The merge policy is a type implementing [`Reducer`] for the field's type.
//! Because the policy is chosen at compile time, every writer of a field gets
//! identical merge behavior and an update can only carry values the policy
//! accepts.
//!
//! # Policies
//!
//! | Policy | Field type | Update type | Effect |
//! |--------|------------|-------------|--------|
//! | [`Overwrite`] | any `T` | `T` | replace |
//! | [`Append`] | `Vec<T>` | `Vec<T>` | extend |
//! | [`AddMessages`] | `Vec<Message>` | `Vec<Message>` | append, replacing equal ids |
//! | [`AppendOrOverwrite`] | `Vec<T>` | [`ListUpdate<T>`] | extend or replace |
//! | [`Sum`] | numeric `T` | `T` | add |
//! | [`Merge`] | `HashMap<String, V>` | `HashMap<String, V>` | insert keys |
//!
//! When parallel branches write the same field in one superstep, the
//! executor applies their updates in task order. `Append`/`AddMessages`
//! then yield the same multiset regardless of which branch finished first,
//! and `Overwrite` keeps the value of the highest-indexed branch.
//!
//! # Declaring a state
//!
//! The [`graph_state!`](crate::graph_state) macro generates the state
//! struct, its update struct and the [`GraphState`] impl:
//!
//! ```rust
//! use agentgraph_core::graph_state;
//! use agentgraph_core::state::{Append, GraphState, Overwrite};
//!
//! graph_state! {
//!     /// State of a small counter graph
//!     pub struct CounterState (CounterUpdate) {
//!         pub label: String => Overwrite,
//!         pub history: Vec<u32> => Append,
//!     }
//! }
//!
//! let mut state = CounterState::default();
//! state.apply(CounterUpdate::default().label("a".to_string()).history(vec![1]));
//! state.apply(CounterUpdate::default().history(vec![2]));
//! assert_eq!(state.label, "a");
//! assert_eq!(state.history, vec![1, 2]);
//! ```

use crate::messages::{add_messages, Message};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::AddAssign;

/// Values that can flow through state and updates
pub trait StateValue: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> StateValue for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Merge policy for one state field of type `T`
pub trait Reducer<T> {
    /// What a node may write to the field
    type Update: StateValue;

    /// Fold `update` into `current`
    fn reduce(current: &mut T, update: Self::Update);
}

/// Replace the current value
#[derive(Debug, Clone, Copy, Default)]
pub struct Overwrite;

impl<T: StateValue> Reducer<T> for Overwrite {
    type Update = T;

    fn reduce(current: &mut T, update: T) {
        *current = update;
    }
}

/// Extend a list with the written items
#[derive(Debug, Clone, Copy, Default)]
pub struct Append;

impl<T: StateValue> Reducer<Vec<T>> for Append {
    type Update = Vec<T>;

    fn reduce(current: &mut Vec<T>, update: Vec<T>) {
        current.extend(update);
    }
}

/// Conversation merge: append, but a message whose id already exists
/// replaces the earlier one in place
#[derive(Debug, Clone, Copy, Default)]
pub struct AddMessages;

impl Reducer<Vec<Message>> for AddMessages {
    type Update = Vec<Message>;

    fn reduce(current: &mut Vec<Message>, update: Vec<Message>) {
        let left = std::mem::take(current);
        *current = add_messages(left, update);
    }
}

/// Update for [`AppendOrOverwrite`] fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ListUpdate<T> {
    /// Add to the end of the list
    Append(Vec<T>),
    /// Replace the whole list
    Overwrite(Vec<T>),
}

impl<T> From<Vec<T>> for ListUpdate<T> {
    fn from(items: Vec<T>) -> Self {
        ListUpdate::Append(items)
    }
}

/// List that appends by default but can be replaced wholesale
///
/// Used where parallel branches contribute items and a later node needs to
/// swap the accumulated list for a filtered one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOrOverwrite;

impl<T: StateValue> Reducer<Vec<T>> for AppendOrOverwrite {
    type Update = ListUpdate<T>;

    fn reduce(current: &mut Vec<T>, update: ListUpdate<T>) {
        match update {
            ListUpdate::Append(items) => current.extend(items),
            ListUpdate::Overwrite(items) => *current = items,
        }
    }
}

/// Add the written amount
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl<T: StateValue + AddAssign> Reducer<T> for Sum {
    type Update = T;

    fn reduce(current: &mut T, update: T) {
        *current += update;
    }
}

/// Insert written keys, replacing existing ones
#[derive(Debug, Clone, Copy, Default)]
pub struct Merge;

impl<K, V> Reducer<HashMap<K, V>> for Merge
where
    K: StateValue + Eq + Hash,
    V: StateValue,
    HashMap<K, V>: StateValue,
{
    type Update = HashMap<K, V>;

    fn reduce(current: &mut HashMap<K, V>, update: HashMap<K, V>) {
        current.extend(update);
    }
}

/// A state type usable by [`StateGraph`](crate::StateGraph)
///
/// `Default` provides the identity element of every field, which is the
/// state a run starts from before input is applied.
pub trait GraphState: StateValue + Default {
    /// Partial update written by nodes
    type Update: StateValue + Default;

    /// Merge `update` into `self` using each field's policy
    fn apply(&mut self, update: Self::Update);
}

/// Declare a graph state struct together with its update struct
///
/// Each field is written `name: Type => Policy`. The macro generates:
///
/// - the state struct, deriving `Debug`, `Clone`, `Default`, `Serialize`
///   and `Deserialize`
/// - the update struct with one `Option<Policy::Update>` per field and a
///   builder setter named after each field
/// - `impl GraphState`
///
/// The invoking crate must depend on `serde`.
#[macro_export]
macro_rules! graph_state {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($update:ident) {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $policy:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        #[doc = concat!("Partial update for [`", stringify!($name), "`]")]
        #[derive(Debug, Clone, Default, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(default)]
        $vis struct $update {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: ::std::option::Option<
                    <$policy as $crate::state::Reducer<$ty>>::Update
                >,
            )*
        }

        #[allow(dead_code)]
        impl $update {
            $(
                pub fn $field(
                    mut self,
                    value: impl ::std::convert::Into<<$policy as $crate::state::Reducer<$ty>>::Update>,
                ) -> Self {
                    self.$field = ::std::option::Option::Some(value.into());
                    self
                }
            )*

            /// True when no field is written
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())*
            }
        }

        impl $crate::state::GraphState for $name {
            type Update = $update;

            fn apply(&mut self, update: $update) {
                $(
                    if let ::std::option::Option::Some(value) = update.$field {
                        <$policy as $crate::state::Reducer<$ty>>::reduce(&mut self.$field, value);
                    }
                )*
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use proptest::prelude::*;

    crate::graph_state! {
        struct TestState (TestUpdate) {
            name: String => Overwrite,
            items: Vec<u32> => Append,
            docs: Vec<String> => AppendOrOverwrite,
            total: i64 => Sum,
            tags: HashMap<String, String> => Merge,
            messages: Vec<Message> => AddMessages,
            customer_id: Option<String> => Overwrite,
        }
    }

    #[test]
    fn test_default_is_identity() {
        let state = TestState::default();
        assert!(state.name.is_empty());
        assert!(state.items.is_empty());
        assert_eq!(state.total, 0);
        assert!(state.customer_id.is_none());
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut state = TestState::default();
        state.apply(TestUpdate::default().name("x".to_string()).items(vec![1]));
        let before = serde_json::to_value(&state).unwrap();

        let update = TestUpdate::default();
        assert!(update.is_empty());
        state.apply(update);
        assert_eq!(serde_json::to_value(&state).unwrap(), before);
    }

    #[test]
    fn test_each_policy() {
        let mut state = TestState::default();
        state.apply(
            TestUpdate::default()
                .name("first".to_string())
                .items(vec![1, 2])
                .docs(vec!["a".to_string()])
                .total(5)
                .tags(HashMap::from([("k".to_string(), "v".to_string())]))
                .customer_id(Some("42".to_string())),
        );
        state.apply(
            TestUpdate::default()
                .name("second".to_string())
                .items(vec![3])
                .docs(ListUpdate::Append(vec!["b".to_string()]))
                .total(-2),
        );

        assert_eq!(state.name, "second");
        assert_eq!(state.items, vec![1, 2, 3]);
        assert_eq!(state.docs, vec!["a", "b"]);
        assert_eq!(state.total, 3);
        assert_eq!(state.tags.get("k").map(String::as_str), Some("v"));
        assert_eq!(state.customer_id.as_deref(), Some("42"));

        state.apply(TestUpdate::default().docs(ListUpdate::Overwrite(vec![])));
        assert!(state.docs.is_empty());
    }

    #[test]
    fn test_add_messages_replaces_by_id() {
        let mut state = TestState::default();
        let draft = Message::ai("draft").with_id("m1");
        state.apply(TestUpdate::default().messages(vec![Message::human("hi"), draft]));
        state.apply(TestUpdate::default().messages(vec![Message::ai("final").with_id("m1")]));

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "final");
    }

    #[test]
    fn test_update_serde_skips_unset_fields() {
        let update = TestUpdate::default().total(1);
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, serde_json::json!({"total": 1}));

        let list: TestUpdate =
            serde_json::from_value(serde_json::json!({"docs": {"type": "overwrite", "value": []}}))
                .unwrap();
        assert_eq!(list.docs, Some(ListUpdate::Overwrite(vec![])));
    }

    proptest! {
        #[test]
        fn prop_append_is_order_insensitive_as_multiset(
            batches in proptest::collection::vec(proptest::collection::vec(0u32..100, 0..5), 0..6)
        ) {
            let mut forward = TestState::default();
            for batch in &batches {
                forward.apply(TestUpdate::default().items(batch.clone()));
            }
            let mut backward = TestState::default();
            for batch in batches.iter().rev() {
                backward.apply(TestUpdate::default().items(batch.clone()));
            }

            let mut a = forward.items;
            let mut b = backward.items;
            a.sort_unstable();
            b.sort_unstable();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_sum_matches_arithmetic(values in proptest::collection::vec(-1000i64..1000, 0..20)) {
            let mut state = TestState::default();
            for v in &values {
                state.apply(TestUpdate::default().total(*v));
            }
            prop_assert_eq!(state.total, values.iter().sum::<i64>());
        }
    }
}
