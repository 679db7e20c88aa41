//! Purpose: Drive inventory mutations against an `ItemStore` and keep the mirror current.
//! Exports: `Inventory`.
//! Role: The only component that sequences side effects (store calls) and state commits.
//! Invariants: Every mutation, failed or not, is followed by a full re-list; the mirror is never patched.
//! Invariants: Failures are recorded in the view model and returned, never retried.
//! Invariants: Read-modify-write goes through `ItemStore::apply` so backends can make it atomic.

use tracing::{debug, warn};

use crate::core::csv::export_csv;
use crate::core::error::Error;
use crate::core::item::{QuantityPolicy, parse_quantity_with, validate_name};
use crate::core::model::{Action, Failure, FailureKind, Operation, ViewModel, update};
use crate::core::store::{Change, ItemStore};
use crate::core::view::{NameCollator, Projection, filter_and_sort};

pub struct Inventory<S> {
    store: S,
    state: ViewModel,
    policy: QuantityPolicy,
    collator: NameCollator,
}

impl<S: ItemStore> Inventory<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: ViewModel::default(),
            policy: QuantityPolicy::default(),
            collator: NameCollator::root(),
        }
    }

    pub fn with_policy(mut self, policy: QuantityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_state(mut self, state: ViewModel) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &ViewModel {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatch(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = update(state, action);
    }

    /// Re-list the store into the mirror.
    pub fn list(&mut self) -> Result<(), Failure> {
        self.dispatch(Action::Started(Operation::Fetch));
        match self.fetch(Operation::Fetch) {
            Ok(()) => {
                self.dispatch(Action::Succeeded(Operation::Fetch));
                Ok(())
            }
            Err(failure) => {
                self.dispatch(Action::Failed(failure.clone()));
                Err(failure)
            }
        }
    }

    pub fn add(&mut self, name: &str, quantity_text: Option<&str>) -> Result<(), Failure> {
        self.mutate(Operation::Add, |store, policy| {
            validate_name(name).map_err(|err| mutation_failure(Operation::Add, &err))?;
            let quantity = parse_quantity_with(quantity_text, policy)
                .map_err(|err| parse_failure(Operation::Add, &err))?;
            let applied = store
                .apply(name, Change::Increment { by: quantity })
                .map_err(|err| mutation_failure(Operation::Add, &err.with_item(name)))?;
            debug!(item = name, quantity, ?applied, "add applied");
            Ok(())
        })
    }

    pub fn remove(&mut self, name: &str) -> Result<(), Failure> {
        self.mutate(Operation::Remove, |store, _| {
            let applied = store
                .apply(name, Change::Decrement)
                .map_err(|err| mutation_failure(Operation::Remove, &err.with_item(name)))?;
            debug!(item = name, ?applied, "remove applied");
            Ok(())
        })
    }

    /// Rename and/or reset the quantity. A rename onto an existing name
    /// overwrites that record instead of merging into it.
    pub fn edit(
        &mut self,
        original_name: &str,
        new_name: &str,
        quantity_text: Option<&str>,
    ) -> Result<(), Failure> {
        self.mutate(Operation::Edit, |store, policy| {
            validate_name(new_name).map_err(|err| mutation_failure(Operation::Edit, &err))?;
            let quantity = parse_quantity_with(quantity_text, policy)
                .map_err(|err| parse_failure(Operation::Edit, &err))?;
            if new_name != original_name {
                store.delete(original_name).map_err(|err| {
                    mutation_failure(Operation::Edit, &err.with_item(original_name))
                })?;
            }
            store
                .put(new_name, quantity)
                .map_err(|err| mutation_failure(Operation::Edit, &err.with_item(new_name)))?;
            debug!(from = original_name, to = new_name, quantity, "edit applied");
            Ok(())
        })
    }

    pub fn delete(&mut self, name: &str) -> Result<(), Failure> {
        self.mutate(Operation::Delete, |store, _| {
            store
                .delete(name)
                .map_err(|err| mutation_failure(Operation::Delete, &err.with_item(name)))?;
            debug!(item = name, "delete applied");
            Ok(())
        })
    }

    pub fn view(&self) -> Projection {
        self.state.projection(&self.collator)
    }

    /// CSV of every matching row in display order, ignoring pagination.
    pub fn export_csv(&self) -> String {
        let rows = filter_and_sort(
            &self.state.items,
            &self.state.search,
            self.state.sort,
            &self.collator,
        );
        export_csv(&rows)
    }

    fn mutate<F>(&mut self, operation: Operation, effect: F) -> Result<(), Failure>
    where
        F: FnOnce(&S, QuantityPolicy) -> Result<(), Failure>,
    {
        self.dispatch(Action::Started(operation));
        if let Err(failure) = effect(&self.store, self.policy) {
            warn!(
                operation = operation.as_str(),
                kind = ?failure.kind,
                cause = failure.cause.as_deref().unwrap_or_default(),
                "inventory action failed"
            );
            // A rename can half-land (delete done, put failed); resync before reporting.
            if let Err(refresh) = self.fetch(operation) {
                debug!(
                    cause = refresh.cause.as_deref().unwrap_or_default(),
                    "resync after failure skipped"
                );
            }
            self.dispatch(Action::Failed(failure.clone()));
            return Err(failure);
        }
        if let Err(failure) = self.fetch(operation) {
            self.dispatch(Action::RefreshFailed(failure));
        }
        self.dispatch(Action::Succeeded(operation));
        Ok(())
    }

    fn fetch(&mut self, operation: Operation) -> Result<(), Failure> {
        match self.store.list() {
            Ok(items) => {
                debug!(count = items.len(), "inventory refreshed");
                self.dispatch(Action::Refreshed(items));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "inventory refresh failed");
                Err(Failure::from_error(FailureKind::FetchFailed, operation, &err))
            }
        }
    }
}

fn mutation_failure(operation: Operation, err: &Error) -> Failure {
    Failure::from_error(FailureKind::MutationFailed, operation, err)
}

fn parse_failure(operation: Operation, err: &Error) -> Failure {
    Failure::from_error(FailureKind::ParseFailed, operation, err)
}

#[cfg(test)]
mod tests {
    use super::Inventory;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::item::{Item, QuantityPolicy};
    use crate::core::model::{Action, FailureKind, NotificationLevel, Operation, Status};
    use crate::core::store::{ItemStore, MemoryStore, StoreResult};
    use crate::core::view::SortField;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sorted(mut items: Vec<Item>) -> Vec<Item> {
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn unavailable() -> Error {
            Error::new(ErrorKind::Unavailable).with_message("store offline")
        }
    }

    impl ItemStore for FlakyStore {
        fn list(&self) -> StoreResult<Vec<Item>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.inner.list()
        }

        fn get(&self, name: &str) -> StoreResult<Option<i64>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.inner.get(name)
        }

        fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.inner.put(name, quantity)
        }

        fn delete(&self, name: &str) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.inner.delete(name)
        }
    }

    #[test]
    fn add_on_empty_store_defaults_to_one() {
        let mut inventory = Inventory::new(MemoryStore::new());
        inventory.add("Widget", Some("")).expect("add");
        inventory.list().expect("list");
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 1)]);
    }

    #[test]
    fn add_merges_quantities() {
        let mut inventory = Inventory::new(MemoryStore::new());
        inventory.add("Widget", Some("5")).expect("add");
        inventory.add("Widget", Some("3")).expect("add");
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 8)]);
    }

    #[test]
    fn remove_decrements_then_deletes_at_one() {
        let store = MemoryStore::with_items([Item::new("Widget", 2), Item::new("Bolt", 1)]);
        let mut inventory = Inventory::new(store);
        inventory.remove("Widget").expect("remove");
        inventory.remove("Bolt").expect("remove");
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 1)]);
    }

    #[test]
    fn remove_missing_is_a_no_op() {
        let mut inventory = Inventory::new(MemoryStore::with_items([Item::new("Widget", 2)]));
        inventory.remove("Gadget").expect("remove");
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 2)]);
        assert!(inventory.state().error.is_none());
    }

    #[test]
    fn edit_rename_overwrites_existing_target() {
        let store = MemoryStore::with_items([Item::new("Widget", 8), Item::new("Gadget", 40)]);
        let mut inventory = Inventory::new(store);
        inventory.edit("Widget", "Gadget", Some("2")).expect("edit");
        assert_eq!(inventory.state().items, vec![Item::new("Gadget", 2)]);
    }

    #[test]
    fn edit_same_name_sets_quantity() {
        let mut inventory = Inventory::new(MemoryStore::with_items([Item::new("Widget", 8)]));
        inventory.edit("Widget", "Widget", Some("junk")).expect("edit");
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 1)]);
    }

    #[test]
    fn delete_removes_record() {
        let store = MemoryStore::with_items([Item::new("Widget", 8), Item::new("Gadget", 4)]);
        let mut inventory = Inventory::new(store);
        inventory.delete("Widget").expect("delete");
        assert_eq!(inventory.state().items, vec![Item::new("Gadget", 4)]);
    }

    #[test]
    fn list_twice_is_stable() {
        let store = MemoryStore::with_items([Item::new("b", 2), Item::new("a", 1)]);
        let mut inventory = Inventory::new(store);
        inventory.list().expect("list");
        let first = sorted(inventory.state().items.clone());
        inventory.list().expect("list");
        let second = sorted(inventory.state().items.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn fetch_failure_keeps_stale_mirror() {
        let store = FlakyStore::default();
        store.inner.put("Widget", 3).expect("seed");
        let mut inventory = Inventory::new(store);
        inventory.list().expect("list");

        inventory.store().fail_reads.store(true, Ordering::SeqCst);
        let failure = inventory.list().expect_err("offline");
        assert_eq!(failure.kind, FailureKind::FetchFailed);
        assert_eq!(failure.error_kind, ErrorKind::Unavailable);
        assert_eq!(inventory.state().items, vec![Item::new("Widget", 3)]);
        assert_eq!(inventory.state().status, Status::Idle);
        assert_eq!(
            inventory.state().error.as_ref().map(|e| e.message.as_str()),
            Some("Failed to fetch inventory")
        );
    }

    #[test]
    fn mutation_failure_is_reported_not_retried() {
        let store = FlakyStore::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        let mut inventory = Inventory::new(store);
        let failure = inventory.add("Widget", Some("2")).expect_err("offline");
        assert_eq!(failure.kind, FailureKind::MutationFailed);
        assert_eq!(failure.operation, Operation::Add);
        let notification = inventory.state().notification.clone().expect("notification");
        assert_eq!(notification.level, NotificationLevel::Failure);
        assert_eq!(notification.message, "Failed to add item");
        assert!(inventory.store().inner.list().expect("list").is_empty());
    }

    #[test]
    fn failed_mutation_still_resyncs_mirror() {
        let store = FlakyStore::default();
        store.inner.put("Gadget", 4).expect("seed");
        store.fail_writes.store(true, Ordering::SeqCst);
        let mut inventory = Inventory::new(store);
        inventory
            .edit("Gadget", "Gizmo", Some("2"))
            .expect_err("offline");
        assert_eq!(inventory.state().items, vec![Item::new("Gadget", 4)]);
        assert_eq!(
            inventory.state().error.as_ref().map(|e| e.kind),
            Some(FailureKind::MutationFailed)
        );
    }

    #[test]
    fn refresh_failure_after_write_still_reports_success() {
        let store = FlakyStore::default();
        let mut inventory = Inventory::new(store);
        inventory.list().expect("list");
        // Writes land through `put`; the follow-up list fails.
        inventory.store().fail_reads.store(true, Ordering::SeqCst);
        inventory.edit("Widget", "Widget", Some("4")).expect("edit");
        let state = inventory.state();
        assert!(state.items.is_empty());
        assert_eq!(
            state.error.as_ref().map(|e| e.kind),
            Some(FailureKind::FetchFailed)
        );
        assert_eq!(
            state.notification.as_ref().map(|n| n.level),
            Some(NotificationLevel::Success)
        );
        assert_eq!(inventory.store().inner.get("Widget").expect("get"), Some(4));
    }

    #[test]
    fn strict_policy_raises_parse_failure_before_store_call() {
        let mut inventory =
            Inventory::new(MemoryStore::new()).with_policy(QuantityPolicy::Strict);
        let failure = inventory.add("Widget", Some("abc")).expect_err("strict");
        assert_eq!(failure.kind, FailureKind::ParseFailed);
        assert!(inventory.store().list().expect("list").is_empty());
    }

    #[test]
    fn permissive_policy_accepts_zero_and_negative() {
        let mut inventory = Inventory::new(MemoryStore::new());
        inventory.add("Widget", Some("-3")).expect("add");
        inventory.add("Gadget", Some("0")).expect("add");
        assert_eq!(
            sorted(inventory.state().items.clone()),
            vec![Item::new("Gadget", 0), Item::new("Widget", -3)]
        );
    }

    #[test]
    fn empty_name_is_a_mutation_failure() {
        let mut inventory = Inventory::new(MemoryStore::new());
        let failure = inventory.add("", None).expect_err("empty");
        assert_eq!(failure.kind, FailureKind::MutationFailed);
        assert_eq!(failure.error_kind, ErrorKind::Usage);
    }

    #[test]
    fn view_and_export_follow_search_and_sort() {
        let store = MemoryStore::with_items([
            Item::new("Widget", 3),
            Item::new("Gadget", 9),
            Item::new("widget stand", 1),
        ]);
        let mut inventory = Inventory::new(store);
        inventory.list().expect("list");
        inventory.dispatch(Action::SetSearch("WID".to_string()));
        inventory.dispatch(Action::ToggleSort(SortField::Quantity));

        let view = inventory.view();
        let names: Vec<_> = view.rows.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["Widget", "widget stand"]);
        assert_eq!(
            inventory.export_csv(),
            "Item Name,Quantity\nWidget,3\nwidget stand,1"
        );
    }
}
