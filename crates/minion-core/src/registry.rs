use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::descriptor::ServiceDescriptor;
use crate::error::ControlError;

#[derive(Debug, Default)]
struct RegistryState {
    services: HashMap<String, ServiceDescriptor>,
    /// ids with an install in flight (not yet registered)
    installing: HashSet<String>,
    /// ids with a removal in flight (still registered)
    removing: HashSet<String>,
}

/// In-memory registry of installed services.
///
/// Cloning is cheap; clones share the same state. All mutations and
/// snapshots go through one `RwLock`, which is never held across a process
/// invocation.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        let services = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                services,
                ..Default::default()
            })),
        }
    }

    pub async fn get(&self, id: &str) -> Result<ServiceDescriptor, ControlError> {
        self.state
            .read()
            .await
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.services.contains_key(id)
    }

    /// Insert a descriptor directly. Fails if the id is registered or has an
    /// install or removal in flight.
    pub async fn put(&self, descriptor: ServiceDescriptor) -> Result<(), ControlError> {
        let mut state = self.state.write().await;
        if state.services.contains_key(&descriptor.id)
            || state.installing.contains(&descriptor.id)
            || state.removing.contains(&descriptor.id)
        {
            return Err(ControlError::Exists(descriptor.id));
        }
        state.services.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<ServiceDescriptor, ControlError> {
        let mut state = self.state.write().await;
        state.removing.remove(id);
        state
            .services
            .remove(id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    /// Consistent snapshot of every registered descriptor, ordered by id.
    pub async fn list(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<ServiceDescriptor> =
            self.state.read().await.services.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.services.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Claim `id` for an install.
    ///
    /// Exactly one concurrent caller succeeds; every other caller, and any
    /// caller while the id is registered, gets `Exists`. While a removal of
    /// the id is still cleaning up the caller gets `Busy`.
    pub async fn reserve(&self, id: &str) -> Result<Reservation, ControlError> {
        let mut state = self.state.write().await;
        if state.services.contains_key(id) {
            return Err(ControlError::Exists(id.to_string()));
        }
        if state.removing.contains(id) {
            return Err(ControlError::Busy(id.to_string()));
        }
        if !state.installing.insert(id.to_string()) {
            return Err(ControlError::Exists(id.to_string()));
        }
        Ok(Reservation {
            registry: self.clone(),
            id: id.to_string(),
            armed: true,
        })
    }

    /// Claim a registered `id` for removal. The entry stays visible until
    /// the returned ticket is committed; the id stays claimed until the
    /// ticket is released or dropped.
    pub async fn begin_removal(&self, id: &str) -> Result<Removal, ControlError> {
        let mut state = self.state.write().await;
        let descriptor = state
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;
        if !state.removing.insert(id.to_string()) {
            return Err(ControlError::Busy(id.to_string()));
        }
        Ok(Removal {
            registry: self.clone(),
            descriptor,
            armed: true,
        })
    }

    /// Clear an in-flight mark without awaiting; used when a ticket is
    /// dropped unresolved (e.g. the caller's future was cancelled).
    fn clear_in_flight(&self, id: String, installing: bool) {
        let clear = move |state: &mut RegistryState| {
            if installing {
                state.installing.remove(&id);
            } else {
                state.removing.remove(&id);
            }
        };
        if let Ok(mut state) = self.state.try_write() {
            clear(&mut *state);
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let state = Arc::clone(&self.state);
            handle.spawn(async move { clear(&mut *state.write().await) });
        }
    }
}

/// An id claimed for installation. Must be committed or released.
#[must_use = "an unresolved reservation blocks the id until dropped"]
#[derive(Debug)]
pub struct Reservation {
    registry: Registry,
    id: String,
    armed: bool,
}

impl Reservation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the installed descriptor and clear the in-flight mark.
    pub async fn commit(mut self, descriptor: ServiceDescriptor) -> Result<(), ControlError> {
        if descriptor.id != self.id {
            return Err(ControlError::InvalidDescriptor(format!(
                "reservation for {} cannot commit {}",
                self.id, descriptor.id
            )));
        }
        let mut state = self.registry.state.write().await;
        state.installing.remove(&self.id);
        state.services.insert(self.id.clone(), descriptor);
        self.armed = false;
        Ok(())
    }

    /// Give the id back without registering anything.
    pub async fn release(mut self) {
        self.registry.state.write().await.installing.remove(&self.id);
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.registry.clear_in_flight(std::mem::take(&mut self.id), true);
        }
    }
}

/// A registered id claimed for removal.
#[must_use = "an unresolved removal blocks the id until dropped"]
#[derive(Debug)]
pub struct Removal {
    registry: Registry,
    descriptor: ServiceDescriptor,
    armed: bool,
}

impl Removal {
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Delete the registry entry. The id remains claimed, so no install of
    /// it can start until the ticket is released.
    pub async fn commit(&mut self) {
        self.registry
            .state
            .write()
            .await
            .services
            .remove(&self.descriptor.id);
    }

    /// Clear the claim. An uncommitted entry stays registered.
    pub async fn release(mut self) {
        self.registry
            .state
            .write()
            .await
            .removing
            .remove(&self.descriptor.id);
        self.armed = false;
    }
}

impl Drop for Removal {
    fn drop(&mut self) {
        if self.armed {
            self.registry.clear_in_flight(self.descriptor.id.clone(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(id, format!("example/{id}"))
    }

    #[tokio::test]
    async fn put_get_remove() {
        let registry = Registry::new();
        registry.put(desc("echo")).await.unwrap();
        assert_eq!(registry.get("echo").await.unwrap().id, "echo");

        let err = registry.put(desc("echo")).await.unwrap_err();
        assert!(matches!(err, ControlError::Exists(_)));

        registry.remove("echo").await.unwrap();
        assert!(matches!(
            registry.get("echo").await.unwrap_err(),
            ControlError::NotFound(_)
        ));
        assert!(matches!(
            registry.remove("echo").await.unwrap_err(),
            ControlError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_is_sorted_snapshot() {
        let registry = Registry::from_descriptors([desc("gamma"), desc("alpha"), desc("beta")]);
        let snapshot = registry.list().await;
        registry.remove("beta").await.unwrap();

        let ids: Vec<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn reservation_is_exclusive_until_resolved() {
        let registry = Registry::new();
        let first = registry.reserve("echo").await.unwrap();
        assert!(matches!(
            registry.reserve("echo").await.unwrap_err(),
            ControlError::Exists(_)
        ));
        assert!(!registry.contains("echo").await);

        first.release().await;
        let second = registry.reserve("echo").await.unwrap();
        second.commit(desc("echo")).await.unwrap();
        assert!(registry.contains("echo").await);
        assert!(matches!(
            registry.reserve("echo").await.unwrap_err(),
            ControlError::Exists(_)
        ));
    }

    #[tokio::test]
    async fn dropped_reservation_frees_the_id() {
        let registry = Registry::new();
        drop(registry.reserve("echo").await.unwrap());
        assert!(registry.reserve("echo").await.is_ok());
    }

    #[tokio::test]
    async fn reservation_rejects_mismatched_commit() {
        let registry = Registry::new();
        let reservation = registry.reserve("echo").await.unwrap();
        assert!(reservation.commit(desc("other")).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn removal_ticket_keeps_entry_until_commit() {
        let registry = Registry::from_descriptors([desc("echo")]);

        let ticket = registry.begin_removal("echo").await.unwrap();
        assert!(matches!(
            registry.begin_removal("echo").await.unwrap_err(),
            ControlError::Busy(_)
        ));
        assert!(registry.contains("echo").await);
        ticket.release().await;
        assert!(registry.contains("echo").await);

        let mut ticket = registry.begin_removal("echo").await.unwrap();
        ticket.commit().await;
        assert!(!registry.contains("echo").await);
        assert!(matches!(
            registry.reserve("echo").await.unwrap_err(),
            ControlError::Busy(_)
        ));
        ticket.release().await;
        assert!(matches!(
            registry.begin_removal("echo").await.unwrap_err(),
            ControlError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_reservations_yield_one_winner() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                match registry.reserve("echo").await {
                    Ok(reservation) => {
                        reservation.commit(desc("echo")).await.unwrap();
                        true
                    }
                    Err(ControlError::Exists(_)) => false,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }
}
