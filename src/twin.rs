//! Watching the desired properties of the device twin

use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{Mutex, RwLock};

use crate::message::DesiredProperties;

const CUSTOM_DNS_PATH: [&str; 2] = ["storage", "customdns"];

/// Host that replaces the blob storage host in upload grants
///
/// Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct StorageOverride {
    host: Arc<RwLock<Option<String>>>,
}

impl StorageOverride {
    /// Current override host, `None` when grants are used as issued
    pub async fn get(&self) -> Option<String> {
        self.host.read().await.clone()
    }

    /// Replace the override host, an empty host clears it
    pub async fn set(&self, host: Option<String>) {
        let host = host.filter(|h| !h.is_empty());
        *self.host.write().await = host;
    }
}

/// What a desired property document says about the storage host
#[derive(Debug, PartialEq)]
enum CustomDns<'a> {
    Host(&'a str),
    Cleared,
    Absent,
    Invalid(&'a Value),
}

fn custom_dns(desired: &DesiredProperties) -> CustomDns<'_> {
    match desired.get(&CUSTOM_DNS_PATH) {
        None => CustomDns::Absent,
        Some(Value::Null) => CustomDns::Cleared,
        Some(Value::String(host)) if host.is_empty() => CustomDns::Cleared,
        Some(Value::String(host)) => CustomDns::Host(host),
        Some(other) => CustomDns::Invalid(other),
    }
}

/// Keeps the storage override in line with the twin's `storage.customdns`
///
/// Documents without the property leave the override untouched, a `null`
/// clears it. A document older than the last applied `$version` is skipped,
/// so a twin snapshot fetched before a patch cannot undo that patch. Clones
/// share the applied version.
#[derive(Debug, Clone)]
pub struct TwinWatcher {
    storage_override: StorageOverride,
    applied_version: Arc<Mutex<Option<i64>>>,
}

impl TwinWatcher {
    /// Watcher writing into `storage_override`
    pub fn new(storage_override: StorageOverride) -> Self {
        Self {
            storage_override,
            applied_version: Default::default(),
        }
    }

    /// Apply one desired property document
    pub async fn on_desired_properties_changed(&self, desired: &DesiredProperties) {
        info!("Received device twin update: {}", desired.as_json());

        // Held until the override is written so versions apply in order
        let mut applied_version = self.applied_version.lock().await;
        if let (Some(applied), Some(version)) = (*applied_version, desired.version()) {
            if version < applied {
                info!(
                    "Skipping desired properties version {}, version {} already applied",
                    version, applied
                );
                return;
            }
        }
        if let Some(version) = desired.version() {
            *applied_version = Some(version);
        }

        match custom_dns(desired) {
            CustomDns::Host(host) => {
                info!("Using custom storage host {}", host);
                self.storage_override.set(Some(host.to_string())).await;
            }
            CustomDns::Cleared => {
                info!("Custom storage host cleared");
                self.storage_override.set(None).await;
            }
            CustomDns::Absent => {
                debug!("No storage.customdns in update, keeping current storage host");
            }
            CustomDns::Invalid(value) => {
                warn!(
                    "Ignoring storage.customdns, expected a string but got {}",
                    value
                );
            }
        }
    }

    /// Apply every document from `updates` on a task of its own
    ///
    /// The task ends when the stream ends or the returned subscription is cancelled.
    pub fn subscribe(&self, mut updates: Receiver<DesiredProperties>) -> Subscription {
        let watcher = self.clone();
        let (handle, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            async move {
                while let Some(desired) = updates.recv().await {
                    watcher.on_desired_properties_changed(&desired).await;
                }
                debug!("Desired property stream ended");
            },
            registration,
        ));

        Subscription { handle }
    }
}

/// Handle on a running desired property subscription, cancelled when dropped
#[derive(Debug)]
pub struct Subscription {
    handle: AbortHandle,
}

impl Subscription {
    /// Stop delivering updates
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::channel;

    fn desired(document: Value) -> DesiredProperties {
        DesiredProperties::new(document)
    }

    #[tokio::test]
    async fn sets_override_from_custom_dns() {
        let storage_override = StorageOverride::default();
        let watcher = TwinWatcher::new(storage_override.clone());

        watcher
            .on_desired_properties_changed(&desired(
                json!({"storage": {"customdns": "foo.example.com"}}),
            ))
            .await;

        assert_eq!(storage_override.get().await.as_deref(), Some("foo.example.com"));
    }

    #[tokio::test]
    async fn missing_storage_keeps_previous_override() {
        let storage_override = StorageOverride::default();
        let watcher = TwinWatcher::new(storage_override.clone());

        watcher
            .on_desired_properties_changed(&desired(
                json!({"storage": {"customdns": "foo.example.com"}}),
            ))
            .await;
        watcher
            .on_desired_properties_changed(&desired(json!({"telemetry": {"interval": 5}})))
            .await;
        watcher
            .on_desired_properties_changed(&desired(json!({"storage": {}})))
            .await;

        assert_eq!(storage_override.get().await.as_deref(), Some("foo.example.com"));
    }

    #[tokio::test]
    async fn non_string_custom_dns_is_ignored() {
        let storage_override = StorageOverride::default();
        storage_override.set(Some("foo.example.com".into())).await;
        let watcher = TwinWatcher::new(storage_override.clone());

        watcher
            .on_desired_properties_changed(&desired(json!({"storage": {"customdns": 42}})))
            .await;
        watcher
            .on_desired_properties_changed(&desired(json!({"storage": "bar.example.com"})))
            .await;

        assert_eq!(storage_override.get().await.as_deref(), Some("foo.example.com"));
    }

    #[tokio::test]
    async fn null_custom_dns_clears_override() {
        let storage_override = StorageOverride::default();
        storage_override.set(Some("foo.example.com".into())).await;
        let watcher = TwinWatcher::new(storage_override.clone());

        watcher
            .on_desired_properties_changed(&desired(json!({"storage": {"customdns": null}})))
            .await;

        assert_eq!(storage_override.get().await, None);
    }

    #[tokio::test]
    async fn empty_host_clears_override() {
        let storage_override = StorageOverride::default();
        storage_override.set(Some("foo.example.com".into())).await;
        storage_override.set(Some(String::new())).await;
        assert_eq!(storage_override.get().await, None);
    }

    #[tokio::test]
    async fn subscription_applies_streamed_updates() {
        let storage_override = StorageOverride::default();
        let watcher = TwinWatcher::new(storage_override.clone());
        let (tx, rx) = channel(4);
        let _subscription = watcher.subscribe(rx);

        tx.send(desired(json!({"storage": {"customdns": "a.example.com"}})))
            .await
            .unwrap();
        tx.send(desired(json!({"storage": {"customdns": "b.example.com"}})))
            .await
            .unwrap();
        drop(tx);

        for _ in 0..100 {
            if storage_override.get().await.as_deref() == Some("b.example.com") {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("subscription did not apply updates");
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_applying_updates() {
        let storage_override = StorageOverride::default();
        let watcher = TwinWatcher::new(storage_override.clone());
        let (tx, rx) = channel(4);
        let subscription = watcher.subscribe(rx);
        subscription.cancel();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Receiver is dropped along with the aborted task
        let sent = tx
            .send(desired(json!({"storage": {"customdns": "a.example.com"}})))
            .await;
        assert!(sent.is_err());
        assert_eq!(storage_override.get().await, None);
    }

    #[tokio::test]
    async fn older_version_does_not_undo_newer_one() {
        let storage_override = StorageOverride::default();
        let watcher = TwinWatcher::new(storage_override.clone());

        watcher
            .on_desired_properties_changed(&desired(
                json!({"storage": {"customdns": "new.example.com"}, "$version": 3}),
            ))
            .await;
        watcher
            .on_desired_properties_changed(&desired(
                json!({"storage": {"customdns": "old.example.com"}, "$version": 2}),
            ))
            .await;
        assert_eq!(storage_override.get().await.as_deref(), Some("new.example.com"));

        // Unversioned documents and newer versions still apply
        watcher
            .on_desired_properties_changed(&desired(json!({"storage": {"customdns": null}})))
            .await;
        assert_eq!(storage_override.get().await, None);
        watcher
            .on_desired_properties_changed(&desired(
                json!({"storage": {"customdns": "next.example.com"}, "$version": 4}),
            ))
            .await;
        assert_eq!(storage_override.get().await.as_deref(), Some("next.example.com"));
    }

    #[test]
    fn custom_dns_classification() {
        assert_eq!(
            custom_dns(&desired(json!({"storage": {"customdns": "x"}}))),
            CustomDns::Host("x")
        );
        assert_eq!(custom_dns(&desired(json!({}))), CustomDns::Absent);
        assert_eq!(
            custom_dns(&desired(json!({"storage": {"customdns": ""}}))),
            CustomDns::Cleared
        );
    }
}
