//! [`ZenohBus`] – the [`MessageBus`] used against a real vehicle and station.
//!
//! One Zenoh session is shared by both links.  With a locator the session
//! connects to that router (`tcp/10.0.0.5:7447`); without one it relies on
//! Zenoh's own scouting to find peers.
//!
//! Zenoh runs subscriber callbacks on its own threads, which is exactly the
//! delivery-context contract the links expect.

use bytes::Bytes;
use nev_types::NevError;
use tracing::{debug, info, warn};
use zenoh::sample::Sample;
use zenoh::{Config, Session, Wait};

use crate::bus::{Callback, MessageBus, Subscription};

pub struct ZenohBus {
    session: Session,
}

impl ZenohBus {
    /// Open a session, connecting to `locator` when one is given.
    ///
    /// # Errors
    ///
    /// [`NevError::Transport`] if the locator is invalid or the session
    /// cannot be opened.
    pub async fn open(locator: Option<&str>) -> Result<Self, NevError> {
        Self::open_with(client_config(locator)?, locator).await
    }

    /// Open a session from a prepared configuration.
    pub async fn open_with(config: Config, locator: Option<&str>) -> Result<Self, NevError> {
        let session = zenoh::open(config)
            .await
            .map_err(|e| NevError::Transport(format!("zenoh open failed: {e}")))?;
        info!(
            locator = locator.unwrap_or("auto-discovery"),
            "zenoh session opened"
        );
        Ok(Self { session })
    }
}

/// Session configuration for an optional router locator.  Blank means
/// auto-discovery.
pub fn client_config(locator: Option<&str>) -> Result<Config, NevError> {
    let mut config = Config::default();
    if let Some(locator) = locator.map(str::trim).filter(|l| !l.is_empty()) {
        let endpoints = serde_json::to_string(&[locator])
            .map_err(|e| NevError::Serialization(e.to_string()))?;
        config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|e| NevError::Transport(format!("invalid zenoh locator {locator}: {e}")))?;
    }
    Ok(config)
}

impl MessageBus for ZenohBus {
    fn publish(&self, key: &str, payload: Bytes) -> Result<(), NevError> {
        self.session
            .put(key, payload.to_vec())
            .wait()
            .map_err(|e| NevError::Transport(format!("zenoh put on {key}: {e}")))
    }

    fn subscribe(&self, key: &str, callback: Callback) -> Result<Subscription, NevError> {
        let subscriber = self
            .session
            .declare_subscriber(key)
            .callback(move |sample: Sample| {
                callback(Bytes::from(sample.payload().to_bytes().into_owned()));
            })
            .wait()
            .map_err(|e| NevError::Transport(format!("zenoh subscribe on {key}: {e}")))?;
        debug!(key, "zenoh subscriber declared");

        let owned = key.to_string();
        Ok(Subscription::new(key, move || {
            if let Err(e) = subscriber.undeclare().wait() {
                warn!(key = %owned, error = %e, "zenoh undeclare failed");
            }
        }))
    }

    fn close(&self) {
        match self.session.close().wait() {
            Ok(()) => info!("zenoh session closed"),
            Err(e) => warn!(error = %e, "zenoh session close failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn locator_lands_in_connect_endpoints() {
        let config = client_config(Some(" tcp/127.0.0.1:7447 ")).unwrap();
        let endpoints = config.get_json("connect/endpoints").unwrap();
        assert!(endpoints.contains("tcp/127.0.0.1:7447"), "{endpoints}");
    }

    #[test]
    fn blank_locator_means_auto_discovery() {
        let config = client_config(Some("  ")).unwrap();
        let endpoints = config.get_json("connect/endpoints").unwrap();
        assert!(!endpoints.contains("tcp/"), "{endpoints}");
        assert!(client_config(None).is_ok());
    }

    /// Peer session that neither scouts nor listens.
    fn isolated() -> Config {
        let mut config = Config::default();
        config.insert_json5("scouting/multicast/enabled", "false").unwrap();
        config.insert_json5("listen/endpoints", "[]").unwrap();
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn local_put_reaches_local_subscriber() {
        let bus = ZenohBus::open_with(isolated(), None).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cb: Callback = Arc::new(move |payload| {
            let _ = tx.send(payload);
        });
        let sub = bus.subscribe("nev/vehicle/mux", cb).unwrap();

        bus.publish("nev/vehicle/mux", Bytes::from_static(b"{\"nav_active\":true}"))
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], b"{\"nav_active\":true}");

        sub.undeclare();
        bus.close();
    }
}
