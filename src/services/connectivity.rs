use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

/// Online/offline flag with change notifications.
///
/// Subscribers only wake on real transitions; setting the current value
/// again is not an edge.
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Connectivity { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Records the latest observation. Returns true when it was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Treats any HTTP response from the extraction API host as "online".
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpProbe {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Feeds probe results into `connectivity` every `interval` until the
/// surrounding task is dropped.
pub async fn poll_connectivity(
    probe: Arc<dyn ConnectivityProbe>,
    connectivity: Arc<Connectivity>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let online = probe.check().await;
        connectivity.set_online(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProbe {
        answers: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn check(&self) -> bool {
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0]
            }
        }
    }

    #[test]
    fn repeated_value_is_not_an_edge() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.set_online(false));
        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();
        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn polling_publishes_probe_results() {
        let connectivity = Arc::new(Connectivity::new(false));
        let mut rx = connectivity.subscribe();
        let probe = Arc::new(ScriptedProbe {
            answers: Mutex::new(vec![false, true]),
        });
        let task = tokio::spawn(poll_connectivity(
            probe,
            connectivity.clone(),
            Duration::from_millis(10),
        ));

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        task.abort();
    }
}
