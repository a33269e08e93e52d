//! Holder of the most recently fetched weather snapshot.
//!
//! Readers ask for `current()`; observers `subscribe()` and get every
//! update or failure published after they subscribed. Dropping the receiver
//! unsubscribes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::client::{WeatherError, WeatherSource};
use super::snapshot::WeatherSnapshot;

/// Receiving end handed to each observer
pub type WeatherEvents = mpsc::UnboundedReceiver<WeatherEvent>;

/// Coarse failure class, enough for the UI to pick a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Network,
}

impl From<&WeatherError> for FailureKind {
    fn from(err: &WeatherError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::Network
        }
    }
}

/// Notification pushed to subscribers
#[derive(Debug, Clone)]
pub enum WeatherEvent {
    /// A fetch succeeded; this is now `current()`.
    Updated(Arc<WeatherSnapshot>),
    /// A fetch failed; `current()` is unchanged.
    Failed {
        city: String,
        kind: FailureKind,
        message: String,
    },
}

pub struct WeatherStore {
    source: Arc<dyn WeatherSource>,
    current: watch::Sender<Option<Arc<WeatherSnapshot>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WeatherEvent>>>,
}

impl WeatherStore {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        let (current, _) = watch::channel(None);
        Self { source, current, subscribers: Mutex::new(Vec::new()) }
    }

    /// Latest successfully fetched snapshot, `None` until the first success.
    pub fn current(&self) -> Option<Arc<WeatherSnapshot>> {
        self.current.borrow().clone()
    }

    /// Receive every event published from now on, in publish order.
    ///
    /// Events queue up until read; none are dropped for a slow reader.
    pub fn subscribe(&self) -> WeatherEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<WeatherEvent>>> {
        // Senders stay valid even if a holder panicked
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to every live subscriber and forget closed ones.
    fn publish(subscribers: &mut Vec<mpsc::UnboundedSender<WeatherEvent>>, event: WeatherEvent) {
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(subscribers = subscribers.len(), "Weather event published");
    }

    /// Live view of `current()`.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<WeatherSnapshot>>> {
        self.current.subscribe()
    }

    /// Fetch weather for `city` and publish the result.
    ///
    /// A blank city does nothing and returns `Ok(None)`. On failure the held
    /// snapshot stays as it was and a [`WeatherEvent::Failed`] goes out.
    /// Concurrent refreshes publish in the order they complete.
    pub async fn refresh(&self, city: &str) -> Result<Option<Arc<WeatherSnapshot>>, WeatherError> {
        if city.trim().is_empty() {
            debug!("Ignoring refresh for blank city");
            return Ok(None);
        }

        match self.source.fetch(city).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                // Replace and publish under one lock so events follow `current()` order
                let mut subscribers = self.subscribers();
                self.current.send_replace(Some(Arc::clone(&snapshot)));
                Self::publish(&mut subscribers, WeatherEvent::Updated(Arc::clone(&snapshot)));
                drop(subscribers);
                info!(city = snapshot.city(), "Current weather replaced");
                Ok(Some(snapshot))
            }
            Err(err) => {
                let kind = FailureKind::from(&err);
                warn!(
                    city,
                    error = %err,
                    stale = self.current.borrow().is_some(),
                    "Weather refresh failed, keeping previous snapshot"
                );
                let event = WeatherEvent::Failed {
                    city: city.trim().to_string(),
                    kind,
                    message: err.to_string(),
                };
                Self::publish(&mut self.subscribers(), event);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for WeatherStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherStore")
            .field("current", &self.current.borrow().as_ref().map(|s| s.city().to_string()))
            .finish()
    }
}
