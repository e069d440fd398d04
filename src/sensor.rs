//! # Sensor Event Module
//!
//! Bridges raw characteristic notifications to the caller. A
//! `NotificationHandler` decodes each payload and hands the resulting
//! measurement to every registered `MeasurementObserver`, in registration order.
//!
//! Malformed payloads are logged and dropped; the subscription keeps running.

use crate::error::DecodeError;
use crate::measurement::{self, HeartRateMeasurement};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub enum SensorUpdate {
    Measurement(HeartRateMeasurement),
    ConnectionStatus(ConnectionStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected(String),
    Disconnected,
    Error(String),
}

/// Receives every successfully decoded measurement.
///
/// Called on the notification task, so implementations should return quickly.
pub trait MeasurementObserver: Send + Sync {
    fn on_measurement(&self, measurement: HeartRateMeasurement);
}

impl<F> MeasurementObserver for F
where
    F: Fn(HeartRateMeasurement) + Send + Sync,
{
    fn on_measurement(&self, measurement: HeartRateMeasurement) {
        self(measurement)
    }
}

/// Forwards measurements into a channel
#[derive(Clone)]
pub struct ChannelObserver {
    sender: Sender<SensorUpdate>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<SensorUpdate>) -> Self {
        Self { sender }
    }
}

impl MeasurementObserver for ChannelObserver {
    fn on_measurement(&self, measurement: HeartRateMeasurement) {
        if let Err(why) = self.sender.send(SensorUpdate::Measurement(measurement)) {
            log::warn!("Could not send heart rate measurement: {:?}", why);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered set of observers, shareable across threads
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn MeasurementObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn MeasurementObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, observer));
        id
    }

    /// Returns false if `id` was not registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify_all(&self, measurement: HeartRateMeasurement) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, observer) in observers.iter() {
            observer.on_measurement(measurement);
        }
    }
}

/// Decodes raw notifications and dispatches them to observers.
///
/// Once `silence` has been called no observer is invoked again.
#[derive(Clone)]
pub struct NotificationHandler {
    observers: Arc<ObserverRegistry>,
    silenced: Arc<AtomicBool>,
}

impl NotificationHandler {
    pub fn new(observers: Arc<ObserverRegistry>) -> Self {
        Self {
            observers,
            silenced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn handle(
        &self,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<HeartRateMeasurement, DecodeError> {
        let measurement = match measurement::decode(payload, timestamp) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Dropping notification {:02X?}: {}", payload, e);
                return Err(e);
            }
        };

        log::debug!("Heart rate: {}", measurement);

        if !self.is_silenced() {
            self.observers.notify_all(measurement);
        }
        Ok(measurement)
    }

    pub fn silence(&self) {
        self.silenced.store(true, Ordering::SeqCst);
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<(&'static str, u16)>>>, tag: &'static str) -> Arc<dyn MeasurementObserver> {
        let log = log.clone();
        Arc::new(move |m: HeartRateMeasurement| {
            log.lock().unwrap().push((tag, m.heart_rate_value()));
        })
    }

    #[test]
    fn test_observers_called_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ObserverRegistry::new());
        registry.register(recorder(&log, "first"));
        registry.register(recorder(&log, "second"));

        let handler = NotificationHandler::new(registry);
        handler.handle(&[0x00, 61], Utc::now()).unwrap();
        handler.handle(&[0x00, 62], Utc::now()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", 61), ("second", 61), ("first", 62), ("second", 62)]
        );
    }

    #[test]
    fn test_unregistered_observer_not_called() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ObserverRegistry::new());
        let first = registry.register(recorder(&log, "first"));
        registry.register(recorder(&log, "second"));

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.len(), 1);

        NotificationHandler::new(registry)
            .handle(&[0x00, 70], Utc::now())
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![("second", 70)]);
    }

    #[test]
    fn test_malformed_payload_skips_observers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ObserverRegistry::new());
        registry.register(recorder(&log, "only"));
        let handler = NotificationHandler::new(registry);

        assert_eq!(
            handler.handle(&[0x01, 0x46], Utc::now()),
            Err(DecodeError::MalformedPayload { required: 3, actual: 2 })
        );
        assert!(log.lock().unwrap().is_empty());

        handler.handle(&[0x01, 0x46, 0x00], Utc::now()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![("only", 70)]);
    }

    #[test]
    fn test_silenced_handler_stops_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ObserverRegistry::new());
        registry.register(recorder(&log, "only"));
        let handler = NotificationHandler::new(registry);
        let reader = handler.clone();

        handler.silence();
        assert!(reader.is_silenced());
        reader.handle(&[0x00, 90], Utc::now()).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_channel_observer_forwards_measurement() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let registry = Arc::new(ObserverRegistry::new());
        registry.register(Arc::new(ChannelObserver::new(sender)));

        let stamp = Utc::now();
        NotificationHandler::new(registry)
            .handle(&[0x08, 70, 0x64, 0x00], stamp)
            .unwrap();

        match receiver.try_recv() {
            Ok(SensorUpdate::Measurement(m)) => {
                assert_eq!(m.heart_rate_value(), 70);
                assert_eq!(m.energy_expended(), Some(100));
                assert_eq!(m.timestamp(), stamp);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        drop(receiver);
        let observer = ChannelObserver::new(sender);
        observer.on_measurement(HeartRateMeasurement::new(60, false, 0, Utc::now()));
    }
}
