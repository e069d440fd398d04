//! # Connection Management Module
//!
//! Handles the lifecycle of a Heart Rate Measurement subscription.
//!
//! ## Key Components
//! - `HeartRateSubscription`: discover → resolve service → enable notify → subscribed → disposed
//! - `ConnectionManager`: runs subscriptions on a dedicated thread with its own Tokio runtime
//! - `ConnectionCommand`: commands sent from the host to the connection thread
//!
//! Only one device is handled at a time. There is no reconnect; when the
//! notification stream ends the host is told and may issue another `Connect`.

use crate::config::Config;
use crate::device_scanner::{self, BluetoothDevice, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};
use crate::error::MonitorError;
use crate::sensor::{ChannelObserver, ConnectionStatus, NotificationHandler, ObserverRegistry, SensorUpdate};
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, ValueNotification};
use btleplug::platform::Peripheral;
use crossbeam_channel::Sender;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Discovering,
    ResolvingService,
    ConfiguringNotify,
    Subscribed,
    /// The device stopped sending notifications, e.g. it disconnected
    StreamEnded,
    Disposed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Discovering => "discovering",
            SubscriptionState::ResolvingService => "resolving service",
            SubscriptionState::ConfiguringNotify => "configuring notify",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::StreamEnded => "stream ended",
            SubscriptionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Pick the Heart Rate Measurement characteristic out of a discovered set
fn measurement_characteristic<'a>(
    characteristics: impl IntoIterator<Item = &'a Characteristic>,
) -> Option<&'a Characteristic> {
    characteristics
        .into_iter()
        .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID && c.service_uuid == HEART_RATE_SERVICE_UUID)
}

/// Decode every Heart Rate Measurement value in `notifications`, in arrival order.
///
/// Other characteristics on the same peripheral are skipped. Sets `ended` once
/// the stream runs dry.
async fn forward_notifications<S>(mut notifications: S, handler: NotificationHandler, ended: watch::Sender<bool>)
where
    S: Stream<Item = ValueNotification> + Unpin,
{
    while let Some(notification) = notifications.next().await {
        let received = chrono::Utc::now();
        if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
            continue;
        }
        // Errors are already logged, and only drop this notification
        let _ = handler.handle(&notification.value, received);
    }
    let _ = ended.send(true);
}

/// Reader task plus the bookkeeping needed to stop it exactly once
struct NotificationPump {
    handler: NotificationHandler,
    reader: Mutex<Option<JoinHandle<()>>>,
    stream_ended: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl NotificationPump {
    /// Must be called from within a Tokio runtime
    fn start<S>(notifications: S, handler: NotificationHandler) -> Self
    where
        S: Stream<Item = ValueNotification> + Unpin + Send + 'static,
    {
        let (ended_tx, stream_ended) = watch::channel(false);
        let reader = tokio::spawn(forward_notifications(notifications, handler.clone(), ended_tx));

        Self {
            handler,
            reader: Mutex::new(Some(reader)),
            stream_ended,
            stopped: AtomicBool::new(false),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn has_ended(&self) -> bool {
        *self.stream_ended.borrow()
    }

    async fn wait_ended(&self) -> bool {
        self.stream_ended.clone().wait_for(|ended| *ended).await.is_ok()
    }

    /// Silence observers and abort the reader without waiting for it.
    ///
    /// Returns false if the pump was already stopped.
    fn halt(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.handler.silence();
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            reader.abort();
        }
        true
    }

    /// Like `halt`, but also waits for the reader task to finish
    async fn stop(&self) -> bool {
        if !self.halt() {
            return false;
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        true
    }
}

/// A live notification subscription on one heart rate monitor.
///
/// Dropping it without calling [`dispose`](Self::dispose) still stops all
/// callbacks; the disconnect is then issued in the background.
pub struct HeartRateSubscription {
    device: BluetoothDevice,
    peripheral: Peripheral,
    characteristic: Characteristic,
    pump: NotificationPump,
}

impl HeartRateSubscription {
    /// Discover a device, enable Heart Rate Measurement notifications and start
    /// forwarding them to `observers`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(config: &Config, observers: Arc<ObserverRegistry>) -> Result<Self, MonitorError> {
        log::debug!("Subscription: {}", SubscriptionState::Discovering);
        let adapter = device_scanner::open_adapter(config).await?;
        let (device, peripheral) = device_scanner::find_heart_rate_monitor(&adapter, config).await?;
        log::info!("Found heart rate monitor: {}", device);

        log::debug!("Subscription: {}", SubscriptionState::ResolvingService);
        let characteristic = Self::resolve_characteristic(&device, &peripheral).await?;

        log::debug!("Subscription: {}", SubscriptionState::ConfiguringNotify);
        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            Self::release(&peripheral, None).await;
            return Err(MonitorError::SubscriptionFailed {
                device: device.to_string(),
                reason: "characteristic does not support notify".to_string(),
            });
        }

        let notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                Self::release(&peripheral, None).await;
                return Err(MonitorError::SubscriptionFailed {
                    device: device.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = peripheral.subscribe(&characteristic).await {
            Self::release(&peripheral, None).await;
            return Err(MonitorError::SubscriptionFailed {
                device: device.to_string(),
                reason: e.to_string(),
            });
        }

        let pump = NotificationPump::start(notifications, NotificationHandler::new(observers));
        log::info!("Subscription: {} to {}", SubscriptionState::Subscribed, device);

        Ok(Self {
            device,
            peripheral,
            characteristic,
            pump,
        })
    }

    async fn resolve_characteristic(
        device: &BluetoothDevice,
        peripheral: &Peripheral,
    ) -> Result<Characteristic, MonitorError> {
        let connected = peripheral.is_connected().await.unwrap_or(false);
        if !connected {
            peripheral.connect().await.map_err(|e| MonitorError::Connection {
                device: device.to_string(),
                reason: e.to_string(),
            })?;
        }

        if let Err(e) = peripheral.discover_services().await {
            Self::release(peripheral, None).await;
            return Err(MonitorError::Connection {
                device: device.to_string(),
                reason: e.to_string(),
            });
        }

        let characteristics = peripheral.characteristics();
        match measurement_characteristic(&characteristics) {
            Some(c) => Ok(c.clone()),
            None => {
                Self::release(peripheral, None).await;
                Err(MonitorError::SubscriptionFailed {
                    device: device.to_string(),
                    reason: "no Heart Rate Measurement characteristic".to_string(),
                })
            }
        }
    }

    async fn release(peripheral: &Peripheral, characteristic: Option<&Characteristic>) {
        if let Some(characteristic) = characteristic {
            if let Err(e) = peripheral.unsubscribe(characteristic).await {
                log::warn!("Failed to unsubscribe: {}", e);
            }
        }
        if let Err(e) = peripheral.disconnect().await {
            log::warn!("Failed to disconnect: {}", e);
        }
    }

    pub fn device(&self) -> &BluetoothDevice {
        &self.device
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        self.pump.handler.observers()
    }

    pub fn state(&self) -> SubscriptionState {
        if self.pump.is_stopped() {
            SubscriptionState::Disposed
        } else if self.pump.has_ended() {
            SubscriptionState::StreamEnded
        } else {
            SubscriptionState::Subscribed
        }
    }

    /// Resolves once the device stops delivering notifications.
    ///
    /// Returns `true` if the stream ended on its own and `false` if the
    /// subscription was disposed first.
    pub async fn stream_ended(&self) -> bool {
        self.pump.wait_ended().await
    }

    /// Stop notifications and release the connection.
    ///
    /// Safe to call more than once; only the first call does anything. No
    /// observer is invoked after this returns.
    pub async fn dispose(&self) {
        if !self.pump.stop().await {
            return;
        }
        log::info!("Disposing subscription to {}", self.device);
        Self::release(&self.peripheral, Some(&self.characteristic)).await;
        log::debug!("Subscription: {}", SubscriptionState::Disposed);
    }
}

impl Drop for HeartRateSubscription {
    fn drop(&mut self) {
        if !self.pump.halt() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let peripheral = self.peripheral.clone();
                let characteristic = self.characteristic.clone();
                handle.spawn(async move {
                    Self::release(&peripheral, Some(&characteristic)).await;
                });
            }
            Err(_) => {
                log::warn!("Subscription to {} dropped outside a runtime; connection left to the OS", self.device);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionCommand {
    Connect(Config),
    Disconnect,
    /// Dispose any subscription and stop the manager loop
    Shutdown,
}

/// Manages the subscription lifecycle on a dedicated thread.
///
/// Runs its own Tokio runtime so callers need not be async. Measurements and
/// status changes are reported through the `SensorUpdate` channel.
pub struct ConnectionManager {
    command_receiver: mpsc::Receiver<ConnectionCommand>,
    sensor_sender: Sender<SensorUpdate>,
    observers: Arc<ObserverRegistry>,
}

impl ConnectionManager {
    /// Creates a new ConnectionManager.
    ///
    /// Returns the manager and a sender for issuing commands. Measurements are
    /// forwarded to `sensor_sender`; more observers can be added through
    /// [`observers`](Self::observers).
    pub fn new(sensor_sender: Sender<SensorUpdate>) -> (Self, mpsc::Sender<ConnectionCommand>) {
        let (command_sender, command_receiver) = mpsc::channel();

        let observers = Arc::new(ObserverRegistry::new());
        observers.register(Arc::new(ChannelObserver::new(sensor_sender.clone())));

        let manager = ConnectionManager {
            command_receiver,
            sensor_sender,
            observers,
        };

        (manager, command_sender)
    }

    pub fn observers(&self) -> Arc<ObserverRegistry> {
        self.observers.clone()
    }

    fn send_status(&self, status: ConnectionStatus) {
        if let Err(why) = self.sensor_sender.send(SensorUpdate::ConnectionStatus(status)) {
            log::debug!("Could not send connection status: {:?}", why);
        }
    }

    /// Runs the connection management loop.
    ///
    /// This should be called in a spawned thread. It will block until `Shutdown`
    /// is received or the command channel is closed, then dispose any open
    /// subscription.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = MonitorError::RuntimeCreation(e.to_string());
                log::error!("{}", error);
                self.send_status(ConnectionStatus::Error(error.to_string()));
                return;
            }
        };

        let mut current: Option<Arc<HeartRateSubscription>> = None;

        while let Ok(command) = self.command_receiver.recv() {
            match command {
                ConnectionCommand::Connect(config) => {
                    log::info!("Connection manager: Connect requested");

                    if let Some(previous) = current.take() {
                        rt.block_on(previous.dispose());
                        self.send_status(ConnectionStatus::Disconnected);
                    }

                    self.send_status(ConnectionStatus::Connecting);
                    match rt.block_on(HeartRateSubscription::open(&config, self.observers.clone())) {
                        Ok(subscription) => {
                            let subscription = Arc::new(subscription);
                            self.send_status(ConnectionStatus::Connected(subscription.device().to_string()));

                            let watched = subscription.clone();
                            let sender = self.sensor_sender.clone();
                            rt.spawn(async move {
                                if watched.stream_ended().await {
                                    let _ = sender.send(SensorUpdate::ConnectionStatus(ConnectionStatus::Disconnected));
                                }
                            });

                            current = Some(subscription);
                        }
                        Err(error) => {
                            log::error!("{}", error);
                            self.send_status(ConnectionStatus::Error(error.to_string()));
                        }
                    }
                }
                ConnectionCommand::Disconnect => {
                    log::info!("Connection manager: Disconnect requested");
                    if let Some(subscription) = current.take() {
                        rt.block_on(subscription.dispose());
                    }
                    self.send_status(ConnectionStatus::Disconnected);
                }
                ConnectionCommand::Shutdown => {
                    log::info!("Connection manager: Shutdown requested");
                    break;
                }
            }
        }

        if let Some(subscription) = current.take() {
            rt.block_on(subscription.dispose());
        }
        log::info!("Connection manager: Shutting down");
    }
}
