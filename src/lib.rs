//! Heart rate monitor notifications over Bluetooth LE.
//!
//! Finds a device advertising the GATT Heart Rate Service, enables
//! notifications on its Heart Rate Measurement characteristic and hands each
//! decoded [`HeartRateMeasurement`] to registered observers.
//!
//! ```no_run
//! use hrm_notify::{Config, HeartRateMeasurement, HeartRateSubscription, ObserverRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), hrm_notify::MonitorError> {
//! let observers = Arc::new(ObserverRegistry::new());
//! observers.register(Arc::new(|m: HeartRateMeasurement| println!("{}", m)));
//!
//! let subscription = HeartRateSubscription::open(&Config::default(), observers).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//! subscription.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod device_scanner;
pub mod error;
pub mod measurement;
pub mod sensor;

pub use config::Config;
pub use connection::{ConnectionCommand, ConnectionManager, HeartRateSubscription, SubscriptionState};
pub use error::{ConfigError, DecodeError, MonitorError};
pub use measurement::{decode, HeartRateMeasurement};
pub use sensor::{
    ChannelObserver, ConnectionStatus, MeasurementObserver, NotificationHandler, ObserverId,
    ObserverRegistry, SensorUpdate,
};
