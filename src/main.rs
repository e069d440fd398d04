use hrm_notify::{Config, ConnectionCommand, ConnectionManager, ConnectionStatus, SensorUpdate};
use std::process::ExitCode;
use std::sync::mpsc;

/// Sends `Disconnect` on Ctrl-C so the subscription is disposed before exit.
/// A second Ctrl-C exits immediately.
fn spawn_interrupt_watcher(commands: mpsc::Sender<ConnectionCommand>) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        if rt.block_on(tokio::signal::ctrl_c()).is_err() {
            return;
        }
        log::info!("Interrupted, disconnecting (press Ctrl-C again to quit)");
        let _ = commands.send(ConnectionCommand::Disconnect);

        // A scan or connect can hold the manager for a while
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            log::warn!("Interrupted again, exiting without disconnecting");
            std::process::exit(130);
        }
    });
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    };

    let (sender, receiver) = crossbeam_channel::unbounded::<SensorUpdate>();
    let (manager, commands) = ConnectionManager::new(sender);

    let manager_thread = std::thread::spawn(move || {
        manager.run();
    });

    spawn_interrupt_watcher(commands.clone());

    if commands.send(ConnectionCommand::Connect(config)).is_err() {
        log::error!("Connection thread is not running");
        return ExitCode::FAILURE;
    }

    let mut exit = ExitCode::SUCCESS;
    while let Ok(update) = receiver.recv() {
        match update {
            SensorUpdate::Measurement(measurement) => match measurement.energy_expended() {
                Some(energy) => log::info!("{} ({} kJ)", measurement, energy),
                None => log::info!("{}", measurement),
            },
            SensorUpdate::ConnectionStatus(ConnectionStatus::Connecting) => {
                log::info!("Connecting");
            }
            SensorUpdate::ConnectionStatus(ConnectionStatus::Connected(device)) => {
                log::info!("Connected to {}", device);
            }
            SensorUpdate::ConnectionStatus(ConnectionStatus::Disconnected) => {
                log::info!("Disconnected");
                break;
            }
            SensorUpdate::ConnectionStatus(ConnectionStatus::Error(reason)) => {
                log::error!("{}", reason);
                exit = ExitCode::FAILURE;
                break;
            }
        }
    }

    let _ = commands.send(ConnectionCommand::Shutdown);
    if manager_thread.join().is_err() {
        log::error!("Connection thread panicked");
        exit = ExitCode::FAILURE;
    }
    exit
}
