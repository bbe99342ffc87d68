//! Line-oriented console front-end. This is deliberately thin: it wires
//! the session, the telemetry sources and the orchestrator together and
//! translates typed commands into calls on them. No business logic here.

use std::sync::Arc;
use futures::StreamExt;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::{sleep, Duration};

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::session::{AlwaysGranted, DeviceSession, RadioCommands};
use crate::device::types::DeviceHandle;
use crate::error::AppRunError;
use crate::serial::transport::{available_ports, SerialLinkFactory};
use crate::sos::orchestrator::{Dialer, EmergencyOrchestrator, ShareSink};
use crate::telemetry::heart_rate::HeartRateMonitor;
use crate::telemetry::location::{ManualLocation, PositionFix};
use crate::voice::LoggingVoice;

pub struct ConsoleOptions {
    pub port: Option<String>,
    pub manual_fix: Option<PositionFix>,
    pub region: Option<String>,
}

struct OpenDialer;

impl Dialer for OpenDialer {
    fn dial(&self, number: &str) {
        if let Err(err) = open::that(format!("tel:{}", number)) {
            warn!("Failed to open dialer: {:?}", err);
        }
    }
}

struct PrintShare;

impl ShareSink for PrintShare {
    fn share(&self, text: &str) {
        println!("{}", text);
    }
}

// LANG is of the form fr_FR.UTF-8; the country part picks the number
fn detect_region() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            lang.split('.')
                .next()
                .and_then(|locale| locale.split('_').nth(1).map(str::to_string))
        })
        .unwrap_or_default()
}

fn print_help() {
    println!("commands:");
    println!("  ports                  list serial ports");
    println!("  connect [port]         connect the radio");
    println!("  disconnect             disconnect the radio");
    println!("  ptt down | ptt up      key / unkey the transmitter");
    println!("  freq <tx> <rx>         set frequencies (MHz)");
    println!("  vol <0-9> | sql <0-9>  volume / squelch");
    println!("  status                 request and show the radio status line");
    println!("  recover                ask the radio to recover");
    println!("  hr connect|disconnect  heart rate sensor");
    println!("  sos [test]             trigger the emergency flow");
    println!("  call | share           emergency number / shareable message");
    println!("  quit");
}

async fn confirm_sos(lines: &mut Lines<BufReader<Stdin>>, test_mode: bool) -> bool {
    println!(
        "Confirmer émission SOS sur 156.800 MHz ? ({}) [oui/non]",
        if test_mode { "test, sans émission" } else { "émission réelle" },
    );

    match lines.next_line().await {
        Ok(Some(answer)) => answer.trim().eq_ignore_ascii_case("oui"),
        _ => false,
    }
}

pub async fn run_console(options: ConsoleOptions) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                warn!("Failed to load config: {:?}", err);
            }
            Config::default()
        },
    };

    let session = Arc::new(DeviceSession::new(
        Box::new(SerialLinkFactory),
        Box::new(AlwaysGranted),
        config.tx_timeout_ms,
        config.idle_timeout_ms,
    ));

    let monitor = HeartRateMonitor::new(config.heart_rate_scan_secs);

    let location = Arc::new(ManualLocation::new(options.manual_fix));
    let voice = Arc::new(LoggingVoice);
    let orchestrator = Arc::new(EmergencyOrchestrator::new(
        session.clone() as Arc<dyn RadioCommands>,
        location,
        voice,
        monitor.cell(),
    ));

    let region = options
        .region
        .or_else(|| config.region.clone())
        .unwrap_or_else(detect_region);

    let mut session_events = session.subscribe();
    tokio::spawn(async move {
        while let Some(event) = session_events.next().await {
            println!("[radio] {:?}", event);
        }
    });

    let mut heart_rate_events = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(event) = heart_rate_events.next().await {
            println!("[bague] {:?}", event);
        }
    });

    let mut sos_events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Some(event) = sos_events.next().await {
            println!("[sos] {:?}", event);
        }
    });

    let startup_port = options.port.or_else(|| config.port.clone()).or_else(|| {
        available_ports().first().map(|(name, _)| name.clone())
    });

    match &startup_port {
        Some(port) => {
            session.request_connect(DeviceHandle::new(port.clone(), "Pico"));
            session.set_volume(config.volume);
            session.set_squelch(config.squelch);
        },
        None => println!("Aucun port série trouvé; utilisez `ports` puis `connect <port>`"),
    }

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => {},
            ["help"] => print_help(),
            ["ports"] => {
                for (name, description) in available_ports() {
                    println!("  {} ({})", name, description);
                }
            },
            ["connect", port] => {
                session.request_connect(DeviceHandle::new(port.to_string(), "Pico"));

                // remember an explicitly chosen port for the next start
                if config.port.as_deref() != Some(*port) {
                    config.port = Some(port.to_string());
                    if let Err(err) = config_io.save(config.clone()).await {
                        warn!("Failed to save config: {:?}", err);
                    }
                }
            },
            ["connect"] => match &startup_port {
                Some(port) => session.request_connect(DeviceHandle::new(port.clone(), "Pico")),
                None => println!("Aucun port série connu"),
            },
            ["disconnect"] => session.disconnect(),
            ["ptt", "down"] => session.ptt_down(),
            ["ptt", "up"] => session.ptt_up(),
            ["freq", tx, rx] => match (tx.parse::<f64>(), rx.parse::<f64>()) {
                (Ok(tx), Ok(rx)) => session.set_frequency(tx, rx),
                _ => println!("freq: nombres invalides"),
            },
            ["vol", level] => match level.parse::<u8>() {
                Ok(level) => session.set_volume(level),
                Err(_) => println!("vol: niveau invalide"),
            },
            ["sql", level] => match level.parse::<u8>() {
                Ok(level) => session.set_squelch(level),
                Err(_) => println!("sql: niveau invalide"),
            },
            ["status"] => {
                session.request_status();
                sleep(Duration::from_millis(300)).await;
                match session.last_status_line() {
                    Some(status_line) => println!("Pico: {}", status_line),
                    None => println!("Pico: (aucune réponse)"),
                }
            },
            ["recover"] => session.recover(),
            ["hr", "connect"] => monitor.connect(),
            ["hr", "disconnect"] => monitor.disconnect(),
            ["sos"] => {
                if confirm_sos(&mut lines, false).await {
                    orchestrator.trigger_sos(false).await;
                }
            },
            ["sos", "test"] => {
                if confirm_sos(&mut lines, true).await {
                    orchestrator.trigger_sos(true).await;
                }
            },
            ["call"] => {
                orchestrator.call_emergency(&region, &OpenDialer);
            },
            ["share"] => {
                orchestrator.share_emergency(&PrintShare).await;
            },
            ["quit"] | ["exit"] => break,
            _ => println!("commande inconnue: {} (essayez `help`)", line),
        }
    }

    monitor.disconnect();
    session.disconnect();

    Ok(())
}
