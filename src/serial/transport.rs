use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::serial::constants::{BAUD_RATE, IO_DEADLINE, READ_CHUNK_SIZE, READ_ERROR_DELAY};
use crate::serial::framing::LineFramer;

/// Single-slot cell holding the latest fully-received line. One producer
/// (the read loop), last write wins, no history.
pub type LastLineCell = Arc<Mutex<Option<String>>>;

pub fn new_last_line_cell() -> LastLineCell {
    Arc::new(Mutex::new(None))
}

/// Byte-level access to one open link. Writes and reads are bounded by a
/// per-call deadline; a read returning `Ok(0)` means the deadline passed
/// without data.
pub trait RawLink: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Second handle onto the same link, so the read loop can own its end
    /// while the session keeps writing.
    fn try_clone_link(&self) -> Result<Box<dyn RawLink>, TransportError>;
}

/// Opens a [`RawLink`] against an addressed port.
pub trait LinkFactory: Send + Sync {
    fn open(&self, port_id: &str) -> Result<Box<dyn RawLink>, TransportError>;
}

pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl RawLink for SerialLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(count) => Ok(count),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(TransportError::IOError { source: err }),
        }
    }

    fn try_clone_link(&self) -> Result<Box<dyn RawLink>, TransportError> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SerialLink { port }))
    }
}

pub struct SerialLinkFactory;

impl LinkFactory for SerialLinkFactory {
    fn open(&self, port_id: &str) -> Result<Box<dyn RawLink>, TransportError> {
        let port = serialport::new(port_id, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(IO_DEADLINE))
            .open()
            .map_err(|source| TransportError::OpenFailed { source })?;

        Ok(Box::new(SerialLink { port }))
    }
}

/// Enumerate serial ports the Pico could be attached to.
pub fn available_ports() -> Vec<(String, String)> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|port| {
                let description = match port.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        info.product.unwrap_or_else(|| "USB serial".to_string())
                    },
                    _ => "serial".to_string(),
                };
                (port.port_name, description)
            })
            .collect(),
        Err(err) => {
            warn!("Failed to enumerate serial ports: {}", err);
            Vec::new()
        },
    }
}

/// Run the framed read loop on a dedicated thread until `cancel` fires.
///
/// Timeouts and read errors are "no data this iteration"; only
/// cancellation stops the loop. Each completed line overwrites the
/// single-slot cell.
pub fn spawn_read_loop(
    mut link: Box<dyn RawLink>,
    cancel: CancellationToken,
    last_line: LastLineCell,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        while !cancel.is_cancelled() {
            let count = match link.read_bytes(&mut buf) {
                Ok(0) => continue,
                Ok(count) => count,
                Err(err) => {
                    debug!("Serial read yielded no data: {}", err);
                    thread::sleep(Duration::from_millis(READ_ERROR_DELAY));
                    continue;
                },
            };

            for line in framer.push(&buf[..count]) {
                debug!("Pico: {}", line);
                let mut slot = last_line.lock().expect("Failed to lock last line slot");
                *slot = Some(line);
            }
        }

        debug!("Serial read loop stopped");
    })
}
