use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;
use serialport;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open serial port: {source}")]
    OpenFailed { source: serialport::Error },

    #[error("Error communicating with serial port (serialport): {source}")]
    Serial { #[from] source: serialport::Error },

    #[error("Error reading/writing serial port: {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum HeartRateError {
    #[error("Error communicating with sensor (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },
}
