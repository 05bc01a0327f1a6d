//! Linux sysfs GPIO driver
//!
//! Layout under the root (normally `/sys/class/gpio`):
//! - `export` - write the pin number to expose `gpio<N>/`
//! - `gpio<N>/direction` - `in` / `out`
//! - `gpio<N>/value` - `0` / `1`
//!
//! Lines are never unexported on release: unexport returns the pin to an
//! input and would drop the relay.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Level, LineHandle, PinDriver, PinError};

/// How long to wait for udev to make a freshly exported pin writable
const EXPORT_SETTLE_ATTEMPTS: u32 = 10;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(10);

pub struct SysfsPinDriver {
    root: PathBuf,
}

impl SysfsPinDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn export(&self, pin: u32) -> Result<(), PinError> {
        let export = self.root.join("export");
        write_file(&export, &pin.to_string()).map_err(|source| PinError::Io {
            pin,
            op: "export",
            source,
        })?;

        let dir = self.pin_dir(pin);
        for _ in 0..EXPORT_SETTLE_ATTEMPTS {
            if dir.join("direction").exists() {
                return Ok(());
            }
            std::thread::sleep(EXPORT_SETTLE_DELAY);
        }
        Err(PinError::Unavailable {
            pin,
            reason: format!("{} did not appear after export", dir.display()),
        })
    }
}

impl PinDriver for SysfsPinDriver {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn open_line(&self, pin: u32) -> Result<Box<dyn LineHandle>, PinError> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            tracing::debug!("Exporting gpio {} via {}", pin, self.root.display());
            self.export(pin)?;
        }
        Ok(Box::new(SysfsLine {
            pin,
            dir,
            value: None,
        }))
    }
}

struct SysfsLine {
    pin: u32,
    dir: PathBuf,
    value: Option<File>,
}

impl LineHandle for SysfsLine {
    fn configure_output(&mut self) -> Result<(), PinError> {
        let pin = self.pin;
        write_file(&self.dir.join("direction"), "out").map_err(|source| PinError::Io {
            pin,
            op: "set direction",
            source,
        })?;
        let value = OpenOptions::new()
            .write(true)
            .open(self.dir.join("value"))
            .map_err(|source| PinError::Io {
                pin,
                op: "open value",
                source,
            })?;
        self.value = Some(value);
        Ok(())
    }

    fn set_level(&mut self, level: Level) -> Result<(), PinError> {
        let pin = self.pin;
        let value = self.value.as_mut().ok_or_else(|| PinError::Unavailable {
            pin,
            reason: "line not configured as output".to_string(),
        })?;
        let byte: &[u8] = match level {
            Level::High => b"1",
            Level::Low => b"0",
        };
        value
            .write_all(byte)
            .and_then(|()| value.flush())
            .map_err(|source| PinError::Io {
                pin,
                op: "write value",
                source,
            })
    }

    fn release(&mut self) -> Result<(), PinError> {
        self.value = None;
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create(false).open(path)?;
    file.write_all(contents.as_bytes())
}
