//! GPIO line driver
//!
//! Each driver owns exactly one output line and pulses it through the Linux
//! GPIO character device. The reset circuits are transistor-switched and
//! active high: asserting the line pulls the board's reset pin low, and two
//! overlapping pulses on one line are undefined behavior for the circuit,
//! so the action state machine never issues them.

use std::time::Duration;

use async_trait::async_trait;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{AppError, Result};

/// Capability contract for pulsing a reset line
///
/// `pulse` holds the line asserted for exactly `duration`, then releases it.
/// Only the calling task blocks for the duration.
#[async_trait]
pub trait LineDriver: Send + Sync {
    async fn pulse(&self, duration: Duration) -> Result<()>;
}

/// GPIO character device driver for a single line
pub struct CdevLineDriver {
    chip_path: String,
    line: u32,
    handle: Mutex<Option<LineHandle>>,
}

impl CdevLineDriver {
    pub fn new(chip_path: impl Into<String>, line: u32) -> Self {
        Self {
            chip_path: chip_path.into(),
            line,
            handle: Mutex::new(None),
        }
    }

    /// Open the chip and request the line as an output, initially released.
    ///
    /// Called at startup while the process may still hold elevated rights;
    /// the handle stays open across a later privilege drop.
    pub fn init(&self) -> Result<()> {
        let mut chip = Chip::new(&self.chip_path).map_err(|e| {
            AppError::HardwareUnavailable(format!(
                "GPIO chip {} open failed: {}",
                self.chip_path, e
            ))
        })?;

        let line = chip.get_line(self.line).map_err(|e| {
            AppError::HardwareUnavailable(format!("GPIO line {} failed: {}", self.line, e))
        })?;

        let handle = line
            .request(LineRequestFlags::OUTPUT, 0, "fleetwake")
            .map_err(|e| {
                AppError::HardwareUnavailable(format!("GPIO request failed: {}", e))
            })?;

        *self.handle.lock() = Some(handle);
        debug!("GPIO line {}:{} configured", self.chip_path, self.line);
        Ok(())
    }

    fn set_value(&self, value: u8) -> Result<()> {
        let guard = self.handle.lock();
        let handle = guard.as_ref().ok_or_else(|| {
            AppError::HardwareUnavailable(format!(
                "GPIO line {}:{} not initialized",
                self.chip_path, self.line
            ))
        })?;
        handle
            .set_value(value)
            .map_err(|e| AppError::HardwareUnavailable(format!("GPIO set failed: {}", e)))
    }
}

#[async_trait]
impl LineDriver for CdevLineDriver {
    async fn pulse(&self, duration: Duration) -> Result<()> {
        self.set_value(1)?;

        // No lock held while the line is asserted
        sleep(duration).await;

        // Best-effort release: the handle going away releases the line anyway
        if let Err(e) = self.set_value(0) {
            debug!("GPIO release failed: {}", e);
        }

        Ok(())
    }
}

impl Drop for CdevLineDriver {
    fn drop(&mut self) {
        // Releasing the handle returns the line to its inactive state
        *self.handle.lock() = None;
    }
}
