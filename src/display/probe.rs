//! Startup hardware probing
//!
//! Variants are tried in priority order (character grid, pixel display,
//! console), each with bounded retries. The first that comes up is the sink
//! for the rest of the process. The console never fails.

use super::char_grid::CharGridSink;
use super::console::ConsoleSink;
use super::driver::{DriverDevice, DriverSpec};
use super::pixel::{PixelLayout, PixelSink};
use super::{DisplaySink, DisplayVariant, set_hardware_state};
use crate::config::{DisplayConfig, HardwareConfig};
use crate::lifecycle::ServiceLease;
use crate::retry::retry;
use crate::{Error, Result};

/// Variants to try, in order
#[must_use]
pub fn probe_order(preferred: Option<DisplayVariant>) -> Vec<DisplayVariant> {
    match preferred {
        Some(DisplayVariant::Console) => vec![DisplayVariant::Console],
        Some(variant) => vec![variant, DisplayVariant::Console],
        None => DisplayVariant::PRIORITY.to_vec(),
    }
}

/// Pick and open the display sink
///
/// The chosen variant is recorded as the process-wide hardware state.
pub async fn select_sink(
    hardware: &HardwareConfig,
    display: &DisplayConfig,
) -> Box<dyn DisplaySink> {
    for variant in probe_order(hardware.preferred) {
        match open_variant(variant, hardware, display).await {
            Ok(sink) => {
                if !set_hardware_state(variant) {
                    tracing::debug!(%variant, "hardware state already recorded");
                }
                tracing::info!(%variant, "display selected");
                return sink;
            }
            Err(e) => tracing::warn!(%variant, error = %e, "display unavailable, trying next"),
        }
    }

    // probe_order always ends with the console, which cannot fail
    Box::new(ConsoleSink::stdout())
}

/// Open one specific variant
///
/// # Errors
///
/// Returns `HardwareUnavailable` if the variant's probe fails after all retries
pub async fn open_variant(
    variant: DisplayVariant,
    hardware: &HardwareConfig,
    display: &DisplayConfig,
) -> Result<Box<dyn DisplaySink>> {
    match variant {
        DisplayVariant::CharGrid => open_char_grid(hardware, display).await,
        DisplayVariant::Pixel => open_pixel(hardware, display).await,
        DisplayVariant::Console => Ok(Box::new(ConsoleSink::stdout())),
    }
}

fn driver_spec(
    command: Option<&String>,
    variant: DisplayVariant,
    hardware: &HardwareConfig,
) -> Result<DriverSpec> {
    let command = command
        .ok_or_else(|| Error::HardwareUnavailable(format!("no {variant} driver configured")))?;

    Ok(DriverSpec::new(command.as_str())
        .env("VOXPANEL_I2C_ADDRESS", format!("0x{:02x}", hardware.lcd_i2c_address))
        .env("VOXPANEL_I2C_BUS", hardware.i2c_bus))
}

async fn open_char_grid(
    hardware: &HardwareConfig,
    display: &DisplayConfig,
) -> Result<Box<dyn DisplaySink>> {
    let spec = driver_spec(hardware.lcd_driver.as_ref(), DisplayVariant::CharGrid, hardware)?
        .env("VOXPANEL_COLS", hardware.lcd_cols)
        .env("VOXPANEL_ROWS", hardware.lcd_rows);

    retry(&hardware.probe, "lcd probe", |_| spec.probe()).await?;
    let device = DriverDevice::spawn(&spec)?;

    Ok(Box::new(CharGridSink::new(
        Box::new(device),
        hardware.lcd_cols,
        hardware.lcd_rows,
        display.overflow,
        display.scroll_step,
    )))
}

async fn open_pixel(
    hardware: &HardwareConfig,
    display: &DisplayConfig,
) -> Result<Box<dyn DisplaySink>> {
    let spec = driver_spec(hardware.oled_driver.as_ref(), DisplayVariant::Pixel, hardware)?
        .env("VOXPANEL_WIDTH", hardware.oled_width)
        .env("VOXPANEL_HEIGHT", hardware.oled_height);

    // The owning service must let go of the display before it can answer.
    // If probing fails below, dropping the lease restarts the service.
    let lease = hardware
        .display_service
        .clone()
        .map(ServiceLease::acquire)
        .transpose()?;

    retry(&hardware.probe, "oled probe", |_| spec.probe()).await?;
    let device = DriverDevice::spawn(&spec)?;

    let layout = PixelLayout {
        width: hardware.oled_width,
        height: hardware.oled_height,
        glyph_width: hardware.glyph_width,
        line_height: hardware.line_height,
    };
    Ok(Box::new(
        PixelSink::new(Box::new(device), layout, display.line_dwell).with_lease(lease),
    ))
}
