//! Claims the DSO's USB interface and moves protocol frames across bulk endpoints.

use std::time::Duration;

use libusb_async::DeviceHandle;
use log::{debug, warn};

use crate::error::{OscilokError, Result};
use crate::protocol::{self, Frame, CMD_SAMPLE_RESPONSE, MARK_DEBUG, MARK_NORMAL, SAMPLE_DATA_SUBCMD, SAMPLE_STOP_SUBCMD, SAMPLE_SUM_SUBCMD};

const VENDOR_ID: u16 = 0x049F;
const PRODUCT_ID: u16 = 0x505A;
const INTERFACE: u8 = 0;
const CONFIGURATION: u8 = 0;
const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x81;

const SAMPLE_READ_SIZE: usize = 32 * 1024;
const DEFAULT_READ_SIZE: usize = 4 * 1024;
const READ_TIMEOUT: Duration = Duration::from_millis(1000);
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
const ACQUISITION_DELAY: Duration = Duration::from_millis(80);

/// Channel sentinel meaning "no sample response at all".
pub const CHANNEL_NONE: i32 = -2;

pub struct Transport {
    handle: DeviceHandle,
}

impl Transport {
    /// Find the DSO by vendor/product, activate configuration 0, detach any
    /// kernel driver, and claim interface 0.
    pub async fn open() -> Result<Transport> {
        let devices = libusb_async::devices().await?;
        let mut found = None;
        for device in devices {
            let descriptor = device.device_descriptor().await?;
            if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
                found = Some(device);
                break;
            }
        }
        let device = found.ok_or(OscilokError::DeviceNotFound)?;
        let handle = device.open().await?;

        handle.set_auto_detach_kernel_driver(true).await.ok();
        handle.set_active_configuration(CONFIGURATION).await?;
        handle.claim_interface(INTERFACE).await?;

        Ok(Transport { handle })
    }

    pub async fn close(&self) {
        let _ = self.handle.release_interface(INTERFACE).await;
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        debug!("write frame command={:#04x} len={}", frame.command, bytes.len());
        self.handle.write_bulk(ENDPOINT_OUT, &bytes, WRITE_TIMEOUT).await?;
        Ok(())
    }

    async fn read_frame(&self, size: usize) -> Result<Option<Frame>> {
        let mut buf = vec![0u8; size];
        let n = match self.handle.read_bulk(ENDPOINT_IN, &mut buf, READ_TIMEOUT).await {
            Ok(n) => n,
            Err(libusb_async::UsbAsyncError::Usb(rusb::Error::Timeout)) => {
                warn!("bulk read timed out");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Frame::decode(&buf[..n]))
    }

    /// Blocking read up to 2 attempts; nudges the device with an echo on an
    /// empty first read, then returns the last frame seen even if it never
    /// matched `command`.
    async fn read_expect(&self, command: u8, size: usize) -> Result<Option<Frame>> {
        let mut last = None;
        for attempt in 0..2 {
            match self.read_frame(size).await? {
                Some(frame) if frame.command == command => return Ok(Some(frame)),
                Some(frame) => last = Some(frame),
                None if attempt == 0 => {
                    self.echo(None).await?;
                }
                None => {}
            }
        }
        Ok(last)
    }

    pub async fn init(&self) -> Result<()> {
        let frame = Frame::new(MARK_DEBUG, protocol::CMD_INIT, None, Vec::new());
        self.write_frame(&frame).await?;
        self.read_frame(DEFAULT_READ_SIZE).await?;
        Ok(())
    }

    pub async fn echo(&self, text: Option<&str>) -> Result<()> {
        let data = text.map(|s| s.as_bytes().to_vec()).unwrap_or_default();
        let frame = Frame::new(MARK_NORMAL, protocol::CMD_ECHO, None, data);
        self.write_frame(&frame).await
    }

    pub async fn buzzer(&self, duration_units: u8) -> Result<()> {
        let clamped = duration_units.clamp(1, 255);
        let frame = Frame::new(MARK_DEBUG, protocol::CMD_BUZZER, None, vec![clamped]);
        self.write_frame(&frame).await
    }

    pub async fn lock_panel(&self, lock: bool) -> Result<()> {
        let frame = Frame::new(
            MARK_NORMAL,
            protocol::CMD_LOCK_PANEL,
            Some(0x01),
            vec![lock as u8],
        );
        self.write_frame(&frame).await
    }

    pub async fn request_settings(&self) -> Result<()> {
        let frame = Frame::new(MARK_NORMAL, protocol::CMD_READ_SETTINGS, None, Vec::new());
        self.write_frame(&frame).await
    }

    pub async fn get_settings(&self) -> Result<Vec<u8>> {
        match self.read_expect(protocol::CMD_SETTINGS_RESPONSE, DEFAULT_READ_SIZE).await? {
            Some(frame) if frame.command == protocol::CMD_SETTINGS_RESPONSE => Ok(frame.data),
            _ => Err(OscilokError::SampleLost),
        }
    }

    pub async fn sample(&self, channel: u8) -> Result<()> {
        let frame = Frame::new(MARK_NORMAL, protocol::CMD_SAMPLE, Some(0x01), vec![channel]);
        self.write_frame(&frame).await?;
        tokio::time::sleep(ACQUISITION_DELAY).await;
        Ok(())
    }

    pub async fn set_system_time(&self, year: u16, month: u8, day: u8, h: u8, m: u8, s: u8) -> Result<()> {
        let year_lo = (year & 0xFF) as u8;
        let year_hi = (year >> 8) as u8;
        let frame = Frame::new(
            MARK_NORMAL,
            protocol::CMD_SET_SYSTEM_TIME,
            None,
            vec![year_lo, year_hi, month, day, h, m, s],
        );
        self.write_frame(&frame).await
    }

    /// Assemble a multi-frame sample response. Returns `(data, channel)`;
    /// `channel == CHANNEL_NONE` if no sample response arrived at all.
    pub async fn get_sample(&self) -> Result<(Vec<u8>, i32)> {
        let mut buffer = Vec::new();
        let mut channel = CHANNEL_NONE;

        let first = self.read_expect(CMD_SAMPLE_RESPONSE, SAMPLE_READ_SIZE).await?;
        let mut frame = match first {
            Some(f) if f.command == CMD_SAMPLE_RESPONSE => f,
            _ => return Ok((buffer, channel)),
        };

        loop {
            match frame.subcommand {
                Some(SAMPLE_DATA_SUBCMD) if !frame.data.is_empty() => {
                    channel = frame.data[0] as i32;
                    buffer.extend_from_slice(&frame.data[1..]);
                }
                Some(SAMPLE_SUM_SUBCMD) | Some(SAMPLE_STOP_SUBCMD) => break,
                _ => {}
            }

            match self.read_frame(SAMPLE_READ_SIZE).await? {
                Some(next) if next.command == CMD_SAMPLE_RESPONSE => frame = next,
                _ => break,
            }
        }

        Ok((buffer, channel))
    }
}
