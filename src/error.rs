use thiserror::Error;

pub type Result<T> = std::result::Result<T, OscilokError>;

/// The error taxonomy the Scope Facade and Polling Controller classify on.
#[derive(Debug, Error)]
pub enum OscilokError {
    #[error("oscilloscope not found on USB bus")]
    DeviceNotFound,

    #[error("no libusb backend available")]
    NoBackend,

    #[error("USB transfer timed out")]
    Timeout,

    #[error("expected sample subcommand never arrived")]
    SampleLost,

    #[error("oscilloscope error: {0}")]
    Oscilloscope(String),

    #[error("USB error: {0}")]
    Usb(String),
}

impl From<libusb_async::UsbAsyncError> for OscilokError {
    fn from(err: libusb_async::UsbAsyncError) -> Self {
        use libusb_async::UsbAsyncError;
        match err {
            UsbAsyncError::Usb(rusb::Error::Timeout) => OscilokError::Timeout,
            UsbAsyncError::Usb(rusb::Error::NoDevice) | UsbAsyncError::Usb(rusb::Error::NotFound) => {
                OscilokError::DeviceNotFound
            }
            UsbAsyncError::Usb(other) => OscilokError::Usb(other.to_string()),
            UsbAsyncError::Join(other) => OscilokError::Usb(other.to_string()),
        }
    }
}
