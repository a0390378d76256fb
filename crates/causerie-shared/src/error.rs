use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected to a group")]
    NotConnected,

    #[error("A token request is already pending")]
    TokenRequestPending,

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Join failed: {0}")]
    JoinFailed(String),
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Display capture is not available: {0}")]
    DisplayCapture(String),
}

#[derive(Error, Debug)]
pub enum AdminApiError {
    #[error("Token creation failed: server answered {0}")]
    BadStatus(String),

    #[error("Server didn't return a Location header")]
    MissingLocation,

    #[error("HTTP error: {0}")]
    Http(String),
}
