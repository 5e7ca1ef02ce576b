//! Status codes and connection states reported by the native engine.

use std::fmt;

/// Closed set of status codes the native engine reports from its calls and
/// callbacks. The runtime never interprets these beyond [`StatusCode::is_ok`];
/// they are surfaced verbatim to application event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// No error encountered.
    Ok,
    /// The library version targeted does not match the supported one.
    BadApiVersion,
    /// Initialization of the library failed; cache locations may be invalid.
    ApiInitializationFailed,
    /// The track specified for playing cannot be played.
    TrackNotPlayable,
    /// The requested resource is not loaded.
    ResourceNotLoaded,
    /// The application key is invalid.
    BadApplicationKey,
    /// Login failed because of a bad username and/or password.
    BadCredentials,
    /// The specified username is banned.
    UserBanned,
    /// Cannot connect to the backend system.
    UnableToContactServer,
    /// Client is too old; the library needs to be updated.
    ClientTooOld,
    /// Some other permanent error occurred; retrying will not help.
    OtherPermanent,
    /// The user agent string is invalid or too long.
    BadUserAgent,
    /// No valid callback registered to handle events.
    MissingCallback,
    /// Input data was either missing or invalid.
    InvalidInData,
    /// Index out of range.
    IndexOutOfRange,
    /// The specified user needs a premium account.
    UserNeedsPremium,
    /// A transient error occurred; the operation may be retried.
    OtherTransient,
    /// The resource is currently loading.
    IsLoading,
    /// No suitable stream to play could be found.
    NoStreamAvailable,
    /// The requested operation is not allowed.
    PermissionDenied,
    /// No credentials are stored.
    NoCredentials,
    /// Network disabled.
    NetworkDisabled,
    /// This application is no longer allowed to use the service.
    ApplicationBanned,
}

impl StatusCode {
    /// Whether this code denotes success.
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Short human-readable description of the code.
    pub fn describe(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::BadApiVersion => "library version mismatch",
            StatusCode::ApiInitializationFailed => "engine initialization failed",
            StatusCode::TrackNotPlayable => "track is not playable",
            StatusCode::ResourceNotLoaded => "resource not loaded",
            StatusCode::BadApplicationKey => "invalid application key",
            StatusCode::BadCredentials => "bad username or password",
            StatusCode::UserBanned => "user is banned",
            StatusCode::UnableToContactServer => "unable to contact server",
            StatusCode::ClientTooOld => "client is too old",
            StatusCode::OtherPermanent => "permanent engine error",
            StatusCode::BadUserAgent => "invalid user agent",
            StatusCode::MissingCallback => "missing callback",
            StatusCode::InvalidInData => "invalid input data",
            StatusCode::IndexOutOfRange => "index out of range",
            StatusCode::UserNeedsPremium => "premium account required",
            StatusCode::OtherTransient => "transient engine error",
            StatusCode::IsLoading => "resource is loading",
            StatusCode::NoStreamAvailable => "no stream available",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::NoCredentials => "no stored credentials",
            StatusCode::NetworkDisabled => "network disabled",
            StatusCode::ApplicationBanned => "application is banned",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.describe())
    }
}

/// Connection state of a session as reported by the native engine.
///
/// Mutated only by engine callbacks or engine queries; `Undefined` is the
/// fallback whenever the native handle is absent or a query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// User not yet logged in.
    #[default]
    LoggedOut,
    /// Logged in against an access point.
    LoggedIn,
    /// Was logged in, but has now been disconnected.
    Disconnected,
    /// Logged in in offline mode.
    Offline,
    /// The connection state is unknown.
    Undefined,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::LoggedOut => "logged out",
            ConnectionState::LoggedIn => "logged in",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Offline => "offline",
            ConnectionState::Undefined => "undefined",
        };
        formatter.write_str(name)
    }
}
