use miette::Diagnostic;
use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error, Diagnostic)]
pub enum RudderError {
    #[error("failed to load settings from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("configuration error: {message}")]
    Validation { message: String },

    #[error("malformed resource id '{id}': expected {expected}")]
    MalformedId { id: String, expected: &'static str },

    #[error("duplicate VM name '{name}' (vmid {vmid}): {detail}")]
    DuplicateResource {
        name: String,
        vmid: u32,
        detail: String,
    },

    #[error("no creation strategy: one of clone, iso or pxe must be set")]
    AmbiguousCreateStrategy,

    #[error("boot string '{boot}' has no network boot entry")]
    InvalidBootOrder { boot: String },

    #[error("disk '{disk}' cannot shrink from {current} to {requested}")]
    UnsupportedShrink {
        disk: String,
        current: String,
        requested: String,
    },

    #[error("VM {vmid} did not stop within {waited_secs}s")]
    StopTimeout { vmid: u32, waited_secs: u64 },

    #[error("guest agent on VM {vmid} unavailable: {message}")]
    GuestAgentUnavailable { vmid: u32, message: String },

    #[error("no reachable address found for VM {vmid}")]
    NoAddressFound { vmid: u32 },

    #[error("backend request failed")]
    Api {
        #[source]
        source: ApiError,
    },
}

impl From<ApiError> for RudderError {
    fn from(source: ApiError) -> Self {
        RudderError::Api { source }
    }
}
