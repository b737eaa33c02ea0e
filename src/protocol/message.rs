//! The tagged-sum message union and its wire encoding.
//!
//! Every [`Message`] variant carries one payload struct. On the wire a
//! message is a 2-element array `[tag_string, data_record]`; serde's own
//! enum representations (externally/internally/adjacently tagged) don't
//! produce that exact shape, so `Serialize`/`Deserialize` are hand-written
//! below instead of derived.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

/// Which standard stream a chunk of session data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStream {
    Stdin,
    Stdout,
    Stderr,
}

/// The kind of entry returned by a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEntryType {
    File,
    Directory,
    Symlink,
    Other,
}

/// A single entry in a [`Message::FileListResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub entry_type: FileEntryType,
    pub size: u64,
    pub mode: u32,
    pub modified: u64,
}

/// Machine-readable error classification carried in [`Message::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unknown,
    Unauthorized,
    NotFound,
    InvalidRequest,
    InternalError,
    Timeout,
    RateLimited,
    AlreadyExists,
    PermissionDenied,
    VersionMismatch,
}

/// The full set of application messages exchanged over a data channel.
///
/// Field order within each variant is the wire order: changing it changes
/// the encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SessionCreate {
        cols: u16,
        rows: u16,
        shell: Option<String>,
        env: Vec<(String, String)>,
        cwd: Option<String>,
    },
    SessionCreated {
        session_id: String,
        pid: u32,
    },
    SessionAttach {
        session_id: String,
    },
    SessionDetach {
        session_id: String,
    },
    SessionKill {
        session_id: String,
        signal: Option<u8>,
    },
    SessionResize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    SessionData {
        session_id: String,
        stream: DataStream,
        data: Vec<u8>,
    },
    SessionClosed {
        session_id: String,
        exit_code: Option<i32>,
        signal: Option<u8>,
        reason: Option<String>,
    },
    FileListRequest {
        path: String,
        include_hidden: bool,
    },
    FileListResponse {
        path: String,
        entries: Vec<FileEntry>,
    },
    FileDownloadRequest {
        path: String,
        offset: u64,
        chunk_size: u32,
    },
    FileDownloadChunk {
        path: String,
        offset: u64,
        total_size: u64,
        data: Vec<u8>,
        is_last: bool,
    },
    FileUploadStart {
        path: String,
        size: u64,
        mode: u32,
        overwrite: bool,
    },
    FileUploadChunk {
        path: String,
        offset: u64,
        data: Vec<u8>,
    },
    FileUploadComplete {
        path: String,
        checksum: Vec<u8>,
    },
    DeviceInfo {
        device_id: String,
        name: String,
        os: String,
        os_version: String,
        arch: String,
        protocol_version: u8,
    },
    DeviceApprovalRequest {
        device_id: String,
        name: String,
        public_key: Vec<u8>,
        reason: Option<String>,
    },
    DeviceApproved {
        device_id: String,
        expires_at: Option<u64>,
        allowed_capabilities: Vec<String>,
    },
    DeviceRejected {
        device_id: String,
        reason: String,
        retry_allowed: bool,
    },
    Ping {
        timestamp: u64,
        payload: Vec<u8>,
    },
    Pong {
        timestamp: u64,
        payload: Vec<u8>,
    },
    Error {
        code: ErrorCode,
        message: String,
        context: Option<String>,
        recoverable: bool,
    },
    Capabilities {
        protocol_versions: Vec<u8>,
        features: Vec<String>,
        max_message_size: u32,
        max_sessions: u16,
        compression: Vec<String>,
    },
}

impl Message {
    /// The exact tag string used on the wire for this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::SessionCreate { .. } => "SessionCreate",
            Message::SessionCreated { .. } => "SessionCreated",
            Message::SessionAttach { .. } => "SessionAttach",
            Message::SessionDetach { .. } => "SessionDetach",
            Message::SessionKill { .. } => "SessionKill",
            Message::SessionResize { .. } => "SessionResize",
            Message::SessionData { .. } => "SessionData",
            Message::SessionClosed { .. } => "SessionClosed",
            Message::FileListRequest { .. } => "FileListRequest",
            Message::FileListResponse { .. } => "FileListResponse",
            Message::FileDownloadRequest { .. } => "FileDownloadRequest",
            Message::FileDownloadChunk { .. } => "FileDownloadChunk",
            Message::FileUploadStart { .. } => "FileUploadStart",
            Message::FileUploadChunk { .. } => "FileUploadChunk",
            Message::FileUploadComplete { .. } => "FileUploadComplete",
            Message::DeviceInfo { .. } => "DeviceInfo",
            Message::DeviceApprovalRequest { .. } => "DeviceApprovalRequest",
            Message::DeviceApproved { .. } => "DeviceApproved",
            Message::DeviceRejected { .. } => "DeviceRejected",
            Message::Ping { .. } => "Ping",
            Message::Pong { .. } => "Pong",
            Message::Error { .. } => "Error",
            Message::Capabilities { .. } => "Capabilities",
        }
    }
}

const VARIANTS: &[&str] = &[
    "SessionCreate",
    "SessionCreated",
    "SessionAttach",
    "SessionDetach",
    "SessionKill",
    "SessionResize",
    "SessionData",
    "SessionClosed",
    "FileListRequest",
    "FileListResponse",
    "FileDownloadRequest",
    "FileDownloadChunk",
    "FileUploadStart",
    "FileUploadChunk",
    "FileUploadComplete",
    "DeviceInfo",
    "DeviceApprovalRequest",
    "DeviceApproved",
    "DeviceRejected",
    "Ping",
    "Pong",
    "Error",
    "Capabilities",
];

// Each variant's fields serialize positionally as this tuple struct so field
// order (not name) determines wire layout, matching how `Envelope` itself
// serializes via `rmp_serde::to_vec`.
macro_rules! data_tuple {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct $name {
            $($field: $ty),*
        }
    };
}

data_tuple!(SessionCreateData {
    cols: u16,
    rows: u16,
    shell: Option<String>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
});
data_tuple!(SessionCreatedData {
    session_id: String,
    pid: u32,
});
data_tuple!(SessionAttachData {
    session_id: String,
});
data_tuple!(SessionDetachData {
    session_id: String,
});
data_tuple!(SessionKillData {
    session_id: String,
    signal: Option<u8>,
});
data_tuple!(SessionResizeData {
    session_id: String,
    cols: u16,
    rows: u16,
});
data_tuple!(SessionDataData {
    session_id: String,
    stream: DataStream,
    data: ByteBuf,
});
data_tuple!(SessionClosedData {
    session_id: String,
    exit_code: Option<i32>,
    signal: Option<u8>,
    reason: Option<String>,
});
data_tuple!(FileListRequestData {
    path: String,
    include_hidden: bool,
});
data_tuple!(FileListResponseData {
    path: String,
    entries: Vec<FileEntry>,
});
data_tuple!(FileDownloadRequestData {
    path: String,
    offset: u64,
    chunk_size: u32,
});
data_tuple!(FileDownloadChunkData {
    path: String,
    offset: u64,
    total_size: u64,
    data: ByteBuf,
    is_last: bool,
});
data_tuple!(FileUploadStartData {
    path: String,
    size: u64,
    mode: u32,
    overwrite: bool,
});
data_tuple!(FileUploadChunkData {
    path: String,
    offset: u64,
    data: ByteBuf,
});
data_tuple!(FileUploadCompleteData {
    path: String,
    checksum: ByteBuf,
});
data_tuple!(DeviceInfoData {
    device_id: String,
    name: String,
    os: String,
    os_version: String,
    arch: String,
    protocol_version: u8,
});
data_tuple!(DeviceApprovalRequestData {
    device_id: String,
    name: String,
    public_key: ByteBuf,
    reason: Option<String>,
});
data_tuple!(DeviceApprovedData {
    device_id: String,
    expires_at: Option<u64>,
    allowed_capabilities: Vec<String>,
});
data_tuple!(DeviceRejectedData {
    device_id: String,
    reason: String,
    retry_allowed: bool,
});
data_tuple!(PingPongData {
    timestamp: u64,
    payload: ByteBuf,
});
data_tuple!(ErrorData {
    code: ErrorCode,
    message: String,
    context: Option<String>,
    recoverable: bool,
});
data_tuple!(CapabilitiesData {
    protocol_versions: Vec<u8>,
    features: Vec<String>,
    max_message_size: u32,
    max_sessions: u16,
    compression: Vec<String>,
});

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(self.tag())?;
        match self {
            Message::SessionCreate {
                cols,
                rows,
                shell,
                env,
                cwd,
            } => tuple.serialize_element(&SessionCreateData {
                cols: *cols,
                rows: *rows,
                shell: shell.clone(),
                env: env.clone(),
                cwd: cwd.clone(),
            })?,
            Message::SessionCreated { session_id, pid } => {
                tuple.serialize_element(&SessionCreatedData {
                    session_id: session_id.clone(),
                    pid: *pid,
                })?
            }
            Message::SessionAttach { session_id } => tuple.serialize_element(&SessionAttachData {
                session_id: session_id.clone(),
            })?,
            Message::SessionDetach { session_id } => tuple.serialize_element(&SessionDetachData {
                session_id: session_id.clone(),
            })?,
            Message::SessionKill { session_id, signal } => {
                tuple.serialize_element(&SessionKillData {
                    session_id: session_id.clone(),
                    signal: *signal,
                })?
            }
            Message::SessionResize {
                session_id,
                cols,
                rows,
            } => tuple.serialize_element(&SessionResizeData {
                session_id: session_id.clone(),
                cols: *cols,
                rows: *rows,
            })?,
            Message::SessionData {
                session_id,
                stream,
                data,
            } => tuple.serialize_element(&SessionDataData {
                session_id: session_id.clone(),
                stream: *stream,
                data: ByteBuf::from(data.clone()),
            })?,
            Message::SessionClosed {
                session_id,
                exit_code,
                signal,
                reason,
            } => tuple.serialize_element(&SessionClosedData {
                session_id: session_id.clone(),
                exit_code: *exit_code,
                signal: *signal,
                reason: reason.clone(),
            })?,
            Message::FileListRequest {
                path,
                include_hidden,
            } => tuple.serialize_element(&FileListRequestData {
                path: path.clone(),
                include_hidden: *include_hidden,
            })?,
            Message::FileListResponse { path, entries } => {
                tuple.serialize_element(&FileListResponseData {
                    path: path.clone(),
                    entries: entries.clone(),
                })?
            }
            Message::FileDownloadRequest {
                path,
                offset,
                chunk_size,
            } => tuple.serialize_element(&FileDownloadRequestData {
                path: path.clone(),
                offset: *offset,
                chunk_size: *chunk_size,
            })?,
            Message::FileDownloadChunk {
                path,
                offset,
                total_size,
                data,
                is_last,
            } => tuple.serialize_element(&FileDownloadChunkData {
                path: path.clone(),
                offset: *offset,
                total_size: *total_size,
                data: ByteBuf::from(data.clone()),
                is_last: *is_last,
            })?,
            Message::FileUploadStart {
                path,
                size,
                mode,
                overwrite,
            } => tuple.serialize_element(&FileUploadStartData {
                path: path.clone(),
                size: *size,
                mode: *mode,
                overwrite: *overwrite,
            })?,
            Message::FileUploadChunk { path, offset, data } => {
                tuple.serialize_element(&FileUploadChunkData {
                    path: path.clone(),
                    offset: *offset,
                    data: ByteBuf::from(data.clone()),
                })?
            }
            Message::FileUploadComplete { path, checksum } => {
                tuple.serialize_element(&FileUploadCompleteData {
                    path: path.clone(),
                    checksum: ByteBuf::from(checksum.clone()),
                })?
            }
            Message::DeviceInfo {
                device_id,
                name,
                os,
                os_version,
                arch,
                protocol_version,
            } => tuple.serialize_element(&DeviceInfoData {
                device_id: device_id.clone(),
                name: name.clone(),
                os: os.clone(),
                os_version: os_version.clone(),
                arch: arch.clone(),
                protocol_version: *protocol_version,
            })?,
            Message::DeviceApprovalRequest {
                device_id,
                name,
                public_key,
                reason,
            } => tuple.serialize_element(&DeviceApprovalRequestData {
                device_id: device_id.clone(),
                name: name.clone(),
                public_key: ByteBuf::from(public_key.clone()),
                reason: reason.clone(),
            })?,
            Message::DeviceApproved {
                device_id,
                expires_at,
                allowed_capabilities,
            } => tuple.serialize_element(&DeviceApprovedData {
                device_id: device_id.clone(),
                expires_at: *expires_at,
                allowed_capabilities: allowed_capabilities.clone(),
            })?,
            Message::DeviceRejected {
                device_id,
                reason,
                retry_allowed,
            } => tuple.serialize_element(&DeviceRejectedData {
                device_id: device_id.clone(),
                reason: reason.clone(),
                retry_allowed: *retry_allowed,
            })?,
            Message::Ping { timestamp, payload } => tuple.serialize_element(&PingPongData {
                timestamp: *timestamp,
                payload: ByteBuf::from(payload.clone()),
            })?,
            Message::Pong { timestamp, payload } => tuple.serialize_element(&PingPongData {
                timestamp: *timestamp,
                payload: ByteBuf::from(payload.clone()),
            })?,
            Message::Error {
                code,
                message,
                context,
                recoverable,
            } => tuple.serialize_element(&ErrorData {
                code: *code,
                message: message.clone(),
                context: context.clone(),
                recoverable: *recoverable,
            })?,
            Message::Capabilities {
                protocol_versions,
                features,
                max_message_size,
                max_sessions,
                compression,
            } => tuple.serialize_element(&CapabilitiesData {
                protocol_versions: protocol_versions.clone(),
                features: features.clone(),
                max_message_size: *max_message_size,
                max_sessions: *max_sessions,
                compression: compression.clone(),
            })?,
        }
        tuple.end()
    }
}

struct MessageVisitor;

impl<'de> Visitor<'de> for MessageVisitor {
    type Value = Message;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a [tag, data] message pair")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Message, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let tag: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;

        macro_rules! variant {
            ($data_ty:ty, $build:expr) => {{
                let data: $data_ty = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                $build(data)
            }};
        }

        let message = match tag.as_str() {
            "SessionCreate" => variant!(SessionCreateData, |d: SessionCreateData| {
                Message::SessionCreate {
                    cols: d.cols,
                    rows: d.rows,
                    shell: d.shell,
                    env: d.env,
                    cwd: d.cwd,
                }
            }),
            "SessionCreated" => variant!(SessionCreatedData, |d: SessionCreatedData| {
                Message::SessionCreated {
                    session_id: d.session_id,
                    pid: d.pid,
                }
            }),
            "SessionAttach" => variant!(SessionAttachData, |d: SessionAttachData| {
                Message::SessionAttach {
                    session_id: d.session_id,
                }
            }),
            "SessionDetach" => variant!(SessionDetachData, |d: SessionDetachData| {
                Message::SessionDetach {
                    session_id: d.session_id,
                }
            }),
            "SessionKill" => variant!(SessionKillData, |d: SessionKillData| {
                Message::SessionKill {
                    session_id: d.session_id,
                    signal: d.signal,
                }
            }),
            "SessionResize" => variant!(SessionResizeData, |d: SessionResizeData| {
                Message::SessionResize {
                    session_id: d.session_id,
                    cols: d.cols,
                    rows: d.rows,
                }
            }),
            "SessionData" => variant!(SessionDataData, |d: SessionDataData| {
                Message::SessionData {
                    session_id: d.session_id,
                    stream: d.stream,
                    data: d.data.into_vec(),
                }
            }),
            "SessionClosed" => variant!(SessionClosedData, |d: SessionClosedData| {
                Message::SessionClosed {
                    session_id: d.session_id,
                    exit_code: d.exit_code,
                    signal: d.signal,
                    reason: d.reason,
                }
            }),
            "FileListRequest" => variant!(FileListRequestData, |d: FileListRequestData| {
                Message::FileListRequest {
                    path: d.path,
                    include_hidden: d.include_hidden,
                }
            }),
            "FileListResponse" => variant!(FileListResponseData, |d: FileListResponseData| {
                Message::FileListResponse {
                    path: d.path,
                    entries: d.entries,
                }
            }),
            "FileDownloadRequest" => {
                variant!(FileDownloadRequestData, |d: FileDownloadRequestData| {
                    Message::FileDownloadRequest {
                        path: d.path,
                        offset: d.offset,
                        chunk_size: d.chunk_size,
                    }
                })
            }
            "FileDownloadChunk" => variant!(FileDownloadChunkData, |d: FileDownloadChunkData| {
                Message::FileDownloadChunk {
                    path: d.path,
                    offset: d.offset,
                    total_size: d.total_size,
                    data: d.data.into_vec(),
                    is_last: d.is_last,
                }
            }),
            "FileUploadStart" => variant!(FileUploadStartData, |d: FileUploadStartData| {
                Message::FileUploadStart {
                    path: d.path,
                    size: d.size,
                    mode: d.mode,
                    overwrite: d.overwrite,
                }
            }),
            "FileUploadChunk" => variant!(FileUploadChunkData, |d: FileUploadChunkData| {
                Message::FileUploadChunk {
                    path: d.path,
                    offset: d.offset,
                    data: d.data.into_vec(),
                }
            }),
            "FileUploadComplete" => {
                variant!(FileUploadCompleteData, |d: FileUploadCompleteData| {
                    Message::FileUploadComplete {
                        path: d.path,
                        checksum: d.checksum.into_vec(),
                    }
                })
            }
            "DeviceInfo" => variant!(DeviceInfoData, |d: DeviceInfoData| Message::DeviceInfo {
                device_id: d.device_id,
                name: d.name,
                os: d.os,
                os_version: d.os_version,
                arch: d.arch,
                protocol_version: d.protocol_version,
            }),
            "DeviceApprovalRequest" => {
                variant!(
                    DeviceApprovalRequestData,
                    |d: DeviceApprovalRequestData| Message::DeviceApprovalRequest {
                        device_id: d.device_id,
                        name: d.name,
                        public_key: d.public_key.into_vec(),
                        reason: d.reason,
                    }
                )
            }
            "DeviceApproved" => variant!(DeviceApprovedData, |d: DeviceApprovedData| {
                Message::DeviceApproved {
                    device_id: d.device_id,
                    expires_at: d.expires_at,
                    allowed_capabilities: d.allowed_capabilities,
                }
            }),
            "DeviceRejected" => variant!(DeviceRejectedData, |d: DeviceRejectedData| {
                Message::DeviceRejected {
                    device_id: d.device_id,
                    reason: d.reason,
                    retry_allowed: d.retry_allowed,
                }
            }),
            "Ping" => variant!(PingPongData, |d: PingPongData| Message::Ping {
                timestamp: d.timestamp,
                payload: d.payload.into_vec(),
            }),
            "Pong" => variant!(PingPongData, |d: PingPongData| Message::Pong {
                timestamp: d.timestamp,
                payload: d.payload.into_vec(),
            }),
            "Error" => variant!(ErrorData, |d: ErrorData| Message::Error {
                code: d.code,
                message: d.message,
                context: d.context,
                recoverable: d.recoverable,
            }),
            "Capabilities" => variant!(CapabilitiesData, |d: CapabilitiesData| {
                Message::Capabilities {
                    protocol_versions: d.protocol_versions,
                    features: d.features,
                    max_message_size: d.max_message_size,
                    max_sessions: d.max_sessions,
                    compression: d.compression,
                }
            }),
            other => {
                return Err(de::Error::unknown_variant(other, VARIANTS));
            }
        };

        Ok(message)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Message, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_tuple(2, MessageVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let bytes = rmp_serde::to_vec(&message).unwrap();
        let decoded: Message = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn session_create_round_trips() {
        round_trip(Message::SessionCreate {
            cols: 80,
            rows: 24,
            shell: Some("/bin/zsh".to_string()),
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            cwd: None,
        });
    }

    #[test]
    fn file_entries_round_trip() {
        round_trip(Message::FileListResponse {
            path: "/tmp".to_string(),
            entries: vec![FileEntry {
                name: "a.txt".to_string(),
                entry_type: FileEntryType::File,
                size: 12,
                mode: 0o644,
                modified: 1_700_000_000,
            }],
        });
    }

    #[test]
    fn error_message_round_trips() {
        round_trip(Message::Error {
            code: ErrorCode::NotFound,
            message: "no such session".to_string(),
            context: None,
            recoverable: false,
        });
    }

    #[test]
    fn unknown_tag_is_rejected() {
        // Hand-build a [tag, data] pair with a tag this build doesn't know.
        let bytes = rmp_serde::to_vec(&("TotallyUnknownTag", (1u8,))).unwrap();
        let result: Result<Message, _> = rmp_serde::from_slice(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn tag_matches_wire_name() {
        let message = Message::Ping {
            timestamp: 1,
            payload: vec![],
        };
        assert_eq!(message.tag(), "Ping");
    }
}
