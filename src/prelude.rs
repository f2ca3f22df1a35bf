//! Common imports shared across the connection/request/handler modules,
//! mirroring how the rest of this codebase keeps plumbing terse.
pub use std::collections::HashMap;
pub use std::fmt::{self, Display};
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::{IpAddr, Shutdown};
pub use std::os::fd::{FromRawFd, IntoRawFd};
pub use std::os::unix::fs::MetadataExt;
pub use std::os::unix::net::UnixStream;
pub use std::path::{Path, PathBuf};
pub use std::process::{Command, Stdio};
pub use std::str::FromStr;
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub use log::{debug, error, info, trace, warn};
pub use mio::event::Event;
pub use mio::net::TcpStream;
pub use mio::{Interest, Poll, Token};

pub use crate::cgi::*;
pub use crate::config::types::{RouteConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::handlers::*;
pub use crate::http::*;
pub use crate::router::RoutingError;
pub use crate::server::Server;
pub use crate::upload::*;
pub use crate::utils::*;

pub const READ_BUF_SIZE: usize = 8192;
pub const MAX_READ_DATA: usize = 1024 * 1024;

/// How long a connection may sit idle before the server closes it.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// How long a CGI child may run before it is killed and the request failed.
pub const TIMEOUT_CGI: u64 = 30;
/// Interval between session-store sweeps.
pub const CLEAN_UP: u64 = 60;

/// Admission-control ceiling on simultaneously running CGI children; beyond
/// this a request gets 503 instead of a spawned process.
pub const MAX_CONCURRENT_CGI: usize = 16;

pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_FOUND: u16 = 302;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_LENGTH_REQUIRED: u16 = 411;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_BAD_GATEWAY: u16 = 502;
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;
pub const GATEWAY_TIMEOUT: u16 = 504;
pub const HTTP_VERSION_NOT_SUPPORTED: u16 = 505;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
