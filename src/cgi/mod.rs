//! CGI protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Resolved script + request head
//!     → env.rs (meta-variables + HTTP_* headers + extension)
//!     → process.rs (spawn child: cwd, env, piped stdio)
//!     → stream.rs (request body → stdin, stdout → chunks, stderr → buffer)
//!     → response.rs (find blank line, parse status + headers)
//!     → Return: response head + remaining body chunks
//! ```
//!
//! # Design Decisions
//! - One child per request, owned by exactly one request driver
//! - Output is streamed; only the header block is ever buffered
//! - All limits are byte counts taken from the gateway configuration

pub mod env;
pub mod process;
pub mod response;
pub mod stream;

pub use env::{CgiEnv, EnvExtension, EnvHook, EnvironmentBuilder, ScriptPaths};
pub use process::{CgiCommand, CgiProcess, ProcessSupervisor, SpawnedProcess};
pub use response::{parse_response, HeaderError, HeaderScanner, ParsedResponse};
pub use stream::{pump_request_body, OutputError, OutputReader, RequestBodyOutcome, StderrBuffer};
