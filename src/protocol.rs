//! Line protocol spoken between nodes, miners and CLI clients.
//!
//! Every request and every reply is one UTF-8 line. `submitblock` is the
//! only two-step exchange: the server answers with [`SUBMIT_PROMPT`] and
//! reads the block JSON from the following line.

use std::fmt;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const SUBMIT_PROMPT: &str = "Send block JSON on next line";
pub const OK: &str = "ok";
pub const SYNC_INITIATED: &str = "sync initiated";
pub const ERROR_PREFIX: &str = "error: ";

pub const CHAIN_EMPTY: &str = "chain empty";
pub const INVALID_RANGE: &str = "invalid range";
pub const BLOCK_VALIDATION_FAILED: &str = "block validation failed";
pub const PEER_EXISTS: &str = "peer already exists";
pub const PEER_NOT_FOUND: &str = "peer not found";
pub const WALLET_NOT_FOUND: &str = "wallet not found";

/// Longest accepted line; a full `getchain` reply fits comfortably.
pub const MAX_LINE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetChain,
    GetLatestBlock,
    GetHeight,
    GetBlocks { start: u64, end: u64 },
    SubmitBlock,
    AddPeer(String),
    RemovePeer(String),
    GetPeers,
    GetWallet(String),
    Sync,
    /// Miner announcing itself; acknowledged and logged.
    MinerActive,
}

/// A request line that cannot be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Usage(&'static str),
    InvalidIndices,
    InvalidRange,
    Unknown(String),
}

impl ParseError {
    /// Reply line (without newline) for this failure.
    pub fn reply(&self) -> String {
        match self {
            ParseError::Empty => error_line("empty command"),
            ParseError::Usage(usage) => error_line(&format!("usage: {}", usage)),
            ParseError::InvalidIndices => error_line("invalid block indices"),
            ParseError::InvalidRange => error_line(INVALID_RANGE),
            ParseError::Unknown(cmd) => error_line(&format!("unknown command '{}'", cmd)),
        }
    }
}

enum Index {
    Valid(u64),
    OutOfRange,
}

fn parse_index(raw: &str) -> Result<Index, ParseError> {
    let value: i128 = raw.parse().map_err(|_| ParseError::InvalidIndices)?;
    Ok(u64::try_from(value).map_or(Index::OutOfRange, Index::Valid))
}

fn required_arg(parts: &[&str], usage: &'static str) -> Result<String, ParseError> {
    parts
        .get(1)
        .map(|arg| arg.to_string())
        .ok_or(ParseError::Usage(usage))
}

impl Command {
    /// Parse one request line. The command word is case-insensitive.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(word) = parts.first() else {
            return Err(ParseError::Empty);
        };

        match word.to_lowercase().as_str() {
            "getchain" => Ok(Command::GetChain),
            "getlatestblock" => Ok(Command::GetLatestBlock),
            "getheight" => Ok(Command::GetHeight),
            "getblocks" => {
                if parts.len() != 3 {
                    return Err(ParseError::Usage("getblocks START END"));
                }
                match (parse_index(parts[1])?, parse_index(parts[2])?) {
                    (Index::Valid(start), Index::Valid(end)) => Ok(Command::GetBlocks { start, end }),
                    _ => Err(ParseError::InvalidRange),
                }
            }
            "submitblock" => Ok(Command::SubmitBlock),
            "addpeer" => required_arg(&parts, "addpeer ADDRESS").map(Command::AddPeer),
            "removepeer" => required_arg(&parts, "removepeer ADDRESS").map(Command::RemovePeer),
            "getpeers" => Ok(Command::GetPeers),
            "getwallet" => required_arg(&parts, "getwallet ADDRESS").map(Command::GetWallet),
            "sync" => Ok(Command::Sync),
            "mineractive" => Ok(Command::MinerActive),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    /// Request line as sent on the wire, without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetChain => write!(f, "getchain"),
            Command::GetLatestBlock => write!(f, "getlatestblock"),
            Command::GetHeight => write!(f, "getheight"),
            Command::GetBlocks { start, end } => write!(f, "getblocks {} {}", start, end),
            Command::SubmitBlock => write!(f, "submitblock"),
            Command::AddPeer(addr) => write!(f, "addpeer {}", addr),
            Command::RemovePeer(addr) => write!(f, "removepeer {}", addr),
            Command::GetPeers => write!(f, "getpeers"),
            Command::GetWallet(addr) => write!(f, "getwallet {}", addr),
            Command::Sync => write!(f, "sync"),
            Command::MinerActive => write!(f, "mineractive"),
        }
    }
}

pub fn error_line(message: &str) -> String {
    format!("{}{}", ERROR_PREFIX, message)
}

/// The message of an `error: ...` reply, if `line` is one.
pub fn error_message(line: &str) -> Option<&str> {
    line.strip_prefix(ERROR_PREFIX)
}

/// Read one line, without its terminator. `Ok(None)` on a clean EOF.
///
/// Bytes that are not valid UTF-8 are dropped rather than failing the read.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = reader.take(MAX_LINE_BYTES).read_until(b'\n', &mut raw).await?;
    if read == 0 {
        return Ok(None);
    }
    let mut line = match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).replace(char::REPLACEMENT_CHARACTER, ""),
    };
    if !line.ends_with('\n') && read as u64 >= MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", MAX_LINE_BYTES),
        ));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}
