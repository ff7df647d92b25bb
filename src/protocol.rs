//! Fixed-frame ASCII wire protocol between Supermarket and Manager
//! (spec.md §6).
//!
//! Every frame is exactly [`MSG_SIZE`] bytes: zero-padded, NUL-terminated,
//! carrying a newline-terminated ASCII payload. Reads/writes use
//! `AsyncReadExt::read_exact` / `AsyncWriteExt::write_all`, which are
//! short-read/short-write-safe by construction — the same guarantee
//! `examples/original_source/util.c`'s `readn`/`writen` loops provide by
//! hand.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ManagerError, SupermarketError};

/// Size of one wire frame. The original source sizes this to comfortably
/// hold the longest `queue_size` frame for a realistic register count;
/// 1024 keeps headroom for `K` in the low hundreds while staying a single
/// page-friendly constant.
pub const MSG_SIZE: usize = 1024;

pub const HELLO_BOSS: &str = "hello_boss";
pub const CONN_ESTABLISHED: &str = "conn_established";

/// One fixed-size wire frame.
#[derive(Clone)]
pub struct Frame {
    bytes: [u8; MSG_SIZE],
}

impl Frame {
    /// Build a frame from a payload line (without the trailing `\n` —
    /// it is added here). Panics if the encoded payload plus NUL plus
    /// newline would not fit in `MSG_SIZE`; callers only ever build
    /// frames from bounded, crate-controlled content, so this is an
    /// internal-invariant panic, not a user-facing error path.
    pub fn from_payload(payload: &str) -> Self {
        let mut bytes = [0u8; MSG_SIZE];
        let line = format!("{payload}\n");
        assert!(
            line.len() < MSG_SIZE,
            "frame payload `{payload}` does not fit in MSG_SIZE={MSG_SIZE}"
        );
        bytes[..line.len()].copy_from_slice(line.as_bytes());
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; MSG_SIZE] {
        &self.bytes
    }

    /// Extract the NUL/whitespace-trimmed payload line.
    pub fn payload(&self) -> String {
        let nul_end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MSG_SIZE);
        String::from_utf8_lossy(&self.bytes[..nul_end])
            .trim_end_matches('\n')
            .to_string()
    }

    pub async fn read_from<R: tokio::io::AsyncRead + Unpin>(
        reader: &mut R,
    ) -> std::io::Result<Self> {
        let mut bytes = [0u8; MSG_SIZE];
        reader.read_exact(&mut bytes).await?;
        Ok(Self { bytes })
    }

    pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writer.write_all(&self.bytes).await?;
        writer.flush().await
    }
}

/// Messages the Supermarket sends to the Manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SupermarketMessage {
    HelloBoss,
    Pid(u32),
    /// `queue_size <q0> <q1> … <q{K-1}>`; `-1` means closed.
    QueueSize(Vec<i64>),
    /// `cust <id> want_out`
    WantOut(u32),
}

/// Messages the Manager sends to the Supermarket.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerMessage {
    ConnEstablished,
    /// `cust <id> get_out`
    GetOut(u32),
    /// `cash <id> open_cashier`
    OpenCashier(usize),
    /// `cash <id> close_cashier`
    CloseCashier(usize),
}

impl SupermarketMessage {
    pub fn encode(&self) -> Frame {
        let payload = match self {
            SupermarketMessage::HelloBoss => HELLO_BOSS.to_string(),
            SupermarketMessage::Pid(pid) => pid.to_string(),
            SupermarketMessage::QueueSize(sizes) => {
                let joined = sizes
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("queue_size {joined}")
            }
            SupermarketMessage::WantOut(id) => format!("cust {id} want_out"),
        };
        Frame::from_payload(&payload)
    }
}

impl ManagerMessage {
    pub fn encode(&self) -> Frame {
        let payload = match self {
            ManagerMessage::ConnEstablished => CONN_ESTABLISHED.to_string(),
            ManagerMessage::GetOut(id) => format!("cust {id} get_out"),
            ManagerMessage::OpenCashier(id) => format!("cash {id} open_cashier"),
            ManagerMessage::CloseCashier(id) => format!("cash {id} close_cashier"),
        };
        Frame::from_payload(&payload)
    }
}

/// Decode a frame the Manager received from a Supermarket. Malformed or
/// unrecognized frames decode to `None` — per spec.md §7 they are logged
/// and dropped at the call site, never treated as an error.
pub fn decode_supermarket_message(frame: &Frame) -> Option<SupermarketMessage> {
    let payload = frame.payload();
    if payload == HELLO_BOSS {
        return Some(SupermarketMessage::HelloBoss);
    }
    if let Ok(pid) = payload.parse::<u32>() {
        return Some(SupermarketMessage::Pid(pid));
    }
    if let Some(rest) = payload.strip_prefix("queue_size ") {
        let sizes: Option<Vec<i64>> = rest.split_whitespace().map(|t| t.parse().ok()).collect();
        return sizes.map(SupermarketMessage::QueueSize);
    }
    if let Some(rest) = payload.strip_prefix("cust ") {
        let mut parts = rest.split_whitespace();
        let id = parts.next()?.parse::<u32>().ok()?;
        if parts.next()? == "want_out" {
            return Some(SupermarketMessage::WantOut(id));
        }
    }
    None
}

/// Decode a frame the Supermarket received from the Manager.
pub fn decode_manager_message(frame: &Frame) -> Option<ManagerMessage> {
    let payload = frame.payload();
    if payload == CONN_ESTABLISHED {
        return Some(ManagerMessage::ConnEstablished);
    }
    if let Some(rest) = payload.strip_prefix("cust ") {
        let mut parts = rest.split_whitespace();
        let id = parts.next()?.parse::<u32>().ok()?;
        if parts.next()? == "get_out" {
            return Some(ManagerMessage::GetOut(id));
        }
        return None;
    }
    if let Some(rest) = payload.strip_prefix("cash ") {
        let mut parts = rest.split_whitespace();
        let id = parts.next()?.parse::<usize>().ok()?;
        return match parts.next()? {
            "open_cashier" => Some(ManagerMessage::OpenCashier(id)),
            "close_cashier" => Some(ManagerMessage::CloseCashier(id)),
            _ => None,
        };
    }
    None
}

/// Run the S→M handshake on a freshly connected socket: send `hello_boss`,
/// send our pid, then wait for `conn_established`. Per spec.md §6, if the
/// Manager rejects it closes the connection, which surfaces here as an
/// I/O error or an unexpected frame.
pub async fn supermarket_handshake<S>(stream: &mut S) -> Result<(), SupermarketError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    SupermarketMessage::HelloBoss
        .encode()
        .write_to(stream)
        .await?;
    SupermarketMessage::Pid(std::process::id())
        .encode()
        .write_to(stream)
        .await?;
    let reply = Frame::read_from(stream).await?;
    match decode_manager_message(&reply) {
        Some(ManagerMessage::ConnEstablished) => Ok(()),
        _ => Err(SupermarketError::HandshakeRejected),
    }
}

/// Run the M→S side of the handshake. Returns the peer pid on success.
/// Per spec.md §4.8, a repeated handshake on a slot that already has a
/// pid recorded is rejected by the caller (the connection worker owns
/// that bookkeeping); this function only validates frame shape.
pub async fn manager_read_handshake<S>(stream: &mut S) -> Result<u32, ManagerError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let hello = Frame::read_from(stream).await?;
    match decode_supermarket_message(&hello) {
        Some(SupermarketMessage::HelloBoss) => {}
        _ => {
            return Err(ManagerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected hello_boss",
            )));
        }
    }
    let pid_frame = Frame::read_from(stream).await?;
    match decode_supermarket_message(&pid_frame) {
        Some(SupermarketMessage::Pid(pid)) => Ok(pid),
        _ => Err(ManagerError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected pid frame",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip_preserves_payload() {
        let frame = Frame::from_payload("queue_size 0 1 -1");
        assert_eq!(frame.payload(), "queue_size 0 1 -1");
    }

    #[test]
    fn frame_is_nul_padded() {
        let frame = Frame::from_payload("hello_boss");
        assert_eq!(frame.as_bytes().len(), MSG_SIZE);
        assert_eq!(frame.as_bytes()[frame.payload().len() + 1], 0);
    }

    #[test]
    fn decode_queue_size() {
        let frame = SupermarketMessage::QueueSize(vec![0, -1, 3]).encode();
        assert_eq!(
            decode_supermarket_message(&frame),
            Some(SupermarketMessage::QueueSize(vec![0, -1, 3]))
        );
    }

    #[test]
    fn decode_want_out() {
        let frame = SupermarketMessage::WantOut(7).encode();
        assert_eq!(
            decode_supermarket_message(&frame),
            Some(SupermarketMessage::WantOut(7))
        );
    }

    #[test]
    fn decode_cash_commands() {
        let open = ManagerMessage::OpenCashier(2).encode();
        assert_eq!(
            decode_manager_message(&open),
            Some(ManagerMessage::OpenCashier(2))
        );
        let close = ManagerMessage::CloseCashier(2).encode();
        assert_eq!(
            decode_manager_message(&close),
            Some(ManagerMessage::CloseCashier(2))
        );
    }

    #[test]
    fn unknown_prefix_decodes_to_none() {
        let frame = Frame::from_payload("garbage message here");
        assert_eq!(decode_supermarket_message(&frame), None);
        assert_eq!(decode_manager_message(&frame), None);
    }

    #[test]
    fn malformed_cust_frame_decodes_to_none() {
        let frame = Frame::from_payload("cust notanumber want_out");
        assert_eq!(decode_supermarket_message(&frame), None);
    }

    #[test]
    fn malformed_cash_frame_decodes_to_none() {
        let frame = Frame::from_payload("cash notanumber open_cashier");
        assert_eq!(decode_manager_message(&frame), None);
    }

    #[tokio::test]
    async fn frame_roundtrips_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(MSG_SIZE * 2);
        let frame = SupermarketMessage::QueueSize(vec![1, 2, -1]).encode();
        frame.write_to(&mut client).await.unwrap();
        let received = Frame::read_from(&mut server).await.unwrap();
        assert_eq!(received.payload(), frame.payload());
    }
}
