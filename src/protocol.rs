use crate::types::{Buttons, Quaternion, Sample};

// -- Framing --

/// Size of the receive buffer, terminator included.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Usable bytes per read (one byte reserved for the terminator).
pub const RECV_CHUNK_LEN: usize = MAX_MESSAGE_LEN - 1;

pub const LINE_TERMINATOR: u8 = b'\n';

// -- Field layout: qx,qy,qz,qw;a_click,trigger_click,trigger_value --

pub const FIELD_SEPARATOR: char = ',';
pub const GROUP_SEPARATOR: char = ';';
pub const FIELD_COUNT: usize = 7;

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "qx",
    "qy",
    "qz",
    "qw",
    "a_click",
    "trigger_click",
    "trigger_value",
];

/// Reasons a telemetry line is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message exceeds {max} bytes ({len})")]
    TooLong { len: usize, max: usize },

    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("missing ';' between orientation and button groups")]
    MissingSeparator,

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {field}: '{token}' is not a decimal number")]
    InvalidFloat { field: &'static str, token: String },

    #[error("field {field}: '{token}' is not an integer")]
    InvalidInt { field: &'static str, token: String },
}

fn parse_float(index: usize, token: &str) -> Result<f64, ProtocolError> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| ProtocolError::InvalidFloat {
            field: FIELD_NAMES[index],
            token: token.to_string(),
        })
}

fn parse_flag(index: usize, token: &str) -> Result<bool, ProtocolError> {
    token
        .trim()
        .parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| ProtocolError::InvalidInt {
            field: FIELD_NAMES[index],
            token: token.to_string(),
        })
}

/// Decode one telemetry line into a [`Sample`].
///
/// Line layout:
/// - `qx,qy,qz,qw` decimal floats (quaternion, passed through unnormalized)
/// - `;`
/// - `a_click,trigger_click` integers, non-zero = pressed
/// - `,trigger_value` decimal float, not clamped
///
/// Anything from the first NUL on is ignored, as are whitespace around
/// fields and a trailing `\r` or `\n`.
pub fn decode_line(line: &str) -> Result<Sample, ProtocolError> {
    let line = match line.find('\0') {
        Some(end) => &line[..end],
        None => line,
    };
    let line = line.trim_end_matches(['\r', '\n']).trim();

    let (quat, rest) = line
        .split_once(GROUP_SEPARATOR)
        .ok_or(ProtocolError::MissingSeparator)?;

    let quat: Vec<&str> = quat.split(FIELD_SEPARATOR).collect();
    let rest: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();
    if quat.len() != 4 || rest.len() != 3 {
        return Err(ProtocolError::FieldCount {
            expected: FIELD_COUNT,
            found: quat.len() + rest.len(),
        });
    }

    let orientation = Quaternion::new(
        parse_float(0, quat[0])?,
        parse_float(1, quat[1])?,
        parse_float(2, quat[2])?,
        parse_float(3, quat[3])?,
    );

    let mut buttons = Buttons::empty();
    buttons.set(Buttons::A_CLICK, parse_flag(4, rest[0])?);
    buttons.set(Buttons::TRIGGER_CLICK, parse_flag(5, rest[1])?);

    let trigger_value = parse_float(6, rest[2])? as f32;

    Ok(Sample {
        orientation,
        buttons,
        trigger_value,
    })
}

/// Decode raw bytes of a single line.
pub fn decode_bytes(data: &[u8]) -> Result<Sample, ProtocolError> {
    if data.len() > RECV_CHUNK_LEN {
        return Err(ProtocolError::TooLong {
            len: data.len(),
            max: RECV_CHUNK_LEN,
        });
    }
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
    decode_line(text)
}

/// Split a buffer into candidate lines.
///
/// Each segment is cut at its first NUL and trailing whitespace is dropped.
/// Blank segments are skipped. An unterminated final segment is returned
/// too; [`LineFramer`] decides whether that is safe.
pub fn split_lines(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    chunk
        .split(|&b| b == LINE_TERMINATOR)
        .map(|line| {
            let line = match line.iter().position(|&b| b == 0) {
                Some(nul) => &line[..nul],
                None => line,
            };
            let end = line
                .iter()
                .rposition(|&b| !matches!(b, b'\r' | b' ' | b'\t'))
                .map_or(0, |i| i + 1);
            &line[..end]
        })
        .filter(|line| !line.is_empty())
}

/// Reassembles lines across reads on one connection.
///
/// Only newline-terminated lines are handed out; the unterminated tail of a
/// read is held and prefixed to the next one. A tail longer than
/// [`RECV_CHUNK_LEN`] cannot be a valid line and is discarded.
///
/// Until the peer has sent its first newline the connection is treated as
/// read-delimited: each read without a newline is one whole message. The
/// first newline switches the connection to line framing for good.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    line_framed: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any held tail and the framing mode, for a new connection.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.line_framed = false;
    }

    /// Bytes held from an unterminated line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one read; `on_line` gets every line that is now complete.
    pub fn push(&mut self, chunk: &[u8], mut on_line: impl FnMut(&[u8])) {
        self.pending.extend_from_slice(chunk);

        match self.pending.iter().rposition(|&b| b == LINE_TERMINATOR) {
            Some(last) => {
                self.line_framed = true;
                let tail = self.pending.split_off(last + 1);
                let complete = std::mem::replace(&mut self.pending, tail);
                split_lines(&complete).for_each(&mut on_line);
            }
            None if !self.line_framed => {
                let whole = std::mem::take(&mut self.pending);
                split_lines(&whole).for_each(&mut on_line);
                return;
            }
            None => {}
        }

        if self.pending.len() > RECV_CHUNK_LEN {
            log::warn!(
                "Dropping {} bytes of unterminated telemetry (limit {})",
                self.pending.len(),
                RECV_CHUNK_LEN
            );
            self.pending.clear();
        }
    }
}

/// Encode a sample as a canonical newline-terminated line.
pub fn encode_sample(sample: &Sample) -> String {
    let q = &sample.orientation;
    format!(
        "{:.4},{:.4},{:.4},{:.4};{},{},{:.2}\n",
        q.x,
        q.y,
        q.z,
        q.w,
        sample.a_click() as u8,
        sample.trigger_click() as u8,
        sample.trigger_value,
    )
}
