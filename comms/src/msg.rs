use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::work::{Assignment, WorkerReport},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const REPORT_KIND: Header = 2;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Worker to master, asks for the next minibatch.
    RequestWork,
    /// Master to worker, the minibatch the worker must process next.
    Assign(Assignment),
    /// Master to worker, training is complete and no more work will be served.
    Stop,
    Disconnect,
}

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// The result of an assigned minibatch. The per-sample losses travel after the
    /// json encoded report without being copied.
    Report {
        report: WorkerReport,
        sample_losses: &'a [f32],
    },
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the kind of this message, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::RequestWork) => "control/request_work",
            Msg::Control(Command::Assign(_)) => "control/assign",
            Msg::Control(Command::Stop) => "control/stop",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Report { .. }) => "data/report",
            Msg::Err(_) => "err",
        }
    }

    fn invalid_data<T>(text: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, text))
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Self::invalid_data(format!(
            "the given buffer is too small {size}, must at least be {needed} bytes"
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Self::invalid_data(format!("received an invalid kind header {kind}"))
    }
}

/// Reads a big endian header from the start of `buf`.
///
/// # Arguments
/// * `buf` - A buffer of at least `HEADER_SIZE` bytes.
fn read_header(buf: &[u8]) -> io::Result<Header> {
    let Some(head) = buf.first_chunk::<HEADER_SIZE>() else {
        return Msg::buf_is_too_small(buf.len(), HEADER_SIZE);
    };

    Ok(Header::from_be_bytes(*head))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());
                serde_json::to_writer(&mut *buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Report {
                report,
                sample_losses,
            }) => {
                let body_start = buf.len();
                buf.extend_from_slice(&REPORT_KIND.to_be_bytes());

                let len_at = buf.len();
                buf.extend_from_slice(&[0; HEADER_SIZE]);

                let json_start = buf.len();
                serde_json::to_writer(&mut *buf, report)?;

                // Trailing whitespace is valid json, pad so the floats after it stay aligned.
                while (buf.len() - body_start) % size_of::<f32>() != 0 {
                    buf.push(b' ');
                }

                let json_len = (buf.len() - json_start) as Header;
                buf[len_at..json_start].copy_from_slice(&json_len.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(sample_losses)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        let kind = read_header(buf)?;
        let rest: &'a [u8] = &buf[HEADER_SIZE..];

        match kind {
            ERR_KIND => {
                let text = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(text)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            REPORT_KIND => {
                let json_len = read_header(rest)? as usize;
                let rest = &rest[HEADER_SIZE..];

                if rest.len() < json_len {
                    return Self::buf_is_too_small(rest.len(), json_len);
                }

                let (json, floats) = rest.split_at(json_len);
                let report = serde_json::from_slice(json)?;
                let sample_losses = bytemuck::try_cast_slice(floats).or_else(|err| {
                    Self::invalid_data(format!("malformed sample losses: {err}"))
                })?;

                Ok(Self::Data(Payload::Report {
                    report,
                    sample_losses,
                }))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
