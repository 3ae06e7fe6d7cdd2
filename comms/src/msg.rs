use std::{borrow::Cow, io};

use bytemuck::Pod;

use crate::{Deserialize, Serialize, specs::server::SessionSpec};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const PARAMS_KIND: Header = 2;
const FINAL_KIND: Header = 3;
const GRAD_KIND: Header = 4;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// The parameters after `version` applied updates, the worker must compute step `version`.
    Params { version: u64, params: &'a [f32] },
    /// The last parameters of the session, no gradient is expected back.
    Final { version: u64, params: &'a [f32] },
    /// A worker's gradient for the step it was asked to compute.
    ///
    /// `present` holds one flag per parameter tensor, a zero flag means the tensor had
    /// no contribution and its slice of `grad` must be ignored.
    Grad {
        loss: f32,
        present: &'a [u32],
        grad: &'a [f32],
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { worker_id: usize },
    Init(SessionSpec),
    Stop,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the kind of this message, useful for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Init(_)) => "control/init",
            Msg::Control(Command::Stop) => "control/stop",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Params { .. }) => "data/params",
            Msg::Data(Payload::Final { .. }) => "data/final",
            Msg::Data(Payload::Grad { .. }) => "data/grad",
            Msg::Err(_) => "err",
        }
    }

    fn invalid_data<T>(text: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, text))
    }

    /// Splits `N` leading bytes off `buf`.
    fn take<const N: usize>(buf: &[u8]) -> io::Result<([u8; N], &[u8])> {
        if buf.len() < N {
            return Self::invalid_data(format!(
                "the given buffer is too small {}, must at least be {N} bytes",
                buf.len()
            ));
        }

        let (head, rest) = buf.split_at(N);
        let mut bytes = [0; N];
        bytes.copy_from_slice(head);
        Ok((bytes, rest))
    }

    /// Borrows `buf` as a slice of numbers.
    fn cast<T: Pod>(buf: &[u8]) -> io::Result<&[T]> {
        bytemuck::try_cast_slice(buf).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed numeric payload: {e}"),
            )
        })
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Params { version, params }) => {
                buf.extend_from_slice(&PARAMS_KIND.to_be_bytes());
                buf.extend_from_slice(&version.to_be_bytes());
                Some(bytemuck::cast_slice(params))
            }
            Msg::Data(Payload::Final { version, params }) => {
                buf.extend_from_slice(&FINAL_KIND.to_be_bytes());
                buf.extend_from_slice(&version.to_be_bytes());
                Some(bytemuck::cast_slice(params))
            }
            Msg::Data(Payload::Grad {
                loss,
                present,
                grad,
            }) => {
                buf.extend_from_slice(&GRAD_KIND.to_be_bytes());
                buf.extend_from_slice(&loss.to_be_bytes());
                buf.extend_from_slice(&(present.len() as u32).to_be_bytes());
                buf.extend_from_slice(bytemuck::cast_slice(present));
                Some(bytemuck::cast_slice(grad))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let (kind, rest) = Self::take::<HEADER_SIZE>(buf)?;

        match Header::from_be_bytes(kind) {
            ERR_KIND => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (PARAMS_KIND | FINAL_KIND) => {
                let (version, rest) = Self::take::<8>(rest)?;
                let version = u64::from_be_bytes(version);
                let params = Self::cast(rest)?;

                let payload = if kind == PARAMS_KIND {
                    Payload::Params { version, params }
                } else {
                    Payload::Final { version, params }
                };

                Ok(Self::Data(payload))
            }
            GRAD_KIND => {
                let (loss, rest) = Self::take::<4>(rest)?;
                let (count, rest) = Self::take::<4>(rest)?;
                let count = u32::from_be_bytes(count) as usize;

                let flags_len = count * size_of::<u32>();
                if rest.len() < flags_len {
                    return Self::invalid_data(format!(
                        "gradient announces {count} tensors but only {} bytes follow",
                        rest.len()
                    ));
                }

                let (flags, grad) = rest.split_at(flags_len);

                Ok(Self::Data(Payload::Grad {
                    loss: f32::from_be_bytes(loss),
                    present: Self::cast(flags)?,
                    grad: Self::cast(grad)?,
                }))
            }
            byte => Self::invalid_data(format!("received an invalid kind byte {byte}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: &Msg) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).map(<[u8]>::to_vec).unwrap_or_default();
        buf.extend_from_slice(&tail);

        let mut words = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..buf.len()].copy_from_slice(&buf);
        words.truncate(buf.len() / 4);
        words
    }

    #[test]
    fn grad_keeps_presence_flags() {
        let present = [1, 0, 1];
        let grad = [0.5, 0.0, -2.0, 4.0];
        let msg = Msg::Data(Payload::Grad {
            loss: 1.25,
            present: &present,
            grad: &grad,
        });

        let words = encode(&msg);
        match Msg::deserialize(bytemuck::cast_slice(&words)).unwrap() {
            Msg::Data(Payload::Grad {
                loss,
                present: p,
                grad: g,
            }) => {
                assert_eq!(loss, 1.25);
                assert_eq!(p, present);
                assert_eq!(g, grad);
            }
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn truncated_grad_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&GRAD_KIND.to_be_bytes());
        bytes.extend_from_slice(&1.0f32.to_be_bytes());
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);

        let mut words = vec![0u32; bytes.len() / 4];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words).copy_from_slice(&bytes);

        let err = Msg::deserialize(bytemuck::cast_slice(&words)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let words = [u32::from_ne_bytes(9u32.to_be_bytes())];
        assert!(Msg::deserialize(bytemuck::cast_slice(&words)).is_err());
    }
}
