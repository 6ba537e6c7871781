//! Startup-phase backend messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_header, read_i32, read_u8};
use crate::protocol::types::{TransactionStatus, U32BE};

/// Authentication request codes.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    /// GSSAPI authentication starts; the client sends the first token.
    Gss,
    GssContinue { data: &'a [u8] },
    Sasl { mechanisms: Vec<&'a str> },
    SaslContinue { data: &'a [u8] },
    SaslFinal { data: &'a [u8] },
    /// Kerberos V4/V5 or SSPI.
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;

        Ok(match code {
            auth_type::OK => Self::Ok,
            auth_type::CLEARTEXT_PASSWORD => Self::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(salt);
                Self::Md5Password { salt: buf }
            }
            auth_type::GSS => Self::Gss,
            auth_type::GSS_CONTINUE => Self::GssContinue { data: rest },
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while read_u8(data)?.0 != 0 {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                Self::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => Self::SaslContinue { data: rest },
            auth_type::SASL_FINAL => Self::SaslFinal { data: rest },
            auth_type::KERBEROS_V5 | auth_type::SSPI => Self::Unsupported(code),
            other => {
                return Err(Error::Protocol(format!("Unknown authentication type: {other}")));
            }
        })
    }
}

/// Process id and secret used for cancel requests.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: U32BE,
    secret_key: U32BE,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(read_header::<Self>(payload)?.0)
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// A server setting reported during startup or after a change.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// End of a request cycle.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(read_header::<Self>(payload)?.0)
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_byte(self.status).ok_or_else(|| {
            Error::Protocol(format!("Unknown transaction status: {}", self.status))
        })
    }
}
