//! Global transaction identifiers.

use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::error::{XaError, XaErrorCode, XaResult};

/// Maximum length of the global transaction id and of the branch qualifier.
pub const MAX_ID_LEN: usize = 64;

/// An XA transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    gtrid: Vec<u8>,
    bqual: Vec<u8>,
}

impl Xid {
    /// Create an xid. Either id longer than [`MAX_ID_LEN`] is `XAER_INVAL`.
    pub fn new(format_id: i32, gtrid: impl Into<Vec<u8>>, bqual: impl Into<Vec<u8>>) -> XaResult<Self> {
        let gtrid = gtrid.into();
        let bqual = bqual.into();
        if gtrid.len() > MAX_ID_LEN || bqual.len() > MAX_ID_LEN {
            return Err(XaError::new(
                XaErrorCode::Inval,
                format!(
                    "xid ids are limited to {MAX_ID_LEN} bytes, got gtrid={} bqual={}",
                    gtrid.len(),
                    bqual.len()
                ),
            ));
        }
        Ok(Self {
            format_id,
            gtrid,
            bqual,
        })
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_transaction_id(&self) -> &[u8] {
        &self.gtrid
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.bqual
    }

    /// Transaction name used in `PREPARE TRANSACTION`:
    /// `formatId_base64(gtrid)_base64(bqual)`.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}",
            self.format_id,
            STANDARD.encode(&self.gtrid),
            STANDARD.encode(&self.bqual)
        )
    }

    /// Parse a name produced by [`encode`]. Names written by other
    /// software give `None`.
    ///
    /// [`encode`]: Xid::encode
    pub fn decode(gid: &str) -> Option<Self> {
        let first = gid.find('_')?;
        let last = gid.rfind('_')?;
        if first == last {
            return None;
        }
        let format_id = gid[..first].parse().ok()?;
        let gtrid = STANDARD.decode(&gid[first + 1..last]).ok()?;
        let bqual = STANDARD.decode(&gid[last + 1..]).ok()?;
        Self::new(format_id, gtrid, bqual).ok()
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
