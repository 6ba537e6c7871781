//! Two-phase commit through PostgreSQL prepared transactions.
//!
//! An [`XaResource`] owns one connection and moves through
//! `Idle → Active → Ended → Idle`, issuing `PREPARE TRANSACTION`,
//! `COMMIT PREPARED` and `ROLLBACK PREPARED` with the xid encoded by
//! [`Xid::encode`]. Suspend/resume and transaction interleaving are not
//! supported.

mod connection;
mod error;
mod resource;
mod xid;

pub use connection::{LogicalConnection, XaConnection};
pub use error::{XaError, XaErrorCode, XaResult};
pub use resource::XaResource;
pub use xid::{MAX_ID_LEN, Xid};

/// Raw transaction manager flag values.
pub mod tm {
    pub const NOFLAGS: i32 = 0;
    pub const JOIN: i32 = 0x0020_0000;
    pub const ENDRSCAN: i32 = 0x0080_0000;
    pub const STARTRSCAN: i32 = 0x0100_0000;
    pub const SUSPEND: i32 = 0x0200_0000;
    pub const SUCCESS: i32 = 0x0400_0000;
    pub const RESUME: i32 = 0x0800_0000;
    pub const FAIL: i32 = 0x2000_0000;
}

fn invalid_flags(flags: i32) -> XaError {
    XaError::new(XaErrorCode::Inval, format!("Invalid flags: {flags:#x}"))
}

/// Flags accepted by [`XaResource::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlags {
    /// Begin a new branch.
    NoFlags,
    /// Rejoin the branch this resource just ended.
    Join,
    /// Resume a suspended branch. Not supported.
    Resume,
}

impl TryFrom<i32> for StartFlags {
    type Error = XaError;

    fn try_from(flags: i32) -> XaResult<Self> {
        match flags {
            tm::NOFLAGS => Ok(Self::NoFlags),
            tm::JOIN => Ok(Self::Join),
            tm::RESUME => Ok(Self::Resume),
            other => Err(invalid_flags(other)),
        }
    }
}

/// Flags accepted by [`XaResource::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlags {
    Success,
    /// The branch will be rolled back. Nothing happens until `rollback`.
    Fail,
    /// Not supported.
    Suspend,
}

impl TryFrom<i32> for EndFlags {
    type Error = XaError;

    fn try_from(flags: i32) -> XaResult<Self> {
        match flags {
            tm::SUCCESS => Ok(Self::Success),
            tm::FAIL => Ok(Self::Fail),
            tm::SUSPEND => Ok(Self::Suspend),
            other => Err(invalid_flags(other)),
        }
    }
}

/// Flags accepted by [`XaResource::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverFlags {
    NoFlags,
    StartScan,
    EndScan,
    StartEndScan,
}

impl RecoverFlags {
    /// Whether this call opens a scan. Only these calls return xids.
    pub fn starts_scan(self) -> bool {
        matches!(self, Self::StartScan | Self::StartEndScan)
    }
}

impl TryFrom<i32> for RecoverFlags {
    type Error = XaError;

    fn try_from(flags: i32) -> XaResult<Self> {
        match flags {
            tm::NOFLAGS => Ok(Self::NoFlags),
            tm::STARTRSCAN => Ok(Self::StartScan),
            tm::ENDRSCAN => Ok(Self::EndScan),
            f if f == tm::STARTRSCAN | tm::ENDRSCAN => Ok(Self::StartEndScan),
            other => Err(invalid_flags(other)),
        }
    }
}

/// Outcome of a successful prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The branch is prepared and must be committed or rolled back.
    Ok,
    /// Nothing to commit. PostgreSQL prepares read-only branches too, so
    /// [`XaResource`] never votes this.
    ReadOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_flags_map_to_typed_flags() {
        assert_eq!(StartFlags::try_from(0).unwrap(), StartFlags::NoFlags);
        assert_eq!(StartFlags::try_from(0x0020_0000).unwrap(), StartFlags::Join);
        assert_eq!(EndFlags::try_from(0x2000_0000).unwrap(), EndFlags::Fail);
        assert_eq!(
            RecoverFlags::try_from(0x0180_0000).unwrap(),
            RecoverFlags::StartEndScan
        );
        assert_eq!(
            EndFlags::try_from(tm::NOFLAGS).unwrap_err().code(),
            XaErrorCode::Inval
        );
        assert_eq!(
            RecoverFlags::try_from(tm::JOIN).unwrap_err().code(),
            XaErrorCode::Inval
        );
    }
}
