//! Privileged execution bracket around the image build.
//!
//! The build engine runs with root effective identity; everything else runs
//! with the identity the caller had before compilation started. Effective
//! uid/gid are process-wide state, so only one bracket may be open per
//! process at a time.
//!
//! [`enter`] returns a [`PrivilegeGuard`]. Calling [`PrivilegeGuard::exit`]
//! restores the original identity and reports failure; dropping the guard
//! on any other path (early return, `?`, panic unwinding) restores it too.

use crate::error::VibError;
use nix::unistd::{Gid, Uid};
use std::fmt;
#[cfg(test)]
use std::sync::Mutex;
use tracing::{debug, error};

/// Identity of the caller before compilation, plus whether it already is
/// root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeContext {
    pub is_root: bool,
    pub original_uid: Uid,
    pub original_gid: Gid,
}

impl PrivilegeContext {
    pub fn new(is_root: bool, original_uid: u32, original_gid: u32) -> Self {
        Self {
            is_root,
            original_uid: Uid::from_raw(original_uid),
            original_gid: Gid::from_raw(original_gid),
        }
    }

    /// Capture the current effective identity.
    pub fn detect() -> Self {
        let uid = nix::unistd::geteuid();
        Self {
            is_root: uid.is_root(),
            original_uid: uid,
            original_gid: nix::unistd::getegid(),
        }
    }
}

/// Effective identity primitives.
pub trait IdentitySwitch: Send + Sync {
    fn set_effective_uid(&self, uid: Uid) -> nix::Result<()>;
    fn set_effective_gid(&self, gid: Gid) -> nix::Result<()>;
}

/// Switches the identity of the running process.
pub struct SystemIdentity;

impl IdentitySwitch for SystemIdentity {
    fn set_effective_uid(&self, uid: Uid) -> nix::Result<()> {
        nix::unistd::seteuid(uid)
    }

    fn set_effective_gid(&self, gid: Gid) -> nix::Result<()> {
        nix::unistd::setegid(gid)
    }
}

/// Switch to root effective identity.
///
/// The uid goes first: changing the gid needs root effective rights. If the
/// gid switch fails the uid is put back before returning.
pub fn enter<'a>(
    identity: &'a dyn IdentitySwitch,
    ctx: &PrivilegeContext,
) -> Result<PrivilegeGuard<'a>, VibError> {
    identity
        .set_effective_uid(Uid::from_raw(0))
        .map_err(|e| VibError::privilege("switch effective uid to 0", e))?;

    if let Err(e) = identity.set_effective_gid(Gid::from_raw(0)) {
        if let Err(rollback) = identity.set_effective_uid(ctx.original_uid) {
            error!(
                uid = ctx.original_uid.as_raw(),
                error = %rollback,
                "Failed to roll back effective uid"
            );
        }
        return Err(VibError::privilege("switch effective gid to 0", e));
    }

    debug!("Entered privileged mode");
    Ok(PrivilegeGuard {
        identity,
        original_uid: ctx.original_uid,
        original_gid: ctx.original_gid,
        restored: false,
    })
}

/// Holds root effective identity until exited or dropped.
#[must_use = "dropping the guard immediately restores the original identity"]
pub struct PrivilegeGuard<'a> {
    identity: &'a dyn IdentitySwitch,
    original_uid: Uid,
    original_gid: Gid,
    restored: bool,
}

impl PrivilegeGuard<'_> {
    /// Restore the original identity, reporting the first failure.
    pub fn exit(mut self) -> Result<(), VibError> {
        self.restored = true;
        self.restore()
    }

    // gid before uid: once the uid is dropped the gid can no longer change.
    // The uid is dropped even when the gid restore fails.
    fn restore(&self) -> Result<(), VibError> {
        let gid_result = self
            .identity
            .set_effective_gid(self.original_gid)
            .map_err(|e| {
                VibError::privilege(format!("restore effective gid {}", self.original_gid), e)
            });
        let uid_result = self
            .identity
            .set_effective_uid(self.original_uid)
            .map_err(|e| {
                VibError::privilege(format!("restore effective uid {}", self.original_uid), e)
            });

        gid_result?;
        uid_result?;
        debug!(
            uid = self.original_uid.as_raw(),
            gid = self.original_gid.as_raw(),
            "Restored original identity"
        );
        Ok(())
    }
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        if !self.restored {
            self.restored = true;
            if let Err(e) = self.restore() {
                error!(error = %e, "Failed to restore original identity");
            }
        }
    }
}

impl fmt::Debug for PrivilegeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegeGuard")
            .field("original_uid", &self.original_uid.as_raw())
            .field("original_gid", &self.original_gid.as_raw())
            .field("restored", &self.restored)
            .finish()
    }
}

/// One call observed by [`RecordingIdentity`].
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    Uid(u32),
    Gid(u32),
}

#[cfg(test)]
#[derive(Debug)]
struct RecordingState {
    uid: Uid,
    gid: Gid,
    changes: Vec<IdentityChange>,
}

/// Test implementation that tracks a simulated effective identity.
#[cfg(test)]
pub struct RecordingIdentity {
    state: Mutex<RecordingState>,
    deny_uid: Option<Uid>,
    deny_gid: Option<Gid>,
}

#[cfg(test)]
impl RecordingIdentity {
    /// Start with the given effective identity.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            state: Mutex::new(RecordingState {
                uid: Uid::from_raw(uid),
                gid: Gid::from_raw(gid),
                changes: Vec::new(),
            }),
            deny_uid: None,
            deny_gid: None,
        }
    }

    /// Fail with `EPERM` whenever the uid is set to `uid`.
    pub fn deny_uid(mut self, uid: u32) -> Self {
        self.deny_uid = Some(Uid::from_raw(uid));
        self
    }

    /// Fail with `EPERM` whenever the gid is set to `gid`.
    pub fn deny_gid(mut self, gid: u32) -> Self {
        self.deny_gid = Some(Gid::from_raw(gid));
        self
    }

    /// Current simulated (uid, gid).
    pub fn current(&self) -> (u32, u32) {
        let state = self.state.lock().expect("identity lock poisoned");
        (state.uid.as_raw(), state.gid.as_raw())
    }

    pub fn changes(&self) -> Vec<IdentityChange> {
        self.state
            .lock()
            .expect("identity lock poisoned")
            .changes
            .clone()
    }
}

#[cfg(test)]
impl IdentitySwitch for RecordingIdentity {
    fn set_effective_uid(&self, uid: Uid) -> nix::Result<()> {
        let mut state = self.state.lock().expect("identity lock poisoned");
        state.changes.push(IdentityChange::Uid(uid.as_raw()));
        if self.deny_uid == Some(uid) {
            return Err(nix::Error::EPERM);
        }
        state.uid = uid;
        Ok(())
    }

    fn set_effective_gid(&self, gid: Gid) -> nix::Result<()> {
        let mut state = self.state.lock().expect("identity lock poisoned");
        state.changes.push(IdentityChange::Gid(gid.as_raw()));
        if self.deny_gid == Some(gid) {
            return Err(nix::Error::EPERM);
        }
        state.gid = gid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_ctx() -> PrivilegeContext {
        PrivilegeContext::new(false, 1000, 1000)
    }

    #[test]
    fn test_enter_then_exit_restores_identity() {
        let identity = RecordingIdentity::new(1000, 1000);
        let guard = enter(&identity, &user_ctx()).unwrap();
        assert_eq!(identity.current(), (0, 0));

        guard.exit().unwrap();
        assert_eq!(identity.current(), (1000, 1000));
        assert_eq!(
            identity.changes(),
            vec![
                IdentityChange::Uid(0),
                IdentityChange::Gid(0),
                IdentityChange::Gid(1000),
                IdentityChange::Uid(1000),
            ]
        );
    }

    #[test]
    fn test_drop_restores_identity() {
        let identity = RecordingIdentity::new(1000, 1000);
        {
            let _guard = enter(&identity, &user_ctx()).unwrap();
            assert_eq!(identity.current(), (0, 0));
        }
        assert_eq!(identity.current(), (1000, 1000));
    }

    #[test]
    fn test_exit_does_not_restore_twice() {
        let identity = RecordingIdentity::new(1000, 1000);
        let guard = enter(&identity, &user_ctx()).unwrap();
        guard.exit().unwrap();
        assert_eq!(identity.changes().len(), 4);
    }

    #[test]
    fn test_guard_debug_shows_original_identity() {
        let identity = RecordingIdentity::new(1000, 100);
        let guard = enter(&identity, &PrivilegeContext::new(false, 1000, 100)).unwrap();
        let shown = format!("{guard:?}");
        assert!(shown.contains("original_uid: 1000"));
        assert!(shown.contains("original_gid: 100"));
        assert!(shown.contains("restored: false"));
        guard.exit().unwrap();
    }

    #[test]
    fn test_enter_fails_without_uid_change() {
        let identity = RecordingIdentity::new(1000, 1000).deny_uid(0);
        let err = enter(&identity, &user_ctx()).unwrap_err();
        assert!(matches!(err, VibError::Privilege { .. }));
        assert_eq!(identity.current(), (1000, 1000));
    }

    #[test]
    fn test_enter_rolls_back_uid_when_gid_fails() {
        let identity = RecordingIdentity::new(1000, 1000).deny_gid(0);
        let err = enter(&identity, &user_ctx()).unwrap_err();
        assert!(err.to_string().contains("gid"));
        assert_eq!(identity.current(), (1000, 1000));
    }

    #[test]
    fn test_exit_drops_uid_even_if_gid_restore_fails() {
        let identity = RecordingIdentity::new(1000, 1000).deny_gid(1000);
        let guard = enter(&identity, &user_ctx()).unwrap();

        let err = guard.exit().unwrap_err();
        assert!(err.to_string().contains("restore effective gid 1000"));
        assert_eq!(identity.current().0, 1000);
    }

    #[test]
    fn test_root_caller_round_trips_to_root() {
        let identity = RecordingIdentity::new(0, 0);
        let ctx = PrivilegeContext::new(true, 0, 0);
        enter(&identity, &ctx).unwrap().exit().unwrap();
        assert_eq!(identity.current(), (0, 0));
    }

    #[test]
    fn test_detect_matches_process_identity() {
        let ctx = PrivilegeContext::detect();
        assert_eq!(ctx.original_uid, nix::unistd::geteuid());
        assert_eq!(ctx.is_root, ctx.original_uid.is_root());
    }
}
