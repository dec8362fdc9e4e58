//! Process confinement applied once, just before serving.
//!
//! On Unix the server gives up root: when started as root it switches to
//! the configured unprivileged user, and when started set-uid it returns
//! to the real user. Platforms without a mechanism run unconfined.

use thiserror::Error;

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfinementError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("invalid user name {0:?}")]
    InvalidUserName(String),

    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// A way of restricting what the running process may do.
pub trait Confinement: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self) -> Result<(), ConfinementError>;
}

/// No restrictions.
#[derive(Debug, Default)]
pub struct Unconfined;

impl Confinement for Unconfined {
    fn name(&self) -> &'static str {
        "unconfined"
    }

    fn apply(&self) -> Result<(), ConfinementError> {
        Ok(())
    }
}

#[cfg(unix)]
pub use self::unix::DropPrivileges;

/// The best confinement available on this platform.
pub fn platform_confinement(config: &ServerConfig) -> Box<dyn Confinement> {
    #[cfg(unix)]
    {
        Box::new(DropPrivileges::new(&config.security.unprivileged_user))
    }
    #[cfg(not(unix))]
    {
        let _ = config;
        Box::new(Unconfined)
    }
}

#[cfg(unix)]
mod unix {
    use std::ffi::CString;
    use std::io;

    use super::{Confinement, ConfinementError};

    /// Switch away from root, or from a set-uid identity.
    #[derive(Debug, Clone)]
    pub struct DropPrivileges {
        user: String,
    }

    impl DropPrivileges {
        pub fn new(user: impl Into<String>) -> Self {
            Self { user: user.into() }
        }
    }

    fn os_error(call: &'static str) -> ConfinementError {
        ConfinementError::Os {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Look up the uid and primary gid of `name`.
    pub(super) fn lookup_user(name: &str) -> Result<(libc::uid_t, libc::gid_t), ConfinementError> {
        let c_name =
            CString::new(name).map_err(|_| ConfinementError::InvalidUserName(name.to_string()))?;

        // SAFETY: every pointer passed refers to live, correctly sized storage
        // owned by this frame; `result` is only read after the call returns.
        unsafe {
            let mut pwd: libc::passwd = std::mem::zeroed();
            let mut buf = vec![0 as libc::c_char; 16 * 1024];
            let mut result: *mut libc::passwd = std::ptr::null_mut();
            let rc = libc::getpwnam_r(
                c_name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            );
            if rc != 0 {
                return Err(ConfinementError::Os {
                    call: "getpwnam_r",
                    source: io::Error::from_raw_os_error(rc),
                });
            }
            if result.is_null() {
                return Err(ConfinementError::UnknownUser(name.to_string()));
            }
            Ok((pwd.pw_uid, pwd.pw_gid))
        }
    }

    impl Confinement for DropPrivileges {
        fn name(&self) -> &'static str {
            "drop-privileges"
        }

        fn apply(&self) -> Result<(), ConfinementError> {
            // SAFETY: these calls take no pointers and cannot fail.
            let (uid, euid) = unsafe { (libc::getuid(), libc::geteuid()) };
            if uid == euid && uid != 0 {
                return Ok(());
            }

            if uid == 0 {
                let (target_uid, target_gid) = lookup_user(&self.user)?;
                // SAFETY: plain syscalls; a null list with length zero clears
                // the supplementary groups.
                unsafe {
                    if libc::setgroups(0, std::ptr::null()) != 0 {
                        return Err(os_error("setgroups"));
                    }
                    if libc::setgid(target_gid) != 0 {
                        return Err(os_error("setgid"));
                    }
                    if libc::setuid(target_uid) != 0 {
                        return Err(os_error("setuid"));
                    }
                }
                tracing::info!(user = %self.user, uid = target_uid, "Dropped root privileges");
            } else {
                // SAFETY: plain syscall.
                if unsafe { libc::setuid(uid) } != 0 {
                    return Err(os_error("setuid"));
                }
                tracing::info!(uid, "Dropped set-uid privileges");
            }
            Ok(())
        }
    }
}
