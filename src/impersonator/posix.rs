//! POSIX process spawning and fd-passing for the impersonation channel.

use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;

use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use nix::unistd::{Gid, Uid, User};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};

/// Spawns `exe` as `user`, connected to us over a freshly created
/// `UnixStream` pair: one end is duped onto fd 3 in the child before
/// `exec`, the other stays here for request/response framing and for
/// receiving passed file descriptors.
pub async fn spawn_impersonated(exe: &Path, user: &str) -> Result<(Child, UnixStream), super::pool::PoolError> {
    let user = User::from_name(user)
        .map_err(|e| super::pool::PoolError::Spawn(std::io::Error::from(e)))?
        .ok_or_else(|| super::pool::PoolError::NoSuchUser(user.to_string()))?;

    let (parent_sock, child_sock) =
        std::os::unix::net::UnixStream::pair().map_err(super::pool::PoolError::Spawn)?;

    let child_raw = child_sock.as_raw_fd();
    let uid = user.uid;
    let gid = user.gid;

    let mut cmd = Command::new(exe);
    cmd.arg("--fd").arg("3");
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::inherit());
    cmd.kill_on_drop(true);

    // Safety: only async-signal-safe calls (dup2, setgid, setuid) run
    // between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(child_raw, 3) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            drop_privileges(uid, gid)
        });
    }

    let child = cmd.spawn().map_err(super::pool::PoolError::Spawn)?;
    drop(child_sock);

    parent_sock.set_nonblocking(true).map_err(super::pool::PoolError::Spawn)?;
    let stream = UnixStream::from_std(parent_sock).map_err(super::pool::PoolError::Spawn)?;

    Ok((child, stream))
}

fn drop_privileges(uid: Uid, gid: Gid) -> std::io::Result<()> {
    nix::unistd::setgid(gid).map_err(std::io::Error::from)?;
    nix::unistd::setuid(uid).map_err(std::io::Error::from)?;
    Ok(())
}

/// Receives one file descriptor passed as an `SCM_RIGHTS` ancillary message
/// alongside the `WireResponse::FileOpened` line.
pub async fn receive_fd(stream: &UnixStream) -> std::io::Result<tokio::fs::File> {
    loop {
        stream.readable().await?;

        let raw: RawFd = stream.as_raw_fd();
        let mut cmsg_buf = nix::cmsg_space!(RawFd);
        let mut iobuf = [0u8; 1];
        let mut iov = [std::io::IoSliceMut::new(&mut iobuf)];

        match recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty()) {
            Ok(msg) => {
                for cmsg in msg.cmsgs().map_err(|e| std::io::Error::other(e.to_string()))? {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        if let Some(fd) = fds.into_iter().next() {
                            let std_file = unsafe { std::fs::File::from_raw_fd(fd) };
                            return Ok(tokio::fs::File::from_std(std_file));
                        }
                    }
                }
                return Err(std::io::Error::other("helper did not pass a file descriptor"));
            }
            Err(nix::errno::Errno::EWOULDBLOCK) => continue,
            Err(e) => return Err(std::io::Error::from(e)),
        }
    }
}
