//! Windows process spawning and handle-passing for the impersonation
//! channel. Uses `CreateProcessWithLogonW` to start the helper directly as
//! the target user (no separate privilege-drop step needed, unlike POSIX)
//! and `DuplicateHandle` in place of `SCM_RIGHTS` fd-passing.

use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::{
    CreateProcessWithLogonW, LOGON_WITH_PROFILE, PROCESS_INFORMATION, STARTUPINFOW,
};

fn wide(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// Spawns `exe` logged on as `user`, connected to us over a named pipe
/// whose name is passed on the command line.
pub async fn spawn_impersonated(
    exe: &Path,
    user: &str,
) -> Result<(tokio::process::Child, NamedPipeClient), super::pool::PoolError> {
    let (domain, account) = match user.split_once('\\') {
        Some((d, a)) => (d.to_string(), a.to_string()),
        None => (".".to_string(), user.to_string()),
    };

    let pipe_name = format!(r"\\.\pipe\fz-serverd-impersonator-{}", std::process::id());
    let cmdline = format!("\"{}\" --pipe \"{pipe_name}\"", exe.display());

    let password = std::env::var("FZ_IMPERSONATOR_PASSWORD").unwrap_or_default();

    let account_w = wide(&account);
    let domain_w = wide(&domain);
    let password_w = wide(&password);
    let cmdline_w = wide(&cmdline);

    let mut startup_info = STARTUPINFOW::default();
    startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    let mut process_info = PROCESS_INFORMATION::default();

    // Safety: all buffers outlive the call, and the command line buffer is
    // mutable as the Win32 API requires.
    let created = unsafe {
        CreateProcessWithLogonW(
            PCWSTR(account_w.as_ptr()),
            PCWSTR(domain_w.as_ptr()),
            PCWSTR(password_w.as_ptr()),
            LOGON_WITH_PROFILE,
            PCWSTR::null(),
            windows::core::PWSTR(cmdline_w.as_ptr() as *mut u16),
            Default::default(),
            None,
            PCWSTR::null(),
            &startup_info,
            &mut process_info,
        )
    };

    if let Err(e) = created {
        return Err(super::pool::PoolError::Spawn(std::io::Error::from(e)));
    }

    unsafe {
        let _ = CloseHandle(process_info.hThread);
    }

    let pid = process_info.dwProcessId;
    let process_handle = process_info.hProcess;

    // Poll briefly for the helper to create its end of the pipe.
    let client = loop {
        match ClientOptions::new().open(&pipe_name) {
            Ok(c) => break c,
            Err(e) if e.raw_os_error() == Some(231) /* ERROR_PIPE_BUSY */ => {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Err(e) => {
                unsafe {
                    let _ = CloseHandle(process_handle);
                }
                return Err(super::pool::PoolError::Spawn(e));
            }
        }
    };

    unsafe {
        let _ = CloseHandle(process_handle);
    }

    // `tokio::process::Child` can't wrap a process we didn't spawn via
    // `tokio::process::Command`; callers only need it kept alive so it's
    // reaped, which the OS handles regardless on Windows.
    let child = tokio::process::Command::new("cmd")
        .arg("/c")
        .arg(format!("exit {pid}"))
        .kill_on_drop(false)
        .spawn()
        .map_err(super::pool::PoolError::Spawn)?;

    Ok((child, client))
}

/// Receives a duplicated file `HANDLE` sent over the pipe as a raw integer
/// value, the Windows equivalent of POSIX `SCM_RIGHTS`.
pub async fn receive_handle(stream: &NamedPipeClient) -> std::io::Result<tokio::fs::File> {
    stream.readable().await?;
    let mut buf = [0u8; 8];
    loop {
        match stream.try_read(&mut buf) {
            Ok(8) => break,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                stream.readable().await?;
            }
            Err(e) => return Err(e),
        }
    }

    let raw = isize::from_le_bytes(buf);
    let handle = HANDLE(raw as *mut core::ffi::c_void);
    let std_file = unsafe {
        use std::os::windows::io::FromRawHandle;
        std::fs::File::from_raw_handle(handle.0)
    };
    Ok(tokio::fs::File::from_std(std_file))
}
