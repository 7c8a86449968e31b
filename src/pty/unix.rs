//! Unix PTY implementation
//!
//! Implements PTY creation and child process management using POSIX APIs.
//!
//! Everything the child needs (argv, envp, the resolved executable, the
//! slave path) is prepared before `fork`, so the child only makes
//! async-signal-safe calls. An exec failure is reported back through a
//! close-on-exec pipe: the parent reads EOF on success, or the child's
//! errno on failure.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString, OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::libc;
use nix::pty::{grantpt, posix_openpt, unlockpt};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use super::{ExitStatus, PtyError, PtyResult, SpawnCommand, WindowSize};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A pseudoterminal with a spawned child process
#[derive(Debug)]
pub struct Pty {
    /// The PTY master, read by a single reader
    master: File,
    /// Duplicate of the master used for input
    writer: Mutex<File>,
    /// The child process ID (also its process group ID)
    child_pid: Pid,
    /// Set once the child has been waited for
    reaped: AtomicBool,
}

impl Pty {
    /// Spawn `command` attached to a new PTY
    pub fn spawn(command: &SpawnCommand) -> PtyResult<Self> {
        // Prepare everything the child needs before forking
        let env = build_env(&command.env);
        let path_var = env.get(OsStr::new("PATH")).map(OsString::as_os_str);
        let program = resolve_program(&command.program, path_var)?;
        let cwd = match &command.cwd {
            Some(dir) if !dir.is_dir() => return Err(PtyError::InvalidCwd(dir.clone())),
            Some(dir) => Some(CString::new(dir.as_os_str().as_bytes())?),
            None => None,
        };

        let program_c = CString::new(program.as_os_str().as_bytes())?;
        let argv_c = std::iter::once(command.program.as_str())
            .chain(command.args.iter().map(String::as_str))
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()?;
        let envp_c = env
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                CString::new(entry)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let argv = null_terminated(&argv_c);
        let envp = null_terminated(&envp_c);

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::GrantPty)?;
        unlockpt(&master).map_err(PtyError::UnlockPty)?;
        let slave_name = slave_name(&master)?;
        let slave_c = CString::new(slave_name)?;
        // Hand the master to std so it is closed on every early return
        // SAFETY: into_raw_fd transfers ownership of a valid descriptor
        let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };
        set_cloexec(master.as_raw_fd()).map_err(PtyError::OpenMaster)?;
        set_window_size(master.as_raw_fd(), command.size)?;

        let (status_read, status_write) = pipe().map_err(PtyError::Pipe)?;
        set_cloexec(status_read.as_raw_fd()).map_err(PtyError::Pipe)?;
        set_cloexec(status_write.as_raw_fd()).map_err(PtyError::Pipe)?;

        let child_args = ChildArgs {
            master_fd: master.as_raw_fd(),
            status_fd: status_write.as_raw_fd(),
            slave: &slave_c,
            cwd: cwd.as_deref(),
            program: &program_c,
            argv: &argv,
            envp: &envp,
        };

        // SAFETY: the child branch only calls async-signal-safe functions
        // before execve or _exit
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => unsafe { exec_child(&child_args) },
            ForkResult::Parent { child } => {
                drop(status_write);

                let mut status = Vec::with_capacity(4);
                File::from(status_read).read_to_end(&mut status)?;
                if let Ok(errno) = <[u8; 4]>::try_from(status.as_slice()) {
                    // The child has already exited with 127
                    let _ = waitpid(child, None);
                    return Err(PtyError::Exec {
                        program: command.program.clone(),
                        source: Errno::from_raw(i32::from_ne_bytes(errno)),
                    });
                }

                let writer = Mutex::new(master.try_clone()?);
                tracing::debug!(pid = child.as_raw(), program = %program.display(), "spawned child");
                Ok(Pty {
                    master,
                    writer,
                    child_pid: child,
                    reaped: AtomicBool::new(false),
                })
            }
        }
    }

    /// Whether the child has been waited for
    pub fn has_exited(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    /// Blocking read from the PTY master.
    ///
    /// Returns 0 once the slave side is closed (Linux reports this as EIO).
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        loop {
            match (&self.master).read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write all data to the PTY master
    pub fn write_all(&self, data: &[u8]) -> PtyResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Resize the PTY. The kernel delivers SIGWINCH to the foreground group.
    pub fn resize(&self, size: WindowSize) -> PtyResult<()> {
        set_window_size(self.master.as_raw_fd(), size)
    }

    /// Current window size of the PTY
    pub fn window_size(&self) -> PtyResult<WindowSize> {
        get_window_size(self.master.as_raw_fd())
    }

    /// Send a signal to the child process
    pub fn signal(&self, signal: Signal) -> PtyResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        match kill(self.child_pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(PtyError::Signal(e)),
        }
    }

    /// Send a signal to the child's process group
    pub fn signal_group(&self, signal: Signal) -> PtyResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        match killpg(self.child_pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(PtyError::Signal(e)),
        }
    }

    /// Block until the child exits
    pub fn wait(&self) -> PtyResult<ExitStatus> {
        loop {
            let status = match waitpid(self.child_pid, None) {
                Ok(WaitStatus::Exited(_, code)) => ExitStatus::exited(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => ExitStatus::signaled(signal as i32),
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(PtyError::Wait(e)),
            };
            self.reaped.store(true, Ordering::Release);
            return Ok(status);
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Try to reap the child process
        if !self.has_exited() {
            let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

struct ChildArgs<'a> {
    master_fd: RawFd,
    status_fd: RawFd,
    slave: &'a CString,
    cwd: Option<&'a CStr>,
    program: &'a CString,
    argv: &'a [*const c_char],
    envp: &'a [*const c_char],
}

/// Runs in the forked child. Never returns.
///
/// # Safety
/// Must only be called in the child branch of `fork`.
unsafe fn exec_child(args: &ChildArgs<'_>) -> ! {
    libc::close(args.master_fd);

    if libc::setsid() < 0 {
        child_fail(args.status_fd);
    }

    let slave = libc::open(args.slave.as_ptr(), libc::O_RDWR);
    if slave < 0 {
        child_fail(args.status_fd);
    }
    // Make the slave our controlling terminal
    if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
        child_fail(args.status_fd);
    }
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::dup2(slave, fd) < 0 {
            child_fail(args.status_fd);
        }
    }
    if slave > libc::STDERR_FILENO {
        libc::close(slave);
    }

    if let Some(cwd) = args.cwd {
        if libc::chdir(cwd.as_ptr()) < 0 {
            child_fail(args.status_fd);
        }
    }

    // The Rust runtime ignores SIGPIPE and dispositions survive exec
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    let mut empty: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut empty);
    libc::sigprocmask(libc::SIG_SETMASK, &empty, ptr::null_mut());

    libc::execve(args.program.as_ptr(), args.argv.as_ptr(), args.envp.as_ptr());
    child_fail(args.status_fd)
}

/// Report errno to the parent and exit
unsafe fn child_fail(status_fd: RawFd) -> ! {
    let errno = Errno::last() as i32;
    let bytes = errno.to_ne_bytes();
    libc::write(status_fd, bytes.as_ptr().cast(), bytes.len());
    libc::_exit(127)
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Inherited environment, then `TERM`, then the caller's overrides
fn build_env(overrides: &HashMap<String, String>) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    env.insert("TERM".into(), "xterm-256color".into());
    for (key, value) in overrides {
        env.insert(key.into(), value.into());
    }
    env
}

/// Resolve a program name against `PATH` the way `execvp` would
fn resolve_program(program: &str, path_var: Option<&OsStr>) -> PtyResult<PathBuf> {
    if program.is_empty() {
        return Err(PtyError::ProgramNotFound(String::new()));
    }
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    let path_var = path_var.unwrap_or_else(|| OsStr::new(DEFAULT_PATH));
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| PtyError::ProgramNotFound(program.to_string()))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

#[cfg(target_os = "linux")]
fn slave_name(master: &nix::pty::PtyMaster) -> PtyResult<String> {
    nix::pty::ptsname_r(master).map_err(PtyError::PtsName)
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: &nix::pty::PtyMaster) -> PtyResult<String> {
    // SAFETY: ptsname uses a static buffer; the result is copied out immediately
    unsafe { nix::pty::ptsname(master) }.map_err(PtyError::PtsName)
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: size.pixel_width,
        ws_ypixel: size.pixel_height,
    };

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::SetWinsize(Errno::last()))
    } else {
        Ok(())
    }
}

/// Get the window size from a PTY file descriptor
fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(PtyError::SetWinsize(Errno::last()))
    } else {
        Ok(WindowSize {
            rows: winsize.ws_row,
            cols: winsize.ws_col,
            pixel_width: winsize.ws_xpixel,
            pixel_height: winsize.ws_ypixel,
        })
    }
}
