// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! builds the kernel-visible endpoint for one `Listen*=` line: a bound and
//! (for connection-oriented types) listening socket, an opened fifo, an
//! opened special file, or a posix message queue. `SocketMng::open_fds`
//! opens every configured port in order and rolls the whole set back if
//! any one fails, so `open()` here never leaves a half-initialized node
//! behind on error.
use crate::config::{SocketConfig, SocketPortConf};
use crate::option::{set_raw_int, OptionApplier};
use crate::rentry::PortType;
use libsysmaster::error::*;
use libutils::socket_util;
use nix::fcntl::{self, OFlag};
use nix::sys::socket::{self, SockFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

/// `AF_NETLINK` sockets are opened with the raw protocol number parsed out
/// of `ListenNetlink=` (route/kobject-uevent/audit/...); nix's `SockProtocol`
/// only names a handful of these, so we go straight to `libc::socket` rather
/// than maintain a second enum mapping.
fn open_netlink_raw(protocol: libc::c_int) -> Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            protocol,
        )
    };
    if fd < 0 {
        return Err(nix::errno::Errno::last()).context(Nix);
    }
    Ok(fd)
}

pub(super) struct SocketPort {
    conf: Rc<SocketPortConf>,
    fd: Cell<RawFd>,
}

impl SocketPort {
    pub(super) fn new(conf: Rc<SocketPortConf>) -> SocketPort {
        SocketPort {
            conf,
            fd: Cell::new(-1),
        }
    }

    pub(super) fn p_type(&self) -> PortType {
        self.conf.p_type()
    }

    pub(super) fn listen(&self) -> &str {
        self.conf.listen()
    }

    pub(super) fn fd(&self) -> RawFd {
        self.fd.get()
    }

    pub(super) fn set_fd(&self, fd: RawFd) {
        self.fd.set(fd);
    }

    pub(super) fn can_accept(&self) -> bool {
        match self.conf.p_type() {
            PortType::Socket => self.conf.sa().map(|sa| sa.can_accept()).unwrap_or(false),
            _ => false,
        }
    }

    /// open this port and leave the resulting fd in `self.fd`. Mirrors the
    /// original's `socket_address_listen`/`unit_setup_special`/
    /// `unit_setup_fifo` split: each port kind has its own open sequence
    /// but shares the final `OptionApplier` pass.
    pub(super) fn open(&self, unit_id: &str, config: &SocketConfig, backlog: usize) -> Result<()> {
        let fd = match self.conf.p_type() {
            PortType::Socket => self.open_socket(unit_id, config, backlog)?,
            PortType::Fifo => self.open_fifo(config)?,
            PortType::Special => self.open_special()?,
            PortType::MessageQueue => self.open_mqueue(config)?,
        };

        let applier = OptionApplier::new(unit_id, config);
        match self.conf.p_type() {
            PortType::Socket => {
                let family = self.conf.sa().and_then(|sa| sa.family());
                applier.apply(fd, family);
            }
            PortType::Fifo => {
                applier.apply_pipe_size(fd);
                applier.apply_smack(fd, None);
            }
            _ => {}
        }

        self.fd.set(fd);
        Ok(())
    }

    fn open_socket(&self, unit_id: &str, config: &SocketConfig, backlog: usize) -> Result<RawFd> {
        let sa = self
            .conf
            .sa()
            .ok_or_else(|| Error::from("socket port has no address".to_string()))?;

        if let Some(path) = sa.path() {
            socket_util::mkdir_parents(&path, config.directory_mode()).context(Nix)?;
        }

        let (domain, fd) = if sa.is_netlink() {
            let protocol = sa.netlink_protocol().unwrap_or(0);
            (socket::AddressFamily::Netlink, open_netlink_raw(protocol)?)
        } else {
            let domain = sa
                .family()
                .ok_or_else(|| Error::from("socket port has no family".to_string()))?;
            let fd = socket::socket(
                domain,
                sa.sa_type(),
                SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
                None,
            )
            .context(Nix)?;
            (domain, fd)
        };

        if let Err(e) = socket::setsockopt(fd, socket::sockopt::ReuseAddr, &true) {
            log::warn!("{}: failed to set SO_REUSEADDR, ignoring: {}", unit_id, e);
        }

        self.apply_pre_bind_options(unit_id, fd, domain, config);

        self.bind_with_retry(fd, sa.sock_addr(), sa.path().as_deref())?;

        if sa.can_accept() {
            socket::listen(fd, backlog).context(Nix)?;
        }

        if let Some(path) = sa.path() {
            self.chmod_chown(&path, config)?;
        }

        Ok(fd)
    }

    /// `FreeBind=`/`Transparent=`/`BindIPv6Only=`/`BindToDevice=` — applied
    /// between `socket(2)` and `bind(2)`, matching the original's ordering
    /// (these affect how the kernel validates the bind address).
    fn apply_pre_bind_options(
        &self,
        unit_id: &str,
        fd: RawFd,
        domain: socket::AddressFamily,
        config: &SocketConfig,
    ) {
        if config.free_bind() {
            if let Err(e) = set_raw_int(fd, libc::IPPROTO_IP, libc::IP_FREEBIND, 1) {
                log::warn!("{}: failed to set IP_FREEBIND, ignoring: {}", unit_id, e);
            }
        }

        if config.transparent() {
            if let Err(e) = set_raw_int(fd, libc::IPPROTO_IP, libc::IP_TRANSPARENT, 1) {
                log::warn!("{}: failed to set IP_TRANSPARENT, ignoring: {}", unit_id, e);
            }
        }

        if domain == socket::AddressFamily::Inet6 && config.bind_ipv6_only() {
            if let Err(e) = socket::setsockopt(fd, socket::sockopt::Ipv6V6Only, &true) {
                log::warn!("{}: failed to set IPV6_V6ONLY, ignoring: {}", unit_id, e);
            }
        }

        if let Some(dev) = config.bind_to_device() {
            let dev = std::ffi::OsString::from(dev);
            if let Err(e) = socket::setsockopt(fd, socket::sockopt::BindToDevice, &dev) {
                log::warn!("{}: failed to set SO_BINDTODEVICE, ignoring: {}", unit_id, e);
            }
        }
    }

    /// UNIX sockets left behind by a killed process fail `bind()` with
    /// `EADDRINUSE`; unlink the stale node and retry once, same as the
    /// original's `unit_addr_in_use` handling.
    fn bind_with_retry(
        &self,
        fd: RawFd,
        sock_addr: &dyn socket::SockaddrLike,
        unix_path: Option<&std::path::Path>,
    ) -> Result<()> {
        match socket::bind(fd, sock_addr) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EADDRINUSE) if unix_path.is_some() => {
                let path = unix_path.unwrap();
                log::info!("{} already bound, unlinking and retrying", path.display());
                let _ = unistd::unlink(path);
                socket::bind(fd, sock_addr).context(Nix)
            }
            Err(e) => Err(e).context(Nix),
        }
    }

    fn chmod_chown(&self, path: &std::path::Path, config: &SocketConfig) -> Result<()> {
        apply_ownership(path, config.socket_mode(), config.socket_user(), config.socket_group())
    }

    fn open_fifo(&self, config: &SocketConfig) -> Result<RawFd> {
        let path = self
            .conf
            .path()
            .ok_or_else(|| Error::from("fifo port has no path".to_string()))?;

        socket_util::mkdir_parents(path, config.directory_mode()).context(Nix)?;

        let mode = Mode::from_bits_truncate(config.socket_mode());
        let mk: nix::Result<()> = socket_util::with_effective_mode(config.socket_mode(), || {
            match unistd::mkfifo(path, mode) {
                Ok(()) | Err(nix::errno::Errno::EEXIST) => Ok(()),
                Err(e) => Err(e),
            }
        });
        mk.context(Nix)?;

        let fd = fcntl::open(
            path,
            OFlag::O_RDWR | OFlag::O_CLOEXEC | OFlag::O_NOCTTY | OFlag::O_NONBLOCK | OFlag::O_NOFOLLOW,
            Mode::empty(),
        )
        .context(Nix)?;

        if let Err(e) = verify_fstat(fd, path, Some(libc::S_IFIFO), config.socket_mode()) {
            let _ = unistd::close(fd);
            return Err(e);
        }

        apply_ownership(path, config.socket_mode(), config.socket_user(), config.socket_group())?;

        Ok(fd)
    }

    /// special files (device nodes, `/proc` entries) must already exist;
    /// this never creates them, only opens what's there.
    fn open_special(&self) -> Result<RawFd> {
        let path = self
            .conf
            .path()
            .ok_or_else(|| Error::from("special port has no path".to_string()))?;

        let fd = fcntl::open(
            path,
            OFlag::O_RDONLY | OFlag::O_CLOEXEC | OFlag::O_NOCTTY | OFlag::O_NONBLOCK | OFlag::O_NOFOLLOW,
            Mode::empty(),
        )
        .context(Nix)?;

        let st = nix::sys::stat::fstat(fd).context(Nix)?;
        let file_type = st.st_mode & libc::S_IFMT;
        if file_type != libc::S_IFREG && file_type != libc::S_IFCHR {
            let _ = unistd::close(fd);
            return Err(Error::FileConflict {
                path: path.display().to_string(),
            });
        }

        Ok(fd)
    }

    fn open_mqueue(&self, config: &SocketConfig) -> Result<RawFd> {
        let path = self
            .conf
            .path()
            .ok_or_else(|| Error::from("mqueue port has no path".to_string()))?;
        let name = std::ffi::CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| Error::from("invalid message queue name".to_string()))?;

        let max_msg = config.message_queue_max_messages();
        let msg_size = config.message_queue_message_size();

        let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
        attr.mq_maxmsg = if max_msg > 0 { max_msg } else { 10 };
        attr.mq_msgsize = if msg_size > 0 { msg_size } else { 8192 };

        let fd = socket_util::with_effective_mode(config.socket_mode(), || unsafe {
            libc::mq_open(
                name.as_ptr(),
                libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NONBLOCK | libc::O_CREAT,
                config.socket_mode() as libc::mode_t,
                &mut attr as *mut libc::mq_attr,
            )
        });

        if fd < 0 {
            return Err(nix::errno::Errno::last()).context(Nix);
        }

        if let Err(e) = verify_fstat(fd, path, None, config.socket_mode()) {
            let _ = unsafe { libc::mq_close(fd) };
            return Err(e);
        }

        Ok(fd as RawFd)
    }

    /// accept one connection; the caller (`ConnectionDispatcher`) is
    /// responsible for `MaxConnections` admission before calling this.
    pub(super) fn accept(&self) -> nix::Result<RawFd> {
        socket::accept4(self.fd.get(), SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK)
    }

    /// close the fd, optionally also removing the filesystem artifact
    /// (socket path, fifo node, mqueue name). Transitions that will
    /// rebind the same port (`StartChown` -> `StartPost`) pass `false`;
    /// `Dead`/`Failed` pass `true` so a later `start` gets a clean node.
    pub(super) fn close(&self, delete: bool) {
        let fd = self.fd.get();
        if fd >= 0 {
            match self.conf.p_type() {
                PortType::MessageQueue => {
                    let _ = unsafe { libc::mq_close(fd) };
                }
                _ => {
                    let _ = unistd::close(fd);
                }
            }
            self.fd.set(-1);
        }

        if !delete {
            return;
        }

        match self.conf.p_type() {
            PortType::Socket => {
                if let Some(path) = self.conf.sa().and_then(|sa| sa.path()) {
                    let _ = unistd::unlink(&path);
                }
            }
            PortType::Fifo => {
                if let Some(path) = self.conf.path() {
                    let _ = unistd::unlink(path);
                }
            }
            PortType::MessageQueue => {
                if let Some(path) = self.conf.path() {
                    if let Ok(name) = std::ffi::CString::new(path.to_string_lossy().as_bytes()) {
                        let _ = unsafe { libc::mq_unlink(name.as_ptr()) };
                    }
                }
            }
            PortType::Special => {}
        }
    }

    /// drain and discard whatever is queued on a connection-oriented
    /// port without handing it to a service instance — used when a
    /// socket is stopping with `Accept=yes` connections still pending.
    pub(super) fn flush_accept(&self) {
        if !self.can_accept() {
            return;
        }
        loop {
            match self.accept() {
                Ok(cfd) => {
                    let _ = unistd::close(cfd);
                }
                Err(_) => break,
            }
        }
    }

    /// drain pending datagrams on a non-accepting port so a later
    /// `Listening` cycle doesn't immediately redeliver stale input.
    pub(super) fn flush_fd(&self) {
        if self.can_accept() || self.fd.get() < 0 {
            return;
        }
        let mut buf = [0u8; 2048];
        loop {
            match unistd::read(self.fd.get(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }
}

/// post-open TOCTOU check for fifo/mqueue nodes: an `EEXIST`-tolerant
/// create may have raced a hostile pre-existing node at the same path, so
/// verify the fd we actually opened has the type/mode/owner we expect
/// before trusting it (and, for fifos, before re-chowning it to the
/// configured `SocketUser=`/`SocketGroup=`).
fn verify_fstat(
    fd: RawFd,
    path: &std::path::Path,
    want_type: Option<libc::mode_t>,
    want_mode: u32,
) -> Result<()> {
    let st = nix::sys::stat::fstat(fd).context(Nix)?;

    if let Some(want_type) = want_type {
        if st.st_mode & libc::S_IFMT != want_type {
            return Err(Error::FileConflict {
                path: path.display().to_string(),
            });
        }
    }

    let effective_mode = want_mode & 0o777;
    if st.st_mode as u32 & 0o777 != effective_mode {
        return Err(Error::FileConflict {
            path: path.display().to_string(),
        });
    }

    if st.st_uid != unistd::geteuid().as_raw() || st.st_gid != unistd::getegid().as_raw() {
        return Err(Error::FileConflict {
            path: path.display().to_string(),
        });
    }

    Ok(())
}

fn apply_ownership(
    path: &std::path::Path,
    mode: u32,
    user: Option<String>,
    group: Option<String>,
) -> Result<()> {
    use nix::sys::stat::fchmodat;
    use nix::sys::stat::FchmodatFlags;
    use nix::unistd::{Gid, Uid};

    fchmodat(
        None,
        path,
        Mode::from_bits_truncate(mode),
        FchmodatFlags::FollowSymlink,
    )
    .context(Nix)?;

    if user.is_some() || group.is_some() {
        let uid = user
            .as_deref()
            .and_then(|u| u.parse::<u32>().ok())
            .map(Uid::from_raw);
        let gid = group
            .as_deref()
            .and_then(|g| g.parse::<u32>().ok())
            .map(Gid::from_raw);
        unistd::chown(path, uid, gid).context(Nix)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::verify_fstat;
    use nix::fcntl::{self, OFlag};
    use nix::sys::stat::Mode;
    use nix::unistd;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("socket-port-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn verify_fstat_rejects_mode_mismatch() {
        let path = temp_path("mode-mismatch");
        let fd = fcntl::open(
            &path,
            OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(0o644),
        )
        .expect("open should succeed");
        nix::sys::stat::fchmod(fd, Mode::from_bits_truncate(0o644)).expect("fchmod");

        let result = verify_fstat(fd, &path, None, 0o600);

        let _ = unistd::close(fd);
        let _ = unistd::unlink(&path);

        assert!(result.is_err());
    }

    #[test]
    fn verify_fstat_accepts_matching_mode_and_owner() {
        let path = temp_path("mode-match");
        let fd = fcntl::open(
            &path,
            OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(0o640),
        )
        .expect("open should succeed");
        nix::sys::stat::fchmod(fd, Mode::from_bits_truncate(0o640)).expect("fchmod");

        let result = verify_fstat(fd, &path, None, 0o640);

        let _ = unistd::close(fd);
        let _ = unistd::unlink(&path);

        assert!(result.is_ok());
    }
}
