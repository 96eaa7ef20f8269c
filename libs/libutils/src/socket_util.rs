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

//! socket-related helpers shared by the ports that create listening
//! endpoints and the options applied to their descriptors.
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use nix::unistd;
use std::path::Path;
use std::sync::Once;

static IPV6_PROBE: Once = Once::new();
static mut IPV6_SUPPORTED: bool = false;

/// probe once whether the kernel supports AF_INET6; cached for the process
/// lifetime since it can't change at runtime.
pub fn ipv6_is_supported() -> bool {
    unsafe {
        IPV6_PROBE.call_once(|| {
            IPV6_SUPPORTED = socket::socket(
                AddressFamily::Inet6,
                SockType::Datagram,
                SockFlag::empty(),
                None,
            )
            .map(|fd| {
                let _ = unistd::close(fd);
                true
            })
            .unwrap_or(false);
        });
        IPV6_SUPPORTED
    }
}

/// create every missing parent directory of `path` with `mode`, tolerating
/// `EEXIST` the way `mkfifo`/`mq_open` callers already do.
pub fn mkdir_parents(path: &Path, mode: u32) -> nix::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };

    let mut built = std::path::PathBuf::new();
    for comp in parent.components() {
        built.push(comp);
        match nix::unistd::mkdir(&built, nix::sys::stat::Mode::from_bits_truncate(mode)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EEXIST) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// run `f` under a umask that guarantees the created node ends up with
/// exactly `mode`, restoring the previous umask afterwards.
pub fn with_effective_mode<T>(mode: u32, f: impl FnOnce() -> T) -> T {
    let prev = nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(!mode & 0o777));
    let ret = f();
    nix::sys::stat::umask(prev);
    ret
}
