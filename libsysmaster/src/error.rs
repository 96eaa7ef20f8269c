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

//! the error type shared by every sub unit. Manifest parsing and syscall
//! failures are wrapped with `.context(XxxSnafu)` at the boundary where they
//! happen; callers further up only ever see [`Error`].
use snafu::Snafu;
pub use snafu::ResultExt;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("nix syscall failed: {}", source))]
    Nix { source: nix::errno::Errno },

    #[snafu(display("io error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("configuration error: {}", source))]
    Confique { source: confique::Error },

    #[snafu(display("{}", msg))]
    Other { msg: String },

    /// a freshly opened fifo/special/mqueue node didn't match what was
    /// expected (wrong file type, mode, or owner) — most likely a stale or
    /// hostile node left behind at the configured path.
    #[snafu(display("{} does not match the expected file, mode or owner", path))]
    FileConflict { path: String },

    /// `start()`/`stop()` is already under way; the caller should leave
    /// the job queued and retry once the current transition settles.
    #[snafu(display("action temporarily unavailable, already in transition"))]
    UnitActionEAgain,

    /// `start()` was refused outright (e.g. start-rate-limit hit) and the
    /// enclosing job should be dropped, not retried.
    #[snafu(display("action canceled"))]
    UnitActionECanceled,
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other { msg }
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other {
            msg: msg.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
