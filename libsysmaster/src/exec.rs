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

//! one step of an `ExecStartPre=`/`ExecStartPost=`/... list, and the
//! execution context (scratch directories, environment) every hook spawns
//! under.
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::rc::Rc;

/// a single exec step: a path, an argv, and whether its failure should be
/// ignored (a leading `-` in the manifest value). `ExecCommand`s within a
/// phase are consumed in order by `control_command_pop`/`run_next`; there is
/// no explicit `next` pointer here because the phase's `Vec<ExecCommand>`
/// already encodes the chain (popped from the back, pushed in manifest
/// order reversed — see `SocketConfigData::get_exec_cmds`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecCommand {
    path: PathBuf,
    argv: Vec<String>,
    ignore: bool,
}

impl ExecCommand {
    pub fn new(path: PathBuf, argv: Vec<String>, ignore: bool) -> Self {
        ExecCommand { path, argv, ignore }
    }

    /// parse a manifest line such as `-/usr/bin/foo arg1 arg2`.
    pub fn from_manifest_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (ignore, rest) = match line.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let mut words = rest.split_whitespace();
        let path = PathBuf::from(words.next()?);
        let argv = std::iter::once(path.to_string_lossy().to_string())
            .chain(words.map(|s| s.to_string()))
            .collect();
        Some(ExecCommand::new(path, argv, ignore))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn ignore(&self) -> bool {
        self.ignore
    }
}

/// how a hook is run: the enclosing unit's manager owns the actual
/// fork/exec/credential-resolution machinery; sub units only ever call
/// through this seam.
pub trait ProcessSpawner {
    fn spawn(
        &self,
        cmd: &ExecCommand,
        argv: Vec<String>,
        exec_ctx: &Rc<ExecContext>,
        unit_id: &str,
    ) -> crate::error::Result<nix::unistd::Pid>;
}

/// scratch state every spawned hook inherits: private `TMPDIR`/scratch
/// directories, named the way the serialized snapshot keys them
/// (`tmp-dir`, `var-tmp-dir`).
#[derive(Debug, Default)]
pub struct ExecContext {
    tmp_dir: std::cell::RefCell<Option<PathBuf>>,
    var_tmp_dir: std::cell::RefCell<Option<PathBuf>>,
}

impl ExecContext {
    pub fn new() -> Rc<ExecContext> {
        Rc::new(ExecContext::default())
    }

    pub fn tmp_dir(&self) -> Option<PathBuf> {
        self.tmp_dir.borrow().clone()
    }

    pub fn var_tmp_dir(&self) -> Option<PathBuf> {
        self.var_tmp_dir.borrow().clone()
    }

    pub fn set_tmp_dir(&self, dir: PathBuf) {
        *self.tmp_dir.borrow_mut() = Some(dir);
    }

    pub fn set_var_tmp_dir(&self, dir: PathBuf) {
        *self.var_tmp_dir.borrow_mut() = Some(dir);
    }
}
