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

//! post-parse manifest validation. Runs once after `SocketConfig::load`
//! succeeds; a failure here means the unit never enters `start()` at all.
use crate::config::SocketConfig;
use libsysmaster::error::*;
use libsysmaster::unit::KillMode;
use std::rc::Rc;

pub(super) struct SocketLoad {
    config: Rc<SocketConfig>,
}

impl SocketLoad {
    pub(super) fn new(config: &Rc<SocketConfig>) -> SocketLoad {
        SocketLoad {
            config: Rc::clone(config),
        }
    }

    /// fill in defaults that depend on more than one manifest key being
    /// known at once; currently a no-op seam kept for parity with the
    /// sibling `*_add_extras` steps other unit kinds run.
    pub(super) fn socket_add_extras(&self) {}

    /// reject configurations the state machine could never run safely.
    pub(super) fn socket_verify(&self) -> Result<()> {
        if self.config.ports().is_empty() {
            return Err("socket unit configures no Listen* directive".to_string().into());
        }

        if self.config.accept() {
            for port in self.config.ports() {
                if port.p_type() != crate::rentry::PortType::Socket {
                    return Err(format!(
                        "Accept=yes requires every Listen* directive to be a socket, but {} is not",
                        port.listen()
                    )
                    .into());
                }
                if let Some(sa) = port.sa() {
                    if !sa.can_accept() {
                        return Err(format!(
                            "Accept=yes is incompatible with {}",
                            port.listen()
                        )
                        .into());
                    }
                }
            }

            if self.config.max_connections() == 0 {
                return Err("Accept=yes requires MaxConnections > 0".to_string().into());
            }

            if self.config.unit_ref_target().is_some() {
                return Err(
                    "Accept=yes sockets cannot bind to an explicit Service=".to_string().into(),
                );
            }
        }

        if self.config.kill_context().kill_mode() != KillMode::ControlGroup
            && self.requires_control_group()
        {
            return Err(
                "PAMName requires KillMode=control-group".to_string().into(),
            );
        }

        Ok(())
    }

    /// placeholder for `PAMName=`'s constraint; kept distinct from the
    /// `kill_mode` check above since `PAMName` itself isn't modeled yet.
    fn requires_control_group(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::comm::SocketUnitComm;
    use crate::config::SocketConfig;
    use crate::load::SocketLoad;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[test]
    fn accept_yes_rejects_non_socket_ports() {
        let mut file_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        file_path.push("tests/test_units/test.socket.accept-fifo.toml");

        let comm = Rc::new(SocketUnitComm::new());
        let config = Rc::new(SocketConfig::new(&comm));
        config.load(vec![file_path]).expect("manifest should parse");

        let load = SocketLoad::new(&config);
        let result = load.socket_verify();

        assert!(result.is_err());
    }
}
