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

//! A small single-threaded, epoll-backed event loop. Sub units register
//! [`Source`]s for read readiness; [`Timer`] and [`ChildWatch`] round out
//! the three event classes a unit's state machine reacts to.

mod child;
mod timer;

pub use child::{ChildWatch, PidHandler};
pub use timer::Timer;

use nix::sys::epoll::{
    epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("epoll operation failed: {0}")]
    Nix(#[from] nix::errno::Errno),
    #[error("{word}")]
    Other { word: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// the event class a [`Source`] reacts to. Every source the engine
/// registers today is I/O readiness; timers and child exits are modeled
/// separately (see [`Timer`], [`ChildWatch`]) since their wait primitives
/// differ from epoll fd readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Io,
}

/// whether a registered source currently participates in dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    On,
    Off,
}

/// something that can be registered with [`Events`] for readiness
/// notification. Implementors own the fd; `Events` never closes it.
pub trait Source {
    fn fd(&self) -> RawFd;
    fn event_type(&self) -> EventType;
    fn epoll_event(&self) -> i32;
    fn priority(&self) -> i8 {
        0
    }
    /// called when the fd becomes ready. Return value is advisory (kept for
    /// parity with the corpus; the loop doesn't act on it today).
    fn dispatch(&self, events: &Events) -> i32;
    fn token(&self) -> u64;
}

struct Registration {
    source: Rc<dyn Source>,
    state: EventState,
}

/// the loop itself: an epoll instance plus the bookkeeping needed to turn
/// `epoll_wait` results back into `Source::dispatch` calls.
pub struct Events {
    epoll_fd: RawFd,
    sources: RefCell<HashMap<u64, Registration>>,
}

impl Events {
    pub fn new() -> Result<Rc<Events>> {
        let epoll_fd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Rc::new(Events {
            epoll_fd,
            sources: RefCell::new(HashMap::new()),
        }))
    }

    pub fn add_source(&self, source: Rc<dyn Source>) -> Result<()> {
        let token = source.token();
        let mut ev = EpollEvent::new(EpollFlags::from_bits_truncate(source.epoll_event()), token);
        epoll_ctl(self.epoll_fd, EpollOp::EpollCtlAdd, source.fd(), &mut ev)?;
        self.sources.borrow_mut().insert(
            token,
            Registration {
                source,
                state: EventState::On,
            },
        );
        Ok(())
    }

    pub fn del_source(&self, source: Rc<dyn Source>) -> Result<()> {
        let token = source.token();
        if self.sources.borrow_mut().remove(&token).is_some() {
            let _ = epoll_ctl(
                self.epoll_fd,
                EpollOp::EpollCtlDel,
                source.fd(),
                &mut EpollEvent::empty(),
            );
        }
        Ok(())
    }

    pub fn set_enabled(&self, source: Rc<dyn Source>, state: EventState) -> Result<()> {
        let token = source.token();
        let mut sources = self.sources.borrow_mut();
        let reg = sources.get_mut(&token).ok_or(Error::Other {
            word: "source not registered",
        })?;
        let want = match state {
            EventState::On => EpollFlags::from_bits_truncate(reg.source.epoll_event()),
            EventState::Off => EpollFlags::empty(),
        };
        let mut ev = EpollEvent::new(want, token);
        epoll_ctl(self.epoll_fd, EpollOp::EpollCtlMod, reg.source.fd(), &mut ev)?;
        reg.state = state;
        Ok(())
    }

    /// block up to `timeout_ms` (-1 == forever) for readiness, dispatching
    /// every source that fired. Returns the number of sources dispatched.
    pub fn run(&self, timeout_ms: isize) -> Result<usize> {
        let mut buf = [EpollEvent::empty(); 32];
        let n = epoll_wait(self.epoll_fd, &mut buf, timeout_ms)?;
        let mut dispatched = 0;
        for ev in buf.iter().take(n) {
            let token = ev.data();
            let source = self
                .sources
                .borrow()
                .get(&token)
                .filter(|r| r.state == EventState::On)
                .map(|r| Rc::clone(&r.source));
            if let Some(source) = source {
                source.dispatch(self);
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }
}

impl Drop for Events {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.epoll_fd);
    }
}
