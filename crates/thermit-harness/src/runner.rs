//! Lockstep runner: a master and a slave wired back to back.

use std::{cell::Cell, rc::Rc};

use thermit_core::{Role, Session, SessionError, State};
use thermit_proto::Parameters;

use crate::{env::MemEnv, link::Wire};

/// Hand-driven millisecond clock shared by both endpoints.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock(Rc<Cell<u64>>);

impl VirtualClock {
    /// Clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    /// Advance the clock by `ms`.
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

/// A wired master/slave pair stepped in lockstep.
///
/// The wire handles stay available for fault injection between steps:
/// [`Pair::master_to_slave`] carries the master's frames, and corrupting or
/// clearing it before [`Pair::step_slave`] models line noise and lost
/// frames.
pub struct Pair {
    /// Master endpoint.
    pub master: Session<MemEnv>,
    /// Slave endpoint.
    pub slave: Session<MemEnv>,
    clock: VirtualClock,
    master_env: MemEnv,
    slave_env: MemEnv,
    m2s: Wire,
    s2m: Wire,
}

impl Pair {
    /// Pair with default capability sets on both ends.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_parameters(Parameters::default(), Parameters::default())
    }

    /// Pair with distinct local capability sets.
    pub fn with_parameters(
        master_caps: Parameters,
        slave_caps: Parameters,
    ) -> Result<Self, SessionError> {
        let clock = VirtualClock::new();
        let m2s = Wire::new();
        let s2m = Wire::new();
        let master_env = MemEnv::new(s2m.clone(), m2s.clone(), clock.clone());
        let slave_env = MemEnv::new(m2s.clone(), s2m.clone(), clock.clone());

        let master =
            Session::with_parameters("mem0", Role::Master, master_env.clone(), master_caps)?;
        let slave = Session::with_parameters("mem0", Role::Slave, slave_env.clone(), slave_caps)?;

        Ok(Self {
            master,
            slave,
            clock,
            master_env,
            slave_env,
            m2s,
            s2m,
        })
    }

    /// Shared clock.
    #[must_use]
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// The master's file system, outbox and fault toggles.
    #[must_use]
    pub fn master_env(&self) -> &MemEnv {
        &self.master_env
    }

    /// The slave's file system, outbox and fault toggles.
    #[must_use]
    pub fn slave_env(&self) -> &MemEnv {
        &self.slave_env
    }

    /// Bytes in flight from master to slave.
    #[must_use]
    pub fn master_to_slave(&self) -> &Wire {
        &self.m2s
    }

    /// Bytes in flight from slave to master.
    #[must_use]
    pub fn slave_to_master(&self) -> &Wire {
        &self.s2m
    }

    /// Step the master only.
    pub fn step_master(&mut self) -> State {
        self.master.step()
    }

    /// Step the slave only.
    pub fn step_slave(&mut self) -> State {
        self.slave.step()
    }

    /// One lockstep round: master, then slave.
    pub fn step_both(&mut self) {
        self.master.step();
        self.slave.step();
    }

    /// Step both endpoints until negotiation completes on each, for at most
    /// `max_steps` rounds. Returns `true` when both reached `Running`.
    pub fn run_until_running(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            self.step_both();
            if self.master.state() == State::Running && self.slave.state() == State::Running {
                return true;
            }
        }
        false
    }

    /// Step both endpoints until no transfer is active in either direction,
    /// for at most `max_steps` rounds. Returns `true` when fully drained.
    pub fn run_until_idle(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            self.step_both();
            let busy = self.master.tx_progress().running()
                || self.master.rx_progress().running()
                || self.slave.tx_progress().running()
                || self.slave.rx_progress().running();
            if !busy {
                return true;
            }
        }
        false
    }
}
