//! Mission sequencer
//!
//! Drives one hexagonal patrol through its phases on a single thread. Every
//! wait is a telemetry poll with a deadline, and every poll checks the
//! heartbeat. Any failure once the vehicle may be airborne triggers one
//! best-effort switch to RTL before the link is closed.

use crate::algorithms::{ground_distance, Hexagon};
use crate::core::GeoPoint;
use crate::hardware::{Telemetry, VehicleLink, VehicleMode};
use crate::mission::{build_patrol_mission, MissionError, MissionPhase, MissionResult};
use crate::utils::{ArrivalPolicy, MissionConfig};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Summary of a completed patrol
#[derive(Debug, Clone)]
pub struct MissionReport {
    /// Position the vehicle reported before takeoff
    pub home: GeoPoint,
    /// Patrol legs flown, not counting the leg home
    pub legs_flown: usize,
    pub phases: Vec<MissionPhase>,
    pub elapsed: Duration,
}

/// Flies the patrol over an owned vehicle link
pub struct MissionSequencer<L: VehicleLink> {
    link: L,
    config: MissionConfig,
    phase: MissionPhase,
    history: Vec<MissionPhase>,
    legs_flown: usize,
}

impl<L: VehicleLink> MissionSequencer<L> {
    pub fn new(link: L, config: MissionConfig) -> MissionResult<Self> {
        if let Some(error) = config.validate().into_iter().next() {
            return Err(error.into());
        }

        Ok(Self {
            link,
            config,
            phase: MissionPhase::Connecting,
            history: Vec::new(),
            legs_flown: 0,
        })
    }

    pub fn phase(&self) -> MissionPhase {
        self.phase
    }

    /// Phases entered so far, in order
    pub fn history(&self) -> &[MissionPhase] {
        &self.history
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Fly the whole patrol and close the link
    pub fn run(&mut self) -> MissionResult<MissionReport> {
        let started = Instant::now();

        match self.fly() {
            Ok(home) => {
                self.transition(MissionPhase::Done);
                if let Err(e) = self.link.close() {
                    warn!(error = %e, "closing vehicle link failed after patrol");
                }
                info!(legs = self.legs_flown, elapsed = ?started.elapsed(), "patrol complete");
                Ok(MissionReport {
                    home,
                    legs_flown: self.legs_flown,
                    phases: self.history.clone(),
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    fn fly(&mut self) -> MissionResult<GeoPoint> {
        self.transition(MissionPhase::Connecting);
        let home = self.wait_for_home()?;
        let hexagon = Hexagon::new(home, self.config.side_length_m)?;

        self.transition(MissionPhase::Uploading);
        self.upload(&hexagon)?;

        self.transition(MissionPhase::Arming);
        self.arm()?;

        self.transition(MissionPhase::TakingOff);
        self.take_off()?;

        let leg_dwell = Duration::from_millis(self.config.leg_dwell_ms);
        for (leg, point) in hexagon.closed_path().into_iter().enumerate() {
            self.transition(MissionPhase::EnRoute(leg));
            self.fly_to(point, leg_dwell)?;
            self.legs_flown += 1;
        }

        self.transition(MissionPhase::Returning);
        self.fly_to(hexagon.home(), Duration::from_millis(self.config.home_dwell_ms))?;

        Ok(home)
    }

    fn transition(&mut self, phase: MissionPhase) {
        info!(from = %self.phase, to = %phase, "mission phase");
        self.phase = phase;
        self.history.push(phase);
    }

    fn wait_for_home(&mut self) -> MissionResult<GeoPoint> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let heartbeat_timeout = self.config.heartbeat_timeout();
        self.poll_or_timeout(timeout, |t| {
            t.location.is_some() && !t.heartbeat_stale(heartbeat_timeout)
        })?;

        let home = self.link.telemetry().location.ok_or(MissionError::Timeout {
            phase: self.phase,
            waited: timeout,
        })?;
        info!(%home, "home position");
        Ok(home)
    }

    fn upload(&mut self, hexagon: &Hexagon) -> MissionResult<()> {
        info!("clearing stored mission");
        self.link.clear_mission()?;

        let commands = build_patrol_mission(hexagon, self.config.takeoff_altitude_m);
        info!(commands = commands.len(), "uploading patrol mission");
        self.link.upload_mission(&commands)?;

        self.poll(Duration::from_millis(self.config.settle_delay_ms), |_| false)?;
        Ok(())
    }

    fn arm(&mut self) -> MissionResult<()> {
        info!("waiting for pre-arm checks");
        self.poll_or_timeout(Duration::from_millis(self.config.ready_timeout_ms), |t| {
            t.armable
        })?;

        info!("arming motors");
        self.link.set_mode(VehicleMode::Guided)?;
        self.link.arm()?;
        self.poll_or_timeout(Duration::from_millis(self.config.arm_timeout_ms), |t| t.armed)?;
        Ok(())
    }

    fn take_off(&mut self) -> MissionResult<()> {
        let altitude = self.config.takeoff_altitude_m;
        let reached = altitude * self.config.takeoff_altitude_fraction;

        info!(altitude, "taking off");
        self.link.simple_takeoff(altitude)?;
        self.poll_or_timeout(Duration::from_millis(self.config.takeoff_timeout_ms), |t| {
            debug!(altitude = t.relative_alt_m, "climbing");
            t.relative_alt_m >= reached
        })?;
        info!("reached target altitude");
        Ok(())
    }

    fn fly_to(&mut self, target: GeoPoint, dwell: Duration) -> MissionResult<()> {
        info!(%target, "flying to waypoint");
        self.link.simple_goto(target, self.config.groundspeed_ms)?;

        match self.config.arrival_policy {
            ArrivalPolicy::Confirmed => {
                let radius = self.config.arrival_radius_m;
                self.poll_or_timeout(Duration::from_millis(self.config.leg_timeout_ms), |t| {
                    t.location.is_some_and(|here| {
                        let distance = ground_distance(&target, &here);
                        debug!(distance, "approaching waypoint");
                        distance <= radius
                    })
                })
            }
            ArrivalPolicy::FixedDwell => {
                self.poll(dwell, |_| false)?;
                Ok(())
            }
        }
    }

    /// Like [`poll`](Self::poll), but running out of time is an error
    fn poll_or_timeout<F>(&mut self, timeout: Duration, done: F) -> MissionResult<()>
    where
        F: FnMut(&Telemetry) -> bool,
    {
        let started = Instant::now();
        if self.poll(timeout, done)? {
            Ok(())
        } else {
            Err(MissionError::Timeout {
                phase: self.phase,
                waited: started.elapsed(),
            })
        }
    }

    /// Refresh telemetry every poll interval until `done` holds or `timeout`
    /// passes. Returns whether `done` was met.
    fn poll<F>(&mut self, timeout: Duration, mut done: F) -> MissionResult<bool>
    where
        F: FnMut(&Telemetry) -> bool,
    {
        let started = Instant::now();
        let interval = self.config.poll_interval();
        let heartbeat_timeout = self.config.heartbeat_timeout();

        loop {
            self.link.refresh()?;
            let telemetry = self.link.telemetry();

            if self.phase != MissionPhase::Connecting && telemetry.heartbeat_stale(heartbeat_timeout) {
                return Err(MissionError::LinkLost { phase: self.phase });
            }
            if done(&telemetry) {
                return Ok(true);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            thread::sleep(interval.min(timeout - elapsed));
        }
    }

    fn abort(&mut self, cause: &MissionError) {
        error!(phase = %self.phase, error = %cause, "mission failed");

        if self.phase.is_airborne() {
            warn!("commanding return to launch");
            if let Err(e) = self.link.set_mode(VehicleMode::Rtl) {
                warn!(error = %e, "return to launch failed");
            }
        }

        self.transition(MissionPhase::Aborted);
        if let Err(e) = self.link.close() {
            warn!(error = %e, "closing vehicle link failed");
        }
    }
}
