//! Mock vehicle for testing and development
//!
//! Simulates just enough of a copter to drive the mission sequencer: it
//! becomes armable after a number of refreshes, climbs a fixed step per
//! refresh after takeoff, and moves a fixed distance toward its goto target
//! per refresh. Faults (never arming, a dropped link, rejected uploads) can be
//! scripted.

use crate::algorithms::hexagon::{inverse_offset, offset};
use crate::core::GeoPoint;
use crate::hardware::{LinkError, LinkResult, Telemetry, VehicleLink, VehicleMode};
use crate::mission::MissionCommand;
use std::time::Duration;

/// Heartbeat age the mock reports once its link has dropped
const DROPPED_HEARTBEAT_AGE: Duration = Duration::from_secs(3600);

/// Every call the mock received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    ClearMission,
    UploadMission(usize),
    SetMode(VehicleMode),
    Arm,
    Takeoff(f64),
    Goto(GeoPoint, f64),
    Close,
}

/// Scripted in-memory vehicle
pub struct MockVehicle {
    home: GeoPoint,
    horizontal: GeoPoint,
    relative_alt_m: f64,
    mode: VehicleMode,
    armed: bool,
    closed: bool,
    refreshes: u32,
    armable_after: u32,
    arms_on_request: bool,
    reject_upload: bool,
    fail_close: bool,
    climb_step_m: f64,
    approach_step_m: f64,
    takeoff_target: Option<f64>,
    goto_target: Option<GeoPoint>,
    drop_link_after_gotos: Option<usize>,
    gotos: usize,
    link_dropped: bool,
    telemetry_loss: f64,
    mission: Vec<MissionCommand>,
    calls: Vec<MockCall>,
}

impl MockVehicle {
    /// Create a mock sitting disarmed on the ground at `home`
    pub fn new(home: GeoPoint) -> Self {
        Self {
            home,
            horizontal: home,
            relative_alt_m: 0.0,
            mode: VehicleMode::Stabilize,
            armed: false,
            closed: false,
            refreshes: 0,
            armable_after: 0,
            arms_on_request: true,
            reject_upload: false,
            fail_close: false,
            climb_step_m: 2.5,
            approach_step_m: 15.0,
            takeoff_target: None,
            goto_target: None,
            drop_link_after_gotos: None,
            gotos: 0,
            link_dropped: false,
            telemetry_loss: 0.0,
            mission: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Report armable only after `refreshes` telemetry refreshes
    pub fn armable_after(mut self, refreshes: u32) -> Self {
        self.armable_after = refreshes;
        self
    }

    /// Accept arm requests but never report being armed
    pub fn never_arms(mut self) -> Self {
        self.arms_on_request = false;
        self
    }

    /// Answer mission uploads with a rejection
    pub fn rejects_upload(mut self) -> Self {
        self.reject_upload = true;
        self
    }

    /// Report an I/O error when the link is closed
    pub fn fails_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Meters climbed and meters flown toward the target per refresh
    pub fn with_speeds(mut self, climb_step_m: f64, approach_step_m: f64) -> Self {
        self.climb_step_m = climb_step_m;
        self.approach_step_m = approach_step_m;
        self
    }

    /// Stop sending heartbeats once `gotos` goto commands have been received
    pub fn drop_link_after_gotos(mut self, gotos: usize) -> Self {
        self.drop_link_after_gotos = Some(gotos);
        self
    }

    /// Skip a refresh's telemetry update with the given probability (0.0 to 1.0)
    pub fn with_telemetry_loss(mut self, probability: f64) -> Self {
        self.telemetry_loss = probability.clamp(0.0, 1.0);
        self
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn mission(&self) -> &[MissionCommand] {
        &self.mission
    }

    /// Goto targets in the order they were commanded
    pub fn goto_targets(&self) -> Vec<GeoPoint> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Goto(target, _) => Some(*target),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> LinkResult<()> {
        if self.closed {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn should_lose_telemetry(&self) -> bool {
        if self.telemetry_loss <= 0.0 {
            return false;
        }

        use rand::Rng;
        let mut rng = rand::thread_rng();
        rng.gen::<f64>() < self.telemetry_loss
    }

    fn step_flight(&mut self) {
        if let Some(target_alt) = self.takeoff_target {
            self.relative_alt_m = (self.relative_alt_m + self.climb_step_m).min(target_alt);
        }

        if let Some(target) = self.goto_target {
            let to_go = inverse_offset(&self.horizontal, &target);
            let distance = to_go.norm();
            if distance <= self.approach_step_m {
                self.horizontal = target;
            } else {
                let step = to_go * (self.approach_step_m / distance);
                let alt = self.horizontal.alt;
                self.horizontal = offset(&self.horizontal, step.x, step.y).with_alt(alt);
            }
        }
    }
}

impl VehicleLink for MockVehicle {
    fn clear_mission(&mut self) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::ClearMission);
        self.mission.clear();
        Ok(())
    }

    fn upload_mission(&mut self, commands: &[MissionCommand]) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::UploadMission(commands.len()));
        if self.reject_upload {
            return Err(LinkError::rejected("mission upload", "MAV_MISSION_ERROR"));
        }
        self.mission = commands.to_vec();
        Ok(())
    }

    fn refresh(&mut self) -> LinkResult<()> {
        self.ensure_open()?;
        if self.should_lose_telemetry() {
            return Ok(());
        }
        self.refreshes = self.refreshes.saturating_add(1);
        if self.armed {
            self.step_flight();
        }
        Ok(())
    }

    fn telemetry(&self) -> Telemetry {
        Telemetry {
            location: Some(self.horizontal.with_alt(self.home.alt + self.relative_alt_m)),
            relative_alt_m: self.relative_alt_m,
            armed: self.armed,
            armable: self.refreshes >= self.armable_after,
            mode: Some(self.mode),
            heartbeat_age: Some(if self.link_dropped {
                DROPPED_HEARTBEAT_AGE
            } else {
                Duration::ZERO
            }),
        }
    }

    fn set_mode(&mut self, mode: VehicleMode) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::SetMode(mode));
        self.mode = mode;
        if mode == VehicleMode::Rtl {
            self.goto_target = Some(self.home);
        }
        Ok(())
    }

    fn arm(&mut self) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::Arm);
        if self.arms_on_request {
            self.armed = true;
        }
        Ok(())
    }

    fn simple_takeoff(&mut self, altitude_m: f64) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::Takeoff(altitude_m));
        if !self.armed || self.mode != VehicleMode::Guided {
            return Err(LinkError::rejected("takeoff", "MAV_RESULT_DENIED"));
        }
        self.takeoff_target = Some(altitude_m);
        Ok(())
    }

    fn simple_goto(&mut self, target: GeoPoint, groundspeed_ms: f64) -> LinkResult<()> {
        self.ensure_open()?;
        self.calls.push(MockCall::Goto(target, groundspeed_ms));
        self.goto_target = Some(target);
        self.gotos += 1;
        if self.drop_link_after_gotos.is_some_and(|limit| self.gotos >= limit) {
            self.link_dropped = true;
        }
        Ok(())
    }

    fn close(&mut self) -> LinkResult<()> {
        self.calls.push(MockCall::Close);
        self.closed = true;
        if self.fail_close {
            return Err(LinkError::Io("socket already gone".to_string()));
        }
        Ok(())
    }
}
