//! MAVLink vehicle link
//!
//! Talks MAVLink v2 (`common` dialect) to an ArduPilot-style autopilot. The
//! [`Transport`] reader thread decodes frames off the socket and hands them
//! over a channel; all protocol logic and telemetry bookkeeping runs on the
//! caller's thread, inside [`VehicleLink::refresh`] and the blocking request
//! helpers.

use crate::core::GeoPoint;
use crate::hardware::transport::{Frame, Transport};
use crate::hardware::{LinkError, LinkResult, Telemetry, VehicleLink, VehicleMode};
use crate::mission::MissionCommand;
use ::mavlink::common::{
    GpsFixType, MavAutopilot, MavCmd, MavFrame, MavMessage, MavMissionResult, MavModeFlag,
    MavResult, MavState, MavType, PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA,
    MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA, REQUEST_DATA_STREAM_DATA,
    SET_POSITION_TARGET_GLOBAL_INT_DATA,
};
use ::mavlink::MavHeader;
use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const GCS_SYSTEM_ID: u8 = 255;
/// MAV_COMP_ID_MISSIONPLANNER
const GCS_COMPONENT_ID: u8 = 190;
const GCS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// MAV_DATA_STREAM_ALL
const ALL_DATA_STREAMS: u8 = 0;
const DATA_STREAM_RATE_HZ: u16 = 4;
/// DO_CHANGE_SPEED speed type for ground speed
const SPEED_TYPE_GROUND: f32 = 1.0;
/// DO_SET_MODE flag MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
const CUSTOM_MODE_ENABLED: f32 = 1.0;

/// Timeouts for blocking protocol exchanges
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    /// Wait for the first autopilot heartbeat
    pub connect_timeout: Duration,
    /// Wait for a COMMAND_ACK or MISSION_ACK
    pub request_timeout: Duration,
    /// Wait for a whole mission upload handshake
    pub upload_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(3),
            upload_timeout: Duration::from_secs(15),
        }
    }
}

/// System and component the link talks to. System 0 means none chosen yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Target {
    system: u8,
    component: u8,
}

impl Target {
    fn is_known(&self) -> bool {
        self.system != 0
    }
}

/// Raw state accumulated from incoming telemetry
#[derive(Debug, Default)]
struct VehicleState {
    location: Option<GeoPoint>,
    relative_alt_m: f64,
    armed: bool,
    custom_mode: Option<u32>,
    system_status: Option<MavState>,
    gps_fix: u8,
    last_heartbeat: Option<Instant>,
}

impl VehicleState {
    fn armable(&self) -> bool {
        let ready = matches!(
            self.system_status,
            Some(MavState::MAV_STATE_STANDBY) | Some(MavState::MAV_STATE_ACTIVE)
        );
        ready && self.location.is_some() && self.gps_fix >= GpsFixType::GPS_FIX_TYPE_2D_FIX as u8
    }
}

/// Vehicle link over a MAVLink connection string such as
/// `udpin:127.0.0.1:14551` or `tcpout:127.0.0.1:5760`
pub struct MavlinkVehicle {
    address: String,
    transport: Option<Transport>,
    inbox: Receiver<Frame>,
    settings: LinkSettings,
    target: Target,
    sequence: u8,
    state: VehicleState,
    last_gcs_heartbeat: Option<Instant>,
}

impl MavlinkVehicle {
    /// Open the connection and block until the autopilot's first heartbeat
    pub fn connect(address: &str, settings: LinkSettings) -> LinkResult<Self> {
        info!(address, "connecting to vehicle");
        let (transport, inbox) = Transport::open(address)?;

        let mut vehicle = Self {
            address: address.to_string(),
            transport: Some(transport),
            inbox,
            settings,
            target: Target::default(),
            sequence: 0,
            state: VehicleState::default(),
            last_gcs_heartbeat: None,
        };

        vehicle.wait_for_autopilot()?;
        vehicle.request_data_streams()?;
        Ok(vehicle)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Local socket address, while the link is open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(Transport::local_addr)
    }

    fn wait_for_autopilot(&mut self) -> LinkResult<()> {
        let started = Instant::now();
        let deadline = started + self.settings.connect_timeout;
        while !self.target.is_known() {
            if self.next_message(deadline)?.is_none() {
                return Err(LinkError::Timeout {
                    operation: "waiting for heartbeat".to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        info!(
            system = self.target.system,
            component = self.target.component,
            "autopilot found"
        );
        Ok(())
    }

    fn request_data_streams(&mut self) -> LinkResult<()> {
        let msg = MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: DATA_STREAM_RATE_HZ,
            target_system: self.target.system,
            target_component: self.target.component,
            req_stream_id: ALL_DATA_STREAMS,
            start_stop: 1,
        });
        self.send(&msg)
    }

    fn transport(&mut self) -> LinkResult<&mut Transport> {
        self.transport.as_mut().ok_or(LinkError::Closed)
    }

    fn make_header(&mut self) -> MavHeader {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence,
        }
    }

    fn send(&mut self, msg: &MavMessage) -> LinkResult<()> {
        let header = self.make_header();
        self.transport()?.send(header, msg)
    }

    fn send_gcs_heartbeat(&mut self) -> LinkResult<()> {
        let due = self
            .last_gcs_heartbeat
            .map_or(true, |sent| sent.elapsed() >= GCS_HEARTBEAT_INTERVAL);
        if !due {
            return Ok(());
        }

        let msg = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        });
        self.send(&msg)?;
        self.last_gcs_heartbeat = Some(Instant::now());
        Ok(())
    }

    /// Next message from the autopilot, or `None` once `deadline` passes.
    /// Frames from other systems update nothing and are skipped. Keeps our
    /// own heartbeat going while it waits.
    fn next_message(&mut self, deadline: Instant) -> LinkResult<Option<MavMessage>> {
        loop {
            self.send_gcs_heartbeat()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            match self.inbox.recv_timeout((deadline - now).min(GCS_HEARTBEAT_INTERVAL)) {
                Ok((header, msg)) => {
                    if let Some(msg) = self.absorb(header, msg) {
                        return Ok(Some(msg));
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LinkError::Io("reader thread stopped".to_string()))
                }
            }
        }
    }

    /// Fold a message into the vehicle state. Returns it unless it came from
    /// another system.
    fn absorb(&mut self, header: MavHeader, msg: MavMessage) -> Option<MavMessage> {
        if let MavMessage::HEARTBEAT(hb) = &msg {
            if !self.target.is_known() && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID {
                self.target = Target {
                    system: header.system_id,
                    component: header.component_id,
                };
            }
        }
        if !self.target.is_known() || header.system_id != self.target.system {
            return None;
        }

        match &msg {
            MavMessage::HEARTBEAT(hb) if header.component_id == self.target.component => {
                self.state.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.state.custom_mode = Some(hb.custom_mode);
                self.state.system_status = Some(hb.system_status);
                self.state.last_heartbeat = Some(Instant::now());
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.state.location = Some(GeoPoint::new(
                    f64::from(pos.lat) / 1e7,
                    f64::from(pos.lon) / 1e7,
                    f64::from(pos.alt) / 1000.0,
                ));
                self.state.relative_alt_m = f64::from(pos.relative_alt) / 1000.0;
            }
            MavMessage::GPS_RAW_INT(gps) => {
                self.state.gps_fix = gps.fix_type as u8;
            }
            MavMessage::STATUSTEXT(status) => {
                let text: Vec<u8> = status.text.iter().copied().take_while(|&c| c != 0).collect();
                info!(target: "vehicle", "{}", String::from_utf8_lossy(&text));
            }
            _ => {}
        }
        Some(msg)
    }

    /// Send a COMMAND_LONG and wait for its acknowledgement
    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> LinkResult<()> {
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target.system,
            target_component: self.target.component,
            confirmation: 0,
        });
        self.send(&msg)?;

        let operation = format!("{command:?}");
        let started = Instant::now();
        let deadline = started + self.settings.request_timeout;
        loop {
            match self.next_message(deadline)? {
                Some(MavMessage::COMMAND_ACK(ack)) if ack.command == command => {
                    return match ack.result {
                        MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS => {
                            debug!(%operation, "command accepted");
                            Ok(())
                        }
                        other => Err(LinkError::rejected(&operation, other)),
                    };
                }
                Some(_) => continue,
                None => {
                    return Err(LinkError::Timeout {
                        operation,
                        waited: started.elapsed(),
                    })
                }
            }
        }
    }

    /// Wait for a MISSION_ACK, answering item requests from `items` on the way
    fn mission_handshake(
        &mut self,
        operation: &str,
        items: &[MISSION_ITEM_INT_DATA],
        timeout: Duration,
    ) -> LinkResult<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let requested = match self.next_message(deadline)? {
                Some(MavMessage::MISSION_ACK(ack)) => {
                    return match ack.mavtype {
                        MavMissionResult::MAV_MISSION_ACCEPTED => Ok(()),
                        other => Err(LinkError::rejected(operation, other)),
                    };
                }
                Some(MavMessage::MISSION_REQUEST_INT(req)) => req.seq,
                Some(MavMessage::MISSION_REQUEST(req)) => req.seq,
                Some(_) => continue,
                None => {
                    return Err(LinkError::Timeout {
                        operation: operation.to_string(),
                        waited: started.elapsed(),
                    })
                }
            };

            let item = items.get(usize::from(requested)).ok_or_else(|| {
                LinkError::protocol(
                    operation,
                    format!("vehicle requested item {requested} of {}", items.len()),
                )
            })?;
            debug!(seq = requested, "sending mission item");
            self.send(&MavMessage::MISSION_ITEM_INT(item.clone()))?;
        }
    }
}

impl VehicleLink for MavlinkVehicle {
    fn clear_mission(&mut self) -> LinkResult<()> {
        let msg = MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: self.target.system,
            target_component: self.target.component,
        });
        self.send(&msg)?;
        self.mission_handshake("mission clear", &[], self.settings.request_timeout)
    }

    fn upload_mission(&mut self, commands: &[MissionCommand]) -> LinkResult<()> {
        let home = self
            .state
            .location
            .ok_or_else(|| LinkError::protocol("mission upload", "no position reported yet"))?;
        let items = mission_items(self.target, home, commands);
        let count = u16::try_from(items.len())
            .map_err(|_| LinkError::protocol("mission upload", "too many mission items"))?;

        let msg = MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count,
            target_system: self.target.system,
            target_component: self.target.component,
        });
        self.send(&msg)?;
        self.mission_handshake("mission upload", &items, self.settings.upload_timeout)?;
        info!(items = count, "mission uploaded");
        Ok(())
    }

    fn refresh(&mut self) -> LinkResult<()> {
        self.send_gcs_heartbeat()?;
        loop {
            match self.inbox.try_recv() {
                Ok((header, msg)) => {
                    self.absorb(header, msg);
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(LinkError::Io("reader thread stopped".to_string()))
                }
            }
        }
    }

    fn telemetry(&self) -> Telemetry {
        Telemetry {
            location: self.state.location,
            relative_alt_m: self.state.relative_alt_m,
            armed: self.state.armed,
            armable: self.state.armable(),
            mode: self.state.custom_mode.map(VehicleMode::from_custom_mode),
            heartbeat_age: self.state.last_heartbeat.map(|at| at.elapsed()),
        }
    }

    fn set_mode(&mut self, mode: VehicleMode) -> LinkResult<()> {
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [CUSTOM_MODE_ENABLED, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn arm(&mut self) -> LinkResult<()> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn simple_takeoff(&mut self, altitude_m: f64) -> LinkResult<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, 0.0, 0.0, altitude_m as f32],
        )
    }

    fn simple_goto(&mut self, target: GeoPoint, groundspeed_ms: f64) -> LinkResult<()> {
        self.command_long(
            MavCmd::MAV_CMD_DO_CHANGE_SPEED,
            [SPEED_TYPE_GROUND, groundspeed_ms as f32, -1.0, 0.0, 0.0, 0.0, 0.0],
        )?;

        let position_only = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE;

        let msg = MavMessage::SET_POSITION_TARGET_GLOBAL_INT(SET_POSITION_TARGET_GLOBAL_INT_DATA {
            time_boot_ms: 0,
            lat_int: degrees_to_e7(target.lat),
            lon_int: degrees_to_e7(target.lon),
            alt: target.alt as f32,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            type_mask: position_only,
            target_system: self.target.system,
            target_component: self.target.component,
            coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        });
        self.send(&msg)
    }

    fn close(&mut self) -> LinkResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
            info!(address = %self.address, "vehicle link closed");
        }
        Ok(())
    }
}

fn mission_item(target: Target, seq: u16, frame: MavFrame, command: MavCmd, point: GeoPoint) -> MISSION_ITEM_INT_DATA {
    MISSION_ITEM_INT_DATA {
        param1: 0.0,
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        x: degrees_to_e7(point.lat),
        y: degrees_to_e7(point.lon),
        z: point.alt as f32,
        seq,
        command,
        target_system: target.system,
        target_component: target.component,
        frame,
        current: 0,
        autocontinue: 1,
    }
}

/// Item 0 is the home slot ArduPilot reserves; commands follow from 1
fn mission_items(target: Target, home: GeoPoint, commands: &[MissionCommand]) -> Vec<MISSION_ITEM_INT_DATA> {
    let relative = MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT;
    let mut items = Vec::with_capacity(commands.len() + 1);
    items.push(mission_item(target, 0, MavFrame::MAV_FRAME_GLOBAL_INT, MavCmd::MAV_CMD_NAV_WAYPOINT, home));

    for (seq, command) in (1u16..).zip(commands) {
        let item = match command {
            MissionCommand::Takeoff { altitude } => mission_item(
                target,
                seq,
                relative,
                MavCmd::MAV_CMD_NAV_TAKEOFF,
                GeoPoint::new(0.0, 0.0, *altitude),
            ),
            MissionCommand::Waypoint { point, .. } => {
                mission_item(target, seq, relative, MavCmd::MAV_CMD_NAV_WAYPOINT, *point)
            }
            MissionCommand::ReturnToLaunch { point } => {
                mission_item(target, seq, relative, MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, *point)
            }
        };
        items.push(item);
    }
    items
}

fn degrees_to_e7(degrees: f64) -> i32 {
    (degrees * 1e7).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Hexagon;
    use crate::mission::build_patrol_mission;
    use ::mavlink::common::{
        COMMAND_ACK_DATA, GLOBAL_POSITION_INT_DATA, MISSION_ACK_DATA, MISSION_REQUEST_INT_DATA,
    };
    use ::mavlink::peek_reader::PeekReader;
    use std::net::UdpSocket;
    use std::thread::{self, JoinHandle};

    const AUTOPILOT_SYSTEM: u8 = 1;
    const OTHER_GCS_SYSTEM: u8 = 254;

    fn home() -> GeoPoint {
        GeoPoint::new(-35.363261, 149.165230, 584.0)
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
            upload_timeout: Duration::from_secs(5),
        }
    }

    fn heartbeat(mavtype: MavType, autopilot: MavAutopilot) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype,
            autopilot,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    fn autopilot_heartbeat() -> MavMessage {
        heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA)
    }

    fn other_gcs_heartbeat() -> MavMessage {
        heartbeat(MavType::MAV_TYPE_GCS, MavAutopilot::MAV_AUTOPILOT_INVALID)
    }

    fn position(point: GeoPoint) -> MavMessage {
        MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 0,
            lat: degrees_to_e7(point.lat),
            lon: degrees_to_e7(point.lon),
            alt: (point.alt * 1000.0) as i32,
            relative_alt: 0,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 0,
        })
    }

    fn command_ack(command: MavCmd, result: MavResult) -> MavMessage {
        MavMessage::COMMAND_ACK(COMMAND_ACK_DATA { command, result })
    }

    fn mission_ack(result: MavMissionResult) -> MavMessage {
        MavMessage::MISSION_ACK(MISSION_ACK_DATA {
            target_system: GCS_SYSTEM_ID,
            target_component: GCS_COMPONENT_ID,
            mavtype: result,
        })
    }

    fn mission_request(seq: u16) -> MavMessage {
        MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq,
            target_system: GCS_SYSTEM_ID,
            target_component: GCS_COMPONENT_ID,
        })
    }

    /// Scripted autopilot on a loopback UDP socket
    struct FakeAutopilot {
        socket: UdpSocket,
        gcs: Option<SocketAddr>,
        sequence: u8,
    }

    impl FakeAutopilot {
        fn bind() -> Self {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
            Self {
                socket,
                gcs: None,
                sequence: 0,
            }
        }

        fn address(&self) -> String {
            format!("udpout:{}", self.socket.local_addr().unwrap())
        }

        fn send_from(&mut self, system_id: u8, msg: &MavMessage) {
            let header = MavHeader {
                system_id,
                component_id: 1,
                sequence: self.sequence,
            };
            self.sequence = self.sequence.wrapping_add(1);
            let mut frame = Vec::new();
            ::mavlink::write_v2_msg(&mut frame, header, msg).unwrap();
            if let Some(gcs) = self.gcs {
                let _ = self.socket.send_to(&frame, gcs);
            }
        }

        fn send(&mut self, msg: &MavMessage) {
            self.send_from(AUTOPILOT_SYSTEM, msg);
        }

        /// One read attempt; learns the ground station address
        fn poll(&mut self) -> Option<MavMessage> {
            let mut buf = [0u8; 1500];
            let (len, from) = self.socket.recv_from(&mut buf).ok()?;
            self.gcs = Some(from);
            let mut reader = PeekReader::new(&buf[..len]);
            ::mavlink::read_v2_msg::<MavMessage, _>(&mut reader).ok().map(|(_, msg)| msg)
        }

        fn recv_matching(&mut self, wanted: impl Fn(&MavMessage) -> bool) -> MavMessage {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Some(msg) = self.poll().filter(|msg| wanted(msg)) {
                    return msg;
                }
            }
            panic!("ground station never sent the expected message");
        }

        /// Answer the ground station's first frame with noise from other
        /// systems and a position, then the heartbeat that identifies us
        fn introduce(&mut self) {
            self.recv_matching(|_| true);
            self.send(&position(home()));
            self.send_from(OTHER_GCS_SYSTEM, &other_gcs_heartbeat());
            thread::sleep(Duration::from_millis(50));
            self.send(&autopilot_heartbeat());
            self.send(&position(home()));
        }
    }

    fn connect_with<T, F>(script: F) -> (MavlinkVehicle, JoinHandle<T>)
    where
        T: Send + 'static,
        F: FnOnce(&mut FakeAutopilot) -> T + Send + 'static,
    {
        let mut autopilot = FakeAutopilot::bind();
        let address = autopilot.address();
        let handle = thread::spawn(move || {
            autopilot.introduce();
            script(&mut autopilot)
        });
        let vehicle = MavlinkVehicle::connect(&address, settings()).unwrap();
        (vehicle, handle)
    }

    fn wait_for_location(vehicle: &mut MavlinkVehicle) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while vehicle.telemetry().location.is_none() && Instant::now() < deadline {
            vehicle.refresh().unwrap();
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn mission_count(msg: MavMessage) -> u16 {
        match msg {
            MavMessage::MISSION_COUNT(count) => count.count,
            other => panic!("expected MISSION_COUNT, got {other:?}"),
        }
    }

    fn is_mission_count(msg: &MavMessage) -> bool {
        matches!(msg, MavMessage::MISSION_COUNT(_))
    }

    #[test]
    fn test_degrees_to_e7() {
        assert_eq!(degrees_to_e7(47.3977421), 473_977_421);
        assert_eq!(degrees_to_e7(-122.0), -1_220_000_000);
        assert_eq!(degrees_to_e7(0.0), 0);
    }

    #[test]
    fn test_armable_needs_fix_status_and_position() {
        let mut state = VehicleState::default();
        assert!(!state.armable());

        state.system_status = Some(MavState::MAV_STATE_STANDBY);
        state.gps_fix = GpsFixType::GPS_FIX_TYPE_3D_FIX as u8;
        assert!(!state.armable());

        state.location = Some(GeoPoint::new(-35.36, 149.16, 584.0));
        assert!(state.armable());

        state.system_status = Some(MavState::MAV_STATE_CALIBRATING);
        assert!(!state.armable());
    }

    #[test]
    fn test_connect_to_bad_address_fails() {
        let result = MavlinkVehicle::connect("bogus:nowhere", LinkSettings::default());
        assert!(matches!(result, Err(LinkError::ConnectionFailed { .. })));
    }

    #[test]
    fn test_mission_items_reserve_home_slot() {
        let hexagon = Hexagon::new(home(), 38.0).unwrap();
        let commands = build_patrol_mission(&hexagon, 10.0);
        let target = Target {
            system: 1,
            component: 1,
        };

        let items = mission_items(target, home(), &commands);
        assert_eq!(items.len(), 8);

        assert_eq!(items[0].command, MavCmd::MAV_CMD_NAV_WAYPOINT);
        assert_eq!(items[0].frame, MavFrame::MAV_FRAME_GLOBAL_INT);
        assert_eq!(items[0].x, degrees_to_e7(home().lat));
        assert_eq!(items[0].y, degrees_to_e7(home().lon));

        assert_eq!(items[1].command, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(items[1].z, 10.0);

        for (index, item) in items.iter().enumerate() {
            assert_eq!(usize::from(item.seq), index);
            assert_eq!(item.target_system, 1);
        }
        for (vertex, item) in hexagon.vertices().iter().zip(&items[2..]) {
            assert_eq!(item.command, MavCmd::MAV_CMD_NAV_WAYPOINT);
            assert_eq!(item.frame, MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT);
            assert_eq!(item.x, degrees_to_e7(vertex.lat));
            assert_eq!(item.y, degrees_to_e7(vertex.lon));
        }
    }

    #[test]
    fn test_connect_skips_frames_before_autopilot_heartbeat() {
        let (mut vehicle, autopilot) = connect_with(|_| ());
        autopilot.join().unwrap();

        assert_eq!(
            vehicle.target,
            Target {
                system: AUTOPILOT_SYSTEM,
                component: 1
            }
        );
        wait_for_location(&mut vehicle);
        assert!(vehicle.telemetry().location.is_some());
    }

    #[test]
    fn test_command_ack_after_foreign_traffic() {
        let (mut vehicle, autopilot) = connect_with(|ap| {
            ap.recv_matching(|m| {
                matches!(m, MavMessage::COMMAND_LONG(c) if c.command == MavCmd::MAV_CMD_COMPONENT_ARM_DISARM)
            });
            ap.send_from(OTHER_GCS_SYSTEM, &other_gcs_heartbeat());
            thread::sleep(Duration::from_millis(50));
            ap.send(&command_ack(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                MavResult::MAV_RESULT_ACCEPTED,
            ));
        });

        vehicle.arm().unwrap();
        autopilot.join().unwrap();
    }

    #[test]
    fn test_command_rejected() {
        let (mut vehicle, autopilot) = connect_with(|ap| {
            ap.recv_matching(|m| matches!(m, MavMessage::COMMAND_LONG(_)));
            ap.send(&command_ack(MavCmd::MAV_CMD_DO_SET_MODE, MavResult::MAV_RESULT_DENIED));
        });

        let result = vehicle.set_mode(VehicleMode::Guided);
        autopilot.join().unwrap();
        assert!(matches!(result, Err(LinkError::Rejected { .. })));
    }

    #[test]
    fn test_mission_upload_handshake() {
        let (mut vehicle, autopilot) = connect_with(|ap| {
            let count = mission_count(ap.recv_matching(is_mission_count));
            let mut items = Vec::new();
            for seq in 0..count {
                ap.send(&mission_request(seq));
                match ap.recv_matching(|m| matches!(m, MavMessage::MISSION_ITEM_INT(_))) {
                    MavMessage::MISSION_ITEM_INT(item) => items.push(item),
                    other => panic!("expected MISSION_ITEM_INT, got {other:?}"),
                }
            }
            ap.send_from(OTHER_GCS_SYSTEM, &other_gcs_heartbeat());
            ap.send(&mission_ack(MavMissionResult::MAV_MISSION_ACCEPTED));
            items
        });
        wait_for_location(&mut vehicle);

        let hexagon = Hexagon::new(home(), 38.0).unwrap();
        vehicle
            .upload_mission(&build_patrol_mission(&hexagon, 10.0))
            .unwrap();

        let items = autopilot.join().unwrap();
        assert_eq!(items.len(), 8);
        assert_eq!(items[0].seq, 0);
        assert_eq!(items[0].x, degrees_to_e7(home().lat));
        assert_eq!(items[1].command, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(items[7].seq, 7);
    }

    #[test]
    fn test_mission_upload_out_of_range_request() {
        let (mut vehicle, autopilot) = connect_with(|ap| {
            ap.recv_matching(is_mission_count);
            ap.send(&mission_request(20));
        });
        wait_for_location(&mut vehicle);

        let hexagon = Hexagon::new(home(), 38.0).unwrap();
        let result = vehicle.upload_mission(&build_patrol_mission(&hexagon, 10.0));
        autopilot.join().unwrap();
        assert!(matches!(result, Err(LinkError::Protocol { .. })));
    }

    #[test]
    fn test_mission_upload_nack() {
        let (mut vehicle, autopilot) = connect_with(|ap| {
            ap.recv_matching(is_mission_count);
            ap.send(&mission_ack(MavMissionResult::MAV_MISSION_ERROR));
        });
        wait_for_location(&mut vehicle);

        let hexagon = Hexagon::new(home(), 38.0).unwrap();
        let result = vehicle.upload_mission(&build_patrol_mission(&hexagon, 10.0));
        autopilot.join().unwrap();
        assert!(matches!(result, Err(LinkError::Rejected { .. })));
    }

    #[test]
    fn test_close_releases_listening_port() {
        let listen = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut autopilot = FakeAutopilot::bind();
        autopilot.gcs = Some(listen);
        let announcer = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                autopilot.send(&autopilot_heartbeat());
                if autopilot.poll().is_some() {
                    return;
                }
            }
        });

        let mut vehicle = MavlinkVehicle::connect(&format!("udpin:{listen}"), settings()).unwrap();
        announcer.join().unwrap();
        assert_eq!(vehicle.local_addr(), Some(listen));

        vehicle.close().unwrap();
        assert!(matches!(vehicle.arm(), Err(LinkError::Closed)));
        drop(vehicle);
        assert!(UdpSocket::bind(listen).is_ok());
    }
}
