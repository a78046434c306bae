//! Binary encoding of driver messages.
//!
//! Every datagram is `version(1) | kind(1) | serial_len(2) | serial | body`,
//! big-endian throughout. Quaternions travel as `x, y, z, w`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

use super::messages::{
    ControllerStatus, DriverMessage, DriverPayload, HapticEvent, InputComponent, InputEvent, Pose, TaurusMessage,
    TaurusPayload, TrackerInfo,
};

pub const PROTOCOL_VERSION: u8 = 1;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM_LEN: usize = 1024;

const HEADER_LEN: usize = 4;
const POSE_LEN: usize = 7 * 4;

const KIND_POSE: u8 = 0x01;
const KIND_INPUT: u8 = 0x02;
const KIND_STATUS: u8 = 0x03;
const KIND_TRACKERS_ANSWER: u8 = 0x04;
const KIND_HAPTIC: u8 = 0x10;
const KIND_TRACKERS_REQUEST: u8 = 0x11;

const STATUS_CHARGING: u8 = 1 << 0;
const STATUS_CONNECTED: u8 = 1 << 1;
const STATUS_TRACKING: u8 = 1 << 2;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error("protocol version mismatch: expected {expected}, got {0}", expected = PROTOCOL_VERSION)]
    VersionMismatch(u8),

    #[error("unknown message kind 0x{0:02X}")]
    UnknownKind(u8),

    #[error("unknown input component {0}")]
    UnknownComponent(u8),

    #[error("serial is not valid utf-8")]
    InvalidSerial,

    #[error("encoded message is {0} bytes, limit is {limit}", limit = MAX_DATAGRAM_LEN)]
    Oversize(usize),

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(CodecError::BufferTooShort {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn put_header(buf: &mut BytesMut, kind: u8, serial: &str) {
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(kind);
    buf.put_u16(serial.len() as u16);
    buf.extend_from_slice(serial.as_bytes());
}

fn get_header(buf: &mut &[u8]) -> Result<(u8, String)> {
    ensure(buf, HEADER_LEN)?;
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch(version));
    }
    let kind = buf.get_u8();
    let serial_len = buf.get_u16() as usize;
    ensure(buf, serial_len)?;
    let serial = std::str::from_utf8(&buf[..serial_len])
        .map_err(|_| CodecError::InvalidSerial)?
        .to_string();
    buf.advance(serial_len);
    Ok((kind, serial))
}

fn put_pose(buf: &mut BytesMut, pose: &Pose) {
    buf.put_f32(pose.position.x);
    buf.put_f32(pose.position.y);
    buf.put_f32(pose.position.z);
    let q = pose.orientation.quaternion();
    buf.put_f32(q.i);
    buf.put_f32(q.j);
    buf.put_f32(q.k);
    buf.put_f32(q.w);
}

fn get_pose(buf: &mut &[u8]) -> Result<Pose> {
    ensure(buf, POSE_LEN)?;
    let position = Vector3::new(buf.get_f32(), buf.get_f32(), buf.get_f32());
    let (x, y, z, w) = (buf.get_f32(), buf.get_f32(), buf.get_f32(), buf.get_f32());
    Ok(Pose::new(position, UnitQuaternion::new_unchecked(Quaternion::new(w, x, y, z))))
}

fn finish(buf: BytesMut) -> Result<Bytes> {
    if buf.len() > MAX_DATAGRAM_LEN {
        return Err(CodecError::Oversize(buf.len()));
    }
    Ok(buf.freeze())
}

fn expect_end(buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes(buf.len()))
    }
}

/// Encode a tracker-to-driver message.
pub fn encode_taurus(msg: &TaurusMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    match &msg.payload {
        TaurusPayload::Pose(pose) => {
            put_header(&mut buf, KIND_POSE, &msg.serial);
            put_pose(&mut buf, pose);
        }
        TaurusPayload::Input(events) => {
            put_header(&mut buf, KIND_INPUT, &msg.serial);
            buf.put_u8(events.len() as u8);
            for event in events {
                buf.put_u8(event.component as u8);
                buf.put_f32(event.value);
            }
        }
        TaurusPayload::Status(status) => {
            put_header(&mut buf, KIND_STATUS, &msg.serial);
            buf.put_u8(status.battery_percent);
            let mut flags = 0;
            if status.is_charging {
                flags |= STATUS_CHARGING;
            }
            if status.is_connected {
                flags |= STATUS_CONNECTED;
            }
            if status.is_tracking {
                flags |= STATUS_TRACKING;
            }
            buf.put_u8(flags);
        }
        TaurusPayload::TrackersAnswer(trackers) => {
            put_header(&mut buf, KIND_TRACKERS_ANSWER, &msg.serial);
            buf.put_u8(trackers.len() as u8);
            for tracker in trackers {
                buf.put_u32(tracker.id);
                put_pose(&mut buf, &tracker.pose);
            }
        }
    }
    finish(buf)
}

pub fn decode_taurus(data: &[u8]) -> Result<TaurusMessage> {
    let mut buf = data;
    let (kind, serial) = get_header(&mut buf)?;

    let payload = match kind {
        KIND_POSE => TaurusPayload::Pose(get_pose(&mut buf)?),
        KIND_INPUT => {
            ensure(buf, 1)?;
            let count = buf.get_u8() as usize;
            ensure(buf, count * 5)?;
            let events = (0..count)
                .map(|_| {
                    let code = buf.get_u8();
                    let value = buf.get_f32();
                    InputComponent::from_u8(code)
                        .map(|component| InputEvent { component, value })
                        .ok_or(CodecError::UnknownComponent(code))
                })
                .collect::<Result<Vec<_>>>()?;
            TaurusPayload::Input(events)
        }
        KIND_STATUS => {
            ensure(buf, 2)?;
            let battery_percent = buf.get_u8();
            let flags = buf.get_u8();
            TaurusPayload::Status(ControllerStatus {
                battery_percent,
                is_charging: flags & STATUS_CHARGING != 0,
                is_connected: flags & STATUS_CONNECTED != 0,
                is_tracking: flags & STATUS_TRACKING != 0,
            })
        }
        KIND_TRACKERS_ANSWER => {
            ensure(buf, 1)?;
            let count = buf.get_u8() as usize;
            ensure(buf, count * (4 + POSE_LEN))?;
            let mut trackers = Vec::with_capacity(count);
            for _ in 0..count {
                let id = buf.get_u32();
                trackers.push(TrackerInfo {
                    id,
                    pose: get_pose(&mut buf)?,
                });
            }
            TaurusPayload::TrackersAnswer(trackers)
        }
        other => return Err(CodecError::UnknownKind(other)),
    };
    expect_end(buf)?;
    Ok(TaurusMessage { serial, payload })
}

/// Encode a driver-to-tracker message.
pub fn encode_driver(msg: &DriverMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(32);
    match &msg.payload {
        DriverPayload::Haptic(event) => {
            put_header(&mut buf, KIND_HAPTIC, &msg.serial);
            buf.put_f32(event.duration);
            buf.put_f32(event.frequency);
            buf.put_f32(event.amplitude);
        }
        DriverPayload::TrackersRequest => put_header(&mut buf, KIND_TRACKERS_REQUEST, &msg.serial),
    }
    finish(buf)
}

pub fn decode_driver(data: &[u8]) -> Result<DriverMessage> {
    let mut buf = data;
    let (kind, serial) = get_header(&mut buf)?;

    let payload = match kind {
        KIND_HAPTIC => {
            ensure(buf, 12)?;
            DriverPayload::Haptic(HapticEvent {
                duration: buf.get_f32(),
                frequency: buf.get_f32(),
                amplitude: buf.get_f32(),
            })
        }
        KIND_TRACKERS_REQUEST => DriverPayload::TrackersRequest,
        other => return Err(CodecError::UnknownKind(other)),
    };
    expect_end(buf)?;
    Ok(DriverMessage { serial, payload })
}
