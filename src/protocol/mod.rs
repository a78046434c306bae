//! Wire protocol between the tracker and the VR driver.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, MAX_DATAGRAM_LEN, decode_driver, decode_taurus, encode_driver, encode_taurus};
pub use messages::{
    ControllerStatus, DriverMessage, DriverPayload, HapticEvent, InputComponent, InputEvent, Pose, TaurusMessage,
    TaurusPayload, TrackerInfo,
};
