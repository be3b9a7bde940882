//! Assistance position downlinks.
//!
//! A device with a GNSS receiver converges much faster when it knows roughly
//! where it is. Whenever a fresh estimate (solved or gateway-reported) drifts
//! far enough from what the device was last told, it gets a new one, at most
//! once per assistance interval.

use crate::model::document::{DeviceDocument, GnssState};
use crate::model::lorawan::REACTION_PORT;
use crate::model::position::Position;
use crate::transport::Downlink;
use chrono::{DateTime, Duration, Utc};

/// Frame tag of an assisted position downlink
pub const ASSISTANCE_POSITION_TAG: u8 = 0x01;

/// Drift in degrees (either axis) that warrants a new assistance position
pub const ASSISTANCE_TOLERANCE_DEG: f64 = 0.1;

/// Scale a coordinate onto 16 bits, `range` mapping to 2048.
///
/// Rounds half up like the device firmware does, so negative halves round
/// towards zero.
fn scale_coordinate(value: f64, range: f64) -> u16 {
    ((2048.0 * value / range + 0.5).floor() as i64 & 0xffff) as u16
}

/// `01 | lat16 (BE) | lon16 (BE)`
pub fn encode_assistance_position(position: Position) -> Vec<u8> {
    let lat16 = scale_coordinate(position.latitude, 90.0);
    let lon16 = scale_coordinate(position.longitude, 180.0);

    let mut frame = Vec::with_capacity(5);
    frame.push(ASSISTANCE_POSITION_TAG);
    frame.extend_from_slice(&lat16.to_be_bytes());
    frame.extend_from_slice(&lon16.to_be_bytes());
    frame
}

fn drifted(recorded: Option<f64>, candidate: f64) -> bool {
    match recorded {
        Some(recorded) => (candidate - recorded).abs() > ASSISTANCE_TOLERANCE_DEG,
        None => true,
    }
}

/// A downlink that passed the assistance gate, with the state change that
/// goes with it
#[derive(Debug, Clone, PartialEq)]
pub struct AssistancePlan {
    pub downlink: Downlink,
    pub update: DeviceDocument,
}

/// Decide whether `candidate` should be pushed to the device.
///
/// Returns `None` (no send, no state change) unless there is a candidate, the
/// device has a `gnss` section, the last attempt is at least `interval` old,
/// and the candidate differs from the recorded assistance position by more
/// than the tolerance.
pub fn plan_assistance(
    gnss: Option<&GnssState>,
    candidate: Option<Position>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Option<AssistancePlan> {
    let gnss = gnss?;
    let candidate = candidate?;

    if let Some(last_attempt) = gnss.last_assistance_update_attempt {
        if now - last_attempt < interval {
            return None;
        }
    }

    let update_required = drifted(gnss.assistance_latitude, candidate.latitude)
        || drifted(gnss.assistance_longitude, candidate.longitude);
    if !update_required {
        return None;
    }

    Some(AssistancePlan {
        downlink: Downlink::unconfirmed(REACTION_PORT, encode_assistance_position(candidate)),
        update: DeviceDocument::gnss_update(GnssState {
            last_assistance_update_attempt: Some(now),
            ..Default::default()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hex;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn interval() -> Duration {
        Duration::seconds(300)
    }

    #[test]
    fn test_encode_stockholm() {
        // round(2048*59.33/90) = 1350 = 0x0546, round(2048*18.07/180) = 206 = 0x00ce
        let frame = encode_assistance_position(Position::new(59.33, 18.07));
        assert_eq!(hex::encode(&frame), "01054600ce");
    }

    #[test]
    fn test_encode_southern_and_western_hemispheres() {
        // round(2048*-33.86/90) = -771 -> 0xfcfd, round(2048*151.21/180) = 1720 = 0x06b8
        let frame = encode_assistance_position(Position::new(-33.86, 151.21));
        assert_eq!(hex::encode(&frame), "01fcfd06b8");

        // round(2048*-73.98/180) = -842 -> 0xfcb6
        let frame = encode_assistance_position(Position::new(0.0, -73.98));
        assert_eq!(frame.len(), 5);
        assert_eq!(hex::encode(&frame[1..3]), "0000");
        assert_eq!(hex::encode(&frame[3..]), "fcb6");
    }

    #[test]
    fn test_half_rounds_up() {
        // 2048*x/90 == -0.5 exactly rounds to 0, +0.5 rounds to 1
        assert_eq!(scale_coordinate(-0.5 * 90.0 / 2048.0, 90.0), 0);
        assert_eq!(scale_coordinate(0.5 * 90.0 / 2048.0, 90.0), 1);
    }

    #[test]
    fn test_requires_gnss_section_and_candidate() {
        let gnss = GnssState::default();
        assert!(plan_assistance(None, Some(Position::new(1.0, 1.0)), now(), interval()).is_none());
        assert!(plan_assistance(Some(&gnss), None, now(), interval()).is_none());
    }

    #[test]
    fn test_first_assistance_is_sent() {
        let gnss = GnssState::default();
        let plan = plan_assistance(Some(&gnss), Some(Position::new(59.33, 18.07)), now(), interval())
            .unwrap();

        assert_eq!(plan.downlink.port, REACTION_PORT);
        assert!(!plan.downlink.confirmed);
        assert_eq!(plan.downlink.hex_payload(), "01054600ce");
        assert_eq!(
            plan.update.gnss.unwrap().last_assistance_update_attempt,
            Some(now())
        );
    }

    #[test]
    fn test_second_call_within_interval_is_suppressed() {
        let base = DeviceDocument::gnss_update(GnssState::default());
        let candidate = Some(Position::new(59.33, 18.07));

        let first = plan_assistance(base.gnss.as_ref(), candidate, now(), interval()).unwrap();
        let next = base.merge(&first.update).unwrap();

        let later = now() + Duration::seconds(60);
        assert!(plan_assistance(next.gnss.as_ref(), candidate, later, interval()).is_none());

        let much_later = now() + Duration::seconds(301);
        assert!(plan_assistance(next.gnss.as_ref(), candidate, much_later, interval()).is_some());
    }

    #[test]
    fn test_within_tolerance_is_not_sent() {
        let gnss = GnssState {
            assistance_latitude: Some(59.30),
            assistance_longitude: Some(18.00),
            ..Default::default()
        };

        assert!(plan_assistance(Some(&gnss), Some(Position::new(59.35, 18.05)), now(), interval())
            .is_none());
        assert!(plan_assistance(Some(&gnss), Some(Position::new(59.30, 18.2)), now(), interval())
            .is_some());
    }

    #[test]
    fn test_missing_longitude_forces_update() {
        let gnss = GnssState {
            assistance_latitude: Some(59.33),
            ..Default::default()
        };
        assert!(plan_assistance(Some(&gnss), Some(Position::new(59.33, 18.07)), now(), interval())
            .is_some());
    }
}
