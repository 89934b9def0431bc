//! Quality of Service level conversion.
//!
//! Application code usually carries QoS as a plain integer (configuration
//! files, other protocol layers). Everything inside the crate works with
//! [`rumqttc::QoS`], so integer levels are validated once at the boundary.

use rumqttc::QoS;

use crate::session::error::ArgumentError;

/// Conversion into a validated [`QoS`] level.
///
/// Implemented for [`QoS`] itself (infallible) and for integer levels, which
/// must be 0, 1 or 2.
pub trait IntoQos {
	/// Converts `self` into a [`QoS`], rejecting out-of-range levels.
	fn into_qos(self) -> Result<QoS, ArgumentError>;
}

impl IntoQos for QoS {
	fn into_qos(self) -> Result<QoS, ArgumentError> {
		Ok(self)
	}
}

impl IntoQos for u8 {
	fn into_qos(self) -> Result<QoS, ArgumentError> {
		match self {
			| 0 => Ok(QoS::AtMostOnce),
			| 1 => Ok(QoS::AtLeastOnce),
			| 2 => Ok(QoS::ExactlyOnce),
			| level => Err(ArgumentError::InvalidQos {
				level: i64::from(level),
			}),
		}
	}
}

impl IntoQos for i32 {
	fn into_qos(self) -> Result<QoS, ArgumentError> {
		u8::try_from(self)
			.map_err(|_| ArgumentError::InvalidQos {
				level: i64::from(self),
			})?
			.into_qos()
	}
}
