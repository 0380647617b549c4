//! The composite `status` variable.
//!
//! Wire format: `power:%d,ups:%d,pressure:%.2f,pthresh:%d,armed:%d`.
//! Before the first tick the variable reads `setup`.

use std::fmt;
use std::str::FromStr;

pub const SETUP_STATUS: &str = "setup";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("monitor has not completed a cycle yet")]
    NotReady,
    #[error("malformed field '{0}'")]
    MalformedField(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("bad value '{value}' for field '{field}'")]
    BadValue { field: String, value: String },
    #[error("missing field '{0}'")]
    MissingField(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Status {
    pub power: bool,
    pub ups: bool,
    pub pressure: f64,
    /// Threshold truncated to whole mbar.
    pub pthresh: i32,
    pub armed: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "power:{},ups:{},pressure:{:.2},pthresh:{},armed:{}",
            u8::from(self.power),
            u8::from(self.ups),
            self.pressure,
            self.pthresh,
            u8::from(self.armed)
        )
    }
}

fn bad(field: &str, value: &str) -> StatusParseError {
    StatusParseError::BadValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, StatusParseError> {
    match value.parse::<i64>() {
        Ok(v) => Ok(v != 0),
        Err(_) => Err(bad(field, value)),
    }
}

impl FromStr for Status {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == SETUP_STATUS {
            return Err(StatusParseError::NotReady);
        }

        let (mut power, mut ups, mut pressure, mut pthresh, mut armed) =
            (None, None, None, None, None);

        for pair in s.split(',') {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| StatusParseError::MalformedField(pair.to_string()))?;
            match key {
                "power" => power = Some(parse_flag(key, value)?),
                "ups" => ups = Some(parse_flag(key, value)?),
                "armed" => armed = Some(parse_flag(key, value)?),
                "pressure" => {
                    pressure = Some(value.parse::<f64>().map_err(|_| bad(key, value))?);
                }
                "pthresh" => {
                    pthresh = Some(value.parse::<i32>().map_err(|_| bad(key, value))?);
                }
                other => return Err(StatusParseError::UnknownField(other.to_string())),
            }
        }

        Ok(Status {
            power: power.ok_or(StatusParseError::MissingField("power"))?,
            ups: ups.ok_or(StatusParseError::MissingField("ups"))?,
            pressure: pressure.ok_or(StatusParseError::MissingField("pressure"))?,
            pthresh: pthresh.ok_or(StatusParseError::MissingField("pthresh"))?,
            armed: armed.ok_or(StatusParseError::MissingField("armed"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_wire_format() {
        let s = Status {
            power: true,
            ups: false,
            pressure: 1999.996,
            pthresh: 2500,
            armed: true,
        };
        assert_eq!(s.to_string(), "power:1,ups:0,pressure:2000.00,pthresh:2500,armed:1");
    }

    #[test]
    fn parses_client_view() {
        let s: Status = "power:0,ups:1,pressure:-631.40,pthresh:1800,armed:0"
            .parse()
            .expect("valid status");
        assert!(!s.power);
        assert!(s.ups);
        assert_eq!(s.pressure, -631.4);
        assert_eq!(s.pthresh, 1800);
        assert!(!s.armed);
    }

    #[test]
    fn rejects_setup_and_garbage() {
        assert_eq!("setup".parse::<Status>(), Err(StatusParseError::NotReady));
        assert_eq!(
            "power:1,ups".parse::<Status>(),
            Err(StatusParseError::MalformedField("ups".into()))
        );
        assert_eq!(
            "power:1,ups:1,pressure:1.0,pthresh:2500".parse::<Status>(),
            Err(StatusParseError::MissingField("armed"))
        );
        assert!(matches!(
            "power:x,ups:1,pressure:1.0,pthresh:2500,armed:1".parse::<Status>(),
            Err(StatusParseError::BadValue { .. })
        ));
        assert_eq!(
            "volts:3".parse::<Status>(),
            Err(StatusParseError::UnknownField("volts".into()))
        );
    }
}
