//! STOMP heart-beat advertisement parsing and negotiation.

use crate::error::{Result, SouqLinkError};
use std::time::Duration;

/// One party's `heart-beat` advertisement from a CONNECT/CONNECTED frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    /// Smallest interval (ms) at which this party can emit heart-beats;
    /// 0 means it cannot send them.
    pub send_ms: u64,
    /// Interval (ms) at which this party wants to receive heart-beats;
    /// 0 means it does not need them.
    pub expect_ms: u64,
}

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        send_ms: 0,
        expect_ms: 0,
    };

    pub fn new(send_ms: u64, expect_ms: u64) -> Self {
        Self { send_ms, expect_ms }
    }

    /// Value of the `heart-beat` header: `<cx>,<cy>`.
    pub fn header_value(&self) -> String {
        format!("{},{}", self.send_ms, self.expect_ms)
    }

    /// Parse a `heart-beat` header value.
    pub fn parse(value: &str) -> Result<HeartBeat> {
        let (send, expect) = value.trim().split_once(',').ok_or_else(|| {
            SouqLinkError::ParseError(format!("Malformed heart-beat header '{}'", value))
        })?;
        let send_ms = send.trim().parse::<u64>().map_err(|_| {
            SouqLinkError::ParseError(format!("Malformed heart-beat header '{}'", value))
        })?;
        let expect_ms = expect.trim().parse::<u64>().map_err(|_| {
            SouqLinkError::ParseError(format!("Malformed heart-beat header '{}'", value))
        })?;
        Ok(HeartBeat::new(send_ms, expect_ms))
    }

    /// Effective schedule once both sides have advertised.
    ///
    /// A direction is active only when the emitter can send and the peer
    /// wants to receive; the interval is the slower of the two figures.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> HeartbeatSchedule {
        let outgoing = if client.send_ms == 0 || server.expect_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(client.send_ms.max(server.expect_ms)))
        };
        let incoming = if client.expect_ms == 0 || server.send_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(client.expect_ms.max(server.send_ms)))
        };
        HeartbeatSchedule { outgoing, incoming }
    }
}

/// Negotiated heart-beat intervals for an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatSchedule {
    /// How often this client must emit a heart-beat; `None` disables.
    pub outgoing: Option<Duration>,
    /// How often the broker has promised to produce traffic; `None`
    /// disables liveness monitoring.
    pub incoming: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value() {
        assert_eq!(HeartBeat::new(10000, 5000).header_value(), "10000,5000");
        assert_eq!(HeartBeat::DISABLED.header_value(), "0,0");
    }

    #[test]
    fn test_parse() {
        assert_eq!(HeartBeat::parse("10000,10000").unwrap(), HeartBeat::new(10000, 10000));
        assert_eq!(HeartBeat::parse(" 0 , 5000 ").unwrap(), HeartBeat::new(0, 5000));
        assert!(HeartBeat::parse("10000").is_err());
        assert!(HeartBeat::parse("a,b").is_err());
    }

    #[test]
    fn test_negotiate_takes_slower_interval() {
        let schedule = HeartBeat::negotiate(HeartBeat::new(10000, 10000), HeartBeat::new(5000, 20000));
        assert_eq!(schedule.outgoing, Some(Duration::from_millis(20000)));
        assert_eq!(schedule.incoming, Some(Duration::from_millis(10000)));
    }

    #[test]
    fn test_negotiate_zero_disables_direction() {
        let schedule = HeartBeat::negotiate(HeartBeat::new(10000, 10000), HeartBeat::DISABLED);
        assert_eq!(schedule.outgoing, None);
        assert_eq!(schedule.incoming, None);

        let schedule = HeartBeat::negotiate(HeartBeat::new(0, 10000), HeartBeat::new(10000, 10000));
        assert_eq!(schedule.outgoing, None);
        assert_eq!(schedule.incoming, Some(Duration::from_millis(10000)));
    }
}
