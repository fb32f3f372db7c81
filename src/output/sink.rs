//! Publication sinks.

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info};

use super::gps::GpsMessage;
use super::Estimate;

/// Receives one [`Estimate`] per filter tick.
pub trait PublicationSink: Send {
    fn publish(&mut self, estimate: &Estimate);
}

/// Logs every estimate; the GPS message at `debug` when enabled.
#[derive(Debug, Default)]
pub struct LoggingSink {
    publish_gps: bool,
    published: u64,
}

impl LoggingSink {
    pub fn new(publish_gps: bool) -> Self {
        Self {
            publish_gps,
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl PublicationSink for LoggingSink {
    fn publish(&mut self, estimate: &Estimate) {
        self.published += 1;
        match estimate {
            Estimate::Confident(r) => {
                info!(
                    "Estimate {:.7}, {:.7} alt {:.1} m (agl {:.1} m) ±{:.1}/{:.1} m",
                    r.lat, r.lon, r.altitude_amsl, r.altitude_agl, r.horizontal_std_m, r.vertical_std_m
                );
                if self.publish_gps {
                    debug!("{:?}", GpsMessage::from_record(r));
                }
            }
            Estimate::NoConfidentEstimate => debug!("No confident estimate"),
        }
    }
}

/// Forwards estimates into a channel; drops them if the receiver lags.
pub struct ChannelSink {
    sender: Sender<Estimate>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Estimate>) -> Self {
        Self { sender }
    }
}

impl PublicationSink for ChannelSink {
    fn publish(&mut self, estimate: &Estimate) {
        match self.sender.try_send(estimate.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!("Publication channel full, dropping estimate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx);
        sink.publish(&Estimate::NoConfidentEstimate);
        sink.publish(&Estimate::NoConfidentEstimate);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
