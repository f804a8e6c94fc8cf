//! Forwarding of channel opt-ins and attribute edits from submitted forms.

use tracing::{debug, warn};

use crate::form::{AttributeMutation, ChannelRegistration};

/// Destination for the side effects of a submitted form.
pub trait RegistrationSink: Send + Sync {
    fn register_channel(&self, channel: &ChannelRegistration) -> anyhow::Result<()>;

    fn apply_attributes(&self, attributes: &[AttributeMutation]) -> anyhow::Result<()>;
}

/// Applies attributes first, then registers every channel. Failures are
/// logged and never surfaced.
pub(crate) fn forward(
    sink: &dyn RegistrationSink,
    channels: &[ChannelRegistration],
    attributes: &[AttributeMutation],
) {
    if !attributes.is_empty() {
        match sink.apply_attributes(attributes) {
            Ok(()) => debug!(count = attributes.len(), "applied form attributes"),
            Err(err) => warn!(error = %err, count = attributes.len(), "failed to apply form attributes"),
        }
    }

    for channel in channels {
        if let Err(err) = sink.register_channel(channel) {
            warn!(error = %err, ?channel, "failed to register channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{AttributeName, AttributeValue, SmsOptions};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakySink {
        calls: Mutex<Vec<String>>,
    }

    impl RegistrationSink for FlakySink {
        fn register_channel(&self, channel: &ChannelRegistration) -> anyhow::Result<()> {
            let ChannelRegistration::Sms { msisdn, .. } = channel else {
                anyhow::bail!("email registration unavailable");
            };
            self.calls.lock().push(format!("sms:{msisdn}"));
            Ok(())
        }

        fn apply_attributes(&self, attributes: &[AttributeMutation]) -> anyhow::Result<()> {
            self.calls.lock().push(format!("attributes:{}", attributes.len()));
            Ok(())
        }
    }

    #[test]
    fn failures_do_not_stop_later_registrations() {
        let sink = FlakySink::default();
        let channels = vec![
            ChannelRegistration::Email {
                address: "a@b.c".into(),
                options: Default::default(),
            },
            ChannelRegistration::Sms {
                msisdn: "123".into(),
                options: SmsOptions {
                    sender_id: "sender".into(),
                },
            },
        ];
        let attributes = vec![AttributeMutation {
            name: AttributeName::contact("name"),
            value: AttributeValue::String("value".into()),
        }];

        forward(&sink, &channels, &attributes);
        assert_eq!(*sink.calls.lock(), vec!["attributes:1", "sms:123"]);
    }
}
