//! Sensor notifications.
use rsbridge_sys::{LogSeverity, NotificationCategory, RawNotification};

use crate::api::Api;
use crate::error::off_thread_call;

/// A notification raised by a sensor, copied out of the SDK.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub description: String,
    /// Milliseconds, in the SDK's clock.
    pub timestamp: f64,
    pub severity: LogSeverity,
    pub category: NotificationCategory,
    pub serialized_data: String,
}

impl Notification {
    /// Copies every field. Runs on the SDK thread that raised the notification, while the handle
    /// is still valid.
    pub(crate) fn read(api: &Api, notification: RawNotification) -> Self {
        Self {
            description: off_thread_call(api, |sdk, error| {
                sdk.notification_description(notification, error)
            })
            .unwrap_or_default(),
            timestamp: off_thread_call(api, |sdk, error| {
                sdk.notification_timestamp(notification, error)
            }),
            severity: off_thread_call(api, |sdk, error| {
                sdk.notification_severity(notification, error)
            }),
            category: off_thread_call(api, |sdk, error| {
                sdk.notification_category(notification, error)
            }),
            serialized_data: off_thread_call(api, |sdk, error| {
                sdk.notification_serialized_data(notification, error)
            })
            .unwrap_or_default(),
        }
    }
}
