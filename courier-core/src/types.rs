use crate::dialing::DialPlan;
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Extra derives are opt-in. `Recipient` is only built through
/// [`Recipient::parse`] and gets none.
macro_rules! id_newtype {
    ($name:ident $(, $extra:path)*) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize $(, $extra)*)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(TaskId, Deserialize);
id_newtype!(Recipient);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Recipient {
    /// Normalizes `raw` under `plan`; fails when no digits survive.
    pub fn parse(raw: &str, plan: &DialPlan) -> Result<Self> {
        let normalized = plan.normalize(raw);
        if normalized.is_empty() {
            return Err(DispatchError::InvalidRecipient(raw.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One notification waiting for (or going through) the automation surface.
///
/// Fields are private so a task cannot change once it has been built.
#[derive(Debug, Clone, Serialize)]
pub struct SendTask {
    task_id: TaskId,
    recipient_raw: String,
    recipient: Recipient,
    message_text: String,
    customer_label: String,
    enqueued_at: DateTime<Utc>,
}

impl SendTask {
    pub fn new(
        recipient_raw: impl Into<String>,
        plan: &DialPlan,
        message_text: impl Into<String>,
        customer_label: impl Into<String>,
    ) -> Result<Self> {
        let recipient_raw = recipient_raw.into();
        let recipient = Recipient::parse(&recipient_raw, plan)?;
        Ok(Self {
            task_id: TaskId::generate(),
            recipient_raw,
            recipient,
            message_text: message_text.into(),
            customer_label: customer_label.into(),
            enqueued_at: Utc::now(),
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn recipient_raw(&self) -> &str {
        &self.recipient_raw
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn message_text(&self) -> &str {
        &self.message_text
    }

    pub fn customer_label(&self) -> &str {
        &self.customer_label
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Returned to the submitter once a task is accepted. Acceptance is not
/// delivery.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReceipt {
    pub task_id: TaskId,
    pub recipient: Recipient,
    pub queue_depth: usize,
}
